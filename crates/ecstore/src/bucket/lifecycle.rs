// Copyright 2025 FerriteFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::store_api::ObjectInfo;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use tokio::sync::mpsc;
use tracing::warn;

/// The action lifecycle evaluation decided for one object version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IlmAction {
    #[default]
    NoneAction,
    DeleteAction,
    DeleteVersionAction,
    DeleteRestoredAction,
    DeleteRestoredVersionAction,
}

impl IlmAction {
    pub fn delete_restored(&self) -> bool {
        matches!(self, IlmAction::DeleteRestoredAction | IlmAction::DeleteRestoredVersionAction)
    }

    pub fn delete_all(&self) -> bool {
        matches!(
            self,
            IlmAction::DeleteAction
                | IlmAction::DeleteVersionAction
                | IlmAction::DeleteRestoredAction
                | IlmAction::DeleteRestoredVersionAction
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Expiration {
    pub days: Option<i64>,
    /// Removes a delete marker once it is the only version left.
    #[serde(default)]
    pub expired_object_delete_marker: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoncurrentVersionExpiration {
    pub noncurrent_days: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub enabled: bool,
    #[serde(default)]
    pub prefix: String,
    pub expiration: Option<Expiration>,
    pub noncurrent_version_expiration: Option<NoncurrentVersionExpiration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    pub rules: Vec<Rule>,
}

impl LifecycleConfig {
    pub fn has_active_rules(&self, prefix: &str) -> bool {
        self.rules.iter().any(|r| {
            r.enabled
                && (prefix.is_empty() || r.prefix.is_empty() || prefix.starts_with(&r.prefix) || r.prefix.starts_with(prefix))
        })
    }

    fn eval_inner(&self, obj: &ObjectInfo, now: OffsetDateTime) -> IlmAction {
        if obj.name.is_empty() || obj.mod_time.is_none() {
            return IlmAction::NoneAction;
        }

        // A restored copy past its expiry is reclaimed first,
        // whichever rule produced it.
        if let Some(expires) = obj.restore_expires() {
            if now > expires {
                if obj.version_id.is_some() && !obj.is_latest {
                    return IlmAction::DeleteRestoredVersionAction;
                }
                return IlmAction::DeleteRestoredAction;
            }
        }

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !rule.prefix.is_empty() && !obj.name.starts_with(&rule.prefix) {
                continue;
            }

            if !obj.is_latest {
                if let Some(nve) = &rule.noncurrent_version_expiration {
                    if let (Some(days), Some(since)) = (nve.noncurrent_days, obj.successor_mod_time) {
                        if now - since > Duration::days(days) {
                            return IlmAction::DeleteVersionAction;
                        }
                    }
                }
                continue;
            }

            if let Some(exp) = &rule.expiration {
                if exp.expired_object_delete_marker && obj.delete_marker && obj.num_versions == 1 {
                    return IlmAction::DeleteVersionAction;
                }

                if let (Some(days), Some(mod_time)) = (exp.days, obj.mod_time) {
                    if now - mod_time > Duration::days(days) {
                        return IlmAction::DeleteAction;
                    }
                }
            }
        }

        IlmAction::NoneAction
    }

    pub fn eval(&self, obj: &ObjectInfo) -> IlmAction {
        self.eval_inner(obj, OffsetDateTime::now_utc())
    }
}

/// Computes the lifecycle verdict for an entry on the listing path.
/// Object lock wins over any delete decision.
pub fn eval_action_from_lifecycle(
    lc: &LifecycleConfig,
    lock_enabled: bool,
    obj: &ObjectInfo,
    _is_restored_copy: bool,
) -> IlmAction {
    let action = lc.eval(obj);
    if lock_enabled && action.delete_all() && !action.delete_restored() {
        return IlmAction::NoneAction;
    }
    action
}

#[derive(Debug, Clone)]
pub struct ExpiryTask {
    pub bucket: String,
    pub object: String,
    pub version_id: Option<uuid::Uuid>,
    pub restored_object: bool,
    pub version_expiry: bool,
}

/// Fan-in queue for expiration jobs. Producers on the listing path
/// only ever enqueue, they never wait for the scrubber.
#[derive(Debug)]
pub struct ExpiryState {
    tx: mpsc::Sender<ExpiryTask>,
}

impl ExpiryState {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ExpiryTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn enqueue_by_days(&self, obj: &ObjectInfo, restored_object: bool, version_expiry: bool) {
        let task = ExpiryTask {
            bucket: obj.bucket.clone(),
            object: obj.name.clone(),
            version_id: obj.version_id,
            restored_object,
            version_expiry,
        };

        if self.tx.try_send(task).is_err() {
            warn!("expiry queue full, dropping task for {}/{}", obj.bucket, obj.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aged_object(name: &str, age_days: i64) -> ObjectInfo {
        ObjectInfo {
            bucket: "bucket".to_string(),
            name: name.to_string(),
            mod_time: Some(OffsetDateTime::now_utc() - Duration::days(age_days)),
            is_latest: true,
            ..Default::default()
        }
    }

    fn expire_after(days: i64) -> LifecycleConfig {
        LifecycleConfig {
            rules: vec![Rule {
                id: "expire".to_string(),
                enabled: true,
                expiration: Some(Expiration {
                    days: Some(days),
                    ..Default::default()
                }),
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_expiration_by_age() {
        let lc = expire_after(30);
        assert_eq!(lc.eval(&aged_object("old", 40)), IlmAction::DeleteAction);
        assert_eq!(lc.eval(&aged_object("young", 10)), IlmAction::NoneAction);
    }

    #[test]
    fn test_prefix_scoping() {
        let mut lc = expire_after(30);
        lc.rules[0].prefix = "logs/".to_string();

        assert_eq!(lc.eval(&aged_object("logs/app.log", 40)), IlmAction::DeleteAction);
        assert_eq!(lc.eval(&aged_object("data/app.bin", 40)), IlmAction::NoneAction);

        assert!(lc.has_active_rules("logs/2024/"));
        assert!(lc.has_active_rules(""));
    }

    #[test]
    fn test_noncurrent_expiration() {
        let lc = LifecycleConfig {
            rules: vec![Rule {
                id: "noncurrent".to_string(),
                enabled: true,
                noncurrent_version_expiration: Some(NoncurrentVersionExpiration {
                    noncurrent_days: Some(10),
                }),
                ..Default::default()
            }],
        };

        let mut obj = aged_object("obj", 40);
        obj.is_latest = false;
        obj.successor_mod_time = Some(OffsetDateTime::now_utc() - Duration::days(20));
        assert_eq!(lc.eval(&obj), IlmAction::DeleteVersionAction);

        obj.successor_mod_time = Some(OffsetDateTime::now_utc() - Duration::days(5));
        assert_eq!(lc.eval(&obj), IlmAction::NoneAction);
    }

    #[test]
    fn test_object_lock_suppresses_delete() {
        let lc = expire_after(30);
        let obj = aged_object("locked", 40);
        assert_eq!(eval_action_from_lifecycle(&lc, true, &obj, false), IlmAction::NoneAction);
        assert_eq!(eval_action_from_lifecycle(&lc, false, &obj, false), IlmAction::DeleteAction);
    }

    #[test]
    fn test_expiry_queue_nonblocking() {
        let (state, mut rx) = ExpiryState::new(1);
        let obj = aged_object("a", 40);
        state.enqueue_by_days(&obj, false, false);
        // Queue full: the second enqueue is dropped, not blocked on.
        state.enqueue_by_days(&obj, false, false);

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
