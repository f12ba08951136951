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
use tokio::sync::mpsc;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationRule {
    pub id: String,
    pub enabled: bool,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicationConfig {
    pub role_arn: String,
    pub rules: Vec<ReplicationRule>,
}

impl ReplicationConfig {
    /// True when any enabled rule applies below `prefix`. With
    /// `recursive` the rule also matches parents of the prefix.
    pub fn has_active_rules(&self, prefix: &str, recursive: bool) -> bool {
        self.rules.iter().any(|r| {
            if !r.enabled {
                return false;
            }
            if prefix.is_empty() || r.prefix.is_empty() {
                return true;
            }
            prefix.starts_with(&r.prefix) || (recursive && r.prefix.starts_with(prefix))
        })
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationHealTask {
    pub bucket: String,
    pub object: String,
    pub version_id: Option<uuid::Uuid>,
}

/// Fan-in queue for background replication heal checks. The listing
/// path enqueues candidates and moves on, the pool workers own the
/// actual verification.
#[derive(Debug)]
pub struct ReplicationPool {
    tx: mpsc::Sender<ReplicationHealTask>,
}

impl ReplicationPool {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReplicationHealTask>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn queue_replication_heal(&self, bucket: &str, obj: &ObjectInfo, cfg: &ReplicationConfig) {
        if !cfg.has_active_rules(&obj.name, true) {
            return;
        }

        let task = ReplicationHealTask {
            bucket: bucket.to_string(),
            object: obj.name.clone(),
            version_id: obj.version_id,
        };

        if self.tx.try_send(task).is_err() {
            warn!("replication heal queue full, dropping {}/{}", bucket, obj.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_active_rules() {
        let cfg = ReplicationConfig {
            role_arn: String::new(),
            rules: vec![ReplicationRule {
                id: "r1".to_string(),
                enabled: true,
                prefix: "docs/".to_string(),
            }],
        };

        assert!(cfg.has_active_rules("docs/a.txt", false));
        assert!(!cfg.has_active_rules("media/a.mp4", false));
        assert!(cfg.has_active_rules("", false));
        // Recursive matches parents of configured prefixes as well.
        assert!(cfg.has_active_rules("do", true));
        assert!(!cfg.has_active_rules("do", false));
    }

    #[test]
    fn test_queue_heal_respects_rules() {
        let cfg = ReplicationConfig {
            role_arn: String::new(),
            rules: vec![ReplicationRule {
                id: "r1".to_string(),
                enabled: true,
                prefix: "docs/".to_string(),
            }],
        };

        let (pool, mut rx) = ReplicationPool::new(4);
        let obj = ObjectInfo {
            bucket: "bucket".to_string(),
            name: "docs/a.txt".to_string(),
            ..Default::default()
        };
        pool.queue_replication_heal("bucket", &obj, &cfg);

        let other = ObjectInfo {
            bucket: "bucket".to_string(),
            name: "media/b.mp4".to_string(),
            ..Default::default()
        };
        pool.queue_replication_heal("bucket", &other, &cfg);

        assert_eq!(rx.try_recv().unwrap().object, "docs/a.txt");
        assert!(rx.try_recv().is_err());
    }
}
