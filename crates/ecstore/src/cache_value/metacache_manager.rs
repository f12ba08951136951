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

use crate::cache_value::metacache_stream::DEFAULT_METACACHE_BLOCK_SIZE;
use crate::error::Result;
use crate::store_list_objects::ListPathOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Tunables of the metacache subsystem. The reference implementation
/// hard-coded these; here they ride along the store construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetacacheConfig {
    /// Entries per persisted block.
    pub block_size: usize,
    /// How long an unfinished scan may go without updates.
    pub running_ttl: Duration,
    /// How long a finished cache is kept after its last handout.
    pub finished_ttl: Duration,
    /// How long an errored cache lingers before removal.
    pub error_ttl: Duration,
    /// Upper bound a client may go silent before its scan is dropped.
    pub max_client_wait: Duration,
}

impl Default for MetacacheConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_METACACHE_BLOCK_SIZE,
            running_ttl: Duration::from_secs(3600),
            finished_ttl: Duration::from_secs(900),
            error_ttl: Duration::from_secs(300),
            max_client_wait: Duration::from_secs(180),
        }
    }
}

/// Scan status of one listing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanStatus {
    #[default]
    None = 0,
    Started = 1,
    Success = 2,
    Error = 3,
}

/// One resumable listing session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metacache {
    pub id: String,
    pub bucket: String,
    /// Directory the scan is rooted at.
    pub root: String,
    pub filter: Option<String>,
    pub status: ScanStatus,
    pub started: SystemTime,
    pub ended: Option<SystemTime>,
    pub last_handout: SystemTime,
    pub last_update: SystemTime,
    pub error: Option<String>,
    pub file_not_found: bool,
    pub recursive: bool,
    pub data_version: u8,
}

impl Metacache {
    pub fn new(opts: &ListPathOptions) -> Self {
        let now = SystemTime::now();
        Self {
            id: opts.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string()),
            bucket: opts.bucket.clone(),
            root: opts.base_dir.clone(),
            filter: opts.filter_prefix.clone(),
            status: ScanStatus::Started,
            started: now,
            ended: None,
            last_handout: now,
            last_update: now,
            error: None,
            file_not_found: false,
            recursive: opts.recursive,
            data_version: 1,
        }
    }

    fn none_for(opts: &ListPathOptions) -> Self {
        let now = SystemTime::now();
        Self {
            id: opts.id.clone().unwrap_or_default(),
            bucket: opts.bucket.clone(),
            root: opts.base_dir.clone(),
            filter: opts.filter_prefix.clone(),
            status: ScanStatus::None,
            started: now,
            ended: None,
            last_handout: now,
            last_update: now,
            error: None,
            file_not_found: false,
            recursive: opts.recursive,
            data_version: 1,
        }
    }

    pub fn finished(&self) -> bool {
        self.ended.is_some()
    }

    /// Whether the request described by `opts` can be served from this
    /// cache. The cache must cover the request: its root is the
    /// request's base dir or an ancestor of it (an ancestor only
    /// reaches below its own level when the scan was recursive), its
    /// filter must not narrow the request, and a recursive request
    /// needs a recursive scan.
    fn matches(&self, opts: &ListPathOptions) -> bool {
        if !opts.base_dir.starts_with(&self.root) {
            return false;
        }
        if self.root != opts.base_dir && !self.recursive {
            return false;
        }
        if self.filter.is_some() && self.filter != opts.filter_prefix {
            return false;
        }
        self.recursive || !opts.recursive
    }

    pub fn worth_keeping(&self, cfg: &MetacacheConfig) -> bool {
        let now = SystemTime::now();

        match self.status {
            ScanStatus::Started => {
                // A scan without updates is presumed dead.
                now.duration_since(self.last_update).map(|e| e < cfg.running_ttl).unwrap_or(false)
            }
            ScanStatus::Success => {
                // Keep while a client keeps taking handouts.
                now.duration_since(self.last_handout).map(|e| e < cfg.finished_ttl).unwrap_or(false)
            }
            ScanStatus::Error | ScanStatus::None => {
                now.duration_since(self.last_update).map(|e| e < cfg.error_ttl).unwrap_or(false)
            }
        }
    }

    /// Folds a remote or caller supplied update into this cache entry.
    pub fn update(&mut self, update: &Metacache, cfg: &MetacacheConfig) {
        let now = SystemTime::now();
        self.last_update = now;

        if update.last_handout > self.last_handout {
            self.last_handout = update.last_handout;
            if self.last_handout > now {
                self.last_handout = now;
            }
        }

        if self.status == ScanStatus::Started && update.status == ScanStatus::Success {
            self.ended = Some(now);
        }

        if self.status == ScanStatus::Started && update.status != ScanStatus::Started {
            self.status = update.status;
        }

        if self.status == ScanStatus::Started {
            if let Ok(elapsed) = now.duration_since(self.last_handout) {
                if elapsed > cfg.max_client_wait {
                    self.status = ScanStatus::Error;
                    self.error = Some("client not seen".to_string());
                }
            }
        }

        if self.error.is_none() && update.error.is_some() {
            self.error = update.error.clone();
            self.status = ScanStatus::Error;
            self.ended = Some(now);
        }

        self.file_not_found = self.file_not_found || update.file_not_found;
    }
}

/// All listing sessions of one bucket.
#[derive(Debug)]
pub struct BucketMetacache {
    bucket: String,
    caches: HashMap<String, Metacache>,
    cfg: MetacacheConfig,
    updated: bool,
}

impl BucketMetacache {
    fn new(bucket: String, cfg: MetacacheConfig) -> Self {
        Self {
            bucket,
            caches: HashMap::new(),
            cfg,
            updated: false,
        }
    }

    /// Finds a cache serving `opts`: by id when the caller already has
    /// one, otherwise any live compatible scan under the same root.
    /// Reserves a fresh cache only when the caller asked to create.
    /// The flag reports whether this call became the cache's creator,
    /// which makes the caller the one writer of its blocks.
    pub fn find_cache(&mut self, opts: &ListPathOptions) -> (Metacache, bool) {
        if let Some(id) = &opts.id {
            if let Some(mut cache) = self.caches.get(id).cloned() {
                cache.last_handout = SystemTime::now();
                self.caches.insert(cache.id.clone(), cache.clone());
                debug!("returning existing cache {}", cache.id);
                return (cache, false);
            }
        }

        // Overlapping listers settle here: a running scan whose root
        // covers the request (the same dir, or an ancestor scanned
        // recursively) is joined instead of forked, which is what
        // amortizes one namespace walk across many concurrent clients.
        // Finished caches are only served to resumers carrying the id,
        // a fresh cold list always sees current state.
        let best = self
            .caches
            .values()
            .filter(|c| c.matches(opts) && c.status == ScanStatus::Started && c.worth_keeping(&self.cfg))
            .max_by_key(|c| c.started)
            .cloned();

        if let Some(mut cache) = best {
            cache.last_handout = SystemTime::now();
            self.caches.insert(cache.id.clone(), cache.clone());
            debug!("joining covering cache {} for bucket {}", cache.id, self.bucket);
            return (cache, false);
        }

        if !opts.create {
            return (Metacache::none_for(opts), false);
        }

        let cache = Metacache::new(opts);
        self.caches.insert(cache.id.clone(), cache.clone());
        self.updated = true;
        debug!("reserved new cache {} for bucket {}", cache.id, cache.bucket);
        (cache, true)
    }

    pub fn update_cache_entry(&mut self, update: Metacache) -> Result<Metacache> {
        if let Some(cache) = self.caches.get_mut(&update.id) {
            cache.update(&update, &self.cfg);
            self.updated = true;
            Ok(cache.clone())
        } else {
            self.caches.insert(update.id.clone(), update.clone());
            self.updated = true;
            Ok(update)
        }
    }

    pub fn get_cache(&self, id: &str) -> Option<&Metacache> {
        self.caches.get(id)
    }

    /// Drops caches past their TTL; returns the ids to purge on disk.
    pub fn cleanup(&mut self) -> Vec<String> {
        let to_remove: Vec<String> = self
            .caches
            .iter()
            .filter(|(_, cache)| !cache.worth_keeping(&self.cfg))
            .map(|(id, _)| id.clone())
            .collect();

        for id in to_remove.iter() {
            self.caches.remove(id);
            debug!("removed outdated cache {}", id);
        }

        to_remove
    }

    fn mark_all_for_drop(&mut self) -> Vec<String> {
        self.caches.drain().map(|(id, _)| id).collect()
    }
}

/// The per-node registry of listing sessions, sharded by bucket.
#[derive(Debug)]
pub struct MetacacheManager {
    buckets: RwLock<HashMap<String, Arc<RwLock<BucketMetacache>>>>,
    trash: RwLock<HashMap<String, Metacache>>,
    cfg: MetacacheConfig,
}

impl MetacacheManager {
    pub fn new(cfg: MetacacheConfig) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            trash: RwLock::new(HashMap::new()),
            cfg,
        }
    }

    pub async fn get_bucket(&self, bucket: &str) -> Arc<RwLock<BucketMetacache>> {
        if let Some(bm) = self.buckets.read().await.get(bucket) {
            return bm.clone();
        }

        let mut buckets = self.buckets.write().await;
        buckets
            .entry(bucket.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(BucketMetacache::new(bucket.to_string(), self.cfg.clone()))))
            .clone()
    }

    pub async fn find_cache(&self, opts: &ListPathOptions) -> (Metacache, bool) {
        let bm = self.get_bucket(&opts.bucket).await;
        let mut bm = bm.write().await;
        bm.find_cache(opts)
    }

    pub async fn update_cache_entry(&self, update: Metacache) -> Result<Metacache> {
        if let Some(mut meta) = self.trash.read().await.get(&update.id).cloned() {
            meta.update(&update, &self.cfg);
            return Ok(meta);
        }

        let bm = self.get_bucket(&update.bucket).await;
        let mut bm = bm.write().await;
        bm.update_cache_entry(update)
    }

    /// Marks all of a bucket's caches for deletion; the block store
    /// purges their trees on its background sweep.
    pub async fn delete_bucket(&self, bucket: &str) -> Vec<String> {
        let Some(bm) = self.buckets.write().await.remove(bucket) else {
            return Vec::new();
        };

        let mut bm = bm.write().await;
        let ids = bm.mark_all_for_drop();

        let mut trash = self.trash.write().await;
        for id in ids.iter() {
            trash.insert(
                id.clone(),
                Metacache {
                    id: id.clone(),
                    bucket: bucket.to_string(),
                    root: String::new(),
                    filter: None,
                    status: ScanStatus::Error,
                    started: SystemTime::now(),
                    ended: Some(SystemTime::now()),
                    last_handout: SystemTime::now(),
                    last_update: SystemTime::now(),
                    error: Some("bucket deleted".to_string()),
                    file_not_found: false,
                    recursive: false,
                    data_version: 1,
                },
            );
        }

        ids
    }

    /// Periodic TTL sweep; returns `(bucket, id)` pairs whose on-disk
    /// trees should be dropped.
    pub async fn cleanup(&self) -> Vec<(String, String)> {
        let mut purged = Vec::new();

        for (bucket, bm) in self.buckets.read().await.iter() {
            let mut bm = bm.write().await;
            for id in bm.cleanup() {
                purged.push((bucket.clone(), id));
            }
        }

        let mut trash = self.trash.write().await;
        trash.retain(|_, cache| {
            SystemTime::now()
                .duration_since(cache.last_update)
                .map(|e| e <= self.cfg.running_ttl)
                .unwrap_or(false)
        });

        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(bucket: &str, base_dir: &str, create: bool) -> ListPathOptions {
        ListPathOptions {
            bucket: bucket.to_string(),
            base_dir: base_dir.to_string(),
            create,
            recursive: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_find_cache_reserves_and_joins() {
        let mgr = MetacacheManager::new(MetacacheConfig::default());

        // Without create no cache is reserved.
        let (none, created) = mgr.find_cache(&opts("bucket", "pre/", false)).await;
        assert_eq!(none.status, ScanStatus::None);
        assert!(!created);

        let (first, created) = mgr.find_cache(&opts("bucket", "pre/", true)).await;
        assert_eq!(first.status, ScanStatus::Started);
        assert!(created);

        // A racing lister with identical parameters joins, not forks.
        let (second, created) = mgr.find_cache(&opts("bucket", "pre/", true)).await;
        assert_eq!(second.id, first.id);
        assert!(!created);

        // A different root reserves its own cache.
        let (other, created) = mgr.find_cache(&opts("bucket", "other/", true)).await;
        assert_ne!(other.id, first.id);
        assert!(created);
    }

    #[tokio::test]
    async fn test_non_recursive_request_joins_recursive_cache() {
        let mgr = MetacacheManager::new(MetacacheConfig::default());

        let (recursive, _) = mgr.find_cache(&opts("bucket", "pre/", true)).await;

        let mut o = opts("bucket", "pre/", true);
        o.recursive = false;
        let (joined, created) = mgr.find_cache(&o).await;
        assert_eq!(joined.id, recursive.id);
        assert!(!created);

        // The reverse does not hold.
        let mut o = opts("bucket", "flat/", true);
        o.recursive = false;
        let (flat, _) = mgr.find_cache(&o).await;
        let (deep, _) = mgr.find_cache(&opts("bucket", "flat/", true)).await;
        assert_ne!(deep.id, flat.id);
    }

    #[tokio::test]
    async fn test_broader_recursive_cache_covers_deeper_request() {
        let mgr = MetacacheManager::new(MetacacheConfig::default());

        // A recursive scan of the bucket root covers any deeper dir.
        let (root_scan, created) = mgr.find_cache(&opts("bucket", "", true)).await;
        assert!(created);

        let mut o = opts("bucket", "photos/", true);
        o.recursive = false;
        let (joined, created) = mgr.find_cache(&o).await;
        assert_eq!(joined.id, root_scan.id);
        assert!(!created);

        let (joined, created) = mgr.find_cache(&opts("bucket", "photos/2024/", true)).await;
        assert_eq!(joined.id, root_scan.id);
        assert!(!created);

        // A non-recursive scan stops at its own level and covers
        // nothing below it.
        let mut shallow = opts("bucket2", "docs/", true);
        shallow.recursive = false;
        let (shallow_cache, _) = mgr.find_cache(&shallow).await;

        let (deeper, created) = mgr.find_cache(&opts("bucket2", "docs/2024/", true)).await;
        assert_ne!(deeper.id, shallow_cache.id);
        assert!(created);
    }

    #[tokio::test]
    async fn test_filtered_cache_does_not_cover_other_filters() {
        let mgr = MetacacheManager::new(MetacacheConfig::default());

        let mut filtered = opts("bucket", "logs/", true);
        filtered.filter_prefix = Some("2024".to_string());
        let (narrow, _) = mgr.find_cache(&filtered).await;

        // An unfiltered request is broader than the filtered scan.
        let (broad, created) = mgr.find_cache(&opts("bucket", "logs/", true)).await;
        assert_ne!(broad.id, narrow.id);
        assert!(created);

        // An unfiltered scan covers any filtered request below it.
        let mut filtered = opts("bucket", "logs/", true);
        filtered.filter_prefix = Some("2025".to_string());
        let (joined, created) = mgr.find_cache(&filtered).await;
        assert_eq!(joined.id, broad.id);
        assert!(!created);
    }

    #[tokio::test]
    async fn test_update_cache_entry_transitions() {
        let mgr = MetacacheManager::new(MetacacheConfig::default());
        let (cache, _) = mgr.find_cache(&opts("bucket", "", true)).await;

        let mut update = cache.clone();
        update.status = ScanStatus::Success;
        let updated = mgr.update_cache_entry(update).await.unwrap();
        assert_eq!(updated.status, ScanStatus::Success);
        assert!(updated.finished());

        // Errors are sticky.
        let mut update = updated.clone();
        update.error = Some("lost quorum".to_string());
        let updated = mgr.update_cache_entry(update).await.unwrap();
        assert_eq!(updated.status, ScanStatus::Error);
    }

    #[tokio::test]
    async fn test_worth_keeping_ttls() {
        let cfg = MetacacheConfig {
            finished_ttl: Duration::from_secs(60),
            ..Default::default()
        };

        let mut cache = Metacache::new(&opts("bucket", "", true));
        cache.status = ScanStatus::Success;
        cache.last_handout = SystemTime::now();
        assert!(cache.worth_keeping(&cfg));

        cache.last_handout = SystemTime::now() - Duration::from_secs(120);
        assert!(!cache.worth_keeping(&cfg));

        cache.status = ScanStatus::Started;
        cache.last_update = SystemTime::now() - Duration::from_secs(4000);
        assert!(!cache.worth_keeping(&cfg));
    }

    #[tokio::test]
    async fn test_delete_bucket_moves_to_trash() {
        let mgr = MetacacheManager::new(MetacacheConfig::default());
        let (cache, _) = mgr.find_cache(&opts("bucket", "", true)).await;

        let ids = mgr.delete_bucket("bucket").await;
        assert_eq!(ids, vec![cache.id.clone()]);

        // The next lister cannot resume the dropped cache.
        let mut o = opts("bucket", "", false);
        o.id = Some(cache.id);
        let (found, _) = mgr.find_cache(&o).await;
        assert_eq!(found.status, ScanStatus::None);
    }
}
