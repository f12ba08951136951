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

use crate::bucket::lifecycle::LifecycleConfig;
use crate::bucket::replication::ReplicationConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Per bucket configuration as far as the listing path consumes it.
/// Policy, SSE, quota and tagging live with their own subsystems.
#[derive(Debug, Clone, Default)]
pub struct BucketMetadata {
    pub versioning: bool,
    pub object_lock_enabled: bool,
    pub lifecycle: Option<Arc<LifecycleConfig>>,
    pub replication: Option<Arc<ReplicationConfig>>,
}

/// In-memory bucket metadata registry. A lifetime scoped handle owned
/// by the store, not a process global.
#[derive(Debug, Default)]
pub struct BucketMetadataSys {
    buckets: RwLock<HashMap<String, Arc<BucketMetadata>>>,
}

impl BucketMetadataSys {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, bucket: &str) -> Option<Arc<BucketMetadata>> {
        self.buckets.read().await.get(bucket).cloned()
    }

    pub async fn set(&self, bucket: &str, meta: BucketMetadata) {
        self.buckets.write().await.insert(bucket.to_string(), Arc::new(meta));
    }

    pub async fn delete(&self, bucket: &str) {
        self.buckets.write().await.remove(bucket);
    }

    pub async fn versioned(&self, bucket: &str) -> bool {
        self.get(bucket).await.map(|m| m.versioning).unwrap_or(false)
    }
}
