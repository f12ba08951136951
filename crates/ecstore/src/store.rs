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

use crate::bucket::lifecycle::{ExpiryState, ExpiryTask};
use crate::bucket::metadata_sys::BucketMetadataSys;
use crate::bucket::replication::{ReplicationHealTask, ReplicationPool};
use crate::cache_value::metacache_manager::{MetacacheConfig, MetacacheManager};
use crate::cache_value::metacache_stream::MetacacheStore;
use crate::endpoints::EndpointServerPools;
use crate::error::{Result, StorageError};
use crate::rpc::PeerMetacacheSys;
use crate::sets::Sets;
use ferrite_disk::{DiskAPI, DiskStore, rename_all_bucket_metacache};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

const BACKGROUND_QUEUE_CAPACITY: usize = 10_000;

/// The erasure coded store: every pool, its sets, and the service
/// handles the listing engine depends on. All cross-cutting state is
/// owned here and injected, nothing hangs off process globals.
#[derive(Debug)]
pub struct ECStore {
    pub id: Uuid,
    pub pools: Vec<Arc<Sets>>,
    pub metacache_mgr: Arc<MetacacheManager>,
    pub metacache_store: Arc<MetacacheStore>,
    pub peer_sys: Arc<PeerMetacacheSys>,
    pub expiry_state: Arc<ExpiryState>,
    pub replication_pool: Arc<ReplicationPool>,
    pub bucket_metadata: Arc<BucketMetadataSys>,
    pub cfg: MetacacheConfig,
}

/// Receiver ends of the background queues; the scrubber and the
/// replication workers consume these outside of this crate's scope.
pub struct BackgroundQueues {
    pub expiry_rx: mpsc::Receiver<ExpiryTask>,
    pub replication_rx: mpsc::Receiver<ReplicationHealTask>,
}

impl ECStore {
    pub async fn new(endpoint_pools: EndpointServerPools, cfg: MetacacheConfig) -> Result<(Arc<Self>, BackgroundQueues)> {
        Self::new_with_peers(endpoint_pools, cfg, PeerMetacacheSys::single_node()).await
    }

    pub async fn new_with_peers(
        endpoint_pools: EndpointServerPools,
        cfg: MetacacheConfig,
        peer_sys: PeerMetacacheSys,
    ) -> Result<(Arc<Self>, BackgroundQueues)> {
        if endpoint_pools.n_endpoints() == 0 {
            return Err(StorageError::InvalidArgument("no endpoints configured".to_string()));
        }

        let mut pools = Vec::with_capacity(endpoint_pools.0.len());
        for (pool_idx, pool_eps) in endpoint_pools.0.iter().enumerate() {
            pools.push(Sets::new(pool_eps, pool_idx).await?);
        }

        let meta_disk = first_local_disk(&pools)
            .ok_or_else(|| StorageError::InvalidArgument("no local drive for the metacache store".to_string()))?;

        // Listing caches of a previous process must not be served.
        for sets in pools.iter() {
            for set in sets.disk_set.iter() {
                let disks = set.disks.read().await;
                for disk in disks.iter().flatten() {
                    if let Err(err) = rename_all_bucket_metacache(disk).await {
                        warn!("stale metacache sweep on {} failed: {:?}", disk.to_string(), err);
                    }
                }
            }
        }

        let (expiry_state, expiry_rx) = ExpiryState::new(BACKGROUND_QUEUE_CAPACITY);
        let (replication_pool, replication_rx) = ReplicationPool::new(BACKGROUND_QUEUE_CAPACITY);

        let store = Arc::new(ECStore {
            id: Uuid::new_v4(),
            metacache_store: Arc::new(MetacacheStore::new(meta_disk, cfg.block_size)),
            metacache_mgr: Arc::new(MetacacheManager::new(cfg.clone())),
            peer_sys: Arc::new(peer_sys),
            expiry_state: Arc::new(expiry_state),
            replication_pool: Arc::new(replication_pool),
            bucket_metadata: Arc::new(BucketMetadataSys::new()),
            cfg,
            pools,
        });

        info!("store {} initialized with {} pool(s)", store.id, store.pools.len());

        Ok((
            store,
            BackgroundQueues {
                expiry_rx,
                replication_rx,
            },
        ))
    }

    /// Creates the bucket on every drive of every set.
    pub async fn make_bucket(&self, bucket: &str) -> Result<()> {
        for sets in self.pools.iter() {
            for set in sets.disk_set.iter() {
                let disks = set.disks.read().await;
                for disk in disks.iter().flatten() {
                    disk.make_volume(bucket).await?;
                }
            }
        }
        Ok(())
    }

    /// Drops bucket state: listing caches first, then the volume.
    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.metacache_mgr.delete_bucket(bucket).await;
        self.metacache_store.delete_bucket(bucket).await?;
        self.bucket_metadata.delete(bucket).await;

        for sets in self.pools.iter() {
            for set in sets.disk_set.iter() {
                let disks = set.disks.read().await;
                for disk in disks.iter().flatten() {
                    disk.delete(bucket, "", true).await?;
                }
            }
        }
        Ok(())
    }

    /// Periodic maintenance: expires idle caches and purges their
    /// block trees.
    pub async fn cleanup_metacaches(&self) {
        for (bucket, id) in self.metacache_mgr.cleanup().await {
            if let Err(err) = self.metacache_store.drop_all(&bucket, &id).await {
                warn!("failed to drop metacache {bucket}/{id}: {err:?}");
            }
        }
    }
}

fn first_local_disk(pools: &[Arc<Sets>]) -> Option<DiskStore> {
    for sets in pools.iter() {
        for set in sets.disk_set.iter() {
            // Construction order keeps local drives at their planned
            // slots; try_read never contends during startup.
            if let Ok(disks) = set.disks.try_read() {
                if let Some(disk) = disks.iter().flatten().next() {
                    return Some(disk.clone());
                }
            }
        }
    }
    None
}
