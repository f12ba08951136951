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

use crate::cache_value::metacache_manager::Metacache;
use crate::error::{Result, StorageError};
use crate::store_list_objects::ListPathOptions;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use xxhash_rust::xxh64::xxh64;

/// Every peer call runs under this deadline; a miss degrades the
/// caller to a transient listing instead of blocking the client.
pub const PEER_CALL_DEADLINE: Duration = Duration::from_secs(5);

/// The serializable subset of the listing options a remote manager
/// needs to find or reserve a cache. Both RPC verbs move plain JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetacacheListingRequest {
    pub id: Option<String>,
    pub bucket: String,
    pub base_dir: String,
    pub prefix: String,
    pub filter_prefix: Option<String>,
    pub create: bool,
    pub recursive: bool,
}

impl From<&ListPathOptions> for MetacacheListingRequest {
    fn from(o: &ListPathOptions) -> Self {
        Self {
            id: o.id.clone(),
            bucket: o.bucket.clone(),
            base_dir: o.base_dir.clone(),
            prefix: o.prefix.clone(),
            filter_prefix: o.filter_prefix.clone(),
            create: o.create,
            recursive: o.recursive,
        }
    }
}

impl MetacacheListingRequest {
    pub fn into_options(self) -> ListPathOptions {
        ListPathOptions {
            id: self.id,
            bucket: self.bucket,
            base_dir: self.base_dir,
            prefix: self.prefix,
            filter_prefix: self.filter_prefix,
            create: self.create,
            recursive: self.recursive,
            ..Default::default()
        }
    }
}

/// Reply to `GetMetacacheListing`: the session plus whether this call
/// reserved it, which makes the caller the one writer of its blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetacacheListingResponse {
    pub cache: Metacache,
    pub created: bool,
}

/// The two verbs a node answers for listing coordination.
pub trait PeerMetacacheClient: Send + Sync + std::fmt::Debug {
    fn get_metacache_listing<'a>(
        &'a self,
        req: MetacacheListingRequest,
    ) -> Pin<Box<dyn Future<Output = Result<MetacacheListingResponse>> + Send + 'a>>;

    fn update_metacache_listing<'a>(&'a self, cache: Metacache) -> Pin<Box<dyn Future<Output = Result<Metacache>> + Send + 'a>>;
}

pub async fn call_with_deadline<T>(fut: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(PEER_CALL_DEADLINE, fut).await {
        Ok(res) => res,
        Err(_) => Err(StorageError::Timeout),
    }
}

/// Ownership of a listing session is pinned to one node by hashing its
/// `bucket/prefix` key over the peer ring. A `None` slot is this node.
#[derive(Debug, Default)]
pub struct PeerMetacacheSys {
    peers: Vec<Option<Arc<dyn PeerMetacacheClient>>>,
}

impl PeerMetacacheSys {
    pub fn new(peers: Vec<Option<Arc<dyn PeerMetacacheClient>>>) -> Self {
        Self { peers }
    }

    /// Single node deployments own every cache locally.
    pub fn single_node() -> Self {
        Self { peers: Vec::new() }
    }

    /// Returns the owning peer for `key`, or `None` when the owner is
    /// the local node.
    pub fn client_from_hash(&self, key: &str) -> Option<Arc<dyn PeerMetacacheClient>> {
        if self.peers.is_empty() {
            return None;
        }
        let idx = (xxh64(key.as_bytes(), 0) % self.peers.len() as u64) as usize;
        self.peers[idx].clone()
    }
}
