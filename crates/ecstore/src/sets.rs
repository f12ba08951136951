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

use crate::endpoints::PoolEndpoints;
use crate::error::Result;
use crate::set_disk::SetDisks;
use ferrite_disk::{DiskStore, LocalDisk};
use std::sync::Arc;

/// One pool: the ordered collection of its erasure sets.
#[derive(Debug)]
pub struct Sets {
    pub disk_set: Vec<Arc<SetDisks>>,
    pub pool_idx: usize,
    pub set_count: usize,
    pub set_drive_count: usize,
}

impl Sets {
    pub async fn new(endpoints: &PoolEndpoints, pool_idx: usize) -> Result<Arc<Self>> {
        let set_count = endpoints.set_count;
        let set_drive_count = endpoints.drives_per_set;

        let mut disk_set = Vec::with_capacity(set_count);
        for set_idx in 0..set_count {
            let set_endpoints: Vec<_> = endpoints
                .endpoints
                .iter()
                .filter(|e| e.set_idx == set_idx as i32)
                .cloned()
                .collect();

            let mut disks: Vec<Option<DiskStore>> = Vec::with_capacity(set_endpoints.len());
            for ep in set_endpoints.iter() {
                if ep.is_local {
                    let mut disk = LocalDisk::new(&ep.url, ep.get_path()).await?;
                    disk.pool_idx = pool_idx;
                    disk.set_idx = set_idx;
                    disk.disk_idx = ep.disk_idx.max(0) as usize;
                    disks.push(Some(Arc::new(disk)));
                } else {
                    // Remote drives surface through their node's own
                    // listing, an offline slot is kept for quorum math.
                    disks.push(None);
                }
            }

            disk_set.push(Arc::new(SetDisks::new(
                disks,
                set_endpoints,
                set_drive_count,
                set_drive_count / 2,
                pool_idx,
                set_idx,
            )));
        }

        Ok(Arc::new(Sets {
            disk_set,
            pool_idx,
            set_count,
            set_drive_count,
        }))
    }
}
