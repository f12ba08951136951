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

use crate::endpoints::Endpoint;
use ferrite_disk::{DiskAPI, DiskStore};
use tokio::sync::RwLock;

/// Health counters of a drive as far as listing cares: listing's
/// `auto` quorum mode selects drives whose mutation counters agree.
#[derive(Debug, Default, Clone)]
pub struct DiskMetrics {
    pub total_deletes: u64,
    pub total_writes: u64,
}

#[derive(Debug, Default, Clone)]
pub struct DiskInfo {
    pub error: String,
    pub metrics: DiskMetrics,
}

/// One erasure set: a fixed group of drives listed and healed as a
/// unit. Pool and set coordinates are arena indices, the set never
/// points back at its pool.
#[derive(Debug)]
pub struct SetDisks {
    pub disks: RwLock<Vec<Option<DiskStore>>>,
    pub set_endpoints: Vec<Endpoint>,
    pub set_drive_count: usize,
    pub default_parity_count: usize,
    pub set_index: usize,
    pub pool_index: usize,
}

impl SetDisks {
    pub fn new(
        disks: Vec<Option<DiskStore>>,
        set_endpoints: Vec<Endpoint>,
        set_drive_count: usize,
        default_parity_count: usize,
        pool_index: usize,
        set_index: usize,
    ) -> Self {
        Self {
            disks: RwLock::new(disks),
            set_endpoints,
            set_drive_count,
            default_parity_count,
            set_index,
            pool_index,
        }
    }

    /// Online drives of the set together with their health info.
    pub async fn get_online_disks_with_healing_and_info(&self) -> (Vec<DiskStore>, Vec<DiskInfo>) {
        let disks = self.disks.read().await;

        let mut online = Vec::with_capacity(disks.len());
        let mut infos = Vec::with_capacity(disks.len());

        for disk in disks.iter().flatten() {
            if disk.is_online() {
                online.push(disk.clone());
                infos.push(DiskInfo::default());
            }
        }

        (online, infos)
    }
}
