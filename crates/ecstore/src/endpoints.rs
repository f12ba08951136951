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

use crate::disks_layout::{DisksLayout, LayoutError, Result};

/// One drive location: a local path, or a path on a remote node. The
/// pool/set/disk coordinates are arena indices into the planned grid,
/// the grid never stores back-pointers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub is_local: bool,
    pub pool_idx: i32,
    pub set_idx: i32,
    pub disk_idx: i32,
}

impl Endpoint {
    pub fn new(arg: &str) -> Result<Self> {
        if arg.is_empty() {
            return Err(LayoutError::InvalidArgument("empty endpoint".to_string()));
        }

        // Remote drives carry a scheme, everything else is a local path.
        let is_local = !(arg.starts_with("http://") || arg.starts_with("https://"));

        Ok(Endpoint {
            url: arg.to_string(),
            is_local,
            pool_idx: -1,
            set_idx: -1,
            disk_idx: -1,
        })
    }

    /// The drive path without any scheme or host.
    pub fn get_path(&self) -> &str {
        match self.url.find("//") {
            Some(idx) => {
                let rest = &self.url[idx + 2..];
                match rest.find('/') {
                    Some(p) => &rest[p..],
                    None => "",
                }
            }
            None => &self.url,
        }
    }

    pub fn set_pool_index(&mut self, i: usize) {
        self.pool_idx = i as i32;
    }

    pub fn set_set_index(&mut self, i: usize) {
        self.set_idx = i as i32;
    }

    pub fn set_disk_index(&mut self, i: usize) {
        self.disk_idx = i as i32;
    }
}

pub type Endpoints = Vec<Endpoint>;

/// The endpoints of one pool together with its planned geometry.
#[derive(Debug, Default, Clone)]
pub struct PoolEndpoints {
    pub legacy: bool,
    pub set_count: usize,
    pub drives_per_set: usize,
    pub endpoints: Endpoints,
    pub cmd_line: String,
}

/// All pools of the deployment.
#[derive(Debug, Default, Clone)]
pub struct EndpointServerPools(pub Vec<PoolEndpoints>);

impl EndpointServerPools {
    /// Plans the endpoint grid from raw command line arguments and
    /// stamps every endpoint with its pool/set/disk coordinates.
    pub fn from_volumes<T: AsRef<str>>(args: &[T]) -> Result<Self> {
        let layout = DisksLayout::from_volumes(args)?;
        Self::from_layout(&layout)
    }

    pub fn from_layout(layout: &DisksLayout) -> Result<Self> {
        let mut pools = Vec::with_capacity(layout.pools.len());

        for (pool_idx, pool) in layout.pools.iter().enumerate() {
            let mut endpoints: Endpoints = Vec::new();

            for (set_idx, set) in pool.iter().enumerate() {
                for (disk_idx, arg) in set.iter().enumerate() {
                    let mut ep = Endpoint::new(arg)?;
                    ep.set_pool_index(pool_idx);
                    ep.set_set_index(set_idx);
                    ep.set_disk_index(disk_idx);
                    endpoints.push(ep);
                }
            }

            pools.push(PoolEndpoints {
                legacy: layout.legacy,
                set_count: layout.get_set_count(pool_idx),
                drives_per_set: layout.get_drives_per_set(pool_idx),
                endpoints,
                cmd_line: layout.get_cmd_line(pool_idx),
            });
        }

        Ok(EndpointServerPools(pools))
    }

    pub fn n_endpoints(&self) -> usize {
        self.0.iter().map(|p| p.endpoints.len()).sum()
    }

    pub fn first_local(&self) -> Option<&Endpoint> {
        self.0.iter().flat_map(|p| p.endpoints.iter()).find(|e| e.is_local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_volumes_indices() {
        let pools = EndpointServerPools::from_volumes(&["/mnt/disk{1...4}"]).unwrap();
        assert_eq!(pools.0.len(), 1);
        let pool = &pools.0[0];
        assert_eq!(pool.set_count, 1);
        assert_eq!(pool.drives_per_set, 4);
        assert_eq!(pool.endpoints.len(), 4);

        for (i, ep) in pool.endpoints.iter().enumerate() {
            assert_eq!(ep.pool_idx, 0);
            assert_eq!(ep.set_idx, 0);
            assert_eq!(ep.disk_idx, i as i32);
            assert!(ep.is_local);
        }
    }

    #[test]
    fn test_remote_endpoint_path() {
        let ep = Endpoint::new("http://node1:9000/mnt/disk1").unwrap();
        assert!(!ep.is_local);
        assert_eq!(ep.get_path(), "/mnt/disk1");

        let ep = Endpoint::new("/mnt/disk1").unwrap();
        assert!(ep.is_local);
        assert_eq!(ep.get_path(), "/mnt/disk1");
    }

    #[test]
    fn test_multi_set_indices() {
        let pools = EndpointServerPools::from_volumes(&["/mnt/disk{1...8}"]).unwrap();
        let pool = &pools.0[0];
        assert_eq!(pool.set_count, 1);
        assert_eq!(pool.drives_per_set, 8);

        let pools = EndpointServerPools::from_volumes(&["/mnt/disk{1...32}"]).unwrap();
        let pool = &pools.0[0];
        assert_eq!(pool.set_count, 2);
        assert_eq!(pool.drives_per_set, 16);
        assert_eq!(pool.endpoints[16].set_idx, 1);
        assert_eq!(pool.endpoints[16].disk_idx, 0);
    }
}
