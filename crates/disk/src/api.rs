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

use crate::error::Result;
use crate::local::LocalDisk;
use std::sync::Arc;
use tokio::io::AsyncWrite;

/// Handle to one drive. Listing only ever fans out to whole drives, a
/// shared handle per endpoint is all the storage layer needs.
pub type DiskStore = Arc<LocalDisk>;

#[derive(Debug, Default, Clone)]
pub struct WalkDirOptions {
    /// Bucket to scan.
    pub bucket: String,
    /// Directory inside the bucket.
    pub base_dir: String,
    /// Do a full recursive scan.
    pub recursive: bool,
    /// Return FileNotFound if the base dir cannot be found on the drive.
    pub report_notfound: bool,
    /// Only return results with the given prefix within the folder.
    /// Should never contain a slash.
    pub filter_prefix: Option<String>,
    /// Forward to the given object path before emitting anything.
    pub forward_to: Option<String>,
    /// Limit the number of returned objects if > 0.
    pub limit: i32,
}

/// The drive surface the listing engine depends on. Everything else a
/// drive can do (erasure reads, healing, bitrot) lives behind other
/// subsystems and is out of scope here.
pub trait DiskAPI {
    fn to_string(&self) -> String;

    fn is_online(&self) -> bool;

    /// Streams the ordered content of a directory tree as a metacache
    /// stream into `wr`.
    fn walk_dir<W: AsyncWrite + Unpin + Send>(
        &self,
        opts: WalkDirOptions,
        wr: &mut W,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Lists one directory level; directories carry a trailing slash.
    fn list_dir(&self, volume: &str, dir_path: &str) -> impl std::future::Future<Output = Result<Vec<String>>> + Send;

    /// Reads the raw manifest bytes for an object path.
    fn read_metadata(&self, volume: &str, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;

    fn delete(&self, volume: &str, path: &str, recursive: bool) -> impl std::future::Future<Output = Result<()>> + Send;
}
