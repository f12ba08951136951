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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// The decoded view of one object version as the listing and lifecycle
/// layers consume it.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileInfo {
    pub volume: String,
    pub name: String,
    pub version_id: Option<Uuid>,
    pub is_latest: bool,
    /// Set when the latest version is a delete marker.
    pub deleted: bool,
    pub mod_time: Option<OffsetDateTime>,
    pub size: i64,
    pub num_versions: usize,
    pub successor_mod_time: Option<OffsetDateTime>,
    /// User defined metadata, `x-amz-*` keys included.
    pub metadata: HashMap<String, String>,
}

impl FileInfo {
    /// A version is dangling when it carries neither payload nor a
    /// delete marker, usually the left-over of an interrupted write.
    pub fn is_dangling(&self) -> bool {
        !self.deleted && self.mod_time.is_none()
    }
}

#[derive(Clone, Debug, Default)]
pub struct FileInfoVersions {
    pub volume: String,
    pub name: String,
    pub latest_mod_time: Option<OffsetDateTime>,
    pub versions: Vec<FileInfo>,
}

impl FileInfoVersions {
    pub fn find_version_index(&self, version_id: &str) -> Option<usize> {
        let vid = Uuid::parse_str(version_id).ok()?;
        self.versions.iter().position(|v| v.version_id == Some(vid))
    }
}
