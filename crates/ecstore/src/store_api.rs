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

use ferrite_filemeta::{FileInfo, MetaCacheEntriesSorted};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

pub const AMZ_RESTORE_HEADER: &str = "x-amz-restore";

/// The listing/lifecycle facing view of one object version.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub name: String,
    pub is_dir: bool,
    pub mod_time: Option<OffsetDateTime>,
    pub size: i64,
    pub version_id: Option<Uuid>,
    pub is_latest: bool,
    pub delete_marker: bool,
    pub num_versions: usize,
    pub successor_mod_time: Option<OffsetDateTime>,
    pub user_defined: HashMap<String, String>,
}

impl ObjectInfo {
    pub fn from_file_info(fi: &FileInfo, bucket: &str, object: &str, versioned: bool) -> Self {
        let name = ferrite_utils::path::decode_dir_object(object);

        ObjectInfo {
            bucket: bucket.to_string(),
            name,
            is_dir: object.ends_with('/') && fi.mod_time.is_none(),
            mod_time: fi.mod_time,
            size: fi.size,
            version_id: if versioned { fi.version_id } else { None },
            is_latest: fi.is_latest,
            delete_marker: fi.deleted,
            num_versions: fi.num_versions,
            successor_mod_time: fi.successor_mod_time,
            user_defined: fi.metadata.clone(),
        }
    }

    /// True while a restored copy of a transitioned object is present.
    /// The restore header carries the expiry date of the copy.
    pub fn restore_expires(&self) -> Option<OffsetDateTime> {
        let val = self.user_defined.get(AMZ_RESTORE_HEADER)?;
        let (_, expiry) = val.split_once("expiry-date=")?;
        OffsetDateTime::parse(expiry.trim_matches('"'), &time::format_description::well_known::Rfc3339).ok()
    }

    /// Converts a sorted entry page into object infos, folding entries
    /// below a common delimiter into synthesised prefix entries.
    pub fn from_entries_sorted(
        entries: &MetaCacheEntriesSorted,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        versioned: bool,
    ) -> Vec<ObjectInfo> {
        let mut objects = Vec::with_capacity(entries.len());
        let mut prev_prefix = String::new();

        for entry in entries.entries() {
            if entry.is_object() {
                if let Some(delimiter) = delimiter {
                    if let Some(idx) = entry.name.trim_start_matches(prefix).find(delimiter) {
                        let idx = prefix.len() + idx + delimiter.len();
                        if let Some(curr_prefix) = entry.name.get(0..idx) {
                            if curr_prefix == prev_prefix {
                                continue;
                            }
                            prev_prefix = curr_prefix.to_string();
                            objects.push(ObjectInfo {
                                is_dir: true,
                                bucket: bucket.to_owned(),
                                name: curr_prefix.to_owned(),
                                ..Default::default()
                            });
                        }
                        continue;
                    }
                }

                if let Ok(fi) = entry.to_fileinfo(bucket) {
                    objects.push(ObjectInfo::from_file_info(&fi, bucket, &entry.name, versioned));
                }
                continue;
            }

            if entry.is_dir() {
                if let Some(delimiter) = delimiter {
                    if let Some(idx) = entry.name.trim_start_matches(prefix).find(delimiter) {
                        let idx = prefix.len() + idx + delimiter.len();
                        if let Some(curr_prefix) = entry.name.get(0..idx) {
                            if curr_prefix == prev_prefix {
                                continue;
                            }
                            prev_prefix = curr_prefix.to_string();
                            objects.push(ObjectInfo {
                                is_dir: true,
                                bucket: bucket.to_owned(),
                                name: curr_prefix.to_owned(),
                                ..Default::default()
                            });
                        }
                    }
                }
            }
        }

        objects
    }
}

#[derive(Debug, Default)]
pub struct ListObjectsInfo {
    pub is_truncated: bool,
    pub next_marker: Option<String>,
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ListObjectsV2Info {
    pub is_truncated: bool,
    pub continuation_token: Option<String>,
    pub next_continuation_token: Option<String>,
    pub objects: Vec<ObjectInfo>,
    pub prefixes: Vec<String>,
}
