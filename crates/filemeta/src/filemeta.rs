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

use crate::{Error, FileInfo, FileInfoVersions, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;
use xxhash_rust::xxh64;

/// Magic prefix of a serialized manifest.
pub static META_FILE_HEADER: [u8; 4] = [b'F', b'M', b'2', b' '];

pub static META_VERSION: u8 = 2;

static SIGNATURE_SEED: u64 = 0;

const FLAG_FREE_VERSION: u8 = 1 << 0;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Default, Clone, PartialOrd, Ord, Hash)]
pub enum VersionType {
    #[default]
    Invalid = 0,
    Object = 1,
    Delete = 2,
}

impl VersionType {
    pub fn valid(&self) -> bool {
        matches!(*self, VersionType::Object | VersionType::Delete)
    }
}

/// A full version entry: either an object or a delete marker.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FileMetaVersion {
    #[serde(rename = "Type")]
    pub version_type: VersionType,
    #[serde(rename = "Obj")]
    pub object: Option<MetaObject>,
    #[serde(rename = "DelObj")]
    pub delete_marker: Option<MetaDeleteMarker>,
    #[serde(rename = "v")]
    pub write_version: u64,
}

impl FileMetaVersion {
    pub fn valid(&self) -> bool {
        if !self.version_type.valid() {
            return false;
        }
        match self.version_type {
            VersionType::Object => self.object.as_ref().map(|v| v.mod_time.is_some()).unwrap_or_default(),
            VersionType::Delete => self
                .delete_marker
                .as_ref()
                .map(|v| v.mod_time.unwrap_or(OffsetDateTime::UNIX_EPOCH) > OffsetDateTime::UNIX_EPOCH)
                .unwrap_or_default(),
            _ => false,
        }
    }

    pub fn get_version_id(&self) -> Option<Uuid> {
        match self.version_type {
            VersionType::Object => self.object.as_ref().and_then(|v| v.version_id),
            VersionType::Delete => self.delete_marker.as_ref().and_then(|v| v.version_id),
            _ => None,
        }
    }

    pub fn get_mod_time(&self) -> Option<OffsetDateTime> {
        match self.version_type {
            VersionType::Object => self.object.as_ref().and_then(|v| v.mod_time),
            VersionType::Delete => self.delete_marker.as_ref().and_then(|v| v.mod_time),
            _ => None,
        }
    }

    pub fn marshal_msg(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn unmarshal_msg(&mut self, buf: &[u8]) -> Result<u64> {
        *self = rmp_serde::from_slice(buf)?;
        Ok(buf.len() as u64)
    }

    fn signature(&self) -> [u8; 4] {
        let mut hasher = xxh64::Xxh64::new(SIGNATURE_SEED);
        hasher.update(self.get_version_id().unwrap_or_default().as_bytes());
        if let Some(mod_time) = self.get_mod_time() {
            hasher.update(&mod_time.unix_timestamp_nanos().to_le_bytes());
        }
        let bytes = hasher.digest().to_le_bytes();
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }

    pub fn header(&self) -> FileMetaVersionHeader {
        let (ec_n, ec_m) = self.object.as_ref().map(|o| (o.ec_n, o.ec_m)).unwrap_or_default();
        FileMetaVersionHeader {
            version_id: self.get_version_id(),
            mod_time: self.get_mod_time(),
            signature: self.signature(),
            version_type: self.version_type.clone(),
            flags: 0,
            ec_n,
            ec_m,
        }
    }

    pub fn into_fileinfo(&self, volume: &str, path: &str) -> FileInfo {
        match self.version_type {
            VersionType::Object => self.object.as_ref().cloned().unwrap_or_default().into_fileinfo(volume, path),
            VersionType::Delete => self.delete_marker.as_ref().cloned().unwrap_or_default().into_fileinfo(volume, path),
            _ => FileInfo {
                volume: volume.to_string(),
                name: path.to_string(),
                ..Default::default()
            },
        }
    }
}

impl TryFrom<&[u8]> for FileMetaVersion {
    type Error = Error;

    fn try_from(value: &[u8]) -> std::result::Result<Self, Self::Error> {
        let mut ver = FileMetaVersion::default();
        ver.unmarshal_msg(value)?;
        Ok(ver)
    }
}

impl From<FileInfo> for FileMetaVersion {
    fn from(value: FileInfo) -> Self {
        if value.deleted {
            FileMetaVersion {
                version_type: VersionType::Delete,
                delete_marker: Some(MetaDeleteMarker {
                    version_id: value.version_id,
                    mod_time: value.mod_time,
                }),
                object: None,
                write_version: 0,
            }
        } else {
            FileMetaVersion {
                version_type: VersionType::Object,
                object: Some(MetaObject {
                    version_id: value.version_id,
                    mod_time: value.mod_time,
                    size: value.size,
                    meta_user: value.metadata,
                    ec_n: 0,
                    ec_m: 0,
                }),
                delete_marker: None,
                write_version: 0,
            }
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetaObject {
    #[serde(rename = "ID")]
    pub version_id: Option<Uuid>,
    #[serde(rename = "MTime")]
    pub mod_time: Option<OffsetDateTime>,
    #[serde(rename = "Size")]
    pub size: i64,
    #[serde(rename = "MetaUsr")]
    pub meta_user: HashMap<String, String>,
    #[serde(rename = "EcN")]
    pub ec_n: u8,
    #[serde(rename = "EcM")]
    pub ec_m: u8,
}

impl MetaObject {
    pub fn into_fileinfo(&self, volume: &str, path: &str) -> FileInfo {
        FileInfo {
            volume: volume.to_string(),
            name: path.to_string(),
            version_id: self.version_id,
            mod_time: self.mod_time,
            size: self.size,
            metadata: self.meta_user.clone(),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetaDeleteMarker {
    #[serde(rename = "ID")]
    pub version_id: Option<Uuid>,
    #[serde(rename = "MTime")]
    pub mod_time: Option<OffsetDateTime>,
}

impl MetaDeleteMarker {
    pub fn into_fileinfo(&self, volume: &str, path: &str) -> FileInfo {
        FileInfo {
            volume: volume.to_string(),
            name: path.to_string(),
            version_id: self.version_id,
            mod_time: self.mod_time,
            deleted: true,
            ..Default::default()
        }
    }
}

/// Compact header kept per version so that most listing decisions do
/// not need to decode the full version payload.
#[derive(Serialize, Deserialize, Debug, PartialEq, Default, Clone, Eq, Hash, PartialOrd, Ord)]
pub struct FileMetaVersionHeader {
    pub version_id: Option<Uuid>,
    pub mod_time: Option<OffsetDateTime>,
    pub signature: [u8; 4],
    pub version_type: VersionType,
    pub flags: u8,
    pub ec_n: u8,
    pub ec_m: u8,
}

impl FileMetaVersionHeader {
    pub fn has_ec(&self) -> bool {
        self.ec_m > 0 && self.ec_n > 0
    }

    pub fn matches_ec(&self, o: &FileMetaVersionHeader) -> bool {
        if self.has_ec() && o.has_ec() {
            return self.ec_n == o.ec_n && self.ec_m == o.ec_m;
        }
        true
    }

    pub fn matches_not_strict(&self, o: &FileMetaVersionHeader) -> bool {
        let mut ok = self.version_id == o.version_id && self.version_type == o.version_type && self.matches_ec(o);
        if self.version_id.is_none() {
            ok = ok && self.mod_time == o.mod_time;
        }
        ok
    }

    pub fn free_version(&self) -> bool {
        self.flags & FLAG_FREE_VERSION != 0
    }

    /// Sort order of versions inside a manifest: newest modtime first,
    /// remaining fields only keep the order deterministic.
    pub fn sorts_before(&self, o: &FileMetaVersionHeader) -> bool {
        if self == o {
            return false;
        }
        if self.mod_time != o.mod_time {
            return self.mod_time > o.mod_time;
        }
        if self.version_type != o.version_type {
            return self.version_type < o.version_type;
        }
        match self.version_id.cmp(&o.version_id) {
            Ordering::Greater => return true,
            Ordering::Less => return false,
            _ => {}
        }
        self.flags > o.flags
    }
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone)]
pub struct FileMetaShallowVersion {
    pub header: FileMetaVersionHeader,
    /// `FileMetaVersion::marshal_msg` payload.
    pub meta: Vec<u8>,
}

impl FileMetaShallowVersion {
    pub fn into_fileinfo(&self, volume: &str, path: &str) -> Result<FileInfo> {
        let version = FileMetaVersion::try_from(self.meta.as_slice())?;
        Ok(version.into_fileinfo(volume, path))
    }
}

impl TryFrom<FileMetaVersion> for FileMetaShallowVersion {
    type Error = Error;

    fn try_from(value: FileMetaVersion) -> std::result::Result<Self, Self::Error> {
        let header = value.header();
        let meta = value.marshal_msg()?;
        Ok(Self { meta, header })
    }
}

/// The per-object manifest ("xlmeta"). Versions are kept newest first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub versions: Vec<FileMetaShallowVersion>,
    pub meta_ver: u8,
}

impl FileMeta {
    pub fn new() -> Self {
        Self {
            meta_ver: META_VERSION,
            ..Default::default()
        }
    }

    pub fn is_meta_format(buf: &[u8]) -> bool {
        buf.len() > META_FILE_HEADER.len() && buf[..META_FILE_HEADER.len()] == META_FILE_HEADER
    }

    pub fn load(buf: &[u8]) -> Result<FileMeta> {
        let mut meta = FileMeta::new();
        meta.unmarshal_msg(buf)?;
        Ok(meta)
    }

    pub fn marshal_msg(&self) -> Result<Vec<u8>> {
        let mut buf = META_FILE_HEADER.to_vec();
        buf.extend(rmp_serde::to_vec(self)?);
        Ok(buf)
    }

    pub fn unmarshal_msg(&mut self, buf: &[u8]) -> Result<u64> {
        if !Self::is_meta_format(buf) {
            return Err(Error::FileCorrupt);
        }
        *self = rmp_serde::from_slice(&buf[META_FILE_HEADER.len()..])?;
        Ok(buf.len() as u64)
    }

    pub fn latest_mod_time(&self) -> Option<OffsetDateTime> {
        self.versions.first().and_then(|v| v.header.mod_time)
    }

    pub fn is_latest_delete_marker(&self) -> bool {
        match self.versions.first() {
            Some(v) => v.header.version_type == VersionType::Delete,
            None => true,
        }
    }

    pub fn add_version(&mut self, fi: FileInfo) -> Result<()> {
        let version = FileMetaVersion::from(fi);
        if !version.valid() {
            return Err(Error::other("attempted to add invalid version"));
        }
        self.versions.push(FileMetaShallowVersion::try_from(version)?);
        self.sort_by_mod_time();
        Ok(())
    }

    pub fn sort_by_mod_time(&mut self) {
        if self
            .versions
            .windows(2)
            .all(|w| w[0].header.sorts_before(&w[1].header) || w[0].header == w[1].header)
        {
            return;
        }
        self.versions
            .sort_by(|a, b| if a.header.sorts_before(&b.header) { Ordering::Less } else { Ordering::Greater });
    }

    /// Decodes the latest (or the requested) version into a `FileInfo`.
    pub fn into_fileinfo(&self, volume: &str, path: &str, version_id: &str) -> Result<FileInfo> {
        let vid = if version_id.is_empty() {
            None
        } else {
            Some(Uuid::parse_str(version_id)?)
        };

        let idx = match vid {
            Some(id) => self
                .versions
                .iter()
                .position(|v| v.header.version_id == Some(id))
                .ok_or(Error::FileVersionNotFound)?,
            None => 0,
        };

        let shallow = self.versions.get(idx).ok_or(Error::FileNotFound)?;
        let mut fi = shallow.into_fileinfo(volume, path)?;
        fi.is_latest = idx == 0;
        fi.num_versions = self.versions.len();
        if idx > 0 {
            fi.successor_mod_time = self.versions[idx - 1].header.mod_time;
        }
        Ok(fi)
    }

    pub fn into_file_info_versions(&self, volume: &str, path: &str) -> Result<FileInfoVersions> {
        let mut versions = Vec::with_capacity(self.versions.len());
        let mut successor = None;
        for (idx, shallow) in self.versions.iter().enumerate() {
            let mut fi = shallow.into_fileinfo(volume, path)?;
            fi.is_latest = idx == 0;
            fi.num_versions = self.versions.len();
            fi.successor_mod_time = successor;
            successor = shallow.header.mod_time;
            versions.push(fi);
        }

        Ok(FileInfoVersions {
            volume: volume.to_string(),
            name: path.to_string(),
            latest_mod_time: self.latest_mod_time(),
            versions,
        })
    }
}

/// Merges the per-disk version lists of one object into the list agreed
/// on by at least `quorum` disks. Inputs and output are newest first.
/// With `strict` set, headers must match bit for bit; otherwise entries
/// that only disagree on the signature are counted together.
pub fn merge_file_meta_versions(
    mut quorum: usize,
    mut strict: bool,
    requested_versions: usize,
    versions: &[Vec<FileMetaShallowVersion>],
) -> Vec<FileMetaShallowVersion> {
    if quorum == 0 {
        quorum = 1;
    }

    if versions.len() < quorum || versions.is_empty() {
        return Vec::new();
    }

    if versions.len() == 1 {
        return versions[0].clone();
    }

    if quorum == 1 {
        strict = true;
    }

    let agrees = |a: &FileMetaVersionHeader, b: &FileMetaVersionHeader| -> bool {
        if strict {
            a == b
        } else {
            a.matches_not_strict(b)
        }
    };

    let mut streams: Vec<Vec<FileMetaShallowVersion>> = versions.to_owned();
    let mut merged: Vec<FileMetaShallowVersion> = Vec::new();
    let mut n_versions = 0;

    loop {
        let tops: Vec<&FileMetaShallowVersion> = streams.iter().filter_map(|v| v.first()).collect();
        if tops.len() < quorum {
            break;
        }

        // The head that sorts before every other head is the candidate
        // for this round.
        let mut latest = tops[0].clone();
        for top in tops.iter().skip(1) {
            if top.header.sorts_before(&latest.header) {
                latest = (*top).clone();
            }
        }

        let agree = tops.iter().filter(|t| agrees(&t.header, &latest.header)).count();
        if agree >= quorum {
            if !latest.header.free_version() {
                n_versions += 1;
            }
            merged.push(latest.clone());
        }

        // Pop every matching head so the loop always advances.
        let mut popped = false;
        for stream in streams.iter_mut() {
            if stream.first().is_some_and(|head| agrees(&head.header, &latest.header)) {
                stream.remove(0);
                popped = true;
            }
        }
        if !popped {
            break;
        }

        if requested_versions > 0 && requested_versions == n_versions {
            break;
        }
    }

    merged
}
