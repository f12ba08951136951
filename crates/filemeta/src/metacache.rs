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

use crate::{Error, FileInfo, FileInfoVersions, FileMeta, FileMetaShallowVersion, Result, merge_file_meta_versions};
use ferrite_utils::path::SLASH_SEPARATOR;
use rmp::Marker;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::from_utf8;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

#[derive(Clone, Debug, Default)]
pub struct MetadataResolutionParams {
    pub dir_quorum: usize,
    pub obj_quorum: usize,
    pub requested_versions: usize,
    pub bucket: String,
    pub strict: bool,
    pub candidates: Vec<Vec<FileMetaShallowVersion>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MetaCacheEntry {
    /// name is the full name of the object including prefixes
    pub name: String,
    /// Metadata. If none is present it is not an object but only a prefix.
    /// Entries without metadata will only be present in non-recursive scans.
    pub metadata: Vec<u8>,

    /// cached contains the metadata if decoded.
    #[serde(skip)]
    pub cached: Option<FileMeta>,

    /// Indicates the entry can be reused and only one reference to metadata is expected.
    pub reusable: bool,
}

impl MetaCacheEntry {
    pub fn is_dir(&self) -> bool {
        self.metadata.is_empty() && self.name.ends_with('/')
    }

    pub fn is_object(&self) -> bool {
        !self.metadata.is_empty()
    }

    pub fn is_object_dir(&self) -> bool {
        !self.metadata.is_empty() && self.name.ends_with(SLASH_SEPARATOR)
    }

    /// True when `name` sits directly inside `dir`, or is `dir`'s own
    /// directory entry.
    pub fn is_in_dir(&self, dir: &str, separator: &str) -> bool {
        if dir.is_empty() {
            let idx = self.name.find(separator);
            return idx.is_none() || idx.unwrap() == self.name.len() - separator.len();
        }

        let ext = self.name.trim_start_matches(dir);
        if ext.len() != self.name.len() {
            let idx = ext.find(separator);
            return idx.is_none() || idx.unwrap() == ext.len() - separator.len();
        }

        false
    }

    pub fn is_latest_delete_marker(&mut self) -> bool {
        if let Some(cached) = &self.cached {
            return cached.is_latest_delete_marker();
        }

        if !FileMeta::is_meta_format(&self.metadata) {
            return false;
        }

        match self.xl_meta() {
            Ok(meta) => meta.is_latest_delete_marker(),
            Err(_) => true,
        }
    }

    pub fn to_fileinfo(&self, bucket: &str) -> Result<FileInfo> {
        if self.is_dir() {
            return Ok(FileInfo {
                volume: bucket.to_owned(),
                name: self.name.clone(),
                ..Default::default()
            });
        }

        if let Some(fm) = &self.cached {
            if fm.versions.is_empty() {
                return Ok(FileInfo {
                    volume: bucket.to_owned(),
                    name: self.name.clone(),
                    deleted: true,
                    is_latest: true,
                    mod_time: Some(OffsetDateTime::UNIX_EPOCH),
                    ..Default::default()
                });
            }

            return fm.into_fileinfo(bucket, self.name.as_str(), "");
        }

        FileMeta::load(&self.metadata)?.into_fileinfo(bucket, self.name.as_str(), "")
    }

    pub fn file_info_versions(&self, bucket: &str) -> Result<FileInfoVersions> {
        if self.is_dir() {
            return Ok(FileInfoVersions {
                volume: bucket.to_string(),
                name: self.name.clone(),
                versions: vec![FileInfo {
                    volume: bucket.to_string(),
                    name: self.name.clone(),
                    ..Default::default()
                }],
                ..Default::default()
            });
        }

        FileMeta::load(&self.metadata)?.into_file_info_versions(bucket, self.name.as_str())
    }

    /// Compares this entry against `other`, returning the preferred one
    /// and whether the two agree. Directories agree with directories;
    /// objects agree when every version header matches (bit for bit
    /// when `strict`).
    pub fn matches(&self, other: Option<&MetaCacheEntry>, strict: bool) -> (Option<MetaCacheEntry>, bool) {
        let Some(other) = other else {
            return (None, false);
        };

        if self.name != other.name {
            if self.name < other.name {
                return (Some(self.clone()), false);
            }
            return (Some(other.clone()), false);
        }

        if other.is_dir() || self.is_dir() {
            if self.is_dir() {
                return (Some(self.clone()), other.is_dir() == self.is_dir());
            }
            return (Some(other.clone()), other.is_dir() == self.is_dir());
        }

        let self_vers = match &self.cached {
            Some(meta) => meta.clone(),
            None => match FileMeta::load(&self.metadata) {
                Ok(meta) => meta,
                Err(_) => return (None, false),
            },
        };
        let other_vers = match &other.cached {
            Some(meta) => meta.clone(),
            None => match FileMeta::load(&other.metadata) {
                Ok(meta) => meta,
                Err(_) => return (None, false),
            },
        };

        if self_vers.versions.len() != other_vers.versions.len() {
            match self_vers.latest_mod_time().cmp(&other_vers.latest_mod_time()) {
                Ordering::Greater => return (Some(self.clone()), false),
                Ordering::Less => return (Some(other.clone()), false),
                _ => {}
            }

            if self_vers.versions.len() > other_vers.versions.len() {
                return (Some(self.clone()), false);
            }
            return (Some(other.clone()), false);
        }

        let mut prefer = None;
        for (s_version, o_version) in self_vers.versions.iter().zip(other_vers.versions.iter()) {
            if s_version.header != o_version.header {
                if s_version.header.has_ec() != o_version.header.has_ec() {
                    // One side carries erasure parameters the other
                    // does not, compare without them.
                    let (mut a, mut b) = (s_version.header.clone(), o_version.header.clone());
                    (a.ec_n, a.ec_m, b.ec_n, b.ec_m) = (0, 0, 0, 0);
                    if a == b {
                        continue;
                    }
                }

                if !strict && s_version.header.matches_not_strict(&o_version.header) {
                    if prefer.is_none() {
                        if s_version.header.sorts_before(&o_version.header) {
                            prefer = Some(self.clone());
                        } else {
                            prefer = Some(other.clone());
                        }
                    }
                    continue;
                }

                if prefer.is_some() {
                    return (prefer, false);
                }

                if s_version.header.sorts_before(&o_version.header) {
                    return (Some(self.clone()), false);
                }

                return (Some(other.clone()), false);
            }
        }

        if prefer.is_none() {
            prefer = Some(self.clone());
        }

        (prefer, true)
    }

    pub fn xl_meta(&mut self) -> Result<FileMeta> {
        if self.is_dir() {
            return Err(Error::FileNotFound);
        }

        if let Some(meta) = &self.cached {
            Ok(meta.clone())
        } else {
            if self.metadata.is_empty() {
                return Err(Error::FileNotFound);
            }

            let meta = FileMeta::load(&self.metadata)?;
            self.cached = Some(meta.clone());
            Ok(meta)
        }
    }
}

/// One slot per contacted disk; `None` marks a disk that had no entry
/// (or an error) for the key under resolution.
#[derive(Debug, Default)]
pub struct MetaCacheEntries(pub Vec<Option<MetaCacheEntry>>);

impl MetaCacheEntries {
    #[allow(clippy::should_implement_trait)]
    pub fn as_ref(&self) -> &[Option<MetaCacheEntry>] {
        &self.0
    }

    /// Picks the authoritative entry for a key the disks disagreed on:
    /// a directory once `dir_quorum` disks saw one, an object once
    /// `obj_quorum` disks produced a decodable manifest. Version lists
    /// from all candidates are quorum-merged into the result.
    pub fn resolve(&self, mut params: MetadataResolutionParams) -> Option<MetaCacheEntry> {
        if self.0.is_empty() {
            return None;
        }

        let mut dir_exists = 0;
        let mut selected: Option<MetaCacheEntry> = None;

        params.candidates.clear();
        let mut objs_agree = 0;
        let mut objs_valid = 0;

        for entry in self.0.iter().flatten() {
            let mut entry = entry.clone();

            if entry.name.is_empty() {
                continue;
            }
            if entry.is_dir() {
                dir_exists += 1;
                selected = Some(entry.clone());
                continue;
            }

            let xl = match entry.xl_meta() {
                Ok(xl) => xl,
                Err(err) => {
                    warn!("resolve: failed to decode {}: {:?}", entry.name, err);
                    continue;
                }
            };

            objs_valid += 1;
            params.candidates.push(xl.versions.clone());

            if selected.is_none() {
                selected = Some(entry.clone());
                objs_agree = 1;
                continue;
            }

            if let (prefer, true) = entry.matches(selected.as_ref(), params.strict) {
                selected = prefer;
                objs_agree += 1;
            }
        }

        let selected = selected?;

        if selected.is_dir() && dir_exists >= params.dir_quorum {
            return Some(selected);
        }

        // Would never be able to reach quorum for an object.
        if objs_valid < params.obj_quorum {
            return None;
        }

        if objs_agree == objs_valid {
            return Some(selected);
        }

        let cached = selected.cached?;

        let versions = merge_file_meta_versions(params.obj_quorum, params.strict, params.requested_versions, &params.candidates);
        if versions.is_empty() {
            return None;
        }

        // Disagreement: build a merged manifest as the result.
        let merged = FileMeta {
            meta_ver: cached.meta_ver,
            versions,
        };
        let metadata = match merged.marshal_msg() {
            Ok(buf) => buf,
            Err(err) => {
                warn!("resolve: marshal of merged manifest failed: {:?}", err);
                return None;
            }
        };

        Some(MetaCacheEntry {
            name: selected.name.clone(),
            cached: Some(merged),
            reusable: true,
            metadata,
        })
    }

    pub fn first_found(&self) -> (Option<MetaCacheEntry>, usize) {
        (self.0.iter().find(|x| x.is_some()).cloned().unwrap_or_default(), self.0.len())
    }
}

#[derive(Debug, Default)]
pub struct MetaCacheEntriesSortedResult {
    pub entries: Option<MetaCacheEntriesSorted>,
    pub err: Option<Error>,
}

#[derive(Debug, Default)]
pub struct MetaCacheEntriesSorted {
    pub o: MetaCacheEntries,
    pub list_id: Option<String>,
    pub reuse: bool,
    pub last_skipped_entry: Option<String>,
}

impl MetaCacheEntriesSorted {
    pub fn entries(&self) -> Vec<&MetaCacheEntry> {
        self.o.0.iter().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.o.0.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all entries up to and including `marker`.
    pub fn forward_past(&mut self, marker: Option<String>) {
        if let Some(val) = marker {
            if let Some(idx) = self.o.0.iter().flatten().position(|v| v.name > val) {
                self.o.0 = self.o.0.split_off(idx);
            } else {
                self.o.0.clear();
            }
        }
    }
}

const METACACHE_STREAM_VERSION: u8 = 1;

/// Writes the stream format a disk walk produces: a version byte, then
/// for each entry a `true` marker, the name and the raw metadata, and a
/// single `false` as the trailer.
#[derive(Debug)]
pub struct MetacacheWriter<W> {
    wr: W,
    created: bool,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> MetacacheWriter<W> {
    pub fn new(wr: W) -> Self {
        Self {
            wr,
            created: false,
            buf: Vec::new(),
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.wr.write_all(&self.buf).await?;
        self.buf.clear();
        Ok(())
    }

    async fn init(&mut self) -> Result<()> {
        if !self.created {
            rmp::encode::write_u8(&mut self.buf, METACACHE_STREAM_VERSION).map_err(|e| Error::other(format!("{e:?}")))?;
            self.flush().await?;
            self.created = true;
        }
        Ok(())
    }

    pub async fn write(&mut self, objs: &[MetaCacheEntry]) -> Result<()> {
        for obj in objs.iter() {
            if obj.name.is_empty() {
                return Err(Error::other("metacache writer: entry without a name"));
            }
            self.write_obj(obj).await?;
        }
        Ok(())
    }

    pub async fn write_obj(&mut self, obj: &MetaCacheEntry) -> Result<()> {
        self.init().await?;

        rmp::encode::write_bool(&mut self.buf, true).map_err(|e| Error::other(format!("{e:?}")))?;
        rmp::encode::write_str(&mut self.buf, &obj.name).map_err(|e| Error::other(format!("{e:?}")))?;
        rmp::encode::write_bin(&mut self.buf, &obj.metadata).map_err(|e| Error::other(format!("{e:?}")))?;
        self.flush().await?;

        Ok(())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.init().await?;
        rmp::encode::write_bool(&mut self.buf, false).map_err(|e| Error::other(format!("{e:?}")))?;
        self.flush().await?;
        Ok(())
    }
}

/// The reading side of the walk stream. `peek` decodes one entry at a
/// time; the codec trailer maps to `Ok(None)`.
pub struct MetacacheReader<R> {
    rd: R,
    init: bool,
    err: Option<Error>,
    buf: Vec<u8>,
    offset: usize,
    current: Option<MetaCacheEntry>,
}

impl<R: AsyncRead + Unpin> MetacacheReader<R> {
    pub fn new(rd: R) -> Self {
        Self {
            rd,
            init: false,
            err: None,
            buf: Vec::new(),
            offset: 0,
            current: None,
        }
    }

    async fn read_more(&mut self, read_size: usize) -> Result<&[u8]> {
        let ext_size = read_size + self.offset;
        if self.buf.len() < ext_size {
            self.buf.resize(ext_size, 0);
        }

        let pref = self.offset;
        self.rd.read_exact(&mut self.buf[pref..ext_size]).await?;
        self.offset += read_size;

        Ok(&self.buf[pref..ext_size])
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.offset = 0;
    }

    async fn check_init(&mut self) -> Result<()> {
        if !self.init {
            match rmp::decode::read_u8(&mut self.read_more(2).await?) {
                Ok(METACACHE_STREAM_VERSION) => {}
                Ok(_) => {
                    self.err = Some(Error::other("invalid metacache stream version"));
                }
                Err(err) => {
                    self.err = Some(Error::other(format!("{err:?}")));
                }
            }
            self.init = true;
        }
        Ok(())
    }

    async fn read_str_len(&mut self) -> Result<u32> {
        let mark = match rmp::decode::read_marker(&mut self.read_more(1).await?) {
            Ok(res) => res,
            Err(err) => {
                let err: Error = err.into();
                self.err = Some(err.clone());
                return Err(err);
            }
        };

        match mark {
            Marker::FixStr(size) => Ok(u32::from(size)),
            Marker::Str8 => Ok(u32::from(self.read_u8().await?)),
            Marker::Str16 => Ok(u32::from(self.read_u16().await?)),
            Marker::Str32 => Ok(self.read_u32().await?),
            _ => Err(Error::other("str marker err")),
        }
    }

    async fn read_bin_len(&mut self) -> Result<u32> {
        let mark = match rmp::decode::read_marker(&mut self.read_more(1).await?) {
            Ok(res) => res,
            Err(err) => {
                let err: Error = err.into();
                self.err = Some(err.clone());
                return Err(err);
            }
        };

        match mark {
            Marker::Bin8 => Ok(u32::from(self.read_u8().await?)),
            Marker::Bin16 => Ok(u32::from(self.read_u16().await?)),
            Marker::Bin32 => Ok(self.read_u32().await?),
            _ => Err(Error::other("bin marker err")),
        }
    }

    async fn read_u8(&mut self) -> Result<u8> {
        let buf = self.read_more(1).await?;
        Ok(buf[0])
    }

    async fn read_u16(&mut self) -> Result<u16> {
        let buf = self.read_more(2).await?;
        Ok(u16::from_be_bytes([buf[0], buf[1]]))
    }

    async fn read_u32(&mut self) -> Result<u32> {
        let buf = self.read_more(4).await?;
        Ok(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
    }

    /// Skips up to `size` entries without decoding their payloads.
    pub async fn skip(&mut self, size: usize) -> Result<()> {
        self.check_init().await?;

        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        let mut n = size;

        if self.current.is_some() {
            n -= 1;
            self.current = None;
        }

        while n > 0 {
            match rmp::decode::read_bool(&mut self.read_more(1).await?) {
                Ok(more) => {
                    if !more {
                        return Ok(());
                    }
                }
                Err(err) => {
                    let err: Error = err.into();
                    self.err = Some(err.clone());
                    return Err(err);
                }
            }

            let l = self.read_str_len().await?;
            let _ = self.read_more(l as usize).await?;
            let l = self.read_bin_len().await?;
            let _ = self.read_more(l as usize).await?;

            n -= 1;
        }

        Ok(())
    }

    pub async fn peek(&mut self) -> Result<Option<MetaCacheEntry>> {
        // An entry peeked but not yet skipped is served again, a
        // consumer may look at the same head any number of times.
        if let Some(current) = &self.current {
            return Ok(Some(current.clone()));
        }

        self.check_init().await?;

        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        match rmp::decode::read_bool(&mut self.read_more(1).await?) {
            Ok(more) => {
                if !more {
                    return Ok(None);
                }
            }
            Err(err) => {
                let err: Error = err.into();
                self.err = Some(err.clone());
                return Err(err);
            }
        }

        let l = self.read_str_len().await?;
        let name_buf = self.read_more(l as usize).await?.to_vec();
        let name = match from_utf8(&name_buf) {
            Ok(decoded) => decoded.to_owned(),
            Err(err) => {
                let err = Error::other(err.to_string());
                self.err = Some(err.clone());
                return Err(err);
            }
        };

        let l = self.read_bin_len().await?;
        let metadata = self.read_more(l as usize).await?.to_vec();

        self.reset();

        let entry = Some(MetaCacheEntry {
            name,
            metadata,
            cached: None,
            reusable: false,
        });
        self.current = entry.clone();

        Ok(entry)
    }

    pub async fn read_all(&mut self) -> Result<Vec<MetaCacheEntry>> {
        let mut ret = Vec::new();
        while let Some(entry) = self.peek().await? {
            self.current = None;
            ret.push(entry);
        }
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FileMetaVersion, MetaObject, VersionType};
    use std::io::Cursor;
    use time::Duration;
    use uuid::Uuid;

    fn entry_with_versions(name: &str, seqs: &[i64]) -> MetaCacheEntry {
        let mut fm = FileMeta::new();
        for &seq in seqs {
            let ver = FileMetaVersion {
                version_type: VersionType::Object,
                object: Some(MetaObject {
                    version_id: Some(Uuid::new_v4()),
                    mod_time: Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(seq)),
                    size: 1,
                    ..Default::default()
                }),
                delete_marker: None,
                write_version: 0,
            };
            fm.versions.push(FileMetaShallowVersion::try_from(ver).unwrap());
        }
        fm.sort_by_mod_time();

        MetaCacheEntry {
            name: name.to_owned(),
            metadata: fm.marshal_msg().unwrap(),
            cached: Some(fm),
            reusable: false,
        }
    }

    #[tokio::test]
    async fn test_writer_reader_roundtrip() {
        let mut f = Cursor::new(Vec::new());
        let mut w = MetacacheWriter::new(&mut f);

        let mut objs = Vec::new();
        for i in 0..10 {
            objs.push(MetaCacheEntry {
                name: format!("item{i}"),
                metadata: vec![0u8, 10],
                cached: None,
                reusable: false,
            });
        }

        w.write(&objs).await.unwrap();
        w.close().await.unwrap();

        let data = f.into_inner();
        let mut r = MetacacheReader::new(Cursor::new(data));
        let nobjs = r.read_all().await.unwrap();

        assert_eq!(objs, nobjs);
    }

    #[tokio::test]
    async fn test_reader_skip() {
        let mut f = Cursor::new(Vec::new());
        let mut w = MetacacheWriter::new(&mut f);

        for i in 0..5 {
            w.write_obj(&MetaCacheEntry {
                name: format!("obj{i}"),
                metadata: Vec::new(),
                cached: None,
                reusable: false,
            })
            .await
            .unwrap();
        }
        w.close().await.unwrap();

        let mut r = MetacacheReader::new(Cursor::new(f.into_inner()));
        r.skip(3).await.unwrap();
        let rest = r.read_all().await.unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].name, "obj3");
    }

    #[test]
    fn test_is_in_dir() {
        let entry = |name: &str| MetaCacheEntry {
            name: name.to_owned(),
            ..Default::default()
        };

        assert!(entry("a").is_in_dir("", "/"));
        assert!(entry("a/").is_in_dir("", "/"));
        assert!(!entry("a/b").is_in_dir("", "/"));
        assert!(entry("a/b").is_in_dir("a/", "/"));
        assert!(entry("a/b/").is_in_dir("a/", "/"));
        assert!(!entry("a/b/c").is_in_dir("a/", "/"));
    }

    #[test]
    fn test_matches_prefers_newer() {
        let newer = entry_with_versions("obj", &[10]);
        let older = entry_with_versions("obj", &[2, 1]);

        // More versions but older latest: newest modtime wins.
        let (prefer, agree) = newer.matches(Some(&older), true);
        assert!(!agree);
        assert_eq!(prefer.unwrap().metadata, newer.metadata);
    }

    #[test]
    fn test_matches_object_beats_dir() {
        let obj = entry_with_versions("name", &[1]);
        let dir = MetaCacheEntry {
            name: "name/".to_owned(),
            ..Default::default()
        };

        let (prefer, agree) = obj.matches(Some(&dir), true);
        assert!(!agree);
        // Different names sort lexically, the object name is lower.
        assert_eq!(prefer.unwrap().name, "name");
    }

    #[test]
    fn test_resolve_dir_quorum() {
        let dir = MetaCacheEntry {
            name: "prefix/".to_owned(),
            ..Default::default()
        };
        let entries = MetaCacheEntries(vec![Some(dir.clone()), Some(dir.clone()), None]);

        let resolved = entries.resolve(MetadataResolutionParams {
            dir_quorum: 2,
            obj_quorum: 2,
            ..Default::default()
        });
        assert_eq!(resolved.unwrap().name, "prefix/");

        let entries = MetaCacheEntries(vec![Some(dir), None, None]);
        let resolved = entries.resolve(MetadataResolutionParams {
            dir_quorum: 2,
            obj_quorum: 2,
            ..Default::default()
        });
        assert!(resolved.is_none());
    }

    #[test]
    fn test_resolve_objects_agree() {
        let a = entry_with_versions("obj", &[5]);
        let entries = MetaCacheEntries(vec![Some(a.clone()), Some(a.clone())]);

        let resolved = entries.resolve(MetadataResolutionParams {
            dir_quorum: 2,
            obj_quorum: 2,
            strict: true,
            ..Default::default()
        });
        assert_eq!(resolved.unwrap().name, "obj");
    }

    #[test]
    fn test_forward_past() {
        let mut sorted = MetaCacheEntriesSorted {
            o: MetaCacheEntries(
                ["a", "b", "c", "d"]
                    .iter()
                    .map(|n| {
                        Some(MetaCacheEntry {
                            name: n.to_string(),
                            ..Default::default()
                        })
                    })
                    .collect(),
            ),
            ..Default::default()
        };

        sorted.forward_past(Some("b".to_string()));
        let names: Vec<&str> = sorted.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["c", "d"]);

        sorted.forward_past(Some("z".to_string()));
        assert!(sorted.is_empty());
    }
}
