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

use crate::api::{DiskAPI, WalkDirOptions};
use crate::error::{DiskError, Result};
use crate::{BUCKET_META_PREFIX, FERRITE_META_BUCKET, FERRITE_META_TMP_DELETED_BUCKET, STORAGE_FORMAT_FILE};
use ferrite_filemeta::{MetaCacheEntry, MetacacheWriter};
use ferrite_utils::path::{GLOBAL_DIR_SUFFIX, GLOBAL_DIR_SUFFIX_WITH_SLASH, SLASH_SEPARATOR, decode_dir_object, path_join_buf};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_PATH_LENGTH: usize = 4096;

fn check_path_length(path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(DiskError::FileNameTooLong);
    }
    Ok(())
}

/// One locally mounted drive.
#[derive(Debug)]
pub struct LocalDisk {
    root: PathBuf,
    endpoint: String,
    pub pool_idx: usize,
    pub set_idx: usize,
    pub disk_idx: usize,
}

impl LocalDisk {
    pub async fn new(endpoint: &str, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            endpoint: endpoint.to_string(),
            pool_idx: 0,
            set_idx: 0,
            disk_idx: 0,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn get_bucket_path(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() {
            return Err(DiskError::VolumeNotFound);
        }
        let p = self.root.join(bucket);
        check_path_length(p.to_string_lossy().as_ref())?;
        Ok(p)
    }

    fn get_object_path(&self, bucket: &str, path: &str) -> Result<PathBuf> {
        let p = self.get_bucket_path(bucket)?.join(path.trim_start_matches(SLASH_SEPARATOR));
        check_path_length(p.to_string_lossy().as_ref())?;
        Ok(p)
    }

    pub async fn make_volume(&self, bucket: &str) -> Result<()> {
        let dir = self.get_bucket_path(bucket)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn read_metadata_file(&self, file_path: &Path) -> Result<Vec<u8>> {
        check_path_length(file_path.to_string_lossy().as_ref())?;

        let meta = tokio::fs::metadata(file_path).await?;
        if meta.is_dir() {
            return Err(DiskError::FileNotFound);
        }
        if !meta.is_file() {
            return Err(DiskError::IsNotRegular);
        }

        let buf = tokio::fs::read(file_path).await?;
        if buf.is_empty() {
            return Err(DiskError::FileNotFound);
        }
        Ok(buf)
    }

    /// Writes `data` under `bucket/path`, going through a `.tmp`
    /// sibling and a rename so a reader never sees a torn file.
    pub async fn write_all(&self, bucket: &str, path: &str, data: &[u8]) -> Result<()> {
        let target = self.get_object_path(bucket, path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = PathBuf::from(format!("{}.tmp", target.to_string_lossy()));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    pub async fn read_all(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.get_object_path(bucket, path)?;
        self.read_metadata_file(&target).await
    }

    pub async fn rename_file(&self, bucket: &str, src: &str, dst: &str) -> Result<()> {
        let src = self.get_object_path(bucket, src)?;
        let dst = self.get_object_path(bucket, dst)?;
        if let Some(parent) = dst.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&src, &dst).await?;
        Ok(())
    }

    /// Writes the manifest of an object, creating the object directory.
    pub async fn write_metadata(&self, bucket: &str, object: &str, buf: &[u8]) -> Result<()> {
        let encoded = ferrite_utils::path::encode_dir_object(object);
        self.write_all(bucket, &path_join_buf(&[encoded.as_str(), STORAGE_FORMAT_FILE]), buf).await
    }

    async fn is_empty_dir(&self, path: &Path) -> bool {
        match tokio::fs::read_dir(path).await {
            Ok(mut rd) => rd.next_entry().await.map(|e| e.is_none()).unwrap_or(true),
            Err(_) => true,
        }
    }

    pub(crate) async fn scan_dir<W: AsyncWrite + Unpin + Send>(
        &self,
        current: &mut String,
        opts: &WalkDirOptions,
        out: &mut MetacacheWriter<W>,
        objs_returned: &mut i32,
    ) -> Result<()> {
        let forward = opts.forward_to.as_ref().filter(|v| v.starts_with(&*current)).map(|v| {
            let fwd = v.trim_start_matches(&*current);
            match fwd.find('/') {
                Some(idx) => fwd[..idx].to_owned(),
                None => fwd.to_owned(),
            }
        });

        if opts.limit > 0 && *objs_returned >= opts.limit {
            return Ok(());
        }

        let mut entries = match self.list_dir(&opts.bucket, current).await {
            Ok(res) => res,
            Err(err) => {
                if err != DiskError::VolumeNotFound && err != DiskError::FileNotFound {
                    info!("scan_dir: list_dir {} failed: {:?}", &current, &err);
                }
                if opts.report_notfound
                    && (err == DiskError::VolumeNotFound || err == DiskError::FileNotFound)
                    && current == &opts.base_dir
                {
                    return Err(DiskError::FileNotFound);
                }
                return Ok(());
            }
        };

        if entries.is_empty() {
            return Ok(());
        }

        *current = current.trim_matches('/').to_owned();

        let mut dir_objects = HashSet::new();

        for item in entries.iter_mut() {
            let entry = item.clone();

            if opts.limit > 0 && *objs_returned >= opts.limit {
                return Ok(());
            }

            if let Some(filter_prefix) = &opts.filter_prefix {
                if !entry.starts_with(filter_prefix) {
                    *item = String::new();
                    continue;
                }
            }

            if let Some(forward) = &forward {
                if &entry < forward {
                    *item = String::new();
                    continue;
                }
            }

            if entry.ends_with(SLASH_SEPARATOR) {
                if entry.ends_with(GLOBAL_DIR_SUFFIX_WITH_SLASH) {
                    // Object stored as a directory, keep the decoded
                    // name with trailing slash for the second pass.
                    let decoded = format!("{}{}", entry.trim_end_matches(GLOBAL_DIR_SUFFIX_WITH_SLASH), SLASH_SEPARATOR);
                    dir_objects.insert(decoded.clone());
                    *item = decoded;
                    continue;
                }

                *item = entry.trim_end_matches(SLASH_SEPARATOR).to_owned();
                continue;
            }

            *item = String::new();

            // A manifest directly inside the scanned directory means
            // the directory itself is one object, emit it and stop.
            if entry == STORAGE_FORMAT_FILE {
                let metadata = self
                    .read_metadata_file(&self.get_object_path(&opts.bucket, &path_join_buf(&[current.as_str(), entry.as_str()]))?)
                    .await?;

                let name = decode_dir_object(current.trim_end_matches(SLASH_SEPARATOR));

                out.write_obj(&MetaCacheEntry {
                    name,
                    metadata,
                    ..Default::default()
                })
                .await?;
                *objs_returned += 1;

                return Ok(());
            }
        }

        entries.sort();

        let mut entries = entries.as_slice();
        if let Some(forward) = &forward {
            for (i, entry) in entries.iter().enumerate() {
                if entry >= forward || forward.starts_with(entry.as_str()) {
                    entries = &entries[i..];
                    break;
                }
            }
        }

        let mut dir_stack: Vec<String> = Vec::with_capacity(5);

        for entry in entries.iter() {
            if opts.limit > 0 && *objs_returned >= opts.limit {
                return Ok(());
            }

            if entry.is_empty() {
                continue;
            }

            let name = path_join_buf(&[current.as_str(), entry.as_str()]);

            // Emit pending directories sorting before this entry.
            while dir_stack.last().is_some_and(|pop| pop < &name) {
                let Some(pop) = dir_stack.pop() else { break };
                out.write_obj(&MetaCacheEntry {
                    name: pop.clone(),
                    ..Default::default()
                })
                .await?;

                if opts.recursive {
                    let mut opts = opts.clone();
                    opts.filter_prefix = None;
                    let mut dir = pop;
                    if let Err(err) = Box::pin(self.scan_dir(&mut dir, &opts, out, objs_returned)).await {
                        warn!("scan_dir: recursion into {} failed: {:?}", dir, err);
                    }
                }
            }

            let mut meta = MetaCacheEntry {
                name,
                ..Default::default()
            };

            let is_dir_obj = dir_objects.contains(entry);
            if is_dir_obj {
                meta.name.truncate(meta.name.len() - 1);
                meta.name.push_str(GLOBAL_DIR_SUFFIX_WITH_SLASH);
            }

            match self
                .read_metadata_file(&self.get_object_path(&opts.bucket, &path_join_buf(&[meta.name.as_str(), STORAGE_FORMAT_FILE]))?)
                .await
            {
                Ok(buf) => {
                    if is_dir_obj {
                        meta.name = meta.name.trim_end_matches(GLOBAL_DIR_SUFFIX_WITH_SLASH).to_owned();
                        meta.name.push_str(SLASH_SEPARATOR);
                    }
                    meta.metadata = buf;

                    out.write_obj(&meta).await?;
                    *objs_returned += 1;
                }
                Err(err) => {
                    if err == DiskError::FileNotFound || err == DiskError::IsNotRegular {
                        // Not an object, remember it as a directory.
                        // A dir object without a manifest is skipped.
                        if !is_dir_obj && !self.is_empty_dir(&self.get_object_path(&opts.bucket, &meta.name)?).await {
                            meta.name.push_str(SLASH_SEPARATOR);
                            dir_stack.push(meta.name);
                        }
                    }
                }
            }
        }

        // Whatever directories remain sort after every entry, emit in
        // insertion (ascending) order.
        for dir in std::mem::take(&mut dir_stack) {
            if opts.limit > 0 && *objs_returned >= opts.limit {
                return Ok(());
            }

            out.write_obj(&MetaCacheEntry {
                name: dir.clone(),
                ..Default::default()
            })
            .await?;
            *objs_returned += 1;

            if opts.recursive {
                let mut dir = dir;
                let mut opts = opts.clone();
                opts.filter_prefix = None;
                if let Err(err) = Box::pin(self.scan_dir(&mut dir, &opts, out, objs_returned)).await {
                    warn!("scan_dir: recursion into {} failed: {:?}", dir, err);
                }
            }
        }

        Ok(())
    }
}

impl DiskAPI for LocalDisk {
    fn to_string(&self) -> String {
        self.endpoint.clone()
    }

    fn is_online(&self) -> bool {
        self.root.exists()
    }

    async fn walk_dir<W: AsyncWrite + Unpin + Send>(&self, opts: WalkDirOptions, wr: &mut W) -> Result<()> {
        let volume_dir = self.get_bucket_path(&opts.bucket)?;
        if tokio::fs::metadata(&volume_dir).await.is_err() {
            return Err(DiskError::VolumeNotFound);
        }

        let mut wr = wr;
        let mut out = MetacacheWriter::new(&mut wr);
        let mut objs_returned = 0;

        // The base dir itself may be a directory object.
        if opts.base_dir.ends_with(SLASH_SEPARATOR) {
            let manifest = self.get_object_path(
                &opts.bucket,
                &path_join_buf(&[
                    format!("{}{}", opts.base_dir.trim_end_matches(SLASH_SEPARATOR), GLOBAL_DIR_SUFFIX).as_str(),
                    STORAGE_FORMAT_FILE,
                ]),
            )?;

            if let Ok(metadata) = self.read_metadata_file(&manifest).await {
                out.write_obj(&MetaCacheEntry {
                    name: opts.base_dir.clone(),
                    metadata,
                    ..Default::default()
                })
                .await?;
                objs_returned += 1;
            }
        }

        let mut current = opts.base_dir.clone();
        let res = self.scan_dir(&mut current, &opts, &mut out, &mut objs_returned).await;
        out.close().await?;
        res
    }

    async fn list_dir(&self, volume: &str, dir_path: &str) -> Result<Vec<String>> {
        let volume_dir = self.get_bucket_path(volume)?;
        let dir_path_abs = volume_dir.join(dir_path.trim_start_matches(SLASH_SEPARATOR));

        let mut rd = match tokio::fs::read_dir(&dir_path_abs).await {
            Ok(rd) => rd,
            Err(err) => {
                if err.kind() == std::io::ErrorKind::NotFound {
                    if tokio::fs::metadata(&volume_dir).await.is_err() {
                        return Err(DiskError::VolumeNotFound);
                    }
                    return Err(DiskError::FileNotFound);
                }
                return Err(err.into());
            }
        };

        let mut entries = Vec::new();
        while let Some(item) = rd.next_entry().await? {
            let mut name = item.file_name().to_string_lossy().to_string();
            if name.ends_with(".tmp") {
                continue;
            }
            if item.file_type().await?.is_dir() {
                name.push_str(SLASH_SEPARATOR);
            }
            entries.push(name);
        }

        Ok(entries)
    }

    async fn read_metadata(&self, volume: &str, path: &str) -> Result<Vec<u8>> {
        let target = self.get_object_path(volume, &path_join_buf(&[path, STORAGE_FORMAT_FILE]))?;
        self.read_metadata_file(&target).await
    }

    async fn delete(&self, volume: &str, path: &str, recursive: bool) -> Result<()> {
        let target = self.get_object_path(volume, path)?;
        let res = if recursive {
            tokio::fs::remove_dir_all(&target).await
        } else {
            match tokio::fs::metadata(&target).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir(&target).await,
                _ => tokio::fs::remove_file(&target).await,
            }
        };

        match res {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Moves every `buckets/<bucket>/.metacache` tree of a previous process
/// run under the trash prefix for asynchronous deletion. Stale caches
/// from another server version must never be served.
pub async fn rename_all_bucket_metacache(disk: &LocalDisk) -> Result<()> {
    let buckets_root = disk.get_object_path(FERRITE_META_BUCKET, BUCKET_META_PREFIX)?;

    let mut rd = match tokio::fs::read_dir(&buckets_root).await {
        Ok(rd) => rd,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    while let Some(item) = rd.next_entry().await? {
        if !item.file_type().await?.is_dir() {
            continue;
        }

        let metacache_dir = item.path().join(".metacache");
        if tokio::fs::metadata(&metacache_dir).await.is_err() {
            continue;
        }

        let trash = disk
            .root()
            .join(FERRITE_META_TMP_DELETED_BUCKET)
            .join(Uuid::new_v4().to_string());
        if let Some(parent) = trash.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::rename(&metacache_dir, &trash).await?;
        info!("parked stale metacache tree {:?} under {:?}", metacache_dir, trash);
    }

    Ok(())
}

/// Background half of the trash sweep.
pub async fn purge_trash(disk: &LocalDisk) -> Result<()> {
    let trash_root = disk.root().join(FERRITE_META_TMP_DELETED_BUCKET);
    match tokio::fs::remove_dir_all(&trash_root).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DiskAPI;
    use ferrite_filemeta::{FileInfo, FileMeta, MetacacheReader};
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    async fn put_object(disk: &LocalDisk, bucket: &str, object: &str, seq: i64) {
        let mut fm = FileMeta::new();
        fm.add_version(FileInfo {
            volume: bucket.to_string(),
            name: object.to_string(),
            version_id: Some(Uuid::new_v4()),
            mod_time: Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(seq)),
            size: seq,
            ..Default::default()
        })
        .unwrap();
        disk.write_metadata(bucket, object, &fm.marshal_msg().unwrap()).await.unwrap();
    }

    async fn walk_names(disk: &LocalDisk, opts: WalkDirOptions) -> Vec<String> {
        let (rd, mut wr) = tokio::io::duplex(4096);
        let mut reader = MetacacheReader::new(rd);

        let walk = disk.walk_dir(opts, &mut wr);
        let (walk_res, entries) = tokio::join!(walk, async move { reader.read_all().await });
        walk_res.unwrap();
        entries.unwrap().into_iter().map(|e| e.name).collect()
    }

    #[tokio::test]
    async fn test_walk_dir_sorted_recursive() {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDisk::new("/test", dir.path()).await.unwrap();
        disk.make_volume("bucket").await.unwrap();

        put_object(&disk, "bucket", "b/obj2", 1).await;
        put_object(&disk, "bucket", "a/obj1", 1).await;
        put_object(&disk, "bucket", "top", 1).await;
        put_object(&disk, "bucket", "a/sub/obj3", 1).await;

        let names = walk_names(
            &disk,
            WalkDirOptions {
                bucket: "bucket".to_string(),
                recursive: true,
                ..Default::default()
            },
        )
        .await;

        assert_eq!(names, vec!["a/", "a/obj1", "a/sub/", "a/sub/obj3", "b/", "b/obj2", "top"]);
    }

    #[tokio::test]
    async fn test_walk_dir_forward_to() {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDisk::new("/test", dir.path()).await.unwrap();
        disk.make_volume("bucket").await.unwrap();

        for name in ["a", "b", "c", "d"] {
            put_object(&disk, "bucket", name, 1).await;
        }

        let names = walk_names(
            &disk,
            WalkDirOptions {
                bucket: "bucket".to_string(),
                recursive: true,
                forward_to: Some("c".to_string()),
                ..Default::default()
            },
        )
        .await;

        assert_eq!(names, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_walk_dir_dir_object() {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDisk::new("/test", dir.path()).await.unwrap();
        disk.make_volume("bucket").await.unwrap();

        put_object(&disk, "bucket", "photos/", 1).await;
        put_object(&disk, "bucket", "photos/cat.png", 1).await;

        let names = walk_names(
            &disk,
            WalkDirOptions {
                bucket: "bucket".to_string(),
                recursive: true,
                ..Default::default()
            },
        )
        .await;

        assert!(names.contains(&"photos/".to_string()));
        assert!(names.contains(&"photos/cat.png".to_string()));
    }

    #[tokio::test]
    async fn test_walk_missing_volume() {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDisk::new("/test", dir.path()).await.unwrap();

        let (_rd, mut wr) = tokio::io::duplex(64);
        let err = disk
            .walk_dir(
                WalkDirOptions {
                    bucket: "missing".to_string(),
                    ..Default::default()
                },
                &mut wr,
            )
            .await
            .unwrap_err();
        assert_eq!(err, DiskError::VolumeNotFound);
    }

    #[tokio::test]
    async fn test_rename_all_bucket_metacache() {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDisk::new("/test", dir.path()).await.unwrap();

        disk.write_all(
            FERRITE_META_BUCKET,
            "buckets/mybucket/.metacache/some-id/block.0",
            b"stale",
        )
        .await
        .unwrap();

        rename_all_bucket_metacache(&disk).await.unwrap();

        let moved = disk
            .get_object_path(FERRITE_META_BUCKET, "buckets/mybucket/.metacache")
            .unwrap();
        assert!(tokio::fs::metadata(&moved).await.is_err());

        let trash_root = disk.root().join(FERRITE_META_TMP_DELETED_BUCKET);
        let mut rd = tokio::fs::read_dir(&trash_root).await.unwrap();
        assert!(rd.next_entry().await.unwrap().is_some());

        purge_trash(&disk).await.unwrap();
        assert!(tokio::fs::metadata(&trash_root).await.is_err());
    }
}
