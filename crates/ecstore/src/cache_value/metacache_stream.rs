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

use crate::cache_value::metacache_manager::ScanStatus;
use crate::error::{Result, StorageError};
use ferrite_disk::{DiskAPI, DiskStore, FERRITE_META_BUCKET};
use ferrite_filemeta::{MetaCacheEntries, MetaCacheEntriesSorted, MetaCacheEntry};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Entries per persisted block.
pub const DEFAULT_METACACHE_BLOCK_SIZE: usize = 5000;

const METACACHE_INDEX_VERSION: u8 = 1;

const METACACHE_INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetacacheBlockInfo {
    pub n: usize,
    pub first: String,
    pub last: String,
    /// Size of the block file in bytes.
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetacacheIndex {
    pub version: u8,
    pub blocks: Vec<MetacacheBlockInfo>,
    pub status: ScanStatus,
    pub error: Option<String>,
}

fn metacache_dir(bucket: &str, id: &str) -> String {
    format!("buckets/{bucket}/.metacache/{id}")
}

fn block_path(dir: &str, n: usize) -> String {
    format!("{dir}/block.{n}")
}

/// Encodes one entry as a length prefixed record:
/// `[u32 name_len][name][u32 meta_len][meta]`, both lengths big endian.
fn encode_entry(buf: &mut Vec<u8>, entry: &MetaCacheEntry) {
    buf.extend_from_slice(&(entry.name.len() as u32).to_be_bytes());
    buf.extend_from_slice(entry.name.as_bytes());
    buf.extend_from_slice(&(entry.metadata.len() as u32).to_be_bytes());
    buf.extend_from_slice(&entry.metadata);
}

fn decode_entries(buf: &[u8]) -> Result<Vec<MetaCacheEntry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < buf.len() {
        if pos + 4 > buf.len() {
            return Err(StorageError::FileCorrupt);
        }
        let name_len = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        pos += 4;
        if pos + name_len > buf.len() {
            return Err(StorageError::FileCorrupt);
        }
        let name = String::from_utf8(buf[pos..pos + name_len].to_vec()).map_err(|_| StorageError::FileCorrupt)?;
        pos += name_len;

        if pos + 4 > buf.len() {
            return Err(StorageError::FileCorrupt);
        }
        let meta_len = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        pos += 4;
        if pos + meta_len > buf.len() {
            return Err(StorageError::FileCorrupt);
        }
        let metadata = buf[pos..pos + meta_len].to_vec();
        pos += meta_len;

        entries.push(MetaCacheEntry {
            name,
            metadata,
            cached: None,
            reusable: false,
        });
    }

    Ok(entries)
}

/// Persistent store for listing sessions. Blocks and the index are
/// written through `.tmp` files with atomic renames, so a finalized
/// cache is immutable and a reader never observes a torn block.
#[derive(Debug, Clone)]
pub struct MetacacheStore {
    disk: DiskStore,
    block_size: usize,
}

impl MetacacheStore {
    pub fn new(disk: DiskStore, block_size: usize) -> Self {
        Self {
            disk,
            block_size: block_size.max(1),
        }
    }

    /// Opens a cache for appending. There must never be more than one
    /// writer per cache id, the manager's reservation guarantees it.
    pub fn writer(&self, bucket: &str, id: &str) -> MetacacheBlockWriter {
        MetacacheBlockWriter {
            disk: self.disk.clone(),
            dir: metacache_dir(bucket, id),
            block_size: self.block_size,
            buf: Vec::new(),
            in_block: 0,
            block_n: 0,
            first: None,
            last: String::new(),
            blocks: Vec::new(),
        }
    }

    /// Opens a finalized or in-progress cache for reading.
    pub async fn reader(&self, bucket: &str, id: &str) -> Result<MetacacheBlockReader> {
        let dir = metacache_dir(bucket, id);
        let raw = self.disk.read_all(FERRITE_META_BUCKET, &format!("{dir}/{METACACHE_INDEX_FILE}")).await?;
        let index: MetacacheIndex = serde_json::from_slice(&raw).map_err(|_| StorageError::FileCorrupt)?;

        if index.version != METACACHE_INDEX_VERSION {
            return Err(StorageError::FileCorrupt);
        }
        if index.status == ScanStatus::Error {
            return Err(StorageError::Io(index.error.unwrap_or_else(|| "cache errored".to_string())));
        }

        Ok(MetacacheBlockReader {
            disk: self.disk.clone(),
            dir,
            index,
        })
    }

    pub async fn drop_all(&self, bucket: &str, id: &str) -> Result<()> {
        self.disk
            .delete(FERRITE_META_BUCKET, &metacache_dir(bucket, id), true)
            .await
            .map_err(StorageError::from)
    }

    pub async fn delete_bucket(&self, bucket: &str) -> Result<()> {
        self.disk
            .delete(FERRITE_META_BUCKET, &format!("buckets/{bucket}/.metacache"), true)
            .await
            .map_err(StorageError::from)
    }
}

pub struct MetacacheBlockWriter {
    disk: DiskStore,
    dir: String,
    block_size: usize,
    buf: Vec<u8>,
    in_block: usize,
    block_n: usize,
    first: Option<String>,
    last: String,
    blocks: Vec<MetacacheBlockInfo>,
}

impl MetacacheBlockWriter {
    pub async fn write(&mut self, entry: &MetaCacheEntry) -> Result<()> {
        if entry.name.is_empty() {
            return Err(StorageError::InvalidArgument("metacache block writer: entry without a name".to_string()));
        }

        if self.first.is_none() {
            self.first = Some(entry.name.clone());
        }
        self.last = entry.name.clone();

        encode_entry(&mut self.buf, entry);
        self.in_block += 1;

        if self.in_block >= self.block_size {
            self.flush_block().await?;
        }
        Ok(())
    }

    async fn flush_block(&mut self) -> Result<()> {
        if self.in_block == 0 {
            return Ok(());
        }

        let path = block_path(&self.dir, self.block_n);
        self.disk.write_all(FERRITE_META_BUCKET, &path, &self.buf).await?;

        self.blocks.push(MetacacheBlockInfo {
            n: self.block_n,
            first: self.first.take().unwrap_or_default(),
            last: std::mem::take(&mut self.last),
            size: self.buf.len(),
        });

        debug!("metacache block {} flushed ({} bytes)", self.block_n, self.buf.len());

        self.block_n += 1;
        self.in_block = 0;
        self.buf.clear();
        Ok(())
    }

    /// Flushes the partial block and publishes the index. Publishing
    /// the index is the commit point of the whole cache.
    pub async fn finalize(mut self, status: ScanStatus, error: Option<String>) -> Result<()> {
        self.flush_block().await?;

        let index = MetacacheIndex {
            version: METACACHE_INDEX_VERSION,
            blocks: std::mem::take(&mut self.blocks),
            status,
            error,
        };

        let raw = serde_json::to_vec(&index).map_err(StorageError::other)?;
        self.disk
            .write_all(FERRITE_META_BUCKET, &format!("{}/{METACACHE_INDEX_FILE}", self.dir), &raw)
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct MetacacheBlockReader {
    disk: DiskStore,
    dir: String,
    index: MetacacheIndex,
}

impl MetacacheBlockReader {
    pub fn status(&self) -> ScanStatus {
        self.index.status
    }

    /// Streams entries strictly after `marker`, at most `limit` of
    /// them (0 means all). Blocks fully below the marker are skipped
    /// using the index, only the needed blocks are read.
    pub async fn stream(&self, marker: Option<String>, limit: usize) -> Result<MetaCacheEntriesSorted> {
        let mut entries: Vec<Option<MetaCacheEntry>> = Vec::new();
        let mut last_skipped: Option<String> = None;

        for block in self.index.blocks.iter() {
            if limit > 0 && entries.len() >= limit {
                break;
            }

            if let Some(marker) = &marker {
                if &block.last <= marker {
                    last_skipped = Some(block.last.clone());
                    continue;
                }
            }

            let raw = self.disk.read_all(FERRITE_META_BUCKET, &block_path(&self.dir, block.n)).await?;
            if raw.len() != block.size {
                return Err(StorageError::FileCorrupt);
            }

            for entry in decode_entries(&raw)? {
                if let Some(marker) = &marker {
                    if &entry.name <= marker {
                        last_skipped = Some(entry.name.clone());
                        continue;
                    }
                }
                if limit > 0 && entries.len() >= limit {
                    break;
                }
                entries.push(Some(entry));
            }
        }

        Ok(MetaCacheEntriesSorted {
            o: MetaCacheEntries(entries),
            list_id: None,
            reuse: true,
            last_skipped_entry: last_skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_disk::LocalDisk;
    use std::sync::Arc;

    async fn test_store(block_size: usize) -> (tempfile::TempDir, MetacacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let disk = Arc::new(LocalDisk::new("/test", dir.path()).await.unwrap());
        (dir, MetacacheStore::new(disk, block_size))
    }

    fn entry(name: &str) -> MetaCacheEntry {
        MetaCacheEntry {
            name: name.to_string(),
            metadata: name.as_bytes().to_vec(),
            cached: None,
            reusable: false,
        }
    }

    #[tokio::test]
    async fn test_block_roundtrip() {
        let (_tmp, store) = test_store(3).await;

        let mut writer = store.writer("bucket", "cache-1");
        for i in 0..10 {
            writer.write(&entry(&format!("obj{i:02}"))).await.unwrap();
        }
        writer.finalize(ScanStatus::Success, None).await.unwrap();

        let reader = store.reader("bucket", "cache-1").await.unwrap();
        assert_eq!(reader.status(), ScanStatus::Success);
        // 10 entries over 3-entry blocks: 4 block files.
        assert_eq!(reader.index.blocks.len(), 4);

        let page = reader.stream(None, 0).await.unwrap();
        let names: Vec<&str> = page.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "obj00");
        assert_eq!(names[9], "obj09");
    }

    #[tokio::test]
    async fn test_stream_seeks_by_marker() {
        let (_tmp, store) = test_store(3).await;

        let mut writer = store.writer("bucket", "cache-2");
        for i in 0..10 {
            writer.write(&entry(&format!("obj{i:02}"))).await.unwrap();
        }
        writer.finalize(ScanStatus::Success, None).await.unwrap();

        let reader = store.reader("bucket", "cache-2").await.unwrap();
        let page = reader.stream(Some("obj04".to_string()), 3).await.unwrap();
        let names: Vec<&str> = page.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["obj05", "obj06", "obj07"]);
    }

    #[tokio::test]
    async fn test_reader_requires_index() {
        let (_tmp, store) = test_store(3).await;

        // No finalize: the index was never published.
        let mut writer = store.writer("bucket", "cache-3");
        writer.write(&entry("a")).await.unwrap();
        drop(writer);

        let err = store.reader("bucket", "cache-3").await.unwrap_err();
        assert_eq!(err, StorageError::FileNotFound);
    }

    #[tokio::test]
    async fn test_errored_cache_rejected() {
        let (_tmp, store) = test_store(3).await;

        let writer = store.writer("bucket", "cache-4");
        writer.finalize(ScanStatus::Error, Some("scan failed".to_string())).await.unwrap();

        assert!(store.reader("bucket", "cache-4").await.is_err());
    }

    #[tokio::test]
    async fn test_drop_all() {
        let (_tmp, store) = test_store(3).await;

        let mut writer = store.writer("bucket", "cache-5");
        writer.write(&entry("a")).await.unwrap();
        writer.finalize(ScanStatus::Success, None).await.unwrap();

        store.drop_all("bucket", "cache-5").await.unwrap();
        assert!(store.reader("bucket", "cache-5").await.is_err());
    }
}
