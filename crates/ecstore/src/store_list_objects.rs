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

use crate::bucket::lifecycle::{ExpiryState, IlmAction, LifecycleConfig, eval_action_from_lifecycle};
use crate::bucket::replication::{ReplicationConfig, ReplicationPool};
use crate::cache_value::metacache_manager::{Metacache, ScanStatus};
use crate::cache_value::metacache_set::{ListPathRawOptions, list_path_raw};
use crate::error::{Result, StorageError, is_all_not_found, is_all_volume_not_found};
use crate::rpc::call_with_deadline;
use crate::set_disk::{DiskInfo, SetDisks};
use crate::store::ECStore;
use crate::store_api::{ListObjectsInfo, ListObjectsV2Info, ObjectInfo};
use crate::store_utils::{check_list_objs_args, is_reserved_or_invalid_bucket};
use ferrite_disk::DiskStore;
use ferrite_disk::error::DiskError;
use ferrite_filemeta::{
    FileMeta, MetaCacheEntries, MetaCacheEntriesSorted, MetaCacheEntriesSortedResult, MetaCacheEntry,
    MetadataResolutionParams, merge_file_meta_versions,
};
use ferrite_utils::path::{self, SLASH_SEPARATOR, base_dir_from_prefix, path_join_buf};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

const MAX_OBJECT_LIST: i32 = 1000;

const MARKER_TAG_VERSION: &str = "v1";

pub fn max_keys_plus_one(max_keys: i32, add_one: bool) -> i32 {
    let mut max_keys = max_keys;
    if !(0..=MAX_OBJECT_LIST).contains(&max_keys) {
        max_keys = MAX_OBJECT_LIST;
    }
    if add_one {
        max_keys += 1;
    }
    max_keys
}

#[derive(Debug, Default, Clone)]
pub struct ListPathOptions {
    pub id: Option<String>,

    // Bucket of the listing.
    pub bucket: String,

    // Directory inside the bucket.
    // When unset listPath will set this based on Prefix.
    pub base_dir: String,

    // Scan/return only content with prefix.
    pub prefix: String,

    // FilterPrefix will return only results with this prefix when scanning.
    // Should never contain a slash.
    // Prefix should still be set.
    pub filter_prefix: Option<String>,

    // Marker to resume listing.
    // The response will be the first entry >= this object name.
    pub marker: Option<String>,

    // Limit the number of results.
    pub limit: i32,

    // The number of disks to ask.
    pub ask_disks: String,

    // InclDeleted will keep all entries where latest version is a delete marker.
    pub incl_deleted: bool,

    // Scan recursively.
    // If false only main directory will be scanned.
    // Should always be true if Separator is not SlashSeparator.
    pub recursive: bool,

    // Separator to use.
    pub separator: Option<String>,

    // Create indicates that the lister should create a new cache
    // rather than attempt to load an existing one.
    pub create: bool,

    // Include pure directories.
    pub include_directories: bool,

    // Transient is set if the cache is transient due to an error or
    // being a reserved bucket. The cache is never persisted on disk
    // and a transient result is never served from the cache.
    pub transient: bool,

    // Versioned is this a ListObjectVersions call.
    pub versioned: bool,

    pub stop_disk_at_limit: bool,

    pub pool_idx: Option<usize>,
    pub set_idx: Option<usize>,

    // Bucket policies to apply inline on the merged stream.
    pub lifecycle: Option<Arc<LifecycleConfig>>,
    pub replication: Option<Arc<ReplicationConfig>>,
    pub object_lock_enabled: bool,
}

impl ListPathOptions {
    /// Derives the one-level filter prefix from prefix and base dir.
    pub fn set_filter(&mut self) {
        if self.prefix == self.base_dir {
            return;
        }

        let s = SLASH_SEPARATOR.chars().next().unwrap_or_default();
        self.filter_prefix = {
            let fp = self.prefix.trim_start_matches(&self.base_dir).trim_matches(s);

            if fp.contains(s) || fp.is_empty() { None } else { Some(fp.to_owned()) }
        }
    }

    /// Strips the cache tag off the marker and restores the session
    /// coordinates it carries. Decoding is total: a malformed tag
    /// degrades to a fresh cold listing.
    pub fn parse_marker(&mut self) {
        let Some(s) = self.marker.clone() else { return };
        if !s.contains(format!("[ferrite_cache:{MARKER_TAG_VERSION}").as_str()) {
            return;
        }

        let (Some(start_idx), Some(end_idx)) = (s.find('['), s.find(']')) else {
            return;
        };

        self.marker = Some(s[0..start_idx].to_owned());
        let tags: Vec<_> = s[start_idx..end_idx].trim_matches(['[', ']']).split(',').collect();

        for &tag in tags.iter() {
            let kv: Vec<_> = tag.split(':').collect();
            if kv.len() != 2 {
                continue;
            }

            match kv[0] {
                "ferrite_cache" => {
                    if kv[1] != MARKER_TAG_VERSION {
                        continue;
                    }
                }
                "id" => self.id = Some(kv[1].to_owned()),
                "return" => {
                    self.id = None;
                    self.create = true;
                }
                "p" => match kv[1].parse::<usize>() {
                    Ok(res) => self.pool_idx = Some(res),
                    Err(_) => {
                        self.id = None;
                        self.create = true;
                        continue;
                    }
                },
                "s" => match kv[1].parse::<usize>() {
                    Ok(res) => self.set_idx = Some(res),
                    Err(_) => {
                        self.id = None;
                        self.create = true;
                        continue;
                    }
                },
                _ => (),
            }
        }
    }

    /// Appends the cache tag to a client visible marker.
    pub fn encode_marker(&self, marker: &str) -> String {
        if let Some(id) = &self.id {
            format!(
                "{}[ferrite_cache:{},id:{},p:{},s:{}]",
                marker,
                MARKER_TAG_VERSION,
                id,
                self.pool_idx.unwrap_or_default(),
                self.set_idx.unwrap_or_default(),
            )
        } else {
            format!("{marker}[ferrite_cache:{MARKER_TAG_VERSION},return:]")
        }
    }
}

impl ECStore {
    // @continuation_token marker
    // @start_after as marker when continuation_token empty
    // @delimiter default="/", empty when recursive
    // @max_keys limit
    pub async fn inner_list_objects_v2(
        self: &Arc<Self>,
        bucket: &str,
        prefix: &str,
        continuation_token: Option<String>,
        delimiter: Option<String>,
        max_keys: i32,
        start_after: Option<String>,
    ) -> Result<ListObjectsV2Info> {
        let marker = if continuation_token.is_none() {
            start_after
        } else {
            continuation_token.clone()
        };

        let loi = self.list_objects_generic(bucket, prefix, marker, delimiter, max_keys).await?;
        Ok(ListObjectsV2Info {
            is_truncated: loi.is_truncated,
            continuation_token,
            next_continuation_token: loi.next_marker,
            objects: loi.objects,
            prefixes: loi.prefixes,
        })
    }

    pub async fn list_objects_generic(
        self: &Arc<Self>,
        bucket: &str,
        prefix: &str,
        marker: Option<String>,
        delimiter: Option<String>,
        max_keys: i32,
    ) -> Result<ListObjectsInfo> {
        let mut opts = ListPathOptions {
            bucket: bucket.to_owned(),
            prefix: prefix.to_owned(),
            separator: delimiter.clone(),
            limit: max_keys_plus_one(max_keys, marker.is_some()),
            marker,
            incl_deleted: false,
            ask_disks: "strict".to_owned(),
            ..Default::default()
        };

        let mut list_result = match self.list_path(&opts).await {
            Ok(res) => res,
            Err(err) => MetaCacheEntriesSortedResult {
                entries: None,
                err: Some(err.into()),
            },
        };

        if let Some(err) = list_result.err.clone() {
            if err != ferrite_filemeta::Error::Unexpected {
                return Err(err.into());
            }
        }

        let at_eof = list_result.err.is_some();

        // Compare against the bare key, not the tagged token.
        let mut parsed = opts.clone();
        parsed.parse_marker();

        if let Some(result) = list_result.entries.as_mut() {
            result.forward_past(parsed.marker.clone());
        }

        let entries = list_result.entries.unwrap_or_default();
        opts.id = entries.list_id.clone();

        let versioned = self.bucket_metadata.versioned(&opts.bucket).await;
        let mut get_objects =
            ObjectInfo::from_entries_sorted(&entries, &opts.bucket, &opts.prefix, delimiter.as_deref(), versioned);

        let is_truncated = {
            if max_keys > 0 && get_objects.len() > max_keys as usize {
                get_objects.truncate(max_keys as usize);
                true
            } else {
                !at_eof && !get_objects.is_empty()
            }
        };

        let next_marker = if is_truncated {
            get_objects.last().map(|last| opts.encode_marker(&last.name))
        } else {
            None
        };

        let mut prefixes: Vec<String> = Vec::new();
        let mut objects = Vec::with_capacity(get_objects.len());
        for obj in get_objects.into_iter() {
            if let Some(delimiter) = &delimiter {
                if obj.is_dir && obj.mod_time.is_none() {
                    let mut found = false;
                    if delimiter != SLASH_SEPARATOR {
                        for p in prefixes.iter() {
                            if found {
                                break;
                            }
                            found = p == &obj.name;
                        }
                    }
                    if !found {
                        prefixes.push(obj.name.clone());
                    }
                } else {
                    objects.push(obj);
                }
            } else {
                objects.push(obj);
            }
        }

        Ok(ListObjectsInfo {
            is_truncated,
            next_marker,
            objects,
            prefixes,
        })
    }

    /// The listing state machine. Returns the next page of sorted
    /// entries; the inner `Unexpected` error is the end-of-listing
    /// sentinel, any other error is real.
    pub async fn list_path(self: &Arc<Self>, o: &ListPathOptions) -> Result<MetaCacheEntriesSortedResult> {
        check_list_objs_args(&o.bucket, &o.prefix, &o.marker)?;

        let mut o = o.clone();
        o.marker = o.marker.take().filter(|v| v >= &o.prefix);

        // A marker not sharing the prefix cannot produce results.
        if let Some(marker) = &o.marker {
            if !o.prefix.is_empty() && !marker.starts_with(&o.prefix) {
                return Err(StorageError::Unexpected);
            }
        }

        if o.limit == 0 {
            return Err(StorageError::Unexpected);
        }

        // A flat namespace has no keys of the form '/...'.
        if o.prefix.starts_with(SLASH_SEPARATOR) {
            return Err(StorageError::Unexpected);
        }

        let slash_separator = Some(SLASH_SEPARATOR.to_owned());

        // A delimiter of '/' means a directory style listing of the
        // non-recursive scan, everything else scans recursively.
        o.include_directories = o.separator == slash_separator;
        if (o.separator == slash_separator || o.separator.is_none()) && !o.recursive {
            o.recursive = o.separator != slash_separator;
            o.separator = slash_separator;
        } else {
            o.recursive = true;
        }

        o.parse_marker();
        if o.base_dir.is_empty() {
            o.base_dir = base_dir_from_prefix(&o.prefix);
        }
        o.transient = o.transient || is_reserved_or_invalid_bucket(&o.bucket, false);
        o.set_filter();
        if o.transient {
            o.create = false;
        }

        // Bucket policies ride along for the inline filter.
        if let Some(meta) = self.bucket_metadata.get(&o.bucket).await {
            if o.lifecycle.is_none() {
                o.lifecycle = meta.lifecycle.clone();
            }
            if o.replication.is_none() {
                o.replication = meta.replication.clone();
            }
            o.object_lock_enabled = meta.object_lock_enabled;
        }

        // Keeps the refresh ticker alive exactly as long as this call.
        let refresh_stop = CancellationToken::new();
        let _refresh_guard = refresh_stop.clone().drop_guard();

        let mut created = false;
        if !o.transient {
            // A cold lister reserves a session; a resumer looks up the
            // one its marker names. Racing reservations settle inside
            // the owning node's manager.
            o.create = o.create || o.id.is_none();

            let rpc = self.peer_sys.client_from_hash(&path_join_buf(&[&o.bucket, &o.prefix]));
            let lookup = match &rpc {
                None => {
                    let (cache, was_created) = self.metacache_mgr.find_cache(&o).await;
                    Ok((cache, was_created))
                }
                Some(client) => call_with_deadline(client.get_metacache_listing((&o).into()))
                    .await
                    .map(|resp| (resp.cache, resp.created)),
            };

            match lookup {
                Err(err) => {
                    debug!("findCache failed ({err:?}), degrading to a transient listing");
                    o.transient = true;
                    o.create = false;
                    o.id = Some(Uuid::new_v4().to_string());
                }
                Ok((c, was_created)) => {
                    if c.file_not_found {
                        // A finished scan saw nothing at all.
                        return Ok(MetaCacheEntriesSortedResult {
                            entries: None,
                            err: Some(ferrite_filemeta::Error::Unexpected),
                        });
                    }
                    if matches!(c.status, ScanStatus::None | ScanStatus::Error) {
                        debug!("scan status {:?}, waiting a roundtrip to create", c.status);
                        o.id = None;
                        o.create = false;
                    } else {
                        o.id = Some(c.id.clone());
                        created = was_created;

                        // Continuously refresh the handout while the
                        // request runs so the session stays warm.
                        let mgr = self.metacache_mgr.clone();
                        let rpc = rpc.clone();
                        let tick = self.cfg.max_client_wait / 10;
                        let stop = refresh_stop.clone();
                        let mut meta = c.clone();
                        tokio::spawn(async move {
                            loop {
                                tokio::select! {
                                    _ = stop.cancelled() => return,
                                    _ = tokio::time::sleep(tick) => {
                                        meta.last_handout = std::time::SystemTime::now();
                                        let res = match &rpc {
                                            None => mgr.update_cache_entry(meta.clone()).await,
                                            Some(client) => call_with_deadline(client.update_metacache_listing(meta.clone())).await,
                                        };
                                        if let Ok(updated) = res {
                                            meta = updated;
                                        }
                                    }
                                }
                            }
                        });
                    }
                }
            }
        }

        if o.id.is_some() && !o.transient {
            if created {
                // This lister owns the session: list, serve and save.
                match self.list_and_save(&o).await {
                    Ok(result) => return Ok(result),
                    Err(err) => {
                        warn!("list_and_save failed ({err:?}), proceeding with raw listing");
                        let mut update = Metacache::new(&o);
                        update.error = Some(err.to_string());
                        update.status = ScanStatus::Error;
                        let _ = self.metacache_mgr.update_cache_entry(update).await;
                        o.id = None;
                    }
                }
            } else {
                // Resume or join: stream the persisted blocks.
                match self.stream_metadata_parts(&o).await {
                    Ok(result) => return Ok(result),
                    Err(err) => {
                        // The writer may still be running; serve this
                        // page raw and keep the session id so the next
                        // page can pick the blocks up.
                        if !matches!(err, StorageError::FileNotFound | StorageError::VolumeNotFound) {
                            warn!("resuming listing from cache failed ({err:?}), proceeding with raw listing");
                        }
                    }
                }
            }
        }

        let keep_id = o.id.clone();
        let mut result = self.raw_list(&o).await?;

        if result.err.is_none() || result.err == Some(ferrite_filemeta::Error::Unexpected) {
            if let Some(entries) = result.entries.as_mut() {
                entries.reuse = true;
                let truncated = result.err.is_none();
                entries.o.0.truncate(o.limit as usize);
                // Without a live session the token falls back to the
                // `return` form, asking the next call to create one.
                if !o.transient && truncated {
                    entries.list_id = keep_id;
                }
            }
        }

        Ok(result)
    }

    /// The in-place listing: fan out, merge, filter, gather one page.
    async fn raw_list(self: &Arc<Self>, o: &ListPathOptions) -> Result<MetaCacheEntriesSortedResult> {
        let cancel = CancellationToken::new();

        let (err_tx, mut err_rx) = broadcast::channel::<Arc<StorageError>>(1);
        let (sender, recv) = mpsc::channel(o.limit.max(1) as usize);

        let store = self.clone();
        let opts = o.clone();
        let cancel1 = cancel.clone();
        let err_tx1 = err_tx.clone();
        let job1 = tokio::spawn(async move {
            let mut opts = opts;
            opts.stop_disk_at_limit = true;
            if let Err(err) = store.list_merged(cancel1, opts, sender).await {
                error!("list_merged failed: {:?}", err);
                let _ = err_tx1.send(Arc::new(err));
            }
        });

        let (result_tx, mut result_rx) = mpsc::channel(1);
        let cancel2 = cancel.clone();
        let err_tx2 = err_tx.clone();
        let opts = o.clone();
        let job2 = tokio::spawn(async move {
            if let Err(err) = gather_results(cancel2.clone(), opts, recv, result_tx).await {
                error!("gather_results failed: {:?}", err);
                let _ = err_tx2.send(Arc::new(err));
            }

            // The page is assembled, tear the producers down.
            cancel2.cancel();
        });

        let result = tokio::select! {
            biased;
            res = err_rx.recv() => match res {
                Ok(err) => MetaCacheEntriesSortedResult {
                    entries: None,
                    err: Some(err.as_ref().clone().into()),
                },
                Err(err) => MetaCacheEntriesSortedResult {
                    entries: None,
                    err: Some(ferrite_filemeta::Error::other(err)),
                },
            },
            Some(result) = result_rx.recv() => result,
        };

        join_all(vec![job1, job2]).await;

        Ok(result)
    }

    /// Lists across every set of every pool into one merged stream,
    /// with the bucket-action filter applied when configured.
    pub(crate) async fn list_merged(
        &self,
        cancel: CancellationToken,
        opts: ListPathOptions,
        sender: Sender<MetaCacheEntry>,
    ) -> Result<()> {
        let mut futures = Vec::new();
        let mut inputs = Vec::new();

        for sets in self.pools.iter() {
            for set in sets.disk_set.iter() {
                let (tx, rx) = mpsc::channel(100);
                inputs.push(rx);
                let opts = opts.clone();
                let cancel = cancel.clone();
                let set = set.clone();
                futures.push(async move { set.list_path(cancel, opts, tx).await });
            }
        }

        // Lifecycle and replication actions sit between the merger and
        // the caller; listings reflect current state.
        let merge_out = if opts.lifecycle.is_some() || opts.replication.is_some() {
            let (filter_tx, filter_rx) = mpsc::channel(10);
            let o = opts.clone();
            let expiry = self.expiry_state.clone();
            let repl = self.replication_pool.clone();
            let versioned = self.bucket_metadata.versioned(&opts.bucket).await;
            let cancel = cancel.clone();
            let out = sender.clone();
            tokio::spawn(async move {
                apply_bucket_actions(cancel, o, filter_rx, out, expiry, repl, versioned).await;
            });
            filter_tx
        } else {
            sender.clone()
        };
        drop(sender);

        let merge_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = merge_entry_channels(merge_cancel, inputs, merge_out, pick_newer_entry).await {
                error!("merge_entry_channels failed: {:?}", err);
            }
        });

        let results = join_all(futures).await;

        let mut errs: Vec<Option<StorageError>> = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(()) => errs.push(None),
                Err(err) => errs.push(Some(err)),
            }
        }

        if is_all_not_found(&errs) {
            if is_all_volume_not_found(&errs) {
                return Err(StorageError::VolumeNotFound);
            }
            return Ok(());
        }

        for err in errs.iter().flatten() {
            if err == &StorageError::Unexpected {
                continue;
            }
            return Err(err.clone());
        }

        Ok(())
    }

    /// Lists, serves the first page and mirrors the whole merged
    /// stream into the block store under the reserved session id. The
    /// persister keeps running after the client got its page so later
    /// pages stream from the blocks.
    async fn list_and_save(self: &Arc<Self>, o: &ListPathOptions) -> Result<MetaCacheEntriesSortedResult> {
        let mut o = o.clone();
        o.pool_idx = Some(0);
        o.set_idx = Some(0);

        let block = self.cfg.block_size.max(1);
        let (save_tx, save_rx) = mpsc::channel::<MetaCacheEntry>(block);
        let (in_tx, mut in_rx) = mpsc::channel::<MetaCacheEntry>(block);
        let (out_tx, out_rx) = mpsc::channel::<MetaCacheEntry>(o.limit.max(1) as usize);

        let (result_tx, mut result_rx) = mpsc::channel(1);
        let gather_cancel = CancellationToken::new();
        tokio::spawn(gather_results(gather_cancel.clone(), o.clone(), out_rx, result_tx));

        // The producer and the persister hold their own root scope: a
        // client that walks away must not stop the save.
        let list_cancel = CancellationToken::new();

        let store = self.clone();
        let save_o = o.clone();
        tokio::spawn(async move {
            if let Err(err) = store.save_metacache_stream(&save_o, save_rx).await {
                error!("saving listing {:?} failed: {:?}", save_o.id, err);
            }
        });

        let store = self.clone();
        let prod_o = o.clone();
        let prod_cancel = list_cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = store.list_merged(prod_cancel, prod_o.clone(), in_tx).await {
                let mut update = Metacache::new(&prod_o);
                update.error = Some(err.to_string());
                update.status = ScanStatus::Error;
                let _ = store.metacache_mgr.update_cache_entry(update).await;
            }
        });

        // {streaming, client_done, fully_done}: once the page below is
        // returned the multiplexer stops feeding the client side but
        // drains the listing into the persister.
        let func_returned = Arc::new(AtomicBool::new(false));
        let fr = func_returned.clone();
        tokio::spawn(async move {
            let mut out_tx = Some(out_tx);
            while let Some(mut entry) = in_rx.recv().await {
                if let Some(tx) = &out_tx {
                    if fr.load(Ordering::Acquire) || tx.send(entry.clone()).await.is_err() {
                        out_tx = None;
                    }
                }
                entry.reusable = out_tx.is_none();
                if save_tx.send(entry).await.is_err() {
                    break;
                }
            }
        });

        let mut result = match result_rx.recv().await {
            Some(result) => result,
            None => {
                return Err(StorageError::other("listing aborted before a page was gathered"));
            }
        };
        func_returned.store(true, Ordering::Release);

        if let Some(entries) = result.entries.as_mut() {
            entries.reuse = true;
            let truncated = result.err.is_none();
            entries.o.0.truncate(o.limit as usize);
            if truncated {
                entries.list_id = o.id.clone();
            }
        }

        Ok(result)
    }

    /// Persists the merged stream as blocks, refreshing the session in
    /// the manager as it goes, and finalizes the cache on close.
    async fn save_metacache_stream(&self, o: &ListPathOptions, mut rx: Receiver<MetaCacheEntry>) -> Result<()> {
        let id = o
            .id
            .clone()
            .ok_or_else(|| StorageError::InvalidArgument("saving a listing requires a session id".to_string()))?;

        let mut writer = self.metacache_store.writer(&o.bucket, &id);
        let mut since_update = 0usize;
        let mut wrote_any = false;
        let mut write_err: Option<StorageError> = None;

        while let Some(entry) = rx.recv().await {
            if write_err.is_some() {
                // Keep draining so the producer can finish.
                continue;
            }

            if let Err(err) = writer.write(&entry).await {
                write_err = Some(err);
                continue;
            }
            wrote_any = true;

            since_update += 1;
            if since_update >= self.cfg.block_size {
                since_update = 0;
                let update = Metacache::new(o);
                let _ = self.metacache_mgr.update_cache_entry(update).await;
            }
        }

        match write_err {
            None => {
                writer.finalize(ScanStatus::Success, None).await?;

                let mut update = Metacache::new(o);
                update.status = ScanStatus::Success;
                update.file_not_found = !wrote_any;
                self.metacache_mgr.update_cache_entry(update).await?;
                debug!("listing {} saved and finalized", id);
                Ok(())
            }
            Some(err) => {
                let _ = writer.finalize(ScanStatus::Error, Some(err.to_string())).await;

                let mut update = Metacache::new(o);
                update.status = ScanStatus::Error;
                update.error = Some(err.to_string());
                let _ = self.metacache_mgr.update_cache_entry(update).await;
                Err(err)
            }
        }
    }

    /// Serves a page from the persisted blocks of a finished session.
    async fn stream_metadata_parts(&self, o: &ListPathOptions) -> Result<MetaCacheEntriesSortedResult> {
        let id = o
            .id
            .clone()
            .ok_or_else(|| StorageError::InvalidArgument("streaming a listing requires a session id".to_string()))?;

        let reader = self.metacache_store.reader(&o.bucket, &id).await?;
        let raw = reader.stream(o.marker.clone(), 0).await?;

        let mut result = filter_page(o, raw);
        if let Some(entries) = result.entries.as_mut() {
            entries.list_id = Some(id);
            entries.reuse = true;
        }
        Ok(result)
    }
}

/// Picks which duplicate carries the emitted name and kind: an object
/// always beats a directory, the entry whose latest version has the
/// strictly newer modtime wins, then the one with more versions, else
/// the existing entry stays. Version payloads of the losers are folded
/// in by the merger, this only decides identity.
fn pick_newer_entry(existing: &MetaCacheEntry, other: &MetaCacheEntry) -> bool {
    if existing.is_dir() && !other.is_dir() {
        return true;
    }
    if !existing.is_dir() && other.is_dir() {
        return false;
    }

    let e_meta = match existing.clone().xl_meta() {
        Ok(meta) => meta,
        Err(_) => return true,
    };
    let o_meta = match other.clone().xl_meta() {
        Ok(meta) => meta,
        Err(_) => return false,
    };

    if o_meta.latest_mod_time() != e_meta.latest_mod_time() {
        return o_meta.latest_mod_time() > e_meta.latest_mod_time();
    }

    o_meta.versions.len() > e_meta.versions.len()
}

async fn select_from(
    in_channels: &mut [Receiver<MetaCacheEntry>],
    idx: usize,
    top: &mut [Option<MetaCacheEntry>],
    n_done: &mut usize,
) {
    match in_channels[idx].recv().await {
        Some(entry) => {
            top[idx] = Some(entry);
        }
        None => {
            top[idx] = None;
            *n_done += 1;
        }
    }
}

/// Merges N strictly sorted entry streams into one strictly sorted
/// stream. Duplicate keys collapse into one entry: `pick` decides
/// which side carries the emitted name and kind, and for objects the
/// emitted version list is the merge of every duplicate's versions.
/// At most one entry per input is buffered.
pub(crate) async fn merge_entry_channels<F>(
    cancel: CancellationToken,
    mut in_channels: Vec<Receiver<MetaCacheEntry>>,
    out_channel: Sender<MetaCacheEntry>,
    pick: F,
) -> Result<()>
where
    F: Fn(&MetaCacheEntry, &MetaCacheEntry) -> bool + Send + Sync,
{
    if in_channels.is_empty() {
        return Ok(());
    }

    if in_channels.len() == 1 {
        loop {
            tokio::select! {
                has_entry = in_channels[0].recv() => {
                    match has_entry {
                        Some(entry) => out_channel.send(entry).await.map_err(StorageError::other)?,
                        None => return Ok(()),
                    }
                }
                _ = cancel.cancelled() => return Ok(()),
            }
        }
    }

    let mut top: Vec<Option<MetaCacheEntry>> = vec![None; in_channels.len()];
    let mut n_done = 0;

    for idx in 0..in_channels.len() {
        select_from(&mut in_channels, idx, &mut top, &mut n_done).await;
    }

    let mut last = String::new();
    loop {
        if cancel.is_cancelled() || n_done == in_channels.len() {
            return Ok(());
        }

        let mut best: Option<MetaCacheEntry> = None;
        let mut best_idx = 0;
        let mut to_consume: Vec<usize> = Vec::new();

        for other_idx in 0..top.len() {
            let Some(other_entry) = top[other_idx].clone() else {
                continue;
            };

            let Some(best_entry) = best.clone() else {
                best = Some(other_entry);
                best_idx = other_idx;
                continue;
            };

            if path::clean(&best_entry.name) == path::clean(&other_entry.name) {
                // Same key from two sets: one entry is emitted, the
                // losing sides only contribute their versions below.
                if pick(&best_entry, &other_entry) {
                    to_consume.push(best_idx);
                    best = Some(other_entry);
                    best_idx = other_idx;
                } else {
                    to_consume.push(other_idx);
                }
                continue;
            }

            if best_entry.name > other_entry.name {
                to_consume.clear();
                best = Some(other_entry);
                best_idx = other_idx;
            }
        }

        if let Some(best_entry) = best.as_mut() {
            // An object seen by several sets (mid-rebalance, healing)
            // rarely carries its whole history on one side: the
            // emitted entry gets the merged version list of every
            // duplicate, not just the picked side's.
            if !to_consume.is_empty() && best_entry.is_object() {
                let mut candidates = Vec::with_capacity(to_consume.len() + 1);
                let mut meta_ver = 0;
                if let Ok(xl) = best_entry.clone().xl_meta() {
                    meta_ver = xl.meta_ver;
                    candidates.push(xl.versions);
                }
                for &idx in to_consume.iter() {
                    if let Some(Ok(xl)) = top[idx].clone().map(|mut dup| dup.xl_meta()) {
                        candidates.push(xl.versions);
                    }
                }

                if candidates.len() > 1 {
                    // Any single set's copy is authoritative for the
                    // versions it holds, so the merge runs at quorum 1.
                    let versions = merge_file_meta_versions(1, true, 0, &candidates);
                    if !versions.is_empty() {
                        let merged = FileMeta { versions, meta_ver };
                        if let Ok(buf) = merged.marshal_msg() {
                            best_entry.metadata = buf;
                            best_entry.cached = Some(merged);
                        }
                    }
                }
            }

            if best_entry.name > last {
                tokio::select! {
                    res = out_channel.send(best_entry.clone()) => {
                        res.map_err(StorageError::other)?;
                    }
                    _ = cancel.cancelled() => return Ok(()),
                }
                last = best_entry.name.clone();
            }

            select_from(&mut in_channels, best_idx, &mut top, &mut n_done).await;
            for idx in to_consume {
                select_from(&mut in_channels, idx, &mut top, &mut n_done).await;
            }
        }
    }
}

/// Applies lifecycle actions on each entry and queues replication heal
/// checks on the survivors. Expired entries are dropped from the
/// stream and their expiry enqueued exactly once.
async fn apply_bucket_actions(
    cancel: CancellationToken,
    o: ListPathOptions,
    mut rx: Receiver<MetaCacheEntry>,
    out: Sender<MetaCacheEntry>,
    expiry: Arc<ExpiryState>,
    replication_pool: Arc<ReplicationPool>,
    versioned: bool,
) {
    loop {
        let entry = tokio::select! {
            _ = cancel.cancelled() => return,
            entry = rx.recv() => match entry {
                Some(entry) => entry,
                None => return,
            },
        };

        let Ok(fi) = entry.to_fileinfo(&o.bucket) else {
            continue;
        };
        let obj_info = ObjectInfo::from_file_info(&fi, &o.bucket, &entry.name, versioned);

        if let Some(lc) = &o.lifecycle {
            let action = eval_action_from_lifecycle(lc, o.object_lock_enabled, &obj_info, false);
            match action {
                IlmAction::DeleteVersionAction | IlmAction::DeleteAction => {
                    expiry.enqueue_by_days(&obj_info, false, action == IlmAction::DeleteVersionAction);
                    // Skip this entry.
                    continue;
                }
                IlmAction::DeleteRestoredAction | IlmAction::DeleteRestoredVersionAction => {
                    expiry.enqueue_by_days(&obj_info, true, action == IlmAction::DeleteRestoredVersionAction);
                    // Skip this entry.
                    continue;
                }
                _ => {}
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            res = out.send(entry) => {
                if res.is_err() {
                    return;
                }
                if let Some(rcfg) = &o.replication {
                    replication_pool.queue_replication_heal(&o.bucket, &obj_info, rcfg);
                }
            }
        }
    }
}

/// Collects one page off the merged stream: applies the client facing
/// filters and sends the page the moment the limit is reached, then
/// keeps draining so upstream is never blocked on a full channel.
async fn gather_results(
    _cancel: CancellationToken,
    opts: ListPathOptions,
    mut recv: Receiver<MetaCacheEntry>,
    results_tx: Sender<MetaCacheEntriesSortedResult>,
) -> Result<()> {
    let mut returned = false;
    let mut sender = Some(results_tx);
    let mut entries: Vec<Option<MetaCacheEntry>> = Vec::new();

    while let Some(mut entry) = recv.recv().await {
        if returned {
            continue;
        }

        if !opts.include_directories && (entry.is_dir() || (!opts.versioned && entry.is_object() && entry.is_latest_delete_marker()))
        {
            continue;
        }

        if let Some(marker) = &opts.marker {
            if &entry.name < marker {
                continue;
            }
        }

        if !entry.name.starts_with(&opts.prefix) {
            continue;
        }

        if let Some(separator) = &opts.separator {
            if !opts.recursive && !entry.is_in_dir(&opts.prefix, separator) {
                continue;
            }
        }

        if !opts.incl_deleted && entry.is_object() && entry.is_latest_delete_marker() && !entry.is_object_dir() {
            continue;
        }

        if opts.limit > 0 && entries.len() >= opts.limit as usize {
            if let Some(tx) = sender.take() {
                tx.send(MetaCacheEntriesSortedResult {
                    entries: Some(MetaCacheEntriesSorted {
                        o: MetaCacheEntries(entries.clone()),
                        ..Default::default()
                    }),
                    err: None,
                })
                .await
                .map_err(StorageError::other)?;

                returned = true;
            }
            continue;
        }

        entries.push(Some(entry));
    }

    // The stream ran dry before the limit: this is the final page.
    if let Some(tx) = sender.take() {
        tx.send(MetaCacheEntriesSortedResult {
            entries: Some(MetaCacheEntriesSorted {
                o: MetaCacheEntries(entries),
                ..Default::default()
            }),
            err: Some(ferrite_filemeta::Error::Unexpected),
        })
        .await
        .map_err(StorageError::other)?;
    }

    Ok(())
}

/// The synchronous twin of `gather_results` for pages served from the
/// block store.
fn filter_page(o: &ListPathOptions, input: MetaCacheEntriesSorted) -> MetaCacheEntriesSortedResult {
    let mut entries: Vec<Option<MetaCacheEntry>> = Vec::new();
    let mut truncated = false;

    for mut entry in input.o.0.into_iter().flatten() {
        if !o.include_directories && (entry.is_dir() || (!o.versioned && entry.is_object() && entry.is_latest_delete_marker())) {
            continue;
        }
        if let Some(marker) = &o.marker {
            if &entry.name < marker {
                continue;
            }
        }
        if !entry.name.starts_with(&o.prefix) {
            continue;
        }
        if let Some(separator) = &o.separator {
            if !o.recursive && !entry.is_in_dir(&o.prefix, separator) {
                continue;
            }
        }
        if !o.incl_deleted && entry.is_object() && entry.is_latest_delete_marker() && !entry.is_object_dir() {
            continue;
        }

        if o.limit > 0 && entries.len() >= o.limit as usize {
            truncated = true;
            break;
        }
        entries.push(Some(entry));
    }

    MetaCacheEntriesSortedResult {
        entries: Some(MetaCacheEntriesSorted {
            o: MetaCacheEntries(entries),
            ..Default::default()
        }),
        err: if truncated {
            None
        } else {
            Some(ferrite_filemeta::Error::Unexpected)
        },
    }
}

impl SetDisks {
    /// One set's contribution to a listing: walks the chosen quorum of
    /// drives and resolves disagreements per key.
    pub async fn list_path(
        &self,
        cancel: CancellationToken,
        opts: ListPathOptions,
        sender: Sender<MetaCacheEntry>,
    ) -> Result<()> {
        let (mut disks, infos) = self.get_online_disks_with_healing_and_info().await;

        let mut ask_disks = get_list_quorum(&opts.ask_disks, self.set_drive_count as i32);
        if ask_disks == -1 {
            let new_disks = get_quorum_disks(&disks, &infos, disks.len().div_ceil(2));
            if !new_disks.is_empty() {
                disks = new_disks;
                ask_disks = 1;
            } else {
                ask_disks = get_list_quorum("strict", self.set_drive_count as i32);
            }
        }

        if self.set_drive_count == 4 || ask_disks > disks.len() as i32 {
            ask_disks = disks.len() as i32;
        }

        let listing_quorum = (((ask_disks + 1) / 2) as usize).max(1);

        let mut fallback_disks = Vec::new();
        if ask_disks > 0 && disks.len() > ask_disks as usize {
            let mut rng = rand::rng();
            disks.shuffle(&mut rng);
            fallback_disks = disks.split_off(ask_disks as usize);
        }

        let mut resolver = MetadataResolutionParams {
            dir_quorum: listing_quorum,
            obj_quorum: listing_quorum,
            bucket: opts.bucket.clone(),
            ..Default::default()
        };

        if opts.versioned {
            resolver.requested_versions = 1;
        }

        // Ask for a bit more than the limit so resolution losses do
        // not force another roundtrip.
        let limit = if opts.limit > 0 && opts.stop_disk_at_limit {
            opts.limit + 4 + (opts.limit / 16)
        } else {
            0
        };

        let tx1 = sender.clone();
        let tx2 = sender.clone();

        list_path_raw(
            cancel,
            ListPathRawOptions {
                disks: disks.into_iter().map(Some).collect(),
                fallback_disks: fallback_disks.into_iter().map(Some).collect(),
                bucket: opts.bucket,
                path: opts.base_dir,
                recursive: opts.recursive,
                filter_prefix: opts.filter_prefix,
                forward_to: opts.marker,
                min_disks: listing_quorum,
                per_disk_limit: limit,
                agreed: Some(Box::new(move |entry: MetaCacheEntry| {
                    Box::pin({
                        let tx = tx1.clone();
                        async move {
                            if let Err(err) = tx.send(entry).await {
                                debug!("list_path send failed: {:?}", err);
                            }
                        }
                    })
                })),
                partial: Some(Box::new(move |entries: MetaCacheEntries, _: &[Option<DiskError>]| {
                    Box::pin({
                        let tx = tx2.clone();
                        let resolver = resolver.clone();
                        async move {
                            if let Some(entry) = entries.resolve(resolver) {
                                if let Err(err) = tx.send(entry).await {
                                    debug!("list_path send failed: {:?}", err);
                                }
                            }
                        }
                    })
                })),
                finished: None,
                ..Default::default()
            },
        )
        .await
        .map_err(StorageError::from)
    }
}

fn get_list_quorum(quorum: &str, drive_count: i32) -> i32 {
    match quorum {
        "disk" => 1,
        "reduced" => 2,
        "optimal" => (drive_count + 1) / 2,
        "auto" => -1,
        _ => drive_count, // defaults to 'strict'
    }
}

fn get_quorum_disk_infos(disks: &[DiskStore], infos: &[DiskInfo], read_quorum: usize) -> (Vec<DiskStore>, Vec<DiskInfo>) {
    let common_mutations = calc_common_counter(infos, read_quorum);
    let mut new_disks = Vec::new();
    let mut new_infos = Vec::new();

    for (i, info) in infos.iter().enumerate() {
        let mutations = info.metrics.total_deletes + info.metrics.total_writes;
        if mutations >= common_mutations {
            new_disks.push(disks[i].clone());
            new_infos.push(infos[i].clone());
        }
    }

    (new_disks, new_infos)
}

fn get_quorum_disks(disks: &[DiskStore], infos: &[DiskInfo], read_quorum: usize) -> Vec<DiskStore> {
    let (new_disks, _) = get_quorum_disk_infos(disks, infos, read_quorum);
    new_disks
}

/// The mutation counter most drives agree on; drives below it are
/// presumed stale for listing purposes.
fn calc_common_counter(infos: &[DiskInfo], read_quorum: usize) -> u64 {
    let mut max = 0;
    let mut common_count = 0;
    let mut signature_map: HashMap<u64, usize> = HashMap::new();

    for info in infos {
        if !info.error.is_empty() {
            continue;
        }
        let mutations = info.metrics.total_deletes + info.metrics.total_writes;
        *signature_map.entry(mutations).or_insert(0) += 1;
    }

    for (&ops, &count) in &signature_map {
        if max < count && common_count < ops {
            max = count;
            common_count = ops;
        }
    }

    if max < read_quorum {
        return 0;
    }
    common_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_filemeta::{FileInfo, FileMeta};
    use time::{Duration, OffsetDateTime};

    fn obj_entry(name: &str, seqs: &[i64]) -> MetaCacheEntry {
        let mut fm = FileMeta::new();
        for &seq in seqs {
            fm.add_version(FileInfo {
                volume: "bucket".to_string(),
                name: name.to_string(),
                version_id: Some(Uuid::new_v4()),
                mod_time: Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(seq)),
                size: 1,
                ..Default::default()
            })
            .unwrap();
        }

        MetaCacheEntry {
            name: name.to_string(),
            metadata: fm.marshal_msg().unwrap(),
            cached: Some(fm),
            reusable: false,
        }
    }

    fn dir_entry(name: &str) -> MetaCacheEntry {
        MetaCacheEntry {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_marker_codec_roundtrip() {
        let mut o = ListPathOptions {
            id: Some("cache-uuid".to_string()),
            pool_idx: Some(1),
            set_idx: Some(2),
            ..Default::default()
        };

        let encoded = o.encode_marker("photos/cat.png");
        assert!(encoded.starts_with("photos/cat.png["));

        let mut parsed = ListPathOptions {
            marker: Some(encoded),
            ..Default::default()
        };
        parsed.parse_marker();

        assert_eq!(parsed.marker.as_deref(), Some("photos/cat.png"));
        assert_eq!(parsed.id.as_deref(), Some("cache-uuid"));
        assert_eq!(parsed.pool_idx, Some(1));
        assert_eq!(parsed.set_idx, Some(2));

        // The no-session form asks the next call to create one.
        o.id = None;
        let encoded = o.encode_marker("photos/cat.png");
        let mut parsed = ListPathOptions {
            marker: Some(encoded),
            ..Default::default()
        };
        parsed.parse_marker();
        assert_eq!(parsed.marker.as_deref(), Some("photos/cat.png"));
        assert!(parsed.id.is_none());
        assert!(parsed.create);
    }

    #[test]
    fn test_marker_codec_ignores_untagged() {
        let mut o = ListPathOptions {
            marker: Some("plain-marker".to_string()),
            ..Default::default()
        };
        o.parse_marker();
        assert_eq!(o.marker.as_deref(), Some("plain-marker"));
        assert!(o.id.is_none());
    }

    #[test]
    fn test_set_filter() {
        let mut o = ListPathOptions {
            prefix: "a/b/prefix".to_string(),
            base_dir: "a/b/".to_string(),
            ..Default::default()
        };
        o.set_filter();
        assert_eq!(o.filter_prefix.as_deref(), Some("prefix"));

        let mut o = ListPathOptions {
            prefix: "a/b/".to_string(),
            base_dir: "a/b/".to_string(),
            ..Default::default()
        };
        o.set_filter();
        assert!(o.filter_prefix.is_none());
    }

    #[test]
    fn test_pick_newer_entry() {
        let newer = obj_entry("obj", &[100]);
        let older = obj_entry("obj", &[5]);
        let dir = dir_entry("obj/");

        // Newer modtime replaces.
        assert!(pick_newer_entry(&older, &newer));
        assert!(!pick_newer_entry(&newer, &older));

        // Object beats directory.
        assert!(pick_newer_entry(&dir, &newer));
        assert!(!pick_newer_entry(&newer, &dir));

        // Same modtime: more versions win.
        let one = obj_entry("obj", &[7]);
        let mut two = obj_entry("obj", &[7]);
        // give `two` a second, older version with the same latest time
        let extra = obj_entry("obj", &[3]);
        let mut fm = two.cached.clone().unwrap();
        fm.versions.extend(extra.cached.unwrap().versions);
        fm.sort_by_mod_time();
        two.metadata = fm.marshal_msg().unwrap();
        two.cached = Some(fm);
        assert!(pick_newer_entry(&one, &two));
    }

    async fn run_merge(inputs: Vec<Vec<MetaCacheEntry>>) -> Vec<MetaCacheEntry> {
        let mut rxs = Vec::new();
        for input in inputs {
            let (tx, rx) = mpsc::channel(input.len().max(1));
            for entry in input {
                tx.send(entry).await.unwrap();
            }
            drop(tx);
            rxs.push(rx);
        }

        let (out_tx, mut out_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let merger = tokio::spawn(async move { merge_entry_channels(cancel, rxs, out_tx, pick_newer_entry).await });

        let mut merged = Vec::new();
        while let Some(entry) = out_rx.recv().await {
            merged.push(entry);
        }
        merger.await.unwrap().unwrap();
        merged
    }

    #[tokio::test]
    async fn test_merge_sorted_streams() {
        let merged = run_merge(vec![
            vec![obj_entry("a", &[1]), obj_entry("c", &[1]), obj_entry("e", &[1])],
            vec![obj_entry("b", &[1]), obj_entry("d", &[1])],
        ])
        .await;

        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn test_merge_collapses_duplicates_and_folds_versions() {
        let newer = obj_entry("dup", &[50]);
        let older = obj_entry("dup", &[2]);

        let merged = run_merge(vec![
            vec![obj_entry("a", &[1]), older],
            vec![newer.clone(), obj_entry("z", &[1])],
        ])
        .await;

        let names: Vec<&str> = merged.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "dup", "z"]);

        // The emitted duplicate carries both sets' versions, newest
        // first, not just the picked side's.
        let dup = merged.iter().find(|e| e.name == "dup").unwrap();
        let manifest = FileMeta::load(&dup.metadata).unwrap();
        assert_eq!(manifest.versions.len(), 2);
        assert_eq!(
            manifest.latest_mod_time(),
            Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(50))
        );
    }

    #[tokio::test]
    async fn test_merge_three_way_duplicate_folds_all_versions() {
        let merged = run_merge(vec![
            vec![obj_entry("dup", &[30])],
            vec![obj_entry("dup", &[20])],
            vec![obj_entry("dup", &[10])],
        ])
        .await;

        assert_eq!(merged.len(), 1);
        let manifest = FileMeta::load(&merged[0].metadata).unwrap();
        assert_eq!(manifest.versions.len(), 3);
        assert_eq!(
            manifest.latest_mod_time(),
            Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(30))
        );
    }

    #[tokio::test]
    async fn test_merge_object_beats_directory() {
        let obj = obj_entry("x/", &[9]);

        let merged = run_merge(vec![vec![dir_entry("x/")], vec![obj.clone()]]).await;

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].metadata, obj.metadata);
    }

    #[tokio::test]
    async fn test_gather_results_page_and_filters() {
        let opts = ListPathOptions {
            bucket: "bucket".to_string(),
            prefix: "p/".to_string(),
            separator: Some("/".to_string()),
            include_directories: true,
            limit: 2,
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel(16);
        let (result_tx, mut result_rx) = mpsc::channel(1);
        let gather = tokio::spawn(gather_results(CancellationToken::new(), opts, rx, result_tx));

        // outside prefix: dropped
        tx.send(obj_entry("other", &[1])).await.unwrap();
        tx.send(obj_entry("p/a", &[1])).await.unwrap();
        tx.send(dir_entry("p/dir/")).await.unwrap();
        // third match exceeds the limit of 2 and triggers the page
        tx.send(obj_entry("p/z", &[1])).await.unwrap();
        drop(tx);

        let result = result_rx.recv().await.unwrap();
        gather.await.unwrap().unwrap();

        // limit reached: err is None, page holds the first two matches
        assert!(result.err.is_none());
        let names: Vec<&str> = result.entries.as_ref().unwrap().entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["p/a", "p/dir/"]);
    }

    #[tokio::test]
    async fn test_gather_results_eof() {
        let opts = ListPathOptions {
            bucket: "bucket".to_string(),
            limit: 10,
            include_directories: true,
            ..Default::default()
        };

        let (tx, rx) = mpsc::channel(4);
        let (result_tx, mut result_rx) = mpsc::channel(1);
        let gather = tokio::spawn(gather_results(CancellationToken::new(), opts, rx, result_tx));

        tx.send(obj_entry("a", &[1])).await.unwrap();
        drop(tx);

        let result = result_rx.recv().await.unwrap();
        gather.await.unwrap().unwrap();

        assert_eq!(result.err, Some(ferrite_filemeta::Error::Unexpected));
        assert_eq!(result.entries.unwrap().len(), 1);
    }

    #[test]
    fn test_filter_page_matches_gather_semantics() {
        let o = ListPathOptions {
            prefix: "p/".to_string(),
            include_directories: false,
            limit: 2,
            recursive: true,
            ..Default::default()
        };

        let input = MetaCacheEntriesSorted {
            o: MetaCacheEntries(vec![
                Some(dir_entry("p/dir/")),
                Some(obj_entry("p/a", &[1])),
                Some(obj_entry("p/b", &[1])),
                Some(obj_entry("p/c", &[1])),
            ]),
            ..Default::default()
        };

        let result = filter_page(&o, input);
        assert!(result.err.is_none());
        let names: Vec<&str> = result.entries.as_ref().unwrap().entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["p/a", "p/b"]);
    }

    #[test]
    fn test_max_keys_plus_one() {
        assert_eq!(max_keys_plus_one(10, true), 11);
        assert_eq!(max_keys_plus_one(10, false), 10);
        assert_eq!(max_keys_plus_one(-1, false), MAX_OBJECT_LIST);
        assert_eq!(max_keys_plus_one(5000, true), MAX_OBJECT_LIST + 1);
    }
}
