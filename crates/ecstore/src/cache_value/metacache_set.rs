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

use ferrite_disk::error::{DiskError, Result};
use ferrite_disk::{DiskAPI, DiskStore, WalkDirOptions};
use ferrite_filemeta::{MetaCacheEntries, MetaCacheEntry, MetacacheReader, is_io_eof};
use futures::future::join_all;
use std::{future::Future, pin::Pin, sync::Arc};
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

pub type AgreedFn = Box<dyn Fn(MetaCacheEntry) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static>;
pub type PartialFn =
    Box<dyn Fn(MetaCacheEntries, &[Option<DiskError>]) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static>;
pub type FinishedFn = Box<dyn Fn(&[Option<DiskError>]) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + 'static>;

/// One erasure set's raw listing fan-out. Entries every drive agrees on
/// go through `agreed`; disagreements are handed to `partial` together
/// with the per-drive errors for quorum resolution.
#[derive(Default)]
pub struct ListPathRawOptions {
    pub disks: Vec<Option<DiskStore>>,
    pub fallback_disks: Vec<Option<DiskStore>>,
    pub bucket: String,
    pub path: String,
    pub recursive: bool,
    pub filter_prefix: Option<String>,
    pub forward_to: Option<String>,
    /// Minimum number of drives that must answer.
    pub min_disks: usize,
    pub report_not_found: bool,
    /// Per-drive walk limit, 0 means unlimited.
    pub per_disk_limit: i32,
    pub agreed: Option<AgreedFn>,
    pub partial: Option<PartialFn>,
    pub finished: Option<FinishedFn>,
}

/// Pipe buffer between a walking drive and its stream reader. Small on
/// purpose: a slow consumer throttles the walk instead of buffering a
/// whole directory level in memory.
const WALK_PIPE_BUF: usize = 64;

/// What a stream's head looked like when peeked this round.
enum StreamHead {
    Entry(MetaCacheEntry),
    Drained,
    NotFound,
    VolNotFound,
    Failed,
}

/// Per-round bookkeeping across every stream of the set. Missing-path
/// streams count as drained too: a drive without the directory simply
/// contributes nothing, it does not block the merge.
#[derive(Default)]
struct RoundTally {
    drained: usize,
    not_found: usize,
    vol_not_found: usize,
    failed: usize,
}

impl RoundTally {
    /// True once `count` streams reported the path missing and the
    /// remaining ones can no longer deliver `min_disks` answers. Only
    /// then is the whole path treated as absent; a single lagging
    /// drive must not erase a directory from the listing.
    fn missing_beyond_quorum(&self, count: usize, total: usize, min_disks: usize) -> bool {
        count > 0 && count >= total.saturating_sub(min_disks)
    }

    /// True once so many streams failed hard that quorum is out of
    /// reach even if every remaining drive answers.
    fn failed_beyond_quorum(&self, total: usize, min_disks: usize) -> bool {
        self.failed > 0 && self.failed > total.saturating_sub(min_disks)
    }
}

/// Sorts a peek failure into its stream-head class. Only unexpected
/// failures occupy the error slot; a clean trailer, a torn pipe and a
/// missing path are all normal ends of a stream.
fn classify_peek_error(err: ferrite_filemeta::Error, slot: &mut Option<DiskError>) -> StreamHead {
    if err == ferrite_filemeta::Error::Unexpected || is_io_eof(&err) {
        return StreamHead::Drained;
    }
    if err == ferrite_filemeta::Error::FileNotFound {
        return StreamHead::NotFound;
    }
    if err == ferrite_filemeta::Error::VolumeNotFound {
        return StreamHead::VolNotFound;
    }
    *slot = Some(err.into());
    StreamHead::Failed
}

fn combined_disk_error(errs: &[Option<DiskError>], disks: &[Option<DiskStore>]) -> DiskError {
    let mut parts = Vec::new();
    for (err, disk) in errs.iter().zip(disks.iter()) {
        match (err, disk) {
            (Some(err), Some(disk)) => parts.push(format!("drive {} returned: {}", disk.to_string(), err)),
            (Some(err), None) => parts.push(err.to_string()),
            _ => {}
        }
    }

    error!("list_path_raw: below quorum: {}", parts.join(", "));
    DiskError::other(parts.join(", "))
}

/// Runs one drive's walk, streaming entries into a pipe. A failing
/// primary is retried once on the first healthy fallback drive; there
/// is no point cycling further, the fallback pool shares the fate of
/// the set.
fn spawn_walker(
    disk: Option<DiskStore>,
    fallbacks: Arc<Vec<Option<DiskStore>>>,
    opts: WalkDirOptions,
    cancel: CancellationToken,
) -> (MetacacheReader<DuplexStream>, JoinHandle<()>) {
    let (rd, mut wr) = tokio::io::duplex(WALK_PIPE_BUF);

    let handle = tokio::spawn(async move {
        let primary_ok = match &disk {
            Some(disk) => match disk.walk_dir(opts.clone(), &mut wr).await {
                Ok(()) => true,
                Err(err) => {
                    error!("walk_dir failed: {:?}", err);
                    false
                }
            },
            None => false,
        };

        if primary_ok || cancel.is_cancelled() {
            return;
        }

        match fallbacks.iter().flatten().next() {
            Some(spare) => {
                if let Err(err) = spare.walk_dir(opts, &mut wr).await {
                    error!("fallback walk_dir failed: {:?}", err);
                }
            }
            None => warn!("list_path_raw: no fallback drive available"),
        }
    });

    (MetacacheReader::new(rd), handle)
}

/// Walks the requested path on every drive of the set concurrently and
/// resolves the streams key by key. Each round looks at the head of
/// every live stream, keeps only the lowest key, and either emits it
/// through `agreed` (every stream carries an identical entry) or hands
/// the candidates to `partial` for quorum resolution. Streams whose
/// head sorts later stay untouched; their entries are served again in
/// a later round.
pub async fn list_path_raw(cancel: CancellationToken, opts: ListPathRawOptions) -> Result<()> {
    if opts.disks.is_empty() {
        return Err(DiskError::other("list_path_raw: 0 drives provided"));
    }

    let walk_opts = WalkDirOptions {
        bucket: opts.bucket.clone(),
        base_dir: opts.path.clone(),
        recursive: opts.recursive,
        report_notfound: opts.report_not_found,
        filter_prefix: opts.filter_prefix.clone(),
        forward_to: opts.forward_to.clone(),
        limit: opts.per_disk_limit,
    };

    let fallbacks = Arc::new(opts.fallback_disks.clone());
    let walkers_cancel = CancellationToken::new();

    let mut readers = Vec::with_capacity(opts.disks.len());
    let mut walkers = Vec::with_capacity(opts.disks.len());
    for disk in opts.disks.iter() {
        let (reader, handle) = spawn_walker(disk.clone(), fallbacks.clone(), walk_opts.clone(), walkers_cancel.clone());
        readers.push(reader);
        walkers.push(handle);
    }

    let total = readers.len();
    let mut errs: Vec<Option<DiskError>> = vec![None; total];

    let outcome = loop {
        if cancel.is_cancelled() {
            break Err(DiskError::other("canceled"));
        }

        let mut tally = RoundTally::default();
        let mut candidates: Vec<Option<MetaCacheEntry>> = vec![None; total];
        let mut lowest: Option<MetaCacheEntry> = None;

        for (i, reader) in readers.iter_mut().enumerate() {
            if errs[i].is_some() {
                tally.failed += 1;
                continue;
            }

            let head = match reader.peek().await {
                Ok(Some(entry)) => StreamHead::Entry(entry),
                Ok(None) => StreamHead::Drained,
                Err(err) => classify_peek_error(err, &mut errs[i]),
            };

            let entry = match head {
                StreamHead::Entry(entry) => entry,
                StreamHead::Drained => {
                    tally.drained += 1;
                    continue;
                }
                StreamHead::NotFound => {
                    tally.drained += 1;
                    tally.not_found += 1;
                    continue;
                }
                StreamHead::VolNotFound => {
                    tally.drained += 1;
                    tally.not_found += 1;
                    tally.vol_not_found += 1;
                    continue;
                }
                StreamHead::Failed => {
                    tally.failed += 1;
                    continue;
                }
            };

            match &lowest {
                None => {
                    candidates[i] = Some(entry.clone());
                    lowest = Some(entry);
                }
                Some(low) => {
                    if entry.name == low.name {
                        candidates[i] = Some(entry);
                    } else if entry.name < low.name {
                        // A lower key restarts the round here. Heads
                        // already collected sort later and wait.
                        for slot in candidates.iter_mut().take(i) {
                            *slot = None;
                        }
                        candidates[i] = Some(entry.clone());
                        lowest = Some(entry);
                    }
                }
            }
        }

        if tally.missing_beyond_quorum(tally.vol_not_found, total, opts.min_disks) {
            break Err(DiskError::VolumeNotFound);
        }
        if tally.missing_beyond_quorum(tally.not_found, total, opts.min_disks) {
            break Err(DiskError::FileNotFound);
        }
        if tally.failed_beyond_quorum(total, opts.min_disks) {
            if let Some(finished) = opts.finished.as_ref() {
                finished(&errs).await;
            }
            break Err(combined_disk_error(&errs, &opts.disks));
        }
        if tally.drained + tally.failed == total {
            if tally.failed > 0 {
                if let Some(finished) = opts.finished.as_ref() {
                    finished(&errs).await;
                }
            }
            break Ok(());
        }

        // Strict agreement against the lowest head decides the path:
        // full agreement short-circuits resolution entirely.
        let mut agreeing = 0;
        for candidate in candidates.iter().flatten() {
            match &lowest {
                Some(low) => {
                    if let (_, true) = low.matches(Some(candidate), true) {
                        agreeing += 1;
                    }
                }
                None => {}
            }
        }

        // Consume exactly the candidate heads; everything else is
        // still queued for a later round.
        for (i, reader) in readers.iter_mut().enumerate() {
            if candidates[i].is_some() {
                let _ = reader.skip(1).await;
            }
        }

        if agreeing == total {
            if let Some(agreed) = opts.agreed.as_ref() {
                if let Some(entry) = lowest {
                    agreed(entry).await;
                }
            }
            continue;
        }

        if let Some(partial) = opts.partial.as_ref() {
            partial(MetaCacheEntries(candidates), &errs).await;
        }
    };

    match outcome {
        Ok(()) => {
            for result in join_all(walkers).await {
                if let Err(err) = result {
                    error!("list_path_raw walker join error: {:?}", err);
                }
            }
            Ok(())
        }
        Err(err) => {
            // Dropping the readers breaks the pipes, which unblocks
            // any walker still writing.
            walkers_cancel.cancel();
            drop(readers);
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrite_disk::LocalDisk;
    use ferrite_filemeta::{FileInfo, FileMeta, MetadataResolutionParams};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::{Duration, OffsetDateTime};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    async fn empty_disk() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let disk = LocalDisk::new("/test", dir.path()).await.unwrap();
        disk.make_volume("bucket").await.unwrap();
        (dir, Arc::new(disk))
    }

    fn manifest(name: &str, seq: i64) -> Vec<u8> {
        let mut fm = FileMeta::new();
        fm.add_version(FileInfo {
            volume: "bucket".to_string(),
            name: name.to_string(),
            version_id: Some(Uuid::new_v4()),
            mod_time: Some(OffsetDateTime::UNIX_EPOCH + Duration::seconds(seq)),
            size: 1,
            ..Default::default()
        })
        .unwrap();
        fm.marshal_msg().unwrap()
    }

    struct Collected {
        names: Vec<String>,
        partial_calls: usize,
    }

    /// Drives a two-callback run and collects every emitted entry, the
    /// way a set wires the hooks into its output channel.
    async fn run_raw(disks: Vec<Option<DiskStore>>, min_disks: usize) -> Result<Collected> {
        let (tx, mut rx) = mpsc::channel(64);
        let partial_calls = Arc::new(AtomicUsize::new(0));

        let tx1 = tx.clone();
        let tx2 = tx.clone();
        drop(tx);
        let partial_seen = partial_calls.clone();

        let res = list_path_raw(
            CancellationToken::new(),
            ListPathRawOptions {
                disks,
                bucket: "bucket".to_string(),
                recursive: true,
                min_disks,
                agreed: Some(Box::new(move |entry: MetaCacheEntry| {
                    Box::pin({
                        let tx = tx1.clone();
                        async move {
                            let _ = tx.send(entry).await;
                        }
                    })
                })),
                partial: Some(Box::new(move |entries: MetaCacheEntries, _: &[Option<DiskError>]| {
                    partial_seen.fetch_add(1, Ordering::Relaxed);
                    Box::pin({
                        let tx = tx2.clone();
                        async move {
                            let resolved = entries.resolve(MetadataResolutionParams {
                                dir_quorum: 1,
                                obj_quorum: 1,
                                bucket: "bucket".to_string(),
                                ..Default::default()
                            });
                            if let Some(entry) = resolved {
                                let _ = tx.send(entry).await;
                            }
                        }
                    })
                })),
                ..Default::default()
            },
        )
        .await;

        // Callbacks were dropped with the options, the channel is closed.
        let mut names = Vec::new();
        while let Some(entry) = rx.recv().await {
            names.push(entry.name);
        }

        res.map(|_| Collected {
            names,
            partial_calls: partial_calls.load(Ordering::Relaxed),
        })
    }

    #[tokio::test]
    async fn test_identical_drives_agree() {
        let (_t1, d1) = empty_disk().await;
        let (_t2, d2) = empty_disk().await;

        for name in ["alpha", "beta", "gamma"] {
            let buf = manifest(name, 1);
            d1.write_metadata("bucket", name, &buf).await.unwrap();
            d2.write_metadata("bucket", name, &buf).await.unwrap();
        }

        let collected = run_raw(vec![Some(d1), Some(d2)], 1).await.unwrap();
        assert_eq!(collected.names, vec!["alpha", "beta", "gamma"]);
        assert_eq!(collected.partial_calls, 0, "identical drives never need resolution");
    }

    #[tokio::test]
    async fn test_divergent_drives_resolve_per_key() {
        let (_t1, d1) = empty_disk().await;
        let (_t2, d2) = empty_disk().await;

        let shared = manifest("both", 1);
        d1.write_metadata("bucket", "both", &shared).await.unwrap();
        d2.write_metadata("bucket", "both", &shared).await.unwrap();
        // Only one drive has seen this object yet.
        d1.write_metadata("bucket", "only-one", &manifest("only-one", 2)).await.unwrap();

        let collected = run_raw(vec![Some(d1), Some(d2)], 1).await.unwrap();
        assert_eq!(collected.names, vec!["both", "only-one"], "resolution must not lose the lone copy");
        assert_eq!(collected.partial_calls, 1);
    }

    #[tokio::test]
    async fn test_later_heads_survive_resolution_rounds() {
        let (_t1, d1) = empty_disk().await;
        let (_t2, d2) = empty_disk().await;

        // Drive one runs ahead: its head key sorts after everything
        // drive two carries, so it must sit out several rounds without
        // losing its entry.
        d1.write_metadata("bucket", "zz-last", &manifest("zz-last", 1)).await.unwrap();
        for name in ["aa", "bb", "cc"] {
            d2.write_metadata("bucket", name, &manifest(name, 1)).await.unwrap();
        }

        let collected = run_raw(vec![Some(d1), Some(d2)], 1).await.unwrap();
        assert_eq!(collected.names, vec!["aa", "bb", "cc", "zz-last"]);
    }

    #[tokio::test]
    async fn test_no_drives_is_an_error() {
        let res = list_path_raw(
            CancellationToken::new(),
            ListPathRawOptions {
                bucket: "bucket".to_string(),
                ..Default::default()
            },
        )
        .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_offline_slot_falls_back() {
        let (_t1, d1) = empty_disk().await;
        let (_t2, fallback) = empty_disk().await;

        let buf = manifest("obj", 1);
        d1.write_metadata("bucket", "obj", &buf).await.unwrap();
        fallback.write_metadata("bucket", "obj", &buf).await.unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let res = list_path_raw(
            CancellationToken::new(),
            ListPathRawOptions {
                // The second slot has no drive and walks the fallback.
                disks: vec![Some(d1), None],
                fallback_disks: vec![Some(fallback)],
                bucket: "bucket".to_string(),
                recursive: true,
                min_disks: 1,
                agreed: Some(Box::new(move |entry: MetaCacheEntry| {
                    Box::pin({
                        let tx = tx.clone();
                        async move {
                            let _ = tx.send(entry).await;
                        }
                    })
                })),
                ..Default::default()
            },
        )
        .await;
        res.unwrap();

        assert_eq!(rx.recv().await.map(|e| e.name), Some("obj".to_string()));
    }
}
