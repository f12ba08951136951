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

mod config;

use clap::Parser;
use ferrite_ecstore::cache_value::metacache_manager::MetacacheConfig;
use ferrite_ecstore::endpoints::EndpointServerPools;
use ferrite_ecstore::store::{BackgroundQueues, ECStore};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const METACACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opt = config::Opt::parse();

    // Plan the endpoint grid before anything touches a drive; a bad
    // layout is fatal and decides the process exit code.
    let endpoint_pools = match EndpointServerPools::from_volumes(&opt.volumes) {
        Ok(pools) => pools,
        Err(err) => {
            error!("endpoint layout rejected: {err}");
            std::process::exit(err.exit_code());
        }
    };

    for (i, pool) in endpoint_pools.0.iter().enumerate() {
        info!(
            "pool {}: {} set(s) of {} drive(s) [{}]",
            i, pool.set_count, pool.drives_per_set, pool.cmd_line
        );
    }

    let cfg = MetacacheConfig {
        block_size: opt.metacache_block_size,
        finished_ttl: Duration::from_secs(opt.metacache_finished_ttl),
        ..Default::default()
    };

    let (store, queues) = match ECStore::new(endpoint_pools, cfg).await {
        Ok(res) => res,
        Err(err) => {
            error!("store initialization failed: {err}");
            std::process::exit(1);
        }
    };

    // The scrubber and replication workers live with their own
    // subsystems; the queues must still be drained here so the listing
    // path never sees them closed.
    let BackgroundQueues {
        mut expiry_rx,
        mut replication_rx,
    } = queues;
    tokio::spawn(async move {
        while let Some(task) = expiry_rx.recv().await {
            tracing::debug!("expiry queued: {}/{}", task.bucket, task.object);
        }
    });
    tokio::spawn(async move {
        while let Some(task) = replication_rx.recv().await {
            tracing::debug!("replication heal queued: {}/{}", task.bucket, task.object);
        }
    });

    info!("FerriteFS Object Storage Server");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", opt.address);

    // Periodic listing cache maintenance.
    let maintenance_store = store.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(METACACHE_CLEANUP_INTERVAL);
        loop {
            tick.tick().await;
            maintenance_store.cleanup_metacaches().await;
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to wait for shutdown signal: {err}");
    }
    info!("shutting down");
}
