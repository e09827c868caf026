//! Background tasks for the collector
//!
//! - Chain sync for every coin on a fixed interval
//! - Statistics packaging whenever a sync pass committed new blocks

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::Coin;
use crate::stats::Packer;
use crate::sync::ChainSync;

/// Sync every coin concurrently. Returns whether any coin committed a block.
pub async fn sync_all(syncers: &[Arc<ChainSync>]) -> bool {
    let committed = join_all(syncers.iter().map(|s| s.sync())).await;
    committed.into_iter().any(|c| c)
}

/// Spawn the sync loop. The first pass runs one `period` after start, the
/// initial sync being done by the caller.
pub fn spawn_sync_loop(
    syncers: Vec<Arc<ChainSync>>,
    period: Duration,
    package: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if sync_all(&syncers).await {
                package.notify_one();
            }
        }
    })
}

/// Spawn the packaging task. Runs one pass per wakeup; wakeups that arrive
/// during a pass collapse into a single follow-up pass.
pub fn spawn_packaging(
    packer: Arc<Packer>,
    coins: Vec<Arc<Coin>>,
    package: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            package.notified().await;
            match packer.package(&coins).await {
                Ok(written) => tracing::debug!("Packaging pass wrote {} snapshots", written),
                Err(e) => tracing::error!("Packaging pass failed: {}", e),
            }
        }
    })
}
