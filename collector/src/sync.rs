//! Chain sync
//!
//! Advances the store's mirror of one coin block by block up to the node's tip.
//! Every block is committed in its own transaction together with its hashrate
//! and detail rows; the `getblockstats` round trip runs alongside the inserts
//! and is joined before the transaction ends.

use std::sync::Arc;
use std::time::Instant;

use sqlx::{Sqlite, SqliteConnection, Transaction};
use tokio::task::JoinHandle;

use crate::config::Coin;
use crate::database::{self, CreateBlock, DetailLayout, FlatStats, LedgerStore};
use crate::error::{CollectorError, Result};
use crate::exchange_rate::ExchangeRateFetcher;
use crate::hashrate;
use crate::rpc::{LedgerRpc, RawBlockStats, RpcBlock};

pub struct ChainSync {
    coin: Arc<Coin>,
    remote: Arc<dyn LedgerRpc>,
    store: LedgerStore,
    prices: Option<Arc<ExchangeRateFetcher>>,
}

impl ChainSync {
    /// Sync `coin` through its own node client.
    pub fn new(coin: Arc<Coin>, store: LedgerStore) -> Self {
        let remote: Arc<dyn LedgerRpc> = coin.rpc_client();
        Self::with_remote(coin, remote, store)
    }

    pub fn with_remote(coin: Arc<Coin>, remote: Arc<dyn LedgerRpc>, store: LedgerStore) -> Self {
        Self { coin, remote, store, prices: None }
    }

    /// Also record the fiat price of every committed block.
    pub fn with_prices(mut self, prices: Arc<ExchangeRateFetcher>) -> Self {
        self.prices = Some(prices);
        self
    }

    pub fn coin(&self) -> &Coin {
        &self.coin
    }

    /// Bring the store up to the remote tip. Returns whether at least one
    /// block was committed. Failures end the pass early and are logged; the
    /// next pass resumes from the last committed height.
    pub async fn sync(&self) -> bool {
        let symbol = &self.coin.symbol;

        let (prev_height, prev_hash) = match self.store.get_last_block(symbol).await {
            Ok(Some(last)) => last,
            Ok(None) => (self.coin.start_height, self.coin.start_hash.clone()),
            Err(e) => {
                tracing::warn!("Could not get last {} block from database: {}", symbol, e);
                return false;
            }
        };

        let (height, hash) = match self.remote.get_last_block().await {
            Ok(tip) => tip,
            Err(e) => {
                tracing::warn!("Could not get last block from {} chain: {}", symbol, e);
                return false;
            }
        };

        if prev_height < height {
            tracing::info!(
                "Syncing {} chain to block {} (from {}, {} blocks)",
                symbol,
                height,
                prev_height,
                height - prev_height
            );
            return self.sync_from_height(prev_height, height).await > 0;
        }

        if prev_hash != hash {
            // Same height, different hash: reorgs are not handled.
            tracing::debug!(
                "{} tip {} differs from stored block {} at height {}",
                symbol,
                hash,
                prev_hash,
                prev_height
            );
        }

        false
    }

    /// Handle heights `prev_height + 1 ..= height` in order, stopping at the
    /// first failure. Returns the number of committed blocks.
    async fn sync_from_height(&self, prev_height: u64, height: u64) -> u64 {
        let symbol = &self.coin.symbol;
        let mut committed = 0;

        for h in (prev_height + 1)..=height {
            let hash = match self.remote.get_block_hash(h).await {
                Ok(hash) => hash,
                Err(e) => {
                    tracing::warn!(
                        "Error getting {} blockhash at height {}, aborting sync at this height: {}",
                        symbol,
                        h,
                        e
                    );
                    break;
                }
            };

            let block = match self.remote.get_block(&hash).await {
                Ok(block) => block,
                Err(e) => {
                    tracing::warn!(
                        "Error getting {} block info at height {}, aborting sync at this height: {}",
                        symbol,
                        h,
                        e
                    );
                    break;
                }
            };

            tracing::info!("\u{2794} Handling new {} block {}, {} ({} left)", symbol, h, hash, height - h);
            let start = Instant::now();
            match self.handle_new_block(&block).await {
                Ok(()) => {
                    committed += 1;
                    tracing::info!(
                        "\u{2714} New {} block {} handled in {:?}",
                        symbol,
                        block.height,
                        start.elapsed()
                    );
                    self.record_price(&block).await;
                }
                Err(e) => {
                    tracing::error!(
                        "\u{2718} Error handling {} block {}, skipping other blocks: {}",
                        symbol,
                        block.height,
                        e
                    );
                    break;
                }
            }
        }

        committed
    }

    /// Persist one block with its hashrates and details, all or nothing.
    async fn handle_new_block(&self, block: &RpcBlock) -> Result<()> {
        let side_fetch = self.spawn_collect_stats(block.height);

        let staged = self.stage_block(block).await;

        // Joined on every path before the transaction ends.
        let stats = join_side_fetch(side_fetch).await;

        let (mut tx, inserted) = staged?;
        if let Err(e) = inserted {
            tx.rollback().await?;
            return Err(e);
        }

        match stats {
            None => {}
            Some(Err(e)) => {
                tracing::warn!("Could not get {} block stats through rpc: {}", self.coin.symbol, e);
                tx.rollback().await?;
                return Err(CollectorError::MissingStats(block.height));
            }
            Some(Ok(stats)) => {
                let layout = DetailLayout::for_segwit(self.coin.segwit);
                if let Err(e) = database::insert_details(&mut tx, block.height, &stats, layout).await {
                    tracing::warn!("Could not insert block details into database: {}", e);
                    tx.rollback().await?;
                    return Err(e);
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Open the block's transaction and insert its block and hashrate rows.
    /// The transaction is handed back even when the inserts failed so the
    /// caller decides when it ends.
    async fn stage_block(
        &self,
        block: &RpcBlock,
    ) -> Result<(Transaction<'static, Sqlite>, Result<()>)> {
        let prev_work = match block.height.checked_sub(1) {
            Some(prev) => self
                .store
                .get_block(&self.coin.symbol, prev)
                .await?
                .map(|b| b.work)
                .unwrap_or(0.0),
            None => 0.0,
        };

        let mut tx = self.store.begin().await?;
        let inserted = self.insert_block_rows(&mut tx, block, prev_work).await;
        Ok((tx, inserted))
    }

    /// Block row then hashrate row, inside the block's transaction.
    async fn insert_block_rows(
        &self,
        conn: &mut SqliteConnection,
        block: &RpcBlock,
        prev_work: f64,
    ) -> Result<()> {
        let row = CreateBlock {
            coin: self.coin.symbol.clone(),
            hash: block.hash.clone(),
            height: block.height,
            time: block.time,
            difficulty: block.difficulty,
            work: prev_work + block.difficulty,
        };
        database::insert_block(conn, &row).await?;

        let rates = hashrate::determine_hashrates(
            conn,
            &self.coin.symbol,
            block.time as i64,
            block.difficulty,
        )
        .await?;
        database::insert_hashrates(conn, &self.coin.symbol, block.height, &rates).await
    }

    /// Prices live outside the block transaction; a failed fetch only leaves
    /// a gap in the price statistics.
    async fn record_price(&self, block: &RpcBlock) {
        let Some(prices) = &self.prices else {
            return;
        };
        if let Err(e) = prices.get_exchange_rate(block.height, block.time).await {
            tracing::warn!("Could not get {} price for block {}: {}", self.coin.symbol, block.height, e);
        }
    }

    /// Start the `getblockstats` fetch if the coin collects details.
    fn spawn_collect_stats(&self, height: u64) -> Option<JoinHandle<Result<FlatStats>>> {
        if !self.coin.rpc_stats {
            return None;
        }

        let remote = self.remote.clone();
        let symbol = self.coin.symbol.clone();
        Some(tokio::spawn(async move {
            let raw = remote.get_block_stats(height).await?;
            Ok(flatten_block_stats(&symbol, raw))
        }))
    }
}

/// Wait for the side fetch; a panicked task counts as a failed fetch.
async fn join_side_fetch(
    handle: Option<JoinHandle<Result<FlatStats>>>,
) -> Option<Result<FlatStats>> {
    let handle = handle?;
    Some(match handle.await {
        Ok(result) => result,
        Err(e) => Err(CollectorError::Io(std::io::Error::other(e))),
    })
}

/// Keep the first element of every `[value, ...]` metric and tag the coin.
pub fn flatten_block_stats(symbol: &str, raw: RawBlockStats) -> FlatStats {
    let mut flat: FlatStats = raw
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Array(values) => values.into_iter().next().map(|v| (key, v)),
            other => Some((key, other)),
        })
        .collect();
    flat.insert("coin".to_string(), serde_json::Value::String(symbol.to_string()));
    flat
}
