//! Collector configuration
//!
//! Process flags come from the command line or the environment; the coin list
//! comes from a TOML file with one `[[coins]]` table per chain.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::consts::{SEED_HASH, SEED_HEIGHT};
use crate::rpc::RpcClient;

/// Block collector and statistics packer
#[derive(Parser, Debug, Clone)]
#[command(name = "chain-collector")]
#[command(about = "Mirrors blocks from bitcoind nodes and packages windowed statistics", long_about = None)]
pub struct Config {
    /// Coins file (TOML)
    #[arg(long, env = "COLLECTOR_COINS_FILE", default_value = "coins.toml")]
    pub coins_file: PathBuf,

    /// Database path
    #[arg(long, env = "COLLECTOR_DATABASE_PATH", default_value = "collector.db")]
    pub database_path: PathBuf,

    /// Directory packaged statistics are written to
    #[arg(long, env = "COLLECTOR_OUTPUT_DIR", default_value = "/tmp")]
    pub output_dir: PathBuf,

    /// Number of aggregation workers (defaults to available parallelism minus one)
    #[arg(long, env = "COLLECTOR_WORKERS")]
    pub workers: Option<usize>,

    /// Seconds between sync passes
    #[arg(long, env = "COLLECTOR_SYNC_INTERVAL_SECS", default_value = "5")]
    pub sync_interval_secs: u64,

    /// bitcoinaverage.com api public key
    #[arg(long, env = "FORKLOL_BTCAVG_PUBKEY", default_value = "")]
    pub btcavg_pubkey: String,

    /// bitcoinaverage.com api secret
    #[arg(long, env = "FORKLOL_BTCAVG_SECRET", default_value = "", hide_env_values = true)]
    pub btcavg_secret: String,
}

impl Config {
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(default_worker_count).max(1)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.max(1))
    }
}

/// Keep one core for sync and the runtime.
fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
}

/// A configured chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,

    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_pass: String,

    /// Collect `getblockstats` details for every block
    #[serde(default = "default_true")]
    pub rpc_stats: bool,

    /// Store details in the segwit column layout
    #[serde(default)]
    pub segwit: bool,

    /// HTTP timeout for node requests
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    /// Height assumed when the store has no blocks for this coin
    #[serde(default = "default_start_height")]
    pub start_height: u64,

    #[serde(default = "default_start_hash")]
    pub start_hash: String,

    #[serde(skip)]
    rpc: OnceLock<Arc<RpcClient>>,
}

fn default_true() -> bool {
    true
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_start_height() -> u64 {
    SEED_HEIGHT
}

fn default_start_hash() -> String {
    SEED_HASH.to_string()
}

impl Coin {
    pub fn new(symbol: &str, rpc_url: &str, rpc_user: &str, rpc_pass: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            rpc_url: rpc_url.to_string(),
            rpc_user: rpc_user.to_string(),
            rpc_pass: rpc_pass.to_string(),
            rpc_stats: true,
            segwit: false,
            rpc_timeout_secs: default_rpc_timeout_secs(),
            start_height: SEED_HEIGHT,
            start_hash: SEED_HASH.to_string(),
            rpc: OnceLock::new(),
        }
    }

    /// Node client, created on first use.
    pub fn rpc_client(&self) -> Arc<RpcClient> {
        self.rpc
            .get_or_init(|| {
                Arc::new(RpcClient::new(
                    &self.rpc_url,
                    &self.rpc_user,
                    &self.rpc_pass,
                    Duration::from_secs(self.rpc_timeout_secs),
                ))
            })
            .clone()
    }
}

/// Contents of the coins file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinsFile {
    #[serde(default)]
    pub coins: Vec<Coin>,
}

impl CoinsFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let file: CoinsFile = toml::from_str(contents)?;
        if file.coins.is_empty() {
            anyhow::bail!("no coins configured");
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coins_file_defaults() {
        let file = CoinsFile::parse(
            r#"
            [[coins]]
            symbol = "BTC"
            rpc_url = "http://127.0.0.1:8332/"
            rpc_user = "forklol"
            rpc_pass = "forklol"
            segwit = true

            [[coins]]
            symbol = "BCH"
            rpc_url = "http://127.0.0.1:8331/"
            rpc_user = "forklol"
            rpc_pass = "forklol"
            rpc_stats = false
            start_height = 0
            "#,
        )
        .unwrap();

        assert_eq!(file.coins.len(), 2);
        let btc = &file.coins[0];
        assert!(btc.segwit);
        assert!(btc.rpc_stats);
        assert_eq!(btc.start_height, SEED_HEIGHT);
        assert_eq!(btc.start_hash, SEED_HASH);

        let bch = &file.coins[1];
        assert!(!bch.segwit);
        assert!(!bch.rpc_stats);
        assert_eq!(bch.start_height, 0);
    }

    #[test]
    fn test_empty_coins_file_rejected() {
        assert!(CoinsFile::parse("").is_err());
    }

    #[test]
    fn test_rpc_client_created_once() {
        let coin = Coin::new("BTC", "http://127.0.0.1:8332", "u", "p");
        let a = coin.rpc_client();
        let b = coin.rpc_client();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_worker_count_never_zero() {
        let config = Config::parse_from(["chain-collector", "--workers", "0"]);
        assert_eq!(config.worker_count(), 1);
    }
}
