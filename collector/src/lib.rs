//! chain-collector - block mirror and windowed statistics for bitcoind chains
//!
//! Provides:
//! - Block-by-block chain sync into SQLite with per-block hashrate estimates
//! - Optional `getblockstats` details and fiat prices per block
//! - Periodic JSON snapshots of bucketed statistics per coin and timeframe

pub mod config;
pub mod consts;
pub mod database;
pub mod error;
pub mod exchange_rate;
pub mod hashrate;
pub mod rpc;
pub mod stats;
pub mod sync;
pub mod tasks;
