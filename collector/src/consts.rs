/// Unix time of the BTC/BCH chain split.
pub const CHAINSPLIT_TIMESTAMP: i64 = 1_501_593_374;
pub const CHAINSPLIT_HEIGHT: u64 = 478_558;

/// Unix time of the first block after genesis.
pub const GENESIS_TIMESTAMP: i64 = 1_231_469_665;

/// Cold-start seed: a block from before the fork.
pub const SEED_HEIGHT: u64 = 478_001;
pub const SEED_HASH: &str = "000000000000000001211f05ea9cf34d5a9710ca2ab7572b9d79273924e030ae";

/// Target block spacing in seconds.
pub const TARGET_SPACING: f64 = 600.0;

/// Buckets per packaged window.
pub const NUM_STEPS: i64 = 72;
