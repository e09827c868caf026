//! Packaging of windowed statistics.
//!
//! A pass resolves every timeframe for every coin, submits one job per preset
//! and writes each window's JSON snapshot as soon as all of its presets have
//! come back. Windows complete independently and in any order.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use super::compacter::{step_size, CompactBasis, Compacter};
use super::dispatcher::{Dispatcher, Job};
use super::presets::PresetRegistry;
use super::statistic::StatValue;
use super::timeframe::{Timeframe, Window};
use crate::config::Coin;
use crate::consts::NUM_STEPS;
use crate::database::LedgerStore;
use crate::error::Result;

/// Snapshot of every preset over one window of one coin.
#[derive(Debug, Clone, Serialize)]
pub struct PackedStats {
    pub step: i64,
    pub from: i64,
    pub to: i64,
    pub range: i64,
    pub compacter: CompactBasis,
    pub index: Vec<i64>,
    pub values: BTreeMap<String, Vec<Option<StatValue>>>,
}

impl PackedStats {
    fn new(compacter: &Compacter) -> Self {
        let index = compacter.index();
        Self {
            step: compacter.step(),
            from: compacter.from(),
            to: compacter.to(),
            range: compacter.to() - compacter.from(),
            compacter: compacter.basis(),
            index,
            values: BTreeMap::new(),
        }
    }
}

pub struct Packer {
    store: LedgerStore,
    presets: Arc<PresetRegistry>,
    timeframes: Vec<Timeframe>,
    dispatcher: Arc<Dispatcher>,
    output_dir: PathBuf,
}

impl Packer {
    pub fn new(
        store: LedgerStore,
        presets: Arc<PresetRegistry>,
        dispatcher: Arc<Dispatcher>,
        output_dir: &Path,
    ) -> Self {
        Self {
            store,
            presets,
            timeframes: Timeframe::standard(),
            dispatcher,
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn with_timeframes(mut self, timeframes: Vec<Timeframe>) -> Self {
        self.timeframes = timeframes;
        self
    }

    /// Output file for one window: `<basis>_<coin>_<id>.json`.
    pub fn output_path(&self, coin: &str, window: &Window) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}_{}.json",
            window.basis.as_str(),
            coin.to_lowercase(),
            window.id
        ))
    }

    /// Run one packaging pass. Returns the number of snapshots written.
    pub async fn package(&self, coins: &[Arc<Coin>]) -> Result<usize> {
        let start = Instant::now();
        tracing::info!("\u{2794} Packing new statistics..");

        let Some(last_time) = self.store.get_last_time().await? else {
            tracing::info!("No blocks stored yet, nothing to pack");
            return Ok(0);
        };
        let last_heights = self.store.get_last_heights().await?;

        // Held for the whole pass so results of concurrent passes never mix.
        let mut results = self.dispatcher.results().await;

        let mut pending: HashMap<(String, String), PackedStats> = HashMap::new();
        let mut submitted = 0;

        for tf in &self.timeframes {
            for coin in coins {
                let symbol = &coin.symbol;
                let last_height = last_heights.get(symbol).copied();

                let window = match tf.resolve(last_height, last_time) {
                    Some(window) if !window.is_empty() => window,
                    _ => {
                        tracing::debug!("Skipping empty {} window {} for {}", tf.basis().as_str(), tf.id, symbol);
                        continue;
                    }
                };

                let step = step_size(window.from, window.to, NUM_STEPS);
                let compacter = Compacter::new(window.basis, window.from, window.to, step);
                pending.insert((symbol.clone(), window.key()), PackedStats::new(&compacter));

                for (name, preset) in self.presets.iter() {
                    let job = Job {
                        coin: symbol.clone(),
                        preset_name: name.to_string(),
                        preset: *preset,
                        window: window.clone(),
                        step,
                    };
                    if self.dispatcher.submit(job) {
                        submitted += 1;
                    } else {
                        tracing::error!("Stats dispatcher is gone, could not submit {} job", name);
                    }
                }
            }
        }

        let mut written = 0;
        for _ in 0..submitted {
            let Some(result) = results.recv().await else {
                tracing::error!("Stats result stream closed early");
                break;
            };

            let key = (result.coin.clone(), result.window.key());
            let Some(packed) = pending.get_mut(&key) else {
                continue;
            };
            packed.values.insert(result.preset_name, result.values);
            if packed.values.len() < self.presets.len() {
                continue;
            }

            if let Some(packed) = pending.remove(&key) {
                let path = self.output_path(&result.coin, &result.window);
                match write_snapshot(&path, &packed).await {
                    Ok(()) => {
                        written += 1;
                        tracing::info!(
                            "\u{2714} Finished packing {} {} {}",
                            result.coin,
                            result.window.basis.as_str(),
                            result.window.id
                        );
                    }
                    Err(e) => tracing::warn!("Could not write {}: {}", path.display(), e),
                }
            }
        }

        tracing::info!(
            "\u{2714}\u{2714} Finished packing {} results after {:?}",
            written,
            start.elapsed()
        );
        Ok(written)
    }
}

/// Write to a sibling temp file and rename it over `path`, so readers never
/// see a partial snapshot.
async fn write_snapshot(path: &Path, packed: &PackedStats) -> Result<()> {
    let json = serde_json::to_vec(packed)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{insert_block, CreateBlock};
    use crate::stats::engine::StatEngine;
    use crate::stats::statistic::{AggregateMethod, StatKind, StatPreset, ValueType};
    use crate::stats::timeframe::TimeframeKind;

    async fn store_with_blocks(coin: &str, count: u64) -> LedgerStore {
        let store = LedgerStore::in_memory().await.unwrap();
        let mut tx = store.begin().await.unwrap();
        for height in 1..=count {
            let block = CreateBlock {
                coin: coin.into(),
                hash: format!("{height}"),
                height,
                time: 1_600_000_000 + height * 600,
                difficulty: 10.0,
                work: 10.0 * height as f64,
            };
            insert_block(&mut tx, &block).await.unwrap();
        }
        tx.commit().await.unwrap();
        store
    }

    fn small_registry() -> Arc<PresetRegistry> {
        let mut registry = PresetRegistry::new();
        registry.insert(
            "BLK_COUNT_COUNT",
            StatPreset::new(StatKind::Block, "coin", AggregateMethod::Count, ValueType::I32),
        );
        registry.insert(
            "BLK_DIFFICULTY_AVG",
            StatPreset::new(StatKind::Block, "difficulty", AggregateMethod::Avg, ValueType::F64),
        );
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_package_writes_complete_windows() {
        let store = store_with_blocks("BTC", 20).await;
        let dispatcher = Arc::new(Dispatcher::start(2, Arc::new(StatEngine::new(store.clone()))));
        let dir = tempfile::tempdir().unwrap();

        let packer = Packer::new(store, small_registry(), dispatcher, dir.path()).with_timeframes(vec![
            Timeframe::new("10", TimeframeKind::LastBlocks(10)),
            Timeframe::new("d1", TimeframeKind::LastSecs(24 * 3600)),
        ]);

        // BCH has no blocks: its height window is skipped, its time window is all null
        let coins = vec![
            Arc::new(Coin::new("BTC", "http://127.0.0.1:1", "u", "p")),
            Arc::new(Coin::new("BCH", "http://127.0.0.1:1", "u", "p")),
        ];
        assert_eq!(packer.package(&coins).await.unwrap(), 3);

        let raw = std::fs::read(dir.path().join("height_btc_10.json")).unwrap();
        let packed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(packed["step"], 1);
        assert_eq!(packed["from"], 10);
        assert_eq!(packed["to"], 20);
        assert_eq!(packed["range"], 10);
        assert_eq!(packed["compacter"], "height");
        assert_eq!(packed["index"].as_array().unwrap().len(), 11);

        let counts = packed["values"]["BLK_COUNT_COUNT"].as_array().unwrap();
        assert_eq!(counts.len(), 10);
        assert!(counts.iter().all(|c| c == 1));
        assert_eq!(packed["values"]["BLK_DIFFICULTY_AVG"][0], 10.0);

        assert!(dir.path().join("time_btc_d1.json").exists());
        assert!(!dir.path().join("height_bch_10.json").exists());

        let raw = std::fs::read(dir.path().join("time_bch_d1.json")).unwrap();
        let packed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let counts = packed["values"]["BLK_COUNT_COUNT"].as_array().unwrap();
        assert_eq!(counts.len(), 72);
        assert!(counts.iter().all(|c| c.is_null()));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_write_snapshot_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("height_btc_10.json");
        std::fs::write(&path, b"stale").unwrap();

        let packed = PackedStats {
            step: 1,
            from: 10,
            to: 20,
            range: 10,
            compacter: CompactBasis::Height,
            index: (10..=20).collect(),
            values: BTreeMap::new(),
        };
        write_snapshot(&path, &packed).await.unwrap();

        let written: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(written["from"], 10);
        assert_eq!(written["index"].as_array().unwrap().len(), 11);
        assert!(!dir.path().join("height_btc_10.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_write_snapshot_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("time_btc_d1.json");
        let packed = PackedStats {
            step: 1,
            from: 0,
            to: 72,
            range: 72,
            compacter: CompactBasis::Time,
            index: (0..=72).collect(),
            values: BTreeMap::new(),
        };
        assert!(write_snapshot(&path, &packed).await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_package_empty_store() {
        let store = LedgerStore::in_memory().await.unwrap();
        let dispatcher = Arc::new(Dispatcher::start(1, Arc::new(StatEngine::new(store.clone()))));
        let dir = tempfile::tempdir().unwrap();
        let packer = Packer::new(store, small_registry(), dispatcher, dir.path());

        let coins = vec![Arc::new(Coin::new("BTC", "http://127.0.0.1:1", "u", "p"))];
        assert_eq!(packer.package(&coins).await.unwrap(), 0);
    }
}
