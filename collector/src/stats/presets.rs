use std::collections::BTreeMap;

use super::statistic::{
    AggregateMethod::{self, Avg, Count, Max, Min},
    StatKind::{self, Block, Detail, Hashrate, Price},
    StatPreset,
    ValueType::{self, F32, F64, I32, I64, U64},
};

type PresetRow = (&'static str, StatKind, &'static str, AggregateMethod, ValueType);

const STANDARD: &[PresetRow] = &[
    // blocks
    ("BLK_DIFFICULTY_AVG", Block, "difficulty", Avg, F64),
    ("BLK_WORK_AVG", Block, "work", Avg, F64),
    ("BLK_TIME_AVG", Block, "time", Avg, F32),
    ("BLK_HEIGHT_AVG", Block, "height", Avg, F32),
    ("BLK_HEIGHT_MIN", Block, "height", Min, I32),
    ("BLK_HEIGHT_MAX", Block, "height", Max, I32),
    ("BLK_COUNT_COUNT", Block, "coin", Count, I32),
    // hashrates
    ("HASHRATE_H3_AVG", Hashrate, "h3", Avg, F64),
    ("HASHRATE_H6_AVG", Hashrate, "h6", Avg, F64),
    ("HASHRATE_H12_AVG", Hashrate, "h12", Avg, F64),
    ("HASHRATE_D1_AVG", Hashrate, "d1", Avg, F64),
    ("HASHRATE_D3_AVG", Hashrate, "d3", Avg, F64),
    ("HASHRATE_D7_AVG", Hashrate, "d7", Avg, F64),
    ("HASHRATE_D30_AVG", Hashrate, "d30", Avg, F64),
    ("HASHRATE_H3_MAX", Hashrate, "h3", Max, F64),
    ("HASHRATE_H6_MAX", Hashrate, "h6", Max, F64),
    ("HASHRATE_H12_MAX", Hashrate, "h12", Max, F64),
    ("HASHRATE_D1_MAX", Hashrate, "d1", Max, F64),
    ("HASHRATE_D3_MAX", Hashrate, "d3", Max, F64),
    ("HASHRATE_D7_MAX", Hashrate, "d7", Max, F64),
    ("HASHRATE_D30_MAX", Hashrate, "d30", Max, F64),
    ("HASHRATE_H3_MIN", Hashrate, "h3", Min, F64),
    ("HASHRATE_H6_MIN", Hashrate, "h6", Min, F64),
    ("HASHRATE_H12_MIN", Hashrate, "h12", Min, F64),
    ("HASHRATE_D1_MIN", Hashrate, "d1", Min, F64),
    ("HASHRATE_D3_MIN", Hashrate, "d3", Min, F64),
    ("HASHRATE_D7_MIN", Hashrate, "d7", Min, F64),
    ("HASHRATE_D30_MIN", Hashrate, "d30", Min, F64),
    // details
    ("DETAIL_AVGFEE_AVG", Detail, "avgfee", Avg, F32),
    ("DETAIL_MAXFEE_MAX", Detail, "maxfee", Max, I32),
    ("DETAIL_MINFEE_MIN", Detail, "minfee", Min, I32),
    ("DETAIL_MEDIANFEE_AVG", Detail, "medianfee", Avg, F32),
    ("DETAIL_AVGFEERATE_AVG", Detail, "avgfeerate", Avg, F32),
    ("DETAIL_VAVGFEERATE_AVG", Detail, "vavgfeerate", Avg, F32),
    ("DETAIL_MINFEERATE_MIN", Detail, "minfeerate", Min, I32),
    ("DETAIL_VMINFEERATE_MIN", Detail, "vminfeerate", Min, I32),
    ("DETAIL_MAXFEERATE_MAX", Detail, "maxfeerate", Max, I32),
    ("DETAIL_VMAXFEERATE_MAX", Detail, "vmaxfeerate", Max, I32),
    ("DETAIL_MEDIANFEERATE_AVG", Detail, "medianfeerate", Avg, F32),
    ("DETAIL_VMEDIANFEERATE_AVG", Detail, "vmedianfeerate", Avg, F32),
    ("DETAIL_INPUTS_AVG", Detail, "inputs", Avg, F32),
    ("DETAIL_OUTPUTS_AVG", Detail, "outputs", Avg, F32),
    ("DETAIL_MEDIANTIME_AVG", Detail, "mediantime", Avg, F32),
    ("DETAIL_REWARD_AVG", Detail, "reward", Avg, F32),
    ("DETAIL_REWARD_MIN", Detail, "reward", Min, I64),
    ("DETAIL_REWARD_MAX", Detail, "reward", Max, I64),
    ("DETAIL_FEE_AVG", Detail, "fee", Avg, F32),
    ("DETAIL_FEE_MIN", Detail, "fee", Min, I64),
    ("DETAIL_FEE_MAX", Detail, "fee", Max, I64),
    ("DETAIL_TOTALSIZE_AVG", Detail, "totalsize", Avg, F32),
    ("DETAIL_TOTALSIZE_MIN", Detail, "totalsize", Min, I32),
    ("DETAIL_TOTALSIZE_MAX", Detail, "totalsize", Max, I32),
    ("DETAIL_SWTOTALSIZE_AVG", Detail, "swtotalsize", Avg, F32),
    ("DETAIL_SWTOTALSIZE_MIN", Detail, "swtotalsize", Min, I32),
    ("DETAIL_SWTOTALSIZE_MAX", Detail, "swtotalsize", Max, I32),
    ("DETAIL_SWTOTALWEIGHT_AVG", Detail, "swtotalweight", Avg, F32),
    ("DETAIL_SWTOTALWEIGHT_MIN", Detail, "swtotalweight", Min, I32),
    ("DETAIL_SWTOTALWEIGHT_MAX", Detail, "swtotalweight", Max, I32),
    ("DETAIL_TXS_AVG", Detail, "txs", Avg, F32),
    ("DETAIL_TXS_MIN", Detail, "txs", Min, I32),
    ("DETAIL_TXS_MAX", Detail, "txs", Max, I32),
    ("DETAIL_SWTXS_AVG", Detail, "swtxs", Avg, F32),
    ("DETAIL_SWTXS_MIN", Detail, "swtxs", Min, I32),
    ("DETAIL_SWTXS_MAX", Detail, "swtxs", Max, I32),
    ("DETAIL_TOTALOUT_AVG", Detail, "totalout", Avg, F32),
    ("DETAIL_TOTALOUT_MAX", Detail, "totalout", Max, U64),
    ("DETAIL_TOTALOUT_MIN", Detail, "totalout", Min, U64),
    ("DETAIL_TOTALWEIGHT_AVG", Detail, "totalweight", Avg, F32),
    ("DETAIL_TOTALWEIGHT_MAX", Detail, "totalweight", Max, I32),
    ("DETAIL_TOTALWEIGHT_MIN", Detail, "totalweight", Min, I32),
    ("DETAIL_UTXOINC_AVG", Detail, "utxoinc", Avg, F32),
    ("DETAIL_UTXOINC_MAX", Detail, "utxoinc", Max, I32),
    ("DETAIL_UTXOINC_MIN", Detail, "utxoinc", Min, I32),
    ("DETAIL_UTXOSIZEINC_AVG", Detail, "utxosizeinc", Avg, F32),
    ("DETAIL_UTXOSIZEINC_MAX", Detail, "utxosizeinc", Max, I32),
    ("DETAIL_UTXOSIZEINC_MIN", Detail, "utxosizeinc", Min, I32),
];

const PRICES: &[PresetRow] = &[
    ("PRICE_USD_AVG", Price, "price", Avg, F64),
    ("PRICE_USD_MIN", Price, "price", Min, F64),
    ("PRICE_USD_MAX", Price, "price", Max, F64),
];

/// Named statistics computed for every packaged window.
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: BTreeMap<String, StatPreset>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block, hashrate and detail statistics.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.extend(STANDARD);
        registry
    }

    /// Adds the fiat price statistics.
    pub fn with_prices(mut self) -> Self {
        self.extend(PRICES);
        self
    }

    fn extend(&mut self, rows: &[PresetRow]) {
        for &(name, kind, property, method, value_type) in rows {
            self.insert(name, StatPreset::new(kind, property, method, value_type));
        }
    }

    /// Panics if `preset` names a column its kind does not have.
    pub fn insert(&mut self, name: &str, preset: StatPreset) {
        assert!(
            preset.is_valid(),
            "preset {} reads unknown {} column {}",
            name,
            preset.kind.as_str(),
            preset.property
        );
        self.presets.insert(name.to_string(), preset);
    }

    pub fn get(&self, name: &str) -> Option<&StatPreset> {
        self.presets.get(name)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StatPreset)> {
        self.presets.iter().map(|(name, preset)| (name.as_str(), preset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry() {
        let registry = PresetRegistry::standard();
        assert_eq!(registry.len(), STANDARD.len());
        let count = registry.get("BLK_COUNT_COUNT").unwrap();
        assert_eq!(count.method, Count);
        assert_eq!(count.value_type, I32);
        assert!(registry.get("PRICE_USD_AVG").is_none());

        let with_prices = registry.with_prices();
        assert_eq!(with_prices.len(), STANDARD.len() + PRICES.len());
    }

    #[test]
    #[should_panic(expected = "unknown hashrate column")]
    fn test_invalid_column_panics() {
        let mut registry = PresetRegistry::new();
        registry.insert("BAD", StatPreset::new(Hashrate, "txs", Avg, F64));
    }
}
