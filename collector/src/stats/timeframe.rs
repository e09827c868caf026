//! Packaged windows and how they resolve against the store's current tip.

use super::compacter::CompactBasis;
use crate::consts::{CHAINSPLIT_TIMESTAMP, GENESIS_TIMESTAMP};

const DAY: i64 = 24 * 3600;
const YEAR: i64 = 365 * DAY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeframeKind {
    /// The last N blocks of the coin.
    LastBlocks(i64),
    /// From a fixed height to the coin's tip.
    SinceHeight(i64),
    /// The last N seconds before the newest block of any coin.
    LastSecs(i64),
    /// From a fixed unix time to the newest block of any coin.
    SinceTime(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeframe {
    pub id: &'static str,
    pub kind: TimeframeKind,
}

/// A timeframe resolved to concrete bounds for one pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Window {
    pub id: String,
    pub basis: CompactBasis,
    pub from: i64,
    pub to: i64,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.from >= self.to
    }

    /// Identifies the window within a coin: `<basis>_<id>`.
    pub fn key(&self) -> String {
        format!("{}_{}", self.basis.as_str(), self.id)
    }
}

impl Timeframe {
    pub const fn new(id: &'static str, kind: TimeframeKind) -> Self {
        Self { id, kind }
    }

    pub fn basis(&self) -> CompactBasis {
        match self.kind {
            TimeframeKind::LastBlocks(_) | TimeframeKind::SinceHeight(_) => CompactBasis::Height,
            TimeframeKind::LastSecs(_) | TimeframeKind::SinceTime(_) => CompactBasis::Time,
        }
    }

    /// Height windows need the coin's last height; a coin without blocks
    /// has none and yields `None`.
    pub fn resolve(&self, last_height: Option<i64>, last_time: i64) -> Option<Window> {
        let (from, to) = match self.kind {
            TimeframeKind::LastBlocks(n) => {
                let to = last_height?;
                (to - n, to)
            }
            TimeframeKind::SinceHeight(height) => (height, last_height?),
            TimeframeKind::LastSecs(secs) => (last_time - secs, last_time),
            TimeframeKind::SinceTime(time) => (time, last_time),
        };

        Some(Window {
            id: self.id.to_string(),
            basis: self.basis(),
            from,
            to,
        })
    }

    pub fn standard() -> Vec<Timeframe> {
        use TimeframeKind::*;
        vec![
            Timeframe::new("2016", LastBlocks(2016)),
            Timeframe::new("8064", LastBlocks(8064)),
            Timeframe::new("genesis", SinceHeight(1)),
            Timeframe::new("d7", LastSecs(7 * DAY)),
            Timeframe::new("d30", LastSecs(30 * DAY)),
            Timeframe::new("fork", SinceTime(CHAINSPLIT_TIMESTAMP)),
            Timeframe::new("d180", LastSecs(180 * DAY)),
            Timeframe::new("y1", LastSecs(YEAR)),
            Timeframe::new("y2", LastSecs(2 * YEAR)),
            Timeframe::new("y5", LastSecs(5 * YEAR)),
            Timeframe::new("genesis", SinceTime(GENESIS_TIMESTAMP)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_height_windows() {
        let tf = Timeframe::new("2016", TimeframeKind::LastBlocks(2016));
        let w = tf.resolve(Some(500_000), 0).unwrap();
        assert_eq!((w.from, w.to), (497_984, 500_000));
        assert_eq!(w.key(), "height_2016");
        assert!(tf.resolve(None, 1_600_000_000).is_none());
    }

    #[test]
    fn test_resolve_time_windows() {
        let last = CHAINSPLIT_TIMESTAMP + 10 * DAY;
        let d7 = Timeframe::new("d7", TimeframeKind::LastSecs(7 * DAY)).resolve(None, last).unwrap();
        assert_eq!(d7.to - d7.from, 7 * DAY);
        assert_eq!(d7.basis, CompactBasis::Time);

        let fork = Timeframe::new("fork", TimeframeKind::SinceTime(CHAINSPLIT_TIMESTAMP))
            .resolve(None, CHAINSPLIT_TIMESTAMP - 1)
            .unwrap();
        assert!(fork.is_empty());
    }

    #[test]
    fn test_standard_keys_unique() {
        let mut keys: Vec<String> = Timeframe::standard()
            .iter()
            .map(|tf| format!("{}_{}", tf.basis().as_str(), tf.id))
            .collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), total);
        assert_eq!(total, 11);
    }
}
