//! Difficulty-compensated hashrate estimates.
//!
//! Difficulty is piecewise constant between retargets, so the blocks inside a
//! lookback window fall into eras. Each era contributes its observed/expected
//! block ratio times its difficulty, weighted by how much of the window it
//! covers.

use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::consts::TARGET_SPACING;
use crate::database::{self, BlockGroup};
use crate::error::Result;

/// Lookback windows stored with every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashrateWindow {
    Hour3,
    Hour6,
    Hour12,
    Day1,
    Day3,
    Day7,
    Day30,
}

impl HashrateWindow {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashrateWindow::Hour3 => "h3",
            HashrateWindow::Hour6 => "h6",
            HashrateWindow::Hour12 => "h12",
            HashrateWindow::Day1 => "d1",
            HashrateWindow::Day3 => "d3",
            HashrateWindow::Day7 => "d7",
            HashrateWindow::Day30 => "d30",
        }
    }

    pub fn duration_secs(&self) -> i64 {
        const HOUR: i64 = 3600;
        const DAY: i64 = 24 * HOUR;
        match self {
            HashrateWindow::Hour3 => 3 * HOUR,
            HashrateWindow::Hour6 => 6 * HOUR,
            HashrateWindow::Hour12 => 12 * HOUR,
            HashrateWindow::Day1 => DAY,
            HashrateWindow::Day3 => 3 * DAY,
            HashrateWindow::Day7 => 7 * DAY,
            HashrateWindow::Day30 => 30 * DAY,
        }
    }

    pub fn all() -> [HashrateWindow; 7] {
        [
            HashrateWindow::Hour3,
            HashrateWindow::Hour6,
            HashrateWindow::Hour12,
            HashrateWindow::Day1,
            HashrateWindow::Day3,
            HashrateWindow::Day7,
            HashrateWindow::Day30,
        ]
    }
}

/// One estimate per window, in difficulty units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Hashrates {
    pub h3: f64,
    pub h6: f64,
    pub h12: f64,
    pub d1: f64,
    pub d3: f64,
    pub d7: f64,
    pub d30: f64,
}

impl Hashrates {
    pub fn set(&mut self, window: HashrateWindow, rate: f64) {
        match window {
            HashrateWindow::Hour3 => self.h3 = rate,
            HashrateWindow::Hour6 => self.h6 = rate,
            HashrateWindow::Hour12 => self.h12 = rate,
            HashrateWindow::Day1 => self.d1 = rate,
            HashrateWindow::Day3 => self.d3 = rate,
            HashrateWindow::Day7 => self.d7 = rate,
            HashrateWindow::Day30 => self.d30 = rate,
        }
    }

    pub fn get(&self, window: HashrateWindow) -> f64 {
        match window {
            HashrateWindow::Hour3 => self.h3,
            HashrateWindow::Hour6 => self.h6,
            HashrateWindow::Hour12 => self.h12,
            HashrateWindow::Day1 => self.d1,
            HashrateWindow::Day3 => self.d3,
            HashrateWindow::Day7 => self.d7,
            HashrateWindow::Day30 => self.d30,
        }
    }
}

/// Duration of each era, in era order. An era ending before the latest era
/// end seen so far gets a non-positive duration and does not move it back.
fn era_durations(eras: &[BlockGroup], start: i64) -> Vec<i64> {
    let mut era_start = start;
    eras.iter()
        .map(|era| {
            let duration = era.time - era_start;
            era_start = era_start.max(era.time);
            duration
        })
        .collect()
}

/// Share of the window `[start, end]` covered by each era, in era order.
/// Eras with a non-positive duration get no weight.
pub fn era_weights(eras: &[BlockGroup], start: i64, end: i64) -> Vec<f64> {
    let span = (end - start) as f64;
    era_durations(eras, start)
        .into_iter()
        .map(|duration| {
            if duration <= 0 || span <= 0.0 {
                0.0
            } else {
                duration as f64 / span
            }
        })
        .collect()
}

/// Compensated hashrate over `[start, end]` from eras ordered by start.
pub fn compensated_hashrate(eras: &[BlockGroup], start: i64, end: i64) -> f64 {
    let durations = era_durations(eras, start);
    let weights = era_weights(eras, start, end);

    let mut rate = 0.0;
    for ((era, duration), weight) in eras.iter().zip(durations).zip(weights) {
        if weight <= 0.0 {
            continue;
        }

        let expected = duration as f64 / TARGET_SPACING;
        let actual = era.count as f64;
        rate += actual / expected * era.difficulty * weight;
    }

    rate
}

/// Estimate for one window ending at the reference block. The window is
/// clipped to `first_time`, the oldest stored block of the coin; if nothing
/// older than the reference block is known the reference difficulty is
/// returned.
pub async fn estimate(
    conn: &mut SqliteConnection,
    coin: &str,
    ref_time: i64,
    ref_difficulty: f64,
    first_time: Option<i64>,
    window: HashrateWindow,
) -> Result<f64> {
    let mut start = ref_time - window.duration_secs();
    if let Some(first) = first_time {
        start = start.max(first);
    }
    if start >= ref_time {
        return Ok(ref_difficulty);
    }

    let eras = database::get_blocks_after_grouped(conn, coin, start).await?;
    Ok(compensated_hashrate(&eras, start, ref_time))
}

/// All seven estimates for the block at `ref_time`.
pub async fn determine_hashrates(
    conn: &mut SqliteConnection,
    coin: &str,
    ref_time: i64,
    ref_difficulty: f64,
) -> Result<Hashrates> {
    let first_time = database::get_first_time(conn, coin).await?;

    let mut rates = Hashrates::default();
    for window in HashrateWindow::all() {
        let rate = estimate(conn, coin, ref_time, ref_difficulty, first_time, window).await?;
        rates.set(window, rate);
    }
    Ok(rates)
}
