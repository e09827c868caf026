//! Windowed, bucketed statistics over the stored chains.

pub mod compacter;
pub mod dispatcher;
pub mod engine;
pub mod packer;
pub mod presets;
pub mod statistic;
pub mod timeframe;

pub use compacter::{CompactBasis, Compacter};
pub use dispatcher::{Dispatcher, Job, JobExecutor, JobResult};
pub use engine::StatEngine;
pub use packer::{PackedStats, Packer};
pub use presets::PresetRegistry;
pub use statistic::{AggregateMethod, StatKind, StatPreset, StatValue, ValueType};
pub use timeframe::{Timeframe, TimeframeKind, Window};
