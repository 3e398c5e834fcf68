pub mod hrv;
pub mod rolling;

pub use hrv::{hrv_time, IntervalComputer, VariabilityMetrics};
pub use rolling::{RollingStatsTracker, RunningMean};
