//! One analysis step per completed window: condition, detect beats, derive
//! intervals and variability, then fold the result into the rolling history and
//! run the configured metric stages.

use crate::{
    conditioning::{ConditioningError, SignalConditioner},
    config::{ConfigError, MonitorConfig, StageKind},
    detectors::PeakDetector,
    metrics::{hrv_time, IntervalComputer, RollingStatsTracker, RunningMean, VariabilityMetrics},
    signal::{Events, RRSeries, TimeSeries},
};
use log::debug;
use serde::{Deserialize, Serialize};

/// Per-window output of conditioning, detection, and variability analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowAnalysis {
    pub fs: f64,
    pub sample_count: usize,
    pub events: Events,
    pub rr: RRSeries,
    pub valid_rr: RRSeries,
    pub metrics: VariabilityMetrics,
}

/// Fields derived from the rolling ratio history by the metric stages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RollingFields {
    pub short_ma: Option<f64>,
    pub long_ma: Option<f64>,
    pub ma_difference: Option<f64>,
    pub cumulative_avg: Option<f64>,
    pub cumulative_minus_long: Option<f64>,
    pub cumulative_minus_short: Option<f64>,
    pub cumulative_hr: Option<f64>,
    pub ratio_to_cumulative: Option<f64>,
    pub short_ma_to_cumulative: Option<f64>,
    pub long_ma_to_cumulative: Option<f64>,
    pub ratio_minus_cumulative: Option<f64>,
}

/// The record handed to report sinks for each analysed window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReport {
    pub timestamp: String,
    pub window: u64,
    pub peaks: usize,
    pub valid_rri: usize,
    #[serde(flatten)]
    pub metrics: VariabilityMetrics,
    #[serde(flatten)]
    pub rolling: RollingFields,
    pub dropped_lines: u64,
}

/// Read-only view of the run-long state available to metric stages.
pub struct StageContext<'a> {
    pub ratios: &'a RollingStatsTracker,
    pub heart_rate: &'a RunningMean,
}

/// A named step deriving report fields from run-long state and from the fields
/// filled by the stages before it.
pub trait MetricStage: Send {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &StageContext<'_>, report: &mut WindowReport);
}

/// Short/long moving averages of the ratio and their difference.
pub struct MovingAverageStage;

impl MetricStage for MovingAverageStage {
    fn name(&self) -> &'static str {
        "moving-averages"
    }

    fn apply(&self, ctx: &StageContext<'_>, report: &mut WindowReport) {
        report.rolling.short_ma = ctx.ratios.short_ma();
        report.rolling.long_ma = ctx.ratios.long_ma();
        report.rolling.ma_difference = ctx.ratios.ma_difference();
    }
}

/// Run-long averages and their offsets from the moving averages.
pub struct CumulativeStage;

impl MetricStage for CumulativeStage {
    fn name(&self) -> &'static str {
        "cumulative"
    }

    fn apply(&self, ctx: &StageContext<'_>, report: &mut WindowReport) {
        report.rolling.cumulative_avg = ctx.ratios.cumulative_average();
        report.rolling.cumulative_minus_long = ctx.ratios.cumulative_minus_long();
        report.rolling.cumulative_minus_short = ctx.ratios.cumulative_minus_short();
        report.rolling.cumulative_hr = ctx.heart_rate.mean();
    }
}

/// Current ratio and moving averages relative to the cumulative average.
pub struct RelativeStage;

impl MetricStage for RelativeStage {
    fn name(&self) -> &'static str {
        "relative"
    }

    fn apply(&self, _ctx: &StageContext<'_>, report: &mut WindowReport) {
        let cumulative = report.rolling.cumulative_avg;
        let over = |value: Option<f64>| match (value, cumulative) {
            (Some(v), Some(c)) if c != 0.0 => Some(v / c),
            _ => None,
        };
        report.rolling.ratio_to_cumulative = over(report.metrics.ratio);
        report.rolling.short_ma_to_cumulative = over(report.rolling.short_ma);
        report.rolling.long_ma_to_cumulative = over(report.rolling.long_ma);
        report.rolling.ratio_minus_cumulative = match (report.metrics.ratio, cumulative) {
            (Some(r), Some(c)) => Some(r - c),
            _ => None,
        };
    }
}

impl StageKind {
    pub fn build(self) -> Box<dyn MetricStage> {
        match self {
            StageKind::MovingAverages => Box::new(MovingAverageStage),
            StageKind::Cumulative => Box::new(CumulativeStage),
            StageKind::Relative => Box::new(RelativeStage),
        }
    }
}

/// Conditioning → peak detection → intervals → variability → rolling stages.
pub struct WindowAnalyzer {
    fs: f64,
    conditioner: SignalConditioner,
    detector: PeakDetector,
    intervals: IntervalComputer,
    ratios: RollingStatsTracker,
    heart_rate: RunningMean,
    stages: Vec<Box<dyn MetricStage>>,
}

impl WindowAnalyzer {
    pub fn new(config: &MonitorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let fs = config.sampling_rate_hz;
        Ok(Self {
            fs,
            conditioner: SignalConditioner::new(fs, &config.filter)?,
            detector: PeakDetector::from_config(&config.peaks, fs),
            intervals: IntervalComputer::from_config(&config.intervals),
            ratios: RollingStatsTracker::from_config(&config.rolling),
            heart_rate: RunningMean::default(),
            stages: config.stages.iter().map(|kind| kind.build()).collect(),
        })
    }

    /// Replace the configured stages with a custom ordered list.
    pub fn with_stages(mut self, stages: Vec<Box<dyn MetricStage>>) -> Self {
        self.stages = stages;
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn conditioner(&self) -> &SignalConditioner {
        &self.conditioner
    }

    pub fn ratios(&self) -> &RollingStatsTracker {
        &self.ratios
    }

    /// Stateless part of the pipeline for one window of raw samples.
    pub fn analyze(&self, window: &[i64]) -> Result<WindowAnalysis, ConditioningError> {
        let raw = TimeSeries::from_raw(self.fs, window);
        let filtered = self.conditioner.condition(&raw)?;
        let events = self.detector.detect(&filtered);
        let rr = self.intervals.raw(&events, self.fs);
        let valid_rr = rr.within(self.intervals.min_ms, self.intervals.max_ms);
        let metrics = hrv_time(&valid_rr);
        Ok(WindowAnalysis {
            fs: self.fs,
            sample_count: raw.len(),
            events,
            rr,
            valid_rr,
            metrics,
        })
    }

    /// Fold an analysed window into the rolling state and build its report.
    pub fn fold(
        &mut self,
        analysis: &WindowAnalysis,
        window: u64,
        timestamp: String,
        dropped_lines: u64,
    ) -> WindowReport {
        self.ratios.append(analysis.metrics.ratio);
        self.heart_rate.push(analysis.metrics.mean_hr);

        let mut report = WindowReport {
            timestamp,
            window,
            peaks: analysis.events.len(),
            valid_rri: analysis.valid_rr.len(),
            metrics: analysis.metrics,
            rolling: RollingFields::default(),
            dropped_lines,
        };
        let ctx = StageContext {
            ratios: &self.ratios,
            heart_rate: &self.heart_rate,
        };
        for stage in &self.stages {
            stage.apply(&ctx, &mut report);
        }
        debug!(
            "window {}: {} peaks, {} valid RR, ratio {:?}",
            window, report.peaks, report.valid_rri, report.metrics.ratio
        );
        report
    }

    pub fn process(
        &mut self,
        window: &[i64],
        index: u64,
        timestamp: String,
        dropped_lines: u64,
    ) -> Result<WindowReport, ConditioningError> {
        let analysis = self.analyze(window)?;
        Ok(self.fold(&analysis, index, timestamp, dropped_lines))
    }
}
