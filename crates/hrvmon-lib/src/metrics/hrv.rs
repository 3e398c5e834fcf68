use crate::{
    config::IntervalConfig,
    signal::{Events, RRSeries},
};
use serde::{Deserialize, Serialize};

/// Turns beat locations into RR intervals restricted to a physiological band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalComputer {
    pub min_ms: f64,
    pub max_ms: f64,
}

impl Default for IntervalComputer {
    fn default() -> Self {
        Self::from_config(&IntervalConfig::default())
    }
}

impl IntervalComputer {
    pub fn new(min_ms: f64, max_ms: f64) -> Self {
        Self { min_ms, max_ms }
    }

    pub fn from_config(cfg: &IntervalConfig) -> Self {
        Self::new(cfg.min_ms, cfg.max_ms)
    }

    /// All successive intervals, in milliseconds.
    pub fn raw(&self, peaks: &Events, fs: f64) -> RRSeries {
        RRSeries::from_events(peaks, fs)
    }

    /// Intervals inside the band. Out-of-band intervals are dropped, never repaired.
    pub fn compute(&self, peaks: &Events, fs: f64) -> RRSeries {
        self.raw(peaks, fs).within(self.min_ms, self.max_ms)
    }
}

/// Time-domain variability of one window. `None` means undefined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariabilityMetrics {
    pub rmssd: Option<f64>,
    pub sdnn: Option<f64>,
    #[serde(rename = "sdnn_rmssd_ratio")]
    pub ratio: Option<f64>,
    pub mean_rri: Option<f64>,
    pub mean_hr: Option<f64>,
}

impl VariabilityMetrics {
    pub fn undefined() -> Self {
        Self::default()
    }

    /// True when fewer than two valid intervals were available.
    pub fn is_undefined(&self) -> bool {
        self.rmssd.is_none() && self.sdnn.is_none() && self.ratio.is_none()
    }
}

/// RMSSD, population SDNN, their ratio, and the window's mean RR / heart rate.
pub fn hrv_time(rr: &RRSeries) -> VariabilityMetrics {
    let values = &rr.rr_ms;
    let n = values.len();
    if n < 2 {
        return VariabilityMetrics::undefined();
    }

    let mean = values.iter().sum::<f64>() / n as f64;
    let sdnn = (values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
    let rmssd = {
        let diffs = values.windows(2).map(|w| (w[1] - w[0]).powi(2));
        (diffs.sum::<f64>() / (n as f64 - 1.0)).sqrt()
    };
    let ratio = (rmssd != 0.0).then(|| sdnn / rmssd);
    let mean_hr = (mean > 0.0).then(|| 60_000.0 / mean);

    VariabilityMetrics {
        rmssd: Some(rmssd),
        sdnn: Some(sdnn),
        ratio,
        mean_rri: Some(mean),
        mean_hr,
    }
}
