use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::window::WindowBuffer;

/// Top-level configuration for the windowed HRV pipeline.
///
/// Every field has a default, so a TOML file only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Nominal sampling rate of the sensor (Hz).
    pub sampling_rate_hz: f64,
    /// Analysis window length (seconds).
    pub window_seconds: f64,
    pub filter: FilterConfig,
    pub peaks: PeakConfig,
    pub intervals: IntervalConfig,
    pub rolling: RollingConfig,
    /// Metric stages applied after the rolling history is updated, in order.
    pub stages: Vec<StageKind>,
    pub undefined_rows: UndefinedRowPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sampling_rate_hz: 200.0,
            window_seconds: 10.0,
            filter: FilterConfig::default(),
            peaks: PeakConfig::default(),
            intervals: IntervalConfig::default(),
            rolling: RollingConfig::default(),
            stages: vec![
                StageKind::MovingAverages,
                StageKind::Cumulative,
                StageKind::Relative,
            ],
            undefined_rows: UndefinedRowPolicy::Emit,
        }
    }
}

/// Band-pass design parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub lowcut_hz: f64,
    pub highcut_hz: f64,
    /// Butterworth order per band edge.
    pub order: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            lowcut_hz: 0.5,
            highcut_hz: 30.0,
            order: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Candidates must exceed `height_factor * max(signal)`.
    pub height_factor: f64,
    /// Minimum spacing between beats (seconds). `0` disables the constraint.
    pub min_distance_s: f64,
    /// Peak-to-peak range at or below which a window is treated as flat.
    pub flat_tolerance: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            height_factor: 0.5,
            min_distance_s: 0.6,
            flat_tolerance: 1e-6,
        }
    }
}

impl PeakConfig {
    pub fn min_distance_samples(&self, fs: f64) -> Option<usize> {
        if self.min_distance_s > 0.0 {
            Some(((self.min_distance_s * fs).ceil() as usize).max(1))
        } else {
            None
        }
    }
}

/// Physiological RR band (inclusive, milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub min_ms: f64,
    pub max_ms: f64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            min_ms: 300.0,
            max_ms: 2000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingConfig {
    pub short_window: usize,
    pub long_window: usize,
}

impl Default for RollingConfig {
    fn default() -> Self {
        Self {
            short_window: 5,
            long_window: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    MovingAverages,
    Cumulative,
    Relative,
}

/// What to do with a window whose variability metrics are all undefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UndefinedRowPolicy {
    /// Write the row with `nan` placeholders.
    Emit,
    /// Write nothing for the window.
    Skip,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sampling rate must be positive, got {0}")]
    SamplingRate(f64),
    #[error("window of {window_s} s at {fs} Hz holds no samples")]
    EmptyWindow { fs: f64, window_s: f64 },
    #[error("band-pass cutoffs must satisfy 0 < low ({low}) < high ({high}) < nyquist ({nyquist})")]
    Cutoffs { low: f64, high: f64, nyquist: f64 },
    #[error("filter order must be within 1..=10, got {0}")]
    FilterOrder(usize),
    #[error("band-pass design did not yield second-order sections")]
    FilterDesign,
    #[error("peak height factor must be within (0, 1], got {0}")]
    HeightFactor(f64),
    #[error("RR bounds must satisfy 0 <= min ({min}) < max ({max})")]
    IntervalBounds { min: f64, max: f64 },
    #[error("moving-average windows must satisfy 1 <= short ({short}) <= long ({long})")]
    RollingWindows { short: usize, long: usize },
}

impl MonitorConfig {
    pub fn window_len(&self) -> usize {
        WindowBuffer::window_len(self.sampling_rate_hz, self.window_seconds)
    }

    pub fn nyquist(&self) -> f64 {
        0.5 * self.sampling_rate_hz
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fs = self.sampling_rate_hz;
        if !(fs.is_finite() && fs > 0.0) {
            return Err(ConfigError::SamplingRate(fs));
        }
        if !(self.window_seconds.is_finite() && (fs * self.window_seconds).round() >= 1.0) {
            return Err(ConfigError::EmptyWindow {
                fs,
                window_s: self.window_seconds,
            });
        }
        validate_cutoffs(&self.filter, fs)?;
        if !(1..=10).contains(&self.filter.order) {
            return Err(ConfigError::FilterOrder(self.filter.order));
        }
        let h = self.peaks.height_factor;
        if !(h > 0.0 && h <= 1.0) {
            return Err(ConfigError::HeightFactor(h));
        }
        let (min, max) = (self.intervals.min_ms, self.intervals.max_ms);
        if !(min >= 0.0 && min < max) {
            return Err(ConfigError::IntervalBounds { min, max });
        }
        let RollingConfig {
            short_window,
            long_window,
        } = self.rolling;
        if short_window == 0 || short_window > long_window {
            return Err(ConfigError::RollingWindows {
                short: short_window,
                long: long_window,
            });
        }
        Ok(())
    }
}

pub(crate) fn validate_cutoffs(filter: &FilterConfig, fs: f64) -> Result<(), ConfigError> {
    let nyquist = 0.5 * fs;
    let (low, high) = (filter.lowcut_hz, filter.highcut_hz);
    if !(low > 0.0 && low < high && high < nyquist) {
        return Err(ConfigError::Cutoffs { low, high, nyquist });
    }
    Ok(())
}

/// Parse a TOML configuration and validate it.
pub fn parse_config(text: &str) -> Result<MonitorConfig> {
    let config: MonitorConfig = toml::from_str(text).context("parsing monitor config")?;
    config.validate()?;
    Ok(config)
}

/// Read and validate a TOML configuration file.
pub fn load_config(path: &Path) -> Result<MonitorConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&text).with_context(|| format!("invalid config {}", path.display()))
}
