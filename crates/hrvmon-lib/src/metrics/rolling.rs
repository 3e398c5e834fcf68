use crate::config::RollingConfig;
use std::collections::VecDeque;

/// History of valid SDNN/RMSSD ratios.
///
/// Only the most recent `max(short, long)` values are retained; the cumulative
/// average is carried by a running `(sum, count)` over every value ever appended.
/// Moving averages cover the last *k* valid values, undefined windows never enter
/// the history.
#[derive(Debug, Clone)]
pub struct RollingStatsTracker {
    history: VecDeque<f64>,
    short_window: usize,
    long_window: usize,
    sum: f64,
    count: u64,
}

impl Default for RollingStatsTracker {
    fn default() -> Self {
        Self::from_config(&RollingConfig::default())
    }
}

impl RollingStatsTracker {
    pub fn new(short_window: usize, long_window: usize) -> Self {
        let capacity = short_window.max(long_window).max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            short_window,
            long_window,
            sum: 0.0,
            count: 0,
        }
    }

    pub fn from_config(cfg: &RollingConfig) -> Self {
        Self::new(cfg.short_window, cfg.long_window)
    }

    fn capacity(&self) -> usize {
        self.short_window.max(self.long_window).max(1)
    }

    /// Record a window's ratio. Undefined ratios are ignored; returns whether it was kept.
    pub fn append(&mut self, ratio: Option<f64>) -> bool {
        let Some(value) = ratio.filter(|v| v.is_finite()) else {
            return false;
        };
        if self.history.len() == self.capacity() {
            self.history.pop_front();
        }
        self.history.push_back(value);
        self.sum += value;
        self.count += 1;
        true
    }

    /// Number of valid ratios appended since start.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Retained suffix of the history, oldest first.
    pub fn recent(&self) -> impl Iterator<Item = f64> + '_ {
        self.history.iter().copied()
    }

    pub fn cumulative_average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn short_ma(&self) -> Option<f64> {
        self.tail_mean(self.short_window)
    }

    pub fn long_ma(&self) -> Option<f64> {
        self.tail_mean(self.long_window)
    }

    pub fn ma_difference(&self) -> Option<f64> {
        Some(self.short_ma()? - self.long_ma()?)
    }

    pub fn cumulative_minus_long(&self) -> Option<f64> {
        Some(self.cumulative_average()? - self.long_ma()?)
    }

    pub fn cumulative_minus_short(&self) -> Option<f64> {
        Some(self.cumulative_average()? - self.short_ma()?)
    }

    fn tail_mean(&self, k: usize) -> Option<f64> {
        if k == 0 || self.history.len() < k {
            return None;
        }
        let tail = self.history.iter().skip(self.history.len() - k);
        Some(tail.sum::<f64>() / k as f64)
    }
}

/// Running arithmetic mean over defined values.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    pub fn push(&mut self, value: Option<f64>) {
        if let Some(v) = value.filter(|v| v.is_finite()) {
            self.sum += v;
            self.count += 1;
        }
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn filled(values: &[f64]) -> RollingStatsTracker {
        let mut tracker = RollingStatsTracker::default();
        for &v in values {
            tracker.append(Some(v));
        }
        tracker
    }

    #[test]
    fn undefined_ratios_are_skipped() {
        let mut tracker = RollingStatsTracker::default();
        assert!(!tracker.append(None));
        assert!(!tracker.append(Some(f64::NAN)));
        assert!(tracker.append(Some(1.5)));
        assert_eq!(tracker.count(), 1);
        assert_eq!(tracker.cumulative_average(), Some(1.5));
    }

    #[test]
    fn empty_tracker_is_undefined() {
        let tracker = RollingStatsTracker::default();
        assert_eq!(tracker.cumulative_average(), None);
        assert_eq!(tracker.short_ma(), None);
        assert_eq!(tracker.long_ma(), None);
        assert_eq!(tracker.ma_difference(), None);
    }

    #[test]
    fn moving_averages_need_enough_history() {
        let values: Vec<f64> = (1..=19).map(|v| v as f64).collect();
        let mut tracker = filled(&values[..4]);
        assert_eq!(tracker.short_ma(), None);
        tracker.append(Some(values[4]));
        assert_eq!(tracker.short_ma(), Some(3.0));
        assert_eq!(tracker.long_ma(), None);
        assert_eq!(tracker.cumulative_minus_long(), None);
        assert_eq!(tracker.cumulative_minus_short(), Some(0.0));

        let mut tracker = filled(&values);
        assert_eq!(tracker.long_ma(), None);
        tracker.append(Some(20.0));
        assert_eq!(tracker.long_ma(), Some(10.5));
        assert_eq!(tracker.short_ma(), Some(18.0));
        assert_eq!(tracker.ma_difference(), Some(7.5));
    }

    #[test]
    fn history_is_bounded_but_cumulative_covers_everything() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let tracker = filled(&values);
        assert_eq!(tracker.recent().count(), 20);
        assert_eq!(tracker.recent().next(), Some(81.0));
        assert_eq!(tracker.cumulative_average(), Some(50.5));
        assert_eq!(tracker.long_ma(), Some(90.5));
        assert_eq!(tracker.short_ma(), Some(98.0));
        assert_eq!(tracker.cumulative_minus_long(), Some(50.5 - 90.5));
    }

    #[test]
    fn cumulative_average_matches_recomputation() {
        let mut rng = StdRng::seed_from_u64(7);
        let values: Vec<f64> = (0..5000).map(|_| rng.gen_range(0.2..4.0)).collect();
        let tracker = filled(&values);
        let expected = values.iter().rev().sum::<f64>() / values.len() as f64;
        let actual = tracker.cumulative_average().unwrap();
        assert!((actual - expected).abs() < 1e-9, "{actual} vs {expected}");
    }

    #[test]
    fn running_mean_ignores_undefined() {
        let mut mean = RunningMean::default();
        assert_eq!(mean.mean(), None);
        mean.push(Some(60.0));
        mean.push(None);
        mean.push(Some(80.0));
        assert_eq!(mean.mean(), Some(70.0));
        assert_eq!(mean.count(), 2);
    }
}
