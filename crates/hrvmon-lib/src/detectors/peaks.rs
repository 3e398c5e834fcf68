use crate::{
    config::PeakConfig,
    signal::{Events, TimeSeries},
};

/// Height/distance peak picker for conditioned heartbeat signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakDetector {
    /// Fraction of the window maximum a candidate must exceed.
    pub height_factor: f64,
    /// Minimum spacing between retained peaks, in samples.
    pub min_distance: Option<usize>,
    /// Peak-to-peak range at or below which the window counts as flat.
    pub flat_tolerance: f64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self::from_config(&PeakConfig::default(), 200.0)
    }
}

impl PeakDetector {
    pub fn new(height_factor: f64, min_distance: Option<usize>) -> Self {
        Self {
            height_factor,
            min_distance,
            flat_tolerance: PeakConfig::default().flat_tolerance,
        }
    }

    pub fn from_config(cfg: &PeakConfig, fs: f64) -> Self {
        Self {
            height_factor: cfg.height_factor,
            min_distance: cfg.min_distance_samples(fs),
            flat_tolerance: cfg.flat_tolerance,
        }
    }

    pub fn detect(&self, signal: &TimeSeries) -> Events {
        Events::from_indices(self.detect_indices(&signal.data))
    }

    pub fn detect_indices(&self, data: &[f64]) -> Vec<usize> {
        if data.len() < 3 {
            return Vec::new();
        }
        let (min, max) = data
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        // Also rejects NaN-only windows.
        if !(max - min > self.flat_tolerance) {
            return Vec::new();
        }

        let threshold = self.height_factor * max;
        let candidates: Vec<usize> = local_maxima(data)
            .into_iter()
            .filter(|&i| data[i] > threshold)
            .collect();

        match self.min_distance {
            Some(distance) if distance > 1 => select_by_distance(data, &candidates, distance),
            _ => candidates,
        }
    }
}

/// Indices of local maxima. A flat-topped maximum reports the middle of its plateau.
fn local_maxima(data: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    let last = data.len() - 1;
    let mut i = 1;
    while i < last {
        if data[i - 1] < data[i] {
            let mut ahead = i + 1;
            while ahead < last && data[ahead] == data[i] {
                ahead += 1;
            }
            if data[ahead] < data[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Drop candidates closer than `distance` to a taller (or equally tall, earlier) one.
fn select_by_distance(data: &[f64], candidates: &[usize], distance: usize) -> Vec<usize> {
    let mut keep = vec![true; candidates.len()];
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        data[candidates[b]]
            .total_cmp(&data[candidates[a]])
            .then(a.cmp(&b))
    });

    for &i in &order {
        if !keep[i] {
            continue;
        }
        let pos = candidates[i];
        for j in (0..i).rev() {
            if pos - candidates[j] >= distance {
                break;
            }
            keep[j] = false;
        }
        for j in i + 1..candidates.len() {
            if candidates[j] - pos >= distance {
                break;
            }
            keep[j] = false;
        }
    }

    candidates
        .iter()
        .zip(keep)
        .filter_map(|(&idx, kept)| kept.then_some(idx))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn series(data: Vec<f64>) -> TimeSeries {
        TimeSeries { fs: 200.0, data }
    }

    #[test]
    fn finds_maxima_above_height_threshold() {
        let data = vec![0.0, 1.0, 0.0, 4.0, 0.0, 10.0, 0.0, 6.0, 0.0];
        let detector = PeakDetector::new(0.5, None);
        assert_eq!(detector.detect(&series(data)).indices, vec![5, 7]);
    }

    #[test]
    fn plateau_reports_its_middle() {
        let data = vec![0.0, 5.0, 5.0, 5.0, 0.0, 0.0];
        let detector = PeakDetector::new(0.5, None);
        assert_eq!(detector.detect_indices(&data), vec![2]);
    }

    #[test]
    fn taller_peak_wins_distance_conflict() {
        let mut data = vec![0.0; 40];
        data[10] = 8.0;
        data[14] = 10.0;
        data[30] = 9.0;
        let detector = PeakDetector::new(0.5, Some(10));
        assert_eq!(detector.detect_indices(&data), vec![14, 30]);
    }

    #[test]
    fn earlier_peak_wins_a_tie() {
        let mut data = vec![0.0; 30];
        data[10] = 7.0;
        data[15] = 7.0;
        let detector = PeakDetector::new(0.5, Some(10));
        assert_eq!(detector.detect_indices(&data), vec![10]);
    }

    #[test]
    fn retained_peaks_respect_min_distance() {
        let data: Vec<f64> = (0..2000)
            .map(|i| ((i as f64) * 0.37).sin() + ((i as f64) * 0.05).sin())
            .collect();
        let detector = PeakDetector::new(0.1, Some(120));
        let peaks = detector.detect_indices(&data);
        assert!(!peaks.is_empty());
        assert!(peaks.windows(2).all(|w| w[1] - w[0] >= 120));
    }

    #[test]
    fn flat_signal_has_no_peaks() {
        let detector = PeakDetector::default();
        assert!(detector.detect(&series(vec![512.0; 2000])).is_empty());
        assert!(detector.detect(&series(vec![1e-9; 50])).is_empty());
    }
}
