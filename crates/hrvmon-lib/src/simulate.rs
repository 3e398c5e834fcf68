use crate::io::source::{Pull, SampleSource, SourceError};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::f64::consts::PI;

/// Parameters of a synthetic pulse train sampled like an ADC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub fs: f64,
    /// Mean beat-to-beat interval (ms).
    pub rr_ms: f64,
    /// Uniform jitter applied to each interval (± ms).
    pub rr_jitter_ms: f64,
    /// Time of the first beat (ms).
    pub first_beat_ms: f64,
    pub baseline: f64,
    pub amplitude: f64,
    /// Gaussian pulse standard deviation (ms).
    pub pulse_width_ms: f64,
    /// Slow sinusoidal baseline drift.
    pub wander_amplitude: f64,
    pub wander_hz: f64,
    /// Uniform additive noise (± counts).
    pub noise: f64,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            fs: 200.0,
            rr_ms: 833.0,
            rr_jitter_ms: 0.0,
            first_beat_ms: 400.0,
            baseline: 512.0,
            amplitude: 400.0,
            pulse_width_ms: 20.0,
            wander_amplitude: 0.0,
            wander_hz: 0.25,
            noise: 0.0,
            seed: 0,
        }
    }
}

impl SyntheticConfig {
    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.rr_ms = 60_000.0 / bpm;
        self
    }
}

/// Endless, seeded stream of integer samples containing Gaussian beats.
pub struct SyntheticSource {
    cfg: SyntheticConfig,
    rng: StdRng,
    index: u64,
    beats: VecDeque<f64>,
    next_beat: f64,
}

impl SyntheticSource {
    pub fn new(cfg: SyntheticConfig) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        let next_beat = cfg.first_beat_ms / 1000.0;
        Self {
            cfg,
            rng,
            index: 0,
            beats: VecDeque::new(),
            next_beat,
        }
    }

    fn next_interval(&mut self) -> f64 {
        let jitter = self.cfg.rr_jitter_ms;
        let offset = if jitter > 0.0 {
            self.rng.gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        (self.cfg.rr_ms + offset).max(1.0) / 1000.0
    }

    pub fn next_sample(&mut self) -> i64 {
        let t = self.index as f64 / self.cfg.fs;
        self.index += 1;

        let width = (self.cfg.pulse_width_ms / 1000.0).max(1e-6);
        let reach = 5.0 * width;
        while self.next_beat <= t + reach {
            self.beats.push_back(self.next_beat);
            self.next_beat += self.next_interval();
        }
        while self.beats.front().map_or(false, |&b| b < t - reach) {
            self.beats.pop_front();
        }

        let mut value =
            self.cfg.baseline + self.cfg.wander_amplitude * (2.0 * PI * self.cfg.wander_hz * t).sin();
        for &beat in &self.beats {
            let z = (t - beat) / width;
            value += self.cfg.amplitude * (-0.5 * z * z).exp();
        }
        if self.cfg.noise > 0.0 {
            value += self.rng.gen_range(-self.cfg.noise..=self.cfg.noise);
        }
        value.round() as i64
    }
}

impl Iterator for SyntheticSource {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        Some(self.next_sample())
    }
}

impl SampleSource for SyntheticSource {
    fn pull(&mut self) -> Result<Pull, SourceError> {
        Ok(Pull::Sample(self.next_sample()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let cfg = SyntheticConfig {
            rr_jitter_ms: 40.0,
            noise: 8.0,
            seed: 11,
            ..SyntheticConfig::default()
        };
        let a: Vec<i64> = SyntheticSource::new(cfg.clone()).take(500).collect();
        let b: Vec<i64> = SyntheticSource::new(cfg).take(500).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn pulses_land_on_schedule() {
        let samples: Vec<i64> = SyntheticSource::new(SyntheticConfig::default())
            .take(400)
            .collect();
        assert_eq!(samples[0], 512);
        // First beat at 400 ms = sample 80.
        let argmax = (0..samples.len()).max_by_key(|&i| samples[i]).unwrap();
        assert_eq!(argmax, 80);
        assert_eq!(samples[80], 912);
    }

    #[test]
    fn bpm_sets_interval() {
        let cfg = SyntheticConfig::default().with_bpm(75.0);
        assert!((cfg.rr_ms - 800.0).abs() < 1e-9);
    }
}
