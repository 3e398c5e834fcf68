use crate::config::{validate_cutoffs, ConfigError, FilterConfig};
use crate::signal::TimeSeries;
use sci_rs::signal::filter::{
    design::{butter_dyn, DigitalFilter, FilterBandType, FilterOutputType, Sos},
    sosfiltfilt_dyn,
};
use thiserror::Error;

/// Why a window could not be conditioned. The window is skipped, the run continues.
#[derive(Debug, Clone, Copy, Error, PartialEq)]
pub enum ConditioningError {
    #[error("window of {len} samples is too short for the band-pass filter (need {required})")]
    WindowTooShort { len: usize, required: usize },
    #[error("filter section {section} has a pole on or outside the unit circle")]
    Unstable { section: usize },
    #[error("filtered signal contains non-finite values")]
    NonFinite,
}

/// Zero-phase Butterworth band-pass applied to whole windows.
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    fs: f64,
    sections: Vec<Sos<f64>>,
}

impl SignalConditioner {
    pub fn new(fs: f64, cfg: &FilterConfig) -> Result<Self, ConfigError> {
        validate_cutoffs(cfg, fs)?;
        if !(1..=10).contains(&cfg.order) {
            return Err(ConfigError::FilterOrder(cfg.order));
        }
        let design = butter_dyn(
            cfg.order,
            vec![cfg.lowcut_hz, cfg.highcut_hz],
            Some(FilterBandType::Bandpass),
            Some(false),
            Some(FilterOutputType::Sos),
            Some(fs),
        );
        let DigitalFilter::Sos(filter) = design else {
            return Err(ConfigError::FilterDesign);
        };
        Ok(Self {
            fs,
            sections: filter.sos,
        })
    }

    pub fn sections(&self) -> &[Sos<f64>] {
        &self.sections
    }

    /// Edge extension used by the forward-backward pass: three times the
    /// effective tap count of the section cascade.
    pub fn padlen(&self) -> usize {
        let zero_b = self.sections.iter().filter(|s| s.b[2] == 0.0).count();
        let zero_a = self.sections.iter().filter(|s| s.a[2] == 0.0).count();
        let ntaps = 2 * self.sections.len() + 1 - zero_b.min(zero_a);
        3 * ntaps
    }

    /// Smallest window the filter accepts.
    pub fn min_window_len(&self) -> usize {
        self.padlen() + 1
    }

    /// Band-pass a window. Output has the same length and no net phase shift.
    pub fn condition(&self, window: &TimeSeries) -> Result<TimeSeries, ConditioningError> {
        let required = self.min_window_len();
        if window.len() < required {
            return Err(ConditioningError::WindowTooShort {
                len: window.len(),
                required,
            });
        }
        if let Some(section) = self.sections.iter().position(|s| !is_stable(s)) {
            return Err(ConditioningError::Unstable { section });
        }
        let data = sosfiltfilt_dyn(window.data.iter(), &self.sections);
        if data.iter().any(|v| !v.is_finite()) {
            return Err(ConditioningError::NonFinite);
        }
        Ok(TimeSeries { fs: self.fs, data })
    }
}

/// Both poles of `1 + a1 z^-1 + a2 z^-2` strictly inside the unit circle.
fn is_stable(section: &Sos<f64>) -> bool {
    let a0 = section.a[0];
    if a0 == 0.0 || !a0.is_finite() {
        return false;
    }
    let (a1, a2) = (section.a[1] / a0, section.a[2] / a0);
    a2.abs() < 1.0 && a1.abs() < 1.0 + a2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn conditioner() -> SignalConditioner {
        SignalConditioner::new(200.0, &FilterConfig::default()).unwrap()
    }

    fn sine(fs: f64, hz: f64, amp: f64, offset: f64, n: usize) -> TimeSeries {
        let data = (0..n)
            .map(|i| offset + amp * (2.0 * PI * hz * i as f64 / fs).sin())
            .collect();
        TimeSeries { fs, data }
    }

    fn peak_abs(data: &[f64]) -> f64 {
        data.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
    }

    #[test]
    fn band_pass_design_is_stable_cascade() {
        let c = conditioner();
        assert_eq!(c.sections().len(), 5);
        assert!(c.sections().iter().all(is_stable));
        assert_eq!(c.padlen(), 33);
    }

    #[test]
    fn keeps_length_and_passes_in_band_tone() {
        let input = sine(200.0, 5.0, 100.0, 512.0, 2000);
        let out = conditioner().condition(&input).unwrap();
        assert_eq!(out.len(), input.len());
        let middle = &out.data[400..1600];
        let amp = peak_abs(middle);
        assert!((amp - 100.0).abs() < 2.0, "in-band amplitude {amp}");
        let mean = middle.iter().sum::<f64>() / middle.len() as f64;
        assert!(mean.abs() < 1.0, "DC offset should be removed, mean {mean}");
    }

    #[test]
    fn attenuates_out_of_band_tone() {
        let input = sine(200.0, 60.0, 100.0, 0.0, 2000);
        let out = conditioner().condition(&input).unwrap();
        assert!(peak_abs(&out.data[400..1600]) < 1.0);
    }

    #[test]
    fn flat_window_stays_flat() {
        let out = conditioner()
            .condition(&TimeSeries {
                fs: 200.0,
                data: vec![512.0; 2000],
            })
            .unwrap();
        assert!(peak_abs(&out.data) < 1e-6);
    }

    #[test]
    fn introduces_no_phase_shift() {
        let fs = 200.0;
        let data: Vec<f64> = (0..2000)
            .map(|i| {
                let t = (i as f64 - 1000.0) / fs;
                1000.0 * (-0.5 * (t / 0.02).powi(2)).exp()
            })
            .collect();
        let out = conditioner().condition(&TimeSeries { fs, data }).unwrap();
        let argmax = out
            .data
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert!(argmax.abs_diff(1000) <= 1, "peak moved to {argmax}");
    }

    #[test]
    fn short_window_is_a_conditioning_failure() {
        let c = conditioner();
        let input = TimeSeries {
            fs: 200.0,
            data: vec![0.0; c.min_window_len() - 1],
        };
        assert!(matches!(
            c.condition(&input),
            Err(ConditioningError::WindowTooShort {
                len: 33,
                required: 34
            })
        ));
    }

    #[test]
    fn non_finite_samples_are_reported() {
        let mut data = vec![0.0; 200];
        data[100] = f64::NAN;
        assert!(matches!(
            conditioner().condition(&TimeSeries { fs: 200.0, data }),
            Err(ConditioningError::NonFinite)
        ));
    }

    #[test]
    fn unstable_section_is_rejected() {
        let mut c = conditioner();
        c.sections[1].a = [1.0, 0.0, 1.5];
        assert!(matches!(
            c.condition(&sine(200.0, 5.0, 1.0, 0.0, 200)),
            Err(ConditioningError::Unstable { section: 1 })
        ));
    }

    #[test]
    fn rejects_cutoffs_beyond_nyquist() {
        let cfg = FilterConfig {
            lowcut_hz: 0.5,
            highcut_hz: 30.0,
            order: 5,
        };
        assert!(matches!(
            SignalConditioner::new(40.0, &cfg),
            Err(ConfigError::Cutoffs { .. })
        ));
    }
}
