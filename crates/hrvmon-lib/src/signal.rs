use serde::{Deserialize, Serialize};

/// Basic typed time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    /// Lift a window of raw ADC counts into a real-valued series.
    pub fn from_raw(fs: f64, raw: &[i64]) -> Self {
        Self {
            fs,
            data: raw.iter().map(|&v| v as f64).collect(),
        }
    }
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn duration(&self) -> f64 {
        self.data.len() as f64 / self.fs
    }
}

/// Point events on a timeline (e.g., R-peaks indices)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Events {
    pub indices: Vec<usize>,
}

impl Events {
    pub fn from_indices(indices: Vec<usize>) -> Self {
        Self { indices }
    }
    pub fn len(&self) -> usize {
        self.indices.len()
    }
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// RR intervals (milliseconds)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RRSeries {
    pub rr_ms: Vec<f64>,
}

impl RRSeries {
    pub fn from_events(events: &Events, fs: f64) -> Self {
        let mut rr_ms = Vec::with_capacity(events.len().saturating_sub(1));
        for w in events.indices.windows(2) {
            let dt = (w[1] as f64 - w[0] as f64) / fs * 1000.0;
            rr_ms.push(dt);
        }
        Self { rr_ms }
    }

    /// Keep intervals inside `[min_ms, max_ms]`, preserving order.
    pub fn within(&self, min_ms: f64, max_ms: f64) -> Self {
        Self {
            rr_ms: self
                .rr_ms
                .iter()
                .copied()
                .filter(|rr| (min_ms..=max_ms).contains(rr))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rr_ms.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rr_ms.is_empty()
    }
}
