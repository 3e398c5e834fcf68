/// Fixed-length accumulator for raw samples.
///
/// The buffer only ever hands out complete windows of exactly `len` samples.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    len: usize,
    samples: Vec<i64>,
}

impl WindowBuffer {
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            len,
            samples: Vec::with_capacity(len),
        }
    }

    /// Window length derived from a sampling rate and duration (rounded, at least 1).
    pub fn window_len(fs: f64, window_s: f64) -> usize {
        ((fs * window_s).round() as usize).max(1)
    }

    /// Append one sample. Returns `true` once a full window is available.
    pub fn append(&mut self, sample: i64) -> bool {
        self.samples.push(sample);
        self.is_full()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() >= self.len
    }

    /// Take the completed window and reset the accumulator.
    pub fn take_window(&mut self) -> Option<Vec<i64>> {
        if !self.is_full() {
            return None;
        }
        let window = std::mem::replace(&mut self.samples, Vec::with_capacity(self.len));
        Some(window)
    }

    /// Drop any partially accumulated samples.
    pub fn clear(&mut self) -> usize {
        let dropped = self.samples.len();
        self.samples.clear();
        dropped
    }

    pub fn pending(&self) -> usize {
        self.samples.len()
    }

    pub fn capacity(&self) -> usize {
        self.len
    }
}
