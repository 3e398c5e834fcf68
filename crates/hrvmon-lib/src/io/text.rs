use anyhow::{Context, Result};
use std::path::Path;

/// Decode one line of sensor output into an ADC value.
///
/// Lines that are not UTF-8, are blank, or do not parse as an integer yield `None`.
pub fn decode_sample(line: &[u8]) -> Option<i64> {
    std::str::from_utf8(line).ok()?.trim().parse().ok()
}

/// Samples decoded from a recording, plus the number of lines that were dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleSeries {
    pub samples: Vec<i64>,
    pub dropped: u64,
}

/// Parse a newline-delimited recording, dropping undecodable lines (blank ones included).
/// The empty fragment after a final newline is not a line.
pub fn parse_sample_series(bytes: &[u8]) -> Result<SampleSeries> {
    let mut series = SampleSeries::default();
    let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
    for line in body.split(|&b| b == b'\n') {
        match decode_sample(line) {
            Some(value) => series.samples.push(value),
            None => series.dropped += 1,
        }
    }
    if series.samples.is_empty() {
        anyhow::bail!("no integer samples found");
    }
    Ok(series)
}

/// Read a newline-delimited recording from disk.
pub fn read_sample_series(path: &Path) -> Result<SampleSeries> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_sample_series(&bytes).with_context(|| format!("parsing samples in {}", path.display()))
}
