//! Streaming driver: pulls samples, cuts fixed windows, runs the analysis
//! pipeline on each and hands the reports to a sink until told to stop.

use crate::{
    conditioning::ConditioningError,
    config::{ConfigError, MonitorConfig, UndefinedRowPolicy},
    io::{Pull, ReportSink, SampleSource, SinkError, SourceError},
    pipeline::{WindowAnalyzer, WindowReport},
    window::WindowBuffer,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Cooperative stop request shared between the monitor and whoever cancels it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MonitorState {
    Accumulating,
    Analyzing,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownReason {
    Cancelled,
    SourceClosed,
    WindowLimit,
}

/// Totals reported when a run ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub reason: ShutdownReason,
    pub samples: u64,
    pub windows_reported: u64,
    /// Windows whose conditioning failed.
    pub windows_skipped: u64,
    /// Undefined windows not written under the `skip` policy.
    pub windows_suppressed: u64,
    /// Samples of the incomplete window discarded at shutdown.
    pub discarded_partial: usize,
    pub dropped_lines: u64,
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What became of a completed window.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Report(WindowReport),
    /// Undefined metrics under the `skip` policy; rolling state was still updated.
    Suppressed(WindowReport),
    Skipped(ConditioningError),
}

type Clock = Box<dyn Fn() -> String + Send>;

fn local_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub struct Monitor {
    analyzer: WindowAnalyzer,
    buffer: WindowBuffer,
    policy: UndefinedRowPolicy,
    window_limit: Option<u64>,
    clock: Clock,
    state: MonitorState,
    samples: u64,
    windows: u64,
    reported: u64,
    skipped: u64,
    suppressed: u64,
}

impl Monitor {
    pub fn new(config: &MonitorConfig) -> Result<Self, ConfigError> {
        let analyzer = WindowAnalyzer::new(config)?;
        Ok(Self {
            analyzer,
            buffer: WindowBuffer::new(config.window_len()),
            policy: config.undefined_rows,
            window_limit: None,
            clock: Box::new(local_timestamp),
            state: MonitorState::Accumulating,
            samples: 0,
            windows: 0,
            reported: 0,
            skipped: 0,
            suppressed: 0,
        })
    }

    /// Stop after this many completed windows.
    pub fn with_window_limit(mut self, windows: u64) -> Self {
        self.window_limit = Some(windows);
        self
    }

    pub fn with_clock(mut self, clock: impl Fn() -> String + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn analyzer(&self) -> &WindowAnalyzer {
        &self.analyzer
    }

    pub fn window_len(&self) -> usize {
        self.buffer.capacity()
    }

    /// Feed one sample; returns the outcome when it completes a window.
    pub fn push_sample(&mut self, sample: i64, dropped_lines: u64) -> Option<WindowOutcome> {
        if self.state == MonitorState::Shutdown {
            return None;
        }
        self.samples += 1;
        if !self.buffer.append(sample) {
            return None;
        }
        let window = self.buffer.take_window()?;
        self.state = MonitorState::Analyzing;
        self.windows += 1;
        let outcome = match self
            .analyzer
            .process(&window, self.windows, (self.clock)(), dropped_lines)
        {
            Ok(report) => {
                if self.policy == UndefinedRowPolicy::Skip && report.metrics.is_undefined() {
                    debug!("window {} undefined, not reported", report.window);
                    self.suppressed += 1;
                    WindowOutcome::Suppressed(report)
                } else {
                    WindowOutcome::Report(report)
                }
            }
            Err(err) => {
                warn!("skipping window {}: {}", self.windows, err);
                self.skipped += 1;
                WindowOutcome::Skipped(err)
            }
        };
        self.state = MonitorState::Accumulating;
        Some(outcome)
    }

    /// Drive `source` into `sink` until cancelled, the source closes, the window
    /// limit is reached, or an I/O error occurs. The partial window is discarded and
    /// the sink closed before the source on every exit path.
    pub fn run<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        shutdown: &ShutdownSignal,
    ) -> Result<RunSummary, MonitorError>
    where
        S: SampleSource + ?Sized,
        K: ReportSink + ?Sized,
    {
        info!(
            "monitor started: {} samples per window",
            self.buffer.capacity()
        );
        let pumped = self.pump(source, sink, shutdown);

        self.state = MonitorState::Shutdown;
        let discarded_partial = self.buffer.clear();
        let closed = sink.close();
        source.close();

        let reason = pumped?;
        closed?;
        let summary = RunSummary {
            reason,
            samples: self.samples,
            windows_reported: self.reported,
            windows_skipped: self.skipped,
            windows_suppressed: self.suppressed,
            discarded_partial,
            dropped_lines: source.dropped(),
        };
        info!(
            "monitor stopped ({:?}): {} windows reported, {} skipped, {} suppressed, {} partial samples discarded, {} lines dropped",
            summary.reason,
            summary.windows_reported,
            summary.windows_skipped,
            summary.windows_suppressed,
            summary.discarded_partial,
            summary.dropped_lines
        );
        Ok(summary)
    }

    fn pump<S, K>(
        &mut self,
        source: &mut S,
        sink: &mut K,
        shutdown: &ShutdownSignal,
    ) -> Result<ShutdownReason, MonitorError>
    where
        S: SampleSource + ?Sized,
        K: ReportSink + ?Sized,
    {
        loop {
            if shutdown.is_triggered() || self.state == MonitorState::Shutdown {
                return Ok(ShutdownReason::Cancelled);
            }
            if self.window_limit.map_or(false, |limit| self.windows >= limit) {
                return Ok(ShutdownReason::WindowLimit);
            }
            match source.pull()? {
                Pull::Sample(sample) => {
                    if let Some(WindowOutcome::Report(report)) =
                        self.push_sample(sample, source.dropped())
                    {
                        sink.write(&report)?;
                        self.reported += 1;
                    }
                }
                Pull::Pending => continue,
                Pull::Closed => return Ok(ShutdownReason::SourceClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::IterSource;
    use crate::simulate::{SyntheticConfig, SyntheticSource};

    #[derive(Default)]
    struct RecordingSink {
        rows: Vec<WindowReport>,
        closed: bool,
        fail_writes: bool,
    }

    impl ReportSink for RecordingSink {
        fn write(&mut self, report: &WindowReport) -> Result<(), SinkError> {
            if self.closed {
                return Err(SinkError::Closed);
            }
            if self.fail_writes {
                return Err(SinkError::Io(std::io::Error::other("disk full")));
            }
            self.rows.push(report.clone());
            Ok(())
        }

        fn close(&mut self) -> Result<(), SinkError> {
            self.closed = true;
            Ok(())
        }
    }

    /// Synthetic stream that requests shutdown after a fixed number of samples.
    struct CancellingSource {
        inner: SyntheticSource,
        remaining: usize,
        signal: ShutdownSignal,
        closed: bool,
    }

    impl SampleSource for CancellingSource {
        fn pull(&mut self) -> Result<Pull, SourceError> {
            if self.remaining == 0 {
                self.signal.trigger();
                return Ok(Pull::Pending);
            }
            self.remaining -= 1;
            self.inner.pull()
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    /// Synthetic stream whose device fails after a fixed number of samples.
    struct FailingSource {
        inner: SyntheticSource,
        remaining: usize,
        closed: bool,
    }

    impl SampleSource for FailingSource {
        fn pull(&mut self) -> Result<Pull, SourceError> {
            if self.remaining == 0 {
                return Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device unplugged",
                )));
            }
            self.remaining -= 1;
            self.inner.pull()
        }

        fn close(&mut self) {
            self.closed = true;
        }
    }

    fn monitor(config: &MonitorConfig) -> Monitor {
        Monitor::new(config)
            .unwrap()
            .with_clock(|| "2024-05-01 12:00:00".to_string())
    }

    #[test]
    fn flat_input_emits_undefined_row_by_default() {
        let mut monitor = monitor(&MonitorConfig::default());
        let mut source = IterSource::new(vec![512_i64; 2000]);
        let mut sink = RecordingSink::default();
        let summary = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap();

        assert_eq!(summary.reason, ShutdownReason::SourceClosed);
        assert_eq!(summary.windows_reported, 1);
        assert_eq!(sink.rows.len(), 1);
        let row = &sink.rows[0];
        assert!(row.peaks <= 1);
        assert!(row.metrics.is_undefined());
        assert_eq!(row.rolling.cumulative_avg, None);
        assert!(sink.closed);
        assert_eq!(monitor.state(), MonitorState::Shutdown);
    }

    #[test]
    fn flat_input_is_suppressed_under_skip_policy() {
        let config = MonitorConfig {
            undefined_rows: UndefinedRowPolicy::Skip,
            ..MonitorConfig::default()
        };
        let mut monitor = monitor(&config);
        let mut source = IterSource::new(vec![512_i64; 2000]);
        let mut sink = RecordingSink::default();
        let summary = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap();

        assert!(sink.rows.is_empty());
        assert_eq!(summary.windows_reported, 0);
        assert_eq!(summary.windows_suppressed, 1);
    }

    #[test]
    fn cancellation_mid_window_discards_partial() {
        let signal = ShutdownSignal::new();
        let mut source = CancellingSource {
            inner: SyntheticSource::new(SyntheticConfig::default()),
            remaining: 2500,
            signal: signal.clone(),
            closed: false,
        };
        let mut monitor = monitor(&MonitorConfig::default());
        let mut sink = RecordingSink::default();
        let summary = monitor.run(&mut source, &mut sink, &signal).unwrap();

        assert_eq!(summary.reason, ShutdownReason::Cancelled);
        assert_eq!(summary.samples, 2500);
        assert_eq!(summary.discarded_partial, 500);
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].window, 1);
        assert!(sink.rows[0].metrics.ratio.is_some());
        assert!(sink.closed);
        assert!(source.closed);
    }

    #[test]
    fn window_limit_stops_on_a_boundary() {
        let mut monitor = monitor(&MonitorConfig::default()).with_window_limit(3);
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        let mut sink = RecordingSink::default();
        let summary = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap();

        assert_eq!(summary.reason, ShutdownReason::WindowLimit);
        assert_eq!(summary.discarded_partial, 0);
        let windows: Vec<u64> = sink.rows.iter().map(|r| r.window).collect();
        assert_eq!(windows, vec![1, 2, 3]);
        assert!(sink.rows[2].rolling.cumulative_avg.is_some());
        assert_eq!(sink.rows[2].rolling.short_ma, None);
    }

    #[test]
    fn dropped_lines_are_reported() {
        let mut text = String::from("junk\n");
        let mut synth = SyntheticSource::new(SyntheticConfig::default());
        for _ in 0..2000 {
            text.push_str(&format!("{}\n", synth.next_sample()));
        }
        let mut source = crate::io::LineSource::new(std::io::Cursor::new(text));
        let mut monitor = monitor(&MonitorConfig::default());
        let mut sink = RecordingSink::default();
        let summary = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap();
        assert_eq!(sink.rows[0].dropped_lines, 1);
        assert_eq!(summary.dropped_lines, 1);
    }

    #[test]
    fn windows_too_short_to_filter_are_skipped() {
        let config = MonitorConfig {
            window_seconds: 0.1,
            ..MonitorConfig::default()
        };
        let mut monitor = monitor(&config);
        assert_eq!(monitor.window_len(), 20);
        let samples: Vec<i64> = SyntheticSource::new(SyntheticConfig::default())
            .take(100)
            .collect();
        let mut source = IterSource::new(samples);
        let mut sink = RecordingSink::default();
        let summary = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap();

        assert_eq!(summary.reason, ShutdownReason::SourceClosed);
        assert_eq!(summary.windows_skipped, 5);
        assert_eq!(summary.windows_reported, 0);
        assert!(sink.rows.is_empty());
        assert!(sink.closed);
    }

    #[test]
    fn skipped_window_is_reported_by_push_sample() {
        let config = MonitorConfig {
            window_seconds: 0.1,
            ..MonitorConfig::default()
        };
        let mut monitor = monitor(&config);
        let outcomes: Vec<WindowOutcome> =
            (0..20).filter_map(|_| monitor.push_sample(512, 0)).collect();
        assert_eq!(
            outcomes,
            vec![WindowOutcome::Skipped(ConditioningError::WindowTooShort {
                len: 20,
                required: 34,
            })]
        );
    }

    #[test]
    fn source_failure_closes_sink_and_keeps_rows() {
        let mut monitor = monitor(&MonitorConfig::default());
        let mut source = FailingSource {
            inner: SyntheticSource::new(SyntheticConfig::default()),
            remaining: 2300,
            closed: false,
        };
        let mut sink = RecordingSink::default();
        let err = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap_err();

        assert!(matches!(err, MonitorError::Source(SourceError::Io(_))));
        assert_eq!(sink.rows.len(), 1);
        assert_eq!(sink.rows[0].window, 1);
        assert!(sink.closed);
        assert!(source.closed);
        assert_eq!(monitor.state(), MonitorState::Shutdown);
    }

    #[test]
    fn sink_failure_still_closes_everything() {
        let mut monitor = monitor(&MonitorConfig::default());
        let mut source = SyntheticSource::new(SyntheticConfig::default());
        let mut sink = RecordingSink {
            fail_writes: true,
            ..RecordingSink::default()
        };
        let err = monitor
            .run(&mut source, &mut sink, &ShutdownSignal::new())
            .unwrap_err();
        assert!(matches!(err, MonitorError::Sink(SinkError::Io(_))));
        assert!(sink.closed);
        assert_eq!(monitor.push_sample(0, 0), None);
    }
}
