use crate::pipeline::WindowReport;
use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("csv output failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("json output failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("report output failed: {0}")]
    Io(#[from] io::Error),
    #[error("report sink already closed")]
    Closed,
}

/// Consumer of per-window reports.
pub trait ReportSink {
    fn write(&mut self, report: &WindowReport) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flush and stop accepting reports.
    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()
    }
}

impl<K: ReportSink + ?Sized> ReportSink for Box<K> {
    fn write(&mut self, report: &WindowReport) -> Result<(), SinkError> {
        (**self).write(report)
    }
    fn flush(&mut self) -> Result<(), SinkError> {
        (**self).flush()
    }
    fn close(&mut self) -> Result<(), SinkError> {
        (**self).close()
    }
}

/// Fan-out: every report goes to every sink, in order.
impl ReportSink for Vec<Box<dyn ReportSink>> {
    fn write(&mut self, report: &WindowReport) -> Result<(), SinkError> {
        for sink in self.iter_mut() {
            sink.write(report)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        for sink in self.iter_mut() {
            sink.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        let mut first_err = None;
        for sink in self.iter_mut() {
            if let Err(err) = sink.close() {
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

pub const REPORT_COLUMNS: [&str; 21] = [
    "timestamp",
    "window",
    "peaks",
    "valid_rri",
    "mean_rri",
    "mean_hr",
    "rmssd",
    "sdnn",
    "sdnn_rmssd_ratio",
    "short_ma",
    "long_ma",
    "cumulative_avg",
    "ma_difference",
    "cumulative_minus_long",
    "cumulative_minus_short",
    "cumulative_hr",
    "ratio_to_cumulative",
    "short_ma_to_cumulative",
    "long_ma_to_cumulative",
    "ratio_minus_cumulative",
    "dropped_lines",
];

/// Three decimals, or `nan` for an undefined value.
pub fn format_metric(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.3}"),
        _ => "nan".into(),
    }
}

fn report_record(report: &WindowReport) -> Vec<String> {
    let m = &report.metrics;
    let r = &report.rolling;
    let mut record = vec![
        report.timestamp.clone(),
        report.window.to_string(),
        report.peaks.to_string(),
        report.valid_rri.to_string(),
    ];
    record.extend(
        [
            m.mean_rri,
            m.mean_hr,
            m.rmssd,
            m.sdnn,
            m.ratio,
            r.short_ma,
            r.long_ma,
            r.cumulative_avg,
            r.ma_difference,
            r.cumulative_minus_long,
            r.cumulative_minus_short,
            r.cumulative_hr,
            r.ratio_to_cumulative,
            r.short_ma_to_cumulative,
            r.long_ma_to_cumulative,
            r.ratio_minus_cumulative,
        ]
        .into_iter()
        .map(format_metric),
    );
    record.push(report.dropped_lines.to_string());
    record
}

/// Flat CSV log, one row per window, header written before the first row.
pub struct CsvReportSink<W: Write> {
    writer: Writer<W>,
    header_written: bool,
    closed: bool,
}

impl<W: Write> CsvReportSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: WriterBuilder::new().has_headers(false).from_writer(inner),
            header_written: false,
            closed: false,
        }
    }

    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|err| SinkError::Io(err.into_error()))
    }

    fn ensure_header(&mut self) -> Result<(), SinkError> {
        if !self.header_written {
            self.writer.write_record(REPORT_COLUMNS)?;
            self.header_written = true;
        }
        Ok(())
    }
}

impl CsvReportSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create report {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReportSink for CsvReportSink<W> {
    fn write(&mut self, report: &WindowReport) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        self.ensure_header()?;
        self.writer.write_record(report_record(report))?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    /// An empty run still leaves a file with its header row.
    fn close(&mut self) -> Result<(), SinkError> {
        if self.closed {
            return Ok(());
        }
        self.ensure_header()?;
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// One JSON object per window; undefined metrics become `null`.
pub struct JsonLinesSink<W: Write> {
    inner: W,
    closed: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl JsonLinesSink<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("failed to create report {}", path.display()))?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> ReportSink for JsonLinesSink<W> {
    fn write(&mut self, report: &WindowReport) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed);
        }
        serde_json::to_writer(&mut self.inner, report)?;
        self.inner.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}

/// Human-readable single-line summary of a report.
pub fn status_line(report: &WindowReport) -> String {
    let m = &report.metrics;
    let r = &report.rolling;
    format!(
        "{} | window {} | HR {} bpm | RRI {} ms | RMSSD {} | SDNN {} | SDNN/RMSSD {} | \
         MA{{short}} {} | MA{{long}} {} | cumulative {} | MA diff {} | peaks {} | dropped {}",
        report.timestamp,
        report.window,
        format_metric(m.mean_hr),
        format_metric(m.mean_rri),
        format_metric(m.rmssd),
        format_metric(m.sdnn),
        format_metric(m.ratio),
        format_metric(r.short_ma),
        format_metric(r.long_ma),
        format_metric(r.cumulative_avg),
        format_metric(r.ma_difference),
        report.peaks,
        report.dropped_lines,
    )
}

/// Console status display, one line per window, flushed immediately.
pub struct StatusLineSink<W: Write> {
    inner: W,
}

impl<W: Write> StatusLineSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

impl StatusLineSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ReportSink for StatusLineSink<W> {
    fn write(&mut self, report: &WindowReport) -> Result<(), SinkError> {
        writeln!(self.inner, "{}", status_line(report))?;
        self.inner.flush()?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.inner.flush()?;
        Ok(())
    }
}
