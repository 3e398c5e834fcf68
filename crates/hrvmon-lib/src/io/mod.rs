pub mod report;
pub mod source;
pub mod text;

pub use report::{CsvReportSink, JsonLinesSink, ReportSink, SinkError, StatusLineSink};
pub use source::{IterSource, LineSource, Pull, SampleSource, SourceError, ThreadedLineSource};
