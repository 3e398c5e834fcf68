pub mod conditioning;
pub mod config;
pub mod detectors;
pub mod io;
pub mod metrics;
pub mod monitor;
pub mod pipeline;
pub mod signal;
pub mod simulate;
pub mod window;

pub use config::MonitorConfig;
pub use monitor::{Monitor, MonitorError, RunSummary, ShutdownReason, ShutdownSignal};
pub use pipeline::{WindowAnalysis, WindowAnalyzer, WindowReport};
pub use signal::*;
