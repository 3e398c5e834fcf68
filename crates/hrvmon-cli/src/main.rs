use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hrvmon_lib::{
    config::{load_config, UndefinedRowPolicy},
    io::{
        text as text_io, CsvReportSink, JsonLinesSink, ReportSink, StatusLineSink,
        ThreadedLineSource,
    },
    simulate::{SyntheticConfig, SyntheticSource},
    Monitor, MonitorConfig, RunSummary, ShutdownSignal, WindowAnalyzer,
};
use log::info;
use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};

#[derive(Parser)]
#[command(
    name = "hrvmon",
    version,
    about = "Windowed heart-rate variability monitor for pulse sensor streams"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum ReportFormat {
    Csv,
    Jsonl,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum RowPolicy {
    Emit,
    Skip,
}

impl From<RowPolicy> for UndefinedRowPolicy {
    fn from(policy: RowPolicy) -> Self {
        match policy {
            RowPolicy::Emit => UndefinedRowPolicy::Emit,
            RowPolicy::Skip => UndefinedRowPolicy::Skip,
        }
    }
}

/// Pipeline settings; flags override values loaded from `--config`.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// TOML file with monitor settings
    #[arg(long)]
    config: Option<PathBuf>,
    /// Sampling rate (Hz)
    #[arg(long)]
    fs: Option<f64>,
    /// Analysis window length (s)
    #[arg(long)]
    window_s: Option<f64>,
    #[arg(long)]
    lowcut_hz: Option<f64>,
    #[arg(long)]
    highcut_hz: Option<f64>,
    #[arg(long)]
    filter_order: Option<usize>,
    /// Peak threshold as a fraction of the window maximum
    #[arg(long)]
    height_factor: Option<f64>,
    /// Minimum spacing between beats (s); 0 disables
    #[arg(long)]
    min_distance_s: Option<f64>,
    /// What to do with windows whose metrics are undefined
    #[arg(long, value_enum)]
    undefined_rows: Option<RowPolicy>,
}

impl PipelineArgs {
    fn resolve(&self) -> Result<MonitorConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => MonitorConfig::default(),
        };
        if let Some(fs) = self.fs {
            config.sampling_rate_hz = fs;
        }
        if let Some(window_s) = self.window_s {
            config.window_seconds = window_s;
        }
        if let Some(low) = self.lowcut_hz {
            config.filter.lowcut_hz = low;
        }
        if let Some(high) = self.highcut_hz {
            config.filter.highcut_hz = high;
        }
        if let Some(order) = self.filter_order {
            config.filter.order = order;
        }
        if let Some(h) = self.height_factor {
            config.peaks.height_factor = h;
        }
        if let Some(d) = self.min_distance_s {
            config.peaks.min_distance_s = d;
        }
        if let Some(policy) = self.undefined_rows {
            config.undefined_rows = policy.into();
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Report file; without it the report is written to stdout
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "csv")]
    format: ReportFormat,
    /// Suppress per-window status lines
    #[arg(long)]
    quiet: bool,
}

impl OutputArgs {
    fn build_sink(&self) -> Result<Vec<Box<dyn ReportSink>>> {
        let mut sinks: Vec<Box<dyn ReportSink>> = Vec::new();
        match (&self.out, self.format) {
            (Some(path), ReportFormat::Csv) => sinks.push(Box::new(CsvReportSink::create(path)?)),
            (Some(path), ReportFormat::Jsonl) => {
                sinks.push(Box::new(JsonLinesSink::create(path)?))
            }
            (None, ReportFormat::Csv) => sinks.push(Box::new(CsvReportSink::new(io::stdout()))),
            (None, ReportFormat::Jsonl) => sinks.push(Box::new(JsonLinesSink::new(io::stdout()))),
        }
        // Status lines would interleave with a report on stdout.
        if self.out.is_some() && !self.quiet {
            sinks.push(Box::new(StatusLineSink::stdout()));
        }
        Ok(sinks)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Stream newline-delimited ADC samples from stdin or --input and report per window
    Monitor {
        /// Sample file or character device (e.g. /dev/ttyACM0); stdin when omitted
        #[arg(long)]
        input: Option<PathBuf>,
        /// How long a read may wait before the stop flag is checked (ms)
        #[arg(long, default_value_t = 200)]
        poll_ms: u64,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Run the monitor over a synthetic pulse train
    Simulate {
        #[arg(long, default_value_t = 72.0)]
        bpm: f64,
        #[arg(long, default_value_t = 0.0)]
        jitter_ms: f64,
        #[arg(long, default_value_t = 0.0)]
        noise: f64,
        #[arg(long, default_value_t = 400.0)]
        amplitude: f64,
        #[arg(long, default_value_t = 512.0)]
        baseline: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Stop after this many windows; runs until Ctrl-C otherwise
        #[arg(long)]
        windows: Option<u64>,
        #[command(flatten)]
        pipeline: PipelineArgs,
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Analyse the first window of a recorded sample file and print it as JSON
    Analyze {
        #[arg(long)]
        input: Option<PathBuf>,
        #[command(flatten)]
        pipeline: PipelineArgs,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Monitor {
            input,
            poll_ms,
            pipeline,
            output,
        } => cmd_monitor(input.as_deref(), poll_ms, &pipeline, &output)?,
        Commands::Simulate {
            bpm,
            jitter_ms,
            noise,
            amplitude,
            baseline,
            seed,
            windows,
            pipeline,
            output,
        } => {
            let config = pipeline.resolve()?;
            let synthetic = SyntheticConfig {
                fs: config.sampling_rate_hz,
                rr_jitter_ms: jitter_ms,
                noise,
                amplitude,
                baseline,
                seed,
                ..SyntheticConfig::default()
            }
            .with_bpm(bpm);
            cmd_simulate(&config, synthetic, windows, &output)?
        }
        Commands::Analyze { input, pipeline } => cmd_analyze(input.as_deref(), &pipeline)?,
    }
    Ok(())
}

fn install_ctrlc() -> Result<ShutdownSignal> {
    let signal = ShutdownSignal::new();
    let handler = signal.clone();
    ctrlc::set_handler(move || handler.trigger()).context("failed to install Ctrl-C handler")?;
    Ok(signal)
}

fn report_summary(summary: &RunSummary) -> Result<()> {
    eprintln!("{}", serde_json::to_string(summary)?);
    Ok(())
}

fn cmd_monitor(
    input: Option<&Path>,
    poll_ms: u64,
    pipeline: &PipelineArgs,
    output: &OutputArgs,
) -> Result<()> {
    let config = pipeline.resolve()?;
    let poll = Duration::from_millis(poll_ms.max(1));
    let mut source = match input {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            info!("reading samples from {}", path.display());
            ThreadedLineSource::spawn(BufReader::new(file), poll)
        }
        None => ThreadedLineSource::spawn(BufReader::new(io::stdin()), poll),
    };
    let mut sink = output.build_sink()?;
    let shutdown = install_ctrlc()?;
    let mut monitor = Monitor::new(&config)?;
    let summary = monitor.run(&mut source, &mut sink, &shutdown)?;
    report_summary(&summary)
}

fn cmd_simulate(
    config: &MonitorConfig,
    synthetic: SyntheticConfig,
    windows: Option<u64>,
    output: &OutputArgs,
) -> Result<()> {
    let mut source = SyntheticSource::new(synthetic);
    let mut sink = output.build_sink()?;
    let shutdown = install_ctrlc()?;
    let mut monitor = Monitor::new(config)?;
    if let Some(limit) = windows {
        monitor = monitor.with_window_limit(limit);
    }
    let summary = monitor.run(&mut source, &mut sink, &shutdown)?;
    report_summary(&summary)
}

fn read_input(input: Option<&Path>) -> Result<text_io::SampleSeries> {
    match input {
        Some(path) => text_io::read_sample_series(path),
        None => {
            let mut buf = Vec::new();
            io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read stdin")?;
            text_io::parse_sample_series(&buf)
        }
    }
}

fn cmd_analyze(input: Option<&Path>, pipeline: &PipelineArgs) -> Result<()> {
    let config = pipeline.resolve()?;
    let series = read_input(input)?;
    let len = config.window_len();
    if series.samples.len() < len {
        bail!(
            "need {} samples for one window, got {}",
            len,
            series.samples.len()
        );
    }
    let analyzer = WindowAnalyzer::new(&config)?;
    let analysis = analyzer.analyze(&series.samples[..len])?;
    println!("{}", serde_json::to_string(&analysis)?);
    Ok(())
}
