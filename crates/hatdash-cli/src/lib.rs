//! Hatdash CLI - headless recording runs.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use hatdash_core::Sample;
use hatdash_pipeline::{
    Command, HardwareProbe, LoopStats, Pipeline, PipelineArgs, ProbeRoots, RecordingStatus,
};
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};

/// Public function that can be called from the main binary
pub fn run_cli_main(args: &[&str]) -> Result<()> {
    let args = Args::parse_from(args);
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(main_inner(args))
}

#[derive(Parser, Debug)]
#[command(name = "hatdash-cli")]
#[command(about = "Record a fixed number of sensor samples without the web layer")]
#[command(version)]
pub struct Args {
    /// Samples to collect before stopping
    #[arg(short = 'n', long, default_value_t = 10)]
    ticks: u64,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// What a run saw, accumulated sample by sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub samples: u64,
    pub stale: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    pub min_altitude: Option<f64>,
    pub max_altitude: Option<f64>,
    pub file: Option<PathBuf>,
    /// Rows the writer put in `file` after the final flush.
    pub rows: Option<u64>,
}

impl RunSummary {
    pub fn add(&mut self, sample: &Sample) {
        self.samples += 1;
        self.first_sequence.get_or_insert(sample.sequence);
        self.last_sequence = Some(sample.sequence);
        if sample.stale {
            self.stale += 1;
            return;
        }
        let alt = sample.derived.altitude;
        self.min_altitude = Some(self.min_altitude.map_or(alt, |m| m.min(alt)));
        self.max_altitude = Some(self.max_altitude.map_or(alt, |m| m.max(alt)));
    }
}

async fn main_inner(args: Args) -> Result<()> {
    let format = args.format;
    if matches!(format, OutputFormat::Text) {
        println!("Hatdash Headless Recording");
        println!("==========================\n");
    }

    let (summary, stats, recording) = record(args).await?;

    match format {
        OutputFormat::Text => print_summary(&summary, &stats),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
    }
    check_recording(&recording)
}

/// Runs the pipeline for `args.ticks` samples with recording on, then shuts it
/// down and waits for the log to be flushed.
async fn record(args: Args) -> Result<(RunSummary, LoopStats, RecordingStatus)> {
    let config = args
        .pipeline
        .into_config()
        .context("invalid pipeline configuration")?;
    let probe = HardwareProbe::run(&ProbeRoots::default());
    let pipeline = Pipeline::build(&config, &probe).context("could not start pipeline")?;
    let handle = pipeline.handle();
    info!(sensor = ?handle.sensor, ticks = args.ticks, "collecting samples");

    let mut samples = handle.bus.subscribe();
    handle.controls.command(Command::StartRecording);
    let (stop_tx, stop_rx) = watch::channel(false);
    let running = pipeline.spawn(stop_rx);

    let mut summary = RunSummary::default();
    while summary.samples < args.ticks {
        tokio::select! {
            sample = samples.recv() => match sample {
                Some(sample) => summary.add(&sample),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted after {} samples", summary.samples);
                break;
            }
        }
    }

    stop_tx.send_replace(true);
    let stats = running.join().await;
    let recording = handle.recording.borrow().clone();
    summary.file = recording.file.clone();
    summary.rows = recording.rows;
    info!(?stats, "run finished");
    Ok((summary, stats, recording))
}

fn check_recording(recording: &RecordingStatus) -> Result<()> {
    if let Some(error) = &recording.error {
        bail!("recording failed: {error}");
    }
    Ok(())
}

fn print_summary(summary: &RunSummary, stats: &LoopStats) {
    let fmt_alt = |alt: Option<f64>| alt.map_or("n/a".to_string(), |a| format!("{a:.2} m"));

    println!("\nRun Stats:");
    println!("  Samples:      {}", summary.samples);
    println!("  Stale:        {}", summary.stale);
    println!("  Faults:       {}", stats.sensor_faults + stats.invalid_readings);
    println!("  Min Altitude: {}", fmt_alt(summary.min_altitude));
    println!("  Max Altitude: {}", fmt_alt(summary.max_altitude));
    match &summary.file {
        Some(path) => match summary.rows {
            Some(rows) => println!("  Log File:     {} ({} rows)", path.display(), rows),
            None => println!("  Log File:     {} (incomplete)", path.display()),
        },
        None => println!("  Log File:     none"),
    }
    println!("--------------------------");
}
