use anyhow::Context;
use clap::Parser;
use generator::profile::build_offline_recording;
use log::{info, warn};
use rficore::interface::{FormatHint, WaveformSource};
use std::fs;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::{ScanConfig, ScanOverrides};
use workflow::runner::{Runner, ScanOutcome};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Scan SDR and audio recordings for radio-frequency interference")]
struct Args {
    /// Recordings to scan
    files: Vec<PathBuf>,
    /// Load scanner settings from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// YAML table of protected bands
    #[arg(long)]
    bands: Option<PathBuf>,
    /// YAML table of service allocations used to name likely transmitters
    #[arg(long)]
    services: Option<PathBuf>,
    /// auto, wav, flac, ogg, mp3, cf32, cs16, cs8 or cu8
    #[arg(long)]
    format: Option<String>,
    /// Sample rate of raw IQ captures, in Hz
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Tuned centre frequency, in Hz
    #[arg(long)]
    center_frequency: Option<f64>,
    #[arg(long)]
    threshold_db: Option<f32>,
    #[arg(long)]
    window: Option<usize>,
    #[arg(long)]
    hop: Option<usize>,
    /// Recordings scanned concurrently
    #[arg(long)]
    workers: Option<usize>,
    /// Write the JSON report here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
    /// Scan a synthetic recording with a known carrier, burst and sweep
    #[arg(long, default_value_t = false)]
    offline: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let overrides = ScanOverrides {
        bands: args.bands,
        services: args.services,
        format: args.format,
        sample_rate_hz: args.sample_rate,
        center_frequency_hz: args.center_frequency,
        threshold_db: args.threshold_db,
        window: args.window,
        hop: args.hop,
        workers: args.workers,
    };
    let scan_config = if let Some(path) = args.config {
        let mut config = ScanConfig::load(path)?;
        config.apply(overrides);
        config
    } else {
        ScanConfig::from_args(overrides)
    };

    let runner = Runner::new(scan_config)?;
    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating scan runtime")?;

    let cancel = runner.cancel_token();
    runtime.spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl+C received, cancelling in-flight scans");
            cancel.cancel();
        }
    });

    let mut outcomes: Vec<ScanOutcome> = Vec::new();
    if args.offline {
        let bytes = build_offline_recording(0)?;
        let source = WaveformSource::new(bytes, FormatHint::Wav);
        let outcome = runner.scan_source("offline", &source);
        if let Some(report) = &outcome.report {
            for detection in &report.detections {
                println!(
                    "{:>10.3} s  {:>12.1} Hz  {:<12} conf {:.2}  {}  {}",
                    detection.timestamp_s,
                    detection.center_frequency_hz,
                    detection.interference_type.as_str(),
                    detection.confidence,
                    detection.band.as_deref().unwrap_or("-"),
                    detection.service.as_deref().unwrap_or("-")
                );
            }
        }
        outcomes.push(outcome);
    }
    if !args.files.is_empty() {
        let batch = runtime.block_on(runner.scan_batch(args.files))?;
        outcomes.extend(batch);
    }
    if outcomes.is_empty() {
        anyhow::bail!("nothing to scan; pass recordings or --offline");
    }

    let report = serde_json::to_string_pretty(&outcomes).context("serializing scan report")?;
    match args.output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, report)
                .with_context(|| format!("writing report {}", path.display()))?;
            info!("report written to {}", path.display());
        }
        None => println!("{}", report),
    }

    let metrics = runner.metrics();
    eprintln!(
        "scanned {} recordings, {} failed, {} detections",
        metrics.processed + metrics.errors,
        metrics.errors,
        metrics.detections
    );
    runtime.shutdown_background();

    Ok(())
}
