use crate::workflow::config::ScanConfig;
use anyhow::Context;
use log::{info, warn};
use rficore::engine::RfiEngine;
use rficore::interface::{DetectionReport, WaveformSource};
use rficore::prelude::CancelToken;
use rficore::telemetry::{MetricsRecorder, MetricsSnapshot};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Result for one recording; exactly one of `report` and `error` is set.
#[derive(Debug, Clone, Serialize)]
pub struct ScanOutcome {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DetectionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct Runner {
    config: Arc<ScanConfig>,
    engine: Arc<RfiEngine>,
    metrics: Arc<MetricsRecorder>,
    cancel: CancelToken,
}

impl Runner {
    pub fn new(config: ScanConfig) -> anyhow::Result<Self> {
        let engine_config = config.to_engine_config()?;
        let engine = RfiEngine::new(engine_config).context("validating engine config")?;
        Ok(Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
            metrics: Arc::new(MetricsRecorder::new()),
            cancel: CancelToken::new(),
        })
    }

    /// Token shared by every scan this runner starts.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Scans in-memory bytes; failures are recorded, not propagated.
    pub fn scan_source(&self, label: &str, source: &WaveformSource) -> ScanOutcome {
        match self.engine.analyze(source, &self.cancel) {
            Ok(report) => {
                self.metrics.record_processed(report.detections.len());
                info!(
                    "{}: {} detections over {:.2} s",
                    label,
                    report.detections.len(),
                    report.recording.duration_s
                );
                ScanOutcome {
                    path: label.to_string(),
                    report: Some(report),
                    error: None,
                }
            }
            Err(err) => self.failed(label, &anyhow::Error::new(err)),
        }
    }

    pub fn scan_file(&self, path: &Path) -> ScanOutcome {
        let label = path.display().to_string();
        match self.load_source(path) {
            Ok(source) => self.scan_source(&label, &source),
            Err(err) => self.failed(&label, &err),
        }
    }

    /// Scans every path on the blocking pool, at most `workers` at a time.
    /// Outcomes come back in input order.
    pub async fn scan_batch(&self, paths: Vec<PathBuf>) -> anyhow::Result<Vec<ScanOutcome>> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut handles = Vec::with_capacity(paths.len());
        for path in paths {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("acquiring scan worker")?;
            let runner = self.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let outcome = runner.scan_file(&path);
                drop(permit);
                outcome
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await.context("joining scan worker")?);
        }
        Ok(outcomes)
    }

    fn load_source(&self, path: &Path) -> anyhow::Result<WaveformSource> {
        let hint = self.config.format_hint(path)?;
        let bytes = fs::read(path).with_context(|| format!("reading recording {}", path.display()))?;
        Ok(WaveformSource::new(bytes, hint).with_tuned_frequency(self.config.center_frequency_hz))
    }

    fn failed(&self, label: &str, err: &anyhow::Error) -> ScanOutcome {
        self.metrics.record_error();
        warn!("{}: {:#}", label, err);
        ScanOutcome {
            path: label.to_string(),
            report: None,
            error: Some(format!("{:#}", err)),
        }
    }
}
