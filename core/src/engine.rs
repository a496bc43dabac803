use crate::ingest::buffer::SampleBuffer;
use crate::ingest::loader::WaveformLoader;
use crate::interface::detection::{Detection, DetectionReport, RecordingSummary};
use crate::interface::recording::WaveformSource;
use crate::prelude::{CancelToken, EngineConfig, EngineResult, ProcessingStage};
use crate::processing::{
    AggregatorStage, ClassifierStage, NoiseFloorStage, PeakStage, SpectralInput, SpectralStage,
};
use crate::telemetry::log::LogManager;

/// Validated engine ready to scan recordings.
///
/// Holds no per-recording state, so one instance can be shared across
/// threads and invoked on independent recordings concurrently.
#[derive(Debug, Clone)]
pub struct RfiEngine {
    config: EngineConfig,
}

impl RfiEngine {
    /// Fails with `InvalidConfig` before anything is decoded.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decodes `source` and runs the full pipeline over it.
    pub fn analyze(&self, source: &WaveformSource, cancel: &CancelToken) -> EngineResult<DetectionReport> {
        cancel.check()?;
        let buffer = WaveformLoader::new(self.config.channel_mix).load(source)?;
        self.analyze_buffer(
            buffer,
            source.tuned_frequency_hz,
            source.recording_start_s,
            cancel,
        )
    }

    pub fn detect(&self, source: &WaveformSource, cancel: &CancelToken) -> EngineResult<Vec<Detection>> {
        self.analyze(source, cancel).map(|report| report.detections)
    }

    /// Runs the pipeline over an already decoded buffer.
    pub fn analyze_buffer(
        &self,
        buffer: SampleBuffer,
        tuned_frequency_hz: f64,
        start_time_s: f64,
        cancel: &CancelToken,
    ) -> EngineResult<DetectionReport> {
        let logger = LogManager::new("engine");
        let recording = RecordingSummary {
            sample_rate_hz: buffer.sample_rate(),
            channels: buffer.channels(),
            sample_count: buffer.len(),
            duration_s: buffer.duration_s(),
            complex: buffer.is_complex(),
        };

        let spectrogram = run_stage(
            &mut SpectralStage::new(),
            &self.config,
            SpectralInput {
                buffer,
                tuned_frequency_hz,
                start_time_s,
            },
            cancel,
        )?;
        let summary = spectrogram.summary();
        let floored = run_stage(&mut NoiseFloorStage::new(), &self.config, spectrogram, cancel)?;
        let floor_reliable = floored.floor.reliable();
        let candidates = run_stage(&mut PeakStage::new(), &self.config, floored, cancel)?;
        let scored = run_stage(&mut ClassifierStage::new(), &self.config, candidates, cancel)?;
        let detections = run_stage(&mut AggregatorStage::new(), &self.config, scored, cancel)?;

        logger.record(&format!(
            "{:.2} s recording produced {} detections",
            recording.duration_s,
            detections.len()
        ));
        Ok(DetectionReport {
            recording,
            spectrogram: summary,
            floor_reliable,
            rfi_detected: !detections.is_empty(),
            detections,
        })
    }
}

fn run_stage<S: ProcessingStage>(
    stage: &mut S,
    config: &EngineConfig,
    input: S::Input,
    cancel: &CancelToken,
) -> EngineResult<S::Output> {
    stage.initialize(config)?;
    let output = stage.execute(input, cancel);
    stage.cleanup();
    output
}

/// One-shot entry point: validate `config`, decode `source`, return the
/// timestamp-ordered detections.
pub fn detect(source: &WaveformSource, config: &EngineConfig) -> EngineResult<Vec<Detection>> {
    RfiEngine::new(config.clone())?.detect(source, &CancelToken::new())
}
