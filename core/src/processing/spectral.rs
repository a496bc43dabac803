use crate::ingest::buffer::{SampleBuffer, Samples};
use crate::interface::detection::SpectrogramSummary;
use crate::math::fft::FftHelper;
use crate::math::stats::StatsHelper;
use crate::prelude::{CancelToken, EngineConfig, EngineError, EngineResult, ProcessingStage};
use crate::telemetry::log::LogManager;
use ndarray::Array2;
use std::ops::Range;
use std::thread;

/// Time-frequency power grid in dB, indexed `[frame, bin]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    power_db: Array2<f32>,
    frequency_resolution_hz: f64,
    time_resolution_s: f64,
    frequency_origin_hz: f64,
    start_time_s: f64,
    window_length: usize,
    hop_length: usize,
}

impl Spectrogram {
    /// Builds a spectrogram from an existing grid; every value must be finite.
    pub fn from_grid(
        power_db: Array2<f32>,
        frequency_resolution_hz: f64,
        time_resolution_s: f64,
        frequency_origin_hz: f64,
    ) -> EngineResult<Self> {
        if let Some(((frame, bin), _)) = power_db.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::Internal(format!(
                "non-finite power at frame {} bin {}",
                frame, bin
            )));
        }
        let bins = power_db.ncols();
        Ok(Self {
            power_db,
            frequency_resolution_hz,
            time_resolution_s,
            frequency_origin_hz,
            start_time_s: 0.0,
            window_length: bins,
            hop_length: bins,
        })
    }

    pub fn with_start_time(mut self, start_time_s: f64) -> Self {
        self.start_time_s = start_time_s;
        self
    }

    fn with_geometry(mut self, window_length: usize, hop_length: usize) -> Self {
        self.window_length = window_length;
        self.hop_length = hop_length;
        self
    }

    pub fn power_db(&self) -> &Array2<f32> {
        &self.power_db
    }

    pub fn frames(&self) -> usize {
        self.power_db.nrows()
    }

    pub fn bins(&self) -> usize {
        self.power_db.ncols()
    }

    pub fn frequency_resolution_hz(&self) -> f64 {
        self.frequency_resolution_hz
    }

    pub fn time_resolution_s(&self) -> f64 {
        self.time_resolution_s
    }

    /// Physical frequency of a (possibly fractional) bin index.
    pub fn bin_frequency(&self, bin: f64) -> f64 {
        self.frequency_origin_hz + bin * self.frequency_resolution_hz
    }

    /// Absolute start time of a frame, including the recording offset.
    pub fn frame_time(&self, frame: usize) -> f64 {
        self.start_time_s + frame as f64 * self.time_resolution_s
    }

    pub fn summary(&self) -> SpectrogramSummary {
        SpectrogramSummary {
            frames: self.frames(),
            bins: self.bins(),
            window_length_samples: self.window_length,
            hop_length_samples: self.hop_length,
            frequency_resolution_hz: self.frequency_resolution_hz,
            time_resolution_s: self.time_resolution_s,
        }
    }
}

/// Buffer plus the placement metadata the spectrogram axes need.
#[derive(Debug, Clone)]
pub struct SpectralInput {
    pub buffer: SampleBuffer,
    pub tuned_frequency_hz: f64,
    pub start_time_s: f64,
}

/// Sliding-window transform geometry for one recording.
struct FramePlan<'a> {
    samples: &'a Samples,
    window: &'a [f32],
    window_length: usize,
    hop: usize,
    bins: usize,
    norm: f32,
    /// Shorter taper for the final frame when it runs past the recording.
    tail: Option<TailWindow>,
    floor_db: f32,
}

struct TailWindow {
    coefficients: Vec<f32>,
    norm: f32,
}

impl TailWindow {
    /// Taper spanning only the `length` samples left in the final frame,
    /// normalised by its own gain. Tapers with no energy fall back to flat.
    fn new(config: &EngineConfig, length: usize) -> Self {
        let mut coefficients = config.window_function.coefficients(length);
        let mut gain: f32 = coefficients.iter().sum();
        if !(gain > 0.0) {
            coefficients = vec![1.0; length];
            gain = length as f32;
        }
        Self {
            coefficients,
            norm: gain * gain,
        }
    }
}

/// Short-time Fourier stage producing the dB spectrogram.
pub struct SpectralStage {
    config: Option<EngineConfig>,
    logger: LogManager,
}

impl SpectralStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("spectral"),
        }
    }
}

impl Default for SpectralStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames needed to cover `total` samples; the last one may be zero-padded.
pub fn frame_count(total: usize, window_length: usize, hop: usize) -> usize {
    if total <= window_length {
        1
    } else {
        1 + (total - window_length + hop - 1) / hop
    }
}

fn compute_rows(
    plan: &FramePlan<'_>,
    frames: Range<usize>,
    cancel: &CancelToken,
) -> EngineResult<Vec<f32>> {
    let mut helper = FftHelper::new(plan.window_length);
    let total = plan.samples.len();
    let shift = plan.window_length - plan.window_length / 2;
    let mut rows = Vec::with_capacity(frames.len() * plan.bins);

    for frame in frames {
        cancel.check()?;
        let start = frame * plan.hop;
        let end = (start + plan.window_length).min(total);
        let (window, norm) = match &plan.tail {
            Some(tail) if end - start < plan.window_length => {
                (tail.coefficients.as_slice(), tail.norm)
            }
            _ => (plan.window, plan.norm),
        };
        let (spectrum, complex) = match plan.samples {
            Samples::Real(values) => (helper.forward_real(&values[start..end], window), false),
            Samples::Complex(values) => (helper.forward_complex(&values[start..end], window), true),
        };

        for bin in 0..plan.bins {
            // IQ spectra are shifted so the lowest frequency sits in bin 0.
            let source = if complex {
                (bin + shift) % plan.window_length
            } else {
                bin
            };
            let power = spectrum[source].norm_sqr() / norm;
            if !power.is_finite() {
                return Err(EngineError::Internal(format!(
                    "non-finite power at frame {} bin {}",
                    frame, bin
                )));
            }
            rows.push(StatsHelper::power_to_db(power, plan.floor_db));
        }
    }
    Ok(rows)
}

impl ProcessingStage for SpectralStage {
    type Input = SpectralInput;
    type Output = Spectrogram;

    fn initialize(&mut self, config: &EngineConfig) -> EngineResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: SpectralInput, cancel: &CancelToken) -> EngineResult<Spectrogram> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EngineError::Internal("stage not initialized".into()))?;

        let buffer = &input.buffer;
        let sample_rate = buffer.sample_rate();
        let window_length = config.resolve_window(sample_rate, buffer.len());
        let hop = config.resolve_hop(window_length)?;
        let window = config.window_function.coefficients(window_length);
        let gain: f32 = window.iter().sum();
        if !(gain > 0.0) {
            return Err(EngineError::Internal("window has no energy".into()));
        }

        let complex = buffer.is_complex();
        let bins = if complex {
            window_length
        } else {
            window_length / 2 + 1
        };
        let frames = frame_count(buffer.len(), window_length, hop);
        let tail_length = buffer.len() - (frames - 1) * hop;
        let tail = if tail_length < window_length {
            Some(TailWindow::new(config, tail_length))
        } else {
            None
        };
        let plan = FramePlan {
            samples: buffer.samples(),
            window: &window,
            window_length,
            hop,
            bins,
            norm: gain * gain,
            tail,
            floor_db: config.power_floor_db,
        };

        let workers = config.workers.clamp(1, frames);
        let rows = if workers == 1 {
            compute_rows(&plan, 0..frames, cancel)?
        } else {
            let chunk = (frames + workers - 1) / workers;
            let plan = &plan;
            let results: Vec<EngineResult<Vec<f32>>> = thread::scope(|scope| {
                let handles: Vec<_> = (0..workers)
                    .map(|worker| {
                        let range = (worker * chunk).min(frames)..((worker + 1) * chunk).min(frames);
                        scope.spawn(move || compute_rows(plan, range, cancel))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| {
                        handle.join().unwrap_or_else(|_| {
                            Err(EngineError::Internal("spectral worker panicked".into()))
                        })
                    })
                    .collect()
            });
            let mut rows = Vec::with_capacity(frames * bins);
            for result in results {
                rows.extend(result?);
            }
            rows
        };

        let grid = Array2::from_shape_vec((frames, bins), rows)
            .map_err(|err| EngineError::Internal(format!("spectrogram shape: {}", err)))?;

        let frequency_resolution = sample_rate / window_length as f64;
        let origin = if complex {
            input.tuned_frequency_hz - (window_length / 2) as f64 * frequency_resolution
        } else {
            input.tuned_frequency_hz
        };
        let spectrogram = Spectrogram::from_grid(
            grid,
            frequency_resolution,
            hop as f64 / sample_rate,
            origin,
        )?
        .with_start_time(input.start_time_s)
        .with_geometry(window_length, hop);

        self.logger.record(&format!(
            "{} frames x {} bins (window {}, hop {}, workers {})",
            frames, bins, window_length, hop, workers
        ));
        Ok(spectrogram)
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
