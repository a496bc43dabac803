use crate::prelude::{EngineError, EngineResult};
use num_complex::Complex32;

/// Analysis-channel samples: real audio or complex IQ.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Real(Vec<f32>),
    Complex(Vec<Complex32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Real(values) => values.len(),
            Samples::Complex(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decoded recording, reduced to one channel and normalised to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    samples: Samples,
    sample_rate: f64,
    channels: u16,
}

impl SampleBuffer {
    pub fn new(samples: Samples, sample_rate: f64, channels: u16) -> EngineResult<Self> {
        if samples.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        if !(sample_rate > 0.0) || !sample_rate.is_finite() {
            return Err(EngineError::CorruptData(format!(
                "sample rate {} is not positive",
                sample_rate
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
            channels,
        })
    }

    pub fn real(samples: Vec<f32>, sample_rate: f64) -> EngineResult<Self> {
        Self::new(Samples::Real(samples), sample_rate, 1)
    }

    pub fn complex(samples: Vec<Complex32>, sample_rate: f64) -> EngineResult<Self> {
        Self::new(Samples::Complex(samples), sample_rate, 2)
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Channel count of the source before reduction.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_complex(&self) -> bool {
        matches!(self.samples, Samples::Complex(_))
    }

    pub fn duration_s(&self) -> f64 {
        self.len() as f64 / self.sample_rate
    }
}
