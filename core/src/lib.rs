//! Radio-frequency interference detection for SDR and audio recordings.
//!
//! A recording is decoded into a sample buffer, transformed into a dB
//! spectrogram, compared against a robust per-bin noise floor, and the
//! surviving time/frequency regions are labelled, scored against a table of
//! protected radio-astronomy bands, and deduplicated.

pub mod config;
pub mod engine;
pub mod ingest;
pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use config::{BandTable, EngineConfig, ProtectedBand, ServiceAllocation, ServiceTable};
pub use engine::{detect, RfiEngine};
pub use interface::{Detection, DetectionReport, FormatHint, InterferenceType, WaveformSource};
pub use prelude::{CancelToken, EngineError, EngineResult, ProcessingStage};
