pub mod aggregator;
pub mod classifier;
pub mod noise_floor;
pub mod peaks;
pub mod spectral;

pub use aggregator::AggregatorStage;
pub use classifier::{ClassifierStage, ScoredDetections};
pub use noise_floor::{FlooredSpectrogram, NoiseFloor, NoiseFloorStage};
pub use peaks::{CandidateEvent, CandidateSet, PeakStage};
pub use spectral::{SpectralInput, SpectralStage, Spectrogram};
