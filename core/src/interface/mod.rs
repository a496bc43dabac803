pub mod detection;
pub mod recording;

pub use detection::{Detection, DetectionReport, InterferenceType, RecordingSummary, SpectrogramSummary};
pub use recording::{FormatHint, IqFormat, WaveformSource};
