use serde::{Deserialize, Serialize};

/// Sample encodings accepted for raw interleaved IQ captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IqFormat {
    /// Complex float32, little endian.
    Cf32,
    /// Complex signed 16-bit, little endian.
    Cs16,
    /// Complex signed 8-bit.
    Cs8,
    /// Complex unsigned 8-bit (RTL-SDR).
    Cu8,
}

impl IqFormat {
    /// Bytes occupied by one complex sample.
    pub fn frame_bytes(&self) -> usize {
        match self {
            IqFormat::Cf32 => 8,
            IqFormat::Cs16 => 4,
            IqFormat::Cs8 | IqFormat::Cu8 => 2,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "cf32" | "fc32" | "complex64" => Some(IqFormat::Cf32),
            "cs16" | "sc16" => Some(IqFormat::Cs16),
            "cs8" | "sc8" => Some(IqFormat::Cs8),
            "cu8" | "uc8" => Some(IqFormat::Cu8),
            _ => None,
        }
    }
}

/// Declared (or sniffed) container of a recording.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FormatHint {
    /// Sniff the container from its leading bytes.
    #[default]
    Auto,
    Wav,
    Flac,
    Ogg,
    Mp3,
    RawIq {
        format: IqFormat,
        sample_rate_hz: u32,
    },
}

impl FormatHint {
    /// Maps a file extension to a hint. Raw captures need a declared rate.
    pub fn from_extension(extension: &str, iq: Option<(IqFormat, u32)>) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "wav" | "wave" => Some(FormatHint::Wav),
            "flac" => Some(FormatHint::Flac),
            "ogg" | "oga" => Some(FormatHint::Ogg),
            "mp3" => Some(FormatHint::Mp3),
            "raw" | "iq" | "bin" | "dat" | "cf32" | "cs16" | "cs8" | "cu8" => {
                iq.map(|(format, sample_rate_hz)| FormatHint::RawIq {
                    format,
                    sample_rate_hz,
                })
            }
            _ => None,
        }
    }
}

/// Recording bytes handed to the engine by the ingestion layer.
#[derive(Debug, Clone)]
pub struct WaveformSource {
    pub bytes: Vec<u8>,
    pub hint: FormatHint,
    /// Frequency of bin 0 for real audio, band centre for IQ captures.
    pub tuned_frequency_hz: f64,
    /// Offset added to every detection timestamp.
    pub recording_start_s: f64,
}

impl WaveformSource {
    pub fn new(bytes: Vec<u8>, hint: FormatHint) -> Self {
        Self {
            bytes,
            hint,
            tuned_frequency_hz: 0.0,
            recording_start_s: 0.0,
        }
    }

    pub fn with_tuned_frequency(mut self, hz: f64) -> Self {
        self.tuned_frequency_hz = hz;
        self
    }

    pub fn with_start_time(mut self, seconds: f64) -> Self {
        self.recording_start_s = seconds;
        self
    }
}
