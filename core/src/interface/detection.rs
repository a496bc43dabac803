use serde::{Deserialize, Serialize};
use std::fmt;

/// Interference label assigned from the event's time/frequency shape.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InterferenceType {
    #[serde(rename = "carrier")]
    Carrier,
    #[serde(rename = "pulse/burst")]
    PulseBurst,
    #[serde(rename = "sweep")]
    Sweep,
    #[serde(rename = "unknown")]
    Unknown,
}

impl InterferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterferenceType::Carrier => "carrier",
            InterferenceType::PulseBurst => "pulse/burst",
            InterferenceType::Sweep => "sweep",
            InterferenceType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InterferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final record emitted by the detection pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Detection {
    pub center_frequency_hz: f64,
    pub peak_power_db: f32,
    pub margin_db: f32,
    pub timestamp_s: f64,
    pub end_time_s: f64,
    pub duration_s: f64,
    pub bandwidth_hz: f64,
    pub band: Option<String>,
    pub band_priority: Option<u8>,
    /// Likely transmitting service, from the configured allocation table.
    #[serde(default)]
    pub service: Option<String>,
    pub interference_type: InterferenceType,
    pub confidence: f32,
}

impl Detection {
    /// True when the two time windows share any instant.
    pub fn overlaps_in_time(&self, other: &Detection) -> bool {
        self.timestamp_s < other.end_time_s && other.timestamp_s < self.end_time_s
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingSummary {
    pub sample_rate_hz: f64,
    pub channels: u16,
    pub sample_count: usize,
    pub duration_s: f64,
    pub complex: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpectrogramSummary {
    pub frames: usize,
    pub bins: usize,
    pub window_length_samples: usize,
    pub hop_length_samples: usize,
    pub frequency_resolution_hz: f64,
    pub time_resolution_s: f64,
}

/// Detections plus the recording bookkeeping a caller stores alongside them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
    pub recording: RecordingSummary,
    pub spectrogram: SpectrogramSummary,
    pub floor_reliable: bool,
    pub rfi_detected: bool,
    pub detections: Vec<Detection>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detection_serializes_type_labels() {
        let detection = Detection {
            center_frequency_hz: 1.0e6,
            peak_power_db: -20.0,
            margin_db: 30.0,
            timestamp_s: 0.5,
            end_time_s: 1.0,
            duration_s: 0.5,
            bandwidth_hz: 100.0,
            band: None,
            band_priority: None,
            service: None,
            interference_type: InterferenceType::PulseBurst,
            confidence: 0.8,
        };
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(value["interference_type"], "pulse/burst");
        assert!(value["band"].is_null());
    }
}
