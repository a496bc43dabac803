use crate::math::window::WindowFunction;
use crate::prelude::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

const AUTO_RESOLUTION_HZ: f64 = 10.0;
const AUTO_WINDOW_MIN: usize = 256;
const AUTO_WINDOW_MAX: usize = 16_384;

/// How multi-channel audio is reduced to the single analysis channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelMix {
    #[default]
    Average,
    First,
}

/// One radio-astronomy allocation the classifier matches candidates against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedBand {
    pub name: String,
    pub lower_hz: f64,
    pub upper_hz: f64,
    #[serde(default)]
    pub priority: u8,
}

impl ProtectedBand {
    pub fn new(name: impl Into<String>, lower_hz: f64, upper_hz: f64, priority: u8) -> Self {
        Self {
            name: name.into(),
            lower_hz,
            upper_hz,
            priority,
        }
    }

    pub fn center_hz(&self) -> f64 {
        (self.lower_hz + self.upper_hz) / 2.0
    }

    pub fn overlaps(&self, lower_hz: f64, upper_hz: f64) -> bool {
        lower_hz <= self.upper_hz && upper_hz >= self.lower_hz
    }
}

/// Read-only table of protected bands, injected by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BandTable {
    #[serde(default)]
    pub bands: Vec<ProtectedBand>,
}

impl BandTable {
    pub fn new(bands: Vec<ProtectedBand>) -> Self {
        Self { bands }
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let table: BandTable = serde_json::from_str(json)
            .map_err(|err| EngineError::InvalidConfig(format!("band table: {}", err)))?;
        table.validate()?;
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn validate(&self) -> EngineResult<()> {
        for band in &self.bands {
            check_bounds("band", &band.name, band.lower_hz, band.upper_hz)?;
        }
        Ok(())
    }
}

/// Frequency range where a known transmitting service usually operates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAllocation {
    pub name: String,
    pub lower_hz: f64,
    pub upper_hz: f64,
    /// Narrower emissions inside the range are not attributed to the service.
    #[serde(default)]
    pub min_bandwidth_hz: f64,
}

impl ServiceAllocation {
    pub fn new(name: impl Into<String>, lower_hz: f64, upper_hz: f64) -> Self {
        Self {
            name: name.into(),
            lower_hz,
            upper_hz,
            min_bandwidth_hz: 0.0,
        }
    }

    pub fn with_min_bandwidth(mut self, min_bandwidth_hz: f64) -> Self {
        self.min_bandwidth_hz = min_bandwidth_hz;
        self
    }

    pub fn contains(&self, frequency_hz: f64) -> bool {
        frequency_hz >= self.lower_hz && frequency_hz <= self.upper_hz
    }
}

/// Ordered service allocations; the first entry that matches names the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceTable {
    #[serde(default)]
    pub services: Vec<ServiceAllocation>,
}

impl ServiceTable {
    pub fn new(services: Vec<ServiceAllocation>) -> Self {
        Self { services }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn validate(&self) -> EngineResult<()> {
        for service in &self.services {
            check_bounds("service", &service.name, service.lower_hz, service.upper_hz)?;
            if !(service.min_bandwidth_hz >= 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "service {} min_bandwidth_hz must be >= 0",
                    service.name
                )));
            }
        }
        Ok(())
    }
}

fn check_bounds(kind: &str, name: &str, lower_hz: f64, upper_hz: f64) -> EngineResult<()> {
    if !lower_hz.is_finite() || !upper_hz.is_finite() {
        return Err(EngineError::InvalidConfig(format!(
            "{} {} has non-finite bounds",
            kind, name
        )));
    }
    if lower_hz > upper_hz {
        return Err(EngineError::InvalidConfig(format!(
            "{} {} lower bound {} exceeds upper bound {}",
            kind, name, lower_hz, upper_hz
        )));
    }
    Ok(())
}

/// Noise-floor statistic tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseFloorConfig {
    /// Temporal percentile taken per bin, in (0, 100].
    pub percentile: f32,
    /// Half-width of the running median applied across frequency.
    pub smoothing_bins: usize,
    /// Recordings with fewer frames get an unreliable floor.
    pub min_reliable_frames: usize,
}

impl Default for NoiseFloorConfig {
    fn default() -> Self {
        Self {
            percentile: 50.0,
            smoothing_bins: 16,
            min_reliable_frames: 5,
        }
    }
}

/// Confidence-score weights and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub margin_weight: f32,
    pub signature_weight: f32,
    pub margin_scale_db: f32,
    pub unknown_signature_score: f32,
    pub band_bonus: f32,
    pub protected_floor: f32,
    pub unreliable_cap: f32,
    pub min_confidence: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            margin_weight: 0.7,
            signature_weight: 0.3,
            margin_scale_db: 10.0,
            unknown_signature_score: 0.4,
            band_bonus: 0.1,
            protected_floor: 0.5,
            unreliable_cap: 0.5,
            min_confidence: 0.05,
        }
    }
}

/// Shape limits used to label interference types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    pub narrowband_max_bins: usize,
    pub broadband_min_bins: usize,
    pub continuous_min_s: f64,
    pub burst_max_s: f64,
    /// Minimum drift of the per-frame peak, as a fraction of the event's bin span.
    pub sweep_min_drift_fraction: f64,
}

impl Default for SignatureConfig {
    fn default() -> Self {
        Self {
            narrowband_max_bins: 12,
            broadband_min_bins: 48,
            continuous_min_s: 0.5,
            burst_max_s: 0.5,
            sweep_min_drift_fraction: 0.5,
        }
    }
}

/// Full engine configuration. Unset options fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub window_length_samples: Option<usize>,
    pub hop_length_samples: Option<usize>,
    pub window_function: WindowFunction,
    pub threshold_db: f32,
    pub min_duration_s: f64,
    pub min_bandwidth_hz: f64,
    pub power_floor_db: f32,
    pub channel_mix: ChannelMix,
    pub noise_floor: NoiseFloorConfig,
    pub scoring: ScoringConfig,
    pub signatures: SignatureConfig,
    pub max_detections: Option<usize>,
    pub workers: usize,
    pub band_table: BandTable,
    pub service_table: ServiceTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_length_samples: None,
            hop_length_samples: None,
            window_function: WindowFunction::BlackmanHarris,
            threshold_db: 10.0,
            min_duration_s: 0.1,
            min_bandwidth_hz: 0.0,
            power_floor_db: -120.0,
            channel_mix: ChannelMix::Average,
            noise_floor: NoiseFloorConfig::default(),
            scoring: ScoringConfig::default(),
            signatures: SignatureConfig::default(),
            max_detections: None,
            workers: 1,
            band_table: BandTable::default(),
            service_table: ServiceTable::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_band_table(mut self, band_table: BandTable) -> Self {
        self.band_table = band_table;
        self
    }

    pub fn with_service_table(mut self, service_table: ServiceTable) -> Self {
        self.service_table = service_table;
        self
    }

    /// Checks every explicit option. Runs before any input is decoded.
    pub fn validate(&self) -> EngineResult<()> {
        if self.window_length_samples == Some(0) {
            return Err(invalid("window_length_samples must be positive"));
        }
        if self.hop_length_samples == Some(0) {
            return Err(invalid("hop_length_samples must be positive"));
        }
        if let (Some(window), Some(hop)) = (self.window_length_samples, self.hop_length_samples) {
            if hop > window {
                return Err(invalid(&format!(
                    "hop_length_samples {} exceeds window_length_samples {}",
                    hop, window
                )));
            }
        }
        if !self.threshold_db.is_finite() || self.threshold_db < 0.0 {
            return Err(invalid("threshold_db must be a finite value >= 0"));
        }
        if !(self.min_duration_s >= 0.0) || !(self.min_bandwidth_hz >= 0.0) {
            return Err(invalid("min_duration_s and min_bandwidth_hz must be >= 0"));
        }
        if !self.power_floor_db.is_finite() {
            return Err(invalid("power_floor_db must be finite"));
        }
        let percentile = self.noise_floor.percentile;
        if !(percentile > 0.0 && percentile <= 100.0) {
            return Err(invalid("noise_floor.percentile must be in (0, 100]"));
        }
        let scoring = &self.scoring;
        if !(scoring.margin_weight >= 0.0 && scoring.signature_weight >= 0.0) {
            return Err(invalid("scoring weights must be >= 0"));
        }
        if scoring.margin_weight + scoring.signature_weight <= 0.0 {
            return Err(invalid("scoring weights must not all be zero"));
        }
        if !(scoring.margin_scale_db > 0.0) {
            return Err(invalid("scoring.margin_scale_db must be positive"));
        }
        let fractions = [
            ("unknown_signature_score", scoring.unknown_signature_score),
            ("band_bonus", scoring.band_bonus),
            ("protected_floor", scoring.protected_floor),
            ("unreliable_cap", scoring.unreliable_cap),
            ("min_confidence", scoring.min_confidence),
        ];
        for (name, value) in fractions {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(&format!("scoring.{} must be in [0, 1]", name)));
            }
        }
        if scoring.min_confidence > scoring.protected_floor {
            return Err(invalid(
                "scoring.min_confidence must not exceed scoring.protected_floor",
            ));
        }
        if self.workers == 0 {
            return Err(invalid("workers must be at least 1"));
        }
        self.band_table.validate()?;
        self.service_table.validate()
    }

    /// Window length for a buffer of `sample_count` samples at `sample_rate` Hz.
    pub fn resolve_window(&self, sample_rate: f64, sample_count: usize) -> usize {
        if let Some(window) = self.window_length_samples {
            return window;
        }
        let target = (sample_rate / AUTO_RESOLUTION_HZ).ceil().max(1.0) as usize;
        let auto = target
            .next_power_of_two()
            .clamp(AUTO_WINDOW_MIN, AUTO_WINDOW_MAX);
        let cap = previous_power_of_two(sample_count.max(1));
        auto.min(cap)
    }

    /// Hop length paired with `window`; checked against the resolved window.
    pub fn resolve_hop(&self, window: usize) -> EngineResult<usize> {
        let hop = self.hop_length_samples.unwrap_or((window / 2).max(1));
        if hop > window {
            return Err(invalid(&format!(
                "hop_length_samples {} exceeds resolved window length {}",
                hop, window
            )));
        }
        Ok(hop)
    }
}

fn previous_power_of_two(value: usize) -> usize {
    if value.is_power_of_two() {
        value
    } else {
        value.next_power_of_two() / 2
    }
}

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidConfig(message.to_string())
}
