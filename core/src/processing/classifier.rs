use crate::config::{
    BandTable, ProtectedBand, ScoringConfig, ServiceAllocation, ServiceTable, SignatureConfig,
};
use crate::interface::detection::{Detection, InterferenceType};
use crate::prelude::{CancelToken, EngineConfig, EngineError, EngineResult, ProcessingStage};
use crate::processing::peaks::{CandidateEvent, CandidateSet};
use crate::processing::spectral::Spectrogram;
use crate::telemetry::log::LogManager;

/// Scored detections plus the bin width the aggregator merges on.
#[derive(Debug, Clone)]
pub struct ScoredDetections {
    pub detections: Vec<Detection>,
    pub frequency_resolution_hz: f64,
}

/// Labels the event shape from its per-frame width, duration and peak track.
///
/// Narrow and broad are judged on the median number of active bins per frame,
/// so splatter in an onset or offset frame does not widen a steady carrier.
/// The overall bin span only feeds the sweep drift test.
pub fn classify_shape(
    event: &CandidateEvent,
    time_resolution_s: f64,
    signatures: &SignatureConfig,
) -> InterferenceType {
    let span = event.bin_span();
    let width = event.median_occupied_bins;
    let duration_s = event.frame_span() as f64 * time_resolution_s;

    if span > signatures.narrowband_max_bins && event.peak_track.len() >= 2 {
        let first = event.peak_track[0] as f64;
        let last = event.peak_track[event.peak_track.len() - 1] as f64;
        let drift = (last - first).abs();
        let spread = (span - 1) as f64;
        if drift >= signatures.sweep_min_drift_fraction * spread && width <= span as f64 / 2.0 {
            return InterferenceType::Sweep;
        }
    }
    if width <= signatures.narrowband_max_bins as f64 && duration_s >= signatures.continuous_min_s {
        return InterferenceType::Carrier;
    }
    if width >= signatures.broadband_min_bins as f64 && duration_s <= signatures.burst_max_s {
        return InterferenceType::PulseBurst;
    }
    InterferenceType::Unknown
}

/// Picks the overlapping band closest (by band centre) to `center_hz`.
///
/// Equal distances go to the higher priority, then the earlier table entry.
pub fn match_band<'a>(
    table: &'a BandTable,
    lower_hz: f64,
    upper_hz: f64,
    center_hz: f64,
) -> Option<&'a ProtectedBand> {
    let mut best: Option<(&ProtectedBand, f64)> = None;
    for band in table.bands.iter().filter(|band| band.overlaps(lower_hz, upper_hz)) {
        let distance = (band.center_hz() - center_hz).abs();
        best = match best {
            None => Some((band, distance)),
            Some((current, current_distance)) => {
                if distance < current_distance
                    || (distance == current_distance && band.priority > current.priority)
                {
                    Some((band, distance))
                } else {
                    Some((current, current_distance))
                }
            }
        };
    }
    best.map(|(band, _)| band)
}

/// First allocation containing `center_hz` whose bandwidth floor the event meets.
pub fn match_service<'a>(
    table: &'a ServiceTable,
    center_hz: f64,
    bandwidth_hz: f64,
) -> Option<&'a ServiceAllocation> {
    table
        .services
        .iter()
        .find(|service| service.contains(center_hz) && bandwidth_hz >= service.min_bandwidth_hz)
}

/// Weighted confidence in [0, 1].
pub fn score(
    margin_db: f32,
    threshold_db: f32,
    shape: InterferenceType,
    in_protected_band: bool,
    floor_reliable: bool,
    scoring: &ScoringConfig,
) -> f32 {
    let excess = (margin_db - threshold_db).max(0.0);
    let margin_term = 1.0 - (-excess / scoring.margin_scale_db).exp();
    let signature_term = match shape {
        InterferenceType::Unknown => scoring.unknown_signature_score,
        _ => 1.0,
    };
    let weights = scoring.margin_weight + scoring.signature_weight;
    let mut confidence =
        (scoring.margin_weight * margin_term + scoring.signature_weight * signature_term) / weights;

    if in_protected_band {
        confidence += scoring.band_bonus;
    }
    if !floor_reliable {
        confidence = confidence.min(scoring.unreliable_cap);
    }
    // Protected-band detections never drop below the floor, capped or not.
    if in_protected_band {
        confidence = confidence.max(scoring.protected_floor);
    }
    confidence.clamp(0.0, 1.0)
}

/// Converts candidates to physical units, matches bands and scores them.
pub struct ClassifierStage {
    config: Option<EngineConfig>,
    logger: LogManager,
}

impl ClassifierStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("classifier"),
        }
    }

    fn build(
        config: &EngineConfig,
        event: &CandidateEvent,
        spectrogram: &Spectrogram,
        floor_reliable: bool,
    ) -> Detection {
        let resolution = spectrogram.frequency_resolution_hz();
        let center = spectrogram.bin_frequency(event.centroid_bin);
        let lower = spectrogram.bin_frequency(event.start_bin as f64) - resolution / 2.0;
        let upper = spectrogram.bin_frequency(event.end_bin as f64) + resolution / 2.0;

        let shape = classify_shape(event, spectrogram.time_resolution_s(), &config.signatures);
        let band = match_band(&config.band_table, lower, upper, center);
        let confidence = score(
            event.peak_margin_db,
            config.threshold_db,
            shape,
            band.is_some(),
            floor_reliable,
            &config.scoring,
        );

        let bandwidth = event.bin_span() as f64 * resolution;
        let service = match_service(&config.service_table, center, bandwidth);
        let timestamp = spectrogram.frame_time(event.start_frame);
        let end_time = spectrogram.frame_time(event.end_frame + 1);
        Detection {
            center_frequency_hz: center,
            peak_power_db: event.peak_power_db,
            margin_db: event.peak_margin_db,
            timestamp_s: timestamp,
            end_time_s: end_time,
            duration_s: end_time - timestamp,
            bandwidth_hz: bandwidth,
            band: band.map(|band| band.name.clone()),
            band_priority: band.map(|band| band.priority),
            service: service.map(|service| service.name.clone()),
            interference_type: shape,
            confidence,
        }
    }
}

impl Default for ClassifierStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStage for ClassifierStage {
    type Input = CandidateSet;
    type Output = ScoredDetections;

    fn initialize(&mut self, config: &EngineConfig) -> EngineResult<()> {
        self.config = Some(config.clone());
        Ok(())
    }

    fn execute(&mut self, input: CandidateSet, cancel: &CancelToken) -> EngineResult<ScoredDetections> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EngineError::Internal("stage not initialized".into()))?;
        cancel.check()?;

        let reliable = input.floor.reliable();
        let candidate_count = input.candidates.len();
        let detections: Vec<Detection> = input
            .candidates
            .iter()
            .map(|event| Self::build(config, event, &input.spectrogram, reliable))
            .filter(|detection| detection.confidence >= config.scoring.min_confidence)
            .collect();

        self.logger.record(&format!(
            "{} of {} candidates scored above {:.2}",
            detections.len(),
            candidate_count,
            config.scoring.min_confidence
        ));
        Ok(ScoredDetections {
            detections,
            frequency_resolution_hz: input.spectrogram.frequency_resolution_hz(),
        })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseFloorConfig;
    use crate::processing::noise_floor::NoiseFloorStage;
    use ndarray::Array2;

    fn event(start_bin: usize, end_bin: usize, frames: usize, track: Vec<usize>, occupied: f64) -> CandidateEvent {
        CandidateEvent {
            start_frame: 0,
            end_frame: frames - 1,
            start_bin,
            end_bin,
            peak_power_db: -20.0,
            peak_frame: 0,
            peak_bin: start_bin,
            peak_margin_db: 40.0,
            cell_count: 1,
            centroid_bin: (start_bin + end_bin) as f64 / 2.0,
            peak_track: track,
            median_occupied_bins: occupied,
        }
    }

    #[test]
    fn narrow_long_event_is_a_carrier() {
        let signatures = SignatureConfig::default();
        let carrier = event(10, 14, 20, vec![12; 20], 5.0);
        assert_eq!(classify_shape(&carrier, 0.1, &signatures), InterferenceType::Carrier);
    }

    #[test]
    fn wide_short_event_is_a_burst() {
        let signatures = SignatureConfig::default();
        let burst = event(0, 99, 2, vec![40, 60], 100.0);
        assert_eq!(classify_shape(&burst, 0.1, &signatures), InterferenceType::PulseBurst);
    }

    #[test]
    fn drifting_narrow_track_is_a_sweep() {
        let signatures = SignatureConfig::default();
        let track: Vec<usize> = (0..20).map(|f| 10 + 4 * f).collect();
        let sweep = event(8, 88, 20, track, 5.0);
        assert_eq!(classify_shape(&sweep, 0.1, &signatures), InterferenceType::Sweep);
    }

    #[test]
    fn onset_splatter_does_not_break_a_carrier() {
        let signatures = SignatureConfig::default();
        let carrier = event(180, 210, 47, vec![192; 47], 7.0);
        assert_eq!(classify_shape(&carrier, 0.064, &signatures), InterferenceType::Carrier);
    }

    #[test]
    fn ambiguous_event_is_unknown() {
        let signatures = SignatureConfig::default();
        let blob = event(0, 20, 3, vec![10, 10, 10], 21.0);
        assert_eq!(classify_shape(&blob, 0.1, &signatures), InterferenceType::Unknown);
    }

    #[test]
    fn equidistant_bands_resolve_to_higher_priority() {
        let table = BandTable::new(vec![
            ProtectedBand::new("low-priority", 700.0, 1_100.0, 1),
            ProtectedBand::new("high-priority", 900.0, 1_300.0, 9),
        ]);
        let band = match_band(&table, 950.0, 1_050.0, 1_000.0).unwrap();
        assert_eq!(band.name, "high-priority");

        let swapped = BandTable::new(table.bands.iter().rev().cloned().collect());
        let band = match_band(&swapped, 950.0, 1_050.0, 1_000.0).unwrap();
        assert_eq!(band.name, "high-priority");
    }

    #[test]
    fn nearest_band_wins_over_priority() {
        let table = BandTable::new(vec![
            ProtectedBand::new("far", 0.0, 2_400.0, 9),
            ProtectedBand::new("near", 980.0, 1_040.0, 1),
        ]);
        let band = match_band(&table, 990.0, 1_010.0, 1_000.0).unwrap();
        assert_eq!(band.name, "near");
        assert!(match_band(&table, 5_000.0, 6_000.0, 5_500.0).is_none());
    }

    #[test]
    fn service_follows_table_order_and_bandwidth_floor() {
        let table = ServiceTable::new(vec![
            ServiceAllocation::new("FM_broadcast", 88.0e6, 108.0e6).with_min_bandwidth(150.0e3),
            ServiceAllocation::new("VHF_wide", 80.0e6, 120.0e6),
        ]);
        let wide = match_service(&table, 98.1e6, 200.0e3).unwrap();
        assert_eq!(wide.name, "FM_broadcast");
        let narrow = match_service(&table, 98.1e6, 12.5e3).unwrap();
        assert_eq!(narrow.name, "VHF_wide");
        assert!(match_service(&table, 2.45e9, 20.0e6).is_none());
    }

    #[test]
    fn protected_band_lifts_and_unreliable_floor_caps() {
        let scoring = ScoringConfig::default();
        let weak = score(10.0, 10.0, InterferenceType::Unknown, false, true, &scoring);
        let protected = score(10.0, 10.0, InterferenceType::Unknown, true, true, &scoring);
        assert!(weak < scoring.protected_floor);
        assert_eq!(protected, scoring.protected_floor);

        let strong = score(80.0, 10.0, InterferenceType::Carrier, true, true, &scoring);
        assert_eq!(strong, 1.0);
        let capped = score(80.0, 10.0, InterferenceType::Carrier, true, false, &scoring);
        assert_eq!(capped, scoring.unreliable_cap);
    }

    #[test]
    fn unreliable_cap_never_pushes_protected_below_floor() {
        let scoring = ScoringConfig {
            unreliable_cap: 0.3,
            ..Default::default()
        };
        let protected = score(80.0, 10.0, InterferenceType::Carrier, true, false, &scoring);
        assert_eq!(protected, scoring.protected_floor);
        let unprotected = score(80.0, 10.0, InterferenceType::Carrier, false, false, &scoring);
        assert_eq!(unprotected, 0.3);
    }

    #[test]
    fn larger_margin_scores_higher() {
        let scoring = ScoringConfig::default();
        let low = score(12.0, 10.0, InterferenceType::Carrier, false, true, &scoring);
        let high = score(30.0, 10.0, InterferenceType::Carrier, false, true, &scoring);
        assert!(high > low);
        assert!((0.0..=1.0).contains(&high));
    }

    #[test]
    fn stage_converts_bins_to_physical_units() {
        let mut grid = Array2::from_elem((10, 20), -90.0f32);
        for frame in 0..10 {
            grid[[frame, 5]] = -30.0;
        }
        let spectrogram = Spectrogram::from_grid(grid, 100.0, 0.1, 1_000.0)
            .unwrap()
            .with_start_time(2.0);
        let floor_config = NoiseFloorConfig {
            smoothing_bins: 3,
            ..Default::default()
        };
        let floor = NoiseFloorStage::estimate(&floor_config, &spectrogram, &CancelToken::new()).unwrap();
        let candidate = CandidateEvent {
            start_frame: 0,
            end_frame: 9,
            start_bin: 5,
            end_bin: 5,
            peak_power_db: -30.0,
            peak_frame: 0,
            peak_bin: 5,
            peak_margin_db: 60.0,
            cell_count: 10,
            centroid_bin: 5.0,
            peak_track: vec![5; 10],
            median_occupied_bins: 1.0,
        };
        let config = EngineConfig::default()
            .with_band_table(BandTable::new(vec![ProtectedBand::new(
                "test band", 1_450.0, 1_600.0, 3,
            )]))
            .with_service_table(ServiceTable::new(vec![
                ServiceAllocation::new("wideband test", 1_000.0, 2_000.0).with_min_bandwidth(500.0),
                ServiceAllocation::new("audio test", 1_000.0, 2_000.0),
            ]));

        let mut stage = ClassifierStage::new();
        stage.initialize(&config).unwrap();
        let scored = stage
            .execute(
                CandidateSet {
                    spectrogram,
                    floor,
                    candidates: vec![candidate],
                },
                &CancelToken::new(),
            )
            .unwrap();
        let detection = &scored.detections[0];
        assert_eq!(detection.center_frequency_hz, 1_500.0);
        assert_eq!(detection.bandwidth_hz, 100.0);
        assert_eq!(detection.timestamp_s, 2.0);
        assert!((detection.end_time_s - 3.0).abs() < 1e-9);
        assert_eq!(detection.band.as_deref(), Some("test band"));
        assert_eq!(detection.service.as_deref(), Some("audio test"));
        assert_eq!(detection.interference_type, InterferenceType::Carrier);
        assert!(detection.confidence > 0.9);
        stage.cleanup();
    }
}
