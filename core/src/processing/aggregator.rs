use crate::interface::detection::Detection;
use crate::prelude::{CancelToken, EngineConfig, EngineError, EngineResult, ProcessingStage};
use crate::processing::classifier::ScoredDetections;
use crate::telemetry::log::LogManager;
use std::cmp::Ordering;

struct MergeParams {
    max_detections: Option<usize>,
}

/// Removes near-duplicates and returns detections ordered by timestamp.
pub struct AggregatorStage {
    params: Option<MergeParams>,
    logger: LogManager,
}

impl AggregatorStage {
    pub fn new() -> Self {
        Self {
            params: None,
            logger: LogManager::new("aggregator"),
        }
    }

    /// True when the pair is within one bin of each other and shares time.
    pub fn duplicates(a: &Detection, b: &Detection, frequency_resolution_hz: f64) -> bool {
        (a.center_frequency_hz - b.center_frequency_hz).abs() <= frequency_resolution_hz
            && a.overlaps_in_time(b)
    }

    /// Greedy suppression in rank order, so the survivor of any duplicate pair
    /// is the one with higher confidence, then higher peak power.
    pub fn merge(
        mut detections: Vec<Detection>,
        frequency_resolution_hz: f64,
        max_detections: Option<usize>,
    ) -> Vec<Detection> {
        detections.sort_by(rank);
        let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
        for detection in detections {
            let shadowed = kept
                .iter()
                .any(|other| Self::duplicates(other, &detection, frequency_resolution_hz));
            if !shadowed {
                kept.push(detection);
            }
        }
        if let Some(limit) = max_detections {
            kept.truncate(limit);
        }
        kept.sort_by(chronological);
        kept
    }
}

impl Default for AggregatorStage {
    fn default() -> Self {
        Self::new()
    }
}

fn rank(a: &Detection, b: &Detection) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| b.peak_power_db.total_cmp(&a.peak_power_db))
        .then_with(|| a.timestamp_s.total_cmp(&b.timestamp_s))
        .then_with(|| a.center_frequency_hz.total_cmp(&b.center_frequency_hz))
}

fn chronological(a: &Detection, b: &Detection) -> Ordering {
    a.timestamp_s
        .total_cmp(&b.timestamp_s)
        .then_with(|| a.center_frequency_hz.total_cmp(&b.center_frequency_hz))
}

impl ProcessingStage for AggregatorStage {
    type Input = ScoredDetections;
    type Output = Vec<Detection>;

    fn initialize(&mut self, config: &EngineConfig) -> EngineResult<()> {
        self.params = Some(MergeParams {
            max_detections: config.max_detections,
        });
        Ok(())
    }

    fn execute(&mut self, input: ScoredDetections, cancel: &CancelToken) -> EngineResult<Vec<Detection>> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| EngineError::Internal("stage not initialized".into()))?;
        cancel.check()?;

        let before = input.detections.len();
        let merged = Self::merge(input.detections, input.frequency_resolution_hz, params.max_detections);
        self.logger
            .record(&format!("{} detections merged into {}", before, merged.len()));
        Ok(merged)
    }

    fn cleanup(&mut self) {
        self.params = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::detection::InterferenceType;

    fn detection(freq: f64, start: f64, end: f64, confidence: f32, peak: f32) -> Detection {
        Detection {
            center_frequency_hz: freq,
            peak_power_db: peak,
            margin_db: 20.0,
            timestamp_s: start,
            end_time_s: end,
            duration_s: end - start,
            bandwidth_hz: 10.0,
            band: None,
            band_priority: None,
            service: None,
            interference_type: InterferenceType::Carrier,
            confidence,
        }
    }

    #[test]
    fn overlapping_neighbours_keep_higher_confidence() {
        let merged = AggregatorStage::merge(
            vec![
                detection(1_000.0, 0.0, 1.0, 0.4, -10.0),
                detection(1_008.0, 0.5, 1.5, 0.9, -20.0),
            ],
            10.0,
            None,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.9);
    }

    #[test]
    fn equal_confidence_keeps_higher_peak() {
        let merged = AggregatorStage::merge(
            vec![
                detection(1_000.0, 0.0, 1.0, 0.7, -25.0),
                detection(1_005.0, 0.0, 1.0, 0.7, -15.0),
            ],
            10.0,
            None,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].peak_power_db, -15.0);
    }

    #[test]
    fn separated_detections_survive_in_time_order() {
        let merged = AggregatorStage::merge(
            vec![
                detection(1_000.0, 2.0, 3.0, 0.9, -10.0),
                detection(1_000.0, 0.0, 1.0, 0.5, -10.0),
                detection(3_000.0, 2.5, 3.5, 0.6, -10.0),
            ],
            10.0,
            None,
        );
        let starts: Vec<f64> = merged.iter().map(|d| d.timestamp_s).collect();
        assert_eq!(starts, vec![0.0, 2.0, 2.5]);
    }

    #[test]
    fn touching_windows_do_not_overlap() {
        let a = detection(1_000.0, 0.0, 1.0, 0.5, -10.0);
        let b = detection(1_000.0, 1.0, 2.0, 0.5, -10.0);
        assert!(!AggregatorStage::duplicates(&a, &b, 10.0));
    }

    #[test]
    fn cap_keeps_most_confident() {
        let merged = AggregatorStage::merge(
            vec![
                detection(1_000.0, 0.0, 1.0, 0.2, -10.0),
                detection(2_000.0, 1.0, 2.0, 0.8, -10.0),
                detection(3_000.0, 2.0, 3.0, 0.6, -10.0),
            ],
            10.0,
            Some(2),
        );
        let freqs: Vec<f64> = merged.iter().map(|d| d.center_frequency_hz).collect();
        assert_eq!(freqs, vec![2_000.0, 3_000.0]);
    }

    #[test]
    fn stage_requires_initialization() {
        let mut stage = AggregatorStage::new();
        let input = ScoredDetections {
            detections: Vec::new(),
            frequency_resolution_hz: 1.0,
        };
        let result = stage.execute(input.clone(), &CancelToken::new());
        assert!(matches!(result, Err(EngineError::Internal(_))));

        stage.initialize(&EngineConfig::default()).unwrap();
        assert!(stage.execute(input, &CancelToken::new()).unwrap().is_empty());
        stage.cleanup();
    }
}
