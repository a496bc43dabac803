use crate::math::stats::StatsHelper;
use crate::prelude::{CancelToken, EngineConfig, EngineError, EngineResult, ProcessingStage};
use crate::processing::noise_floor::{FlooredSpectrogram, NoiseFloor};
use crate::processing::spectral::Spectrogram;
use crate::telemetry::log::LogManager;
use std::cmp::Reverse;
use std::collections::VecDeque;

/// Contiguous time/frequency region whose power exceeds floor + threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEvent {
    pub start_frame: usize,
    pub end_frame: usize,
    pub start_bin: usize,
    pub end_bin: usize,
    pub peak_power_db: f32,
    pub peak_frame: usize,
    pub peak_bin: usize,
    /// Peak power minus the floor of the peak bin.
    pub peak_margin_db: f32,
    pub cell_count: usize,
    /// Power-weighted centroid of the region's max-hold spectrum.
    pub centroid_bin: f64,
    /// Strongest bin of each frame, from `start_frame` to `end_frame`.
    pub peak_track: Vec<usize>,
    /// Median number of active bins per frame.
    pub median_occupied_bins: f64,
}

impl CandidateEvent {
    pub fn frame_span(&self) -> usize {
        self.end_frame - self.start_frame + 1
    }

    pub fn bin_span(&self) -> usize {
        self.end_bin - self.start_bin + 1
    }
}

/// Candidates together with the grids they were found in.
#[derive(Debug, Clone)]
pub struct CandidateSet {
    pub spectrogram: Spectrogram,
    pub floor: NoiseFloor,
    pub candidates: Vec<CandidateEvent>,
}

struct PeakParams {
    threshold_db: f32,
    min_duration_s: f64,
    min_bandwidth_hz: f64,
}

/// Threshold, 4-connected grouping and extent filtering over the spectrogram.
pub struct PeakStage {
    params: Option<PeakParams>,
    logger: LogManager,
}

impl PeakStage {
    pub fn new() -> Self {
        Self {
            params: None,
            logger: LogManager::new("peaks"),
        }
    }
}

impl Default for PeakStage {
    fn default() -> Self {
        Self::new()
    }
}

fn find_regions(
    spectrogram: &Spectrogram,
    floor: &NoiseFloor,
    threshold_db: f32,
    cancel: &CancelToken,
) -> EngineResult<Vec<CandidateEvent>> {
    let grid = spectrogram.power_db();
    let (frames, bins) = grid.dim();
    if floor.len() != bins {
        return Err(EngineError::Internal(format!(
            "noise floor has {} bins, spectrogram has {}",
            floor.len(),
            bins
        )));
    }

    let active: Vec<bool> = grid
        .indexed_iter()
        .map(|((_, bin), &power)| power - floor.level(bin) >= threshold_db)
        .collect();
    let mut visited = vec![false; frames * bins];
    let mut queue = VecDeque::new();
    let mut events = Vec::new();

    for frame in 0..frames {
        cancel.check()?;
        for bin in 0..bins {
            let idx = frame * bins + bin;
            if !active[idx] || visited[idx] {
                continue;
            }

            let mut cells = Vec::new();
            visited[idx] = true;
            queue.push_back((frame, bin));
            while let Some((f, b)) = queue.pop_front() {
                cells.push((f, b));
                let mut neighbours = Vec::with_capacity(4);
                if f > 0 {
                    neighbours.push((f - 1, b));
                }
                if f + 1 < frames {
                    neighbours.push((f + 1, b));
                }
                if b > 0 {
                    neighbours.push((f, b - 1));
                }
                if b + 1 < bins {
                    neighbours.push((f, b + 1));
                }
                for (nf, nb) in neighbours {
                    let n_idx = nf * bins + nb;
                    if active[n_idx] && !visited[n_idx] {
                        visited[n_idx] = true;
                        queue.push_back((nf, nb));
                    }
                }
            }
            events.push(summarize(&cells, spectrogram, floor));
        }
    }
    Ok(events)
}

fn summarize(cells: &[(usize, usize)], spectrogram: &Spectrogram, floor: &NoiseFloor) -> CandidateEvent {
    let grid = spectrogram.power_db();
    let start_frame = cells.iter().map(|&(f, _)| f).min().unwrap_or(0);
    let end_frame = cells.iter().map(|&(f, _)| f).max().unwrap_or(0);
    let start_bin = cells.iter().map(|&(_, b)| b).min().unwrap_or(0);
    let end_bin = cells.iter().map(|&(_, b)| b).max().unwrap_or(0);

    let frame_span = end_frame - start_frame + 1;
    let bin_span = end_bin - start_bin + 1;
    let mut track: Vec<Option<(usize, f32)>> = vec![None; frame_span];
    let mut max_hold = vec![f32::NEG_INFINITY; bin_span];
    let mut occupied = vec![0.0f32; frame_span];
    let mut peak = (f32::NEG_INFINITY, 0usize, 0usize);

    for &(f, b) in cells {
        let power = grid[[f, b]];
        // Ties resolve to the earliest frame, then the lowest bin.
        if power > peak.0 || (power == peak.0 && (f, b) < (peak.1, peak.2)) {
            peak = (power, f, b);
        }
        let slot = &mut track[f - start_frame];
        match *slot {
            Some((best_bin, best)) if power < best || (power == best && b > best_bin) => {}
            _ => *slot = Some((b, power)),
        }
        occupied[f - start_frame] += 1.0;
        let hold = &mut max_hold[b - start_bin];
        *hold = hold.max(power);
    }

    let (weighted, total) = max_hold
        .iter()
        .enumerate()
        .filter(|(_, power)| power.is_finite())
        .fold((0.0f64, 0.0f64), |(weighted, total), (offset, &power)| {
            let linear = f64::from(StatsHelper::db_to_power(power));
            (weighted + linear * (start_bin + offset) as f64, total + linear)
        });
    let centroid_bin = if total > 0.0 {
        weighted / total
    } else {
        peak.2 as f64
    };

    let (peak_power_db, peak_frame, peak_bin) = peak;
    CandidateEvent {
        start_frame,
        end_frame,
        start_bin,
        end_bin,
        peak_power_db,
        peak_frame,
        peak_bin,
        peak_margin_db: peak_power_db - floor.level(peak_bin),
        cell_count: cells.len(),
        centroid_bin,
        peak_track: track
            .into_iter()
            .map(|slot| slot.map(|(bin, _)| bin).unwrap_or(peak_bin))
            .collect(),
        median_occupied_bins: f64::from(StatsHelper::median(&mut occupied).unwrap_or(0.0)),
    }
}

impl ProcessingStage for PeakStage {
    type Input = FlooredSpectrogram;
    type Output = CandidateSet;

    fn initialize(&mut self, config: &EngineConfig) -> EngineResult<()> {
        self.params = Some(PeakParams {
            threshold_db: config.threshold_db,
            min_duration_s: config.min_duration_s,
            min_bandwidth_hz: config.min_bandwidth_hz,
        });
        Ok(())
    }

    fn execute(&mut self, input: FlooredSpectrogram, cancel: &CancelToken) -> EngineResult<CandidateSet> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| EngineError::Internal("stage not initialized".into()))?;
        let FlooredSpectrogram { spectrogram, floor } = input;

        let regions = find_regions(&spectrogram, &floor, params.threshold_db, cancel)?;
        let region_count = regions.len();
        let time_resolution = spectrogram.time_resolution_s();
        let frequency_resolution = spectrogram.frequency_resolution_hz();

        let mut candidates: Vec<CandidateEvent> = regions
            .into_iter()
            .filter(|event| {
                event.frame_span() as f64 * time_resolution >= params.min_duration_s
                    && event.bin_span() as f64 * frequency_resolution >= params.min_bandwidth_hz
            })
            .collect();
        candidates.sort_by_key(|event| (event.start_frame, event.start_bin, Reverse(event.cell_count)));

        self.logger.record(&format!(
            "{} regions above {:.1} dB, {} kept after extent filter",
            region_count,
            params.threshold_db,
            candidates.len()
        ));
        Ok(CandidateSet {
            spectrogram,
            floor,
            candidates,
        })
    }

    fn cleanup(&mut self) {
        self.params = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NoiseFloorConfig;
    use crate::processing::noise_floor::NoiseFloorStage;
    use ndarray::Array2;

    const QUIET: f32 = -90.0;
    const LOUD: f32 = -30.0;

    fn detect(hot: &[(usize, usize)], frames: usize, bins: usize, config: &EngineConfig) -> Vec<CandidateEvent> {
        let mut grid = Array2::from_elem((frames, bins), QUIET);
        for &(f, b) in hot {
            grid[[f, b]] = LOUD;
        }
        let spectrogram = Spectrogram::from_grid(grid, 10.0, 0.1, 0.0).unwrap();
        let floor_config = NoiseFloorConfig {
            smoothing_bins: 0,
            ..Default::default()
        };
        let floor = NoiseFloorStage::estimate(&floor_config, &spectrogram, &CancelToken::new()).unwrap();

        let mut stage = PeakStage::new();
        stage.initialize(config).unwrap();
        let set = stage
            .execute(FlooredSpectrogram { spectrogram, floor }, &CancelToken::new())
            .unwrap();
        stage.cleanup();
        set.candidates
    }

    fn permissive() -> EngineConfig {
        EngineConfig {
            min_duration_s: 0.0,
            min_bandwidth_hz: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn diagonal_cells_stay_separate() {
        let events = detect(&[(2, 2), (3, 3)], 10, 10, &permissive());
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn adjacent_cells_merge_in_time_and_frequency() {
        let events = detect(&[(2, 2), (3, 2), (3, 3), (3, 4)], 10, 10, &permissive());
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!((event.start_frame, event.end_frame), (2, 3));
        assert_eq!((event.start_bin, event.end_bin), (2, 4));
        assert_eq!(event.cell_count, 4);
        assert_eq!(event.peak_margin_db, LOUD - QUIET);
        assert_eq!(event.peak_track, vec![2, 2]);
    }

    #[test]
    fn short_and_narrow_regions_are_discarded() {
        let hot = [(1, 1), (1, 6), (2, 6), (3, 6)];
        let config = EngineConfig {
            min_duration_s: 0.25,
            ..permissive()
        };
        let events = detect(&hot, 10, 10, &config);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start_bin, 6);

        let config = EngineConfig {
            min_bandwidth_hz: 15.0,
            ..permissive()
        };
        assert!(detect(&hot, 10, 10, &config).is_empty());
    }

    #[test]
    fn occupancy_ignores_a_single_splattered_frame() {
        let mut hot: Vec<(usize, usize)> = (2..=8).map(|b| (2, b)).collect();
        hot.extend((3..=6).map(|f| (f, 5)));
        let events = detect(&hot, 12, 10, &permissive());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].bin_span(), 7);
        assert_eq!(events[0].median_occupied_bins, 1.0);
    }

    #[test]
    fn events_ordered_by_start_frame_then_bin() {
        let hot = [(5, 1), (1, 8), (1, 2), (1, 3)];
        let events = detect(&hot, 10, 10, &permissive());
        let starts: Vec<_> = events.iter().map(|e| (e.start_frame, e.start_bin)).collect();
        assert_eq!(starts, vec![(1, 2), (1, 8), (5, 1)]);
    }

    #[test]
    fn centroid_sits_between_equal_cells() {
        let events = detect(&[(4, 3), (4, 4)], 10, 10, &permissive());
        assert!((events[0].centroid_bin - 3.5).abs() < 1e-9);
    }

    #[test]
    fn mismatched_floor_is_internal_error() {
        let spectrogram =
            Spectrogram::from_grid(Array2::from_elem((4, 4), QUIET), 10.0, 0.1, 0.0).unwrap();
        let other = Spectrogram::from_grid(Array2::from_elem((4, 3), QUIET), 10.0, 0.1, 0.0).unwrap();
        let floor =
            NoiseFloorStage::estimate(&NoiseFloorConfig::default(), &other, &CancelToken::new()).unwrap();
        let result = find_regions(&spectrogram, &floor, 10.0, &CancelToken::new());
        assert!(matches!(result, Err(EngineError::Internal(_))));
    }
}
