use crate::config::NoiseFloorConfig;
use crate::math::stats::StatsHelper;
use crate::prelude::{CancelToken, EngineConfig, EngineError, EngineResult, ProcessingStage};
use crate::processing::spectral::Spectrogram;
use crate::telemetry::log::LogManager;

/// Robust per-bin baseline power, on the same frequency axis as its spectrogram.
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseFloor {
    levels_db: Vec<f32>,
    frames_used: usize,
    reliable: bool,
}

impl NoiseFloor {
    pub fn levels_db(&self) -> &[f32] {
        &self.levels_db
    }

    pub fn level(&self, bin: usize) -> f32 {
        self.levels_db[bin]
    }

    pub fn len(&self) -> usize {
        self.levels_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels_db.is_empty()
    }

    pub fn frames_used(&self) -> usize {
        self.frames_used
    }

    /// False when too few frames backed the statistic; confidences get capped.
    pub fn reliable(&self) -> bool {
        self.reliable
    }
}

/// Spectrogram paired with the floor estimated from it.
#[derive(Debug, Clone)]
pub struct FlooredSpectrogram {
    pub spectrogram: Spectrogram,
    pub floor: NoiseFloor,
}

/// Temporal-percentile noise floor with an optional cross-frequency median.
pub struct NoiseFloorStage {
    config: Option<NoiseFloorConfig>,
    logger: LogManager,
}

impl NoiseFloorStage {
    pub fn new() -> Self {
        Self {
            config: None,
            logger: LogManager::new("noise_floor"),
        }
    }

    pub fn estimate(
        config: &NoiseFloorConfig,
        spectrogram: &Spectrogram,
        cancel: &CancelToken,
    ) -> EngineResult<NoiseFloor> {
        let grid = spectrogram.power_db();
        let mut temporal = Vec::with_capacity(spectrogram.bins());
        for column in grid.columns() {
            cancel.check()?;
            let mut values = column.to_vec();
            let level = StatsHelper::percentile(&mut values, config.percentile)
                .ok_or_else(|| EngineError::Internal("spectrogram has no frames".into()))?;
            temporal.push(level);
        }

        let levels_db = smooth_across_frequency(&temporal, config.smoothing_bins);
        let frames_used = spectrogram.frames();
        Ok(NoiseFloor {
            levels_db,
            frames_used,
            reliable: frames_used >= config.min_reliable_frames,
        })
    }
}

impl Default for NoiseFloorStage {
    fn default() -> Self {
        Self::new()
    }
}

/// Running median over `[bin - half_width, bin + half_width]`, truncated at the edges.
fn smooth_across_frequency(levels: &[f32], half_width: usize) -> Vec<f32> {
    if half_width == 0 {
        return levels.to_vec();
    }
    let mut scratch = Vec::with_capacity(2 * half_width + 1);
    (0..levels.len())
        .map(|bin| {
            let lower = bin.saturating_sub(half_width);
            let upper = (bin + half_width + 1).min(levels.len());
            scratch.clear();
            scratch.extend_from_slice(&levels[lower..upper]);
            StatsHelper::median(&mut scratch).unwrap_or(levels[bin])
        })
        .collect()
}

impl ProcessingStage for NoiseFloorStage {
    type Input = Spectrogram;
    type Output = FlooredSpectrogram;

    fn initialize(&mut self, config: &EngineConfig) -> EngineResult<()> {
        self.config = Some(config.noise_floor.clone());
        Ok(())
    }

    fn execute(
        &mut self,
        spectrogram: Spectrogram,
        cancel: &CancelToken,
    ) -> EngineResult<FlooredSpectrogram> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| EngineError::Internal("stage not initialized".into()))?;

        let floor = Self::estimate(config, &spectrogram, cancel)?;
        self.logger.record(&format!(
            "{} bins from {} frames (reliable: {})",
            floor.len(),
            floor.frames_used(),
            floor.reliable()
        ));
        Ok(FlooredSpectrogram { spectrogram, floor })
    }

    fn cleanup(&mut self) {
        self.config = None;
    }
}
