pub struct StatsHelper;

impl StatsHelper {
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|&v| v * v).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Linear-interpolated percentile (`pct` in 0..=100); sorts `values` in place.
    pub fn percentile(values: &mut [f32], pct: f32) -> Option<f32> {
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        let rank = (pct.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f32;
        let lower = rank.floor() as usize;
        let upper = rank.ceil() as usize;
        let fraction = rank - lower as f32;
        Some(values[lower] + (values[upper] - values[lower]) * fraction)
    }

    pub fn median(values: &mut [f32]) -> Option<f32> {
        Self::percentile(values, 50.0)
    }

    /// Power in dB, clamped at `floor_db` so silence stays finite.
    pub fn power_to_db(power: f32, floor_db: f32) -> f32 {
        if power <= Self::db_to_power(floor_db) {
            floor_db
        } else {
            10.0 * power.log10()
        }
    }

    pub fn db_to_power(db: f32) -> f32 {
        10f32.powf(db / 10.0)
    }
}
