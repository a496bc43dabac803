use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Tapering functions applied to each frame before the transform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowFunction {
    Rectangular,
    Hann,
    Hamming,
    Blackman,
    /// 4-term Blackman-Harris, about -92 dB side lobes.
    #[default]
    BlackmanHarris,
}

impl WindowFunction {
    /// Periodic coefficients of length `size`.
    pub fn coefficients(&self, size: usize) -> Vec<f32> {
        let terms: &[f64] = match self {
            WindowFunction::Rectangular => &[1.0],
            WindowFunction::Hann => &[0.5, 0.5],
            WindowFunction::Hamming => &[0.54, 0.46],
            WindowFunction::Blackman => &[0.42, 0.5, 0.08],
            WindowFunction::BlackmanHarris => &[0.35875, 0.48829, 0.14128, 0.01168],
        };
        (0..size)
            .map(|i| {
                let phase = 2.0 * PI * i as f64 / size as f64;
                terms
                    .iter()
                    .enumerate()
                    .map(|(k, &a)| {
                        let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                        sign * a * (k as f64 * phase).cos()
                    })
                    .sum::<f64>() as f32
            })
            .collect()
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rectangular" | "rect" | "none" => Some(WindowFunction::Rectangular),
            "hann" | "hanning" => Some(WindowFunction::Hann),
            "hamming" => Some(WindowFunction::Hamming),
            "blackman" => Some(WindowFunction::Blackman),
            "blackman-harris" | "blackmanharris" => Some(WindowFunction::BlackmanHarris),
            _ => None,
        }
    }
}
