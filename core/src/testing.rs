//! Seeded synthetic signals shared by the unit tests.

use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f32::consts::PI;
use std::io::Cursor;

pub fn gaussian_noise(length: usize, sigma: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..length)
        .map(|_| {
            let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
            let u2: f32 = rng.gen_range(0.0..1.0);
            sigma * (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
        })
        .collect()
}

/// Adds a sine of `amplitude` at `frequency` Hz over `[start_s, end_s)`.
pub fn add_tone(
    samples: &mut [f32],
    sample_rate: f32,
    frequency: f32,
    amplitude: f32,
    start_s: f32,
    end_s: f32,
) {
    for (idx, sample) in samples.iter_mut().enumerate() {
        let t = idx as f32 / sample_rate;
        if t >= start_s && t < end_s {
            *sample += amplitude * (2.0 * PI * frequency * t).sin();
        }
    }
}

/// Encodes interleaved float samples as a 32-bit float WAV file.
pub fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}
