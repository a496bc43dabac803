use anyhow::Context;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::io::Cursor;

/// Configuration for synthesising a test recording with known interference.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub sample_rate_hz: u32,
    pub duration_s: f32,
    /// Peak amplitude of the uniform background noise.
    pub noise: f32,
    pub seed: u64,
    /// Raised-cosine on/off ramp for the carrier and sweep.
    pub ramp_s: f32,
    pub carrier: Option<Carrier>,
    pub burst: Option<Burst>,
    pub sweep: Option<Sweep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Carrier {
    pub frequency_hz: f32,
    pub amplitude: f32,
    pub start_s: f32,
    pub end_s: f32,
}

/// Broadband noise burst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Burst {
    pub start_s: f32,
    pub length_s: f32,
    pub amplitude: f32,
}

/// Linear chirp from `start_hz` to `end_hz`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sweep {
    pub start_hz: f32,
    pub end_hz: f32,
    pub amplitude: f32,
    pub start_s: f32,
    pub end_s: f32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 8_000,
            duration_s: 6.0,
            noise: 0.05,
            seed: 0,
            ramp_s: 0.1,
            carrier: Some(Carrier {
                frequency_hz: 1_420.0,
                amplitude: 0.4,
                start_s: 0.0,
                end_s: 1.5,
            }),
            burst: Some(Burst {
                start_s: 2.0,
                length_s: 0.2,
                amplitude: 0.8,
            }),
            sweep: Some(Sweep {
                start_hz: 2_000.0,
                end_hz: 3_800.0,
                amplitude: 0.3,
                start_s: 3.0,
                end_s: 5.0,
            }),
        }
    }
}

fn within(t: f32, start_s: f32, end_s: f32) -> bool {
    t >= start_s && t < end_s
}

/// Gain in [0, 1] that rises over `ramp_s` after `start_s` and falls before `end_s`.
fn envelope(t: f32, start_s: f32, end_s: f32, ramp_s: f32) -> f32 {
    if !within(t, start_s, end_s) {
        return 0.0;
    }
    let edge = (t - start_s).min(end_s - t);
    if ramp_s <= 0.0 || edge >= ramp_s {
        1.0
    } else {
        0.5 - 0.5 * (PI * edge / ramp_s).cos()
    }
}

pub fn build_samples(config: &GeneratorConfig) -> anyhow::Result<Vec<f32>> {
    let rate = config.sample_rate_hz as f32;
    if !(rate > 0.0) || !(config.duration_s > 0.0) {
        anyhow::bail!("generator needs a positive sample rate and duration");
    }
    let sample_count = (config.duration_s * rate) as usize;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut samples = Vec::with_capacity(sample_count);

    for index in 0..sample_count {
        let t = index as f32 / rate;
        let mut value = if config.noise > 0.0 {
            rng.gen_range(-config.noise..config.noise)
        } else {
            0.0
        };

        if let Some(carrier) = &config.carrier {
            let gain = envelope(t, carrier.start_s, carrier.end_s, config.ramp_s);
            if gain > 0.0 {
                value += gain * carrier.amplitude * (2.0 * PI * carrier.frequency_hz * t).sin();
            }
        }
        if let Some(burst) = &config.burst {
            if within(t, burst.start_s, burst.start_s + burst.length_s) && burst.amplitude > 0.0 {
                value += rng.gen_range(-burst.amplitude..burst.amplitude);
            }
        }
        if let Some(sweep) = &config.sweep {
            let gain = envelope(t, sweep.start_s, sweep.end_s, config.ramp_s);
            if gain > 0.0 {
                let elapsed = t - sweep.start_s;
                let rate_hz_per_s = (sweep.end_hz - sweep.start_hz) / (sweep.end_s - sweep.start_s);
                let phase = 2.0 * PI * (sweep.start_hz * elapsed + 0.5 * rate_hz_per_s * elapsed * elapsed);
                value += gain * sweep.amplitude * phase.sin();
            }
        }
        samples.push(value);
    }

    Ok(samples)
}

/// Encodes the synthetic recording as 16-bit PCM WAV bytes.
pub fn build_wav_from_config(config: &GeneratorConfig) -> anyhow::Result<Vec<u8>> {
    let samples = build_samples(config)?;
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: config.sample_rate_hz,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).context("creating synthetic wav writer")?;
        for sample in samples {
            let clipped = sample.clamp(-1.0, 1.0);
            writer
                .write_sample((clipped * f32::from(i16::MAX)) as i16)
                .context("writing synthetic sample")?;
        }
        writer.finalize().context("finalizing synthetic wav")?;
    }
    Ok(cursor.into_inner())
}

pub fn build_offline_recording(seed: u64) -> anyhow::Result<Vec<u8>> {
    let config = GeneratorConfig {
        seed,
        ..Default::default()
    };
    build_wav_from_config(&config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_builds_expected_sample_count() {
        let samples = build_samples(&GeneratorConfig::default()).unwrap();
        assert_eq!(samples.len(), 48_000);
    }

    #[test]
    fn same_seed_same_recording() {
        assert_eq!(
            build_offline_recording(4).unwrap(),
            build_offline_recording(4).unwrap()
        );
        assert_ne!(
            build_offline_recording(4).unwrap(),
            build_offline_recording(5).unwrap()
        );
    }

    #[test]
    fn quiet_config_has_only_noise() {
        let config = GeneratorConfig {
            duration_s: 1.0,
            carrier: None,
            burst: None,
            sweep: None,
            ..Default::default()
        };
        let samples = build_samples(&config).unwrap();
        assert!(samples.iter().all(|s| s.abs() <= config.noise));
    }

    #[test]
    fn wav_header_matches_config() {
        let bytes = build_wav_from_config(&GeneratorConfig {
            duration_s: 0.5,
            ..Default::default()
        })
        .unwrap();
        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        assert_eq!(reader.spec().sample_rate, 8_000);
        assert_eq!(reader.len(), 4_000);
    }

    #[test]
    fn ramp_starts_silent_and_reaches_full_gain() {
        assert_eq!(envelope(0.0, 0.0, 1.0, 0.1), 0.0);
        assert_eq!(envelope(0.5, 0.0, 1.0, 0.1), 1.0);
        assert!((envelope(0.05, 0.0, 1.0, 0.1) - 0.5).abs() < 1e-5);
        assert_eq!(envelope(1.0, 0.0, 1.0, 0.1), 0.0);
        assert_eq!(envelope(0.0, 0.0, 1.0, 0.0), 1.0);
    }

    #[test]
    fn zero_duration_is_rejected() {
        let config = GeneratorConfig {
            duration_s: 0.0,
            ..Default::default()
        };
        assert!(build_samples(&config).is_err());
    }
}
