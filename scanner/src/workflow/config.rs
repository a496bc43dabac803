use anyhow::{bail, Context};
use rficore::config::{BandTable, EngineConfig, ServiceTable};
use rficore::interface::{FormatHint, IqFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Scanner settings: the engine section plus batch and ingestion options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub engine: EngineConfig,
    /// YAML band table; relative paths resolve against the config file.
    pub bands: Option<PathBuf>,
    /// YAML service allocation table, resolved like `bands`.
    pub services: Option<PathBuf>,
    /// Recordings scanned concurrently.
    pub workers: usize,
    /// `auto`, a container name, or a raw IQ encoding such as `cu8`.
    pub format: String,
    pub sample_rate_hz: Option<u32>,
    pub center_frequency_hz: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            bands: None,
            services: None,
            workers: 2,
            format: "auto".into(),
            sample_rate_hz: None,
            center_frequency_hz: 0.0,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Clone, Debug, Default)]
pub struct ScanOverrides {
    pub bands: Option<PathBuf>,
    pub services: Option<PathBuf>,
    pub format: Option<String>,
    pub sample_rate_hz: Option<u32>,
    pub center_frequency_hz: Option<f64>,
    pub threshold_db: Option<f32>,
    pub window: Option<usize>,
    pub hop: Option<usize>,
    pub workers: Option<usize>,
}

impl ScanConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading scan config {}", path_ref.display()))?;
        let mut config: ScanConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing scan config {}", path_ref.display()))?;
        if let Some(parent) = path_ref.parent() {
            for table in [&mut config.bands, &mut config.services] {
                let resolved = table
                    .as_ref()
                    .filter(|path| path.is_relative())
                    .map(|path| parent.join(path));
                if resolved.is_some() {
                    *table = resolved;
                }
            }
        }
        Ok(config)
    }

    pub fn from_args(overrides: ScanOverrides) -> Self {
        let mut config = Self::default();
        config.apply(overrides);
        config
    }

    pub fn apply(&mut self, overrides: ScanOverrides) {
        if let Some(bands) = overrides.bands {
            self.bands = Some(bands);
        }
        if let Some(services) = overrides.services {
            self.services = Some(services);
        }
        if let Some(format) = overrides.format {
            self.format = format;
        }
        if overrides.sample_rate_hz.is_some() {
            self.sample_rate_hz = overrides.sample_rate_hz;
        }
        if let Some(center) = overrides.center_frequency_hz {
            self.center_frequency_hz = center;
        }
        if let Some(threshold) = overrides.threshold_db {
            self.engine.threshold_db = threshold;
        }
        if overrides.window.is_some() {
            self.engine.window_length_samples = overrides.window;
        }
        if overrides.hop.is_some() {
            self.engine.hop_length_samples = overrides.hop;
        }
        if let Some(workers) = overrides.workers {
            self.workers = workers;
        }
    }

    /// Engine configuration with the band and service table files merged in.
    pub fn to_engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut engine = self.engine.clone();
        if let Some(path) = &self.bands {
            engine.band_table = load_band_table(path)?;
        }
        if let Some(path) = &self.services {
            engine.service_table = load_service_table(path)?;
        }
        Ok(engine)
    }

    /// Format hint for one recording, from the configured format or its extension.
    pub fn format_hint(&self, path: &Path) -> anyhow::Result<FormatHint> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();

        match self.format.to_ascii_lowercase().as_str() {
            "auto" => {
                let iq = self.sample_rate_hz.map(|rate| {
                    (IqFormat::parse(&extension).unwrap_or(IqFormat::Cf32), rate)
                });
                match FormatHint::from_extension(&extension, iq) {
                    Some(hint) => Ok(hint),
                    None if is_raw_extension(&extension) => bail!(
                        "{} looks like a raw IQ capture; pass --sample-rate",
                        path.display()
                    ),
                    None => Ok(FormatHint::Auto),
                }
            }
            "wav" => Ok(FormatHint::Wav),
            "flac" => Ok(FormatHint::Flac),
            "ogg" => Ok(FormatHint::Ogg),
            "mp3" => Ok(FormatHint::Mp3),
            other => {
                let format = IqFormat::parse(other)
                    .with_context(|| format!("unknown recording format {}", other))?;
                let sample_rate_hz = self
                    .sample_rate_hz
                    .with_context(|| format!("raw {} input needs --sample-rate", other))?;
                Ok(FormatHint::RawIq {
                    format,
                    sample_rate_hz,
                })
            }
        }
    }
}

fn is_raw_extension(extension: &str) -> bool {
    matches!(extension, "raw" | "iq" | "bin" | "dat") || IqFormat::parse(extension).is_some()
}

/// Reads a YAML band table of the form `bands: [{name, lower_hz, upper_hz, priority}]`.
pub fn load_band_table<P: AsRef<Path>>(path: P) -> anyhow::Result<BandTable> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref)
        .with_context(|| format!("reading band table {}", path_ref.display()))?;
    let table: BandTable = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing band table {}", path_ref.display()))?;
    table
        .validate()
        .with_context(|| format!("validating band table {}", path_ref.display()))?;
    Ok(table)
}

/// Reads a YAML service table of the form
/// `services: [{name, lower_hz, upper_hz, min_bandwidth_hz}]`.
pub fn load_service_table<P: AsRef<Path>>(path: P) -> anyhow::Result<ServiceTable> {
    let path_ref = path.as_ref();
    let contents = fs::read_to_string(path_ref)
        .with_context(|| format!("reading service table {}", path_ref.display()))?;
    let table: ServiceTable = serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing service table {}", path_ref.display()))?;
    table
        .validate()
        .with_context(|| format!("validating service table {}", path_ref.display()))?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn overrides_replace_file_values() {
        let cfg = ScanConfig::from_args(ScanOverrides {
            threshold_db: Some(6.0),
            window: Some(2048),
            workers: Some(8),
            ..Default::default()
        });
        assert_eq!(cfg.engine.threshold_db, 6.0);
        assert_eq!(cfg.engine.window_length_samples, Some(2048));
        assert_eq!(cfg.engine.hop_length_samples, None);
        assert_eq!(cfg.workers, 8);
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"workers: 3\nengine:\n  threshold_db: 12.5\n  window_function: hann\n")
            .unwrap();
        let path = temp.into_temp_path();
        let cfg = ScanConfig::load(&path).unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.engine.threshold_db, 12.5);
        assert_eq!(cfg.engine.min_duration_s, 0.1);
    }

    #[test]
    fn relative_table_paths_resolve_next_to_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("bands.yaml"),
            "bands:\n  - name: hydrogen\n    lower_hz: 1400.0e6\n    upper_hz: 1427.0e6\n    priority: 10\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("services.yaml"),
            "services:\n  - name: WiFi_ISM\n    lower_hz: 2400.0e6\n    upper_hz: 2500.0e6\n",
        )
        .unwrap();
        let config_path = dir.path().join("scan.yaml");
        fs::write(&config_path, "bands: bands.yaml\nservices: services.yaml\n").unwrap();

        let cfg = ScanConfig::load(&config_path).unwrap();
        let engine = cfg.to_engine_config().unwrap();
        assert_eq!(engine.band_table.bands.len(), 1);
        assert_eq!(engine.band_table.bands[0].priority, 10);
        assert_eq!(engine.service_table.services[0].name, "WiFi_ISM");
    }

    #[test]
    fn shipped_configs_parse() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        let table = load_band_table(dir.join("protected_bands.yaml")).unwrap();
        let hydrogen = table
            .bands
            .iter()
            .find(|band| band.name == "hydrogen line")
            .unwrap();
        assert_eq!(hydrogen.priority, 10);
        assert!(hydrogen.overlaps(1_420.405e6, 1_420.406e6));

        let services = load_service_table(dir.join("services.yaml")).unwrap();
        let fm = services
            .services
            .iter()
            .find(|service| service.name == "FM_broadcast")
            .unwrap();
        assert!(fm.contains(98.1e6));
        assert_eq!(fm.min_bandwidth_hz, 150.0e3);

        let cfg = ScanConfig::load(dir.join("scan.yaml")).unwrap();
        assert_eq!(cfg.workers, 4);
        let engine = cfg.to_engine_config().unwrap();
        assert_eq!(engine.band_table, table);
        assert_eq!(engine.service_table, services);
    }

    #[test]
    fn inverted_band_is_rejected() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"bands:\n  - name: bad\n    lower_hz: 20.0\n    upper_hz: 10.0\n")
            .unwrap();
        assert!(load_band_table(temp.path()).is_err());
    }

    #[test]
    fn format_hint_follows_extension_and_declared_rate() {
        let cfg = ScanConfig::default();
        assert_eq!(cfg.format_hint(Path::new("a.wav")).unwrap(), FormatHint::Wav);
        assert_eq!(cfg.format_hint(Path::new("a.unknown")).unwrap(), FormatHint::Auto);
        assert!(cfg.format_hint(Path::new("capture.cu8")).is_err());

        let cfg = ScanConfig::from_args(ScanOverrides {
            sample_rate_hz: Some(2_048_000),
            ..Default::default()
        });
        assert_eq!(
            cfg.format_hint(Path::new("capture.cu8")).unwrap(),
            FormatHint::RawIq {
                format: IqFormat::Cu8,
                sample_rate_hz: 2_048_000
            }
        );
        assert_eq!(
            cfg.format_hint(Path::new("capture.iq")).unwrap(),
            FormatHint::RawIq {
                format: IqFormat::Cf32,
                sample_rate_hz: 2_048_000
            }
        );
    }

    #[test]
    fn explicit_iq_format_needs_sample_rate() {
        let cfg = ScanConfig::from_args(ScanOverrides {
            format: Some("cs16".into()),
            ..Default::default()
        });
        assert!(cfg.format_hint(Path::new("x.bin")).is_err());
    }
}
