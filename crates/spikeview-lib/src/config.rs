//! Viewer configuration.
//!
//! [`ViewerConfig`] carries every tunable of the library. All fields have
//! defaults, so a TOML file only needs to name what it changes:
//!
//! ```toml
//! datasets_dir = "/data/neuropixels"
//! edge_buffer = 150
//! orientation = "time-major"
//! ```
use crate::error::{Result, SpikeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// How the backend decides which stored axis is the channel axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OrientationPolicy {
    /// Infer from the stored shape; refuses shapes whose axes are too similar.
    #[default]
    Auto,
    /// Stored as (channels, timepoints).
    ChannelMajor,
    /// Stored as (timepoints, channels).
    TimeMajor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Folder scanned for recordings.
    pub datasets_dir: PathBuf,
    /// Folder holding spike label files referenced by the mapping.
    pub labels_dir: PathBuf,
    /// JSON file persisting dataset name → label file name.
    pub mapping_path: PathBuf,
    /// Sampling rate in Hz used for filter design.
    pub sampling_rate_hz: f64,
    /// Extra samples read on each side of a window to absorb filter transients.
    pub edge_buffer: usize,
    /// Longest window served; longer requests are cut at `start + max_window_samples`.
    pub max_window_samples: usize,
    /// Channel count of flat interleaved `.bin`/`.dat`/`.raw` recordings.
    pub interleaved_channels: usize,
    pub orientation: OrientationPolicy,
    /// Upper bound on a plausible channel count, used by axis detection.
    pub max_channels: usize,
    /// Fall back to a full load when the memory-mapped pair is missing.
    pub full_load_fallback: bool,
    /// Half width of the peak search window around a threshold crossing run.
    pub peak_half_window: usize,
    /// Samples flagged on each side of a precomputed spike.
    pub spike_mark_radius: usize,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        let datasets_dir = PathBuf::from("datasets");
        Self {
            labels_dir: datasets_dir.join("labels"),
            mapping_path: datasets_dir.join("dataset_labels_mapping.json"),
            datasets_dir,
            sampling_rate_hz: 30_000.0,
            edge_buffer: 100,
            max_window_samples: 20_000,
            interleaved_channels: 385,
            orientation: OrientationPolicy::Auto,
            max_channels: 4096,
            full_load_fallback: true,
            peak_half_window: 5,
            spike_mark_radius: 5,
        }
    }
}

impl ViewerConfig {
    /// Read a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|err| SpikeError::InvalidConfig {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        Self::from_toml_str(&contents).map_err(|reason| SpikeError::InvalidConfig {
            path: path.to_path_buf(),
            reason,
        })
    }

    /// Parse a TOML document, filling unspecified fields with defaults.
    pub fn from_toml_str(contents: &str) -> std::result::Result<Self, String> {
        let cfg: ViewerConfig = toml::from_str(contents).map_err(|err| err.to_string())?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Config rooted at `datasets_dir`, with labels and mapping inside it.
    pub fn with_datasets_dir(datasets_dir: impl Into<PathBuf>) -> Self {
        let datasets_dir = datasets_dir.into();
        Self {
            labels_dir: datasets_dir.join("labels"),
            mapping_path: datasets_dir.join("dataset_labels_mapping.json"),
            datasets_dir,
            ..Self::default()
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !(self.sampling_rate_hz.is_finite() && self.sampling_rate_hz > 0.0) {
            return Err(format!(
                "sampling_rate_hz must be positive, got {}",
                self.sampling_rate_hz
            ));
        }
        if self.interleaved_channels == 0 {
            return Err("interleaved_channels must be at least 1".into());
        }
        if self.max_window_samples == 0 {
            return Err("max_window_samples must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = ViewerConfig::from_toml_str(
            r#"
            edge_buffer = 150
            orientation = "time-major"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.edge_buffer, 150);
        assert_eq!(cfg.orientation, OrientationPolicy::TimeMajor);
        assert_eq!(cfg.sampling_rate_hz, 30_000.0);
        assert_eq!(cfg.interleaved_channels, 385);
    }

    #[test]
    fn rejects_non_positive_sampling_rate() {
        let err = ViewerConfig::from_toml_str("sampling_rate_hz = 0.0").unwrap_err();
        assert!(err.contains("sampling_rate_hz"));
    }

    #[test]
    fn load_reports_invalid_config_kind() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "edge_buffer = \"wide\"").unwrap();
        let err = ViewerConfig::load(file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
    }

    #[test]
    fn datasets_dir_roots_labels_and_mapping() {
        let cfg = ViewerConfig::with_datasets_dir("/tmp/rec");
        assert_eq!(cfg.labels_dir, PathBuf::from("/tmp/rec/labels"));
        assert_eq!(
            cfg.mapping_path,
            PathBuf::from("/tmp/rec/dataset_labels_mapping.json")
        );
    }
}
