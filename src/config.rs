use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub detection: DetectionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Root of the photo collection walked by the filesystem media index.
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Only photos whose location contains this substring are offered,
    /// e.g. "DCIM/Camera" to skip downloads and screenshots.
    #[serde(default)]
    pub path_filter: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: NonZeroUsize,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FaceModel {
    #[default]
    UltraFace320,
    UltraFace640,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDelegate {
    #[default]
    Cpu,
    Accelerator,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default)]
    pub model: FaceModel,

    /// Directory holding downloaded model files. Defaults to the local data dir.
    #[serde(default)]
    pub model_dir: Option<PathBuf>,

    /// Minimum face confidence (0-1) for a box to be reported.
    #[serde(default = "default_threshold")]
    pub threshold: f32,

    #[serde(default)]
    pub delegate: ComputeDelegate,

    /// Maximum number of detection calls running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: NonZeroUsize,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pixsee")
        .join("pixsee.db")
}

fn default_media_root() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(10).unwrap_or(NonZeroUsize::MIN)
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "webp".to_string(),
        "bmp".to_string(),
        "gif".to_string(),
    ]
}

fn default_threshold() -> f32 {
    0.5
}

fn default_max_concurrency() -> NonZeroUsize {
    NonZeroUsize::MIN
}

fn default_intra_threads() -> usize {
    4
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            path_filter: None,
            batch_size: default_batch_size(),
            image_extensions: default_image_extensions(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            model: FaceModel::default(),
            model_dir: None,
            threshold: default_threshold(),
            delegate: ComputeDelegate::default(),
            max_concurrency: default_max_concurrency(),
            intra_threads: default_intra_threads(),
        }
    }
}

impl DetectionConfig {
    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("pixsee")
                .join("models")
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scanner: ScannerConfig::default(),
            detection: DetectionConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.detection.threshold;
        if !(0.0..=1.0).contains(&threshold) {
            bail!("detection.threshold must be within [0, 1], got {threshold}");
        }
        if self.detection.intra_threads == 0 {
            bail!("detection.intra_threads must be at least 1");
        }
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("pixsee")
    }

    pub fn config_path() -> PathBuf {
        // Check environment variable
        if let Ok(path) = std::env::var("PIXSEE_CONFIG") {
            return PathBuf::from(path);
        }

        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/pixsee.db"

            [scanner]
            path_filter = "DCIM/Camera"
            batch_size = 4

            [detection]
            threshold = 0.7
            delegate = "accelerator"
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/pixsee.db"));
        assert_eq!(config.scanner.path_filter.as_deref(), Some("DCIM/Camera"));
        assert_eq!(config.scanner.batch_size.get(), 4);
        assert!(config.scanner.image_extensions.contains(&"jpg".to_string()));
        assert_eq!(config.detection.model, FaceModel::UltraFace320);
        assert_eq!(config.detection.delegate, ComputeDelegate::Accelerator);
        assert_eq!(config.detection.max_concurrency.get(), 1);
        assert!((config.detection.threshold - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let parsed: Result<Config, _> = toml::from_str("[scanner]\nbatch_size = 0\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.detection.model = FaceModel::UltraFace640;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.detection.model, FaceModel::UltraFace640);
        assert_eq!(loaded.scanner.batch_size, config.scanner.batch_size);
    }

    #[test]
    fn test_threshold_out_of_range_fails_validation() {
        let mut config = Config::default();
        config.detection.threshold = 1.5;
        assert!(config.validate().is_err());
    }
}
