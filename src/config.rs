use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    jpeg,
    png,
    webp,
    gif,
}

impl ImageFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::jpeg => "image/jpeg",
            ImageFormat::png => "image/png",
            ImageFormat::webp => "image/webp",
            ImageFormat::gif => "image/gif",
        }
    }

    /// Detects the format from the leading magic bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        image::guess_format(bytes).ok().and_then(Self::from_image_format)
    }

    pub(crate) fn from_image_format(fmt: image::ImageFormat) -> Option<Self> {
        match fmt {
            image::ImageFormat::Jpeg => Some(ImageFormat::jpeg),
            image::ImageFormat::Png => Some(ImageFormat::png),
            image::ImageFormat::WebP => Some(ImageFormat::webp),
            image::ImageFormat::Gif => Some(ImageFormat::gif),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageFormat::jpeg => write!(f, "jpeg"),
            ImageFormat::png => write!(f, "png"),
            ImageFormat::webp => write!(f, "webp"),
            ImageFormat::gif => write!(f, "gif"),
        }
    }
}

/// How a cache miss interacts with the cache lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MissStrategy {
    /// Hold the lock across fetch, transform and store.
    #[default]
    Serialized,
    /// Release the lock while fetching; identical misses share one fetch.
    Coalesced,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub level: String,
    /// `stdout` or a file path to append to.
    pub output: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            output: "stdout".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PreviewerConfig {
    pub host: String,
    /// Number of cached variants, not bytes.
    pub cache_capacity: usize,
    /// Disk-backed cache when set, in-memory otherwise.
    pub storage_dir: Option<PathBuf>,
    pub max_input_size: usize, // bytes
    /// Zero disables the upstream timeout.
    pub fetch_timeout_secs: u64,
    pub miss_strategy: MissStrategy,
    pub logger: LoggerConfig,
}

impl Default for PreviewerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0:8080".into(),
            cache_capacity: 100,
            storage_dir: None,
            max_input_size: 8 * 1024 * 1024,
            fetch_timeout_secs: 10,
            miss_strategy: MissStrategy::Serialized,
            logger: LoggerConfig::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("Host cannot be empty")] EmptyHost,
    #[error("Cache capacity must be > 0")] InvalidCapacity,
    #[error("Max input size must be > 0")] InvalidMaxInput,
}

impl PreviewerConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_json(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Applies `PREVIEWER_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    fn apply_overrides(
        &mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = lookup("PREVIEWER_HOST") {
            self.host = host;
        }
        if let Some(raw) = lookup("PREVIEWER_CACHE_CAPACITY") {
            self.cache_capacity = raw.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "PREVIEWER_CACHE_CAPACITY",
                value: raw.clone(),
            })?;
        }
        if let Some(dir) = lookup("PREVIEWER_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() { return Err(ConfigError::EmptyHost); }
        if self.cache_capacity == 0 { return Err(ConfigError::InvalidCapacity); }
        if self.max_input_size == 0 { return Err(ConfigError::InvalidMaxInput); }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = PreviewerConfig::from_json(
            r#"{"cacheCapacity": 5, "storageDir": "/tmp/previews", "missStrategy": "coalesced"}"#,
        )
        .unwrap();
        assert_eq!(cfg.cache_capacity, 5);
        assert_eq!(cfg.storage_dir, Some(PathBuf::from("/tmp/previews")));
        assert_eq!(cfg.miss_strategy, MissStrategy::Coalesced);
        assert_eq!(cfg.host, "0.0.0.0:8080");
        assert_eq!(cfg.logger, LoggerConfig::default());
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let cfg = PreviewerConfig { cache_capacity: 0, ..Default::default() };
        assert!(matches!(cfg.validate(), Err(ConfigError::InvalidCapacity)));
        assert!(PreviewerConfig::default().validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = PreviewerConfig::default();
        cfg.apply_overrides(|var| match var {
            "PREVIEWER_CACHE_CAPACITY" => Some("7".into()),
            "PREVIEWER_STORAGE_DIR" => Some("./cache".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.cache_capacity, 7);
        assert_eq!(cfg.storage_dir, Some(PathBuf::from("./cache")));

        let err = cfg
            .apply_overrides(|var| (var == "PREVIEWER_CACHE_CAPACITY").then(|| "many".into()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = PreviewerConfig::load(Path::new("/nonexistent/previewer.json")).unwrap();
        assert_eq!(cfg.cache_capacity, 100);
    }
}
