use crate::core::matcher::{MatchMode, DEFAULT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("Could not find home directory")]
    NoHomeDir,
}

/// Settings for a folder scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Images hashed concurrently. Defaults to the number of CPUs.
    pub workers: usize,
    /// Per-image limit; slower images are skipped.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Lowercase extensions considered images.
    pub supported_formats: Vec<String>,
    /// Glob patterns matched against full paths.
    pub exclude_patterns: Vec<String>,
    pub follow_links: bool,
    /// Also compute SHA-256 content hashes (needed for exact matching).
    pub content_hash: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get().max(1),
            timeout: Duration::from_secs(30),
            supported_formats: ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tiff", "tif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            exclude_patterns: Vec::new(),
            follow_links: false,
            content_hash: false,
        }
    }
}

/// Settings for the local web UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub port: u16,
    /// Shut down after this long without activity; zero never does.
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    pub open_browser: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            idle_timeout: Duration::from_secs(5 * 60),
            open_browser: true,
        }
    }
}

/// Top-level application settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// Hamming threshold; out-of-range values are clamped by the matcher.
    pub threshold: i64,
    pub mode: MatchMode,
    pub scan: ScanConfig,
    pub serve: ServeConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_data_dir()
                .map(|dir| dir.join("images.db"))
                .unwrap_or_else(|_| PathBuf::from("images.db")),
            threshold: i64::from(DEFAULT_THRESHOLD),
            mode: MatchMode::default(),
            scan: ScanConfig::default(),
            serve: ServeConfig::default(),
        }
    }
}

impl AppConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load `path` if given, else the default config file if it exists, else
    /// defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_data_dir() {
            Ok(dir) if dir.join("config.json").is_file() => Self::load(&dir.join("config.json")),
            _ => Ok(Self::default()),
        }
    }

    /// File that records cull operations, next to the database.
    pub fn history_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(|dir| dir.join("cull-history.jsonl"))
            .unwrap_or_else(|| PathBuf::from("cull-history.jsonl"))
    }
}

/// `~/.imgdedup`
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".imgdedup"))
        .ok_or(ConfigError::NoHomeDir)
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
