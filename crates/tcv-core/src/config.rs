//! # Viewer configuration
//!
//! Loaded from TOML. Every field has a default so a partial file (or no
//! file at all) is valid; only the list of record stores is required to do
//! anything useful.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Result, TcvError};
use crate::model::{ProtocolVersion, SourceId};
use crate::query::DEFAULT_LIMIT;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ViewerConfig {
    #[serde(default)]
    pub viewer: ViewerSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default, rename = "lrs")]
    pub sources: Vec<LrsConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewerSettings {
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// A continuation round refetches a source only while it holds at most
    /// this many buffered statements.
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_include_raw")]
    pub include_raw_data: bool,
}

impl Default for ViewerSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_LIMIT,
            low_water_mark: 10,
            request_timeout_secs: 30,
            include_raw_data: true,
        }
    }
}

impl ViewerSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
    #[serde(default)]
    pub ui_dir: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_capacity: 64,
            ui_dir: None,
        }
    }
}

/// One learning record store endpoint.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LrsConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub endpoint: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    pub version: ProtocolVersion,
}

impl LrsConfig {
    /// Endpoint with exactly one trailing slash.
    pub fn endpoint_url(&self) -> String {
        format!("{}/", self.endpoint.trim().trim_end_matches('/'))
    }

    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("{} ({})", self.endpoint_url(), self.version))
    }

    pub fn source_id(&self) -> SourceId {
        let credential = self.username.as_ref().map(|user| {
            format!("{}:{}", user, self.password.as_deref().unwrap_or_default())
        });
        SourceId::new(&self.endpoint_url(), credential.as_deref(), self.version)
    }
}

fn default_page_size() -> u32 {
    DEFAULT_LIMIT
}
fn default_low_water_mark() -> usize {
    10
}
fn default_request_timeout() -> u64 {
    30
}
fn default_include_raw() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}
fn default_session_capacity() -> usize {
    64
}

impl ViewerConfig {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| TcvError::io(path, e))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| TcvError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.viewer.page_size == 0 {
            return Err(TcvError::config("viewer.page_size must be greater than 0"));
        }
        for (i, lrs) in self.sources.iter().enumerate() {
            if lrs.endpoint.trim().is_empty() {
                return Err(TcvError::config(format!("lrs[{}].endpoint is empty", i)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[viewer]
page_size = 50
low_water_mark = 5

[server]
bind = "0.0.0.0:8080"

[[lrs]]
name = "primary"
endpoint = "https://lrs.example.com/xAPI"
username = "key"
password = "secret"
version = "1.0.0"

[[lrs]]
endpoint = "https://legacy.example.com/TCAPI/"
version = "0.9"
"#;

    #[test]
    fn test_parse_sample() {
        let config = ViewerConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.viewer.page_size, 50);
        assert_eq!(config.viewer.low_water_mark, 5);
        assert_eq!(config.viewer.request_timeout_secs, 30);
        assert!(config.viewer.include_raw_data);
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.server.session_capacity, 64);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].version, ProtocolVersion::V1_0_0);
        assert_eq!(config.sources[0].endpoint_url(), "https://lrs.example.com/xAPI/");
        assert_eq!(config.sources[1].endpoint_url(), "https://legacy.example.com/TCAPI/");
        assert_eq!(config.sources[0].display_name(), "primary");
    }

    #[test]
    fn test_empty_document_is_defaults() {
        let config = ViewerConfig::from_toml_str("").unwrap();
        assert_eq!(config.viewer.page_size, 25);
        assert_eq!(config.viewer.low_water_mark, 10);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let err = ViewerConfig::from_toml_str(
            "[[lrs]]\nendpoint = \"https://x/\"\nversion = \"3.0\"\n",
        )
        .unwrap_err();
        assert!(matches!(err, TcvError::Config { .. }));
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        assert!(ViewerConfig::from_toml_str("[viewer]\npage_size = 0\n").is_err());
    }

    #[test]
    fn test_same_endpoint_different_versions_are_distinct_sources() {
        let config = ViewerConfig::from_toml_str(
            r#"
[[lrs]]
endpoint = "https://lrs/"
version = "0.95"
[[lrs]]
endpoint = "https://lrs"
version = "1.0.0"
"#,
        )
        .unwrap();
        assert_ne!(config.sources[0].source_id(), config.sources[1].source_id());
    }

    #[test]
    fn test_load_from_file_and_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = ViewerConfig::load(file.path()).unwrap();
        assert_eq!(config.sources.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let missing = ViewerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert!(missing.sources.is_empty());
    }
}
