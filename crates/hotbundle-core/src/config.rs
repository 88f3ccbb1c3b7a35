use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BUNDLE_FILE_NAME: &str = "index.bundlejs";

const MIN_CHECK_WINDOW_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    pub main: String,
    #[serde(default)]
    pub backups: Vec<String>,
    #[serde(default)]
    pub query_urls: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    pub app_key: String,
    pub root_dir: PathBuf,
    #[serde(default = "default_bundle_file_name")]
    pub bundle_file_name: String,
    pub server: ServerConfig,
    #[serde(default = "default_check_window_ms")]
    pub check_window_ms: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_transport_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_transport_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default)]
    pub throw_errors: bool,
    #[serde(default)]
    pub soft_fail_downloads: bool,
    pub package_version_override: Option<String>,
}

impl EngineConfig {
    pub fn new(
        app_key: impl Into<String>,
        root_dir: impl Into<PathBuf>,
        main: impl Into<String>,
    ) -> Self {
        Self {
            app_key: app_key.into(),
            root_dir: root_dir.into(),
            bundle_file_name: default_bundle_file_name(),
            server: ServerConfig {
                main: main.into(),
                backups: Vec::new(),
                query_urls: Vec::new(),
            },
            check_window_ms: default_check_window_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_secs: default_transport_timeout_secs(),
            read_timeout_secs: default_transport_timeout_secs(),
            retention_days: default_retention_days(),
            throw_errors: false,
            soft_fail_downloads: false,
            package_version_override: None,
        }
    }

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse hotbundle config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.app_key.trim().is_empty() {
            return Err(anyhow!("app_key must not be empty"));
        }
        if self.server.main.trim().is_empty() {
            return Err(anyhow!("server.main must not be empty"));
        }
        if self.bundle_file_name.trim().is_empty()
            || self.bundle_file_name.contains('/')
            || self.bundle_file_name.contains('\\')
        {
            return Err(anyhow!(
                "bundle_file_name must be a plain file name: '{}'",
                self.bundle_file_name
            ));
        }
        if self.retention_days == 0 {
            return Err(anyhow!("retention_days must be at least 1"));
        }
        Ok(())
    }

    pub fn check_window(&self) -> Duration {
        Duration::from_millis(self.check_window_ms.max(MIN_CHECK_WINDOW_MS))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }

    pub fn check_url(&self, endpoint: &str) -> String {
        format!(
            "{}/checkUpdate/{}",
            endpoint.trim_end_matches('/'),
            self.app_key
        )
    }
}

fn default_bundle_file_name() -> String {
    DEFAULT_BUNDLE_FILE_NAME.to_string()
}

fn default_check_window_ms() -> u64 {
    5_000
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_transport_timeout_secs() -> u64 {
    60
}

fn default_retention_days() -> u64 {
    7
}
