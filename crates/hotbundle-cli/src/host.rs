use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use hotbundle_core::{
    EngineConfig, HostCapabilities, HostReloader, PackageIdentity, PatchCodec, UpdateError,
    UpdateResult,
};
use hotbundle_installer::{
    DirectoryOriginPackage, FilePreferenceStore, UpdateLayout, ZipDecompressor,
};
use hotbundle_registry::{ReqwestTransport, UpdateEngine};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "hotbundle.toml";

const DEFAULT_ORIGIN_DIR_NAME: &str = ".origin";

/// `[host]` table: where the packaged app lives and what it identifies as.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub(crate) struct HostConfig {
    pub(crate) origin_dir: Option<PathBuf>,
    #[serde(default)]
    pub(crate) package_version: String,
    #[serde(default)]
    pub(crate) build_time: String,
}

#[derive(Debug, Default, Deserialize)]
struct HostSection {
    #[serde(default)]
    host: HostConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CliSettings {
    pub(crate) engine: EngineConfig,
    pub(crate) host: HostConfig,
}

impl CliSettings {
    pub(crate) fn origin_dir(&self) -> PathBuf {
        self.host
            .origin_dir
            .clone()
            .unwrap_or_else(|| self.engine.root_dir.join(DEFAULT_ORIGIN_DIR_NAME))
    }

    fn identity(&self) -> PackageIdentity {
        PackageIdentity {
            package_version: self.host.package_version.clone(),
            build_time: self.host.build_time.clone(),
        }
    }
}

pub(crate) fn parse_settings(raw: &str, root_override: Option<&Path>) -> Result<CliSettings> {
    let mut engine = EngineConfig::from_toml_str(raw)?;
    if let Some(root) = root_override {
        engine.root_dir = root.to_path_buf();
    }
    let section: HostSection =
        toml::from_str(raw).context("failed to parse [host] section of hotbundle config")?;
    if section.host.package_version.trim().is_empty() {
        return Err(anyhow!("host.package_version must not be empty"));
    }

    Ok(CliSettings {
        engine,
        host: section.host,
    })
}

pub(crate) fn load_settings(path: &Path, root_override: Option<&Path>) -> Result<CliSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_settings(&raw, root_override)
        .with_context(|| format!("invalid config file: {}", path.display()))
}

/// Patch codec for builds without a binary diff implementation; every
/// delta fails so the engine falls through to a full download.
pub(crate) struct UnsupportedPatchCodec;

impl PatchCodec for UnsupportedPatchCodec {
    fn apply(&self, _base: &[u8], _patch: &[u8]) -> UpdateResult<Vec<u8>> {
        Err(UpdateError::PatchApply(
            "no binary patch codec is linked into this build".to_string(),
        ))
    }
}

/// Records the bundle the host process should load next. The CLI cannot
/// reload anything itself, so the caller prints the recorded path.
#[derive(Debug, Default)]
pub(crate) struct ProcessReloader {
    requested: Mutex<Option<PathBuf>>,
}

impl ProcessReloader {
    pub(crate) fn requested(&self) -> Option<PathBuf> {
        self.requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl HostReloader for ProcessReloader {
    fn reload(&self, bundle_path: Option<&Path>) -> UpdateResult<()> {
        info!(bundle = ?bundle_path, "host reload requested");
        *self
            .requested
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = bundle_path.map(Path::to_path_buf);
        Ok(())
    }
}

pub(crate) fn build_engine(settings: &CliSettings) -> Result<(UpdateEngine, Arc<ProcessReloader>)> {
    let engine_config = &settings.engine;
    let layout = UpdateLayout::new(
        engine_config.root_dir.clone(),
        engine_config.bundle_file_name.clone(),
    );
    layout.ensure_base_dirs()?;

    let reloader = Arc::new(ProcessReloader::default());
    let capabilities = HostCapabilities {
        transport: Arc::new(ReqwestTransport::from_config(engine_config)?),
        preferences: Arc::new(FilePreferenceStore::open(layout.preferences_path())?),
        decompressor: Arc::new(ZipDecompressor),
        patch_codec: Arc::new(UnsupportedPatchCodec),
        origin: Arc::new(DirectoryOriginPackage::new(
            settings.origin_dir(),
            engine_config.bundle_file_name.clone(),
            settings.identity(),
        )),
        reloader: reloader.clone(),
    };
    let engine = UpdateEngine::new(engine_config.clone(), capabilities).with_context(|| {
        format!(
            "failed to open update root: {}",
            engine_config.root_dir.display()
        )
    })?;
    Ok((engine, reloader))
}

/// Parses repeated `KEY=VALUE` flags into extra check-request fields.
pub(crate) fn parse_extras(values: &[String]) -> Result<Map<String, Value>> {
    let mut extras = Map::new();
    for value in values {
        let (key, raw) = value
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --extra '{value}': expected KEY=VALUE"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("invalid --extra '{value}': key must not be empty"));
        }
        extras.insert(key.to_string(), Value::String(raw.to_string()));
    }
    Ok(extras)
}

/// File name for a downloaded package: `--file-name` or the last URL segment.
pub(crate) fn package_file_name(url: &str, explicit: Option<&str>) -> String {
    if let Some(name) = explicit.map(str::trim).filter(|name| !name.is_empty()) {
        return name.to_string();
    }
    url.split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').next())
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && !segment.contains(':'))
        .unwrap_or("package.bin")
        .to_string()
}
