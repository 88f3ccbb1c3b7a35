use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PausedScope {
    App,
    Package,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionConfig {
    #[serde(default)]
    pub rollout: BTreeMap<String, u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub name: Option<String>,
    pub hash: Option<String>,
    pub description: Option<String>,
    pub meta_info: Option<String>,
    pub config: Option<VersionConfig>,
    pub diff: Option<String>,
    pub pdiff: Option<String>,
    pub full: Option<String>,
}

impl VersionInfo {
    /// Fields present on `self` win over the ones inherited from `root`.
    pub fn overlay_on(&self, root: &VersionInfo) -> VersionInfo {
        VersionInfo {
            name: self.name.clone().or_else(|| root.name.clone()),
            hash: self.hash.clone().or_else(|| root.hash.clone()),
            description: self.description.clone().or_else(|| root.description.clone()),
            meta_info: self.meta_info.clone().or_else(|| root.meta_info.clone()),
            config: self.config.clone().or_else(|| root.config.clone()),
            diff: self.diff.clone().or_else(|| root.diff.clone()),
            pdiff: self.pdiff.clone().or_else(|| root.pdiff.clone()),
            full: self.full.clone().or_else(|| root.full.clone()),
        }
    }

    pub fn rollout_for(&self, package_version: &str) -> Option<u32> {
        self.config
            .as_ref()
            .and_then(|config| config.rollout.get(package_version).copied())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    #[serde(default)]
    pub up_to_date: bool,
    #[serde(default)]
    pub expired: bool,
    pub download_url: Option<String>,
    #[serde(default)]
    pub update: bool,
    pub paused: Option<PausedScope>,
    pub message: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(flatten)]
    pub root: VersionInfo,
    pub exp_version: Option<VersionInfo>,
    #[serde(default)]
    pub versions: Vec<VersionInfo>,
}

impl CheckResponse {
    pub fn from_json_value(value: serde_json::Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    /// Candidates in evaluation order, each merged over the root fields.
    pub fn candidates(&self) -> Vec<VersionInfo> {
        let mut candidates = Vec::with_capacity(self.versions.len() + 2);
        if let Some(exp_version) = &self.exp_version {
            candidates.push(exp_version.overlay_on(&self.root));
        }
        for version in &self.versions {
            candidates.push(version.overlay_on(&self.root));
        }
        candidates.push(self.root.clone());
        candidates
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDescriptor {
    pub hash: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meta_info: String,
    #[serde(default)]
    pub paths: Vec<String>,
    pub diff: Option<String>,
    pub pdiff: Option<String>,
    pub full: Option<String>,
    pub rollout: Option<u32>,
}

impl UpdateDescriptor {
    pub fn from_version_info(
        info: &VersionInfo,
        paths: &[String],
        package_version: &str,
    ) -> Option<Self> {
        let hash = info.hash.as_deref()?.trim();
        if hash.is_empty() {
            return None;
        }
        Some(Self {
            hash: hash.to_string(),
            name: info.name.clone().unwrap_or_default(),
            description: info.description.clone().unwrap_or_default(),
            meta_info: info.meta_info.clone().unwrap_or_default(),
            paths: paths.to_vec(),
            diff: non_empty(info.diff.as_deref()),
            pdiff: non_empty(info.pdiff.as_deref()),
            full: non_empty(info.full.as_deref()),
            rollout: info.rollout_for(package_version),
        })
    }

    pub fn local_info(&self) -> LocalVersionInfo {
        LocalVersionInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            meta_info: self.meta_info.clone(),
            bundle_sha256: None,
            debug_channel: false,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    UpToDate,
    Expired {
        download_url: Option<String>,
        message: Option<String>,
    },
    Paused {
        scope: PausedScope,
        message: Option<String>,
    },
    Update(UpdateDescriptor),
    Unavailable {
        message: String,
    },
}

impl CheckOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UpToDate => "up-to-date",
            Self::Expired { .. } => "expired",
            Self::Paused { .. } => "paused",
            Self::Update(_) => "update",
            Self::Unavailable { .. } => "unavailable",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LocalVersionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub meta_info: String,
    pub bundle_sha256: Option<String>,
    /// Set by the server for versions published to a debug channel; consumed
    /// on the first engine start.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub debug_channel: bool,
}
