use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Rollback,
    Checking,
    ErrorChecking,
    Downloading,
    DownloadSuccess,
    ErrorUpdate,
    MarkSuccess,
    DownloadingPackage,
    ErrorDownloadPackage,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rollback => "rollback",
            Self::Checking => "checking",
            Self::ErrorChecking => "errorChecking",
            Self::Downloading => "downloading",
            Self::DownloadSuccess => "downloadSuccess",
            Self::ErrorUpdate => "errorUpdate",
            Self::MarkSuccess => "markSuccess",
            Self::DownloadingPackage => "downloadingPackage",
            Self::ErrorDownloadPackage => "errorDownloadPackage",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineEvent {
    pub kind: EventKind,
    pub app_key: String,
    pub current_version: Option<String>,
    pub package_version: String,
    pub build_time: String,
    pub installation_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}
