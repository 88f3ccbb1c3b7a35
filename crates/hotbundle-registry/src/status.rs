use std::path::PathBuf;

use hotbundle_core::LocalVersionInfo;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub app_key: String,
    pub root: PathBuf,
    pub state: String,
    pub current_version: Option<String>,
    pub last_version: Option<String>,
    pub rolled_back_version: Option<String>,
    pub current_info: Option<LocalVersionInfo>,
    pub package_version: String,
    pub build_time: String,
    pub installation_id: String,
    /// Whether this process started on a version still in its first-boot window.
    pub first_time: bool,
    pub debug_channel: bool,
    pub first_time_debug: bool,
    pub downloaded_hash: Option<String>,
}

/// Launch-time facts captured once when the engine starts.
#[derive(Debug, Clone, Default)]
pub(crate) struct LaunchState {
    pub(crate) first_time: bool,
    pub(crate) debug_channel: bool,
}
