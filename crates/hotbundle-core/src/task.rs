use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Full,
    DeltaFromPrevious,
    DeltaFromOrigin,
    Plain,
    Cleanup,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::DeltaFromPrevious => "diff",
            Self::DeltaFromOrigin => "pdiff",
            Self::Plain => "plain",
            Self::Cleanup => "cleanup",
        }
    }

    pub fn produces_version_dir(self) -> bool {
        matches!(
            self,
            Self::Full | Self::DeltaFromPrevious | Self::DeltaFromOrigin
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionTask {
    pub kind: TaskKind,
    pub url: Option<String>,
    pub hash: String,
    pub origin_hash: Option<String>,
    pub target_path: PathBuf,
    pub apply_dir: Option<PathBuf>,
}

impl AcquisitionTask {
    /// Key under which download progress is published.
    pub fn progress_key(&self) -> &str {
        &self.hash
    }
}
