use std::fs;
use std::path::{Path, PathBuf};

use hotbundle_core::{AcquisitionTask, TaskKind, UpdateError, UpdateResult};

const SCRATCH_DIR_NAME: &str = ".tmp";
const PACKAGES_DIR_NAME: &str = ".packages";
const PREFERENCES_FILE_NAME: &str = ".preferences.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateLayout {
    root: PathBuf,
    bundle_file_name: String,
}

impl UpdateLayout {
    pub fn new(root: impl Into<PathBuf>, bundle_file_name: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bundle_file_name: bundle_file_name.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bundle_file_name(&self) -> &str {
        &self.bundle_file_name
    }

    pub fn bundle_patch_name(&self) -> String {
        format!("{}.patch", self.bundle_file_name)
    }

    pub fn version_dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash)
    }

    pub fn bundle_path(&self, hash: &str) -> PathBuf {
        self.version_dir(hash).join(&self.bundle_file_name)
    }

    pub fn full_archive_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.full.zip"))
    }

    pub fn delta_archive_path(&self, origin_hash: &str, hash: &str) -> PathBuf {
        self.root.join(format!("{origin_hash}_{hash}.delta.zip"))
    }

    pub fn origin_archive_path(&self, hash: &str) -> PathBuf {
        self.root.join(format!("{hash}.origin.zip"))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR_NAME)
    }

    pub fn task_scratch_dir(&self, hash: &str, kind: TaskKind) -> PathBuf {
        self.scratch_dir().join(format!("{hash}-{}", kind.as_str()))
    }

    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(PACKAGES_DIR_NAME)
    }

    pub fn package_path(&self, file_name: &str) -> PathBuf {
        self.packages_dir().join(file_name)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.root.join(PREFERENCES_FILE_NAME)
    }

    pub fn ensure_base_dirs(&self) -> UpdateResult<()> {
        for dir in [self.root.clone(), self.scratch_dir(), self.packages_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|err| UpdateError::storage_at("create", &dir, err))?;
        }
        Ok(())
    }

    pub fn full_task(&self, hash: &str, url: &str) -> UpdateResult<AcquisitionTask> {
        validate_hash(hash)?;
        Ok(AcquisitionTask {
            kind: TaskKind::Full,
            url: Some(url.to_string()),
            hash: hash.to_string(),
            origin_hash: None,
            target_path: self.full_archive_path(hash),
            apply_dir: Some(self.version_dir(hash)),
        })
    }

    pub fn delta_task(
        &self,
        origin_hash: &str,
        hash: &str,
        url: &str,
    ) -> UpdateResult<AcquisitionTask> {
        validate_hash(origin_hash)?;
        validate_hash(hash)?;
        Ok(AcquisitionTask {
            kind: TaskKind::DeltaFromPrevious,
            url: Some(url.to_string()),
            hash: hash.to_string(),
            origin_hash: Some(origin_hash.to_string()),
            target_path: self.delta_archive_path(origin_hash, hash),
            apply_dir: Some(self.version_dir(hash)),
        })
    }

    pub fn origin_task(&self, hash: &str, url: &str) -> UpdateResult<AcquisitionTask> {
        validate_hash(hash)?;
        Ok(AcquisitionTask {
            kind: TaskKind::DeltaFromOrigin,
            url: Some(url.to_string()),
            hash: hash.to_string(),
            origin_hash: None,
            target_path: self.origin_archive_path(hash),
            apply_dir: Some(self.version_dir(hash)),
        })
    }

    pub fn plain_task(
        &self,
        key: &str,
        url: &str,
        file_name: &str,
    ) -> UpdateResult<AcquisitionTask> {
        validate_segment("package file name", file_name)?;
        Ok(AcquisitionTask {
            kind: TaskKind::Plain,
            url: Some(url.to_string()),
            hash: key.to_string(),
            origin_hash: None,
            target_path: self.package_path(file_name),
            apply_dir: None,
        })
    }

    /// Sweep task keeping `current` and `last`.
    pub fn cleanup_task(&self, current: Option<&str>, last: Option<&str>) -> AcquisitionTask {
        AcquisitionTask {
            kind: TaskKind::Cleanup,
            url: None,
            hash: current.unwrap_or_default().to_string(),
            origin_hash: last.map(str::to_string),
            target_path: self.root.clone(),
            apply_dir: None,
        }
    }
}

/// Hashes name directories directly under the root, so they must be a single
/// visible path segment.
pub fn validate_hash(hash: &str) -> UpdateResult<()> {
    validate_segment("version hash", hash)
}

fn validate_segment(label: &str, value: &str) -> UpdateResult<()> {
    let valid = !value.is_empty() && !value.starts_with('.') && !value.contains(['/', '\\']);
    if !valid {
        return Err(UpdateError::State(format!("invalid {label}: '{value}'")));
    }
    Ok(())
}
