use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use hotbundle_core::{
    validate_relative_path, OriginPackage, PackageIdentity, UpdateError, UpdateResult,
};

/// Host package resources laid out on disk, e.g. an unpacked app bundle.
#[derive(Debug, Clone)]
pub struct DirectoryOriginPackage {
    root: PathBuf,
    bundle_file_name: String,
    identity: PackageIdentity,
}

impl DirectoryOriginPackage {
    pub fn new(
        root: impl Into<PathBuf>,
        bundle_file_name: impl Into<String>,
        identity: PackageIdentity,
    ) -> Self {
        Self {
            root: root.into(),
            bundle_file_name: bundle_file_name.into(),
            identity,
        }
    }
}

fn read_optional(path: &Path) -> UpdateResult<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(UpdateError::storage_at("read", path, err)),
    }
}

impl OriginPackage for DirectoryOriginPackage {
    fn identity(&self) -> PackageIdentity {
        self.identity.clone()
    }

    fn read_resource(&self, path: &str) -> UpdateResult<Option<Vec<u8>>> {
        validate_relative_path(path)?;
        read_optional(&self.root.join(path))
    }

    fn bundle(&self) -> UpdateResult<Option<Vec<u8>>> {
        read_optional(&self.root.join(&self.bundle_file_name))
    }
}
