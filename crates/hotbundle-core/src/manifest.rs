use std::collections::BTreeMap;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

use crate::error::{UpdateError, UpdateResult};

pub const DIFF_MANIFEST_NAME: &str = "__diff.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiffManifest {
    /// Destination path mapped to its source path in the base version. An empty
    /// source means the file keeps its name.
    #[serde(default)]
    pub copies: BTreeMap<String, String>,
    #[serde(default)]
    pub deletes: BTreeMap<String, serde_json::Value>,
}

impl DiffManifest {
    pub fn from_json_str(input: &str) -> UpdateResult<Self> {
        let manifest: Self = serde_json::from_str(input)
            .map_err(|err| UpdateError::Manifest(format!("failed to parse diff manifest: {err}")))?;

        for (dest, src) in &manifest.copies {
            validate_relative_path(dest)?;
            if !src.is_empty() {
                validate_relative_path(src)?;
            }
        }
        for path in manifest.deletes.keys() {
            validate_relative_path(path)?;
        }

        Ok(manifest)
    }

    /// Copy pairs as `(dest, src)` with empty sources resolved to the destination name.
    pub fn copy_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.copies.iter().map(|(dest, src)| {
            let src = if src.is_empty() {
                dest.as_str()
            } else {
                src.as_str()
            };
            (dest.as_str(), src)
        })
    }

    pub fn delete_paths(&self) -> impl Iterator<Item = &str> {
        self.deletes.keys().map(String::as_str)
    }
}

pub fn validate_relative_path(value: &str) -> UpdateResult<()> {
    if value.trim().is_empty() {
        return Err(UpdateError::Manifest(
            "diff manifest path must not be empty".to_string(),
        ));
    }

    let path = Path::new(value);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(UpdateError::Manifest(format!(
                    "diff manifest path escapes version directory: {value}"
                )));
            }
        }
    }

    Ok(())
}
