use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use hotbundle_core::{UpdateError, UpdateResult};
use tracing::{debug, warn};

use crate::fs_utils::remove_path;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub retained: Vec<String>,
    pub failed: Vec<String>,
}

/// Removes every entry under `root` older than `retention` except dot-entries
/// and the names in `keep`. Per-entry failures are logged and recorded.
pub fn sweep_versions(
    root: &Path,
    keep: &[&str],
    retention: Duration,
    now: SystemTime,
) -> UpdateResult<CleanupReport> {
    let mut report = CleanupReport::default();
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(report),
        Err(err) => return Err(UpdateError::storage_at("read", root, err)),
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), error = %err, "failed to read cleanup entry");
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if keep.iter().any(|kept| *kept == name) {
            report.retained.push(name);
            continue;
        }

        let path = entry.path();
        let modified = match entry.metadata().and_then(|metadata| metadata.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to stat cleanup entry");
                report.failed.push(name);
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age < retention {
            report.retained.push(name);
            continue;
        }

        match remove_path(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed expired entry");
                report.removed.push(name);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to remove expired entry");
                report.failed.push(name);
            }
        }
    }

    report.removed.sort();
    report.retained.sort();
    report.failed.sort();
    Ok(report)
}
