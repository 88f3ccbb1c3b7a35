use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use hotbundle_core::{
    AcquisitionTask, Decompressor, DiffManifest, HostCapabilities, HttpTransport, OriginPackage,
    PatchCodec, TaskKind, UpdateError, UpdateResult, DIFF_MANIFEST_NAME,
};
use hotbundle_security::sha256_file_hex;
use tracing::{debug, info, warn};

use crate::cleanup::{sweep_versions, CleanupReport};
use crate::download::download_to_file;
use crate::fs_utils::{
    copy_dir_recursive, copy_file_creating_parents, overlay_dir, remove_dir_if_exists,
    remove_file_if_exists, remove_path, reset_dir, write_file_creating_parents,
};
use crate::layout::UpdateLayout;
use crate::progress::ProgressHub;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskReport {
    Version {
        hash: String,
        bytes: u64,
        bundle_sha256: String,
    },
    Package {
        path: PathBuf,
        bytes: u64,
        sha256: String,
    },
    Cleanup(CleanupReport),
}

pub struct PatchAcquirer {
    layout: UpdateLayout,
    transport: Arc<dyn HttpTransport>,
    decompressor: Arc<dyn Decompressor>,
    patch_codec: Arc<dyn PatchCodec>,
    origin: Arc<dyn OriginPackage>,
    progress: ProgressHub,
    retention: Duration,
}

enum DeltaBase {
    Directory(PathBuf),
    Package(Arc<dyn OriginPackage>),
}

struct DeltaJob {
    archive: PathBuf,
    scratch: PathBuf,
    apply_dir: PathBuf,
    bundle_file_name: String,
    patch_name: String,
    decompressor: Arc<dyn Decompressor>,
    patch_codec: Arc<dyn PatchCodec>,
    base: DeltaBase,
}

impl PatchAcquirer {
    pub fn new(
        layout: UpdateLayout,
        capabilities: &HostCapabilities,
        progress: ProgressHub,
        retention: Duration,
    ) -> Self {
        Self {
            layout,
            transport: capabilities.transport.clone(),
            decompressor: capabilities.decompressor.clone(),
            patch_codec: capabilities.patch_codec.clone(),
            origin: capabilities.origin.clone(),
            progress,
            retention,
        }
    }

    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    pub fn progress(&self) -> &ProgressHub {
        &self.progress
    }

    /// Runs one task. Failed non-cleanup tasks leave no target file or apply
    /// directory behind.
    pub async fn execute(&self, task: &AcquisitionTask) -> UpdateResult<TaskReport> {
        let result = match task.kind {
            TaskKind::Cleanup => return self.cleanup(task).await,
            TaskKind::Plain => self.run_plain(task).await,
            TaskKind::Full => self.run_full(task).await,
            TaskKind::DeltaFromPrevious | TaskKind::DeltaFromOrigin => self.run_delta(task).await,
        };

        if let Err(err) = &result {
            warn!(
                hash = %task.hash,
                kind = task.kind.as_str(),
                error = %err,
                "acquisition failed, removing partial artifacts"
            );
            self.unwind(task).await;
        }
        result
    }

    async fn run_plain(&self, task: &AcquisitionTask) -> UpdateResult<TaskReport> {
        let url = task_url(task)?;
        let summary = download_to_file(
            self.transport.as_ref(),
            url,
            &task.target_path,
            task.progress_key(),
            &self.progress,
        )
        .await?;
        info!(path = %task.target_path.display(), bytes = summary.bytes, "downloaded package");
        Ok(TaskReport::Package {
            path: task.target_path.clone(),
            bytes: summary.bytes,
            sha256: summary.sha256,
        })
    }

    async fn run_full(&self, task: &AcquisitionTask) -> UpdateResult<TaskReport> {
        let url = task_url(task)?;
        let apply_dir = task_apply_dir(task)?;
        let summary = download_to_file(
            self.transport.as_ref(),
            url,
            &task.target_path,
            task.progress_key(),
            &self.progress,
        )
        .await?;

        let decompressor = self.decompressor.clone();
        let archive = task.target_path.clone();
        let dest = apply_dir.to_path_buf();
        blocking(move || {
            reset_dir(&dest).map_err(|err| UpdateError::storage_at("reset", &dest, err))?;
            decompressor.decompress(&archive, &dest)
        })
        .await?;

        self.finish_version(task, apply_dir, summary.bytes).await
    }

    async fn run_delta(&self, task: &AcquisitionTask) -> UpdateResult<TaskReport> {
        let url = task_url(task)?;
        let apply_dir = task_apply_dir(task)?;
        let base = match task.kind {
            TaskKind::DeltaFromPrevious => {
                let origin_hash = task.origin_hash.as_deref().ok_or_else(|| {
                    UpdateError::State(format!("delta task for {} has no base version", task.hash))
                })?;
                DeltaBase::Directory(self.layout.version_dir(origin_hash))
            }
            _ => DeltaBase::Package(self.origin.clone()),
        };

        let summary = download_to_file(
            self.transport.as_ref(),
            url,
            &task.target_path,
            task.progress_key(),
            &self.progress,
        )
        .await?;

        let job = DeltaJob {
            archive: task.target_path.clone(),
            scratch: self.layout.task_scratch_dir(&task.hash, task.kind),
            apply_dir: apply_dir.to_path_buf(),
            bundle_file_name: self.layout.bundle_file_name().to_string(),
            patch_name: self.layout.bundle_patch_name(),
            decompressor: self.decompressor.clone(),
            patch_codec: self.patch_codec.clone(),
            base,
        };
        blocking(move || job.run()).await?;

        self.finish_version(task, apply_dir, summary.bytes).await
    }

    async fn finish_version(
        &self,
        task: &AcquisitionTask,
        apply_dir: &Path,
        bytes: u64,
    ) -> UpdateResult<TaskReport> {
        let bundle_path = apply_dir.join(self.layout.bundle_file_name());
        let archive = task.target_path.clone();
        let scratch = self.layout.task_scratch_dir(&task.hash, task.kind);
        let hash = task.hash.clone();

        let bundle_sha256 = blocking(move || {
            let usable = fs::metadata(&bundle_path)
                .map(|metadata| metadata.is_file() && metadata.len() > 0)
                .unwrap_or(false);
            if !usable {
                return Err(UpdateError::Integrity(format!(
                    "version {hash} has no usable bundle at {}",
                    bundle_path.display()
                )));
            }
            let digest = sha256_file_hex(&bundle_path)
                .map_err(|err| UpdateError::Integrity(format!("{err:#}")))?;

            if let Err(err) = remove_file_if_exists(&archive) {
                warn!(path = %archive.display(), error = %err, "failed to remove archive");
            }
            if let Err(err) = remove_dir_if_exists(&scratch) {
                warn!(path = %scratch.display(), error = %err, "failed to remove scratch dir");
            }
            Ok(digest)
        })
        .await?;

        info!(
            hash = %task.hash,
            kind = task.kind.as_str(),
            bytes,
            "version materialized"
        );
        Ok(TaskReport::Version {
            hash: task.hash.clone(),
            bytes,
            bundle_sha256,
        })
    }

    async fn cleanup(&self, task: &AcquisitionTask) -> UpdateResult<TaskReport> {
        let keep = [Some(task.hash.clone()), task.origin_hash.clone()]
            .into_iter()
            .flatten()
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>();
        let root = task.target_path.clone();
        let retention = self.retention;

        let report = blocking(move || {
            let keep_refs = keep.iter().map(String::as_str).collect::<Vec<_>>();
            sweep_versions(&root, &keep_refs, retention, SystemTime::now())
        })
        .await?;
        debug!(
            removed = report.removed.len(),
            failed = report.failed.len(),
            "cleanup finished"
        );
        Ok(TaskReport::Cleanup(report))
    }

    async fn unwind(&self, task: &AcquisitionTask) {
        let target = task.target_path.clone();
        let apply_dir = task
            .apply_dir
            .clone()
            .filter(|_| task.kind.produces_version_dir());
        let scratch = self.layout.task_scratch_dir(&task.hash, task.kind);

        let outcome = blocking(move || {
            if let Err(err) = remove_file_if_exists(&target) {
                warn!(path = %target.display(), error = %err, "failed to remove partial download");
            }
            if let Some(apply_dir) = apply_dir {
                if let Err(err) = remove_dir_if_exists(&apply_dir) {
                    warn!(
                        path = %apply_dir.display(),
                        error = %err,
                        "failed to remove partial version"
                    );
                }
            }
            if let Err(err) = remove_dir_if_exists(&scratch) {
                warn!(path = %scratch.display(), error = %err, "failed to remove scratch dir");
            }
            Ok(())
        })
        .await;
        if let Err(err) = outcome {
            warn!(error = %err, "unwind did not complete");
        }
    }
}

impl DeltaJob {
    fn run(self) -> UpdateResult<()> {
        reset_dir(&self.scratch)
            .map_err(|err| UpdateError::storage_at("reset", &self.scratch, err))?;
        self.decompressor.decompress(&self.archive, &self.scratch)?;

        let manifest_path = self.scratch.join(DIFF_MANIFEST_NAME);
        let raw = match fs::read_to_string(&manifest_path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(UpdateError::Manifest(format!(
                    "{DIFF_MANIFEST_NAME} not found in patch archive"
                )));
            }
            Err(err) => return Err(UpdateError::storage_at("read", &manifest_path, err)),
        };
        let manifest = DiffManifest::from_json_str(&raw)?;

        let patch_path = self.scratch.join(&self.patch_name);
        let patch = match fs::read(&patch_path) {
            Ok(patch) => patch,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(UpdateError::Manifest(format!(
                    "bundle patch {} not found in patch archive",
                    self.patch_name
                )));
            }
            Err(err) => return Err(UpdateError::storage_at("read", &patch_path, err)),
        };

        reset_dir(&self.apply_dir)
            .map_err(|err| UpdateError::storage_at("reset", &self.apply_dir, err))?;
        let base_bundle = match &self.base {
            DeltaBase::Directory(base_dir) => self.apply_directory_copies(base_dir, &manifest)?,
            DeltaBase::Package(origin) => self.apply_package_copies(origin.as_ref(), &manifest)?,
        };

        for path in manifest.delete_paths() {
            let target = self.apply_dir.join(path);
            remove_path(&target).map_err(|err| UpdateError::storage_at("remove", &target, err))?;
        }

        overlay_dir(
            &self.scratch,
            &self.apply_dir,
            &[DIFF_MANIFEST_NAME, self.patch_name.as_str()],
        )
        .map_err(|err| UpdateError::storage_at("overlay", &self.apply_dir, err))?;

        let rebuilt = self
            .patch_codec
            .apply(&base_bundle, &patch)
            .map_err(|err| match err {
                UpdateError::PatchApply(_) => err,
                other => UpdateError::PatchApply(other.to_string()),
            })?;
        let bundle_path = self.apply_dir.join(&self.bundle_file_name);
        fs::write(&bundle_path, rebuilt)
            .map_err(|err| UpdateError::storage_at("write", &bundle_path, err))?;

        Ok(())
    }

    /// Seeds the apply directory from the base version and returns the base bundle.
    fn apply_directory_copies(
        &self,
        base_dir: &Path,
        manifest: &DiffManifest,
    ) -> UpdateResult<Vec<u8>> {
        if !base_dir.is_dir() {
            return Err(UpdateError::State(format!(
                "base version directory {} is missing",
                base_dir.display()
            )));
        }
        copy_dir_recursive(base_dir, &self.apply_dir)
            .map_err(|err| UpdateError::storage_at("copy", base_dir, err))?;

        for (dest, src) in manifest.copy_pairs() {
            let src_path = base_dir.join(src);
            let dest_path = self.apply_dir.join(dest);
            match copy_file_creating_parents(&src_path, &dest_path) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    return Err(UpdateError::Manifest(format!(
                        "copy source {src} not found in base version"
                    )));
                }
                Err(err) => return Err(UpdateError::storage_at("copy", &src_path, err)),
            }
        }

        let base_bundle_path = base_dir.join(&self.bundle_file_name);
        fs::read(&base_bundle_path).map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                UpdateError::State(format!(
                    "base bundle {} is missing",
                    base_bundle_path.display()
                ))
            } else {
                UpdateError::storage_at("read", &base_bundle_path, err)
            }
        })
    }

    /// Seeds the apply directory from host package resources and returns the
    /// packaged bundle, empty when the host ships none.
    fn apply_package_copies(
        &self,
        origin: &dyn OriginPackage,
        manifest: &DiffManifest,
    ) -> UpdateResult<Vec<u8>> {
        for (dest, src) in manifest.copy_pairs() {
            let Some(bytes) = origin.read_resource(src)? else {
                warn!(resource = src, "host package resource missing, skipping copy");
                continue;
            };
            let dest_path = self.apply_dir.join(dest);
            write_file_creating_parents(&dest_path, &bytes)
                .map_err(|err| UpdateError::storage_at("write", &dest_path, err))?;
        }

        Ok(origin.bundle()?.unwrap_or_default())
    }
}

fn task_url(task: &AcquisitionTask) -> UpdateResult<&str> {
    task.url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| UpdateError::State(format!("task for {} has no source url", task.hash)))
}

fn task_apply_dir(task: &AcquisitionTask) -> UpdateResult<&Path> {
    task.apply_dir
        .as_deref()
        .ok_or_else(|| UpdateError::State(format!("task for {} has no apply directory", task.hash)))
}

async fn blocking<T, F>(work: F) -> UpdateResult<T>
where
    F: FnOnce() -> UpdateResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| UpdateError::State(format!("blocking task failed: {err}")))?
}
