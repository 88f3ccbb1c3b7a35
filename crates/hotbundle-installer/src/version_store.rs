use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use hotbundle_core::{
    LocalVersionInfo, PackageIdentity, PreferenceStore, UpdateError, UpdateResult,
};
use hotbundle_security::verify_sha256_file;
use tracing::{debug, info, warn};

use crate::fs_utils::remove_path;
use crate::layout::{validate_hash, UpdateLayout};

pub const CURRENT_VERSION_KEY: &str = "currentVersion";
pub const LAST_VERSION_KEY: &str = "lastVersion";
pub const FIRST_TIME_KEY: &str = "firstTime";
pub const FIRST_TIME_OK_KEY: &str = "firstTimeOk";
pub const ROLLED_BACK_VERSION_KEY: &str = "rolledBackVersion";
pub const PACKAGE_VERSION_KEY: &str = "packageVersion";
pub const BUILD_TIME_KEY: &str = "buildTime";
pub const INSTALLATION_ID_KEY: &str = "uuid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NoVersion,
    PendingFirstBoot,
    Verified,
    RolledBack,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoVersion => "no-version",
            Self::PendingFirstBoot => "pending-first-boot",
            Self::Verified => "verified",
            Self::RolledBack => "rolled-back",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub current_version: Option<String>,
    pub last_version: Option<String>,
    pub first_time: bool,
    pub first_time_ok: bool,
    pub rolled_back_version: Option<String>,
    pub package_version: Option<String>,
    pub build_time: Option<String>,
}

impl StoreSnapshot {
    pub fn state(&self) -> LifecycleState {
        match &self.current_version {
            None if self.rolled_back_version.is_some() => LifecycleState::RolledBack,
            None => LifecycleState::NoVersion,
            Some(_) if !self.first_time_ok => LifecycleState::PendingFirstBoot,
            Some(_) if self.rolled_back_version.is_some() => LifecycleState::RolledBack,
            Some(_) => LifecycleState::Verified,
        }
    }
}

pub struct VersionStore {
    layout: UpdateLayout,
    prefs: Arc<dyn PreferenceStore>,
    guard: Mutex<()>,
}

impl VersionStore {
    /// Opens the store, wiping every version when the host package identity changed.
    pub fn open(
        layout: UpdateLayout,
        prefs: Arc<dyn PreferenceStore>,
        identity: &PackageIdentity,
    ) -> UpdateResult<Self> {
        layout.ensure_base_dirs()?;
        let store = Self {
            layout,
            prefs,
            guard: Mutex::new(()),
        };
        store.reconcile_package_identity(identity)?;
        Ok(store)
    }

    pub fn layout(&self) -> &UpdateLayout {
        &self.layout
    }

    pub fn get(&self, key: &str) -> UpdateResult<Option<String>> {
        Ok(non_empty(self.prefs.get(key)?))
    }

    pub fn set(&self, key: &str, value: &str) -> UpdateResult<()> {
        let _guard = self.lock();
        self.prefs.put(key, value)?;
        self.prefs.flush()
    }

    pub fn current_version(&self) -> UpdateResult<Option<String>> {
        self.get(CURRENT_VERSION_KEY)
    }

    pub fn last_version(&self) -> UpdateResult<Option<String>> {
        self.get(LAST_VERSION_KEY)
    }

    pub fn rolled_back_version(&self) -> UpdateResult<Option<String>> {
        self.get(ROLLED_BACK_VERSION_KEY)
    }

    pub fn snapshot(&self) -> UpdateResult<StoreSnapshot> {
        Ok(StoreSnapshot {
            current_version: self.get(CURRENT_VERSION_KEY)?,
            last_version: self.get(LAST_VERSION_KEY)?,
            first_time: self.flag(FIRST_TIME_KEY)?,
            first_time_ok: self.flag(FIRST_TIME_OK_KEY)?,
            rolled_back_version: self.get(ROLLED_BACK_VERSION_KEY)?,
            package_version: self.get(PACKAGE_VERSION_KEY)?,
            build_time: self.get(BUILD_TIME_KEY)?,
        })
    }

    pub fn lifecycle_state(&self) -> UpdateResult<LifecycleState> {
        Ok(self.snapshot()?.state())
    }

    pub fn installation_id(&self) -> UpdateResult<String> {
        let _guard = self.lock();
        if let Some(existing) = self.get(INSTALLATION_ID_KEY)? {
            return Ok(existing);
        }
        let generated = uuid::Uuid::new_v4().to_string();
        self.prefs.put(INSTALLATION_ID_KEY, &generated)?;
        self.prefs.flush()?;
        Ok(generated)
    }

    pub fn local_info(&self, hash: &str) -> UpdateResult<Option<LocalVersionInfo>> {
        let Some(raw) = self.get(&local_info_key(hash))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                warn!(hash, error = %err, "ignoring unreadable local version info");
                Ok(None)
            }
        }
    }

    pub fn set_local_info(&self, hash: &str, info: &LocalVersionInfo) -> UpdateResult<()> {
        validate_hash(hash)?;
        let encoded = serde_json::to_string(info)
            .map_err(|err| UpdateError::State(format!("failed to encode version info: {err}")))?;
        self.set(&local_info_key(hash), &encoded)
    }

    /// A version is bootable when its bundle is a non-empty file matching the
    /// recorded digest, if any.
    pub fn is_bootable(&self, hash: &str) -> bool {
        if validate_hash(hash).is_err() {
            return false;
        }
        let bundle_path = self.layout.bundle_path(hash);
        let present = fs::metadata(&bundle_path)
            .map(|metadata| metadata.is_file() && metadata.len() > 0)
            .unwrap_or(false);
        if !present {
            return false;
        }

        let expected = match self.local_info(hash) {
            Ok(Some(info)) => info.bundle_sha256,
            _ => None,
        };
        match expected {
            Some(expected) => verify_sha256_file(&bundle_path, &expected).unwrap_or(false),
            None => true,
        }
    }

    pub fn switch_version(&self, hash: &str) -> UpdateResult<()> {
        validate_hash(hash)?;
        if !self.is_bootable(hash) {
            return Err(UpdateError::State(format!(
                "version {hash} is not installed or its bundle is unusable"
            )));
        }

        let _guard = self.lock();
        let current = self.get(CURRENT_VERSION_KEY)?;
        if let Some(current) = current.as_deref() {
            if current != hash {
                self.prefs.put(LAST_VERSION_KEY, current)?;
            }
        }
        self.prefs.put(CURRENT_VERSION_KEY, hash)?;
        self.prefs.put(FIRST_TIME_KEY, "true")?;
        self.prefs.put(FIRST_TIME_OK_KEY, "false")?;
        self.prefs.delete(ROLLED_BACK_VERSION_KEY)?;
        self.prefs.flush()?;
        info!(hash, previous = ?current, "switched version");
        Ok(())
    }

    pub fn mark_success(&self) -> UpdateResult<()> {
        let _guard = self.lock();
        let snapshot = self.snapshot()?;
        if snapshot.state() != LifecycleState::PendingFirstBoot {
            return Err(UpdateError::State(format!(
                "cannot mark success in state {}",
                snapshot.state().as_str()
            )));
        }

        self.prefs.put(FIRST_TIME_KEY, "false")?;
        self.prefs.put(FIRST_TIME_OK_KEY, "true")?;
        if let Some(last) = snapshot.last_version.as_deref() {
            if snapshot.current_version.as_deref() != Some(last) {
                self.prefs.delete(LAST_VERSION_KEY)?;
                self.prefs.delete(&local_info_key(last))?;
            }
        }
        self.prefs.flush()?;
        info!(hash = ?snapshot.current_version, "version marked successful");
        Ok(())
    }

    /// Reverts one level and returns the version now current.
    pub fn roll_back(&self) -> UpdateResult<Option<String>> {
        let _guard = self.lock();
        self.roll_back_locked()
    }

    pub fn clear_rollback_marker(&self) -> UpdateResult<()> {
        let _guard = self.lock();
        self.prefs.delete(ROLLED_BACK_VERSION_KEY)?;
        self.prefs.flush()
    }

    /// Bundle the host should load next, or `None` for the packaged one.
    pub fn resolve_bundle(&self) -> UpdateResult<Option<PathBuf>> {
        let _guard = self.lock();
        loop {
            let Some(current) = self.get(CURRENT_VERSION_KEY)? else {
                return Ok(None);
            };

            let first_time = self.flag(FIRST_TIME_KEY)?;
            let first_time_ok = self.flag(FIRST_TIME_OK_KEY)?;
            if !first_time && !first_time_ok {
                warn!(hash = %current, "previous boot was never confirmed");
                self.roll_back_locked()?;
                continue;
            }

            if !self.is_bootable(&current) {
                warn!(hash = %current, "bundle missing or damaged");
                self.roll_back_locked()?;
                continue;
            }

            if first_time {
                self.prefs.put(FIRST_TIME_KEY, "false")?;
                self.prefs.flush()?;
                debug!(hash = %current, "consumed first boot");
            }
            return Ok(Some(self.layout.bundle_path(&current)));
        }
    }

    fn roll_back_locked(&self) -> UpdateResult<Option<String>> {
        let abandoned = self.get(CURRENT_VERSION_KEY)?;
        let last = self.get(LAST_VERSION_KEY)?;
        match last.as_deref() {
            Some(last) => {
                self.prefs.put(CURRENT_VERSION_KEY, last)?;
                self.prefs.delete(LAST_VERSION_KEY)?;
            }
            None => {
                self.prefs.delete(CURRENT_VERSION_KEY)?;
            }
        }
        self.prefs.put(FIRST_TIME_OK_KEY, "true")?;
        self.prefs.put(FIRST_TIME_KEY, "false")?;
        if let Some(abandoned) = abandoned.as_deref() {
            self.prefs.put(ROLLED_BACK_VERSION_KEY, abandoned)?;
        }
        self.prefs.flush()?;
        warn!(abandoned = ?abandoned, restored = ?last, "rolled back version");
        Ok(last)
    }

    fn reconcile_package_identity(&self, identity: &PackageIdentity) -> UpdateResult<()> {
        let _guard = self.lock();
        let stored_version = self.get(PACKAGE_VERSION_KEY)?;
        let stored_build = self.get(BUILD_TIME_KEY)?;
        let changed = match (&stored_version, &stored_build) {
            (None, None) => false,
            _ => {
                stored_version.as_deref() != Some(identity.package_version.as_str())
                    || stored_build.as_deref().unwrap_or_default() != identity.build_time
            }
        };

        if changed {
            info!(
                previous = ?stored_version,
                current = %identity.package_version,
                "host package changed, discarding downloaded versions"
            );
            self.purge_versions()?;
            self.prefs.clear()?;
        } else if stored_version.is_some() {
            return Ok(());
        }

        self.prefs.put(PACKAGE_VERSION_KEY, &identity.package_version)?;
        self.prefs.put(BUILD_TIME_KEY, &identity.build_time)?;
        self.prefs.flush()
    }

    fn purge_versions(&self) -> UpdateResult<()> {
        let root = self.layout.root();
        let preferences_path = self.layout.preferences_path();
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(UpdateError::storage_at("read", root, err)),
        };
        for entry in entries {
            let entry = entry.map_err(|err| UpdateError::storage_at("read", root, err))?;
            let path = entry.path();
            if path == preferences_path {
                continue;
            }
            remove_path(&path).map_err(|err| UpdateError::storage_at("remove", &path, err))?;
        }
        self.layout.ensure_base_dirs()
    }

    fn flag(&self, key: &str) -> UpdateResult<bool> {
        Ok(self.get(key)?.as_deref() == Some("true"))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.guard
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub fn local_info_key(hash: &str) -> String {
    format!("hash_{hash}")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}
