use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use hotbundle_core::{
    AcquisitionTask, CheckOutcome, CheckResponse, EngineConfig, EngineEvent, EventKind,
    HostCapabilities, LocalVersionInfo, PackageIdentity, TaskKind, UpdateDescriptor, UpdateError,
    UpdateResult,
};
use hotbundle_installer::{
    validate_hash, CleanupReport, LifecycleState, PatchAcquirer, ProgressEvent, ProgressHub,
    TaskReport, UpdateLayout, VersionStore,
};
use hotbundle_resolver::{
    candidate_urls, plan_strategies, select_outcome, SelectionContext, StrategyStep,
};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::endpoints::{backup_endpoints, pick_url, post_with_fallback, race_post};
use crate::status::{EngineStatus, LaunchState};

/// Progress key used for package downloads.
pub const PACKAGE_PROGRESS_KEY: &str = "downloadingPackage";

const EVENT_CAPACITY: usize = 64;

pub type ProgressCallback = Box<dyn Fn(ProgressEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct CheckCache {
    started: Option<Instant>,
    outcome: Option<CheckOutcome>,
}

#[derive(Debug, Default)]
struct Acquired {
    hashes: HashSet<String>,
    latest: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum PackageStatus {
    #[default]
    Idle,
    Downloading,
    Downloaded(PathBuf),
}

/// Long-lived update client. Holds every per-process flag: in-flight
/// downloads, the applying guard, the package download status and whether
/// success was already marked.
pub struct UpdateEngine {
    config: EngineConfig,
    capabilities: HostCapabilities,
    store: VersionStore,
    acquirer: PatchAcquirer,
    identity: PackageIdentity,
    installation_id: String,
    launch: LaunchState,
    check_cache: tokio::sync::Mutex<CheckCache>,
    acquired: Mutex<Acquired>,
    in_flight: Mutex<HashSet<String>>,
    applying: AtomicBool,
    marked: AtomicBool,
    package_status: Mutex<PackageStatus>,
    rollback_report: Mutex<Option<String>>,
    events: broadcast::Sender<EngineEvent>,
}

struct InFlight<'a> {
    set: &'a Mutex<HashSet<String>>,
    hash: String,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, hash: &str) -> UpdateResult<Self> {
        if !lock(set).insert(hash.to_string()) {
            return Err(UpdateError::State(format!(
                "version {hash} is already being downloaded"
            )));
        }
        Ok(Self {
            set,
            hash: hash.to_string(),
        })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.hash);
    }
}

impl UpdateEngine {
    pub fn new(config: EngineConfig, capabilities: HostCapabilities) -> UpdateResult<Self> {
        config
            .validate()
            .map_err(|err| UpdateError::State(format!("invalid engine config: {err:#}")))?;

        let layout = UpdateLayout::new(config.root_dir.clone(), config.bundle_file_name.clone());
        let identity = capabilities.origin.identity();
        let store =
            VersionStore::open(layout.clone(), capabilities.preferences.clone(), &identity)?;
        let installation_id = store.installation_id()?;
        let acquirer = PatchAcquirer::new(
            layout,
            &capabilities,
            ProgressHub::default(),
            config.retention(),
        );

        let snapshot = store.snapshot()?;
        let launch = LaunchState {
            first_time: snapshot.state() == LifecycleState::PendingFirstBoot,
            debug_channel: consume_debug_channel(&store, snapshot.current_version.as_deref())?,
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let engine = Self {
            config,
            capabilities,
            store,
            acquirer,
            identity,
            installation_id,
            launch,
            check_cache: tokio::sync::Mutex::new(CheckCache::default()),
            acquired: Mutex::new(Acquired::default()),
            in_flight: Mutex::new(HashSet::new()),
            applying: AtomicBool::new(false),
            marked: AtomicBool::new(false),
            package_status: Mutex::new(PackageStatus::Idle),
            rollback_report: Mutex::new(None),
            events,
        };

        if let Some(rolled_back) = snapshot.rolled_back_version {
            *lock(&engine.rollback_report) = Some(rolled_back.clone());
            engine.emit(
                EventKind::Rollback,
                "",
                BTreeMap::from([("rolledBackVersion".to_string(), rolled_back)]),
            );
        }
        info!(
            app_key = %engine.config.app_key,
            root = %engine.layout().root().display(),
            "update engine ready"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn layout(&self) -> &UpdateLayout {
        self.acquirer.layout()
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    pub fn progress(&self) -> &ProgressHub {
        self.acquirer.progress()
    }

    pub fn installation_id(&self) -> &str {
        &self.installation_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// The version abandoned by the last rollback, handed out once.
    pub fn take_rollback_report(&self) -> Option<String> {
        lock(&self.rollback_report).take()
    }

    pub fn local_version_info(&self, hash: &str) -> UpdateResult<Option<LocalVersionInfo>> {
        self.store.local_info(hash)
    }

    fn package_version(&self) -> String {
        self.config
            .package_version_override
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(&self.identity.package_version)
            .to_string()
    }

    pub async fn check(&self, extra: Map<String, Value>) -> UpdateResult<CheckOutcome> {
        let mut cache = self.check_cache.lock().await;
        if let (Some(started), Some(outcome)) = (cache.started, cache.outcome.as_ref()) {
            if started.elapsed() < self.config.check_window() {
                debug!(outcome = outcome.label(), "reusing recent check result");
                return Ok(outcome.clone());
            }
        }
        cache.started = Some(Instant::now());

        let response = match self.request_check(extra).await {
            Ok(response) => response,
            Err(err) => {
                self.emit(EventKind::ErrorChecking, err.to_string(), BTreeMap::new());
                if self.config.throw_errors {
                    return Err(err);
                }
                return Ok(cache
                    .outcome
                    .clone()
                    .unwrap_or(CheckOutcome::Unavailable {
                        message: err.to_string(),
                    }));
            }
        };

        let context = SelectionContext {
            package_version: self.package_version(),
            installation_id: self.installation_id.clone(),
            rolled_back_version: self.store.rolled_back_version()?,
        };
        let outcome = select_outcome(&response, &context);
        info!(outcome = outcome.label(), "update check finished");
        cache.outcome = Some(outcome.clone());
        Ok(outcome)
    }

    async fn request_check(&self, extra: Map<String, Value>) -> UpdateResult<CheckResponse> {
        let body = self.check_body(extra)?;
        let transport = self.capabilities.transport.as_ref();
        let url = self.config.check_url(&self.config.server.main);
        self.emit(
            EventKind::Checking,
            format!("{}: {body}", self.config.app_key),
            BTreeMap::new(),
        );

        let reply = match post_with_fallback(transport, &url, &body).await {
            Ok(reply) => reply,
            Err(err) => {
                self.emit(
                    EventKind::ErrorChecking,
                    format!("cannot reach {url}, trying backup endpoints: {err}"),
                    BTreeMap::new(),
                );
                let urls = backup_endpoints(transport, &self.config.server)
                    .await
                    .iter()
                    .map(|endpoint| self.config.check_url(endpoint))
                    .collect::<Vec<_>>();
                race_post(transport, &urls, &body).await?
            }
        };

        if !reply.is_success() {
            return Err(UpdateError::Network(format!(
                "update check failed with status {}: {}",
                reply.status, reply.body
            )));
        }
        CheckResponse::from_json_value(reply.body)
            .map_err(|err| UpdateError::Network(format!("malformed check response: {err}")))
    }

    fn check_body(&self, extra: Map<String, Value>) -> UpdateResult<Value> {
        let mut body = Map::new();
        body.insert(
            "packageVersion".to_string(),
            Value::String(self.package_version()),
        );
        if let Some(current) = self.store.current_version()? {
            body.insert("hash".to_string(), Value::String(current));
        }
        body.insert(
            "buildTime".to_string(),
            Value::String(self.identity.build_time.clone()),
        );
        body.insert(
            "cInfo".to_string(),
            json!({
                "hotbundle": env!("CARGO_PKG_VERSION"),
                "os": std::env::consts::OS,
                "uuid": self.installation_id,
            }),
        );
        body.extend(extra);
        Ok(Value::Object(body))
    }

    /// Acquires `descriptor` with the cheapest strategy that works. Returns the
    /// hash once it is installed, or `None` when the version is skipped or the
    /// failure was only reported.
    pub async fn download(
        &self,
        descriptor: &UpdateDescriptor,
        on_progress: Option<ProgressCallback>,
    ) -> UpdateResult<Option<String>> {
        let hash = descriptor.hash.as_str();
        validate_hash(hash)?;
        if self.store.rolled_back_version()?.as_deref() == Some(hash) {
            info!(hash, "skipping rolled back version");
            return Ok(None);
        }
        if self.already_acquired(hash)? {
            debug!(hash, "version already downloaded");
            return Ok(Some(hash.to_string()));
        }

        let _in_flight = InFlight::acquire(&self.in_flight, hash)?;
        let started = Instant::now();
        let mut data = BTreeMap::from([("newVersion".to_string(), hash.to_string())]);
        self.emit(EventKind::Downloading, "", data.clone());

        let (succeeded, failures) = self
            .with_progress(hash, on_progress.as_ref(), self.run_strategies(descriptor))
            .await?;
        if !failures.is_empty() {
            data.insert("error".to_string(), failures.join(";"));
        }

        match succeeded {
            Some((kind, bundle_sha256)) => {
                self.store.set_local_info(
                    hash,
                    &LocalVersionInfo {
                        bundle_sha256: Some(bundle_sha256),
                        ..descriptor.local_info()
                    },
                )?;
                self.record_acquired(hash);
                data.insert("diff".to_string(), kind.as_str().to_string());
                data.insert(
                    "duration".to_string(),
                    started.elapsed().as_millis().to_string(),
                );
                self.emit(EventKind::DownloadSuccess, "", data);
                info!(hash, strategy = kind.as_str(), "version downloaded");
                Ok(Some(hash.to_string()))
            }
            None if self.config.soft_fail_downloads => {
                warn!(hash, "every strategy failed, reporting soft success");
                data.insert("diff".to_string(), "none".to_string());
                self.emit(EventKind::DownloadSuccess, "", data);
                Ok(Some(hash.to_string()))
            }
            None => {
                data.remove("error");
                self.emit(EventKind::ErrorUpdate, failures.join(";"), data);
                let err = UpdateError::AllStrategiesFailed { messages: failures };
                if self.config.throw_errors {
                    Err(err)
                } else {
                    warn!(hash, error = %err, "download failed");
                    Ok(None)
                }
            }
        }
    }

    fn already_acquired(&self, hash: &str) -> UpdateResult<bool> {
        if lock(&self.acquired).hashes.contains(hash) {
            return Ok(true);
        }
        let snapshot = self.store.snapshot()?;
        let installed = [snapshot.current_version, snapshot.last_version]
            .iter()
            .flatten()
            .any(|version| version == hash);
        if installed && self.store.is_bootable(hash) {
            lock(&self.acquired).hashes.insert(hash.to_string());
            return Ok(true);
        }
        Ok(false)
    }

    fn record_acquired(&self, hash: &str) {
        let mut acquired = lock(&self.acquired);
        acquired.hashes.insert(hash.to_string());
        acquired.latest = Some(hash.to_string());
    }

    async fn run_strategies(
        &self,
        descriptor: &UpdateDescriptor,
    ) -> UpdateResult<(Option<(TaskKind, String)>, Vec<String>)> {
        let bootable_current = self
            .store
            .current_version()?
            .filter(|current| self.store.is_bootable(current));
        let steps = plan_strategies(descriptor, bootable_current.as_deref());
        if steps.is_empty() {
            return Ok((
                None,
                vec![format!(
                    "no download strategy offered for {}",
                    descriptor.hash
                )],
            ));
        }

        let mut failures = Vec::new();
        for step in &steps {
            match self.run_strategy(descriptor, step).await {
                Ok(bundle_sha256) => return Ok((Some((step.kind, bundle_sha256)), failures)),
                Err(err) => {
                    warn!(
                        hash = %descriptor.hash,
                        strategy = step.kind.as_str(),
                        error = %err,
                        "download strategy failed"
                    );
                    failures.push(format!("{} failed: {err}", step.kind.as_str()));
                }
            }
        }
        Ok((None, failures))
    }

    async fn run_strategy(
        &self,
        descriptor: &UpdateDescriptor,
        step: &StrategyStep,
    ) -> UpdateResult<String> {
        let urls = candidate_urls(&descriptor.paths, &step.file);
        let url = pick_url(
            self.capabilities.transport.as_ref(),
            &urls,
            self.config.probe_timeout(),
        )
        .await
        .ok_or_else(|| UpdateError::State(format!("no download host for {}", step.file)))?;
        let task = self.strategy_task(descriptor, step, &url)?;
        debug!(
            hash = %descriptor.hash,
            strategy = step.kind.as_str(),
            url = %url,
            "running strategy"
        );

        match self.acquirer.execute(&task).await? {
            TaskReport::Version { bundle_sha256, .. } => Ok(bundle_sha256),
            other => Err(UpdateError::State(format!(
                "unexpected report for version download: {other:?}"
            ))),
        }
    }

    fn strategy_task(
        &self,
        descriptor: &UpdateDescriptor,
        step: &StrategyStep,
        url: &str,
    ) -> UpdateResult<AcquisitionTask> {
        let layout = self.layout();
        match step.kind {
            TaskKind::Full => layout.full_task(&descriptor.hash, url),
            TaskKind::DeltaFromPrevious => {
                let origin_hash = step.origin_hash.as_deref().ok_or_else(|| {
                    UpdateError::State(format!("no base version for {}", descriptor.hash))
                })?;
                layout.delta_task(origin_hash, &descriptor.hash, url)
            }
            TaskKind::DeltaFromOrigin => layout.origin_task(&descriptor.hash, url),
            TaskKind::Plain | TaskKind::Cleanup => Err(UpdateError::State(format!(
                "{} is not a download strategy",
                step.kind.as_str()
            ))),
        }
    }

    /// Drives `work` while relaying progress events for `key` to `callback`.
    async fn with_progress<F, T>(
        &self,
        key: &str,
        callback: Option<&ProgressCallback>,
        work: F,
    ) -> T
    where
        F: Future<Output = T>,
    {
        let Some(callback) = callback else {
            return work.await;
        };
        let mut subscription = self.progress().subscribe(key);
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                Some(event) = subscription.next() => callback(event),
                result = &mut work => {
                    while let Some(event) = subscription.try_next() {
                        callback(event);
                    }
                    return result;
                }
            }
        }
    }

    fn assert_switchable(&self, hash: &str) -> UpdateResult<()> {
        validate_hash(hash)?;
        let acquired = lock(&self.acquired);
        match acquired.latest.as_deref() {
            Some(latest) if latest != hash => Err(UpdateError::State(format!(
                "version {latest} was downloaded by this process, switch to it first"
            ))),
            _ => Ok(()),
        }
    }

    /// Switches to `hash` and asks the host to reload. Further switches are
    /// refused until the process restarts.
    pub fn switch_now(&self, hash: &str) -> UpdateResult<PathBuf> {
        self.assert_switchable(hash)?;
        if self
            .applying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(UpdateError::State(
                "an update is already being applied".to_string(),
            ));
        }

        let result = self.store.switch_version(hash).and_then(|()| {
            let bundle = self.layout().bundle_path(hash);
            self.capabilities.reloader.reload(Some(&bundle))?;
            Ok(bundle)
        });
        if result.is_err() {
            self.applying.store(false, Ordering::SeqCst);
        }
        result
    }

    pub fn switch_on_next_restart(&self, hash: &str) -> UpdateResult<()> {
        self.assert_switchable(hash)?;
        self.store.switch_version(hash)
    }

    /// Confirms the running version. Only the first call in a process that
    /// launched on probation does anything; it also sweeps expired versions.
    pub async fn mark_boot_success(&self) -> UpdateResult<bool> {
        if !self.launch.first_time {
            debug!("process did not launch a version on probation");
            return Ok(false);
        }
        if self
            .marked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("boot success already marked");
            return Ok(false);
        }

        let marked = self.store.lifecycle_state().and_then(|state| {
            if state != LifecycleState::PendingFirstBoot {
                debug!(state = state.as_str(), "nothing to confirm");
                return Ok(false);
            }
            self.store.mark_success().map(|()| true)
        });
        if !matches!(marked, Ok(true)) {
            self.marked.store(false, Ordering::SeqCst);
            return marked;
        }

        self.emit(EventKind::MarkSuccess, "", BTreeMap::new());
        if let Err(err) = self.cleanup().await {
            warn!(error = %err, "cleanup after boot confirmation failed");
        }
        Ok(true)
    }

    pub fn clear_rollback_marker(&self) -> UpdateResult<()> {
        self.store.clear_rollback_marker()?;
        *lock(&self.rollback_report) = None;
        Ok(())
    }

    pub fn resolve_bundle(&self) -> UpdateResult<Option<PathBuf>> {
        self.store.resolve_bundle()
    }

    /// Removes expired versions other than the current and previous one.
    pub async fn cleanup(&self) -> UpdateResult<CleanupReport> {
        let snapshot = self.store.snapshot()?;
        let task = self.layout().cleanup_task(
            snapshot.current_version.as_deref(),
            snapshot.last_version.as_deref(),
        );
        match self.acquirer.execute(&task).await? {
            TaskReport::Cleanup(report) => Ok(report),
            other => Err(UpdateError::State(format!(
                "unexpected report for cleanup: {other:?}"
            ))),
        }
    }

    /// Downloads a host package such as a native installer. Calls made while a
    /// download is running are ignored; once finished the stored path is reused.
    pub async fn download_package(
        &self,
        url: &str,
        file_name: &str,
        on_progress: Option<ProgressCallback>,
    ) -> UpdateResult<Option<PathBuf>> {
        {
            let mut status = lock(&self.package_status);
            match std::mem::replace(&mut *status, PackageStatus::Downloading) {
                PackageStatus::Idle => {}
                PackageStatus::Downloading => {
                    debug!("package download already running");
                    return Ok(None);
                }
                PackageStatus::Downloaded(path) => {
                    *status = PackageStatus::Downloaded(path.clone());
                    return Ok(Some(path));
                }
            }
        }

        self.emit(EventKind::DownloadingPackage, url, BTreeMap::new());
        let result = match self.layout().plain_task(PACKAGE_PROGRESS_KEY, url, file_name) {
            Ok(task) => {
                self.with_progress(
                    PACKAGE_PROGRESS_KEY,
                    on_progress.as_ref(),
                    self.acquirer.execute(&task),
                )
                .await
            }
            Err(err) => Err(err),
        }
        .and_then(|report| match report {
            TaskReport::Package { path, .. } => Ok(path),
            other => Err(UpdateError::State(format!(
                "unexpected report for package download: {other:?}"
            ))),
        });

        match result {
            Ok(path) => {
                *lock(&self.package_status) = PackageStatus::Downloaded(path.clone());
                info!(path = %path.display(), "package downloaded");
                Ok(Some(path))
            }
            Err(err) => {
                *lock(&self.package_status) = PackageStatus::Idle;
                self.emit(
                    EventKind::ErrorDownloadPackage,
                    err.to_string(),
                    BTreeMap::new(),
                );
                if self.config.throw_errors {
                    Err(err)
                } else {
                    Ok(None)
                }
            }
        }
    }

    pub fn status(&self) -> UpdateResult<EngineStatus> {
        let snapshot = self.store.snapshot()?;
        let current_info = match snapshot.current_version.as_deref() {
            Some(current) => self.store.local_info(current)?,
            None => None,
        };
        let state = snapshot.state().as_str().to_string();
        Ok(EngineStatus {
            app_key: self.config.app_key.clone(),
            root: self.layout().root().to_path_buf(),
            state,
            current_version: snapshot.current_version,
            last_version: snapshot.last_version,
            rolled_back_version: snapshot.rolled_back_version,
            current_info,
            package_version: self.package_version(),
            build_time: self.identity.build_time.clone(),
            installation_id: self.installation_id.clone(),
            first_time: self.launch.first_time,
            debug_channel: self.launch.debug_channel,
            first_time_debug: self.launch.first_time && self.launch.debug_channel,
            downloaded_hash: lock(&self.acquired).latest.clone(),
        })
    }

    fn emit(
        &self,
        kind: EventKind,
        message: impl Into<String>,
        mut data: BTreeMap<String, String>,
    ) {
        if let Some(package_version) = &self.config.package_version_override {
            data.entry("overridePackageVersion".to_string())
                .or_insert_with(|| package_version.clone());
        }
        let event = EngineEvent {
            kind,
            app_key: self.config.app_key.clone(),
            current_version: self.store.current_version().ok().flatten(),
            package_version: self.identity.package_version.clone(),
            build_time: self.identity.build_time.clone(),
            installation_id: self.installation_id.clone(),
            message: message.into(),
            data,
        };

        match kind {
            EventKind::Rollback
            | EventKind::ErrorChecking
            | EventKind::ErrorUpdate
            | EventKind::ErrorDownloadPackage => {
                warn!(kind = kind.as_str(), message = %event.message, "engine event")
            }
            _ => debug!(kind = kind.as_str(), message = %event.message, "engine event"),
        }
        let _ = self.events.send(event);
    }
}

/// Clears a one-shot debug channel flag on the current version's info.
fn consume_debug_channel(store: &VersionStore, current: Option<&str>) -> UpdateResult<bool> {
    let Some(current) = current else {
        return Ok(false);
    };
    let Some(mut info) = store.local_info(current)? else {
        return Ok(false);
    };
    if !info.debug_channel {
        return Ok(false);
    }
    info.debug_channel = false;
    store.set_local_info(current, &info)?;
    Ok(true)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
