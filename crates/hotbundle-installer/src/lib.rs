mod acquirer;
mod cleanup;
mod download;
mod fs_utils;
mod layout;
mod origin;
mod preferences;
mod progress;
mod version_store;
mod zip_archive;

pub use acquirer::{PatchAcquirer, TaskReport};
pub use cleanup::{sweep_versions, CleanupReport};
pub use download::{download_to_file, DownloadSummary};
pub use layout::{validate_hash, UpdateLayout};
pub use origin::DirectoryOriginPackage;
pub use preferences::{FilePreferenceStore, MemoryPreferenceStore};
pub use progress::{ProgressEvent, ProgressHub, ProgressSubscription};
pub use version_store::{
    local_info_key, LifecycleState, StoreSnapshot, VersionStore, BUILD_TIME_KEY,
    CURRENT_VERSION_KEY, FIRST_TIME_KEY, FIRST_TIME_OK_KEY, INSTALLATION_ID_KEY, LAST_VERSION_KEY,
    PACKAGE_VERSION_KEY, ROLLED_BACK_VERSION_KEY,
};
pub use zip_archive::ZipDecompressor;
