mod capabilities;
mod config;
mod descriptor;
mod error;
mod event;
mod manifest;
mod task;

pub use capabilities::{
    BodyEvent, BodyStream, Decompressor, HeadReply, HostCapabilities, HostReloader, HttpResponse,
    HttpTransport, JsonReply, OriginPackage, PackageIdentity, PatchCodec, PreferenceStore,
};
pub use config::{EngineConfig, ServerConfig, DEFAULT_BUNDLE_FILE_NAME};
pub use descriptor::{
    CheckOutcome, CheckResponse, LocalVersionInfo, PausedScope, UpdateDescriptor, VersionConfig,
    VersionInfo,
};
pub use error::{UpdateError, UpdateResult};
pub use event::{EngineEvent, EventKind};
pub use manifest::{validate_relative_path, DiffManifest, DIFF_MANIFEST_NAME};
pub use task::{AcquisitionTask, TaskKind};

#[cfg(test)]
mod tests;
