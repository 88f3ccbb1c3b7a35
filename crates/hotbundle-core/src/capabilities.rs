use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::UpdateResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyEvent {
    Data(Vec<u8>),
    /// Transport-reported progress, used when no length header is available.
    Progress { received: u64, total: u64 },
}

pub type BodyStream = BoxStream<'static, UpdateResult<BodyEvent>>;

pub struct HttpResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub body: BodyStream,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonReply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl JsonReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadReply {
    pub status: u16,
    pub final_url: String,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str) -> UpdateResult<HttpResponse>;

    async fn get_json(&self, url: &str) -> UpdateResult<JsonReply>;

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> UpdateResult<JsonReply>;

    async fn head(&self, url: &str, timeout: Duration) -> UpdateResult<HeadReply>;
}

/// Durable key-value store. `put` and `delete` may buffer; `flush` makes them durable.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> UpdateResult<Option<String>>;
    fn put(&self, key: &str, value: &str) -> UpdateResult<()>;
    fn delete(&self, key: &str) -> UpdateResult<()>;
    fn clear(&self) -> UpdateResult<()>;
    fn flush(&self) -> UpdateResult<()>;
}

pub trait Decompressor: Send + Sync {
    fn decompress(&self, archive: &Path, dest: &Path) -> UpdateResult<()>;
}

pub trait PatchCodec: Send + Sync {
    fn apply(&self, base: &[u8], patch: &[u8]) -> UpdateResult<Vec<u8>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageIdentity {
    pub package_version: String,
    pub build_time: String,
}

/// Read-only view of the installed host package.
pub trait OriginPackage: Send + Sync {
    fn identity(&self) -> PackageIdentity;
    fn read_resource(&self, path: &str) -> UpdateResult<Option<Vec<u8>>>;
    fn bundle(&self) -> UpdateResult<Option<Vec<u8>>>;
}

pub trait HostReloader: Send + Sync {
    fn reload(&self, bundle_path: Option<&Path>) -> UpdateResult<()>;
}

#[derive(Clone)]
pub struct HostCapabilities {
    pub transport: Arc<dyn HttpTransport>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub decompressor: Arc<dyn Decompressor>,
    pub patch_codec: Arc<dyn PatchCodec>,
    pub origin: Arc<dyn OriginPackage>,
    pub reloader: Arc<dyn HostReloader>,
}
