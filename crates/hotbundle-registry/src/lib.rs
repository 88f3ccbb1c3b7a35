mod endpoints;
mod engine;
mod status;
mod transport;

pub use engine::{ProgressCallback, UpdateEngine, PACKAGE_PROGRESS_KEY};
pub use status::EngineStatus;
pub use transport::ReqwestTransport;
