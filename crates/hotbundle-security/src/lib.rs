mod checksum;
mod rollout;

pub use checksum::{sha256_hex, sha256_file_hex, verify_sha256, verify_sha256_file, Sha256Writer};
pub use rollout::{in_rollout, rollout_bucket};
