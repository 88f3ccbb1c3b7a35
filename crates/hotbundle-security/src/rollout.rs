use sha2::{Digest, Sha256};

/// Stable bucket in `0..100` derived from the installation id.
pub fn rollout_bucket(installation_id: &str) -> u32 {
    let digest = Sha256::digest(installation_id.as_bytes());
    let mut prefix = [0_u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % 100) as u32
}

pub fn in_rollout(installation_id: &str, percentage: u32) -> bool {
    match percentage {
        0 => false,
        pct if pct >= 100 => true,
        pct => rollout_bucket(installation_id) < pct,
    }
}
