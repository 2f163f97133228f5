use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Stable id for a buffer session: first 16 hex chars of
/// sha256("session|<start nanos>|<pid>").
pub fn compute_session_id(started: SystemTime, pid: u32) -> String {
    let nanos = started
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(format!("session|{nanos}|{pid}").as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
