// Pipeline ingestion: document discovery, size gating, digests and truncation repair

pub mod repair;
pub mod scanner;

use sha2::{Digest, Sha256};

pub use repair::{repair_truncated, Repaired};
pub use scanner::{discover, scan, DocumentRef, ScanOutcome};

/// Hex-encoded SHA-256 of a document's raw bytes
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
