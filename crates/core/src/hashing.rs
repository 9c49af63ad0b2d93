//! Shared SHA-256 hex digest utilities.
//!
//! Used by the verification store for write verification and by the
//! `verify` command to re-check artifacts on disk.

use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}
