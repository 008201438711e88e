//! Content fingerprints for change and copy detection.
//!
//! MD5 is used as an opaque fingerprint only; it must match what the remote
//! server stores, not resist collisions.

use std::path::Path;

use crate::error::{io_err, CoreError};

/// Hex digest of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", md5::compute(bytes))
}

/// Hex digest of the file at `path`.
pub fn hash_file(path: &Path) -> Result<String, CoreError> {
    let bytes = std::fs::read(path).map_err(|e| io_err(path, e))?;
    Ok(hash_bytes(&bytes))
}
