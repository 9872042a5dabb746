//! Content fingerprinting.
//!
//! Every change decision in the engine (did an edit really change anything,
//! did the remote file move under us, is this external-change notification
//! stale) reduces to comparing fingerprints of whole documents. The digest is
//! CRC32 over the full byte sequence: deterministic, stable across platforms
//! and runs, cheap enough to recompute on every edit, and collision-tolerant
//! for change detection. It is not a security primitive.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Deterministic digest of document text.
///
/// Displays as fixed-width lowercase hex, which is also the form used as the
/// filesystem store's version token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(u32);

impl Fingerprint {
    /// Compute the fingerprint of `text`.
    pub fn of(text: &str) -> Self {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(text.as_bytes());
        Self(hasher.finalize())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
