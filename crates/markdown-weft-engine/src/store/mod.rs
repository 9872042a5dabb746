//! Remote document storage.
//!
//! A [`ContentStore`] hands out file content together with an opaque
//! [`VersionToken`] and accepts writes only against the token the caller
//! last saw. A losing write is a [`WriteOutcome::Conflict`] carrying the
//! store's current state, never an error: conflict is an expected outcome
//! of concurrent editing, and the session layer resolves it.

use relative_path::{RelativePath, RelativePathBuf};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

mod fs;

pub use fs::{FsAttachments, FsStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("File not found: {0}")]
    NotFound(RelativePathBuf),
    #[error("Not authorized against the store")]
    Unauthorized,
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque per-file version identifier assigned by a store.
///
/// Compared for equality only; no ordering is implied and callers never
/// inspect the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionToken(String);

impl VersionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Fingerprint> for VersionToken {
    fn from(fingerprint: Fingerprint) -> Self {
        Self(fingerprint.to_string())
    }
}

/// A file as fetched from a store.
#[derive(Debug, Clone)]
pub struct RemoteFile {
    pub content: String,
    pub version: VersionToken,
    /// Character set the store reports for the file, `utf-8` when it has no
    /// opinion. Carried through a session so a save round-trips it.
    pub charset: String,
}

/// Result of a compare-and-swap write.
#[derive(Debug, Clone)]
pub enum WriteOutcome {
    /// The base token matched and the store accepted the write.
    Committed { version: VersionToken },
    /// Someone else wrote first. Carries what the store holds now so the
    /// caller can resolve without a second round trip.
    Conflict {
        current_version: VersionToken,
        current_content: String,
    },
}

/// Remote document storage with optimistic-concurrency writes.
pub trait ContentStore {
    fn read_file(&self, path: &RelativePath) -> Result<RemoteFile, StoreError>;

    /// Write `content` if the store's current version still matches
    /// `expected`. A mismatch reports as [`WriteOutcome::Conflict`], never
    /// as an error. `message` describes the change for stores that keep
    /// history.
    fn write_file(
        &self,
        path: &RelativePath,
        content: &str,
        expected: &VersionToken,
        message: &str,
    ) -> Result<WriteOutcome, StoreError>;

    /// Cheap check that the store is reachable and writable.
    fn authenticate(&self) -> Result<bool, StoreError>;
}

/// Sidecar storage for binary attachments (pasted or dropped images).
pub trait AttachmentStore {
    /// Persist `payload` near `document` and return the path to reference
    /// from markup. The suggested name is uniquified rather than
    /// overwritten when taken.
    fn save_attachment(
        &self,
        document: &RelativePath,
        suggested_name: &str,
        payload: &[u8],
    ) -> Result<RelativePathBuf, StoreError>;
}
