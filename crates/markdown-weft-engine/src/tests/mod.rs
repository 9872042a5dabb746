//! Shared test support.

use std::cell::RefCell;
use std::collections::HashMap;

use relative_path::{RelativePath, RelativePathBuf};

use crate::fingerprint::Fingerprint;
use crate::store::{ContentStore, RemoteFile, StoreError, VersionToken, WriteOutcome};

/// In-memory [`ContentStore`] with fingerprint version tokens. Seeding and
/// one-shot error injection make the session state machine drivable without
/// touching a filesystem.
pub struct MemoryStore {
    files: RefCell<HashMap<RelativePathBuf, String>>,
    failure: RefCell<Option<StoreError>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            files: RefCell::new(HashMap::new()),
            failure: RefCell::new(None),
        }
    }

    /// Put content at `path` bypassing version checks; this is also how an
    /// external writer is simulated.
    pub fn seed(&self, path: &str, content: &str) {
        self.files
            .borrow_mut()
            .insert(RelativePathBuf::from(path), content.to_string());
    }

    pub fn content(&self, path: &str) -> Option<String> {
        self.files.borrow().get(RelativePath::new(path)).cloned()
    }

    /// Make the next store call fail with `err`.
    pub fn fail_next(&self, err: StoreError) {
        *self.failure.borrow_mut() = Some(err);
    }

    fn take_failure(&self) -> Option<StoreError> {
        self.failure.borrow_mut().take()
    }
}

impl ContentStore for MemoryStore {
    fn read_file(&self, path: &RelativePath) -> Result<RemoteFile, StoreError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let files = self.files.borrow();
        let content = files
            .get(path)
            .ok_or_else(|| StoreError::NotFound(path.to_owned()))?;
        Ok(RemoteFile {
            content: content.clone(),
            version: VersionToken::from(Fingerprint::of(content)),
            charset: "utf-8".to_string(),
        })
    }

    fn write_file(
        &self,
        path: &RelativePath,
        content: &str,
        expected: &VersionToken,
        _message: &str,
    ) -> Result<WriteOutcome, StoreError> {
        if let Some(err) = self.take_failure() {
            return Err(err);
        }
        let mut files = self.files.borrow_mut();
        if let Some(current) = files.get(path) {
            let current_version = VersionToken::from(Fingerprint::of(current));
            if &current_version != expected {
                return Ok(WriteOutcome::Conflict {
                    current_version,
                    current_content: current.clone(),
                });
            }
        }
        files.insert(path.to_owned(), content.to_string());
        Ok(WriteOutcome::Committed {
            version: VersionToken::from(Fingerprint::of(content)),
        })
    }

    fn authenticate(&self) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[cfg(test)]
mod memory_store {
    use super::*;

    #[test]
    fn stale_token_conflicts() {
        let store = MemoryStore::new();
        store.seed("a.md", "one\n");
        let stale = store.read_file(RelativePath::new("a.md")).unwrap().version;
        store.seed("a.md", "two\n");

        let outcome = store
            .write_file(RelativePath::new("a.md"), "mine\n", &stale, "edit")
            .unwrap();
        assert!(matches!(outcome, WriteOutcome::Conflict { .. }));
        assert_eq!(store.content("a.md").unwrap(), "two\n");
    }

    #[test]
    fn injected_failure_fires_once() {
        let store = MemoryStore::new();
        store.seed("a.md", "one\n");
        store.fail_next(StoreError::Unavailable("down".to_string()));

        assert!(store.read_file(RelativePath::new("a.md")).is_err());
        assert!(store.read_file(RelativePath::new("a.md")).is_ok());
    }
}
