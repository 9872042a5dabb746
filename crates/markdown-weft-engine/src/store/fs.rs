//! Local-directory store.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use relative_path::{RelativePath, RelativePathBuf};

use super::{AttachmentStore, ContentStore, RemoteFile, StoreError, VersionToken, WriteOutcome};
use crate::fingerprint::Fingerprint;

/// [`ContentStore`] over a directory on the local filesystem.
///
/// Version tokens are content fingerprints. The compare step re-reads the
/// file, so an edit made by anything else since the last read surfaces as a
/// conflict exactly like a second writer would.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_current(&self, path: &RelativePath) -> Result<String, StoreError> {
        match fs::read_to_string(path.to_path(&self.root)) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(path.to_owned()))
            }
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                Err(StoreError::Unauthorized)
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

impl ContentStore for FsStore {
    fn read_file(&self, path: &RelativePath) -> Result<RemoteFile, StoreError> {
        let content = self.read_current(path)?;
        let version = VersionToken::from(Fingerprint::of(&content));
        Ok(RemoteFile {
            content,
            version,
            charset: "utf-8".to_string(),
        })
    }

    fn write_file(
        &self,
        path: &RelativePath,
        content: &str,
        expected: &VersionToken,
        message: &str,
    ) -> Result<WriteOutcome, StoreError> {
        match self.read_current(path) {
            Ok(current) => {
                let current_version = VersionToken::from(Fingerprint::of(&current));
                if &current_version != expected {
                    return Ok(WriteOutcome::Conflict {
                        current_version,
                        current_content: current,
                    });
                }
            }
            // a path nobody has written yet cannot conflict
            Err(StoreError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        let absolute = path.to_path(&self.root);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&absolute, content)?;
        log::debug!("wrote {path}: {message}");
        Ok(WriteOutcome::Committed {
            version: VersionToken::from(Fingerprint::of(content)),
        })
    }

    fn authenticate(&self) -> Result<bool, StoreError> {
        match fs::metadata(&self.root) {
            Ok(meta) => Ok(meta.is_dir() && !meta.permissions().readonly()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io(err)),
        }
    }
}

/// [`AttachmentStore`] writing into a hidden sidecar directory next to the
/// document: `a/b/page.md` gets `a/b/.attachments/.page/`.
pub struct FsAttachments {
    root: PathBuf,
}

impl FsAttachments {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AttachmentStore for FsAttachments {
    fn save_attachment(
        &self,
        document: &RelativePath,
        suggested_name: &str,
        payload: &[u8],
    ) -> Result<RelativePathBuf, StoreError> {
        let stem = document.file_stem().unwrap_or("untitled");
        let parent = document.parent().unwrap_or_else(|| RelativePath::new(""));
        let dir = parent.join(format!(".attachments/.{stem}"));
        fs::create_dir_all(dir.to_path(&self.root))?;

        let (base, extension) = split_name(suggested_name);
        let mut candidate = dir.join(suggested_name);
        let mut counter = 1;
        while candidate.to_path(&self.root).exists() {
            let renamed = if extension.is_empty() {
                format!("{base}_{counter}")
            } else {
                format!("{base}_{counter}.{extension}")
            };
            candidate = dir.join(renamed);
            counter += 1;
        }

        fs::write(candidate.to_path(&self.root), payload)?;
        log::debug!("saved attachment {candidate} for {document}");
        Ok(candidate)
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((base, extension)) if !base.is_empty() => (base, extension),
        _ => (name, ""),
    }
}
