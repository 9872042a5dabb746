//! Document sessions.
//!
//! A [`DocumentSession`] owns one open document: the last markup adopted
//! from the store, the placeholder registry and render tree built from it,
//! and the candidate markup produced by edits. Saving is optimistic: the
//! session remembers the version token it read, submits it with the write,
//! and a token mismatch comes back as a [`SaveOutcome::Conflict`] for the
//! caller to resolve. A conflict is an outcome, not an error, and the
//! session never resolves one on its own.
//!
//! The state machine is `Clean -> Dirty -> Saving -> {Clean | Conflict}`.
//! Conflict offers three ways out: [`DocumentSession::overwrite`] adopts the
//! winning token and resubmits the local candidate, [`DocumentSession::reload`]
//! drops the candidate and re-opens from the store, and cancelling is simply
//! taking no action and continuing to edit.
//!
//! Saves can be driven in two phases ([`DocumentSession::begin_save`] /
//! [`DocumentSession::finish_save`]) for hosts whose store calls suspend, or
//! in one call ([`DocumentSession::save`]) against a blocking store. A
//! finished save is applied only if its captured base token still matches
//! the session's current one, so a result arriving after a reload is
//! discarded as [`SaveOutcome::Superseded`] instead of clobbering state.

use relative_path::{RelativePath, RelativePathBuf};
use serde::{Deserialize, Serialize};

use crate::direction::{self, DirectionOptions};
use crate::fingerprint::Fingerprint;
use crate::parsing::parse_markup;
use crate::placeholder::{
    FenceStyle, PlaceholderId, PlaceholderKind, PlaceholderRef, PlaceholderRegistry,
};
use crate::serialize::{SerializeOptions, serialize};
use crate::store::{ContentStore, RemoteFile, StoreError, VersionToken, WriteOutcome};
use crate::tree::RenderTree;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Nothing to save: session is clean")]
    NothingToSave,
    #[error("A save is already in flight")]
    SaveInFlight,
    #[error("No conflict to resolve")]
    NoConflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where a session stands relative to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Local content matches the last adopted remote version.
    Clean,
    /// Local edits exist that the store has not seen.
    Dirty,
    /// A save is in flight; no second save may start.
    Saving,
    /// The last save lost a race; the caller must decide how to resolve.
    Conflict,
}

/// Markup text plus the properties derived from it on adoption.
#[derive(Debug, Clone)]
pub struct MarkupDocument {
    pub text: String,
    pub charset: String,
    pub fingerprint: Fingerprint,
    /// Whether the content heuristics classified this document as
    /// right-to-left.
    pub rtl: bool,
}

impl MarkupDocument {
    pub fn new(text: String, charset: String, direction: &DirectionOptions) -> Self {
        let fingerprint = Fingerprint::of(&text);
        let rtl = direction::detect(&text, direction);
        Self {
            text,
            charset,
            fingerprint,
            rtl,
        }
    }
}

/// Everything a store needs to perform one optimistic write.
#[derive(Debug, Clone)]
pub struct SaveAttempt {
    pub base_version: VersionToken,
    pub candidate_markup: String,
    pub commit_message: String,
}

/// What the store held when a save lost its race.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResult {
    pub remote_version: VersionToken,
    pub remote_content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Committed { version: VersionToken },
    Conflict(ConflictResult),
    /// The session moved past this save (for example a reload finished
    /// first); the result was discarded.
    Superseded,
}

/// How the session responded to an external-change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalChange {
    /// Same content we already hold; nothing to do.
    Ignored,
    /// Session was clean, so the remote content was adopted.
    Reloaded,
    /// Local edits exist; adopting silently would lose them, so the caller
    /// must decide.
    Deferred,
}

/// Per-session knobs, fixed at open time.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub direction: DirectionOptions,
    pub serialize: SerializeOptions,
    /// Fence family for placeholder blocks created through
    /// [`DocumentSession::insert_placeholder`].
    pub new_block_fence: FenceStyle,
}

pub struct DocumentSession {
    path: RelativePathBuf,
    document: MarkupDocument,
    remote_version: VersionToken,
    registry: PlaceholderRegistry,
    tree: RenderTree,
    /// Serialized form of the latest edited tree; `None` while no edit has
    /// changed the content.
    candidate: Option<String>,
    /// Fingerprint of the serialized form of the current content, candidate
    /// or baseline. Compared against fresh serializations to tell real
    /// edits from no-ops.
    content_fp: Fingerprint,
    state: SessionState,
    conflict: Option<ConflictResult>,
    options: SessionOptions,
}

impl DocumentSession {
    /// Open `path` from the store and build the initial render tree.
    pub fn open(
        store: &impl ContentStore,
        path: RelativePathBuf,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let remote = store.read_file(&path)?;
        Ok(Self::from_remote(path, remote, options))
    }

    /// Build a session from already-fetched content.
    pub fn from_remote(path: RelativePathBuf, remote: RemoteFile, options: SessionOptions) -> Self {
        let mut session = Self {
            path,
            document: MarkupDocument::new(String::new(), "utf-8".to_string(), &options.direction),
            remote_version: remote.version.clone(),
            registry: PlaceholderRegistry::new(),
            tree: RenderTree::new(),
            candidate: None,
            content_fp: Fingerprint::of(""),
            state: SessionState::Clean,
            conflict: None,
            options,
        };
        session.adopt_remote(remote);
        session
    }

    pub fn path(&self) -> &RelativePath {
        &self.path
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn render_tree(&self) -> &RenderTree {
        &self.tree
    }

    pub fn registry(&self) -> &PlaceholderRegistry {
        &self.registry
    }

    pub fn document(&self) -> &MarkupDocument {
        &self.document
    }

    pub fn remote_version(&self) -> &VersionToken {
        &self.remote_version
    }

    pub fn conflict(&self) -> Option<&ConflictResult> {
        self.conflict.as_ref()
    }

    /// The markup a save would submit right now.
    pub fn markup(&self) -> &str {
        self.candidate.as_deref().unwrap_or(&self.document.text)
    }

    /// Adopt an edited render tree from the editing surface.
    ///
    /// Serializes it, and only a changed fingerprint marks the session
    /// dirty; handing back an unchanged tree (focus loss with no real edit)
    /// is a no-op. Returns whether the content changed.
    pub fn apply_tree(&mut self, tree: RenderTree) -> bool {
        let markup = self.render_markup(&tree);
        self.tree = tree;
        self.adopt_candidate(markup)
    }

    /// Replace the source of a placeholder block (the surface edited a
    /// diagram or formula body). Returns false for an unknown id.
    pub fn update_placeholder(&mut self, id: PlaceholderId, source: &str) -> bool {
        if !self.registry.update(id, source) {
            return false;
        }
        let markup = self.render_markup(&self.tree);
        self.adopt_candidate(markup);
        true
    }

    /// Register a new placeholder block in the session's preferred fence
    /// family. The returned reference becomes content once the surface
    /// hands back a tree containing it.
    pub fn insert_placeholder(&mut self, kind: PlaceholderKind, source: &str) -> PlaceholderRef {
        self.registry
            .insert(kind, self.options.new_block_fence, source)
    }

    /// Start a save. Valid from `Dirty` (normal case) and `Conflict`
    /// (retry); any result must be fed back through [`Self::finish_save`].
    pub fn begin_save(&mut self, message: &str) -> Result<SaveAttempt, SessionError> {
        match self.state {
            SessionState::Saving => Err(SessionError::SaveInFlight),
            SessionState::Clean => Err(SessionError::NothingToSave),
            SessionState::Dirty | SessionState::Conflict => {
                let candidate = self
                    .candidate
                    .clone()
                    .unwrap_or_else(|| self.document.text.clone());
                self.state = SessionState::Saving;
                Ok(SaveAttempt {
                    base_version: self.remote_version.clone(),
                    candidate_markup: candidate,
                    commit_message: message.to_string(),
                })
            }
        }
    }

    /// Apply the store's answer to a save started with [`Self::begin_save`].
    ///
    /// The attempt's captured base token must still match the session's
    /// current one; otherwise the session has moved on (a reload won the
    /// race) and the result is discarded.
    pub fn finish_save(&mut self, attempt: &SaveAttempt, outcome: WriteOutcome) -> SaveOutcome {
        if self.state != SessionState::Saving || attempt.base_version != self.remote_version {
            log::info!(
                "discarding stale save result for {}: base {} no longer current",
                self.path,
                attempt.base_version
            );
            return SaveOutcome::Superseded;
        }
        match outcome {
            WriteOutcome::Committed { version } => {
                self.document = MarkupDocument::new(
                    attempt.candidate_markup.clone(),
                    self.document.charset.clone(),
                    &self.options.direction,
                );
                self.remote_version = version.clone();
                self.conflict = None;
                if self.content_fp == self.document.fingerprint {
                    self.candidate = None;
                    self.state = SessionState::Clean;
                } else {
                    // edits arrived while the save was in flight; they are
                    // the next candidate
                    self.state = SessionState::Dirty;
                }
                SaveOutcome::Committed { version }
            }
            WriteOutcome::Conflict {
                current_version,
                current_content,
            } => {
                let conflict = ConflictResult {
                    remote_version: current_version,
                    remote_content: current_content,
                };
                self.conflict = Some(conflict.clone());
                self.state = SessionState::Conflict;
                SaveOutcome::Conflict(conflict)
            }
        }
    }

    /// Roll back a save whose store call failed outright. Local edits stay;
    /// the session returns to the state the save started from.
    pub fn abort_save(&mut self) {
        if self.state == SessionState::Saving {
            self.state = if self.conflict.is_some() {
                SessionState::Conflict
            } else {
                SessionState::Dirty
            };
        }
    }

    /// Drive a whole save against a blocking store.
    pub fn save(
        &mut self,
        store: &impl ContentStore,
        message: &str,
    ) -> Result<SaveOutcome, SessionError> {
        let attempt = self.begin_save(message)?;
        self.submit(store, attempt)
    }

    /// Resolve a conflict by adopting the winning version token as the new
    /// base and resubmitting the same local candidate, discarding the
    /// remote edit. Returns the attempt for two-phase hosts.
    pub fn overwrite(&mut self, message: &str) -> Result<SaveAttempt, SessionError> {
        let conflict = self.conflict.take().ok_or(SessionError::NoConflict)?;
        self.remote_version = conflict.remote_version;
        self.begin_save(message)
    }

    /// Drive [`Self::overwrite`] against a blocking store.
    pub fn resolve_overwrite(
        &mut self,
        store: &impl ContentStore,
        message: &str,
    ) -> Result<SaveOutcome, SessionError> {
        let attempt = self.overwrite(message)?;
        self.submit(store, attempt)
    }

    /// Resolve a conflict (or just refresh) by discarding local edits and
    /// re-opening from the store.
    pub fn reload(&mut self, store: &impl ContentStore) -> Result<(), SessionError> {
        let remote = store.read_file(&self.path)?;
        self.adopt_remote(remote);
        Ok(())
    }

    /// The store reports the file changed underneath us. Clean sessions
    /// adopt the new content; sessions holding local edits defer to the
    /// caller rather than losing them silently.
    pub fn handle_external_change(&mut self, remote: RemoteFile) -> ExternalChange {
        if Fingerprint::of(&remote.content) == self.document.fingerprint {
            return ExternalChange::Ignored;
        }
        match self.state {
            SessionState::Clean => {
                self.adopt_remote(remote);
                ExternalChange::Reloaded
            }
            _ => {
                log::info!(
                    "deferring external change to {}: local edits exist",
                    self.path
                );
                ExternalChange::Deferred
            }
        }
    }

    fn submit(
        &mut self,
        store: &impl ContentStore,
        attempt: SaveAttempt,
    ) -> Result<SaveOutcome, SessionError> {
        match store.write_file(
            &self.path,
            &attempt.candidate_markup,
            &attempt.base_version,
            &attempt.commit_message,
        ) {
            Ok(outcome) => Ok(self.finish_save(&attempt, outcome)),
            Err(err) => {
                self.abort_save();
                Err(err.into())
            }
        }
    }

    /// Serialize `tree`, then run the registry's reinjection pass over the
    /// result. The serializer resolves placeholder nodes itself; the pass
    /// restores marker lines that rode through parsing as literal text, so
    /// no marker reaches the store.
    fn render_markup(&self, tree: &RenderTree) -> String {
        let serialized = serialize(tree, &self.registry, &self.options.serialize);
        self.registry.reinject(&serialized)
    }

    fn adopt_remote(&mut self, remote: RemoteFile) {
        let (stripped, registry) = PlaceholderRegistry::extract(&remote.content);
        self.tree = parse_markup(&stripped);
        self.registry = registry;
        // the no-op baseline is the canonical serialization, not the raw
        // remote bytes, so a first unedited tree never reads as dirty
        let baseline = self.render_markup(&self.tree);
        self.content_fp = Fingerprint::of(&baseline);
        self.document =
            MarkupDocument::new(remote.content, remote.charset, &self.options.direction);
        self.remote_version = remote.version;
        self.candidate = None;
        self.conflict = None;
        self.state = SessionState::Clean;
        log::info!("loaded {} at version {}", self.path, self.remote_version);
    }

    fn adopt_candidate(&mut self, markup: String) -> bool {
        let fingerprint = Fingerprint::of(&markup);
        if fingerprint == self.content_fp {
            return false;
        }
        self.candidate = Some(markup);
        self.content_fp = fingerprint;
        if self.state == SessionState::Clean {
            self.state = SessionState::Dirty;
        }
        true
    }
}
