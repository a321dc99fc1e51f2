//! Caller-facing handles
//!
//! A [`Handle`] is one reference-counted claim on the result of a logical
//! asset request. Any number of handles share the one provider resolving
//! that request; each handle observes the terminal status, error, and
//! result exactly once through its completion cell.

use std::sync::Arc;

use bale_task::TaskStatus;
use parking_lot::Mutex;

/// What a caller asked the engine to produce from an asset location.
///
/// The kind is part of the deduplication key: loading one packed item,
/// the raw bundle bytes, and the whole container are distinct operations
/// even against the same underlying asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// The one packed item the asset location names
    Asset,
    /// The owning bundle's raw payload bytes, directory unparsed
    RawBundle,
    /// Every item packed in the owning bundle
    Container,
}

/// Deduplication key: one provider exists per distinct key at any time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    /// The request kind
    pub kind: RequestKind,
    /// Canonical asset path (not the alias the caller may have used)
    pub location: String,
}

/// The kind-specific payload a successful request resolves to.
#[derive(Debug, Clone)]
pub enum AssetResult {
    /// One packed item's bytes
    Asset(Arc<Vec<u8>>),
    /// The raw bundle payload
    RawBundle(Arc<Vec<u8>>),
    /// Every packed item, in pack order
    Container(Arc<Vec<(String, Vec<u8>)>>),
}

/// Terminal outcome delivered to a handle.
#[derive(Debug, Clone)]
pub(crate) struct Completion {
    pub status: TaskStatus,
    pub error: Option<String>,
    pub result: Option<AssetResult>,
}

/// Shared completion slot between a provider and one handle.
///
/// Written at most once; a handle attached after its provider already
/// finished is completed immediately at attach time.
#[derive(Debug, Default)]
pub(crate) struct HandleCell {
    completion: Mutex<Option<Completion>>,
}

impl HandleCell {
    pub(crate) fn complete(&self, completion: Completion) {
        let mut slot = self.completion.lock();
        if slot.is_none() {
            *slot = Some(completion);
        }
    }

    fn snapshot(&self) -> Option<Completion> {
        self.completion.lock().clone()
    }
}

/// One claim on a provider's result.
///
/// In strong mode a handle must be given back through
/// [`crate::ResourceManager::release_handle`]; in weak mode simply
/// dropping it is enough, and the manager's sweep notices on its next
/// update.
#[derive(Debug, Clone)]
pub struct Handle {
    key: ProviderKey,
    cell: Arc<HandleCell>,
}

impl Handle {
    pub(crate) fn new(key: ProviderKey, cell: Arc<HandleCell>) -> Self {
        Self { key, cell }
    }

    pub(crate) fn cell(&self) -> &Arc<HandleCell> {
        &self.cell
    }

    /// The deduplication key this handle is attached to.
    pub fn key(&self) -> &ProviderKey {
        &self.key
    }

    /// The request kind.
    pub fn kind(&self) -> RequestKind {
        self.key.kind
    }

    /// The canonical asset location.
    pub fn location(&self) -> &str {
        &self.key.location
    }

    /// Whether the request reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.cell.snapshot().is_some()
    }

    /// Terminal status, or `Running` while the request is in flight.
    pub fn status(&self) -> TaskStatus {
        self.cell
            .snapshot()
            .map_or(TaskStatus::Running, |c| c.status)
    }

    /// Whether the request finished successfully.
    pub fn succeeded(&self) -> bool {
        self.status() == TaskStatus::Succeeded
    }

    /// Terminal error message, if the request failed or was aborted.
    pub fn error(&self) -> Option<String> {
        self.cell.snapshot().and_then(|c| c.error)
    }

    /// The resolved payload of a successful request.
    pub fn result(&self) -> Option<AssetResult> {
        self.cell.snapshot().and_then(|c| c.result)
    }
}
