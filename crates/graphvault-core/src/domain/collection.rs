//! Collections: the streaming unit of work
//!
//! A collection pairs a canonical path with a lazy, finite, ordered
//! stream of items delivered over a bounded channel, plus a completion
//! status reported exactly once. Producers (enumerators) fill the
//! channel; the snapshot layer drains it. The bounded buffer is the
//! backpressure mechanism: a slow consumer pauses producers naturally.

use std::fmt::{self, Display, Formatter};

use tokio::sync::mpsc;

use super::errors::DomainError;
use super::item::ItemStream;
use super::path::{Category, RepoPath};

/// Bounded buffer size for collection item channels.
pub const ITEM_CHANNEL_BUFFER: usize = 4;

/// Creates the bounded channel a collection streams its items through.
pub fn item_channel() -> (mpsc::Sender<ItemStream>, mpsc::Receiver<ItemStream>) {
    mpsc::channel(ITEM_CHANNEL_BUFFER)
}

/// Incremental state of a collection, derived from its path pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionState {
    /// Current path only: fully materialised in this backup.
    New,
    /// Same path as last backup: unchanged items sourced from the prior
    /// snapshot by path.
    NotMoved,
    /// Path changed: like `NotMoved`, but unchanged items copy from the
    /// prior location.
    Moved,
    /// Previous path only: prune the prior location, emit nothing.
    Deleted,
}

impl CollectionState {
    /// Derives the state from the (current, previous) path pair.
    pub fn derive(
        full: Option<&RepoPath>,
        prev: Option<&RepoPath>,
    ) -> Result<Self, DomainError> {
        match (full, prev) {
            (Some(_), None) => Ok(CollectionState::New),
            (Some(f), Some(p)) if f == p => Ok(CollectionState::NotMoved),
            (Some(_), Some(_)) => Ok(CollectionState::Moved),
            (None, Some(_)) => Ok(CollectionState::Deleted),
            (None, None) => Err(DomainError::ValidationFailed(
                "collection requires a current or previous path".to_string(),
            )),
        }
    }
}

/// Completion record reported once per collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub object_type: Category,
    pub items_processed: u64,
    pub items_failed: u64,
    pub bytes: u64,
    pub is_complete: bool,
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} processed, {} failed, {} bytes, complete={}",
            self.object_type, self.items_processed, self.items_failed, self.bytes, self.is_complete
        )
    }
}

/// Channel end a collection reports its completion status through.
pub type StatusSender = mpsc::UnboundedSender<Status>;

/// The unit of work between enumeration and snapshotting.
///
/// Implementations must guarantee:
/// - `take_items` yields the receiver at most once (streams are
///   non-restartable) and `None` thereafter and for `Deleted` collections;
/// - item IDs are unique within the collection and readers are non-null;
/// - the completion status is sent exactly once, after production ends.
pub trait Collection: Send {
    /// Canonical path of the collection in the new snapshot, absent for
    /// `Deleted` collections.
    fn full_path(&self) -> Option<&RepoPath>;

    /// Path the collection occupied in the previous snapshot, when known.
    fn previous_path(&self) -> Option<&RepoPath>;

    /// Incremental state; the default derives it from the path pair.
    fn state(&self) -> CollectionState {
        CollectionState::derive(self.full_path(), self.previous_path())
            .unwrap_or(CollectionState::New)
    }

    /// Takes ownership of the item stream.
    fn take_items(&mut self) -> Option<mpsc::Receiver<ItemStream>>;

    /// Item IDs deleted remotely since the prior snapshot. The
    /// hierarchy builder skips these when sourcing unchanged items from
    /// the prior snapshot for `Moved`/`NotMoved` collections.
    fn excluded_items(&self) -> &[String] {
        &[]
    }
}

/// Channel-backed [`Collection`] used by producers on both sides of the
/// snapshot: remote enumerators stream items in during backup, and the
/// snapshot store streams items out during restore.
pub struct StreamCollection {
    full_path: Option<RepoPath>,
    prev_path: Option<RepoPath>,
    excluded: Vec<String>,
    rx: Option<mpsc::Receiver<ItemStream>>,
}

impl StreamCollection {
    /// A live collection; the returned sender is the producer side of
    /// the bounded item channel.
    pub fn new(
        full_path: RepoPath,
        prev_path: Option<RepoPath>,
    ) -> (Self, mpsc::Sender<ItemStream>) {
        let (tx, rx) = item_channel();
        (
            Self {
                full_path: Some(full_path),
                prev_path,
                excluded: Vec::new(),
                rx: Some(rx),
            },
            tx,
        )
    }

    /// A tombstone for a folder deleted since the prior backup; emits
    /// nothing and prunes the prior path.
    pub fn tombstone(prev_path: RepoPath) -> Self {
        Self {
            full_path: None,
            prev_path: Some(prev_path),
            excluded: Vec::new(),
            rx: None,
        }
    }

    /// Records item IDs removed remotely since the prior snapshot.
    #[must_use]
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }
}

impl Collection for StreamCollection {
    fn full_path(&self) -> Option<&RepoPath> {
        self.full_path.as_ref()
    }

    fn previous_path(&self) -> Option<&RepoPath> {
        self.prev_path.as_ref()
    }

    fn take_items(&mut self) -> Option<mpsc::Receiver<ItemStream>> {
        self.rx.take()
    }

    fn excluded_items(&self) -> &[String] {
        &self.excluded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::path::{PathBuilder, Service};

    fn path(folder: &str) -> RepoPath {
        RepoPath::build(
            "t",
            "u",
            Service::Exchange,
            Category::Email,
            &PathBuilder::new().append(folder),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_state_derivation() {
        let a = path("Inbox");
        let b = path("Archive");

        assert_eq!(
            CollectionState::derive(Some(&a), None).unwrap(),
            CollectionState::New
        );
        assert_eq!(
            CollectionState::derive(Some(&a), Some(&a)).unwrap(),
            CollectionState::NotMoved
        );
        assert_eq!(
            CollectionState::derive(Some(&b), Some(&a)).unwrap(),
            CollectionState::Moved
        );
        assert_eq!(
            CollectionState::derive(None, Some(&a)).unwrap(),
            CollectionState::Deleted
        );
        assert!(CollectionState::derive(None, None).is_err());
    }

    #[test]
    fn test_status_display() {
        let status = Status {
            object_type: Category::Email,
            items_processed: 3,
            items_failed: 1,
            bytes: 42,
            is_complete: false,
        };
        assert_eq!(
            status.to_string(),
            "email: 3 processed, 1 failed, 42 bytes, complete=false"
        );
    }
}
