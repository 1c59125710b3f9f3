// Session state module
//
// This module provides the session phase machine and the EventBus that
// broadcasts session changes to whoever drives the interactive surface.

use camino::Utf8PathBuf;
use std::fmt;
use tokio::sync::broadcast;

/// Lifecycle of a folder session
///
/// `Closed -> Locking -> Scanning -> Resolving -> Ready -> Closed`. A failure
/// in any of the opening phases drops straight back to `Closed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    /// No folder open, no records, no lock held
    #[default]
    Closed,
    /// Acquiring the folder lock
    Locking,
    /// Enumerating picture files
    Scanning,
    /// Merging saved progress and resolving capture times
    Resolving,
    /// Interactive
    Ready,
}

impl SessionPhase {
    /// Whether `next` is a legal successor of this phase
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Closed, Locking)
                | (Locking, Scanning)
                | (Scanning, Resolving)
                | (Resolving, Ready)
                | (Ready, Scanning)
                | (Locking | Scanning | Resolving | Ready, Closed)
        )
    }

    /// Whether the session is somewhere between `Closed` and `Ready`
    pub fn is_opening(self) -> bool {
        matches!(
            self,
            SessionPhase::Locking | SessionPhase::Scanning | SessionPhase::Resolving
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Closed => "closed",
            SessionPhase::Locking => "locking",
            SessionPhase::Scanning => "scanning",
            SessionPhase::Resolving => "resolving",
            SessionPhase::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Long-running batch kinds that report incremental progress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchOperation {
    ResolveTimestamps,
    Export,
    Rename,
}

/// One step of a batch operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    pub operation: BatchOperation,
    /// 1-based position of the item just processed
    pub current: usize,
    pub total: usize,
    pub file_name: String,
}

/// Events emitted while a session changes
///
/// These let a front end follow the session without polling it.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
    },

    FolderOpened {
        folder: Utf8PathBuf,
        records: usize,
    },

    FolderClosed {
        folder: Utf8PathBuf,
    },

    /// Selection flag of one or more records changed
    SelectionChanged {
        selected: usize,
        total: usize,
    },

    /// The sidecar was written (`backup` is true if the old one was kept)
    ProgressSaved {
        backup: bool,
    },

    /// Saving failed; the in-memory state was kept
    SaveFailed {
        message: String,
    },

    /// The set of decoded images changed
    CacheUpdated {
        resident: Vec<String>,
    },

    BatchProgress(BatchProgress),
}

/// Broadcast channel for [`SessionEvent`]s
///
/// Sending never fails from the caller's point of view; events sent while
/// nobody listens are dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus buffering up to 100 events per subscriber
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers that received the event
    pub fn emit(&self, event: SessionEvent) -> usize {
        // No listeners is fine
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
