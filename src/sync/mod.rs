//! Synchronization engines.
//!
//! Two coupled flows: a pull loop ([`pull::PullSyncEngine`]) reconciling
//! server state into the caller's store, and a push loop
//! ([`push::PushSyncEngine`]) draining locally queued mutations. Both
//! drive the CalDAV client through the [`crate::caldav::CalendarApi`]
//! seam and talk to caller-supplied stores ([`traits`]).
//!
//! Only one sync task per calendar URL runs at a time; both engines share
//! a [`SyncLocks`] registry of per-calendar mutexes.

pub mod pull;
pub mod push;
pub mod state;
pub mod traits;

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::webdav::DavError;

pub use pull::{PullSyncEngine, SyncReport};
pub use push::{
    ConflictStrategy, OperationKind, OperationStatus, PendingOperation, PushReport,
    PushSyncEngine,
};
pub use state::SyncState;
pub use traits::{
    ConflictCallback, ConflictChoice, LocalEvent, LocalEventProvider, PendingStore,
    SyncResultHandler,
};

/// Error classes a sync report accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncErrorKind {
    Authentication,
    ServerError,
    Network,
    Parse,
    Unknown,
}

/// One accumulated sync failure. A single entry never implies the whole
/// sync failed; see [`SyncReport::success`](pull::SyncReport).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub message: String,
}

impl SyncError {
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(SyncErrorKind::Parse, message)
    }
}

impl From<&DavError> for SyncErrorKind {
    fn from(err: &DavError) -> Self {
        match err {
            DavError::Network(_) => SyncErrorKind::Network,
            DavError::Parse { .. } => SyncErrorKind::Parse,
            DavError::Http { status, .. } => match *status {
                401 | 403 => SyncErrorKind::Authentication,
                500..=599 => SyncErrorKind::ServerError,
                _ => SyncErrorKind::Unknown,
            },
        }
    }
}

impl From<&DavError> for SyncError {
    fn from(err: &DavError) -> Self {
        SyncError::new(SyncErrorKind::from(err), err.to_string())
    }
}

/// Registry of per-calendar mutexes. Both engines take the same lock for a
/// calendar URL, so pull writes never interleave with push executions on
/// the same collection.
#[derive(Clone, Default)]
pub struct SyncLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SyncLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex of one calendar, creating it on first use.
    pub async fn acquire(&self, calendar_url: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().await;
            map.entry(calendar_url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}
