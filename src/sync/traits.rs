//! Caller-supplied collaborator interfaces.
//!
//! The engines own no persistent data. Events live in the caller's store
//! behind [`LocalEventProvider`] / [`SyncResultHandler`]; queued mutations
//! live behind [`PendingStore`]. Implementations may suspend (they are
//! async) and must be idempotent where documented.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ical::Event;
use crate::sync::push::PendingOperation;
use crate::sync::state::SyncState;

/// A stored event as the provider returns it.
#[derive(Debug, Clone)]
pub struct LocalEvent {
    pub event: Event,
    /// Modified locally since the last successful sync. Drives conflict
    /// candidacy during pulls.
    pub dirty: bool,
}

/// Read access to the caller's event store.
#[async_trait]
pub trait LocalEventProvider: Send + Sync {
    /// Every stored row of one calendar, each with a stable `import_id`.
    async fn get_local_events(&self, calendar_url: &str) -> anyhow::Result<Vec<LocalEvent>>;

    async fn get_event_by_import_id(&self, import_id: &str)
    -> anyhow::Result<Option<LocalEvent>>;
}

/// Write access to the caller's event store. Replaying the same calls must
/// yield the same final store state.
#[async_trait]
pub trait SyncResultHandler: Send + Sync {
    async fn upsert_event(
        &self,
        event: &Event,
        href: &str,
        etag: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn delete_event(&self, import_id: &str) -> anyhow::Result<()>;

    async fn save_sync_state(&self, state: &SyncState) -> anyhow::Result<()>;
}

/// Persistence of queued local mutations. The queue is the push engine's
/// exclusive data; the store may observe but not mutate it.
#[async_trait]
pub trait PendingStore: Send + Sync {
    async fn enqueue(&self, op: PendingOperation) -> anyhow::Result<()>;

    /// Operations with `status = pending` and `next_attempt <= now`, in
    /// insertion order, capped at `limit`.
    async fn get_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<PendingOperation>>;

    async fn update(&self, op: &PendingOperation) -> anyhow::Result<()>;

    async fn remove(&self, id: &str) -> anyhow::Result<()>;

    /// The non-terminal operation for `(calendar_url, uid)`, if any.
    async fn get_by_event_uid(
        &self,
        calendar_url: &str,
        uid: &str,
    ) -> anyhow::Result<Option<PendingOperation>>;

    /// Number of non-terminal operations.
    async fn count(&self) -> anyhow::Result<u64>;
}

/// Caller's decision when a pull detects concurrent modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    /// Apply the server version over local.
    UseRemote,
    /// Leave local untouched; the push engine sends it separately.
    UseLocal,
    /// Touch neither side; record the conflict in the report.
    Skip,
}

/// Conflict callback: `(local, server, base_etag)` → choice.
pub type ConflictCallback =
    Arc<dyn Fn(&Event, &Event, Option<&str>) -> ConflictChoice + Send + Sync>;
