//! The push synchronization engine.
//!
//! Local mutations are queued as [`PendingOperation`]s in the caller's
//! [`PendingStore`]. Enqueueing coalesces redundant operations so the
//! queue never holds more than one live operation per `(calendar, uid)`.
//! The push loop drains eligible operations in insertion order, serially
//! within a calendar and across up to four calendars in parallel, retrying
//! transient failures with jittered exponential backoff and resolving
//! HTTP 412 precondition conflicts under a configurable strategy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, stream::FuturesUnordered};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::caldav::{CalDavClient, CalendarApi, FetchedEvent};
use crate::ical::{Codec, Event};
use crate::sync::traits::{PendingStore, SyncResultHandler};
use crate::sync::{SyncError, SyncErrorKind, SyncLocks};
use crate::webdav::DavResult;

/// Operations a queue entry can describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// Queue entry lifecycle. `Failed` is terminal; `ConflictPending` is
/// terminal until a resolution strategy settles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Pending,
    InProgress,
    Failed,
    ConflictPending,
}

/// One queued local mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOperation {
    pub id: String,
    pub calendar_url: String,
    pub event_uid: String,
    /// Resource URL once known; creates derive it from the UID.
    pub event_href: Option<String>,
    pub kind: OperationKind,
    pub status: OperationStatus,
    /// Serialized iCalendar body; absent for deletes.
    pub ical_body: Option<String>,
    /// Last-known etag for `If-Match`.
    pub etag: Option<String>,
    pub retry_count: u32,
    pub next_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl PendingOperation {
    fn base(
        calendar_url: impl Into<String>,
        event_uid: impl Into<String>,
        kind: OperationKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            calendar_url: calendar_url.into(),
            event_uid: event_uid.into(),
            event_href: None,
            kind,
            status: OperationStatus::Pending,
            ical_body: None,
            etag: None,
            retry_count: 0,
            next_attempt: None,
            error_message: None,
        }
    }

    pub fn create(
        calendar_url: impl Into<String>,
        event_uid: impl Into<String>,
        ical_body: impl Into<String>,
    ) -> Self {
        Self {
            ical_body: Some(ical_body.into()),
            ..Self::base(calendar_url, event_uid, OperationKind::Create)
        }
    }

    pub fn update(
        calendar_url: impl Into<String>,
        event_uid: impl Into<String>,
        event_href: Option<String>,
        ical_body: impl Into<String>,
        etag: Option<String>,
    ) -> Self {
        Self {
            event_href,
            ical_body: Some(ical_body.into()),
            etag,
            ..Self::base(calendar_url, event_uid, OperationKind::Update)
        }
    }

    pub fn delete(
        calendar_url: impl Into<String>,
        event_uid: impl Into<String>,
        event_href: Option<String>,
        etag: Option<String>,
    ) -> Self {
        Self {
            event_href,
            etag,
            ..Self::base(calendar_url, event_uid, OperationKind::Delete)
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status == OperationStatus::Failed
    }
}

/// How HTTP 412 precondition conflicts are settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStrategy {
    /// Fetch the current server version and apply it locally.
    #[default]
    ServerWins,
    /// Only meaningful for deletes (reissue without `If-Match`); updates
    /// are rejected because a silent clobber needs a caller-driven re-read.
    LocalWins,
    /// Higher `SEQUENCE` wins; ties go to the later `DTSTAMP`, then the
    /// server.
    NewestWins,
    /// Park the operation for the caller to settle.
    Manual,
}

/// Outcome summary of one push run.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    pub attempted: usize,
    pub completed: usize,
    pub failed: usize,
    pub conflicts: usize,
    /// Operations pushed back into the queue for a later attempt.
    pub rescheduled: usize,
    pub errors: Vec<SyncError>,
    pub cancelled: bool,
}

enum OpOutcome {
    Completed,
    Rescheduled,
    Failed,
    Conflict,
}

pub struct PushSyncEngine {
    api: Arc<dyn CalendarApi>,
    store: Arc<dyn PendingStore>,
    handler: Arc<dyn SyncResultHandler>,
    locks: SyncLocks,
    codec: Codec,
    strategy: ConflictStrategy,
    retry_ceiling: u32,
    max_parallel_calendars: usize,
    batch_limit: usize,
}

impl PushSyncEngine {
    pub fn new(
        api: Arc<dyn CalendarApi>,
        store: Arc<dyn PendingStore>,
        handler: Arc<dyn SyncResultHandler>,
    ) -> Self {
        Self {
            api,
            store,
            handler,
            locks: SyncLocks::new(),
            codec: Codec::default(),
            strategy: ConflictStrategy::default(),
            retry_ceiling: 5,
            max_parallel_calendars: 4,
            batch_limit: 100,
        }
    }

    pub fn with_locks(mut self, locks: SyncLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    /// Queue a local mutation, coalescing against any live operation for
    /// the same `(calendar_url, uid)` so the queue invariant holds.
    pub async fn enqueue(&self, op: PendingOperation) -> anyhow::Result<()> {
        let existing = self
            .store
            .get_by_event_uid(&op.calendar_url, &op.event_uid)
            .await?;

        let Some(mut live) = existing.filter(|p| !p.is_terminal()) else {
            return self.store.enqueue(op).await;
        };

        match (live.kind, op.kind) {
            // A create followed by edits is still a single create.
            (OperationKind::Create, OperationKind::Update)
            | (OperationKind::Create, OperationKind::Create) => {
                live.ical_body = op.ical_body;
                live.status = OperationStatus::Pending;
                live.error_message = None;
                self.store.update(&live).await
            }
            // Created locally, deleted before it ever reached the server:
            // nothing to do remotely.
            (OperationKind::Create, OperationKind::Delete) => {
                debug!(uid = %live.event_uid, "create cancelled by delete before push");
                self.store.remove(&live.id).await
            }
            (OperationKind::Update, OperationKind::Update)
            | (OperationKind::Update, OperationKind::Create) => {
                live.ical_body = op.ical_body;
                live.status = OperationStatus::Pending;
                live.error_message = None;
                self.store.update(&live).await
            }
            (OperationKind::Update, OperationKind::Delete) => {
                live.kind = OperationKind::Delete;
                live.ical_body = None;
                live.etag = op.etag.or(live.etag.take());
                live.event_href = op.event_href.or(live.event_href.take());
                live.status = OperationStatus::Pending;
                live.error_message = None;
                self.store.update(&live).await
            }
            // Resurrection: any new operation replaces a queued delete.
            (OperationKind::Delete, _) => {
                live.kind = op.kind;
                live.ical_body = op.ical_body;
                live.etag = op.etag;
                live.event_href = op.event_href.or(live.event_href.take());
                live.status = OperationStatus::Pending;
                live.retry_count = 0;
                live.next_attempt = None;
                live.error_message = None;
                self.store.update(&live).await
            }
        }
    }

    /// Drain every eligible operation once: serial within a calendar,
    /// parallel across calendars up to the pool size.
    pub async fn push_all(&self, cancel: &CancellationToken) -> PushReport {
        let mut report = PushReport::default();

        let eligible = match self.store.get_eligible(Utc::now(), self.batch_limit).await {
            Ok(ops) => ops,
            Err(err) => {
                report
                    .errors
                    .push(SyncError::new(SyncErrorKind::Unknown, err.to_string()));
                return report;
            }
        };
        if eligible.is_empty() {
            report.cancelled = cancel.is_cancelled();
            return report;
        }

        // Group per calendar, preserving insertion order within each.
        let mut per_calendar: Vec<(String, Vec<PendingOperation>)> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for op in eligible {
            match index.get(&op.calendar_url) {
                Some(&i) => per_calendar[i].1.push(op),
                None => {
                    index.insert(op.calendar_url.clone(), per_calendar.len());
                    per_calendar.push((op.calendar_url.clone(), vec![op]));
                }
            }
        }

        let pool = Arc::new(Semaphore::new(self.max_parallel_calendars.max(1)));
        let mut tasks = FuturesUnordered::new();
        for (calendar_url, ops) in per_calendar {
            let pool = pool.clone();
            tasks.push(async move {
                let _permit = pool.acquire().await.expect("semaphore closed");
                self.push_calendar(&calendar_url, ops, cancel).await
            });
        }

        while let Some(partial) = tasks.next().await {
            report.attempted += partial.attempted;
            report.completed += partial.completed;
            report.failed += partial.failed;
            report.conflicts += partial.conflicts;
            report.rescheduled += partial.rescheduled;
            report.errors.extend(partial.errors);
            report.cancelled |= partial.cancelled;
        }
        info!(
            attempted = report.attempted,
            completed = report.completed,
            failed = report.failed,
            conflicts = report.conflicts,
            "push finished"
        );
        report
    }

    async fn push_calendar(
        &self,
        calendar_url: &str,
        ops: Vec<PendingOperation>,
        cancel: &CancellationToken,
    ) -> PushReport {
        let mut report = PushReport::default();
        let _guard = self.locks.acquire(calendar_url).await;

        for op in ops {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.attempted += 1;
            match self.execute_one(op).await {
                Ok(OpOutcome::Completed) => report.completed += 1,
                Ok(OpOutcome::Rescheduled) => report.rescheduled += 1,
                Ok(OpOutcome::Failed) => report.failed += 1,
                Ok(OpOutcome::Conflict) => report.conflicts += 1,
                Err(err) => {
                    report.failed += 1;
                    report
                        .errors
                        .push(SyncError::new(SyncErrorKind::Unknown, err.to_string()));
                }
            }
        }
        report
    }

    fn resource_url(&self, op: &PendingOperation) -> DavResult<String> {
        match &op.event_href {
            Some(href) => Ok(href.clone()),
            None => CalDavClient::event_url(&op.calendar_url, &op.event_uid),
        }
    }

    /// Execute one operation against the server and settle its queue
    /// entry.
    async fn execute_one(&self, mut op: PendingOperation) -> anyhow::Result<OpOutcome> {
        op.status = OperationStatus::InProgress;
        self.store.update(&op).await?;

        let result = self.dispatch(&mut op).await;

        match result {
            Ok(()) => {
                self.store.remove(&op.id).await?;
                Ok(OpOutcome::Completed)
            }
            Err(err) if err.is_precondition_failed() => {
                op.status = OperationStatus::ConflictPending;
                op.error_message = Some(err.to_string());
                self.store.update(&op).await?;
                self.resolve_conflict(op).await
            }
            Err(err) if err.is_retryable() => {
                op.retry_count += 1;
                if op.retry_count <= self.retry_ceiling {
                    op.status = OperationStatus::Pending;
                    op.next_attempt = Some(Utc::now() + backoff(op.retry_count));
                    op.error_message = Some(err.to_string());
                    warn!(
                        uid = %op.event_uid,
                        retry = op.retry_count,
                        "transient push failure, rescheduled"
                    );
                    self.store.update(&op).await?;
                    Ok(OpOutcome::Rescheduled)
                } else {
                    self.fail(op, format!("retries exhausted: {err}")).await
                }
            }
            // Remaining 4xx (and parse damage) are permanent for this body.
            Err(err) => self.fail(op, err.to_string()).await,
        }
    }

    /// Run the wire operation for `op`; success applies server-returned
    /// coordinates to the local store.
    async fn dispatch(&self, op: &mut PendingOperation) -> DavResult<()> {
        match op.kind {
            OperationKind::Create => {
                let body = op.ical_body.clone().unwrap_or_default();
                let created = self
                    .api
                    .create_object(&op.calendar_url, &op.event_uid, &body, true)
                    .await?;
                op.event_href = Some(created.href.clone());
                self.apply_local(&body, &created.href, created.etag.as_deref())
                    .await;
                Ok(())
            }
            OperationKind::Update => {
                let url = self.resource_url(op)?;
                let body = op.ical_body.clone().unwrap_or_default();
                let mut etag = op.etag.clone();
                if etag.is_none() {
                    // A cleared etag (conflict reset) means: read the
                    // server's fresh one before writing.
                    if let Ok(Some(current)) = self.api.get_event(&op.calendar_url, &url).await {
                        etag = current.etag;
                    }
                }
                let new_etag = self.api.update_object(&url, &body, etag.as_deref()).await?;
                self.apply_local(&body, &url, new_etag.as_deref()).await;
                Ok(())
            }
            OperationKind::Delete => {
                let url = self.resource_url(op)?;
                match self.api.delete_object(&url, op.etag.as_deref()).await {
                    // Already gone counts as done.
                    Err(err) if err.is_not_found() => Ok(()),
                    other => other,
                }
            }
        }
    }

    /// Push the body we just wrote (with its fresh etag) back into the
    /// caller's store. Best effort: the server state is already correct.
    async fn apply_local(&self, body: &str, href: &str, etag: Option<&str>) {
        match self.codec.parse_calendar(body.as_bytes()) {
            Ok(events) => {
                for event in events {
                    if let Err(err) = self.handler.upsert_event(&event, href, etag).await {
                        warn!(%err, href, "could not record pushed event locally");
                    }
                }
            }
            Err(err) => warn!(%err, href, "pushed body does not parse"),
        }
    }

    async fn fail(&self, mut op: PendingOperation, message: String) -> anyhow::Result<OpOutcome> {
        warn!(uid = %op.event_uid, %message, "push operation failed");
        op.status = OperationStatus::Failed;
        op.error_message = Some(message);
        self.store.update(&op).await?;
        Ok(OpOutcome::Failed)
    }

    /// Settle a 412 under the configured strategy.
    async fn resolve_conflict(&self, mut op: PendingOperation) -> anyhow::Result<OpOutcome> {
        match self.strategy {
            ConflictStrategy::Manual => {
                self.fail(op, "manual resolution required".to_string())
                    .await?;
                Ok(OpOutcome::Conflict)
            }
            ConflictStrategy::LocalWins => match op.kind {
                OperationKind::Delete => {
                    let url = match self.resource_url(&op) {
                        Ok(url) => url,
                        Err(err) => return self.fail(op, err.to_string()).await,
                    };
                    // Force delete: no If-Match.
                    match self.api.delete_object(&url, None).await {
                        Ok(()) => {
                            self.store.remove(&op.id).await?;
                            Ok(OpOutcome::Completed)
                        }
                        Err(err) if err.is_not_found() => {
                            self.store.remove(&op.id).await?;
                            Ok(OpOutcome::Completed)
                        }
                        Err(err) => self.fail(op, err.to_string()).await,
                    }
                }
                _ => {
                    // Clobbering an update needs the server's fresh etag
                    // first; that re-read is the caller's call, via Manual.
                    self.fail(
                        op,
                        "LocalWins cannot overwrite a concurrent update; use a Manual resolver"
                            .to_string(),
                    )
                    .await?;
                    Ok(OpOutcome::Conflict)
                }
            },
            ConflictStrategy::ServerWins => {
                let server = match self.fetch_server(&op).await {
                    Ok(server) => server,
                    Err(err) => return self.fail(op, err.to_string()).await,
                };
                match server {
                    None => {
                        self.handler.delete_event(&op.event_uid).await?;
                    }
                    Some(fetched) => {
                        self.handler
                            .upsert_event(&fetched.event, &fetched.href, fetched.etag.as_deref())
                            .await?;
                    }
                }
                self.store.remove(&op.id).await?;
                Ok(OpOutcome::Conflict)
            }
            ConflictStrategy::NewestWins => {
                let server = match self.fetch_server(&op).await {
                    Ok(server) => server,
                    Err(err) => return self.fail(op, err.to_string()).await,
                };
                let local = op
                    .ical_body
                    .as_deref()
                    .and_then(|body| self.codec.parse_calendar(body.as_bytes()).ok())
                    .and_then(|events| {
                        events.into_iter().find(|e| e.recurrence_id.is_none())
                    });

                let local_wins = match (&local, &server) {
                    // Server resource vanished: nothing newer remains there.
                    (Some(_), None) => true,
                    (Some(local), Some(fetched)) => newer_than(local, &fetched.event),
                    // A delete carries no body; the surviving server copy
                    // wins.
                    (None, _) => false,
                };

                if local_wins {
                    debug!(uid = %op.event_uid, "local version newer, operation reset");
                    op.status = OperationStatus::Pending;
                    op.retry_count = 0;
                    op.etag = None;
                    op.next_attempt = Some(Utc::now());
                    op.error_message = None;
                    self.store.update(&op).await?;
                    Ok(OpOutcome::Conflict)
                } else {
                    match server {
                        None => self.handler.delete_event(&op.event_uid).await?,
                        Some(fetched) => {
                            self.handler
                                .upsert_event(
                                    &fetched.event,
                                    &fetched.href,
                                    fetched.etag.as_deref(),
                                )
                                .await?
                        }
                    }
                    self.store.remove(&op.id).await?;
                    Ok(OpOutcome::Conflict)
                }
            }
        }
    }

    async fn fetch_server(&self, op: &PendingOperation) -> DavResult<Option<FetchedEvent>> {
        let url = self.resource_url(op)?;
        match self.api.get_event(&op.calendar_url, &url).await {
            Ok(found) => Ok(found),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Higher sequence wins; ties go to the later dtstamp; remaining ties go
/// to the server.
fn newer_than(local: &Event, server: &Event) -> bool {
    if local.sequence != server.sequence {
        return local.sequence > server.sequence;
    }
    match (&local.dtstamp, &server.dtstamp) {
        (Some(l), Some(s)) => l.instant() > s.instant(),
        _ => false,
    }
}

/// 2^retry seconds capped at five minutes, with ±20% jitter so stalled
/// queues do not thunder back in lockstep.
fn backoff(retry: u32) -> TimeDelta {
    let base = 2u64.saturating_pow(retry).min(300);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    let millis = (base as f64 * 1000.0 * jitter) as i64;
    TimeDelta::milliseconds(millis)
}
