//! The pull synchronization engine.
//!
//! Reconciles server state into the caller's store. The ctag gate makes an
//! unchanged collection a single depth-0 PROPFIND; otherwise the engine
//! runs either an incremental pull (RFC 6578 sync-collection, batched
//! multiget resolution of bodyless rows, tombstones) or a full pull
//! (calendar-query plus local diff with conflict detection). All store
//! writes of one pull are planned as a single batch before anything is
//! applied.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::caldav::{CalendarApi, FetchedEvent};
use crate::sync::state::SyncState;
use crate::sync::traits::{
    ConflictCallback, ConflictChoice, LocalEventProvider, SyncResultHandler,
};
use crate::sync::{SyncError, SyncLocks};
use crate::webdav::DavError;

/// Bodyless sync rows are resolved in multiget batches of this size.
const MULTIGET_BATCH: usize = 50;

/// Outcome summary of one pull.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub success: bool,
    pub is_full_sync: bool,
    pub previous_ctag: Option<String>,
    pub new_ctag: Option<String>,
    pub upserted: usize,
    pub deleted: usize,
    pub conflicts: usize,
    pub errors: Vec<SyncError>,
    pub duration_ms: u64,
    pub server_event_count: usize,
    /// The pull was interrupted by the caller's cancellation signal; the
    /// report covers what was applied before that.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn changes(&self) -> usize {
        self.upserted + self.deleted
    }
}

/// Why a pull stopped before computing a new state.
enum PullAbort {
    Cancelled,
    Dav(DavError),
    Store(anyhow::Error),
}

/// One planned store write batch.
#[derive(Default)]
struct WritePlan {
    upserts: Vec<FetchedEvent>,
    deletes: Vec<String>,
}

pub struct PullSyncEngine {
    api: Arc<dyn CalendarApi>,
    provider: Arc<dyn LocalEventProvider>,
    handler: Arc<dyn SyncResultHandler>,
    locks: SyncLocks,
    on_conflict: ConflictCallback,
}

impl PullSyncEngine {
    pub fn new(
        api: Arc<dyn CalendarApi>,
        provider: Arc<dyn LocalEventProvider>,
        handler: Arc<dyn SyncResultHandler>,
    ) -> Self {
        Self {
            api,
            provider,
            handler,
            locks: SyncLocks::new(),
            // Server wins unless the caller installs a policy.
            on_conflict: Arc::new(|_, _, _| ConflictChoice::UseRemote),
        }
    }

    /// Share a lock registry with other engines operating on the same
    /// calendars.
    pub fn with_locks(mut self, locks: SyncLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_conflict_callback(mut self, callback: ConflictCallback) -> Self {
        self.on_conflict = callback;
        self
    }

    /// Run one pull for the calendar described by `previous`. On success
    /// the new [`SyncState`] is handed to the result handler.
    pub async fn sync(&self, previous: &SyncState, cancel: &CancellationToken) -> SyncReport {
        let started = Instant::now();
        let calendar_url = previous.calendar_url.clone();
        let mut report = SyncReport {
            previous_ctag: previous.ctag.clone(),
            ..SyncReport::default()
        };

        let _guard = self.locks.acquire(&calendar_url).await;

        if cancel.is_cancelled() {
            report.cancelled = true;
            report.duration_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        let ctag = match self.api.get_ctag(&calendar_url).await {
            Ok(ctag) => ctag,
            Err(err) => {
                report.errors.push(SyncError::from(&err));
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };
        report.new_ctag = ctag.clone();

        // ctag gate: an unchanged collection costs nothing further.
        if ctag.is_some() && ctag == previous.ctag {
            debug!(calendar_url, "ctag unchanged, skipping pull");
            report.success = true;
            report.duration_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        let result = if previous.sync_token.is_some() {
            match self.incremental(previous, cancel, &mut report).await {
                Err(PullAbort::Dav(DavError::Http { status: 410, .. })) => {
                    // The server forgot our token; start over.
                    info!(calendar_url, "sync token gone, falling back to full pull");
                    report.is_full_sync = true;
                    self.full(previous, cancel, &mut report).await
                }
                other => other,
            }
        } else {
            report.is_full_sync = true;
            self.full(previous, cancel, &mut report).await
        };

        match result {
            Ok(mut state) => {
                state.ctag = report.new_ctag.clone();
                state.last_sync = Some(Utc::now());
                if let Err(err) = self.handler.save_sync_state(&state).await {
                    report
                        .errors
                        .push(SyncError::new(crate::sync::SyncErrorKind::Unknown, err.to_string()));
                } else {
                    report.success = true;
                }
                info!(
                    calendar_url,
                    upserted = report.upserted,
                    deleted = report.deleted,
                    conflicts = report.conflicts,
                    full = report.is_full_sync,
                    "pull finished"
                );
            }
            Err(PullAbort::Cancelled) => report.cancelled = true,
            Err(PullAbort::Dav(err)) => report.errors.push(SyncError::from(&err)),
            Err(PullAbort::Store(err)) => report
                .errors
                .push(SyncError::new(crate::sync::SyncErrorKind::Unknown, err.to_string())),
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    /// Full pull: calendar-query, diff against the local store, conflict
    /// detection, map compaction.
    async fn full(
        &self,
        previous: &SyncState,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<SyncState, PullAbort> {
        let calendar_url = &previous.calendar_url;

        if cancel.is_cancelled() {
            return Err(PullAbort::Cancelled);
        }
        let fetched = self
            .api
            .fetch_events(calendar_url, None)
            .await
            .map_err(PullAbort::Dav)?;
        report.server_event_count = fetched.events.len();
        for failure in &fetched.failures {
            report.errors.push(SyncError::parse(failure.clone()));
        }

        if cancel.is_cancelled() {
            return Err(PullAbort::Cancelled);
        }
        let local = self
            .provider
            .get_local_events(calendar_url)
            .await
            .map_err(PullAbort::Store)?;
        let local_by_id: HashMap<String, &crate::sync::traits::LocalEvent> = local
            .iter()
            .map(|l| (l.event.import_id(), l))
            .collect();

        // Plan the whole batch before touching the store.
        let mut plan = WritePlan::default();
        let mut server_ids: HashSet<String> = HashSet::with_capacity(fetched.events.len());
        for fetched_event in &fetched.events {
            let import_id = fetched_event.event.import_id();
            server_ids.insert(import_id.clone());
            match local_by_id.get(&import_id) {
                None => plan.upserts.push(fetched_event.clone()),
                Some(local_event) => {
                    let tracked = previous.etags.get(&fetched_event.href);
                    if tracked.is_some() && tracked == fetched_event.etag.as_ref() {
                        continue;
                    }
                    if local_event.dirty {
                        report.conflicts += 1;
                        let choice = (self.on_conflict)(
                            &local_event.event,
                            &fetched_event.event,
                            tracked.map(String::as_str),
                        );
                        match choice {
                            ConflictChoice::UseRemote => {
                                plan.upserts.push(fetched_event.clone())
                            }
                            // UseLocal: the push engine sends local changes
                            // separately. Skip: touch neither side.
                            ConflictChoice::UseLocal | ConflictChoice::Skip => {}
                        }
                    } else {
                        plan.upserts.push(fetched_event.clone());
                    }
                }
            }
        }

        for local_event in &local {
            let import_id = local_event.event.import_id();
            if server_ids.contains(&import_id) {
                continue;
            }
            // Only rows we know the server once had are server-deletions;
            // anything else is a locally created event awaiting push.
            let known_to_server = previous
                .url_map
                .get(&import_id)
                .is_some_and(|href| previous.etags.contains_key(href));
            if known_to_server {
                plan.deletes.push(import_id);
            }
        }

        self.apply(&plan, report).await?;

        // Fresh maps built from the listing alone: entries for hrefs the
        // server no longer has are compacted away by construction.
        let mut state = SyncState::new(calendar_url.clone());
        for fetched_event in &fetched.events {
            if let Some(etag) = &fetched_event.etag {
                state.etags.insert(fetched_event.href.clone(), etag.clone());
            }
            state
                .url_map
                .insert(fetched_event.event.import_id(), fetched_event.href.clone());
        }

        // Best effort: pick up the collection's current token so the next
        // pull can be incremental.
        match self.api.get_sync_token(calendar_url).await {
            Ok(token) => state.sync_token = token,
            Err(err) => debug!(%err, "collection exposes no sync token"),
        }

        Ok(state)
    }

    /// Incremental pull driven by the previous sync token.
    async fn incremental(
        &self,
        previous: &SyncState,
        cancel: &CancellationToken,
        report: &mut SyncReport,
    ) -> Result<SyncState, PullAbort> {
        let calendar_url = &previous.calendar_url;

        if cancel.is_cancelled() {
            return Err(PullAbort::Cancelled);
        }
        let outcome = self
            .api
            .sync_collection(calendar_url, previous.sync_token.as_deref())
            .await
            .map_err(PullAbort::Dav)?;

        let mut changed = outcome.changed.events;
        for failure in &outcome.changed.failures {
            report.errors.push(SyncError::parse(failure.clone()));
        }

        // Resolve bodyless rows with batched multigets.
        for chunk in outcome.bare_hrefs.chunks(MULTIGET_BATCH) {
            if cancel.is_cancelled() {
                return Err(PullAbort::Cancelled);
            }
            let extra = self
                .api
                .fetch_events_by_href(calendar_url, chunk)
                .await
                .map_err(PullAbort::Dav)?;
            for failure in &extra.failures {
                report.errors.push(SyncError::parse(failure.clone()));
            }
            changed.extend(extra.events);
        }
        report.server_event_count = changed.len();

        let mut plan = WritePlan::default();
        for fetched_event in changed {
            let import_id = fetched_event.event.import_id();
            let tracked = previous.etags.get(&fetched_event.href);
            if tracked.is_some() && tracked == fetched_event.etag.as_ref() {
                continue;
            }
            let local = self
                .provider
                .get_event_by_import_id(&import_id)
                .await
                .map_err(PullAbort::Store)?;
            match local {
                Some(local_event) if local_event.dirty => {
                    report.conflicts += 1;
                    let choice = (self.on_conflict)(
                        &local_event.event,
                        &fetched_event.event,
                        tracked.map(String::as_str),
                    );
                    if choice == ConflictChoice::UseRemote {
                        plan.upserts.push(fetched_event);
                    }
                }
                _ => plan.upserts.push(fetched_event),
            }
        }

        let mut state = previous.clone();
        for href in &outcome.deleted_hrefs {
            let import_ids = state.import_ids_for_href(href);
            if import_ids.is_empty() {
                warn!(href, "tombstone for unknown resource");
                continue;
            }
            plan.deletes.extend(import_ids);
        }

        self.apply(&plan, report).await?;

        for fetched_event in &plan.upserts {
            if let Some(etag) = &fetched_event.etag {
                state.etags.insert(fetched_event.href.clone(), etag.clone());
            }
            state
                .url_map
                .insert(fetched_event.event.import_id(), fetched_event.href.clone());
        }
        for import_id in &plan.deletes {
            if let Some(href) = state.url_map.remove(import_id) {
                state.etags.remove(&href);
            }
        }
        if let Some(token) = outcome.sync_token {
            state.sync_token = Some(token);
        }

        Ok(state)
    }

    /// Apply one planned batch. No cancellation checks inside: a batch is
    /// written without interleaving once planned.
    async fn apply(&self, plan: &WritePlan, report: &mut SyncReport) -> Result<(), PullAbort> {
        for fetched_event in &plan.upserts {
            self.handler
                .upsert_event(
                    &fetched_event.event,
                    &fetched_event.href,
                    fetched_event.etag.as_deref(),
                )
                .await
                .map_err(PullAbort::Store)?;
            report.upserted += 1;
        }
        for import_id in &plan.deletes {
            self.handler
                .delete_event(import_id)
                .await
                .map_err(PullAbort::Store)?;
            report.deleted += 1;
        }
        Ok(())
    }
}
