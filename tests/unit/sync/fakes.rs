//! In-memory fakes for the engine tests: a scripted [`CalendarApi`] and
//! store implementations backed by mutex-wrapped vectors.

use std::ops::Range;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use caldav_sync::caldav::{
    CalendarApi, CreatedResource, FetchResult, FetchedEvent, SyncCollectionOutcome,
};
use caldav_sync::ical::parse_calendar;
use caldav_sync::sync::{
    LocalEvent, LocalEventProvider, OperationStatus, PendingOperation, PendingStore, SyncState,
    SyncResultHandler,
};
use caldav_sync::{DavError, DavResult, Event};

pub fn event_ics(uid: &str, sequence: u32, dtstamp: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n\
         BEGIN:VEVENT\r\nUID:{uid}\r\nDTSTAMP:{dtstamp}\r\n\
         DTSTART:20240105T090000Z\r\nSEQUENCE:{sequence}\r\nSUMMARY:Sample\r\n\
         END:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}

pub fn event_from_ics(ics: &str) -> Event {
    parse_calendar(ics.as_bytes())
        .expect("fixture parses")
        .remove(0)
}

pub fn fetched(uid: &str, href: &str, etag: &str, sequence: u32) -> FetchedEvent {
    FetchedEvent {
        event: event_from_ics(&event_ics(uid, sequence, "20240101T000000Z")),
        href: href.to_string(),
        etag: Some(etag.to_string()),
    }
}

/// Scripted CalendarApi. Every call is logged by name so tests can assert
/// which wire operations a sync performed.
#[derive(Default)]
pub struct FakeApi {
    pub ctag: Mutex<Option<String>>,
    pub collection_token: Mutex<Option<String>>,
    pub fetch: Mutex<FetchResult>,
    pub multiget: Mutex<FetchResult>,
    /// `None` makes sync-collection answer 410 Gone.
    pub sync_outcome: Mutex<Option<SyncCollectionOutcome>>,
    pub server_event: Mutex<Option<FetchedEvent>>,
    /// Fail every write with this status.
    pub fail_writes_with: Mutex<Option<u16>>,
    /// Fail only conditional writes (If-Match / If-None-Match) with this
    /// status; unconditional retries pass.
    pub fail_conditional_with: Mutex<Option<u16>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeApi {
    fn log(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn write_gate(&self, conditional: bool) -> DavResult<()> {
        if let Some(status) = *self.fail_writes_with.lock().unwrap() {
            return Err(DavError::http(status, "injected failure"));
        }
        if conditional
            && let Some(status) = *self.fail_conditional_with.lock().unwrap()
        {
            return Err(DavError::http(status, "injected precondition failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl CalendarApi for FakeApi {
    async fn get_ctag(&self, _calendar_url: &str) -> DavResult<Option<String>> {
        self.log("get_ctag");
        Ok(self.ctag.lock().unwrap().clone())
    }

    async fn get_sync_token(&self, _calendar_url: &str) -> DavResult<Option<String>> {
        self.log("get_sync_token");
        Ok(self.collection_token.lock().unwrap().clone())
    }

    async fn fetch_events(
        &self,
        _calendar_url: &str,
        _range: Option<Range<DateTime<Utc>>>,
    ) -> DavResult<FetchResult> {
        self.log("fetch_events");
        Ok(self.fetch.lock().unwrap().clone())
    }

    async fn fetch_events_by_href(
        &self,
        _calendar_url: &str,
        hrefs: &[String],
    ) -> DavResult<FetchResult> {
        self.log(format!("multiget:{}", hrefs.len()));
        Ok(self.multiget.lock().unwrap().clone())
    }

    async fn sync_collection(
        &self,
        _calendar_url: &str,
        _sync_token: Option<&str>,
    ) -> DavResult<SyncCollectionOutcome> {
        self.log("sync_collection");
        self.sync_outcome
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| DavError::http(410, "sync token no longer valid"))
    }

    async fn create_object(
        &self,
        calendar_url: &str,
        uid: &str,
        _ical_body: &str,
        strict: bool,
    ) -> DavResult<CreatedResource> {
        self.log(format!("create:{uid}"));
        self.write_gate(strict)?;
        Ok(CreatedResource {
            href: format!("{}/{uid}.ics", calendar_url.trim_end_matches('/')),
            etag: Some("\"new-etag\"".to_string()),
        })
    }

    async fn update_object(
        &self,
        event_url: &str,
        _ical_body: &str,
        etag: Option<&str>,
    ) -> DavResult<Option<String>> {
        self.log(format!("update:{event_url}"));
        self.write_gate(etag.is_some())?;
        Ok(Some("\"new-etag\"".to_string()))
    }

    async fn delete_object(&self, event_url: &str, etag: Option<&str>) -> DavResult<()> {
        self.log(format!(
            "delete:{event_url}:{}",
            if etag.is_some() { "guarded" } else { "forced" }
        ));
        self.write_gate(etag.is_some())?;
        Ok(())
    }

    async fn get_event(
        &self,
        _calendar_url: &str,
        _href: &str,
    ) -> DavResult<Option<FetchedEvent>> {
        self.log("get_event");
        Ok(self.server_event.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MemoryProvider {
    pub events: Mutex<Vec<LocalEvent>>,
}

#[async_trait]
impl LocalEventProvider for MemoryProvider {
    async fn get_local_events(&self, _calendar_url: &str) -> anyhow::Result<Vec<LocalEvent>> {
        Ok(self.events.lock().unwrap().clone())
    }

    async fn get_event_by_import_id(
        &self,
        import_id: &str,
    ) -> anyhow::Result<Option<LocalEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .find(|l| l.event.import_id() == import_id)
            .cloned())
    }
}

#[derive(Default)]
pub struct MemoryHandler {
    pub upserts: Mutex<Vec<(String, String, Option<String>)>>,
    pub deletes: Mutex<Vec<String>>,
    pub saved_state: Mutex<Option<SyncState>>,
}

#[async_trait]
impl SyncResultHandler for MemoryHandler {
    async fn upsert_event(
        &self,
        event: &Event,
        href: &str,
        etag: Option<&str>,
    ) -> anyhow::Result<()> {
        self.upserts.lock().unwrap().push((
            event.import_id(),
            href.to_string(),
            etag.map(str::to_string),
        ));
        Ok(())
    }

    async fn delete_event(&self, import_id: &str) -> anyhow::Result<()> {
        self.deletes.lock().unwrap().push(import_id.to_string());
        Ok(())
    }

    async fn save_sync_state(&self, state: &SyncState) -> anyhow::Result<()> {
        *self.saved_state.lock().unwrap() = Some(state.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryPendingStore {
    pub ops: Mutex<Vec<PendingOperation>>,
}

impl MemoryPendingStore {
    pub fn snapshot(&self) -> Vec<PendingOperation> {
        self.ops.lock().unwrap().clone()
    }
}

#[async_trait]
impl PendingStore for MemoryPendingStore {
    async fn enqueue(&self, op: PendingOperation) -> anyhow::Result<()> {
        self.ops.lock().unwrap().push(op);
        Ok(())
    }

    async fn get_eligible(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<PendingOperation>> {
        Ok(self
            .ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| {
                op.status == OperationStatus::Pending
                    && op.next_attempt.is_none_or(|at| at <= now)
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update(&self, op: &PendingOperation) -> anyhow::Result<()> {
        let mut ops = self.ops.lock().unwrap();
        match ops.iter_mut().find(|existing| existing.id == op.id) {
            Some(existing) => *existing = op.clone(),
            None => ops.push(op.clone()),
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> anyhow::Result<()> {
        self.ops.lock().unwrap().retain(|op| op.id != id);
        Ok(())
    }

    async fn get_by_event_uid(
        &self,
        calendar_url: &str,
        uid: &str,
    ) -> anyhow::Result<Option<PendingOperation>> {
        Ok(self
            .ops
            .lock()
            .unwrap()
            .iter()
            .find(|op| {
                op.calendar_url == calendar_url && op.event_uid == uid && !op.is_terminal()
            })
            .cloned())
    }

    async fn count(&self) -> anyhow::Result<u64> {
        Ok(self
            .ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| !op.is_terminal())
            .count() as u64)
    }
}
