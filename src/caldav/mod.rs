//! CalDAV client: calendar-scoped operations composed from the WebDAV
//! primitives and the iCalendar codec.

pub mod client;
pub mod query;
pub mod types;

use std::ops::Range;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::webdav::DavResult;

pub use client::CalDavClient;
pub use query::{
    build_calendar_multiget_body, build_calendar_query_body, build_ctag_propfind_body,
    build_sync_collection_body, escape_xml, format_utc_basic,
};
pub use types::{CalendarInfo, CreatedResource, FetchResult, FetchedEvent, SyncCollectionOutcome};

/// The calendar operations the sync engines drive.
///
/// Reads hand back parsed events; writes take the serialized iCalendar
/// body, because pending operations persist bodies, not models.
/// [`CalDavClient`] is the production implementation; tests substitute an
/// in-memory fake.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// `PROPFIND` depth 0 for the collection's ctag.
    async fn get_ctag(&self, calendar_url: &str) -> DavResult<Option<String>>;

    /// `PROPFIND` depth 0 for the collection's current `DAV:sync-token`.
    /// Lets a full pull seed the next incremental one.
    async fn get_sync_token(&self, calendar_url: &str) -> DavResult<Option<String>>;

    /// `calendar-query` REPORT, optionally constrained to a time range.
    async fn fetch_events(
        &self,
        calendar_url: &str,
        range: Option<Range<DateTime<Utc>>>,
    ) -> DavResult<FetchResult>;

    /// `calendar-multiget` REPORT. Empty input short-circuits to an empty
    /// success without touching the wire.
    async fn fetch_events_by_href(
        &self,
        calendar_url: &str,
        hrefs: &[String],
    ) -> DavResult<FetchResult>;

    /// `sync-collection` REPORT (RFC 6578). An absent token requests the
    /// initial sync.
    async fn sync_collection(
        &self,
        calendar_url: &str,
        sync_token: Option<&str>,
    ) -> DavResult<SyncCollectionOutcome>;

    /// `PUT` a new resource at the UID-derived deterministic URL. `strict`
    /// sends `If-None-Match: *` so a resent create cannot duplicate.
    async fn create_object(
        &self,
        calendar_url: &str,
        uid: &str,
        ical_body: &str,
        strict: bool,
    ) -> DavResult<CreatedResource>;

    /// `PUT` over an existing resource; `etag` turns it into a guarded
    /// write. Returns the new etag when the server discloses it.
    async fn update_object(
        &self,
        event_url: &str,
        ical_body: &str,
        etag: Option<&str>,
    ) -> DavResult<Option<String>>;

    /// `DELETE`, optionally guarded by `If-Match`.
    async fn delete_object(&self, event_url: &str, etag: Option<&str>) -> DavResult<()>;

    /// Fetch one resource by href via `calendar-multiget`, returning its
    /// master event. `Ok(None)` when the server reports it gone.
    async fn get_event(&self, calendar_url: &str, href: &str)
    -> DavResult<Option<FetchedEvent>>;
}
