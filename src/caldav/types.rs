use crate::ical::Event;

/// Summary of a calendar collection returned by a `PROPFIND` depth 1.
#[derive(Debug, Clone)]
pub struct CalendarInfo {
    pub href: String,
    pub displayname: Option<String>,
    pub ctag: Option<String>,
    pub sync_token: Option<String>,
    pub supported_components: Vec<String>,
}

/// An event fetched from the server together with its resource
/// coordinates. A single `.ics` resource fans out to 1..N of these (master
/// plus overrides), all sharing href and etag.
#[derive(Debug, Clone)]
pub struct FetchedEvent {
    pub event: Event,
    pub href: String,
    pub etag: Option<String>,
}

/// Events extracted from a multistatus, plus per-resource parse failures.
/// One damaged resource never fails the surrounding fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchResult {
    pub events: Vec<FetchedEvent>,
    pub failures: Vec<String>,
}

/// Resource coordinates of a freshly created event.
#[derive(Debug, Clone)]
pub struct CreatedResource {
    pub href: String,
    pub etag: Option<String>,
}

/// Outcome of a `sync-collection` REPORT.
#[derive(Debug, Clone, Default)]
pub struct SyncCollectionOutcome {
    /// Added or updated resources whose bodies came with the response.
    pub changed: FetchResult,
    /// Live `.ics` resources the server withheld the body for (iCloud);
    /// resolved by a follow-up multiget.
    pub bare_hrefs: Vec<String>,
    /// Tombstones: rows with status 404.
    pub deleted_hrefs: Vec<String>,
    pub sync_token: Option<String>,
}
