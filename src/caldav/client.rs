//! The CalDAV client proper.
//!
//! Composes the WebDAV primitives with the iCalendar codec: multistatus
//! rows fan out to 1..N events per resource (a recurring master plus its
//! overrides share one `.ics`), all inheriting the row's href and etag.

use std::ops::Range;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::caldav::CalendarApi;
use crate::caldav::query::{
    build_calendar_list_body, build_calendar_multiget_body, build_calendar_query_body,
    build_ctag_propfind_body, build_sync_collection_body, build_sync_token_propfind_body,
};
use crate::caldav::types::{
    CalendarInfo, CreatedResource, FetchResult, FetchedEvent, SyncCollectionOutcome,
};
use crate::ical::{Codec, Event, sanitize_uid};
use crate::quirks::ServerQuirks;
use crate::webdav::types::{Authorization, DavError, DavResult, Depth, MultistatusRow};
use crate::webdav::{DavClient, Multistatus};

/// CalDAV client bound to one account. Cloning is cheap and shares the
/// connection pool.
#[derive(Clone)]
pub struct CalDavClient {
    dav: DavClient,
    codec: Codec,
    quirks: ServerQuirks,
}

impl CalDavClient {
    /// Create a client for a base URL, detecting provider quirks from the
    /// host.
    pub fn new(base_url: &str, auth: Authorization) -> DavResult<Self> {
        let quirks = ServerQuirks::detect(base_url);
        Self::with_quirks(base_url, auth, quirks)
    }

    /// Create a client with an explicit quirk set.
    pub fn with_quirks(
        base_url: &str,
        auth: Authorization,
        quirks: ServerQuirks,
    ) -> DavResult<Self> {
        let dav = DavClient::new(base_url, auth)?.with_quirks(quirks.clone());
        Ok(Self {
            dav,
            codec: Codec::default(),
            quirks,
        })
    }

    /// Replace the default codec (zone configuration, unfolding mode).
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn quirks(&self) -> &ServerQuirks {
        &self.quirks
    }

    /// Deterministic resource URL for a UID:
    /// `calendar_url/<sanitized-uid>.ics`.
    pub fn event_url(calendar_url: &str, uid: &str) -> DavResult<String> {
        let safe = sanitize_uid(uid).map_err(|e| DavError::parse(e.to_string()))?;
        Ok(format!("{}/{}.ics", calendar_url.trim_end_matches('/'), safe))
    }

    /// Discover the current user's principal URL via
    /// `current-user-principal`.
    pub async fn discover_current_user_principal(&self) -> DavResult<Option<String>> {
        let body = r#"<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:current-user-principal/>
  </D:prop>
</D:propfind>"#;
        let multistatus = self.dav.propfind("", Depth::Zero, body).await?;
        Ok(multistatus
            .rows
            .into_iter()
            .flat_map(|row| row.current_user_principal)
            .find(|href| !href.is_empty()))
    }

    /// Discover the calendar-home-set collection(s) of a principal.
    pub async fn discover_calendar_home_set(
        &self,
        principal_path: &str,
    ) -> DavResult<Vec<String>> {
        let body = r#"<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">
  <D:prop>
    <C:calendar-home-set/>
  </D:prop>
</D:propfind>"#;
        let multistatus = self.dav.propfind(principal_path, Depth::Zero, body).await?;
        let mut homes: Vec<String> = multistatus
            .rows
            .into_iter()
            .flat_map(|row| row.calendar_home_set)
            .collect();
        homes.sort();
        homes.dedup();
        Ok(homes)
    }

    /// List calendar collections under a home set.
    pub async fn list_calendars(&self, home_set_path: &str) -> DavResult<Vec<CalendarInfo>> {
        let multistatus = self
            .dav
            .propfind(home_set_path, Depth::One, build_calendar_list_body())
            .await?;
        let mut calendars: Vec<CalendarInfo> = multistatus
            .rows
            .into_iter()
            .filter(|row| row.is_calendar)
            .map(|row| CalendarInfo {
                href: row.href,
                displayname: row.displayname,
                ctag: row.ctag,
                sync_token: row.sync_token,
                supported_components: row.supported_components,
            })
            .collect();
        calendars.sort_by(|a, b| a.href.cmp(&b.href));
        Ok(calendars)
    }

    /// Typed convenience over [`CalendarApi::create_object`].
    pub async fn create_event(
        &self,
        calendar_url: &str,
        event: &Event,
        strict: bool,
    ) -> DavResult<CreatedResource> {
        let body = self.codec.generate(event);
        self.create_object(calendar_url, &event.uid, &body, strict)
            .await
    }

    /// Typed convenience over [`CalendarApi::update_object`].
    pub async fn update_event(
        &self,
        event_url: &str,
        event: &Event,
        etag: Option<&str>,
    ) -> DavResult<Option<String>> {
        let body = self.codec.generate(event);
        self.update_object(event_url, &body, etag).await
    }

    /// Turn multistatus rows into fetched events, fanning each resource
    /// out to its events. Damaged resources are collected as failures
    /// without failing the fetch.
    fn assemble(&self, multistatus: Multistatus) -> FetchResult {
        let mut out = FetchResult::default();
        for row in multistatus.rows {
            if !is_event_resource(&row) {
                continue;
            }
            let Some(data) = &row.calendar_data else {
                continue;
            };
            match self.codec.parse_calendar(data.as_bytes()) {
                Ok(events) => {
                    for event in events {
                        out.events.push(FetchedEvent {
                            event,
                            href: row.href.clone(),
                            etag: row.etag.clone(),
                        });
                    }
                }
                Err(err) => {
                    warn!(href = %row.href, %err, "undecodable calendar-data");
                    out.failures.push(format!("{}: {err}", row.href));
                }
            }
        }
        out
    }
}

/// A row counts as an event resource when it is not a collection and either
/// names an `.ics` path or carries calendar data.
fn is_event_resource(row: &MultistatusRow) -> bool {
    if row.is_collection || row.is_calendar {
        return false;
    }
    row.href.ends_with(".ics")
        || row.calendar_data.is_some()
        || row
            .content_type
            .as_deref()
            .is_some_and(|t| t.starts_with("text/calendar"))
}

#[async_trait]
impl CalendarApi for CalDavClient {
    async fn get_ctag(&self, calendar_url: &str) -> DavResult<Option<String>> {
        let multistatus = self
            .dav
            .propfind(calendar_url, Depth::Zero, build_ctag_propfind_body())
            .await?;
        Ok(multistatus.rows.into_iter().find_map(|row| row.ctag))
    }

    async fn get_sync_token(&self, calendar_url: &str) -> DavResult<Option<String>> {
        let multistatus = self
            .dav
            .propfind(calendar_url, Depth::Zero, build_sync_token_propfind_body())
            .await?;
        Ok(multistatus.rows.into_iter().find_map(|row| row.sync_token))
    }

    async fn fetch_events(
        &self,
        calendar_url: &str,
        range: Option<Range<DateTime<Utc>>>,
    ) -> DavResult<FetchResult> {
        let (start, end) = match range {
            Some(r) => (Some(r.start), Some(r.end)),
            None => (None, None),
        };
        let body = build_calendar_query_body(start, end);
        let multistatus = self.dav.report(calendar_url, Depth::One, &body).await?;
        Ok(self.assemble(multistatus))
    }

    async fn fetch_events_by_href(
        &self,
        calendar_url: &str,
        hrefs: &[String],
    ) -> DavResult<FetchResult> {
        let Some(body) = build_calendar_multiget_body(hrefs) else {
            return Ok(FetchResult::default());
        };
        let multistatus = self.dav.report(calendar_url, Depth::One, &body).await?;
        Ok(self.assemble(multistatus))
    }

    async fn sync_collection(
        &self,
        calendar_url: &str,
        sync_token: Option<&str>,
    ) -> DavResult<SyncCollectionOutcome> {
        let body = build_sync_collection_body(sync_token);
        let multistatus = self.dav.report(calendar_url, Depth::One, &body).await?;

        let mut outcome = SyncCollectionOutcome {
            sync_token: multistatus.sync_token.clone(),
            ..SyncCollectionOutcome::default()
        };

        for row in multistatus.rows {
            // The collection's own row only restates the token.
            let is_collection_row = row.is_collection
                || row.is_calendar
                || (row.sync_token.is_some()
                    && row.etag.is_none()
                    && row.calendar_data.is_none());
            if is_collection_row {
                if outcome.sync_token.is_none() {
                    outcome.sync_token = row.sync_token;
                }
                continue;
            }

            match row.status {
                Some(404) | Some(410) => outcome.deleted_hrefs.push(row.href),
                _ if row.calendar_data.is_some() => {
                    match self.codec.parse_calendar(
                        row.calendar_data.as_deref().unwrap_or_default().as_bytes(),
                    ) {
                        Ok(events) => {
                            for event in events {
                                outcome.changed.events.push(FetchedEvent {
                                    event,
                                    href: row.href.clone(),
                                    etag: row.etag.clone(),
                                });
                            }
                        }
                        Err(err) => {
                            warn!(href = %row.href, %err, "undecodable calendar-data in sync row");
                            outcome.changed.failures.push(format!("{}: {err}", row.href));
                        }
                    }
                }
                _ if is_event_resource(&row) => {
                    // The server (notably iCloud) withheld the body; record
                    // the bare href for a follow-up multiget.
                    debug!(href = %row.href, "bodyless sync row");
                    outcome.bare_hrefs.push(row.href);
                }
                _ => {}
            }
        }

        Ok(outcome)
    }

    async fn create_object(
        &self,
        calendar_url: &str,
        uid: &str,
        ical_body: &str,
        strict: bool,
    ) -> DavResult<CreatedResource> {
        let url = Self::event_url(calendar_url, uid)?;
        let outcome = self
            .dav
            .put(&url, Bytes::from(ical_body.to_owned()), None, strict)
            .await?;
        Ok(CreatedResource {
            href: url,
            etag: outcome.etag,
        })
    }

    async fn update_object(
        &self,
        event_url: &str,
        ical_body: &str,
        etag: Option<&str>,
    ) -> DavResult<Option<String>> {
        let outcome = self
            .dav
            .put(event_url, Bytes::from(ical_body.to_owned()), etag, false)
            .await?;
        Ok(outcome.etag)
    }

    async fn delete_object(&self, event_url: &str, etag: Option<&str>) -> DavResult<()> {
        self.dav.delete(event_url, etag).await
    }

    async fn get_event(
        &self,
        calendar_url: &str,
        href: &str,
    ) -> DavResult<Option<FetchedEvent>> {
        let result = self
            .fetch_events_by_href(calendar_url, std::slice::from_ref(&href.to_string()))
            .await?;
        // Prefer the master when the resource holds a series.
        let mut events = result.events;
        let master = events.iter().position(|f| f.event.recurrence_id.is_none());
        Ok(match master {
            Some(index) => Some(events.swap_remove(index)),
            None => events.into_iter().next(),
        })
    }
}
