//! CalDAV client library with incremental synchronization.
//!
//! Turns a remote calendar collection into a reliable, incrementally
//! synchronized local view while absorbing the semantic quirks of real
//! servers (iCloud, Google, Fastmail, Nextcloud). Four pieces do the
//! heavy lifting:
//!
//! - an **iCalendar codec** ([`ical`]) parsing and regenerating `VEVENT`s,
//!   including recurring-event overrides, with round-trip preservation of
//!   unmodeled properties;
//! - a **recurrence expander** ([`recur`]) materializing `RRULE`
//!   occurrences over a time range, honoring `EXDATE`s and per-occurrence
//!   overrides and keeping wall-clock durations stable across DST;
//! - a **protocol layer** ([`webdav`], [`caldav`], [`quirks`]) issuing
//!   `PROPFIND`/`REPORT`/`PUT`/`DELETE` over hyper + rustls, parsing
//!   multistatus XML tolerantly, and retrying transient failures;
//! - **sync engines** ([`sync`]) — a ctag/sync-token driven pull loop
//!   with conflict detection, and a push loop that coalesces queued
//!   mutations and resolves HTTP 412 conflicts under a configurable
//!   policy.
//!
//! Storage is the caller's: events and sync state live behind the
//! [`sync::LocalEventProvider`], [`sync::SyncResultHandler`] and
//! [`sync::PendingStore`] interfaces.
//!
//! # Pulling a calendar
//!
//! ```no_run
//! use std::sync::Arc;
//! use caldav_sync::{Authorization, CalDavClient, PullSyncEngine, SyncState};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(
//! #     provider: Arc<dyn caldav_sync::sync::LocalEventProvider>,
//! #     handler: Arc<dyn caldav_sync::sync::SyncResultHandler>,
//! # ) -> anyhow::Result<()> {
//! let client = CalDavClient::new(
//!     "https://caldav.example.com/dav/user01/",
//!     Authorization::Basic {
//!         username: "user01".into(),
//!         password: "app-password".into(),
//!     },
//! )?;
//!
//! let engine = PullSyncEngine::new(Arc::new(client), provider, handler);
//! let state = SyncState::new("https://caldav.example.com/dav/user01/personal/");
//! let report = engine.sync(&state, &CancellationToken::new()).await;
//! println!(
//!     "{} upserted, {} deleted, {} conflicts",
//!     report.upserted, report.deleted, report.conflicts
//! );
//! # Ok(())
//! # }
//! ```
//!
//! # Expanding a recurring event
//!
//! ```
//! use caldav_sync::ical::parse_calendar;
//! use caldav_sync::recur::{build_override_map, expand};
//! use chrono::{TimeZone, Utc};
//!
//! let ics = b"BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//x//EN\r\n\
//! BEGIN:VEVENT\r\nUID:standup\r\nDTSTART:20241201T100000Z\r\n\
//! RRULE:FREQ=DAILY;COUNT=5\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n";
//! let events = parse_calendar(ics).expect("parses");
//! let overrides = build_override_map(&events);
//! let occurrences = expand(
//!     &events[0],
//!     Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()
//!         ..Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
//!     &overrides,
//! );
//! assert_eq!(occurrences.len(), 5);
//! ```

pub mod caldav;
pub mod common;
pub mod ical;
pub mod quirks;
pub mod recur;
pub mod sync;
pub mod webdav;

pub use caldav::{
    CalDavClient, CalendarApi, CalendarInfo, CreatedResource, FetchResult, FetchedEvent,
    SyncCollectionOutcome,
};
pub use ical::{Codec, CodecConfig, Event, EventDateTime, ParseError, RRule, sanitize_uid};
pub use quirks::{Provider, ServerQuirks};
pub use recur::{Occurrence, build_override_map, expand};
pub use sync::{
    ConflictChoice, ConflictStrategy, PendingOperation, PullSyncEngine, PushReport,
    PushSyncEngine, SyncError, SyncErrorKind, SyncLocks, SyncReport, SyncState,
};
pub use webdav::{Authorization, DavClient, DavError, DavResult, Depth, Multistatus};
