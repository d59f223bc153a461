//! iCalendar codec: parsing and regeneration of `VEVENT` components.
//!
//! Implements RFC 5545 with the extensions real calendar servers emit:
//! RFC 7986 (`COLOR`, `IMAGE`, `CONFERENCE`), RFC 9073 (`PARTICIPANT`,
//! `VLOCATION`), RFC 9074 (alarm extensions) and RFC 9253 (`LINK`,
//! `RELATED-TO` relations). Properties the codec does not model are
//! preserved verbatim and re-emitted, so a parse/generate round trip is
//! stable even for exotic server payloads.

pub mod datetime;
pub mod emit;
pub mod model;
pub mod parse;
pub mod rrule;
pub mod uid;

use std::collections::HashMap;

use chrono_tz::Tz;
use thiserror::Error;

pub use datetime::EventDateTime;
pub use model::{
    Alarm, AlarmAction, AlarmProximity, Attendee, Conference, Event, EventStatus, Image, Link,
    Organizer, Participant, RawProperty, Relation, StructuredLocation, Transparency,
    make_import_id,
};
pub use rrule::{Frequency, RRule, WeekdayNum};
pub use uid::sanitize_uid;

/// Errors surfaced by the codec. Parsing never panics on malformed input.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A structural property the component cannot exist without was absent.
    #[error("missing required property {property}")]
    MissingProperty { property: &'static str },

    /// A property value could not be interpreted.
    #[error("invalid {property} value {value:?}: {detail}")]
    InvalidValue {
        property: String,
        value: String,
        detail: String,
    },

    /// The component nesting was broken (unbalanced BEGIN/END, no VCALENDAR).
    #[error("malformed component structure: {0}")]
    Structure(String),

    /// A UID could not be turned into a safe resource path segment.
    #[error("UID not usable as a resource name: {0}")]
    InvalidUid(String),
}

/// Construction parameters for a [`Codec`].
///
/// The underlying settings are deliberately per-instance rather than
/// process-wide: two accounts in different zones get two codecs.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Zone used for floating date-times and as last-resort TZID fallback.
    pub default_tz: Tz,
    /// Tolerate bare-LF line endings and folds (real servers emit them).
    pub relaxed_unfolding: bool,
    /// Additional TZID aliases consulted after the built-in table.
    pub tz_aliases: Vec<(String, String)>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            default_tz: Tz::UTC,
            relaxed_unfolding: true,
            tz_aliases: Vec::new(),
        }
    }
}

/// iCalendar parser/generator with explicit, instance-scoped configuration.
#[derive(Debug, Clone)]
pub struct Codec {
    default_tz: Tz,
    relaxed_unfolding: bool,
    tz_aliases: HashMap<String, String>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(CodecConfig::default())
    }
}

impl Codec {
    pub fn new(config: CodecConfig) -> Self {
        let mut tz_aliases = HashMap::new();
        for (from, to) in config.tz_aliases {
            tz_aliases.insert(from.to_ascii_lowercase(), to);
        }
        Self {
            default_tz: config.default_tz,
            relaxed_unfolding: config.relaxed_unfolding,
            tz_aliases,
        }
    }

    pub fn default_tz(&self) -> Tz {
        self.default_tz
    }

    pub(crate) fn relaxed_unfolding(&self) -> bool {
        self.relaxed_unfolding
    }

    /// Resolve a TZID to a zone: direct IANA lookup first, then the alias
    /// tables. `None` means the caller should fall back to
    /// [`Codec::default_tz`] and record a warning.
    pub fn resolve_tz(&self, tzid: &str) -> Option<Tz> {
        datetime::resolve_tz(tzid, &self.tz_aliases)
    }

    /// Parse every `VEVENT` in an iCalendar stream.
    ///
    /// A `VEVENT` missing `UID` or `DTSTART` is skipped with a logged parse
    /// warning; the surrounding parse does not fail. Structural damage
    /// (no `VCALENDAR`, unbalanced `BEGIN`/`END`) is a typed error.
    pub fn parse_calendar(&self, input: &[u8]) -> Result<Vec<Event>, ParseError> {
        parse::parse_calendar(self, input)
    }

    /// Parse a stream expected to hold a single resource and return its first
    /// event, if any. Used by single-resource reads after a multiget.
    pub fn parse_first_event(&self, input: &[u8]) -> Result<Option<Event>, ParseError> {
        Ok(self.parse_calendar(input)?.into_iter().next())
    }

    /// Generate a complete `VCALENDAR` stream holding one event.
    pub fn generate(&self, event: &Event) -> String {
        emit::generate(std::slice::from_ref(event))
    }

    /// Generate a complete `VCALENDAR` stream holding several events sharing
    /// a resource (a recurring master plus its overrides).
    pub fn generate_all(&self, events: &[Event]) -> String {
        emit::generate(events)
    }
}

/// Parse with a default-configured codec (UTC floating zone, relaxed
/// unfolding).
pub fn parse_calendar(input: &[u8]) -> Result<Vec<Event>, ParseError> {
    Codec::default().parse_calendar(input)
}
