//! The in-memory event model the codec parses into and emits from.

use chrono::TimeDelta;

use crate::ical::EventDateTime;
use crate::ical::rrule::RRule;

/// `STATUS` values meaningful for a `VEVENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Confirmed => "CONFIRMED",
            EventStatus::Tentative => "TENTATIVE",
            EventStatus::Cancelled => "CANCELLED",
        }
    }
}

/// `TRANSP` values; defaults to opaque when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transparency {
    #[default]
    Opaque,
    Transparent,
}

impl Transparency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transparency::Opaque => "OPAQUE",
            Transparency::Transparent => "TRANSPARENT",
        }
    }
}

/// `VALARM` action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    Audio,
    Display,
    Email,
}

impl AlarmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmAction::Audio => "AUDIO",
            AlarmAction::Display => "DISPLAY",
            AlarmAction::Email => "EMAIL",
        }
    }
}

/// RFC 9074 `PROXIMITY` trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmProximity {
    Arrive,
    Depart,
}

impl AlarmProximity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmProximity::Arrive => "ARRIVE",
            AlarmProximity::Depart => "DEPART",
        }
    }
}

/// A `VALARM` attached to an event, including the RFC 9074 extensions.
///
/// Exactly one of `trigger_duration` (relative) or `trigger_absolute` is
/// set; `related_to_end` only applies to the relative form.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub action: AlarmAction,
    pub trigger_duration: Option<TimeDelta>,
    pub trigger_absolute: Option<EventDateTime>,
    pub related_to_end: bool,
    pub summary: Option<String>,
    pub alarm_description: Option<String>,
    pub repeat: Option<u32>,
    pub repeat_duration: Option<TimeDelta>,
    pub uid: Option<String>,
    pub acknowledged: Option<EventDateTime>,
    pub related_to: Option<String>,
    pub is_default: bool,
    pub proximity: Option<AlarmProximity>,
}

impl Alarm {
    pub fn display(trigger_duration: TimeDelta) -> Self {
        Self {
            action: AlarmAction::Display,
            trigger_duration: Some(trigger_duration),
            trigger_absolute: None,
            related_to_end: false,
            summary: None,
            alarm_description: None,
            repeat: None,
            repeat_duration: None,
            uid: None,
            acknowledged: None,
            related_to: None,
            is_default: false,
            proximity: None,
        }
    }
}

/// `ORGANIZER` property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Organizer {
    pub cal_address: String,
    pub common_name: Option<String>,
}

/// `ATTENDEE` property with the parameters clients round-trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attendee {
    pub cal_address: String,
    pub common_name: Option<String>,
    pub role: Option<String>,
    pub partstat: Option<String>,
    pub rsvp: bool,
}

/// RFC 7986 `IMAGE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub uri: Option<String>,
    /// Base64 payload when the value type is BINARY.
    pub data: Option<String>,
    pub fmttype: Option<String>,
    pub display: Option<String>,
}

/// RFC 7986 `CONFERENCE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conference {
    pub uri: String,
    pub features: Vec<String>,
    pub label: Option<String>,
}

/// RFC 9073 `VLOCATION` sub-component, reduced to the fields servers fill.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StructuredLocation {
    pub uid: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub location_type: Option<String>,
    pub url: Option<String>,
}

/// RFC 9073 `PARTICIPANT` sub-component.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Participant {
    pub uid: Option<String>,
    pub participant_type: Option<String>,
    pub cal_address: Option<String>,
    pub description: Option<String>,
}

/// RFC 9253 `LINK`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub href: String,
    pub rel: Option<String>,
    pub fmttype: Option<String>,
    pub label: Option<String>,
}

/// `RELATED-TO`, with the RFC 9253 widened `RELTYPE` vocabulary carried
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub target: String,
    pub reltype: Option<String>,
}

/// A property the codec does not model, preserved verbatim for round-trip
/// fidelity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProperty {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

/// One `VEVENT`. A single resource may contain several events sharing a UID
/// when recurring-event overrides are present; each override carries its
/// `recurrence_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub dtstart: EventDateTime,
    pub dtend: Option<EventDateTime>,
    pub duration: Option<TimeDelta>,
    pub status: Option<EventStatus>,
    pub transparency: Transparency,
    /// Monotone per-UID version counter (`SEQUENCE`).
    pub sequence: u32,
    pub rrule: Option<RRule>,
    pub exdates: Vec<EventDateTime>,
    pub recurrence_id: Option<EventDateTime>,
    pub alarms: Vec<Alarm>,
    pub categories: Vec<String>,
    pub organizer: Option<Organizer>,
    pub attendees: Vec<Attendee>,
    pub color: Option<String>,
    pub dtstamp: Option<EventDateTime>,
    pub last_modified: Option<EventDateTime>,
    pub created: Option<EventDateTime>,
    pub url: Option<String>,
    pub images: Vec<Image>,
    pub conferences: Vec<Conference>,
    pub locations: Vec<StructuredLocation>,
    pub participants: Vec<Participant>,
    pub links: Vec<Link>,
    pub relations: Vec<Relation>,
    pub raw_properties: Vec<RawProperty>,
}

impl Event {
    /// A minimal event; everything else starts empty.
    pub fn new(uid: impl Into<String>, dtstart: EventDateTime) -> Self {
        Self {
            uid: uid.into(),
            summary: None,
            description: None,
            location: None,
            dtstart,
            dtend: None,
            duration: None,
            status: None,
            transparency: Transparency::Opaque,
            sequence: 0,
            rrule: None,
            exdates: Vec::new(),
            recurrence_id: None,
            alarms: Vec::new(),
            categories: Vec::new(),
            organizer: None,
            attendees: Vec::new(),
            color: None,
            dtstamp: None,
            last_modified: None,
            created: None,
            url: None,
            images: Vec::new(),
            conferences: Vec::new(),
            locations: Vec::new(),
            participants: Vec::new(),
            links: Vec::new(),
            relations: Vec::new(),
            raw_properties: Vec::new(),
        }
    }

    /// Whole-day events carry DATE values in `dtstart`.
    pub fn is_all_day(&self) -> bool {
        self.dtstart.is_date
    }

    /// Primary key of the stored row this event maps to.
    pub fn import_id(&self) -> String {
        make_import_id(&self.uid, self.recurrence_id.as_ref())
    }

    /// The event's end, resolving the `DTEND` / `DURATION` alternatives.
    ///
    /// Without either, the event is instantaneous, except all-day events end
    /// at the next day.
    pub fn effective_end(&self) -> EventDateTime {
        if let Some(end) = &self.dtend {
            return end.clone();
        }
        let base = &self.dtstart;
        let delta = match self.duration {
            Some(d) => d,
            None if base.is_date => TimeDelta::days(1),
            None => TimeDelta::zero(),
        };
        EventDateTime {
            utc: base.utc + delta,
            wall: base.wall + delta,
            tzid: base.tzid.clone(),
            is_utc: base.is_utc,
            is_date: base.is_date,
        }
    }

    /// Duration between start and effective end, in wall-clock terms.
    pub fn wall_duration(&self) -> TimeDelta {
        self.effective_end().wall - self.dtstart.wall
    }
}

/// Derive the stored-row primary key for a UID plus optional
/// `RECURRENCE-ID`. Injective over distinct `(uid, recurrence_id)` pairs.
pub fn make_import_id(uid: &str, recurrence_id: Option<&EventDateTime>) -> String {
    match recurrence_id {
        None => uid.to_string(),
        Some(rid) => format!("{}:RECID:{}", uid, rid.canonical()),
    }
}
