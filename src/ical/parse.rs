//! iCalendar stream parsing: unfolding, content lines, component structure
//! and `VEVENT` extraction.
//!
//! The parser is deliberately tolerant. Real servers emit bare-LF endings,
//! RFC-illegal property combinations and vendor components; anything that
//! cannot be interpreted is either preserved verbatim (unknown properties)
//! or skipped with a `tracing` warning (damaged events, unknown
//! components). Only broken component nesting fails the whole parse.

use tracing::warn;

use crate::ical::datetime::{parse_datetime_value, parse_duration};
use crate::ical::model::{
    Alarm, AlarmAction, AlarmProximity, Attendee, Conference, Event, EventStatus, Image, Link,
    Organizer, Participant, RawProperty, Relation, StructuredLocation, Transparency,
};
use crate::ical::rrule::RRule;
use crate::ical::{Codec, EventDateTime, ParseError};

/// One unfolded `NAME;PARAM=V:VALUE` line.
#[derive(Debug, Clone)]
pub(crate) struct ContentLine {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl ContentLine {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed component with its properties and nested children.
#[derive(Debug, Default)]
struct Component {
    name: String,
    lines: Vec<ContentLine>,
    children: Vec<Component>,
}

/// Remove RFC 5545 §3.1 line folds in one pass over the stream. CRLF
/// followed by SPACE or TAB is a fold; in relaxed mode a bare LF fold is
/// tolerated as well.
pub(crate) fn unfold(input: &[u8], relaxed: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'\r'
            && i + 2 < input.len()
            && input[i + 1] == b'\n'
            && (input[i + 2] == b' ' || input[i + 2] == b'\t')
        {
            i += 3;
        } else if relaxed
            && input[i] == b'\n'
            && i + 1 < input.len()
            && (input[i + 1] == b' ' || input[i + 1] == b'\t')
        {
            i += 2;
        } else {
            out.push(input[i]);
            i += 1;
        }
    }
    out
}

/// Undo §3.3.11 text escaping. A placeholder keeps `\\n` from being
/// processed twice into a newline.
pub(crate) fn unescape_text(input: &str) -> String {
    const PLACEHOLDER: char = '\u{1}';
    input
        .replace("\\\\", "\u{1}")
        .replace("\\n", "\n")
        .replace("\\N", "\n")
        .replace("\\,", ",")
        .replace("\\;", ";")
        .replace(PLACEHOLDER, "\\")
}

/// Apply §3.3.11 text escaping for emission.
pub(crate) fn escape_text(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace(',', "\\,")
        .replace(';', "\\;")
}

/// Split a property value on `sep`, honoring backslash escapes.
pub(crate) fn split_unescaped(value: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut escaped = false;
    for c in value.chars() {
        if escaped {
            cur.push('\\');
            cur.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == sep {
            parts.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    if escaped {
        cur.push('\\');
    }
    parts.push(cur);
    parts
}

fn parse_content_line(line: &str) -> Option<ContentLine> {
    if line.trim().is_empty() {
        return None;
    }

    let mut in_quotes = false;
    let mut value_at = None;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ':' if !in_quotes => {
                value_at = Some(i);
                break;
            }
            _ => {}
        }
    }
    let (head, value) = match value_at {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => {
            warn!(line, "content line without ':' separator, skipping");
            return None;
        }
    };

    // Split the head on ';' outside quotes: name first, parameters after.
    let mut segments = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in head.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ';' if !in_quotes => segments.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    segments.push(cur);

    let mut iter = segments.into_iter();
    let name = iter.next()?.trim().to_ascii_uppercase();
    if name.is_empty() {
        return None;
    }
    let params = iter
        .filter(|s| !s.trim().is_empty())
        .map(|seg| match seg.split_once('=') {
            Some((k, v)) => {
                let v = v.trim();
                let v = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .unwrap_or(v);
                (k.trim().to_ascii_uppercase(), v.to_string())
            }
            None => (seg.trim().to_ascii_uppercase(), String::new()),
        })
        .collect();

    Some(ContentLine {
        name,
        params,
        value: value.to_string(),
    })
}

fn build_components(lines: impl Iterator<Item = ContentLine>) -> Result<Vec<Component>, ParseError> {
    let mut stack: Vec<Component> = Vec::new();
    let mut roots = Vec::new();

    for line in lines {
        match line.name.as_str() {
            "BEGIN" => {
                stack.push(Component {
                    name: line.value.trim().to_ascii_uppercase(),
                    ..Component::default()
                });
            }
            "END" => {
                let closing = line.value.trim().to_ascii_uppercase();
                let Some(top) = stack.pop() else {
                    return Err(ParseError::Structure(format!(
                        "END:{closing} without matching BEGIN"
                    )));
                };
                if top.name != closing {
                    return Err(ParseError::Structure(format!(
                        "END:{closing} closes BEGIN:{}",
                        top.name
                    )));
                }
                match stack.last_mut() {
                    Some(parent) => parent.children.push(top),
                    None => roots.push(top),
                }
            }
            _ => {
                if let Some(top) = stack.last_mut() {
                    top.lines.push(line);
                }
                // Properties outside any component are ignored.
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(ParseError::Structure(format!(
            "unterminated BEGIN:{}",
            open.name
        )));
    }
    Ok(roots)
}

pub(crate) fn parse_calendar(codec: &Codec, input: &[u8]) -> Result<Vec<Event>, ParseError> {
    let unfolded = unfold(input, codec.relaxed_unfolding());
    let text = String::from_utf8_lossy(&unfolded);
    let lines = text.lines().filter_map(parse_content_line);
    let roots = build_components(lines)?;

    let calendars: Vec<&Component> = roots.iter().filter(|c| c.name == "VCALENDAR").collect();
    if calendars.is_empty() {
        return Err(ParseError::Structure("no VCALENDAR component".to_string()));
    }

    let mut events = Vec::new();
    for calendar in calendars {
        collect_events(codec, calendar, &mut events);
    }
    Ok(events)
}

/// Depth-first VEVENT collection; nested components are tolerated, unknown
/// ones skipped.
fn collect_events(codec: &Codec, component: &Component, out: &mut Vec<Event>) {
    for child in &component.children {
        if child.name == "VEVENT" {
            if let Some(event) = parse_event(codec, child) {
                out.push(event);
            }
        } else {
            collect_events(codec, child, out);
        }
    }
}

fn parse_dt(codec: &Codec, line: &ContentLine) -> Result<EventDateTime, ParseError> {
    let tzid = line.param("TZID");
    let value_is_date = line
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
    let resolved = tzid.and_then(|id| {
        let tz = codec.resolve_tz(id);
        if tz.is_none() {
            warn!(tzid = id, "unknown timezone id, using configured default");
        }
        tz
    });
    parse_datetime_value(
        &line.name,
        &line.value,
        value_is_date,
        tzid,
        resolved,
        codec.default_tz(),
    )
}

fn parse_event(codec: &Codec, component: &Component) -> Option<Event> {
    let mut uid: Option<String> = None;
    let mut dtstart: Option<EventDateTime> = None;
    let mut rrule: Option<RRule> = None;
    // Everything else accumulates into a template with a placeholder start.
    let mut summary = None;
    let mut description = None;
    let mut location = None;
    let mut dtend = None;
    let mut duration = None;
    let mut status = None;
    let mut transparency = Transparency::Opaque;
    let mut sequence = 0u32;
    let mut exdates = Vec::new();
    let mut recurrence_id = None;
    let mut categories = Vec::new();
    let mut organizer = None;
    let mut attendees = Vec::new();
    let mut color = None;
    let mut dtstamp = None;
    let mut last_modified = None;
    let mut created = None;
    let mut url = None;
    let mut images = Vec::new();
    let mut conferences = Vec::new();
    let mut links = Vec::new();
    let mut relations = Vec::new();
    let mut raw_properties = Vec::new();

    for line in &component.lines {
        match line.name.as_str() {
            "UID" => uid = Some(line.value.trim().to_string()),
            "DTSTART" => match parse_dt(codec, line) {
                Ok(dt) => dtstart = Some(dt),
                Err(err) => {
                    warn!(%err, "skipping VEVENT with malformed DTSTART");
                    return None;
                }
            },
            "DTEND" => match parse_dt(codec, line) {
                Ok(dt) => dtend = Some(dt),
                Err(err) => warn!(%err, "ignoring malformed DTEND"),
            },
            "DURATION" => match parse_duration("DURATION", &line.value) {
                Ok(d) => duration = Some(d),
                Err(err) => warn!(%err, "ignoring malformed DURATION"),
            },
            "SUMMARY" => summary = Some(unescape_text(&line.value)),
            "DESCRIPTION" => description = Some(unescape_text(&line.value)),
            "LOCATION" => location = Some(unescape_text(&line.value)),
            "STATUS" => {
                status = match line.value.trim().to_ascii_uppercase().as_str() {
                    "CONFIRMED" => Some(EventStatus::Confirmed),
                    "TENTATIVE" => Some(EventStatus::Tentative),
                    "CANCELLED" => Some(EventStatus::Cancelled),
                    other => {
                        warn!(status = other, "ignoring unknown STATUS");
                        None
                    }
                }
            }
            "TRANSP" => {
                transparency = if line.value.trim().eq_ignore_ascii_case("TRANSPARENT") {
                    Transparency::Transparent
                } else {
                    Transparency::Opaque
                }
            }
            "SEQUENCE" => match line.value.trim().parse::<u32>() {
                Ok(n) => sequence = n,
                Err(_) => warn!(value = %line.value, "ignoring malformed SEQUENCE"),
            },
            "RRULE" => match RRule::parse(&line.value, codec) {
                Ok(rule) => rrule = Some(rule),
                Err(err) => warn!(%err, "ignoring malformed RRULE"),
            },
            "EXDATE" => {
                for value in line.value.split(',') {
                    let exline = ContentLine {
                        name: "EXDATE".to_string(),
                        params: line.params.clone(),
                        value: value.to_string(),
                    };
                    match parse_dt(codec, &exline) {
                        Ok(dt) => exdates.push(dt),
                        Err(err) => warn!(%err, "ignoring malformed EXDATE entry"),
                    }
                }
            }
            "RECURRENCE-ID" => match parse_dt(codec, line) {
                Ok(dt) => recurrence_id = Some(dt),
                Err(err) => warn!(%err, "ignoring malformed RECURRENCE-ID"),
            },
            "CATEGORIES" => {
                categories.extend(
                    split_unescaped(&line.value, ',')
                        .into_iter()
                        .map(|c| unescape_text(c.trim()))
                        .filter(|c| !c.is_empty()),
                );
            }
            "ORGANIZER" => {
                organizer = Some(Organizer {
                    cal_address: line.value.trim().to_string(),
                    common_name: line.param("CN").map(str::to_string),
                })
            }
            "ATTENDEE" => attendees.push(Attendee {
                cal_address: line.value.trim().to_string(),
                common_name: line.param("CN").map(str::to_string),
                role: line.param("ROLE").map(str::to_string),
                partstat: line.param("PARTSTAT").map(str::to_string),
                rsvp: line
                    .param("RSVP")
                    .is_some_and(|v| v.eq_ignore_ascii_case("TRUE")),
            }),
            "COLOR" => color = Some(line.value.trim().to_string()),
            "DTSTAMP" => dtstamp = parse_dt(codec, line).ok(),
            "LAST-MODIFIED" => last_modified = parse_dt(codec, line).ok(),
            "CREATED" => created = parse_dt(codec, line).ok(),
            "URL" => url = Some(line.value.trim().to_string()),
            "IMAGE" => {
                let is_binary = line
                    .param("VALUE")
                    .is_some_and(|v| v.eq_ignore_ascii_case("BINARY"));
                images.push(Image {
                    uri: (!is_binary).then(|| line.value.trim().to_string()),
                    data: is_binary.then(|| line.value.trim().to_string()),
                    fmttype: line.param("FMTTYPE").map(str::to_string),
                    display: line.param("DISPLAY").map(str::to_string),
                });
            }
            "CONFERENCE" => conferences.push(Conference {
                uri: line.value.trim().to_string(),
                features: line
                    .param("FEATURE")
                    .map(|f| f.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                label: line.param("LABEL").map(str::to_string),
            }),
            "LINK" => links.push(Link {
                href: line.value.trim().to_string(),
                rel: line.param("LINKREL").map(str::to_string),
                fmttype: line.param("FMTTYPE").map(str::to_string),
                label: line.param("LABEL").map(str::to_string),
            }),
            "RELATED-TO" => relations.push(Relation {
                target: unescape_text(line.value.trim()),
                reltype: line.param("RELTYPE").map(str::to_string),
            }),
            _ => raw_properties.push(RawProperty {
                name: line.name.clone(),
                params: line.params.clone(),
                value: line.value.clone(),
            }),
        }
    }

    let Some(uid) = uid.filter(|u| !u.is_empty()) else {
        warn!("skipping VEVENT without UID");
        return None;
    };
    let Some(dtstart) = dtstart else {
        warn!(%uid, "skipping VEVENT without DTSTART");
        return None;
    };

    // RFC-illegal but observed in the wild: both DTEND and DURATION.
    // DTEND wins.
    if dtend.is_some() && duration.is_some() {
        warn!(%uid, "VEVENT carries both DTEND and DURATION; keeping DTEND");
        duration = None;
    }

    // An override must not carry an RRULE; ignore it when it does.
    if recurrence_id.is_some() && rrule.is_some() {
        warn!(%uid, "override VEVENT carries an RRULE; ignoring the rule");
        rrule = None;
    }

    let mut alarms = Vec::new();
    let mut locations = Vec::new();
    let mut participants = Vec::new();
    for child in &component.children {
        match child.name.as_str() {
            "VALARM" => {
                if let Some(alarm) = parse_alarm(codec, child) {
                    alarms.push(alarm);
                }
            }
            "VLOCATION" | "LOCATION" => locations.push(parse_vlocation(child)),
            "PARTICIPANT" | "VPARTICIPANT" => participants.push(parse_participant(child)),
            other => warn!(component = other, %uid, "skipping unknown sub-component"),
        }
    }

    Some(Event {
        uid,
        summary,
        description,
        location,
        dtstart,
        dtend,
        duration,
        status,
        transparency,
        sequence,
        rrule,
        exdates,
        recurrence_id,
        alarms,
        categories,
        organizer,
        attendees,
        color,
        dtstamp,
        last_modified,
        created,
        url,
        images,
        conferences,
        locations,
        participants,
        links,
        relations,
        raw_properties,
    })
}

fn parse_alarm(codec: &Codec, component: &Component) -> Option<Alarm> {
    let mut action = None;
    let mut trigger_duration = None;
    let mut trigger_absolute = None;
    let mut related_to_end = false;
    let mut summary = None;
    let mut alarm_description = None;
    let mut repeat = None;
    let mut repeat_duration = None;
    let mut uid = None;
    let mut acknowledged = None;
    let mut related_to = None;
    let mut is_default = false;
    let mut proximity = None;

    for line in &component.lines {
        match line.name.as_str() {
            "ACTION" => {
                action = match line.value.trim().to_ascii_uppercase().as_str() {
                    "AUDIO" => Some(AlarmAction::Audio),
                    "DISPLAY" => Some(AlarmAction::Display),
                    "EMAIL" => Some(AlarmAction::Email),
                    other => {
                        warn!(action = other, "unknown VALARM action");
                        None
                    }
                }
            }
            "TRIGGER" => {
                related_to_end = line
                    .param("RELATED")
                    .is_some_and(|v| v.eq_ignore_ascii_case("END"));
                let value = line.value.trim();
                let absolute = line
                    .param("VALUE")
                    .is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"))
                    || (!value.starts_with('P')
                        && !value.starts_with("-P")
                        && !value.starts_with("+P"));
                if absolute {
                    trigger_absolute = parse_dt(codec, line).ok();
                } else {
                    trigger_duration = parse_duration("TRIGGER", value).ok();
                }
            }
            "REPEAT" => repeat = line.value.trim().parse::<u32>().ok(),
            "DURATION" => repeat_duration = parse_duration("DURATION", &line.value).ok(),
            "SUMMARY" => summary = Some(unescape_text(&line.value)),
            "DESCRIPTION" => alarm_description = Some(unescape_text(&line.value)),
            "UID" => uid = Some(line.value.trim().to_string()),
            "ACKNOWLEDGED" => acknowledged = parse_dt(codec, line).ok(),
            "RELATED-TO" => related_to = Some(unescape_text(line.value.trim())),
            "X-APPLE-DEFAULT-ALARM" => {
                is_default = line.value.trim().eq_ignore_ascii_case("TRUE");
            }
            "PROXIMITY" => {
                proximity = match line.value.trim().to_ascii_uppercase().as_str() {
                    "ARRIVE" => Some(AlarmProximity::Arrive),
                    "DEPART" => Some(AlarmProximity::Depart),
                    other => {
                        warn!(proximity = other, "unknown VALARM proximity");
                        None
                    }
                }
            }
            _ => {}
        }
    }

    let action = action?;
    if trigger_duration.is_none() && trigger_absolute.is_none() {
        warn!("skipping VALARM without a usable TRIGGER");
        return None;
    }
    // Exactly one trigger form; the relative one wins when both appear.
    if trigger_duration.is_some() {
        trigger_absolute = None;
    }

    Some(Alarm {
        action,
        trigger_duration,
        trigger_absolute,
        related_to_end,
        summary,
        alarm_description,
        repeat,
        repeat_duration,
        uid,
        acknowledged,
        related_to,
        is_default,
        proximity,
    })
}

fn parse_vlocation(component: &Component) -> StructuredLocation {
    let mut loc = StructuredLocation::default();
    for line in &component.lines {
        match line.name.as_str() {
            "UID" => loc.uid = Some(line.value.trim().to_string()),
            "NAME" => loc.name = Some(unescape_text(&line.value)),
            "DESCRIPTION" => loc.description = Some(unescape_text(&line.value)),
            "LOCATION-TYPE" => loc.location_type = Some(line.value.trim().to_string()),
            "URL" => loc.url = Some(line.value.trim().to_string()),
            _ => {}
        }
    }
    loc
}

fn parse_participant(component: &Component) -> Participant {
    let mut participant = Participant::default();
    for line in &component.lines {
        match line.name.as_str() {
            "UID" => participant.uid = Some(line.value.trim().to_string()),
            "PARTICIPANT-TYPE" => {
                participant.participant_type = Some(line.value.trim().to_string())
            }
            "CALENDAR-ADDRESS" => participant.cal_address = Some(line.value.trim().to_string()),
            "DESCRIPTION" => participant.description = Some(unescape_text(&line.value)),
            _ => {}
        }
    }
    participant
}
