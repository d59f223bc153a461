//! iCalendar generation: events back to RFC 5545 text.
//!
//! Output uses CRLF endings and 75-octet line folding. For the fields the
//! codec models, `parse(generate(e))` equals `e`; unmodeled properties pass
//! through the raw-property mapping.

use crate::ical::EventDateTime;
use crate::ical::datetime::format_duration;
use crate::ical::model::{Alarm, Event, Participant, RawProperty, StructuredLocation, Transparency};
use crate::ical::parse::escape_text;

pub(crate) const PRODID: &str = "-//caldav-sync//EN";

/// Generate a complete `VCALENDAR` stream for the given events (one event,
/// or a recurring master with its overrides).
pub(crate) fn generate(events: &[Event]) -> String {
    let mut out = String::with_capacity(512 + events.len() * 512);
    fold_into(&mut out, "BEGIN:VCALENDAR");
    fold_into(&mut out, "VERSION:2.0");
    fold_into(&mut out, &format!("PRODID:{PRODID}"));
    for event in events {
        emit_event(&mut out, event);
    }
    fold_into(&mut out, "END:VCALENDAR");
    out
}

fn emit_event(out: &mut String, event: &Event) {
    fold_into(out, "BEGIN:VEVENT");
    fold_into(out, &format!("UID:{}", event.uid));
    if let Some(dtstamp) = &event.dtstamp {
        fold_into(out, &dt_line("DTSTAMP", dtstamp));
    }
    fold_into(out, &dt_line("DTSTART", &event.dtstart));
    if let Some(dtend) = &event.dtend {
        fold_into(out, &dt_line("DTEND", dtend));
    } else if let Some(duration) = event.duration {
        fold_into(out, &format!("DURATION:{}", format_duration(duration)));
    }
    if let Some(rid) = &event.recurrence_id {
        fold_into(out, &dt_line("RECURRENCE-ID", rid));
    }
    if let Some(rule) = &event.rrule {
        fold_into(out, &format!("RRULE:{}", rule.to_value_string()));
    }
    emit_exdates(out, &event.exdates);
    if let Some(summary) = &event.summary {
        fold_into(out, &format!("SUMMARY:{}", escape_text(summary)));
    }
    if let Some(description) = &event.description {
        fold_into(out, &format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(location) = &event.location {
        fold_into(out, &format!("LOCATION:{}", escape_text(location)));
    }
    if let Some(status) = event.status {
        fold_into(out, &format!("STATUS:{}", status.as_str()));
    }
    if event.transparency == Transparency::Transparent {
        fold_into(out, &format!("TRANSP:{}", event.transparency.as_str()));
    }
    if event.sequence > 0 {
        fold_into(out, &format!("SEQUENCE:{}", event.sequence));
    }
    if !event.categories.is_empty() {
        let joined: Vec<String> = event.categories.iter().map(|c| escape_text(c)).collect();
        fold_into(out, &format!("CATEGORIES:{}", joined.join(",")));
    }
    if let Some(organizer) = &event.organizer {
        let mut line = String::from("ORGANIZER");
        push_param_opt(&mut line, "CN", organizer.common_name.as_deref());
        line.push(':');
        line.push_str(&organizer.cal_address);
        fold_into(out, &line);
    }
    for attendee in &event.attendees {
        let mut line = String::from("ATTENDEE");
        push_param_opt(&mut line, "CN", attendee.common_name.as_deref());
        push_param_opt(&mut line, "ROLE", attendee.role.as_deref());
        push_param_opt(&mut line, "PARTSTAT", attendee.partstat.as_deref());
        if attendee.rsvp {
            line.push_str(";RSVP=TRUE");
        }
        line.push(':');
        line.push_str(&attendee.cal_address);
        fold_into(out, &line);
    }
    if let Some(color) = &event.color {
        fold_into(out, &format!("COLOR:{color}"));
    }
    if let Some(created) = &event.created {
        fold_into(out, &dt_line("CREATED", created));
    }
    if let Some(last_modified) = &event.last_modified {
        fold_into(out, &dt_line("LAST-MODIFIED", last_modified));
    }
    if let Some(url) = &event.url {
        fold_into(out, &format!("URL:{url}"));
    }
    for image in &event.images {
        let mut line = String::from("IMAGE");
        if image.data.is_some() {
            line.push_str(";VALUE=BINARY;ENCODING=BASE64");
        } else {
            line.push_str(";VALUE=URI");
        }
        push_param_opt(&mut line, "FMTTYPE", image.fmttype.as_deref());
        push_param_opt(&mut line, "DISPLAY", image.display.as_deref());
        line.push(':');
        if let Some(data) = &image.data {
            line.push_str(data);
        } else if let Some(uri) = &image.uri {
            line.push_str(uri);
        }
        fold_into(out, &line);
    }
    for conference in &event.conferences {
        let mut line = String::from("CONFERENCE;VALUE=URI");
        if !conference.features.is_empty() {
            push_param(&mut line, "FEATURE", &conference.features.join(","));
        }
        push_param_opt(&mut line, "LABEL", conference.label.as_deref());
        line.push(':');
        line.push_str(&conference.uri);
        fold_into(out, &line);
    }
    for link in &event.links {
        let mut line = String::from("LINK");
        push_param_opt(&mut line, "LINKREL", link.rel.as_deref());
        push_param_opt(&mut line, "FMTTYPE", link.fmttype.as_deref());
        push_param_opt(&mut line, "LABEL", link.label.as_deref());
        line.push(':');
        line.push_str(&link.href);
        fold_into(out, &line);
    }
    for relation in &event.relations {
        let mut line = String::from("RELATED-TO");
        push_param_opt(&mut line, "RELTYPE", relation.reltype.as_deref());
        line.push(':');
        line.push_str(&escape_text(&relation.target));
        fold_into(out, &line);
    }
    for raw in &event.raw_properties {
        emit_raw(out, raw);
    }
    for alarm in &event.alarms {
        emit_alarm(out, alarm);
    }
    for location in &event.locations {
        emit_vlocation(out, location);
    }
    for participant in &event.participants {
        emit_participant(out, participant);
    }
    fold_into(out, "END:VEVENT");
}

/// Consecutive EXDATE entries sharing zone and value type are joined into
/// one comma-separated property.
fn emit_exdates(out: &mut String, exdates: &[EventDateTime]) {
    let mut i = 0;
    while i < exdates.len() {
        let head = &exdates[i];
        let mut values = vec![dt_value(head)];
        let mut j = i + 1;
        while j < exdates.len() {
            let next = &exdates[j];
            if next.tzid == head.tzid && next.is_utc == head.is_utc && next.is_date == head.is_date
            {
                values.push(dt_value(next));
                j += 1;
            } else {
                break;
            }
        }
        let mut line = String::from("EXDATE");
        push_dt_params(&mut line, head);
        line.push(':');
        line.push_str(&values.join(","));
        fold_into(out, &line);
        i = j;
    }
}

fn emit_alarm(out: &mut String, alarm: &Alarm) {
    fold_into(out, "BEGIN:VALARM");
    fold_into(out, &format!("ACTION:{}", alarm.action.as_str()));
    if let Some(duration) = alarm.trigger_duration {
        let mut line = String::from("TRIGGER");
        if alarm.related_to_end {
            line.push_str(";RELATED=END");
        }
        line.push(':');
        line.push_str(&format_duration(duration));
        fold_into(out, &line);
    } else if let Some(absolute) = &alarm.trigger_absolute {
        let mut line = String::from("TRIGGER;VALUE=DATE-TIME");
        line.push(':');
        line.push_str(&dt_value(absolute));
        fold_into(out, &line);
    }
    if let Some(summary) = &alarm.summary {
        fold_into(out, &format!("SUMMARY:{}", escape_text(summary)));
    }
    if let Some(description) = &alarm.alarm_description {
        fold_into(out, &format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(repeat) = alarm.repeat {
        fold_into(out, &format!("REPEAT:{repeat}"));
    }
    if let Some(duration) = alarm.repeat_duration {
        fold_into(out, &format!("DURATION:{}", format_duration(duration)));
    }
    if let Some(uid) = &alarm.uid {
        fold_into(out, &format!("UID:{uid}"));
    }
    if let Some(acknowledged) = &alarm.acknowledged {
        fold_into(out, &dt_line("ACKNOWLEDGED", acknowledged));
    }
    if let Some(related_to) = &alarm.related_to {
        fold_into(out, &format!("RELATED-TO:{}", escape_text(related_to)));
    }
    if alarm.is_default {
        fold_into(out, "X-APPLE-DEFAULT-ALARM:TRUE");
    }
    if let Some(proximity) = alarm.proximity {
        fold_into(out, &format!("PROXIMITY:{}", proximity.as_str()));
    }
    fold_into(out, "END:VALARM");
}

fn emit_vlocation(out: &mut String, location: &StructuredLocation) {
    fold_into(out, "BEGIN:VLOCATION");
    if let Some(uid) = &location.uid {
        fold_into(out, &format!("UID:{uid}"));
    }
    if let Some(name) = &location.name {
        fold_into(out, &format!("NAME:{}", escape_text(name)));
    }
    if let Some(description) = &location.description {
        fold_into(out, &format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(location_type) = &location.location_type {
        fold_into(out, &format!("LOCATION-TYPE:{location_type}"));
    }
    if let Some(url) = &location.url {
        fold_into(out, &format!("URL:{url}"));
    }
    fold_into(out, "END:VLOCATION");
}

fn emit_participant(out: &mut String, participant: &Participant) {
    fold_into(out, "BEGIN:PARTICIPANT");
    if let Some(uid) = &participant.uid {
        fold_into(out, &format!("UID:{uid}"));
    }
    if let Some(participant_type) = &participant.participant_type {
        fold_into(out, &format!("PARTICIPANT-TYPE:{participant_type}"));
    }
    if let Some(cal_address) = &participant.cal_address {
        fold_into(out, &format!("CALENDAR-ADDRESS:{cal_address}"));
    }
    if let Some(description) = &participant.description {
        fold_into(out, &format!("DESCRIPTION:{}", escape_text(description)));
    }
    fold_into(out, "END:PARTICIPANT");
}

fn emit_raw(out: &mut String, raw: &RawProperty) {
    let mut line = String::with_capacity(raw.name.len() + raw.value.len() + 16);
    line.push_str(&raw.name);
    for (name, value) in &raw.params {
        push_param(&mut line, name, value);
    }
    line.push(':');
    line.push_str(&raw.value);
    fold_into(out, &line);
}

/// The value text of a DATE/DATE-TIME, matching how it was read.
fn dt_value(dt: &EventDateTime) -> String {
    if dt.is_date {
        dt.day_code()
    } else if dt.is_utc {
        dt.wall.format("%Y%m%dT%H%M%SZ").to_string()
    } else {
        dt.wall.format("%Y%m%dT%H%M%S").to_string()
    }
}

fn push_dt_params(line: &mut String, dt: &EventDateTime) {
    if dt.is_date {
        line.push_str(";VALUE=DATE");
    }
    if !dt.is_utc
        && let Some(tzid) = &dt.tzid
    {
        push_param(line, "TZID", tzid);
    }
}

fn dt_line(name: &str, dt: &EventDateTime) -> String {
    let mut line = String::from(name);
    push_dt_params(&mut line, dt);
    line.push(':');
    line.push_str(&dt_value(dt));
    line
}

fn push_param(line: &mut String, name: &str, value: &str) {
    line.push(';');
    line.push_str(name);
    line.push('=');
    if value.contains([':', ';', ',']) {
        line.push('"');
        line.push_str(value);
        line.push('"');
    } else {
        line.push_str(value);
    }
}

fn push_param_opt(line: &mut String, name: &str, value: Option<&str>) {
    if let Some(value) = value {
        push_param(line, name, value);
    }
}

/// Append a logical line with RFC 5545 75-octet folding and CRLF ending.
fn fold_into(out: &mut String, line: &str) {
    const LIMIT: usize = 75;
    let mut remaining = line;
    let mut first = true;
    loop {
        let budget = if first { LIMIT } else { LIMIT - 1 };
        if remaining.len() <= budget {
            if !first {
                out.push(' ');
            }
            out.push_str(remaining);
            out.push_str("\r\n");
            return;
        }
        let mut cut = budget;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        if !first {
            out.push(' ');
        }
        out.push_str(&remaining[..cut]);
        out.push_str("\r\n");
        remaining = &remaining[cut..];
        first = false;
    }
}
