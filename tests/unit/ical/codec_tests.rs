use caldav_sync::ical::{Codec, make_import_id, parse_calendar};

fn wrap(body: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n{body}END:VCALENDAR\r\n"
    )
}

#[test]
fn parse_extracts_basic_event_fields() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:meeting-1@example.com\r\n\
         DTSTAMP:20240101T120000Z\r\n\
         DTSTART:20240105T090000Z\r\n\
         DTEND:20240105T100000Z\r\n\
         SUMMARY:Team sync\r\n\
         DESCRIPTION:Weekly planning\\, with notes\\nand a second line\r\n\
         LOCATION:Room 4\\; annex\r\n\
         STATUS:CONFIRMED\r\n\
         TRANSP:TRANSPARENT\r\n\
         SEQUENCE:3\r\n\
         CATEGORIES:Work,Planning\r\n\
         END:VEVENT\r\n",
    );

    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.uid, "meeting-1@example.com");
    assert_eq!(event.summary.as_deref(), Some("Team sync"));
    assert_eq!(
        event.description.as_deref(),
        Some("Weekly planning, with notes\nand a second line")
    );
    assert_eq!(event.location.as_deref(), Some("Room 4; annex"));
    assert_eq!(event.sequence, 3);
    assert_eq!(event.categories, vec!["Work", "Planning"]);
    assert!(event.dtstart.is_utc);
    assert!(!event.is_all_day());
    assert_eq!(event.import_id(), "meeting-1@example.com");
}

#[test]
fn folded_lines_are_unfolded_before_parsing() {
    let ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n\
               BEGIN:VEVENT\r\n\
               UID:folded-1\r\n\
               DTSTART:20240105T090000Z\r\n\
               SUMMARY:This summary is split acr\r\n oss two physical lines\r\n\
               END:VEVENT\r\nEND:VCALENDAR\r\n";

    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    assert_eq!(
        events[0].summary.as_deref(),
        Some("This summary is split across two physical lines")
    );
}

#[test]
fn bare_lf_input_is_tolerated() {
    let ics = "BEGIN:VCALENDAR\nVERSION:2.0\nPRODID:-//test//EN\n\
               BEGIN:VEVENT\nUID:lf-1\nDTSTART:20240105T090000Z\n\
               SUMMARY:Unix\n line endings\nEND:VEVENT\nEND:VCALENDAR\n";
    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    assert_eq!(events[0].summary.as_deref(), Some("Unix line endings"));
}

#[test]
fn master_and_override_fan_out_with_distinct_import_ids() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:daily-standup-123\r\n\
         DTSTART:20241201T100000Z\r\n\
         RRULE:FREQ=DAILY;COUNT=10\r\n\
         SUMMARY:Standup\r\n\
         END:VEVENT\r\n\
         BEGIN:VEVENT\r\n\
         UID:daily-standup-123\r\n\
         RECURRENCE-ID:20241205T100000Z\r\n\
         DTSTART:20241205T140000Z\r\n\
         SUMMARY:Standup (moved)\r\n\
         END:VEVENT\r\n",
    );

    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    assert_eq!(events.len(), 2);

    let master = events
        .iter()
        .find(|e| e.recurrence_id.is_none())
        .expect("master present");
    let moved = events
        .iter()
        .find(|e| e.recurrence_id.is_some())
        .expect("override present");

    assert_eq!(master.import_id(), "daily-standup-123");
    assert_eq!(
        moved.import_id(),
        "daily-standup-123:RECID:20241205T100000Z"
    );
    assert!(master.rrule.is_some());
    assert!(moved.rrule.is_none());
}

#[test]
fn rrule_on_override_is_dropped() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:series-9\r\n\
         RECURRENCE-ID:20240110T080000Z\r\n\
         DTSTART:20240110T090000Z\r\n\
         RRULE:FREQ=DAILY\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    assert!(events[0].rrule.is_none(), "override must not keep an RRULE");
}

#[test]
fn vevent_missing_uid_or_dtstart_is_skipped_not_fatal() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         DTSTART:20240105T090000Z\r\n\
         SUMMARY:No uid\r\n\
         END:VEVENT\r\n\
         BEGIN:VEVENT\r\n\
         UID:no-start\r\n\
         SUMMARY:No dtstart\r\n\
         END:VEVENT\r\n\
         BEGIN:VEVENT\r\n\
         UID:good-1\r\n\
         DTSTART:20240105T090000Z\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].uid, "good-1");
}

#[test]
fn missing_vcalendar_is_a_structural_error() {
    let err = parse_calendar(b"BEGIN:VEVENT\r\nUID:x\r\nEND:VEVENT\r\n")
        .expect_err("must fail without VCALENDAR");
    assert!(err.to_string().contains("VCALENDAR"));
}

#[test]
fn dtend_wins_over_duration_when_both_present() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:both-1\r\n\
         DTSTART:20240105T090000Z\r\n\
         DTEND:20240105T110000Z\r\n\
         DURATION:PT30M\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    let event = &events[0];
    assert!(event.duration.is_none());
    let end = event.effective_end();
    assert_eq!(end.canonical(), "20240105T110000Z");
}

#[test]
fn all_day_event_ends_next_day_without_dtend() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:allday-1\r\n\
         DTSTART;VALUE=DATE:20240105\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    let event = &events[0];
    assert!(event.is_all_day());
    assert_eq!(event.effective_end().canonical(), "20240106");
}

#[test]
fn exdate_list_shares_the_property_tzid() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:exdate-1\r\n\
         DTSTART;TZID=Europe/Paris:20240105T090000\r\n\
         RRULE:FREQ=DAILY;COUNT=10\r\n\
         EXDATE;TZID=Europe/Paris:20240106T090000,20240108T090000\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("calendar parses");
    let event = &events[0];
    assert_eq!(event.exdates.len(), 2);
    assert!(
        event
            .exdates
            .iter()
            .all(|d| d.tzid.as_deref() == Some("Europe/Paris"))
    );
    assert_eq!(event.exdates[0].canonical(), "20240106T090000");
}

#[test]
fn unknown_properties_round_trip_verbatim() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:raw-1\r\n\
         DTSTART:20240105T090000Z\r\n\
         X-CUSTOM-TAG;X-PARAM=yes:opaque payload\r\n\
         END:VEVENT\r\n",
    );
    let codec = Codec::default();
    let events = codec.parse_calendar(ics.as_bytes()).expect("parses");
    let event = &events[0];
    assert_eq!(event.raw_properties.len(), 1);
    assert_eq!(event.raw_properties[0].name, "X-CUSTOM-TAG");

    let regenerated = codec.generate(event);
    assert!(regenerated.contains("X-CUSTOM-TAG;X-PARAM=yes:opaque payload"));

    let reparsed = codec
        .parse_calendar(regenerated.as_bytes())
        .expect("regenerated output parses");
    assert_eq!(reparsed[0].raw_properties, event.raw_properties);
}

#[test]
fn generate_then_parse_preserves_modeled_fields() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:rt-1@example.com\r\n\
         DTSTAMP:20240101T120000Z\r\n\
         DTSTART;TZID=America/New_York:20240705T183000\r\n\
         DTEND;TZID=America/New_York:20240705T193000\r\n\
         SUMMARY:Dinner\\, outside\r\n\
         STATUS:TENTATIVE\r\n\
         SEQUENCE:2\r\n\
         RRULE:FREQ=WEEKLY;INTERVAL=2;BYDAY=FR\r\n\
         CATEGORIES:Food\r\n\
         ORGANIZER;CN=Ana:mailto:ana@example.com\r\n\
         ATTENDEE;CN=Bo;ROLE=REQ-PARTICIPANT;PARTSTAT=ACCEPTED;RSVP=TRUE:mailto:bo@example.com\r\n\
         URL:https://example.com/dinner\r\n\
         COLOR:tomato\r\n\
         BEGIN:VALARM\r\n\
         ACTION:DISPLAY\r\n\
         TRIGGER:-PT15M\r\n\
         UID:alarm-1\r\n\
         PROXIMITY:ARRIVE\r\n\
         END:VALARM\r\n\
         END:VEVENT\r\n",
    );
    let codec = Codec::default();
    let original = codec.parse_calendar(ics.as_bytes()).expect("parses");
    let regenerated = codec.generate(&original[0]);
    let reparsed = codec
        .parse_calendar(regenerated.as_bytes())
        .expect("round trip parses");
    assert_eq!(reparsed[0], original[0]);
}

#[test]
fn alarm_extensions_are_modeled() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:alarmed-1\r\n\
         DTSTART:20240105T090000Z\r\n\
         BEGIN:VALARM\r\n\
         ACTION:EMAIL\r\n\
         TRIGGER;RELATED=END:PT0S\r\n\
         ACKNOWLEDGED:20240104T080000Z\r\n\
         RELATED-TO:alarm-0\r\n\
         X-APPLE-DEFAULT-ALARM:TRUE\r\n\
         PROXIMITY:DEPART\r\n\
         REPEAT:2\r\n\
         DURATION:PT5M\r\n\
         END:VALARM\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("parses");
    let alarm = &events[0].alarms[0];
    assert!(alarm.related_to_end);
    assert!(alarm.is_default);
    assert_eq!(alarm.related_to.as_deref(), Some("alarm-0"));
    assert_eq!(alarm.repeat, Some(2));
    assert!(alarm.acknowledged.is_some());
}

#[test]
fn nested_unknown_components_are_skipped() {
    let ics = wrap(
        "BEGIN:VTIMEZONE\r\n\
         TZID:Europe/Paris\r\n\
         BEGIN:STANDARD\r\n\
         DTSTART:19701025T030000\r\n\
         END:STANDARD\r\n\
         END:VTIMEZONE\r\n\
         BEGIN:VEVENT\r\n\
         UID:tz-1\r\n\
         DTSTART;TZID=Europe/Paris:20240105T090000\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("parses");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].uid, "tz-1");
}

#[test]
fn import_id_is_injective_over_uid_and_recurrence_id() {
    let ics = wrap(
        "BEGIN:VEVENT\r\n\
         UID:inj-1\r\n\
         RECURRENCE-ID:20240105T090000Z\r\n\
         DTSTART:20240105T100000Z\r\n\
         END:VEVENT\r\n",
    );
    let events = parse_calendar(ics.as_bytes()).expect("parses");
    let rid = events[0].recurrence_id.as_ref().expect("has recurrence id");

    assert_eq!(make_import_id("inj-1", None), "inj-1");
    assert_eq!(
        make_import_id("inj-1", Some(rid)),
        "inj-1:RECID:20240105T090000Z"
    );
    assert_ne!(make_import_id("inj-1", None), make_import_id("inj-2", None));
    assert_ne!(
        make_import_id("inj-1", Some(rid)),
        make_import_id("inj-2", Some(rid))
    );
}

#[test]
fn generated_output_folds_long_lines() {
    let long_summary = "x".repeat(200);
    let ics = wrap(&format!(
        "BEGIN:VEVENT\r\nUID:fold-1\r\nDTSTART:20240105T090000Z\r\nSUMMARY:{long_summary}\r\nEND:VEVENT\r\n"
    ));
    let codec = Codec::default();
    let events = codec.parse_calendar(ics.as_bytes()).expect("parses");
    let out = codec.generate(&events[0]);
    assert!(out.lines().all(|l| l.len() <= 75));
    let reparsed = codec.parse_calendar(out.as_bytes()).expect("parses");
    assert_eq!(reparsed[0].summary.as_deref(), Some(long_summary.as_str()));
}
