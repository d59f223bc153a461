use caldav_sync::ical::{Codec, CodecConfig, parse_calendar};
use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

fn single_event(body: &str) -> caldav_sync::Event {
    let ics = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n\
         BEGIN:VEVENT\r\nUID:dt-test\r\n{body}\r\nEND:VEVENT\r\nEND:VCALENDAR\r\n"
    );
    parse_calendar(ics.as_bytes()).expect("calendar parses").remove(0)
}

#[test]
fn utc_datetime_sets_the_utc_flag() {
    let event = single_event("DTSTART:20240105T090000Z");
    let dt = &event.dtstart;
    assert!(dt.is_utc);
    assert!(!dt.is_date);
    assert!(dt.tzid.is_none());
    assert_eq!(dt.instant(), Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap());
    assert_eq!(dt.canonical(), "20240105T090000Z");
}

#[test]
fn zoned_datetime_resolves_through_the_tzid() {
    let event = single_event("DTSTART;TZID=America/New_York:20240105T090000");
    let dt = &event.dtstart;
    assert!(!dt.is_utc);
    assert_eq!(dt.tzid.as_deref(), Some("America/New_York"));
    // EST is UTC-5 in January.
    assert_eq!(dt.instant(), Utc.with_ymd_and_hms(2024, 1, 5, 14, 0, 0).unwrap());
    assert_eq!(dt.canonical(), "20240105T090000");
    assert_eq!(dt.day_code(), "20240105");
}

#[test]
fn date_value_is_midnight_in_the_stated_zone() {
    let event = single_event("DTSTART;VALUE=DATE:20240105");
    let dt = &event.dtstart;
    assert!(dt.is_date);
    assert_eq!(dt.canonical(), "20240105");
    assert_eq!(dt.instant(), Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
}

#[test]
fn eight_digit_value_is_recognized_as_date_without_parameter() {
    let event = single_event("DTSTART:20240105");
    assert!(event.dtstart.is_date);
}

#[test]
fn floating_datetime_uses_the_configured_default_zone() {
    let codec = Codec::new(CodecConfig {
        default_tz: Tz::Europe__Berlin,
        ..CodecConfig::default()
    });
    let ics = "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n\
               BEGIN:VEVENT\r\nUID:float-1\r\nDTSTART:20240105T090000\r\n\
               END:VEVENT\r\nEND:VCALENDAR\r\n";
    let event = codec.parse_calendar(ics.as_bytes()).expect("parses").remove(0);
    let dt = &event.dtstart;
    assert!(!dt.is_utc);
    assert!(dt.tzid.is_none());
    // CET is UTC+1 in January.
    assert_eq!(dt.instant(), Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap());
}

#[test]
fn legacy_zone_names_resolve_through_the_alias_table() {
    let codec = Codec::default();
    assert_eq!(
        codec.resolve_tz("Eastern Standard Time"),
        Some(Tz::America__New_York)
    );
    assert_eq!(codec.resolve_tz("US/Eastern"), Some(Tz::US__Eastern));
    assert_eq!(codec.resolve_tz("gmt"), Some(Tz::UTC));
    assert_eq!(codec.resolve_tz("Atlantis/Nowhere"), None);
}

#[test]
fn caller_supplied_aliases_take_effect() {
    let codec = Codec::new(CodecConfig {
        tz_aliases: vec![("Corporate HQ".to_string(), "Europe/Paris".to_string())],
        ..CodecConfig::default()
    });
    assert_eq!(codec.resolve_tz("Corporate HQ"), Some(Tz::Europe__Paris));
}

#[test]
fn unknown_tzid_falls_back_to_default_zone_but_keeps_the_id() {
    let event = single_event("DTSTART;TZID=Atlantis/Nowhere:20240105T090000");
    let dt = &event.dtstart;
    assert_eq!(dt.tzid.as_deref(), Some("Atlantis/Nowhere"));
    // Default codec zone is UTC.
    assert_eq!(dt.instant(), Utc.with_ymd_and_hms(2024, 1, 5, 9, 0, 0).unwrap());
}

#[test]
fn nonexistent_local_time_shifts_forward() {
    // 2024-03-10 02:30 does not exist in America/New_York (spring forward
    // 02:00 -> 03:00).
    let event = single_event("DTSTART;TZID=America/New_York:20240310T023000");
    assert_eq!(event.dtstart.canonical(), "20240310T030000");
    assert_eq!(
        event.dtstart.instant(),
        Utc.with_ymd_and_hms(2024, 3, 10, 7, 0, 0).unwrap()
    );
}

#[test]
fn ambiguous_local_time_takes_the_earlier_offset() {
    // 2024-11-03 01:30 happens twice in America/New_York; the first
    // occurrence is EDT (UTC-4).
    let event = single_event("DTSTART;TZID=America/New_York:20241103T013000");
    assert_eq!(
        event.dtstart.instant(),
        Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap()
    );
}
