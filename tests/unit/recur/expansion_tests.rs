use caldav_sync::ical::parse_calendar;
use caldav_sync::recur::{build_override_map, expand};
use chrono::{DateTime, TimeZone, Utc};

fn parse(body: &str) -> Vec<caldav_sync::Event> {
    let ics = format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\n{body}END:VCALENDAR\r\n"
    );
    parse_calendar(ics.as_bytes()).expect("calendar parses")
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

#[test]
fn daily_count_with_moved_override() {
    let events = parse(
        "BEGIN:VEVENT\r\n\
         UID:daily-standup-123\r\n\
         DTSTART:20241201T100000Z\r\n\
         DTEND:20241201T101500Z\r\n\
         RRULE:FREQ=DAILY;COUNT=10\r\n\
         SUMMARY:Standup\r\n\
         END:VEVENT\r\n\
         BEGIN:VEVENT\r\n\
         UID:daily-standup-123\r\n\
         RECURRENCE-ID:20241205T100000Z\r\n\
         DTSTART:20241205T140000Z\r\n\
         DTEND:20241205T141500Z\r\n\
         SUMMARY:Standup (moved)\r\n\
         END:VEVENT\r\n",
    );
    let master = events
        .iter()
        .find(|e| e.recurrence_id.is_none())
        .expect("master");
    let overrides = build_override_map(&events);

    let occurrences = expand(master, utc(2024, 12, 1, 0, 0)..utc(2024, 12, 11, 0, 0), &overrides);
    assert_eq!(occurrences.len(), 10);

    let dec5 = occurrences
        .iter()
        .find(|o| o.import_id == "daily-standup-123:OCC:20241205")
        .expect("december 5 occurrence");
    assert_eq!(dec5.start(), utc(2024, 12, 5, 14, 0));
    assert_eq!(dec5.event.summary.as_deref(), Some("Standup (moved)"));

    let dec4 = occurrences
        .iter()
        .find(|o| o.import_id == "daily-standup-123:OCC:20241204")
        .expect("december 4 occurrence");
    assert_eq!(dec4.start(), utc(2024, 12, 4, 10, 0));
    assert_eq!(dec4.event.summary.as_deref(), Some("Standup"));
    assert!(dec4.event.rrule.is_none());
}

#[test]
fn output_is_sorted_and_bounded_by_the_range() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:bounds-1\r\nDTSTART:20240101T080000Z\r\n\
         RRULE:FREQ=DAILY\r\nEND:VEVENT\r\n",
    );
    let range = utc(2024, 1, 10, 0, 0)..utc(2024, 1, 15, 0, 0);
    let occurrences = expand(&events[0], range.clone(), &Default::default());
    assert_eq!(occurrences.len(), 5);
    assert!(occurrences.windows(2).all(|w| w[0].start() <= w[1].start()));
    assert!(
        occurrences
            .iter()
            .all(|o| o.start() >= range.start && o.start() < range.end)
    );
}

#[test]
fn exdates_remove_matching_occurrences() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:ex-1\r\nDTSTART:20240101T080000Z\r\n\
         RRULE:FREQ=DAILY;COUNT=5\r\n\
         EXDATE:20240102T080000Z,20240104T080000Z\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 2, 1, 0, 0),
        &Default::default(),
    );
    let starts: Vec<_> = occurrences.iter().map(|o| o.start()).collect();
    assert_eq!(
        starts,
        vec![
            utc(2024, 1, 1, 8, 0),
            utc(2024, 1, 3, 8, 0),
            utc(2024, 1, 5, 8, 0),
        ]
    );
}

#[test]
fn count_caps_the_set_before_exdate_filtering() {
    // COUNT=3 covers Jan 1-3; the EXDATE on Jan 2 removes one of those
    // three, it does not extend the series to Jan 4.
    let events = parse(
        "BEGIN:VEVENT\r\nUID:count-ex\r\nDTSTART:20240101T080000Z\r\n\
         RRULE:FREQ=DAILY;COUNT=3\r\nEXDATE:20240102T080000Z\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 2, 1, 0, 0),
        &Default::default(),
    );
    let starts: Vec<_> = occurrences.iter().map(|o| o.start()).collect();
    assert_eq!(starts, vec![utc(2024, 1, 1, 8, 0), utc(2024, 1, 3, 8, 0)]);
}

#[test]
fn until_is_inclusive() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:until-1\r\nDTSTART:20240101T080000Z\r\n\
         RRULE:FREQ=DAILY;UNTIL=20240103T080000Z\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 2, 1, 0, 0),
        &Default::default(),
    );
    assert_eq!(occurrences.len(), 3);
    assert_eq!(occurrences.last().unwrap().start(), utc(2024, 1, 3, 8, 0));
}

#[test]
fn weekly_byday_emits_selected_weekdays() {
    // Jan 1 2024 is a Monday.
    let events = parse(
        "BEGIN:VEVENT\r\nUID:weekly-1\r\nDTSTART:20240101T090000Z\r\n\
         RRULE:FREQ=WEEKLY;BYDAY=MO,WE;COUNT=5\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 2, 1, 0, 0),
        &Default::default(),
    );
    let starts: Vec<_> = occurrences.iter().map(|o| o.start()).collect();
    assert_eq!(
        starts,
        vec![
            utc(2024, 1, 1, 9, 0),
            utc(2024, 1, 3, 9, 0),
            utc(2024, 1, 8, 9, 0),
            utc(2024, 1, 10, 9, 0),
            utc(2024, 1, 15, 9, 0),
        ]
    );
}

#[test]
fn monthly_short_months_are_skipped() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:day31\r\nDTSTART:20240131T120000Z\r\n\
         RRULE:FREQ=MONTHLY;COUNT=4\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2025, 1, 1, 0, 0),
        &Default::default(),
    );
    let starts: Vec<_> = occurrences.iter().map(|o| o.start()).collect();
    // February, April and June lack a 31st.
    assert_eq!(
        starts,
        vec![
            utc(2024, 1, 31, 12, 0),
            utc(2024, 3, 31, 12, 0),
            utc(2024, 5, 31, 12, 0),
            utc(2024, 7, 31, 12, 0),
        ]
    );
}

#[test]
fn yearly_leap_day_only_lands_on_leap_years() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:leap-1\r\nDTSTART:20240229T100000Z\r\n\
         RRULE:FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=29\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2029, 1, 1, 0, 0),
        &Default::default(),
    );
    let starts: Vec<_> = occurrences.iter().map(|o| o.start()).collect();
    assert_eq!(starts, vec![utc(2024, 2, 29, 10, 0), utc(2028, 2, 29, 10, 0)]);
}

#[test]
fn bysetpos_selects_from_the_filtered_period_set() {
    // Last weekday of each month.
    let events = parse(
        "BEGIN:VEVENT\r\nUID:setpos-1\r\nDTSTART:20240131T170000Z\r\n\
         RRULE:FREQ=MONTHLY;BYDAY=MO,TU,WE,TH,FR;BYSETPOS=-1;COUNT=3\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 6, 1, 0, 0),
        &Default::default(),
    );
    let starts: Vec<_> = occurrences.iter().map(|o| o.start()).collect();
    assert_eq!(
        starts,
        vec![
            utc(2024, 1, 31, 17, 0), // Wednesday
            utc(2024, 2, 29, 17, 0), // Thursday
            utc(2024, 3, 29, 17, 0), // Friday (the 31st is a Sunday)
        ]
    );
}

#[test]
fn wall_clock_duration_is_preserved_across_fall_back() {
    // 8-hour overnight shift in New York spanning the 2024-11-03 fall-back:
    // the occurrence crossing the transition stays 8 wall-clock hours,
    // which is 9 real hours that night.
    let events = parse(
        "BEGIN:VEVENT\r\nUID:night-shift\r\n\
         DTSTART;TZID=America/New_York:20241101T220000\r\n\
         DTEND;TZID=America/New_York:20241102T060000\r\n\
         RRULE:FREQ=DAILY;COUNT=3\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 11, 1, 0, 0)..utc(2024, 11, 10, 0, 0),
        &Default::default(),
    );
    assert_eq!(occurrences.len(), 3);

    for occurrence in &occurrences {
        let event = &occurrence.event;
        let wall = event.effective_end().wall - event.dtstart.wall;
        assert_eq!(wall.num_hours(), 8, "wall duration must stay 8h");
    }

    // Nov 2 22:00 EDT -> Nov 3 06:00 EST crosses the repeated hour.
    let crossing = &occurrences[1];
    let real = crossing.event.effective_end().instant() - crossing.event.dtstart.instant();
    assert_eq!(real.num_hours(), 9);
}

#[test]
fn non_recurring_master_yields_its_own_instance_only() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:once-1\r\nDTSTART:20240110T100000Z\r\nEND:VEVENT\r\n",
    );
    let inside = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 2, 1, 0, 0),
        &Default::default(),
    );
    assert_eq!(inside.len(), 1);
    assert_eq!(inside[0].import_id, "once-1:OCC:20240110");

    let outside = expand(
        &events[0],
        utc(2024, 3, 1, 0, 0)..utc(2024, 4, 1, 0, 0),
        &Default::default(),
    );
    assert!(outside.is_empty());
}

#[test]
fn all_day_expansion_keeps_date_values() {
    let events = parse(
        "BEGIN:VEVENT\r\nUID:allday-r\r\nDTSTART;VALUE=DATE:20240101\r\n\
         RRULE:FREQ=WEEKLY;COUNT=3\r\nEND:VEVENT\r\n",
    );
    let occurrences = expand(
        &events[0],
        utc(2024, 1, 1, 0, 0)..utc(2024, 2, 1, 0, 0),
        &Default::default(),
    );
    assert_eq!(occurrences.len(), 3);
    assert!(occurrences.iter().all(|o| o.event.dtstart.is_date));
    assert_eq!(occurrences[1].event.dtstart.canonical(), "20240108");
}
