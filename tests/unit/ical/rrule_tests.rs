use caldav_sync::ical::{Codec, Frequency, RRule};
use chrono::Weekday;

fn parse(value: &str) -> Result<RRule, caldav_sync::ParseError> {
    RRule::parse(value, &Codec::default())
}

#[test]
fn parses_a_full_rule() {
    let rule = parse("FREQ=MONTHLY;INTERVAL=2;COUNT=6;BYDAY=2TU,-1FR;BYMONTH=1,3;WKST=SU")
        .expect("rule parses");
    assert_eq!(rule.freq, Frequency::Monthly);
    assert_eq!(rule.interval, 2);
    assert_eq!(rule.count, Some(6));
    assert_eq!(rule.by_day.len(), 2);
    assert_eq!(rule.by_day[0].ordinal, Some(2));
    assert_eq!(rule.by_day[0].weekday, Weekday::Tue);
    assert_eq!(rule.by_day[1].ordinal, Some(-1));
    assert_eq!(rule.by_day[1].weekday, Weekday::Fri);
    assert_eq!(rule.by_month, vec![1, 3]);
    assert_eq!(rule.week_start, Weekday::Sun);
}

#[test]
fn missing_freq_is_an_error() {
    let err = parse("COUNT=3").expect_err("FREQ is required");
    assert!(err.to_string().contains("FREQ"));
}

#[test]
fn unknown_parts_are_ignored() {
    let rule = parse("FREQ=DAILY;X-VENDOR-PART=1;BYHOUR=9").expect("rule parses");
    assert_eq!(rule.freq, Frequency::Daily);
}

#[test]
fn zero_count_is_rejected() {
    parse("FREQ=DAILY;COUNT=0").expect_err("COUNT must be positive");
}

#[test]
fn out_of_range_values_are_rejected() {
    parse("FREQ=MONTHLY;BYMONTHDAY=32").expect_err("monthday range");
    parse("FREQ=MONTHLY;BYMONTHDAY=0").expect_err("monthday zero");
    parse("FREQ=YEARLY;BYMONTH=13").expect_err("month range");
    parse("FREQ=MONTHLY;BYDAY=54MO").expect_err("ordinal range");
    parse("FREQ=MONTHLY;BYSETPOS=0").expect_err("setpos zero");
}

#[test]
fn until_value_parses_as_utc_datetime() {
    let rule = parse("FREQ=WEEKLY;UNTIL=20241231T235959Z").expect("rule parses");
    let until = rule.until.expect("until set");
    assert!(until.is_utc);
    assert_eq!(until.canonical(), "20241231T235959Z");
}

#[test]
fn value_string_round_trips_through_the_parser() {
    let original =
        parse("FREQ=MONTHLY;INTERVAL=3;COUNT=4;BYDAY=1MO,-1SU;BYMONTHDAY=1,15;BYSETPOS=-1;WKST=TU")
            .expect("rule parses");
    let reparsed = parse(&original.to_value_string()).expect("regenerated value parses");
    assert_eq!(reparsed, original);
}
