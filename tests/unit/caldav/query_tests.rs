use caldav_sync::caldav::{
    CalDavClient, build_calendar_multiget_body, build_calendar_query_body,
    build_sync_collection_body,
};
use chrono::{TimeZone, Utc};

#[test]
fn calendar_query_serializes_the_time_range_in_basic_utc() {
    let start = Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap();
    let body = build_calendar_query_body(Some(start), Some(end));
    assert!(body.contains(r#"<C:time-range start="20241201T000000Z" end="20241231T235959Z"/>"#));
    assert!(body.contains(r#"<C:comp-filter name="VEVENT">"#));
    assert!(body.contains("<C:calendar-data/>"));
}

#[test]
fn calendar_query_without_range_has_no_time_filter() {
    let body = build_calendar_query_body(None, None);
    assert!(!body.contains("time-range"));
}

#[test]
fn multiget_body_lists_escaped_hrefs() {
    let body = build_calendar_multiget_body(["/cal/a.ics", "/cal/b&c.ics"])
        .expect("hrefs produce a body");
    assert!(body.contains("<D:href>/cal/a.ics</D:href>"));
    assert!(body.contains("<D:href>/cal/b&amp;c.ics</D:href>"));
}

#[test]
fn multiget_with_no_hrefs_short_circuits() {
    assert!(build_calendar_multiget_body(Vec::<String>::new()).is_none());
    assert!(build_calendar_multiget_body([""]).is_none());
}

#[test]
fn sync_collection_body_carries_the_token_or_an_empty_element() {
    let initial = build_sync_collection_body(None);
    assert!(initial.contains("<D:sync-token/>"));

    let follow_up = build_sync_collection_body(Some("https://example.com/sync/9"));
    assert!(follow_up.contains("<D:sync-token>https://example.com/sync/9</D:sync-token>"));
    assert!(follow_up.contains("<D:sync-level>1</D:sync-level>"));
}

#[test]
fn event_url_is_derived_from_the_sanitized_uid() {
    let url = CalDavClient::event_url("https://cal.example.com/dav/user/personal/", "uid 1@x")
        .expect("valid uid");
    assert_eq!(
        url,
        "https://cal.example.com/dav/user/personal/uid_1@x.ics"
    );
}

#[test]
fn event_url_rejects_traversal_uids() {
    CalDavClient::event_url("https://cal.example.com/cal/", "../../etc/passwd")
        .expect_err("traversal must be rejected");
}
