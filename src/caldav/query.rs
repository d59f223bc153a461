//! XML body builders for the CalDAV requests.
//!
//! Bodies are assembled as strings in the `DAV:` namespace with CalDAV
//! elements in `urn:ietf:params:xml:ns:caldav` and ctag in the
//! calendarserver namespace.

use chrono::{DateTime, Utc};

pub fn escape_xml(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

/// CalDAV time-range timestamps use the basic UTC form.
pub fn format_utc_basic(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

/// `calendar-query` REPORT body for `VEVENT`s, optionally limited to a
/// time range.
pub fn build_calendar_query_body(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> String {
    let mut filter = String::from(
        "<C:filter>\
           <C:comp-filter name=\"VCALENDAR\">\
             <C:comp-filter name=\"VEVENT\">",
    );
    if start.is_some() || end.is_some() {
        filter.push_str("<C:time-range");
        if let Some(s) = start {
            filter.push_str(&format!(" start=\"{}\"", format_utc_basic(s)));
        }
        if let Some(e) = end {
            filter.push_str(&format!(" end=\"{}\"", format_utc_basic(e)));
        }
        filter.push_str("/>");
    }
    filter.push_str("</C:comp-filter></C:comp-filter></C:filter>");

    format!(
        r#"<C:calendar-query xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><D:prop><D:getetag/><C:calendar-data/></D:prop>{filter}</C:calendar-query>"#
    )
}

/// `calendar-multiget` REPORT body. `None` when no usable hrefs were given.
pub fn build_calendar_multiget_body<I, S>(hrefs: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut href_xml = String::new();
    let mut total = 0usize;
    for href in hrefs {
        let href = href.as_ref();
        if href.is_empty() {
            continue;
        }
        total += 1;
        href_xml.push_str("<D:href>");
        href_xml.push_str(&escape_xml(href));
        href_xml.push_str("</D:href>");
    }
    if total == 0 {
        return None;
    }

    let mut body = String::from(
        r#"<C:calendar-multiget xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav"><D:prop><D:getetag/><C:calendar-data/></D:prop>"#,
    );
    body.push_str(&href_xml);
    body.push_str("</C:calendar-multiget>");
    Some(body)
}

/// `sync-collection` REPORT body (RFC 6578). An absent token requests the
/// initial sync.
pub fn build_sync_collection_body(sync_token: Option<&str>) -> String {
    let mut body = String::from(
        r#"<D:sync-collection xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav">"#,
    );
    match sync_token {
        Some(token) => {
            body.push_str("<D:sync-token>");
            body.push_str(&escape_xml(token));
            body.push_str("</D:sync-token>");
        }
        None => body.push_str("<D:sync-token/>"),
    }
    body.push_str("<D:sync-level>1</D:sync-level>");
    body.push_str("<D:prop><D:getetag/><C:calendar-data/></D:prop>");
    body.push_str("</D:sync-collection>");
    body
}

/// `PROPFIND` body asking only for the collection ctag.
pub fn build_ctag_propfind_body() -> &'static str {
    r#"<D:propfind xmlns:D="DAV:" xmlns:CS="http://calendarserver.org/ns/">
  <D:prop>
    <CS:getctag/>
  </D:prop>
</D:propfind>"#
}

/// `PROPFIND` body asking only for the collection's sync token.
pub fn build_sync_token_propfind_body() -> &'static str {
    r#"<D:propfind xmlns:D="DAV:">
  <D:prop>
    <D:sync-token/>
  </D:prop>
</D:propfind>"#
}

/// `PROPFIND` body listing calendar collections under a home set.
pub fn build_calendar_list_body() -> &'static str {
    r#"<D:propfind xmlns:D="DAV:" xmlns:C="urn:ietf:params:xml:ns:caldav" xmlns:CS="http://calendarserver.org/ns/">
  <D:prop>
    <D:displayname/>
    <D:resourcetype/>
    <D:sync-token/>
    <CS:getctag/>
    <C:supported-calendar-component-set/>
  </D:prop>
</D:propfind>"#
}
