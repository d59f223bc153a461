//! Multistatus XML parsing.
//!
//! The parser is namespace-aware but tolerant: elements are matched by
//! local name regardless of prefix or prefix case (`D:`, `d:`, `ns0:`,
//! none), because servers disagree on all of them. CDATA-wrapped
//! `calendar-data` is transparently unwrapped, and the RFC 6578 root-level
//! `<sync-token>` is extracted when present.

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use std::io::{BufRead, Cursor};

use crate::webdav::types::{DavError, DavResult, Multistatus, MultistatusRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ElementName {
    Multistatus,
    Response,
    Propstat,
    Prop,
    Href,
    Status,
    Displayname,
    Getetag,
    Getctag,
    Resourcetype,
    Collection,
    Calendar,
    SupportedCalendarComponentSet,
    Comp,
    CalendarData,
    SyncToken,
    CalendarHomeSet,
    CurrentUserPrincipal,
    Getcontenttype,
    Other,
}

pub(crate) fn element_from_bytes(raw: &[u8]) -> ElementName {
    let local = match raw.iter().position(|b| *b == b':') {
        Some(idx) => &raw[idx + 1..],
        None => raw,
    };

    if local.eq_ignore_ascii_case(b"multistatus") {
        ElementName::Multistatus
    } else if local.eq_ignore_ascii_case(b"response") {
        ElementName::Response
    } else if local.eq_ignore_ascii_case(b"propstat") {
        ElementName::Propstat
    } else if local.eq_ignore_ascii_case(b"prop") {
        ElementName::Prop
    } else if local.eq_ignore_ascii_case(b"href") {
        ElementName::Href
    } else if local.eq_ignore_ascii_case(b"status") {
        ElementName::Status
    } else if local.eq_ignore_ascii_case(b"displayname") {
        ElementName::Displayname
    } else if local.eq_ignore_ascii_case(b"getetag") {
        ElementName::Getetag
    } else if local.eq_ignore_ascii_case(b"getctag") {
        ElementName::Getctag
    } else if local.eq_ignore_ascii_case(b"resourcetype") {
        ElementName::Resourcetype
    } else if local.eq_ignore_ascii_case(b"collection") {
        ElementName::Collection
    } else if local.eq_ignore_ascii_case(b"calendar") {
        ElementName::Calendar
    } else if local.eq_ignore_ascii_case(b"supported-calendar-component-set") {
        ElementName::SupportedCalendarComponentSet
    } else if local.eq_ignore_ascii_case(b"comp") {
        ElementName::Comp
    } else if local.eq_ignore_ascii_case(b"calendar-data") {
        ElementName::CalendarData
    } else if local.eq_ignore_ascii_case(b"sync-token") {
        ElementName::SyncToken
    } else if local.eq_ignore_ascii_case(b"calendar-home-set") {
        ElementName::CalendarHomeSet
    } else if local.eq_ignore_ascii_case(b"current-user-principal") {
        ElementName::CurrentUserPrincipal
    } else if local.eq_ignore_ascii_case(b"getcontenttype") {
        ElementName::Getcontenttype
    } else {
        ElementName::Other
    }
}

/// `HTTP/1.1 404 Not Found` → `404`.
pub(crate) fn parse_http_status(text: &str) -> Option<u16> {
    text.split_whitespace().nth(1)?.parse().ok()
}

struct MultistatusParser {
    stack: Vec<ElementName>,
    current: MultistatusRow,
    response_status: Option<u16>,
    propstat_status: Option<u16>,
    rows: Vec<MultistatusRow>,
    sync_token: Option<String>,
}

impl MultistatusParser {
    fn new() -> Self {
        Self {
            stack: Vec::with_capacity(16),
            current: MultistatusRow::default(),
            response_status: None,
            propstat_status: None,
            rows: Vec::new(),
            sync_token: None,
        }
    }

    fn path_ends_with(&self, needle: &[ElementName]) -> bool {
        self.stack.len() >= needle.len()
            && self.stack[self.stack.len() - needle.len()..] == needle[..]
    }

    fn on_start(&mut self, event: &BytesStart<'_>) -> DavResult<()> {
        let element = element_from_bytes(event.name().as_ref());
        self.stack.push(element);

        match element {
            ElementName::Response => {
                self.current = MultistatusRow::default();
                self.response_status = None;
                self.propstat_status = None;
            }
            ElementName::Collection => {
                if self.path_ends_with(&[
                    ElementName::Response,
                    ElementName::Propstat,
                    ElementName::Prop,
                    ElementName::Resourcetype,
                    ElementName::Collection,
                ]) {
                    self.current.is_collection = true;
                }
            }
            ElementName::Calendar => {
                if self.path_ends_with(&[
                    ElementName::Response,
                    ElementName::Propstat,
                    ElementName::Prop,
                    ElementName::Resourcetype,
                    ElementName::Calendar,
                ]) {
                    self.current.is_calendar = true;
                }
            }
            ElementName::Comp => {
                if self.path_ends_with(&[
                    ElementName::Response,
                    ElementName::Propstat,
                    ElementName::Prop,
                    ElementName::SupportedCalendarComponentSet,
                    ElementName::Comp,
                ]) {
                    for attr in event.attributes().with_checks(false) {
                        let attr = attr.map_err(|e| DavError::Parse {
                            message: format!("invalid XML attribute: {e}"),
                            source: None,
                        })?;
                        let key = String::from_utf8_lossy(attr.key.as_ref()).to_ascii_lowercase();
                        if key == "name" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| DavError::Parse {
                                    message: format!("invalid XML attribute value: {e}"),
                                    source: None,
                                })?
                                .into_owned();
                            if !value.is_empty()
                                && !self
                                    .current
                                    .supported_components
                                    .iter()
                                    .any(|c| c.eq_ignore_ascii_case(&value))
                            {
                                self.current.supported_components.push(value);
                            }
                        }
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn on_end(&mut self) {
        if let Some(popped) = self.stack.pop()
            && popped == ElementName::Response
        {
            let mut finished = std::mem::take(&mut self.current);
            finished.status = self.response_status.or(self.propstat_status);
            self.rows.push(finished);
        }
    }

    fn on_text(&mut self, text: String) {
        if text.is_empty() {
            return;
        }

        // calendar-data is multi-line and may arrive in chunks; keep the
        // exact payload.
        if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarData,
        ]) {
            match self.current.calendar_data.as_mut() {
                Some(existing) => existing.push_str(&text),
                None => self.current.calendar_data = Some(text),
            }
            return;
        }

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        if self.path_ends_with(&[ElementName::Response, ElementName::Href]) {
            self.current.href = trimmed.to_string();
        } else if self.path_ends_with(&[ElementName::Response, ElementName::Status]) {
            self.response_status = parse_http_status(trimmed);
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Status,
        ]) {
            self.propstat_status = parse_http_status(trimmed);
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Displayname,
        ]) {
            self.current.displayname = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getetag,
        ]) {
            self.current.etag = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getctag,
        ]) {
            self.current.ctag = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::SyncToken,
        ]) {
            self.current.sync_token = Some(trimmed.to_string());
        } else if self.path_ends_with(&[ElementName::Multistatus, ElementName::SyncToken]) {
            // Top-level sync-token in sync-collection responses (RFC 6578)
            self.sync_token = Some(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CalendarHomeSet,
            ElementName::Href,
        ]) {
            self.current.calendar_home_set.push(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::CurrentUserPrincipal,
            ElementName::Href,
        ]) {
            self.current
                .current_user_principal
                .push(trimmed.to_string());
        } else if self.path_ends_with(&[
            ElementName::Response,
            ElementName::Propstat,
            ElementName::Prop,
            ElementName::Getcontenttype,
        ]) {
            self.current.content_type = Some(trimmed.to_string());
        }
    }

    fn finish(self) -> Multistatus {
        Multistatus {
            rows: self.rows,
            sync_token: self.sync_token,
        }
    }
}

fn parse_with<R: BufRead>(reader: R) -> DavResult<Multistatus> {
    let mut xml = Reader::from_reader(reader);
    xml.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(8 * 1024);
    let mut parser = MultistatusParser::new();

    loop {
        match xml.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => parser.on_start(&e)?,
            Ok(Event::Empty(e)) => {
                parser.on_start(&e)?;
                parser.on_end();
            }
            Ok(Event::Text(e)) => {
                let text = decode_text(e.as_ref())?;
                parser.on_text(text);
            }
            Ok(Event::CData(e)) => {
                let text = String::from_utf8_lossy(e.as_ref()).into_owned();
                parser.on_text(text);
            }
            Ok(Event::End(_)) => parser.on_end(),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DavError::Parse {
                    message: format!("XML error: {e}"),
                    source: None,
                });
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(parser.finish())
}

/// Parse a WebDAV `207 Multi-Status` XML body from an aggregated buffer.
pub fn parse_multistatus(body: &[u8]) -> DavResult<Multistatus> {
    parse_with(Cursor::new(body))
}

fn decode_text(raw: &[u8]) -> DavResult<String> {
    match std::str::from_utf8(raw) {
        Ok(s) => Ok(unescape(s)
            .map_err(|err| DavError::Parse {
                message: format!("XML decode error: {err}"),
                source: None,
            })?
            .into_owned()),
        Err(_) => Ok(String::from_utf8_lossy(raw).into_owned()),
    }
}
