//! UID sanitization for resource paths.
//!
//! A UID becomes part of the resource URL on create, so it must never be
//! able to escape the collection. The mapping below blocks path traversal
//! while keeping the characters CalDAV servers accept in resource names.

use crate::ical::ParseError;

/// Map a UID into a safe resource path segment.
///
/// Characters outside `[A-Za-z0-9@._-]` become `_`; results containing
/// `..`, equal to a lone `.`, or empty after trimming surrounding dots are
/// rejected.
pub fn sanitize_uid(uid: &str) -> Result<String, ParseError> {
    let mapped: String = uid
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if mapped.contains("..") {
        return Err(ParseError::InvalidUid(format!(
            "{uid:?} maps to a dot-dot sequence"
        )));
    }
    if mapped == "." {
        return Err(ParseError::InvalidUid("lone dot".to_string()));
    }
    let trimmed = mapped.trim_matches('.');
    if trimmed.is_empty() {
        return Err(ParseError::InvalidUid(format!(
            "{uid:?} maps to an empty resource name"
        )));
    }
    Ok(trimmed.to_string())
}
