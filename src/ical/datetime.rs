//! iCalendar date and date-time values.
//!
//! The instant alone cannot carry everything a DATE/DATE-TIME value says:
//! floating time (no zone, no `Z`), UTC time (`Z`), zoned time (`TZID=`) and
//! whole-day dates (`VALUE=DATE`) all need to survive a round trip. The
//! [`EventDateTime`] value keeps the UTC instant, the wall-clock time as
//! written, the zone identifier and the two discriminating flags.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::ical::ParseError;

/// A parsed DATE or DATE-TIME value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDateTime {
    /// The instant, resolved to UTC.
    pub utc: DateTime<Utc>,
    /// The wall-clock value as written (midnight for DATE values).
    pub wall: NaiveDateTime,
    /// Zone identifier from a `TZID` parameter, verbatim.
    pub tzid: Option<String>,
    /// The value carried a trailing `Z`.
    pub is_utc: bool,
    /// The value was a whole-day date (`VALUE=DATE` or 8-digit form).
    pub is_date: bool,
}

impl EventDateTime {
    /// A UTC date-time (`...Z` form).
    pub fn utc(instant: DateTime<Utc>) -> Self {
        Self {
            utc: instant,
            wall: instant.naive_utc(),
            tzid: None,
            is_utc: true,
            is_date: false,
        }
    }

    /// A zoned date-time: wall time interpreted in `tz`, keeping `tzid` as
    /// the identifier to emit.
    pub fn zoned(wall: NaiveDateTime, tzid: impl Into<String>, tz: Tz) -> Self {
        let (wall, utc) = project_local(tz, wall);
        Self {
            utc,
            wall,
            tzid: Some(tzid.into()),
            is_utc: false,
            is_date: false,
        }
    }

    /// A floating date-time, interpreted in the observer's zone.
    pub fn floating(wall: NaiveDateTime, observer: Tz) -> Self {
        let (wall, utc) = project_local(observer, wall);
        Self {
            utc,
            wall,
            tzid: None,
            is_utc: false,
            is_date: false,
        }
    }

    /// A whole-day date; the instant is midnight in the stated zone.
    pub fn date(day: NaiveDate, tzid: Option<String>, tz: Tz) -> Self {
        let wall = day.and_time(NaiveTime::MIN);
        let (wall, utc) = project_local(tz, wall);
        Self {
            utc,
            wall,
            tzid,
            is_utc: false,
            is_date: true,
        }
    }

    /// The instant in UTC.
    pub fn instant(&self) -> DateTime<Utc> {
        self.utc
    }

    /// `YYYYMMDD` code of the local date; keys override maps and occurrence
    /// ids.
    pub fn day_code(&self) -> String {
        self.wall.format("%Y%m%d").to_string()
    }

    /// Canonical text used in `import_id` derivation: `YYYYMMDD` for dates,
    /// basic format with `Z` for UTC values, bare basic format otherwise.
    pub fn canonical(&self) -> String {
        if self.is_date {
            self.day_code()
        } else if self.is_utc {
            self.wall.format("%Y%m%dT%H%M%SZ").to_string()
        } else {
            self.wall.format("%Y%m%dT%H%M%S").to_string()
        }
    }
}

/// Fallback aliases for zone identifiers chrono-tz cannot resolve directly.
/// Mostly legacy Olson links and the Windows display names Outlook exports.
const TZ_ALIASES: &[(&str, &str)] = &[
    ("us/eastern", "America/New_York"),
    ("us/central", "America/Chicago"),
    ("us/mountain", "America/Denver"),
    ("us/pacific", "America/Los_Angeles"),
    ("gmt", "UTC"),
    ("z", "UTC"),
    ("eastern standard time", "America/New_York"),
    ("central standard time", "America/Chicago"),
    ("mountain standard time", "America/Denver"),
    ("pacific standard time", "America/Los_Angeles"),
    ("gmt standard time", "Europe/London"),
    ("w. europe standard time", "Europe/Berlin"),
    ("central europe standard time", "Europe/Budapest"),
    ("central european standard time", "Europe/Warsaw"),
    ("romance standard time", "Europe/Paris"),
    ("india standard time", "Asia/Kolkata"),
    ("china standard time", "Asia/Shanghai"),
    ("tokyo standard time", "Asia/Tokyo"),
    ("aus eastern standard time", "Australia/Sydney"),
];

/// Resolve a TZID: direct IANA lookup, then caller aliases, then the
/// built-in table. `None` means unresolvable.
pub fn resolve_tz(tzid: &str, extra_aliases: &HashMap<String, String>) -> Option<Tz> {
    if let Ok(tz) = tzid.parse::<Tz>() {
        return Some(tz);
    }
    let lower = tzid.trim().to_ascii_lowercase();
    if let Some(target) = extra_aliases.get(&lower)
        && let Ok(tz) = target.parse::<Tz>()
    {
        return Some(tz);
    }
    for (alias, target) in TZ_ALIASES {
        if *alias == lower {
            return target.parse::<Tz>().ok();
        }
    }
    None
}

/// Map a wall-clock time into `tz`, applying the transition policy servers
/// use: nonexistent local times (spring forward) shift to the next valid
/// instant, ambiguous ones (fall back) take the earlier offset.
///
/// Returns the possibly-shifted wall time together with the UTC instant.
pub(crate) fn project_local(tz: Tz, wall: NaiveDateTime) -> (NaiveDateTime, DateTime<Utc>) {
    if let Some(dt) = tz.from_local_datetime(&wall).earliest() {
        return (wall, dt.with_timezone(&Utc));
    }

    // Inside a gap. Advance to the next minute boundary, then minute by
    // minute until the zone maps the wall time again. Real gaps top out at
    // two hours.
    let mut probe = if wall.second() > 0 || wall.nanosecond() > 0 {
        let trimmed = wall.with_second(0).and_then(|w| w.with_nanosecond(0));
        trimmed.unwrap_or(wall) + TimeDelta::minutes(1)
    } else {
        wall + TimeDelta::minutes(1)
    };
    for _ in 0..240 {
        if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
            return (probe, dt.with_timezone(&Utc));
        }
        probe += TimeDelta::minutes(1);
    }

    // Unreachable with sane zone data; read the wall time as UTC.
    (wall, Utc.from_utc_datetime(&wall))
}

/// Parse the value part of a DATE or DATE-TIME property.
///
/// DATE is recognized by three redundant signals because server output
/// normalizes differently: an explicit `VALUE=DATE` parameter, or a bare
/// 8-digit value.
pub(crate) fn parse_datetime_value(
    property: &str,
    value: &str,
    value_is_date: bool,
    tzid: Option<&str>,
    resolved_tz: Option<Tz>,
    default_tz: Tz,
) -> Result<EventDateTime, ParseError> {
    let value = value.trim();
    let invalid = |detail: &str| ParseError::InvalidValue {
        property: property.to_string(),
        value: value.to_string(),
        detail: detail.to_string(),
    };

    let digits_only = value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit());
    if value_is_date || digits_only {
        let day = NaiveDate::parse_from_str(value, "%Y%m%d")
            .map_err(|_| invalid("expected YYYYMMDD"))?;
        let tz = resolved_tz.unwrap_or(default_tz);
        return Ok(EventDateTime::date(day, tzid.map(str::to_string), tz));
    }

    if let Some(stripped) = value.strip_suffix('Z') {
        let wall = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S")
            .map_err(|_| invalid("expected YYYYMMDDTHHMMSSZ"))?;
        return Ok(EventDateTime::utc(Utc.from_utc_datetime(&wall)));
    }

    let wall = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")
        .map_err(|_| invalid("expected YYYYMMDDTHHMMSS"))?;
    match (tzid, resolved_tz) {
        (Some(id), Some(tz)) => Ok(EventDateTime::zoned(wall, id, tz)),
        (Some(id), None) => {
            // Unresolvable TZID: keep the identifier for round-trip, read the
            // wall time in the configured fallback zone.
            let (wall, utc) = project_local(default_tz, wall);
            Ok(EventDateTime {
                utc,
                wall,
                tzid: Some(id.to_string()),
                is_utc: false,
                is_date: false,
            })
        }
        (None, _) => Ok(EventDateTime::floating(wall, default_tz)),
    }
}

/// Parse an RFC 5545 duration (`P2W`, `P1DT2H`, `-PT15M`, ...).
pub(crate) fn parse_duration(property: &str, value: &str) -> Result<TimeDelta, ParseError> {
    let value = value.trim();
    let invalid = |detail: &str| ParseError::InvalidValue {
        property: property.to_string(),
        value: value.to_string(),
        detail: detail.to_string(),
    };

    let (negative, rest) = match value.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    let rest = rest.strip_prefix('P').ok_or_else(|| invalid("expected P"))?;

    let mut seconds: i64 = 0;
    let mut in_time = false;
    let mut digits = String::new();
    for ch in rest.chars() {
        match ch {
            '0'..='9' => digits.push(ch),
            'T' => in_time = true,
            'W' | 'D' | 'H' | 'M' | 'S' => {
                let n: i64 = digits
                    .parse()
                    .map_err(|_| invalid("missing digits before unit"))?;
                digits.clear();
                seconds += match (ch, in_time) {
                    ('W', false) => n * 7 * 86_400,
                    ('D', false) => n * 86_400,
                    ('H', true) => n * 3_600,
                    ('M', true) => n * 60,
                    ('S', true) => n,
                    _ => return Err(invalid("unit in wrong position")),
                };
            }
            _ => return Err(invalid("unexpected character")),
        }
    }
    if !digits.is_empty() {
        return Err(invalid("trailing digits without unit"));
    }

    Ok(TimeDelta::seconds(if negative { -seconds } else { seconds }))
}

/// Format a duration back into RFC 5545 text.
pub(crate) fn format_duration(d: TimeDelta) -> String {
    let total = d.num_seconds();
    let mut out = String::new();
    if total < 0 {
        out.push('-');
    }
    out.push('P');
    let mut rest = total.abs();

    if rest == 0 {
        out.push_str("T0S");
        return out;
    }
    if rest % (7 * 86_400) == 0 {
        out.push_str(&format!("{}W", rest / (7 * 86_400)));
        return out;
    }
    let days = rest / 86_400;
    rest %= 86_400;
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if rest > 0 {
        out.push('T');
        let hours = rest / 3_600;
        rest %= 3_600;
        let minutes = rest / 60;
        let secs = rest % 60;
        if hours > 0 {
            out.push_str(&format!("{hours}H"));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}M"));
        }
        if secs > 0 {
            out.push_str(&format!("{secs}S"));
        }
    }
    out
}
