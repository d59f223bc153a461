//! `RRULE` values: typed recurrence rules mirroring RFC 5545 §3.3.10.

use chrono::Weekday;

use crate::ical::datetime::parse_datetime_value;
use crate::ical::{Codec, EventDateTime, ParseError};

/// Recurrence frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Secondly => "SECONDLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "SECONDLY" => Some(Frequency::Secondly),
            "MINUTELY" => Some(Frequency::Minutely),
            "HOURLY" => Some(Frequency::Hourly),
            "DAILY" => Some(Frequency::Daily),
            "WEEKLY" => Some(Frequency::Weekly),
            "MONTHLY" => Some(Frequency::Monthly),
            "YEARLY" => Some(Frequency::Yearly),
            _ => None,
        }
    }
}

/// A `BYDAY` entry: weekday with optional ordinal (`2TU`, `-1FR`, `MO`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayNum {
    pub ordinal: Option<i32>,
    pub weekday: Weekday,
}

pub(crate) fn weekday_code(w: Weekday) -> &'static str {
    match w {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// A recurrence rule. `count` and `until` are mutually exclusive
/// terminators; the parser enforces the RFC's value ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct RRule {
    pub freq: Frequency,
    pub interval: u32,
    pub count: Option<u32>,
    pub until: Option<EventDateTime>,
    pub by_day: Vec<WeekdayNum>,
    pub by_month_day: Vec<i32>,
    pub by_month: Vec<u32>,
    pub by_week_no: Vec<i32>,
    pub by_year_day: Vec<i32>,
    pub by_set_pos: Vec<i32>,
    pub week_start: Weekday,
}

impl RRule {
    pub fn new(freq: Frequency) -> Self {
        Self {
            freq,
            interval: 1,
            count: None,
            until: None,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            by_week_no: Vec::new(),
            by_year_day: Vec::new(),
            by_set_pos: Vec::new(),
            week_start: Weekday::Mon,
        }
    }

    /// Parse an `RRULE` value: semicolon-separated `NAME=VALUE` pairs,
    /// case-sensitive on names. Missing `FREQ` is a parse error; unknown
    /// parts are ignored.
    pub fn parse(value: &str, codec: &Codec) -> Result<Self, ParseError> {
        let invalid = |detail: String| ParseError::InvalidValue {
            property: "RRULE".to_string(),
            value: value.to_string(),
            detail,
        };

        let mut freq = None;
        let mut rule = RRule::new(Frequency::Daily);

        for part in value.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((name, val)) = part.split_once('=') else {
                return Err(invalid(format!("part {part:?} is not NAME=VALUE")));
            };
            match name {
                "FREQ" => {
                    freq = Some(
                        Frequency::parse(val)
                            .ok_or_else(|| invalid(format!("unknown FREQ {val:?}")))?,
                    );
                }
                "INTERVAL" => {
                    let n: u32 = val
                        .parse()
                        .map_err(|_| invalid(format!("bad INTERVAL {val:?}")))?;
                    rule.interval = n.max(1);
                }
                "COUNT" => {
                    let n: u32 = val
                        .parse()
                        .map_err(|_| invalid(format!("bad COUNT {val:?}")))?;
                    if n == 0 {
                        return Err(invalid("COUNT must be positive".to_string()));
                    }
                    rule.count = Some(n);
                }
                "UNTIL" => {
                    let until = parse_datetime_value(
                        "RRULE;UNTIL",
                        val,
                        false,
                        None,
                        None,
                        codec.default_tz(),
                    )?;
                    rule.until = Some(until);
                }
                "BYDAY" => {
                    for entry in val.split(',') {
                        let entry = entry.trim();
                        if entry.is_empty() {
                            continue;
                        }
                        let split_at = entry
                            .char_indices()
                            .find(|(_, c)| c.is_ascii_alphabetic())
                            .map(|(i, _)| i)
                            .unwrap_or(0);
                        let (ord, day) = entry.split_at(split_at);
                        let weekday = weekday_from_code(day)
                            .ok_or_else(|| invalid(format!("bad BYDAY entry {entry:?}")))?;
                        let ordinal = if ord.is_empty() {
                            None
                        } else {
                            let n: i32 = ord
                                .parse()
                                .map_err(|_| invalid(format!("bad BYDAY ordinal {ord:?}")))?;
                            if n == 0 || !(-53..=53).contains(&n) {
                                return Err(invalid(format!("BYDAY ordinal {n} out of range")));
                            }
                            Some(n)
                        };
                        rule.by_day.push(WeekdayNum { ordinal, weekday });
                    }
                }
                "BYMONTHDAY" => {
                    rule.by_month_day = parse_int_list(val, &invalid)?;
                    for &d in &rule.by_month_day {
                        if d == 0 || !(-31..=31).contains(&d) {
                            return Err(invalid(format!("BYMONTHDAY {d} out of range")));
                        }
                    }
                }
                "BYMONTH" => {
                    let months = parse_int_list(val, &invalid)?;
                    rule.by_month = months
                        .into_iter()
                        .map(|m| {
                            if (1..=12).contains(&m) {
                                Ok(m as u32)
                            } else {
                                Err(invalid(format!("BYMONTH {m} out of range")))
                            }
                        })
                        .collect::<Result<_, _>>()?;
                }
                "BYWEEKNO" => {
                    rule.by_week_no = parse_int_list(val, &invalid)?;
                    for &w in &rule.by_week_no {
                        if w == 0 || !(-53..=53).contains(&w) {
                            return Err(invalid(format!("BYWEEKNO {w} out of range")));
                        }
                    }
                }
                "BYYEARDAY" => {
                    rule.by_year_day = parse_int_list(val, &invalid)?;
                    for &d in &rule.by_year_day {
                        if d == 0 || !(-366..=366).contains(&d) {
                            return Err(invalid(format!("BYYEARDAY {d} out of range")));
                        }
                    }
                }
                "BYSETPOS" => {
                    rule.by_set_pos = parse_int_list(val, &invalid)?;
                    for &p in &rule.by_set_pos {
                        if p == 0 || !(-366..=366).contains(&p) {
                            return Err(invalid(format!("BYSETPOS {p} out of range")));
                        }
                    }
                }
                "WKST" => {
                    rule.week_start = weekday_from_code(val)
                        .ok_or_else(|| invalid(format!("bad WKST {val:?}")))?;
                }
                // Unknown rule parts are ignored.
                _ => {}
            }
        }

        rule.freq = freq.ok_or(ParseError::MissingProperty { property: "FREQ" })?;
        if rule.count.is_some() && rule.until.is_some() {
            // COUNT and UNTIL are mutually exclusive; keep the stronger cap.
            rule.until = None;
        }
        Ok(rule)
    }

    /// Regenerate the `RRULE` value text in canonical part order.
    pub fn to_value_string(&self) -> String {
        let mut out = format!("FREQ={}", self.freq.as_str());
        if self.interval != 1 {
            out.push_str(&format!(";INTERVAL={}", self.interval));
        }
        if let Some(count) = self.count {
            out.push_str(&format!(";COUNT={count}"));
        }
        if let Some(until) = &self.until {
            out.push_str(&format!(";UNTIL={}", until.canonical()));
        }
        if !self.by_day.is_empty() {
            let days: Vec<String> = self
                .by_day
                .iter()
                .map(|d| match d.ordinal {
                    Some(n) => format!("{}{}", n, weekday_code(d.weekday)),
                    None => weekday_code(d.weekday).to_string(),
                })
                .collect();
            out.push_str(&format!(";BYDAY={}", days.join(",")));
        }
        push_int_list(&mut out, "BYMONTHDAY", &self.by_month_day);
        if !self.by_month.is_empty() {
            let months: Vec<String> = self.by_month.iter().map(u32::to_string).collect();
            out.push_str(&format!(";BYMONTH={}", months.join(",")));
        }
        push_int_list(&mut out, "BYWEEKNO", &self.by_week_no);
        push_int_list(&mut out, "BYYEARDAY", &self.by_year_day);
        push_int_list(&mut out, "BYSETPOS", &self.by_set_pos);
        if self.week_start != Weekday::Mon {
            out.push_str(&format!(";WKST={}", weekday_code(self.week_start)));
        }
        out
    }
}

fn parse_int_list(
    val: &str,
    invalid: &impl Fn(String) -> ParseError,
) -> Result<Vec<i32>, ParseError> {
    val.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim()
                .parse::<i32>()
                .map_err(|_| invalid(format!("bad integer {s:?}")))
        })
        .collect()
}

fn push_int_list(out: &mut String, name: &str, values: &[i32]) {
    if !values.is_empty() {
        let joined: Vec<String> = values.iter().map(i32::to_string).collect();
        out.push_str(&format!(";{name}={}", joined.join(",")));
    }
}
