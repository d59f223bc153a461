//! Recurrence expansion: materialize the occurrences of a recurring event
//! over a time range.
//!
//! Generation works in the master's local zone so instance duration is
//! preserved in wall-clock terms across daylight-saving transitions; an
//! 8-hour overnight event stays 8 wall-clock hours through the fall-back
//! night even though 9 real hours elapse. Nonexistent local times shift
//! forward to the next valid instant and ambiguous ones take the earlier
//! offset, matching common server behavior.

use std::collections::HashMap;
use std::ops::Range;

use chrono::{
    DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc, Weekday,
};
use chrono_tz::Tz;

use crate::ical::datetime::project_local;
use crate::ical::{Event, EventDateTime, Frequency, RRule};

/// One materialized instance of a recurring event.
///
/// The embedded event has `dtstart`/`dtend` rewritten to the occurrence's
/// times and no recurrence rule of its own.
#[derive(Debug, Clone)]
pub struct Occurrence {
    /// `uid:OCC:YYYYMMDD` of the occurrence's local date.
    pub import_id: String,
    pub event: Event,
}

impl Occurrence {
    pub fn start(&self) -> DateTime<Utc> {
        self.event.dtstart.instant()
    }
}

/// Overrides of a recurring series, keyed by the `RECURRENCE-ID` day code.
pub type OverrideMap = HashMap<String, Event>;

/// Group override events by their `RECURRENCE-ID` day code. Duplicates
/// resolve last-write-wins.
pub fn build_override_map(events: &[Event]) -> OverrideMap {
    let mut map = OverrideMap::new();
    for event in events {
        if let Some(rid) = &event.recurrence_id {
            map.insert(rid.day_code(), event.clone());
        }
    }
    map
}

/// How candidate wall times are mapped to instants.
enum WallProjector {
    /// Zoned master: full DST-aware projection.
    Zone(Tz),
    /// UTC, floating or unresolvable-TZID master: constant offset taken
    /// from the master's own start.
    Fixed(TimeDelta),
}

impl WallProjector {
    fn for_master(start: &EventDateTime) -> Self {
        if start.is_utc {
            return WallProjector::Fixed(TimeDelta::zero());
        }
        if let Some(tzid) = &start.tzid
            && let Some(tz) = crate::ical::datetime::resolve_tz(tzid, &HashMap::new())
        {
            return WallProjector::Zone(tz);
        }
        let offset = start.utc - Utc.from_utc_datetime(&start.wall);
        WallProjector::Fixed(offset)
    }

    fn project(&self, wall: NaiveDateTime) -> (NaiveDateTime, DateTime<Utc>) {
        match self {
            WallProjector::Zone(tz) => project_local(*tz, wall),
            WallProjector::Fixed(offset) => (wall, Utc.from_utc_datetime(&wall) + *offset),
        }
    }
}

/// Expand `master` over the half-open range `[range.start, range.end)`.
///
/// `COUNT` caps the generated set prior to `EXDATE` filtering, `UNTIL` is
/// inclusive, and overrides replace the occurrence sharing their day code
/// (possibly moving it in time). Output is ascending by effective start.
pub fn expand(
    master: &Event,
    range: Range<DateTime<Utc>>,
    overrides: &OverrideMap,
) -> Vec<Occurrence> {
    let projector = WallProjector::for_master(&master.dtstart);

    let candidates = match &master.rrule {
        Some(rule) => generate_candidates(master, rule, &range, &projector),
        None => {
            // Non-recurring master: at most its own instance.
            let instant = master.dtstart.instant();
            if instant >= range.start && instant < range.end {
                vec![(master.dtstart.wall, instant)]
            } else {
                Vec::new()
            }
        }
    };

    // EXDATE entries remove occurrences, compared as instants.
    let kept = candidates
        .into_iter()
        .filter(|(_, instant)| !master.exdates.iter().any(|ex| ex.instant() == *instant));

    let duration = master.wall_duration();
    let mut occurrences = Vec::new();
    for (wall, instant) in kept {
        let day_code = wall.format("%Y%m%d").to_string();
        let import_id = format!("{}:OCC:{}", master.uid, day_code);
        let event = match overrides.get(&day_code) {
            Some(replacement) => {
                let mut event = replacement.clone();
                event.rrule = None;
                event.exdates.clear();
                event
            }
            None => {
                let mut event = master.clone();
                let start = EventDateTime {
                    utc: instant,
                    wall,
                    tzid: master.dtstart.tzid.clone(),
                    is_utc: master.dtstart.is_utc,
                    is_date: master.dtstart.is_date,
                };
                let (end_wall, end_utc) = projector.project(wall + duration);
                event.dtend = Some(EventDateTime {
                    utc: end_utc,
                    wall: end_wall,
                    tzid: master.dtstart.tzid.clone(),
                    is_utc: master.dtstart.is_utc,
                    is_date: master.dtstart.is_date,
                });
                event.dtstart = start;
                event.duration = None;
                event.rrule = None;
                event.exdates.clear();
                event
            }
        };
        occurrences.push(Occurrence { import_id, event });
    }

    occurrences.sort_by_key(|o| o.event.dtstart.instant());
    occurrences
}

/// Generate `(wall, instant)` pairs of the canonical occurrence set inside
/// the range, honoring COUNT (pre-EXDATE) and inclusive UNTIL.
fn generate_candidates(
    master: &Event,
    rule: &RRule,
    range: &Range<DateTime<Utc>>,
    projector: &WallProjector,
) -> Vec<(NaiveDateTime, DateTime<Utc>)> {
    let seed = master.dtstart.wall;
    let until = rule.until.as_ref().map(|u| u.instant());
    let mut generated: u32 = 0;
    let mut out = Vec::new();

    // Guard against rules that stop producing instances entirely
    // (FREQ=YEARLY;BYMONTH=2;BYMONTHDAY=30 never matches anything).
    let mut empty_periods = 0u32;

    let mut period = 0u64;
    loop {
        if period > 100_000 {
            break;
        }
        let Some(candidates) = period_candidates(rule, seed, period) else {
            break;
        };

        let mut selected: Vec<NaiveDateTime> =
            candidates.into_iter().filter(|c| *c >= seed).collect();
        selected.sort();
        selected.dedup();
        selected = apply_set_pos(selected, &rule.by_set_pos);

        if selected.is_empty() {
            empty_periods += 1;
            if empty_periods > 1_000 {
                break;
            }
        } else {
            empty_periods = 0;
        }

        let mut past_range_end = false;
        for wall in selected {
            let (wall, instant) = projector.project(wall);
            if let Some(until) = until
                && instant > until
            {
                return out;
            }
            if let Some(count) = rule.count
                && generated >= count
            {
                return out;
            }
            generated += 1;
            if instant < range.start {
                continue;
            }
            if instant >= range.end {
                past_range_end = true;
                continue;
            }
            out.push((wall, instant));
        }

        // Candidates ascend within and across periods, so once one falls
        // beyond the range nothing later can land inside it.
        if past_range_end {
            break;
        }

        period += 1;
    }

    out
}

/// Candidate wall times of period number `n`, unfiltered by COUNT/UNTIL.
/// `None` means the period index overflowed the calendar.
fn period_candidates(rule: &RRule, seed: NaiveDateTime, n: u64) -> Option<Vec<NaiveDateTime>> {
    let interval = rule.interval.max(1) as i64;
    let steps = interval * n as i64;
    let time = seed.time();

    match rule.freq {
        Frequency::Secondly => Some(vec![seed + TimeDelta::seconds(steps)]),
        Frequency::Minutely => Some(vec![seed + TimeDelta::minutes(steps)]),
        Frequency::Hourly => {
            let candidate = seed + TimeDelta::hours(steps);
            Some(simple_filters(rule, vec![candidate]))
        }
        Frequency::Daily => {
            let candidate = seed + TimeDelta::days(steps);
            Some(simple_filters(rule, vec![candidate]))
        }
        Frequency::Weekly => {
            let week_anchor = start_of_week(seed.date(), rule.week_start);
            let week_start = week_anchor.checked_add_signed(TimeDelta::weeks(steps))?;
            let days: Vec<Weekday> = if rule.by_day.is_empty() {
                vec![seed.weekday()]
            } else {
                rule.by_day.iter().map(|d| d.weekday).collect()
            };
            let mut candidates = Vec::new();
            for weekday in days {
                let date = week_start + TimeDelta::days(weekday.days_since(rule.week_start) as i64);
                if month_allowed(rule, date) {
                    candidates.push(date.and_time(time));
                }
            }
            Some(candidates)
        }
        Frequency::Monthly => {
            let months = seed.date().year() as i64 * 12 + seed.date().month0() as i64 + steps;
            let year = months.div_euclid(12) as i32;
            let month = months.rem_euclid(12) as u32 + 1;
            let mut dates = monthly_dates(rule, year, month, seed.date().day());
            dates.retain(|d| month_allowed(rule, *d));
            Some(dates.into_iter().map(|d| d.and_time(time)).collect())
        }
        Frequency::Yearly => {
            let year = seed.date().year() as i64 + steps;
            let year = i32::try_from(year).ok()?;
            let dates = yearly_dates(rule, year, seed.date());
            Some(dates.into_iter().map(|d| d.and_time(time)).collect())
        }
    }
}

/// BYMONTH / BYMONTHDAY / BYDAY acting as limits on single-candidate
/// frequencies (daily and finer).
fn simple_filters(rule: &RRule, candidates: Vec<NaiveDateTime>) -> Vec<NaiveDateTime> {
    candidates
        .into_iter()
        .filter(|c| {
            let date = c.date();
            if !month_allowed(rule, date) {
                return false;
            }
            if !rule.by_month_day.is_empty() && !monthday_matches(&rule.by_month_day, date) {
                return false;
            }
            if !rule.by_day.is_empty()
                && !rule.by_day.iter().any(|d| d.weekday == date.weekday())
            {
                return false;
            }
            true
        })
        .collect()
}

fn month_allowed(rule: &RRule, date: NaiveDate) -> bool {
    rule.by_month.is_empty() || rule.by_month.contains(&date.month())
}

fn monthday_matches(by_month_day: &[i32], date: NaiveDate) -> bool {
    let len = days_in_month(date.year(), date.month()) as i32;
    by_month_day.iter().any(|&d| {
        let day = if d > 0 { d } else { len + 1 + d };
        day == date.day() as i32
    })
}

/// Dates a MONTHLY period contributes before BYSETPOS.
fn monthly_dates(rule: &RRule, year: i32, month: u32, seed_day: u32) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = if !rule.by_month_day.is_empty() {
        rule.by_month_day
            .iter()
            .filter_map(|&d| resolve_monthday(year, month, d))
            .collect()
    } else if !rule.by_day.is_empty() {
        let mut days = Vec::new();
        for entry in &rule.by_day {
            match entry.ordinal {
                Some(ordinal) => {
                    if let Some(date) = nth_weekday_of_month(year, month, entry.weekday, ordinal) {
                        days.push(date);
                    }
                }
                None => days.extend(weekdays_in_month(year, month, entry.weekday)),
            }
        }
        days
    } else {
        // Months lacking the seed day are skipped (a Jan 31 monthly series
        // has no February instance).
        NaiveDate::from_ymd_opt(year, month, seed_day)
            .into_iter()
            .collect()
    };

    // BYMONTHDAY and BYDAY together: both must hold.
    if !rule.by_month_day.is_empty() && !rule.by_day.is_empty() {
        dates.retain(|d| rule.by_day.iter().any(|e| e.weekday == d.weekday()));
    }

    dates.sort();
    dates.dedup();
    dates
}

/// Dates a YEARLY period contributes before BYSETPOS.
fn yearly_dates(rule: &RRule, year: i32, seed: NaiveDate) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = if !rule.by_year_day.is_empty() {
        rule.by_year_day
            .iter()
            .filter_map(|&d| resolve_yearday(year, d))
            .collect()
    } else if !rule.by_week_no.is_empty() {
        let mut days = Vec::new();
        for &weekno in &rule.by_week_no {
            let Some(week_start) = start_of_numbered_week(year, weekno, rule.week_start) else {
                continue;
            };
            let weekdays: Vec<Weekday> = if rule.by_day.is_empty() {
                vec![seed.weekday()]
            } else {
                rule.by_day.iter().map(|d| d.weekday).collect()
            };
            for weekday in weekdays {
                days.push(week_start + TimeDelta::days(weekday.days_since(rule.week_start) as i64));
            }
        }
        days
    } else if !rule.by_month.is_empty() {
        let mut days = Vec::new();
        for &month in &rule.by_month {
            if !rule.by_month_day.is_empty() {
                days.extend(
                    rule.by_month_day
                        .iter()
                        .filter_map(|&d| resolve_monthday(year, month, d)),
                );
            } else if !rule.by_day.is_empty() {
                for entry in &rule.by_day {
                    match entry.ordinal {
                        Some(ordinal) => {
                            if let Some(date) =
                                nth_weekday_of_month(year, month, entry.weekday, ordinal)
                            {
                                days.push(date);
                            }
                        }
                        None => days.extend(weekdays_in_month(year, month, entry.weekday)),
                    }
                }
            } else if let Some(date) = NaiveDate::from_ymd_opt(year, month, seed.day()) {
                days.push(date);
            }
        }
        days
    } else if !rule.by_day.is_empty() {
        // BYDAY over the whole year.
        let mut days = Vec::new();
        for entry in &rule.by_day {
            match entry.ordinal {
                Some(ordinal) => {
                    if let Some(date) = nth_weekday_of_year(year, entry.weekday, ordinal) {
                        days.push(date);
                    }
                }
                None => {
                    let mut date = first_weekday_on_or_after(
                        NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(seed),
                        entry.weekday,
                    );
                    while date.year() == year {
                        days.push(date);
                        date += TimeDelta::weeks(1);
                    }
                }
            }
        }
        days
    } else if !rule.by_month_day.is_empty() {
        rule.by_month_day
            .iter()
            .filter_map(|&d| resolve_monthday(year, seed.month(), d))
            .collect()
    } else {
        // Feb 29 seeds only land on leap years.
        NaiveDate::from_ymd_opt(year, seed.month(), seed.day())
            .into_iter()
            .collect()
    };

    dates.sort();
    dates.dedup();
    dates
}

/// BYSETPOS selection: 1-based from the start, negative from the end,
/// applied after the other BYxxx filters for the period.
fn apply_set_pos(candidates: Vec<NaiveDateTime>, by_set_pos: &[i32]) -> Vec<NaiveDateTime> {
    if by_set_pos.is_empty() || candidates.is_empty() {
        return candidates;
    }
    let len = candidates.len() as i32;
    let mut selected: Vec<NaiveDateTime> = by_set_pos
        .iter()
        .filter_map(|&pos| {
            let index = if pos > 0 { pos - 1 } else { len + pos };
            if (0..len).contains(&index) {
                Some(candidates[index as usize])
            } else {
                None
            }
        })
        .collect();
    selected.sort();
    selected.dedup();
    selected
}

pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (next, NaiveDate::from_ymd_opt(year, month, 1)) {
        (Some(next), Some(first)) => (next - first).num_days() as u32,
        _ => 30,
    }
}

fn resolve_monthday(year: i32, month: u32, day: i32) -> Option<NaiveDate> {
    let len = days_in_month(year, month) as i32;
    let day = if day > 0 { day } else { len + 1 + day };
    if day < 1 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day as u32)
}

fn resolve_yearday(year: i32, day: i32) -> Option<NaiveDate> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let len = if jan1.leap_year() { 366 } else { 365 };
    let day = if day > 0 { day } else { len + 1 + day };
    if day < 1 || day > len {
        return None;
    }
    Some(jan1 + TimeDelta::days(day as i64 - 1))
}

fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, ordinal: i32) -> Option<NaiveDate> {
    let matching = weekdays_in_month(year, month, weekday);
    if ordinal > 0 {
        matching.get(ordinal as usize - 1).copied()
    } else {
        let idx = matching.len() as i32 + ordinal;
        if idx < 0 {
            None
        } else {
            matching.get(idx as usize).copied()
        }
    }
}

fn weekdays_in_month(year: i32, month: u32, weekday: Weekday) -> Vec<NaiveDate> {
    let Some(first) = NaiveDate::from_ymd_opt(year, month, 1) else {
        return Vec::new();
    };
    let mut date = first_weekday_on_or_after(first, weekday);
    let mut out = Vec::new();
    while date.month() == month && date.year() == year {
        out.push(date);
        date += TimeDelta::weeks(1);
    }
    out
}

fn nth_weekday_of_year(year: i32, weekday: Weekday, ordinal: i32) -> Option<NaiveDate> {
    let jan1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    if ordinal > 0 {
        let first = first_weekday_on_or_after(jan1, weekday);
        let date = first + TimeDelta::weeks(ordinal as i64 - 1);
        (date.year() == year).then_some(date)
    } else {
        let dec31 = NaiveDate::from_ymd_opt(year, 12, 31)?;
        let back = (dec31.weekday().days_since(weekday)) as i64;
        let last = dec31 - TimeDelta::days(back);
        let date = last + TimeDelta::weeks(ordinal as i64 + 1);
        (date.year() == year).then_some(date)
    }
}

fn first_weekday_on_or_after(date: NaiveDate, weekday: Weekday) -> NaiveDate {
    let ahead = weekday.days_since(date.weekday()) as i64;
    date + TimeDelta::days(ahead)
}

fn start_of_week(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let back = date.weekday().days_since(week_start) as i64;
    date - TimeDelta::days(back)
}

/// Start date of week `weekno` of `year` under `week_start`, per the RFC's
/// ISO-style numbering: week 1 is the first week with at least four days in
/// the year. Negative numbers count from the last week.
fn start_of_numbered_week(year: i32, weekno: i32, week_start: Weekday) -> Option<NaiveDate> {
    let first_week = |y: i32| -> Option<NaiveDate> {
        let jan1 = NaiveDate::from_ymd_opt(y, 1, 1)?;
        let back = jan1.weekday().days_since(week_start) as i64;
        let aligned = jan1 - TimeDelta::days(back);
        // The aligned week belongs to `y` when four or more of its days do.
        if back <= 3 {
            Some(aligned)
        } else {
            Some(aligned + TimeDelta::weeks(1))
        }
    };

    let this_first = first_week(year)?;
    if weekno > 0 {
        let start = this_first + TimeDelta::weeks(weekno as i64 - 1);
        let next_first = first_week(year + 1)?;
        (start < next_first).then_some(start)
    } else {
        let next_first = first_week(year + 1)?;
        let weeks = ((next_first - this_first).num_days() / 7) as i32;
        let index = weeks + weekno; // -1 selects the last week
        (index >= 0).then(|| this_first + TimeDelta::weeks(index as i64))
    }
}
