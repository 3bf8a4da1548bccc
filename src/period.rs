//! Period calendar: maps dates to ISO weeks or calendar months and back.
//!
//! A [`Period`] is a value derived deterministically from a date. Weeks use
//! ISO-8601 numbering (Monday start, the week containing January 4th is
//! week 1), so a week spanning a year boundary belongs to the ISO year of
//! its Thursday. Months use calendar boundaries.
//!
//! The canonical string form of a period (its key) is `YYYY-Www` for weeks
//! and `YYYY-MM` for months. Keys are produced by [`Display`](std::fmt::Display)
//! and parsed by [`FromStr`]; the two are exact inverses. Years outside
//! `0000..=9999` use the ISO-8601 expanded form with an explicit sign
//! (`+10000-W09`, `-0001-12`).
//!
//! ```rust
//! use chrono::NaiveDate;
//! use period_reports::period::{period_of, PeriodKind};
//!
//! let date = NaiveDate::from_ymd_opt(2025, 1, 14).unwrap();
//! let week = period_of(date, PeriodKind::Week);
//! assert_eq!(week.to_string(), "2025-W03");
//! assert_eq!(week.start(), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use chrono::{Datelike, Days, Months, NaiveDate, Weekday};

use crate::models::LogEntry;

/// Granularity of a report period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PeriodKind {
    Week,
    Month,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 2] = [PeriodKind::Week, PeriodKind::Month];

    /// Config section name for this kind (`weekly` / `monthly`).
    pub fn section(&self) -> &'static str {
        match self {
            PeriodKind::Week => "weekly",
            PeriodKind::Month => "monthly",
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKind::Week => f.write_str("week"),
            PeriodKind::Month => f.write_str("month"),
        }
    }
}

impl FromStr for PeriodKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "week" | "weekly" => Ok(PeriodKind::Week),
            "month" | "monthly" => Ok(PeriodKind::Month),
            other => bail!("Unknown period kind: '{}'. Must be week or month.", other),
        }
    }
}

/// Inclusive date range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ~ {}", self.start, self.end)
    }
}

/// An ISO week or calendar month.
///
/// Fields are private so that `start`/`end` always agree with
/// `(kind, year, index)`; construct through [`period_of`],
/// [`Period::week`], [`Period::month`] or by parsing a key. Ordering is by
/// kind, then `(year, index)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Period {
    kind: PeriodKind,
    year: i32,
    index: u32,
    start: NaiveDate,
    end: NaiveDate,
}

impl Period {
    /// ISO week `week` of ISO year `year`.
    ///
    /// Fails for week numbers the year does not have (e.g. week 53 of a
    /// 52-week year). The first and last weeks of the supported calendar
    /// are truncated at `NaiveDate::MIN`/`MAX`.
    pub fn week(year: i32, week: u32) -> Result<Self> {
        let day = |weekday| NaiveDate::from_isoywd_opt(year, week, weekday);
        let invalid = || anyhow!("{}-W{:02} is not a valid ISO week", format_year(year), week);
        // ISO years reach one past the calendar years at either end.
        if year < NaiveDate::MIN.year() - 1 || year > NaiveDate::MAX.year() + 1 {
            return Err(invalid());
        }
        let start = WEEKDAYS.iter().find_map(|&wd| day(wd)).ok_or_else(invalid)?;
        let end = WEEKDAYS.iter().rev().find_map(|&wd| day(wd)).ok_or_else(invalid)?;
        Ok(Self {
            kind: PeriodKind::Week,
            year,
            index: week,
            start,
            end,
        })
    }

    /// Calendar month `month` (1-12) of `year`.
    pub fn month(year: i32, month: u32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| anyhow!("{}-{:02} is not a valid month", format_year(year), month))?;
        Ok(Self {
            kind: PeriodKind::Month,
            year,
            index: month,
            start,
            end: month_end(start),
        })
    }

    pub fn kind(&self) -> PeriodKind {
        self.kind
    }

    /// ISO year for weeks, calendar year for months.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// ISO week number (1-53) or month number (1-12).
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start,
            end: self.end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.range().contains(date)
    }

    /// Canonical key, e.g. `2025-W03` or `2025-10`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PeriodKind::Week => write!(f, "{}-W{:02}", format_year(self.year), self.index),
            PeriodKind::Month => write!(f, "{}-{:02}", format_year(self.year), self.index),
        }
    }
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Four digits for years `0000..=9999`, otherwise a sign and at least four
/// digits.
fn format_year(year: i32) -> String {
    if (0..=9999).contains(&year) {
        format!("{:04}", year)
    } else {
        format!("{:+05}", year)
    }
}

/// Last day of the month starting at `start`, clamped to `NaiveDate::MAX`.
fn month_end(start: NaiveDate) -> NaiveDate {
    start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

impl FromStr for Period {
    type Err = anyhow::Error;

    /// Parse `YYYY-Www` or `YYYY-MM`, or the signed expanded year form.
    /// Only the exact text [`Display`](fmt::Display) produces is accepted,
    /// so parsing and formatting round-trip.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || anyhow!("invalid period key '{}': expected YYYY-Www or YYYY-MM", s);

        // The year ends at the first '-' after an optional leading sign.
        let split = s
            .get(1..)
            .and_then(|tail| tail.find('-'))
            .map(|i| i + 1)
            .ok_or_else(invalid)?;
        let (year_text, rest) = (&s[..split], &s[split + 1..]);
        let year: i32 = year_text.parse().map_err(|_| invalid())?;
        if format_year(year) != year_text {
            return Err(invalid());
        }

        match rest.strip_prefix('W') {
            Some(week) => Period::week(year, parse_digits(week, 2).ok_or_else(invalid)?),
            None => Period::month(year, parse_digits(rest, 2).ok_or_else(invalid)?),
        }
    }
}

fn parse_digits(s: &str, width: usize) -> Option<u32> {
    if s.len() != width || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Map a date to the period of `kind` containing it.
///
/// Total over every `NaiveDate`: the weeks at the ends of the supported
/// calendar are truncated to `NaiveDate::MIN`/`MAX`.
pub fn period_of(date: NaiveDate, kind: PeriodKind) -> Period {
    match kind {
        PeriodKind::Week => {
            let iso = date.iso_week();
            let from_monday = u64::from(date.weekday().num_days_from_monday());
            Period {
                kind,
                year: iso.year(),
                index: iso.week(),
                start: date
                    .checked_sub_days(Days::new(from_monday))
                    .unwrap_or(NaiveDate::MIN),
                end: date
                    .checked_add_days(Days::new(6 - from_monday))
                    .unwrap_or(NaiveDate::MAX),
            }
        }
        PeriodKind::Month => {
            let start = date
                .checked_sub_days(Days::new(u64::from(date.day0())))
                .unwrap_or(NaiveDate::MIN);
            Period {
                kind,
                year: date.year(),
                index: date.month(),
                start,
                end: month_end(start),
            }
        }
    }
}

/// Inclusive date range of a period.
pub fn range_of(period: &Period) -> DateRange {
    period.range()
}

/// Group entries by the period of `kind` their date falls in.
///
/// Groups are ordered ascending by period; entries keep their input order
/// within a group.
pub fn group_by_period(entries: &[LogEntry], kind: PeriodKind) -> BTreeMap<Period, Vec<&LogEntry>> {
    let mut groups: BTreeMap<Period, Vec<&LogEntry>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(period_of(entry.date, kind))
            .or_default()
            .push(entry);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn entry(id: &str, date: NaiveDate) -> LogEntry {
        LogEntry {
            id: id.to_string(),
            date,
            title: None,
            content_ref: id.to_string(),
            properties: Default::default(),
        }
    }

    #[test]
    fn test_week_of_mid_january() {
        let p = period_of(d(2025, 1, 14), PeriodKind::Week);
        assert_eq!(p.to_string(), "2025-W03");
        assert_eq!(p.start(), d(2025, 1, 13));
        assert_eq!(p.end(), d(2025, 1, 19));
    }

    #[test]
    fn test_week_spanning_year_boundary_uses_iso_year() {
        // Monday 2024-12-30 .. Sunday 2025-01-05; Thursday is 2025-01-02.
        assert_eq!(period_of(d(2024, 12, 30), PeriodKind::Week).to_string(), "2025-W01");
        assert_eq!(period_of(d(2025, 1, 5), PeriodKind::Week).to_string(), "2025-W01");
        // 2021-01-03 is a Sunday whose Thursday lies in 2020.
        assert_eq!(period_of(d(2021, 1, 3), PeriodKind::Week).to_string(), "2020-W53");
        // 2027-01-01 is a Friday; 2026 has 53 ISO weeks.
        assert_eq!(period_of(d(2027, 1, 1), PeriodKind::Week).to_string(), "2026-W53");
        assert_eq!(period_of(d(2026, 1, 1), PeriodKind::Week).to_string(), "2026-W01");
    }

    #[test]
    fn test_month_ranges() {
        let feb = period_of(d(2024, 2, 10), PeriodKind::Month);
        assert_eq!(feb.to_string(), "2024-02");
        assert_eq!(feb.range(), DateRange { start: d(2024, 2, 1), end: d(2024, 2, 29) });

        let dec = period_of(d(2025, 12, 31), PeriodKind::Month);
        assert_eq!(dec.end(), d(2025, 12, 31));
        assert_eq!(dec.start(), d(2025, 12, 1));
    }

    #[test]
    fn test_every_date_maps_into_its_range() {
        let mut date = d(1995, 1, 1);
        let last = d(2035, 12, 31);
        while date <= last {
            for kind in PeriodKind::ALL {
                let p = period_of(date, kind);
                assert!(p.contains(date), "{} not in {} ({})", date, p, p.range());
                assert_eq!(period_of(p.start(), kind), p);
                assert_eq!(period_of(p.end(), kind), p);
                if kind == PeriodKind::Week {
                    assert_eq!((p.end() - p.start()).num_days(), 6);
                    assert_eq!(p.start().weekday(), Weekday::Mon);
                }
            }
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn test_calendar_extremes_map_into_their_range() {
        let mut dates = vec![NaiveDate::MIN, NaiveDate::MAX, d(0, 1, 1), d(9999, 12, 31), d(10000, 3, 1)];
        for i in 1..=10 {
            dates.push(NaiveDate::MIN.checked_add_days(Days::new(i)).unwrap());
            dates.push(NaiveDate::MAX.checked_sub_days(Days::new(i)).unwrap());
        }
        for date in dates {
            for kind in PeriodKind::ALL {
                let p = period_of(date, kind);
                assert!(p.contains(date), "{} not in {} ({})", date, p, p.range());
                assert_eq!(period_of(p.start(), kind), p);
                assert_eq!(period_of(p.end(), kind), p);
                assert_eq!(p.key().parse::<Period>().unwrap(), p, "{}", p);
            }
        }
    }

    #[test]
    fn test_expanded_year_keys() {
        let p = period_of(d(10000, 3, 1), PeriodKind::Week);
        assert_eq!(p.key(), "+10000-W09");
        assert_eq!(period_of(d(-1, 12, 15), PeriodKind::Month).key(), "-0001-12");
        assert_eq!("-0001-12".parse::<Period>().unwrap(), Period::month(-1, 12).unwrap());
        for bad in [
            "+2025-01", "10000-01", "-001-01", "+010000-01", "-0000-01", "+-2025-01",
            "-2147483648-W01", "+2147483647-W52", "+999999-01",
        ] {
            assert!(bad.parse::<Period>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_adjacent_periods_do_not_overlap() {
        for kind in PeriodKind::ALL {
            let mut p = period_of(d(2019, 12, 1), kind);
            for _ in 0..120 {
                let next = period_of(p.end().succ_opt().unwrap(), kind);
                assert_eq!(next.start(), p.end().succ_opt().unwrap());
                assert!(next > p);
                p = next;
            }
        }
    }

    /// "Monday of the week containing Jan 4th, plus (week - 1) * 7 days"
    /// agrees with the ISO-8601 definition for every week of every year,
    /// including years starting on Friday, Saturday or Sunday.
    #[test]
    fn test_jan4_formula_matches_iso_reference() {
        for year in 1900..=2100 {
            let jan4 = d(year, 1, 4);
            let week1_monday =
                jan4 - Duration::days(i64::from(jan4.weekday().num_days_from_monday()));
            let mut week = 1;
            while let Ok(p) = Period::week(year, week) {
                let formula = week1_monday + Duration::days(i64::from(week - 1) * 7);
                assert_eq!(p.start(), formula, "{}", p);
                assert_eq!(period_of(p.start(), PeriodKind::Week), p);
                week += 1;
            }
            assert!(week == 53 || week == 54, "{} ended at week {}", year, week);
        }
    }

    #[test]
    fn test_key_round_trip() {
        for year in [1999, 2004, 2020, 2025, 2026] {
            let mut week = 1;
            while let Ok(p) = Period::week(year, week) {
                assert_eq!(p.key().parse::<Period>().unwrap(), p);
                week += 1;
            }
            for month in 1..=12 {
                let p = Period::month(year, month).unwrap();
                assert_eq!(p.key().parse::<Period>().unwrap(), p);
            }
        }
    }

    #[test]
    fn test_parse_rejects_malformed_keys() {
        for bad in [
            "", "2025", "2025-W3", "2025-W00", "2025-W54", "2025-13", "2025-00", "25-01",
            "2025-1", "2025-w03", "2025-W03x", "abcd-01", "2025/01", "2025-W53",
        ] {
            assert!(bad.parse::<Period>().is_err(), "accepted {:?}", bad);
        }
        assert!("2026-W53".parse::<Period>().is_ok());
    }

    #[test]
    fn test_group_by_week() {
        let entries = vec![
            entry("a", d(2025, 1, 13)),
            entry("b", d(2025, 1, 14)),
            entry("c", d(2025, 1, 20)),
        ];
        let groups = group_by_period(&entries, PeriodKind::Week);
        let keys: Vec<String> = groups.keys().map(Period::key).collect();
        assert_eq!(keys, vec!["2025-W03", "2025-W04"]);

        let w03 = &groups[&"2025-W03".parse::<Period>().unwrap()];
        assert_eq!(w03.iter().map(|e| e.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(groups[&"2025-W04".parse::<Period>().unwrap()].len(), 1);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("weekly".parse::<PeriodKind>().unwrap(), PeriodKind::Week);
        assert_eq!("Month".parse::<PeriodKind>().unwrap(), PeriodKind::Month);
        assert!("day".parse::<PeriodKind>().is_err());
    }
}
