//! Normalises the date shapes found in spreadsheet exports into `NaiveDate`.

use chrono::{Datelike, Duration, NaiveDate};
use derive_more::Display;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::str::FromStr;

use crate::error::HrError;

static YEAR_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})\s*日?$").unwrap()
});
static YEAR_LAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})$").unwrap());
static SERIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").unwrap());
static EMBEDDED_YEAR_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-/年.](\d{1,2})[-/月.](\d{1,2})").unwrap());
static EMBEDDED_YEAR_LAST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[-/.](\d{1,2})[-/.](\d{4})").unwrap());

/// Largest serial a spreadsheet can hold (9999-12-31).
const MAX_SERIAL: f64 = 2_958_465.0;

fn ymd(year: &str, month: &str, day: &str) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?)
}

/// Day-first, then month-first when the first reading is not a valid date.
fn day_month_year(a: &str, b: &str, year: &str) -> Option<NaiveDate> {
    ymd(year, b, a).or_else(|| ymd(year, a, b))
}

/// Spreadsheet serial day number; serials above 60 skip the phantom 1900-02-29.
pub fn from_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=MAX_SERIAL).contains(&serial) {
        return None;
    }
    let days = serial.trunc() as i64;
    let epoch = if days > 60 {
        NaiveDate::from_ymd_opt(1899, 12, 30)?
    } else {
        NaiveDate::from_ymd_opt(1899, 12, 31)?
    };
    epoch.checked_add_signed(Duration::days(days))
}

/// Accepts ISO, slash or dot separated, `YYYY年MM月DD日`, day/month-first with
/// a trailing 4-digit year, spreadsheet serials, and dates embedded in longer
/// text such as `2023-01-01 08:30:00`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(c) = YEAR_FIRST.captures(text) {
        return ymd(&c[1], &c[2], &c[3]);
    }
    if let Some(c) = YEAR_LAST.captures(text) {
        return day_month_year(&c[1], &c[2], &c[3]);
    }
    if SERIAL.is_match(text) {
        return text.parse::<f64>().ok().and_then(from_serial);
    }

    if let Some(c) = EMBEDDED_YEAR_FIRST.captures(text) {
        if let Some(date) = ymd(&c[1], &c[2], &c[3]).or_else(|| ymd(&c[1], &c[3], &c[2])) {
            return Some(date);
        }
    }
    EMBEDDED_YEAR_LAST
        .captures(text)
        .and_then(|c| day_month_year(&c[1], &c[2], &c[3]))
}

/// Same as [`parse_date`] for a raw spreadsheet cell.
pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date(s),
        Value::Number(n) => n.as_f64().and_then(from_serial),
        _ => None,
    }
}

/// Canonical `YYYY-MM-DD` form, or a parse error naming the input.
pub fn normalize_date(raw: &str) -> Result<String, HrError> {
    parse_date(raw)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .ok_or_else(|| HrError::Parse(format!("unrecognised date: {raw}")))
}

/// A calendar month, written `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display(fmt = "{:04}-{:02}", year, month)]
pub struct Month {
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self { year, month })
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// First day of the following month (exclusive upper bound).
    pub fn end_exclusive(&self) -> NaiveDate {
        self.next().first_day()
    }

    pub fn last_day(&self) -> NaiveDate {
        self.end_exclusive().pred_opt().unwrap_or(NaiveDate::MIN)
    }

    pub fn days(&self) -> u32 {
        (self.end_exclusive() - self.first_day()).num_days() as u32
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date.year() == self.year && date.month() == self.month
    }
}

impl FromStr for Month {
    type Err = HrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HrError::validation("month", format!("expected YYYY-MM, got '{s}'"));
        let (year, month) = s.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 {
            return Err(invalid());
        }
        let year = year.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Month::new(year, month).ok_or_else(invalid)
    }
}
