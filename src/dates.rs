//! Date discovery on untyped rows.
//!
//! Every row carries its production date somewhere, in whatever column and
//! encoding the exporting system chose. Rows are scanned field by field in their
//! natural order and the first field that looks like a date wins. Matches are
//! truncated to day/month; Sundays are moved to the following Monday.

use crate::config::EngineConfig;
use crate::error::ReconciliationError;
use crate::schema::{RawRow, RawValue};
use crate::utils::normalize_text;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use log::info;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

/// Spreadsheet serial numbers in this range are treated as dates (1909..2036).
const SERIAL_DATE_RANGE: std::ops::Range<f64> = 40000.0..50000.0;

/// Default year the weekend shift computes weekdays in.
pub const DEFAULT_REFERENCE_YEAR: i32 = 2025;

fn slash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})/(\d{1,2})(?:/(\d{4}|\d{2}))?\b").expect("valid regex")
    })
}

fn dash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(\d{1,2})-(\d{1,2})(?:-(\d{4}|\d{2}))?\b").expect("valid regex")
    })
}

fn iso_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("valid regex"))
}

fn month_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(\d{1,2})(?:\s*de)?[\s/\-.]*(jan|fev|mar|abr|mai|jun|jul|ago|set|out|nov|dez)[a-z]*\.?(?:\s*de)?[\s/\-.]*(\d{4}|\d{2})\b",
        )
        .expect("valid regex")
    })
}

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "jan", "fev", "mar", "abr", "mai", "jun", "jul", "ago", "set", "out", "nov", "dez",
];

/// A calendar day without a year. Reports operate on a single year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayMonth {
    pub day: u32,
    pub month: u32,
}

impl DayMonth {
    pub fn new(day: u32, month: u32) -> Option<Self> {
        if (1..=31).contains(&day) && (1..=12).contains(&month) {
            Some(Self { day, month })
        } else {
            None
        }
    }

    pub fn in_year(&self, year: i32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(year, self.month, self.day)
    }
}

impl PartialOrd for DayMonth {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DayMonth {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.month, self.day).cmp(&(other.month, other.day))
    }
}

impl fmt::Display for DayMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}", self.day, self.month)
    }
}

impl FromStr for DayMonth {
    type Err = ReconciliationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReconciliationError::InvalidInput(format!("Invalid DD/MM date '{}'", s));
        let (day, month) = s.trim().split_once('/').ok_or_else(invalid)?;
        let day = day.parse::<u32>().map_err(|_| invalid())?;
        let month = month.parse::<u32>().map_err(|_| invalid())?;
        DayMonth::new(day, month).ok_or_else(invalid)
    }
}

impl Serialize for DayMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DayMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A date found in a cell, before weekend adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateMatch {
    pub day_month: DayMonth,
    pub year: Option<i32>,
}

fn expand_year(raw: Option<&str>) -> Option<i32> {
    let year = raw?.parse::<i32>().ok()?;
    match year {
        0..=99 => Some(2000 + year),
        1000..=9999 => Some(year),
        _ => None,
    }
}

fn from_parts(day: &str, month: &str, year: Option<&str>) -> Option<DateMatch> {
    let day_month = DayMonth::new(day.parse().ok()?, month.parse().ok()?)?;
    Some(DateMatch {
        day_month,
        year: expand_year(year),
    })
}

fn match_serial(n: f64) -> Option<DateMatch> {
    if !SERIAL_DATE_RANGE.contains(&n) {
        return None;
    }
    // Day 1 is 1900-01-01 and the 1900 leap-year bug adds a phantom day.
    let offset = (n.floor() as u64).checked_sub(2)?;
    let date = NaiveDate::from_ymd_opt(1900, 1, 1)?.checked_add_days(Days::new(offset))?;
    Some(DateMatch {
        day_month: DayMonth::new(date.day(), date.month())?,
        year: Some(date.year()),
    })
}

fn match_text(text: &str) -> Option<DateMatch> {
    if let Some(caps) = slash_re().captures(text) {
        if let Some(m) = from_parts(&caps[1], &caps[2], caps.get(3).map(|m| m.as_str())) {
            return Some(m);
        }
    }

    if let Some(caps) = iso_re().captures(text) {
        if let Some(m) = from_parts(&caps[3], &caps[2], Some(&caps[1])) {
            return Some(m);
        }
    }

    if let Some(caps) = dash_re().captures(text) {
        if let Some(m) = from_parts(&caps[1], &caps[2], caps.get(3).map(|m| m.as_str())) {
            return Some(m);
        }
    }

    let folded = normalize_text(text).to_lowercase();
    let caps = month_name_re().captures(&folded)?;
    let month = MONTH_ABBREVIATIONS.iter().position(|m| *m == &caps[2])? as u32 + 1;
    Some(DateMatch {
        day_month: DayMonth::new(caps[1].parse().ok()?, month)?,
        year: expand_year(Some(&caps[3])),
    })
}

/// Recognizes a date in a single cell, without weekend adjustment.
pub fn match_date(value: &RawValue) -> Option<DateMatch> {
    match value {
        RawValue::Empty => None,
        RawValue::Number(n) => match_serial(*n),
        RawValue::DateTime(dt) => Some(DateMatch {
            day_month: DayMonth::new(dt.day(), dt.month())?,
            year: Some(dt.year()),
        }),
        RawValue::Text(text) => match_text(text),
    }
}

/// State scoped to one batch run: the weekday year policy and the set of
/// weekend adjustments already logged.
#[derive(Debug)]
pub struct RunContext {
    reference_year: i32,
    use_source_year: bool,
    logged_shifts: Mutex<HashSet<DayMonth>>,
}

impl RunContext {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            reference_year: config.reference_year,
            use_source_year: config.use_source_year,
            logged_shifts: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_reference_year(reference_year: i32) -> Self {
        Self {
            reference_year,
            use_source_year: false,
            logged_shifts: Mutex::new(HashSet::new()),
        }
    }

    /// Finds the row's production date: first matching field in field order.
    pub fn extract_date(&self, row: &RawRow) -> Option<DayMonth> {
        row.iter()
            .find_map(|(_, value)| match_date(value))
            .map(|m| self.adjust_weekend(m))
    }

    /// Moves Sundays to the following Monday. Saturdays are kept.
    pub fn adjust_weekend(&self, found: DateMatch) -> DayMonth {
        let year = match (self.use_source_year, found.year) {
            (true, Some(year)) => year,
            _ => self.reference_year,
        };

        let Some(date) = found.day_month.in_year(year) else {
            return found.day_month;
        };

        if date.weekday() != Weekday::Sun {
            return found.day_month;
        }

        let Some(monday) = date.succ_opt() else {
            return found.day_month;
        };
        let shifted = DayMonth {
            day: monday.day(),
            month: monday.month(),
        };

        if let Ok(mut logged) = self.logged_shifts.lock() {
            if logged.insert(found.day_month) {
                info!(
                    "Date {} falls on a Sunday in {}; counting it as Monday {}",
                    found.day_month, year, shifted
                );
            }
        }

        shifted
    }

    /// Number of distinct Sunday adjustments seen during this run.
    pub fn adjusted_dates(&self) -> usize {
        self.logged_shifts.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn text(s: &str) -> RawValue {
        RawValue::Text(s.to_string())
    }

    fn dm(day: u32, month: u32) -> DayMonth {
        DayMonth::new(day, month).unwrap()
    }

    #[test]
    fn test_serial_dates() {
        let m = match_date(&RawValue::Number(45292.0)).unwrap();
        assert_eq!(m.day_month, dm(1, 1));
        assert_eq!(m.year, Some(2024));
        // Fractional part is the time of day.
        let m = match_date(&RawValue::Number(45358.75)).unwrap();
        assert_eq!(m.day_month, dm(7, 3));
        assert!(match_date(&RawValue::Number(39999.0)).is_none());
        assert!(match_date(&RawValue::Number(50000.0)).is_none());
        assert!(match_date(&RawValue::Number(12.0)).is_none());
    }

    #[test]
    fn test_text_patterns() {
        assert_eq!(match_date(&text("07/03/2025")).unwrap().day_month, dm(7, 3));
        assert_eq!(match_date(&text("7/3")).unwrap().day_month, dm(7, 3));
        assert_eq!(match_date(&text("07-03-25")).unwrap().year, Some(2025));
        assert_eq!(match_date(&text("2025-03-07")).unwrap().day_month, dm(7, 3));
        assert_eq!(
            match_date(&text("Produção de 07/03/2025 08:10")).unwrap().day_month,
            dm(7, 3)
        );
        assert!(match_date(&text("CREME")).is_none());
        assert!(match_date(&text("45/13")).is_none());
    }

    #[test]
    fn test_portuguese_month_names() {
        let m = match_date(&text("7 de mar de 2025")).unwrap();
        assert_eq!(m.day_month, dm(7, 3));
        assert_eq!(m.year, Some(2025));
        assert_eq!(match_date(&text("12-DEZ-2024")).unwrap().day_month, dm(12, 12));
        assert_eq!(match_date(&text("3 de Março de 2025")).unwrap().day_month, dm(3, 3));
        // A year is required.
        assert!(match_date(&text("7 mar")).is_none());
    }

    #[test]
    fn test_datetime_cells() {
        let dt = NaiveDateTime::parse_from_str("2025-03-07 08:15:00", "%Y-%m-%d %H:%M:%S").unwrap();
        assert_eq!(match_date(&RawValue::DateTime(dt)).unwrap().day_month, dm(7, 3));
    }

    #[test]
    fn test_first_matching_field_wins() {
        let ctx = RunContext::with_reference_year(2025);
        let row = RawRow::new()
            .with("Numero", "A1")
            .with("Emissao", "05/03/2025")
            .with("Entrega", "07/03/2025");
        assert_eq!(ctx.extract_date(&row), Some(dm(5, 3)));
        assert_eq!(ctx.extract_date(&RawRow::new().with("x", "y")), None);
    }

    #[test]
    fn test_sunday_shifts_to_monday_saturday_kept() {
        let ctx = RunContext::with_reference_year(2025);
        // 09/03/2025 is a Sunday, 08/03/2025 a Saturday.
        let sunday = RawRow::new().with("Data", "09/03/2025");
        let saturday = RawRow::new().with("Data", "08/03/2025");
        assert_eq!(ctx.extract_date(&sunday), Some(dm(10, 3)));
        assert_eq!(ctx.extract_date(&saturday), Some(dm(8, 3)));
        // Month rollover
        let end_of_month = RawRow::new().with("Data", "30/03");
        assert_eq!(ctx.extract_date(&end_of_month), Some(dm(31, 3)));
    }

    #[test]
    fn test_reference_year_drives_weekday_by_default() {
        // 09/03/2024 was a Saturday, but the reference year decides.
        let ctx = RunContext::with_reference_year(2025);
        let row = RawRow::new().with("Data", "09/03/2024");
        assert_eq!(ctx.extract_date(&row), Some(dm(10, 3)));

        let config = EngineConfig {
            use_source_year: true,
            ..EngineConfig::default()
        };
        let ctx = RunContext::new(&config);
        assert_eq!(ctx.extract_date(&row), Some(dm(9, 3)));
    }

    #[test]
    fn test_shift_logged_once_per_run() {
        let ctx = RunContext::with_reference_year(2025);
        let row = RawRow::new().with("Data", "09/03");
        for _ in 0..5 {
            ctx.extract_date(&row);
        }
        assert_eq!(ctx.adjusted_dates(), 1);
        assert_eq!(RunContext::with_reference_year(2025).adjusted_dates(), 0);
    }

    #[test]
    fn test_day_month_text_form() {
        assert_eq!(dm(7, 3).to_string(), "07/03");
        assert_eq!("7/3".parse::<DayMonth>().unwrap(), dm(7, 3));
        assert!("32/1".parse::<DayMonth>().is_err());
        assert!(dm(31, 1) < dm(1, 2));
        assert_eq!(serde_json::to_string(&dm(1, 12)).unwrap(), "\"01/12\"");
    }
}
