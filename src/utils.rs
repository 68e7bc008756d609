use crate::schema::RawValue;
use chrono::Timelike;
use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

fn leading_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^-?(\d+\.?\d*|\.\d+)").expect("valid regex"))
}

fn leading_integer_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]?\d+").expect("valid regex"))
}

fn clock_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d{1,2})(?::\d{2}(?::\d{2})?)?$").expect("valid regex"))
}

/// Canonical text form used for join keys, column names and category lookups.
///
/// Strips diacritics (NFD + combining marks), uppercases, trims and collapses
/// internal whitespace runs to one space.
pub fn normalize_text(value: &str) -> String {
    let folded: String = value
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_uppercase();

    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_key(value: &RawValue) -> String {
    normalize_text(&value.to_text())
}

/// Builds the opaque `receipt|sequence` join key.
pub fn join_key(receipt: &RawValue, sequence: &RawValue) -> String {
    format!("{}|{}", normalize_key(receipt), normalize_key(sequence))
}

/// Parses a monetary cell. Never fails: anything unreadable is 0.
///
/// With both separators present the period is a thousands separator and the
/// comma the decimal point (`1.234,56`); a lone comma is a decimal point.
pub fn parse_money(value: &RawValue) -> f64 {
    match value {
        RawValue::Empty | RawValue::DateTime(_) => 0.0,
        RawValue::Number(n) => {
            if n.is_finite() {
                *n
            } else {
                0.0
            }
        }
        RawValue::Text(text) => {
            let mut cleaned: String = text
                .chars()
                .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
                .collect();

            if cleaned.is_empty() {
                return 0.0;
            }

            if cleaned.contains('.') && cleaned.contains(',') {
                cleaned = cleaned.replace('.', "").replace(',', ".");
            } else if cleaned.contains(',') {
                cleaned = cleaned.replace(',', ".");
            }

            leading_number_re()
                .find(&cleaned)
                .and_then(|m| m.as_str().parse::<f64>().ok())
                .filter(|n| n.is_finite())
                .unwrap_or(0.0)
        }
    }
}

/// Parses a quantity cell, defaulting to 1 when unreadable or not positive.
pub fn parse_quantity(value: &RawValue) -> u32 {
    let parsed = match value {
        RawValue::Number(n) if n.is_finite() => Some(n.trunc() as i64),
        RawValue::Text(text) => leading_integer_re()
            .find(text.trim())
            .and_then(|m| m.as_str().parse::<i64>().ok()),
        _ => None,
    };

    match parsed {
        Some(q) if q > 0 => u32::try_from(q).unwrap_or(u32::MAX),
        _ => 1,
    }
}

fn hour_from_number(n: f64) -> Option<u32> {
    if !n.is_finite() || n < 0.0 {
        return None;
    }
    // Spreadsheet times are fractions of a day.
    let hour = if n < 1.0 { (n * 24.0).floor() } else { n.floor() };
    Some(hour.min(f64::from(u32::MAX)) as u32)
}

/// Extracts the hour of day from a time cell.
pub fn parse_hour(value: &RawValue) -> Option<u32> {
    match value {
        RawValue::Empty => None,
        RawValue::Number(n) => hour_from_number(*n),
        RawValue::DateTime(dt) => Some(dt.time().hour()),
        RawValue::Text(text) => {
            let trimmed = text.trim();
            if let Some(caps) = clock_re().captures(trimmed) {
                return caps[1].parse::<u32>().ok();
            }
            trimmed
                .replace(',', ".")
                .parse::<f64>()
                .ok()
                .and_then(hour_from_number)
        }
    }
}
