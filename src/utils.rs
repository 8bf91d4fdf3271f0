use crate::error::{CopilotError, Result};
use chrono::{Datelike, Months, NaiveDate};

const ISO_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

// Month-first, the locale default when a date is not ISO.
const LOCALE_FORMATS: &[&str] = &["%m/%d/%Y", "%m-%d-%Y", "%m/%d/%y", "%d.%m.%Y"];

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

pub fn next_month(month: NaiveDate) -> NaiveDate {
    add_months(month, 1)
}

pub fn prev_month(month: NaiveDate) -> NaiveDate {
    add_months(month, -1)
}

/// Shifts a month by `delta` months, saturating at chrono's representable range.
pub fn add_months(month: NaiveDate, delta: i32) -> NaiveDate {
    let month = first_of_month(month);
    let shifted = if delta >= 0 {
        month.checked_add_months(Months::new(delta as u32))
    } else {
        month.checked_sub_months(Months::new(delta.unsigned_abs()))
    };
    shifted.unwrap_or(month)
}

/// Upper bound on any month window taken from a question or config.
pub const MAX_WINDOW_MONTHS: u32 = 1200;

pub fn clamp_window_months(months: u32) -> u32 {
    months.clamp(1, MAX_WINDOW_MONTHS)
}

/// First month of the `months`-long window ending at `end`. The length is
/// clamped to `1..=MAX_WINDOW_MONTHS`.
pub fn window_start(end: NaiveDate, months: u32) -> NaiveDate {
    let span = clamp_window_months(months) - 1;
    first_of_month(end)
        .checked_sub_months(Months::new(span))
        .unwrap_or(NaiveDate::MIN)
}

pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    let year_diff = end.year() - start.year();
    let month_diff = end.month() as i32 - start.month() as i32;
    year_diff * 12 + month_diff
}

/// Every first-of-month date from `start` to `end`, inclusive.
pub fn months_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    let end = first_of_month(end);
    let mut current = first_of_month(start);

    while current <= end {
        months.push(current);
        let next = next_month(current);
        if next == current {
            break;
        }
        current = next;
    }

    months
}

pub fn month_from_name(token: &str) -> Option<u32> {
    let token = token.trim().trim_end_matches('.').to_lowercase();
    if token.len() < 3 {
        return None;
    }
    if token == "sept" {
        return Some(9);
    }
    MONTH_NAMES
        .iter()
        .position(|name| *name == token || (token.len() == 3 && name.starts_with(&token)))
        .map(|idx| idx as u32 + 1)
}

/// Parses a date under the lenient grammar: ISO first, then month-first
/// locale formats, then month names ("January 2023", "15 Jan 2023").
/// Month-only values ("2023-01", "01/2023") resolve to the first of the month.
pub fn parse_lenient_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    // Timestamps such as "2023-01-15 00:00:00" or "2023-01-15T10:00:00Z"
    if text.contains(':') {
        let head = text.split(['T', ' ']).next().unwrap_or(text);
        if head != text {
            return parse_lenient_date(head);
        }
    }

    parse_with_formats(text, ISO_FORMATS)
        .or_else(|| parse_year_month(text))
        .or_else(|| parse_with_formats(text, LOCALE_FORMATS))
        .or_else(|| parse_named_month(text))
}

/// Parses a month phrase and truncates it to the first of its month.
pub fn parse_month(text: &str) -> Result<NaiveDate> {
    parse_lenient_date(text)
        .map(first_of_month)
        .ok_or_else(|| CopilotError::DateError(format!("Unrecognized date: '{}'", text.trim())))
}

fn parse_with_formats(text: &str, formats: &[&str]) -> Option<NaiveDate> {
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
}

fn parse_year_month(text: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = text.split(['-', '/']).collect();
    if parts.len() != 2 || !parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let (year, month) = match (parts[0].len(), parts[1].len()) {
        (4, 1..=2) => (parts[0], parts[1]),
        (1..=2, 4) => (parts[1], parts[0]),
        _ => return None,
    };

    NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)
}

fn parse_named_month(text: &str) -> Option<NaiveDate> {
    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    if tokens.len() < 2 || tokens.len() > 3 {
        return None;
    }

    let mut month = None;
    let mut year = None;
    let mut day = None;

    for token in tokens {
        if token.chars().all(|c| c.is_ascii_digit()) {
            match token.len() {
                4 if year.is_none() => year = token.parse::<i32>().ok(),
                1 | 2 if day.is_none() => day = token.parse::<u32>().ok(),
                _ => return None,
            }
        } else if month.is_none() {
            month = Some(month_from_name(token)?);
        } else {
            return None;
        }
    }

    NaiveDate::from_ymd_opt(year?, month?, day.unwrap_or(1))
}
