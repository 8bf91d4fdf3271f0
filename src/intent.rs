//! Question-to-metric resolution.
//!
//! Classification is a priority-ordered keyword table; the first group with a
//! match wins. Time windows and Opex category filters are extracted
//! separately so each step is testable without loaded data.

use crate::error::{CopilotError, Result};
use crate::schema::{MetricKind, MetricRequest};
use crate::utils::{clamp_window_months, parse_month, window_start, MAX_WINDOW_MONTHS};
use chrono::NaiveDate;
use log::debug;
use regex::Regex;

/// Keyword groups in priority order.
pub const INTENT_KEYWORDS: &[(MetricKind, &[&str])] = &[
    (MetricKind::CashRunway, &["runway", "burn rate", "cash burn"]),
    (MetricKind::GrossMargin, &["margin", "gross profit"]),
    (MetricKind::Ebitda, &["ebitda"]),
    (MetricKind::Opex, &["opex", "expense", "operating cost", "spend"]),
    (
        MetricKind::Revenue,
        &["revenue", "sales", "turnover", "top line", "vs budget", "versus budget", "against budget"],
    ),
];

const BREAKDOWN_KEYWORDS: &[&str] = &["break", "by category", "categories", "split"];

const NUMBER_WORDS: &[&str] = &[
    "one", "two", "three", "four", "five", "six", "seven", "eight", "nine", "ten", "eleven", "twelve",
];

const MONTH_PHRASE: &str = r"(?i)\b\d{4}-\d{1,2}-\d{1,2}\b|\b\d{1,2}/\d{1,2}/\d{4}\b|\b(?:jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?,?\s+\d{4}\b|\b\d{4}[-/]\d{1,2}\b|\b\d{1,2}[-/]\d{4}\b";

const RELATIVE_MONTHS: &str = r"(?i)\b(?:last|past|previous|trailing)\s+(\d+|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve)\s+months?\b";

const RELATIVE_PERIOD: &str = r"(?i)\b(?:last|past|previous|trailing)\s+(quarter|year)\b";

/// What the resolver needs to know about the loaded tables.
#[derive(Debug, Clone, Default)]
pub struct ResolverContext {
    pub latest_month: Option<NaiveDate>,
    /// Opex category suffixes present in the data, e.g. "Marketing".
    pub opex_categories: Vec<String>,
    /// Window used for a margin "trend" question with no explicit range.
    pub trend_months: u32,
}

/// First metric whose keywords appear in the question.
pub fn classify(question: &str) -> Option<MetricKind> {
    let q = question.to_lowercase();
    INTENT_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| q.contains(k)))
        .map(|(kind, _)| *kind)
}

pub fn wants_breakdown(question: &str) -> bool {
    let q = question.to_lowercase();
    BREAKDOWN_KEYWORDS.iter().any(|k| q.contains(k))
}

/// Whole-word, case-insensitive containment. Both inputs lowercased.
fn contains_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + needle.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
    })
}

/// Opex category named in the question. Text after "by category" is
/// checked first, then the whole question; longer names win ties.
pub fn extract_category(question: &str, known: &[String]) -> Option<String> {
    let q = question.to_lowercase();
    let mut known: Vec<&String> = known.iter().collect();
    known.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let tail = q.find("by category").map(|idx| &q[idx + "by category".len()..]);
    tail.into_iter()
        .chain(std::iter::once(q.as_str()))
        .find_map(|text| {
            known
                .iter()
                .find(|cat| contains_word(text, &cat.to_lowercase()))
                .map(|cat| cat.to_string())
        })
}

pub struct IntentResolver {
    month_phrase: Regex,
    relative_months: Regex,
    relative_period: Regex,
}

impl IntentResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            month_phrase: Regex::new(MONTH_PHRASE)?,
            relative_months: Regex::new(RELATIVE_MONTHS)?,
            relative_period: Regex::new(RELATIVE_PERIOD)?,
        })
    }

    /// Explicit months mentioned in the question, in order of appearance.
    pub fn extract_months(&self, question: &str) -> Vec<NaiveDate> {
        self.month_phrase
            .find_iter(question)
            .filter_map(|m| parse_month(m.as_str()).ok())
            .collect()
    }

    /// N from "last N months", "past quarter" (3) or "last year" (12),
    /// clamped to `1..=MAX_WINDOW_MONTHS`.
    pub fn extract_relative_months(&self, question: &str) -> Option<u32> {
        if let Some(caps) = self.relative_months.captures(question) {
            let raw = caps.get(1)?.as_str().to_lowercase();
            let n = if raw.chars().all(|c| c.is_ascii_digit()) {
                // Too many digits for u32 is still "a very long window".
                raw.parse::<u32>().unwrap_or(MAX_WINDOW_MONTHS)
            } else {
                NUMBER_WORDS
                    .iter()
                    .position(|w| *w == raw)
                    .map(|idx| idx as u32 + 1)?
            };
            return Some(clamp_window_months(n));
        }
        let caps = self.relative_period.captures(question)?;
        match caps.get(1)?.as_str().to_lowercase().as_str() {
            "quarter" => Some(3),
            _ => Some(12),
        }
    }

    /// Maps a question to exactly one request, or `UnrecognizedIntent`.
    pub fn resolve(&self, question: &str, ctx: &ResolverContext) -> Result<MetricRequest> {
        let kind = classify(question)
            .ok_or_else(|| CopilotError::UnrecognizedIntent(question.trim().to_string()))?;

        let (start, end) = self.resolve_window(question, kind, ctx)?;

        let request = match kind {
            MetricKind::Opex => {
                let category = extract_category(question, &ctx.opex_categories);
                let breakdown = category.is_some() || wants_breakdown(question);
                MetricRequest::new(kind, start, end)
                    .with_category(category)
                    .with_breakdown(breakdown)
            }
            MetricKind::CashRunway => MetricRequest::new(kind, end, end),
            _ => MetricRequest::new(kind, start, end),
        };

        debug!(
            "Resolved '{}' to {:?} {}..{} category={:?}",
            question.trim(),
            request.kind(),
            request.start().format("%Y-%m"),
            request.end().format("%Y-%m"),
            request.category()
        );
        Ok(request)
    }

    fn resolve_window(&self, question: &str, kind: MetricKind, ctx: &ResolverContext) -> Result<(NaiveDate, NaiveDate)> {
        let explicit = self.extract_months(question);
        let relative = self.extract_relative_months(question).or_else(|| {
            let is_trend = question.to_lowercase().contains("trend");
            (kind == MetricKind::GrossMargin && is_trend).then_some(ctx.trend_months.max(1))
        });

        if let [first, second, ..] = explicit.as_slice() {
            return Ok((*first.min(second), *first.max(second)));
        }

        let end = match explicit.first() {
            Some(month) => *month,
            None => ctx
                .latest_month
                .ok_or_else(|| CopilotError::NoData("no months loaded to resolve a time window".to_string()))?,
        };

        let start = match relative {
            Some(n) => window_start(end, n),
            None => end,
        };
        Ok((start, end))
    }
}
