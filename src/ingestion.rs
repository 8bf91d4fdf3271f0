//! Raw CSV reading and schema normalization.
//!
//! Source files arrive with unknown column names. Each role (month, amount,
//! account, currency, entity) is resolved through an ordered fallback chain:
//! named-column match, then a type-based heuristic, then a default. Every
//! step is a separate function so it can be tested on its own.

use crate::error::{CopilotError, Result};
use crate::schema::{CanonicalRow, CanonicalTable, TableKind, BASE_CURRENCY, UNCLASSIFIED_ACCOUNT};
use crate::utils::{first_of_month, parse_lenient_date};
use csv::{ReaderBuilder, Trim};
use log::debug;
use std::io::Read;
use std::path::Path;

pub const MONTH_COLUMNS: &[&str] = &["month", "date", "period"];
pub const AMOUNT_COLUMNS: &[&str] = &["amount", "amount_usd", "value", "usd", "total"];
pub const ACCOUNT_COLUMNS: &[&str] = &[
    "account_category",
    "account",
    "account category",
    "category",
    "line_item",
    "line item",
    "acct",
    "name",
    "account name",
    "gl account",
    "gl_account",
];
pub const CURRENCY_COLUMNS: &[&str] = &["currency", "curr", "ccy"];
pub const ENTITY_COLUMNS: &[&str] = &["entity", "company"];

/// Share of rows that must coerce to a number for a column to count as numeric.
pub const NUMERIC_COLUMN_THRESHOLD: f64 = 0.9;

/// A table exactly as read: trimmed headers and string cells.
#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let headers = headers.into_iter().map(|h| h.trim().to_string()).collect();
        Self { headers, rows }
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);

        // Byte records so a badly encoded cell costs only that cell, not the table.
        let headers = rdr.byte_headers()?.iter().map(decode_cell).collect();
        let mut rows = Vec::new();
        let mut lossy = 0usize;
        for result in rdr.byte_records() {
            let record = result?;
            if std::str::from_utf8(record.as_slice()).is_err() {
                lossy += 1;
            }
            rows.push(record.iter().map(decode_cell).collect());
        }
        if lossy > 0 {
            debug!("{} rows contained invalid UTF-8; bad bytes were replaced", lossy);
        }

        Ok(Self::new(headers, rows))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .map(|s| s.trim())
            .unwrap_or("")
    }

    pub fn column(&self, column: usize) -> impl Iterator<Item = &str> + '_ {
        (0..self.rows.len()).map(move |row| self.cell(row, column))
    }
}

fn decode_cell(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// Parses an amount cell. Accepts `$`, thousands separators and
/// accounting negatives such as `(1,234.50)`.
pub fn parse_amount(cell: &str) -> Option<f64> {
    let mut text = cell.trim();
    if text.is_empty() {
        return None;
    }

    let negative = text.starts_with('(') && text.ends_with(')');
    if negative {
        text = &text[1..text.len() - 1];
    }

    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    Some(if negative { -value } else { value })
}

/// First header matching a candidate, in candidate order, ignoring case.
pub fn find_named_column(raw: &RawTable, candidates: &[&str]) -> Option<usize> {
    candidates.iter().find_map(|cand| {
        raw.headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(cand))
    })
}

fn is_date_column(raw: &RawTable, column: usize) -> bool {
    let mut seen = false;
    for cell in raw.column(column).filter(|c| !c.is_empty()) {
        if parse_lenient_date(cell).is_none() {
            return false;
        }
        seen = true;
    }
    seen
}

fn numeric_share(raw: &RawTable, column: usize) -> f64 {
    if raw.rows.is_empty() {
        return 0.0;
    }
    let numeric = raw.column(column).filter(|c| parse_amount(c).is_some()).count();
    numeric as f64 / raw.rows.len() as f64
}

fn is_string_column(raw: &RawTable, column: usize) -> bool {
    let mut non_empty = raw.column(column).filter(|c| !c.is_empty()).peekable();
    if non_empty.peek().is_none() {
        return false;
    }
    numeric_share(raw, column) < NUMERIC_COLUMN_THRESHOLD && !is_date_column(raw, column)
}

/// Month column: a named candidate, else the first column whose every
/// non-empty value parses as a date.
pub fn detect_month_column(raw: &RawTable, candidates: &[&str]) -> Option<usize> {
    if let Some(idx) = find_named_column(raw, candidates) {
        return Some(idx);
    }
    (0..raw.headers.len()).find(|&idx| is_date_column(raw, idx))
}

/// Amount column: a named candidate, else the first column (outside
/// `exclude`) that coerces to a number on at least 90% of rows.
pub fn detect_amount_column(raw: &RawTable, candidates: &[&str], exclude: &[usize]) -> Option<usize> {
    if let Some(idx) = find_named_column(raw, candidates).filter(|idx| !exclude.contains(idx)) {
        return Some(idx);
    }
    (0..raw.headers.len())
        .filter(|idx| !exclude.contains(idx))
        .find(|&idx| numeric_share(raw, idx) >= NUMERIC_COLUMN_THRESHOLD)
}

/// Account column: a named candidate, then any header mentioning
/// "account", then the first remaining string-typed column.
pub fn detect_account_column(raw: &RawTable, exclude: &[usize]) -> Option<usize> {
    if let Some(idx) = find_named_column(raw, ACCOUNT_COLUMNS).filter(|idx| !exclude.contains(idx)) {
        return Some(idx);
    }
    if let Some(idx) = raw
        .headers
        .iter()
        .enumerate()
        .find(|(idx, h)| !exclude.contains(idx) && h.to_lowercase().contains("account"))
        .map(|(idx, _)| idx)
    {
        return Some(idx);
    }
    (0..raw.headers.len())
        .filter(|idx| !exclude.contains(idx))
        .find(|&idx| is_string_column(raw, idx))
}

/// Column roles resolved for one raw table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    pub month: usize,
    pub amount: usize,
    pub account: Option<usize>,
    pub currency: Option<usize>,
    pub entity: Option<usize>,
}

impl ColumnMap {
    pub fn detect(raw: &RawTable, kind: TableKind) -> Result<Self> {
        Self::detect_with(raw, kind, AMOUNT_COLUMNS)
    }

    pub fn detect_with(raw: &RawTable, kind: TableKind, amount_candidates: &[&str]) -> Result<Self> {
        let month = detect_month_column(raw, MONTH_COLUMNS).ok_or_else(|| CopilotError::Schema {
            table: kind.to_string(),
            details: format!(
                "no month/date column found among headers {:?}",
                raw.headers
            ),
        })?;

        let amount = detect_amount_column(raw, amount_candidates, &[month]).ok_or_else(|| {
            CopilotError::Schema {
                table: kind.to_string(),
                details: format!("no numeric amount column found among headers {:?}", raw.headers),
            }
        })?;

        let currency = find_named_column(raw, CURRENCY_COLUMNS).filter(|idx| ![month, amount].contains(idx));
        let entity = find_named_column(raw, ENTITY_COLUMNS).filter(|idx| ![month, amount].contains(idx));

        let mut used = vec![month, amount];
        used.extend(currency);
        used.extend(entity);
        let account = detect_account_column(raw, &used);

        let map = Self {
            month,
            amount,
            account,
            currency,
            entity,
        };
        debug!(
            "{} columns: month={:?} amount={:?} account={:?} currency={:?} entity={:?}",
            kind,
            raw.headers.get(map.month),
            raw.headers.get(map.amount),
            map.account.and_then(|i| raw.headers.get(i)),
            map.currency.and_then(|i| raw.headers.get(i)),
            map.entity.and_then(|i| raw.headers.get(i)),
        );
        Ok(map)
    }
}

/// Normalizes a raw table into canonical rows, preserving row order.
/// Rows with an unparseable month or amount are dropped.
pub fn normalize_table(raw: &RawTable, kind: TableKind) -> Result<CanonicalTable> {
    let columns = ColumnMap::detect(raw, kind)?;
    Ok(normalize_with_columns(raw, kind, &columns))
}

pub fn normalize_with_columns(raw: &RawTable, kind: TableKind, columns: &ColumnMap) -> CanonicalTable {
    let mut rows = Vec::with_capacity(raw.rows.len());
    let mut dropped = 0usize;

    for idx in 0..raw.rows.len() {
        let month = parse_lenient_date(raw.cell(idx, columns.month)).map(first_of_month);
        let amount = parse_amount(raw.cell(idx, columns.amount));

        let (Some(month), Some(amount)) = (month, amount) else {
            dropped += 1;
            continue;
        };

        let account = columns
            .account
            .map(|c| raw.cell(idx, c))
            .filter(|s| !s.is_empty())
            .unwrap_or(UNCLASSIFIED_ACCOUNT)
            .to_string();

        let currency = columns
            .currency
            .map(|c| raw.cell(idx, c).to_uppercase())
            .filter(|s| !s.is_empty() && s != "NAN")
            .unwrap_or_else(|| BASE_CURRENCY.to_string());

        let entity = columns
            .entity
            .map(|c| raw.cell(idx, c))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string());

        rows.push(CanonicalRow {
            month,
            account,
            amount,
            currency,
            entity,
        });
    }

    if dropped > 0 {
        debug!("{}: dropped {} unparseable rows", kind, dropped);
    }

    CanonicalTable::new(kind, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn raw(csv: &str) -> RawTable {
        RawTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_invalid_utf8_cell_keeps_rows() {
        let mut bytes = b"month,account,amount,entity\n2023-01,Revenue,100,Acme\n".to_vec();
        bytes.extend_from_slice(b"2023-02,Revenue,200,S\xe3o Paulo\n");
        let table = RawTable::from_reader(bytes.as_slice()).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.cell(1, 3), "S\u{FFFD}o Paulo");

        let normalized = normalize_table(&table, TableKind::Actuals).unwrap();
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.rows[1].amount, 200.0);
        assert_eq!(normalized.rows[0].entity.as_deref(), Some("Acme"));
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount("1000"), Some(1000.0));
        assert_eq!(parse_amount(" $1,234.50 "), Some(1234.5));
        assert_eq!(parse_amount("(2,000)"), Some(-2000.0));
        assert_eq!(parse_amount("-15.5"), Some(-15.5));
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("NaN"), None);
    }

    #[test]
    fn test_named_columns_win() {
        let table = raw("Date,Account,Amount,Currency\n2023-01-15,Revenue,100,usd\n");
        let map = ColumnMap::detect(&table, TableKind::Actuals).unwrap();
        assert_eq!(map.month, 0);
        assert_eq!(map.account, Some(1));
        assert_eq!(map.amount, 2);
        assert_eq!(map.currency, Some(3));
        assert_eq!(map.entity, None);
    }

    #[test]
    fn test_account_category_preferred_over_account() {
        let table = raw("month,account,account_category,amount\n2023-01,4000,Revenue,10\n");
        assert_eq!(detect_account_column(&table, &[0, 3]), Some(2));
    }

    #[test]
    fn test_month_column_by_type() {
        let table = raw("label,when,figure\nRevenue,2023-01-10,5\nCOGS,2023-02-03,2\n");
        assert_eq!(detect_month_column(&table, MONTH_COLUMNS), Some(1));

        let no_dates = raw("label,figure\nRevenue,5\n");
        assert_eq!(detect_month_column(&no_dates, MONTH_COLUMNS), None);
    }

    #[test]
    fn test_month_column_disqualified_by_bad_cell() {
        let table = raw("a,b,figure\n2023-01-01,2023-01-01,1\nsoon,2023-02-01,2\n");
        assert_eq!(detect_month_column(&table, MONTH_COLUMNS), Some(1));
    }

    #[test]
    fn test_amount_column_by_numeric_share() {
        // 9 of 10 rows numeric in "figure"; "note" is mostly text
        let mut csv = String::from("month,note,figure\n");
        for i in 1..=9 {
            csv.push_str(&format!("2023-0{},x{},{}\n", i, i, i * 10));
        }
        csv.push_str("2023-10,x,oops\n");
        let table = raw(&csv);
        assert_eq!(detect_amount_column(&table, AMOUNT_COLUMNS, &[0]), Some(2));

        let normalized = normalize_table(&table, TableKind::Actuals).unwrap();
        assert_eq!(normalized.len(), 9);
        assert!(normalized.rows.iter().all(|r| r.account.starts_with('x')));
    }

    #[test]
    fn test_amount_column_below_threshold_rejected() {
        let table = raw("month,figure\n2023-01,1\n2023-02,two\n");
        assert_eq!(detect_amount_column(&table, AMOUNT_COLUMNS, &[0]), None);
        let err = normalize_table(&table, TableKind::Budget).unwrap_err();
        assert!(matches!(err, CopilotError::Schema { .. }));
    }

    #[test]
    fn test_missing_month_is_schema_error() {
        let table = raw("account,amount\nRevenue,10\n");
        let err = normalize_table(&table, TableKind::Actuals).unwrap_err();
        match err {
            CopilotError::Schema { table, .. } => assert_eq!(table, "actuals"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_defaults_for_account_and_currency() {
        let table = raw("month,amount\n2023-03-31,1500000\n2023-04-30,1400000\n");
        let normalized = normalize_table(&table, TableKind::Cash).unwrap();
        assert_eq!(normalized.len(), 2);
        let first = &normalized.rows[0];
        assert_eq!(first.month, NaiveDate::from_ymd_opt(2023, 3, 1).unwrap());
        assert_eq!(first.account, UNCLASSIFIED_ACCOUNT);
        assert_eq!(first.currency, "USD");
    }

    #[test]
    fn test_rows_keep_order_and_duplicates() {
        let table = raw(
            "month,account,amount,currency,entity\n\
             2023-01-05,Revenue,100,eur,EU\n\
             bad,Revenue,1,USD,US\n\
             2023-01-20,Revenue,100,,EU\n\
             2023-01-20,Revenue,abc,USD,EU\n",
        );
        let normalized = normalize_table(&table, TableKind::Actuals).unwrap();
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.rows[0].currency, "EUR");
        assert_eq!(normalized.rows[1].currency, "USD");
        assert_eq!(normalized.rows[0].month, normalized.rows[1].month);
        assert_eq!(normalized.rows[0].entity.as_deref(), Some("EU"));
    }
}
