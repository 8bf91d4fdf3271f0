use crate::error::{CopilotError, Result};
use crate::ingestion::{normalize_with_columns, ColumnMap, RawTable, AMOUNT_COLUMNS};
use crate::schema::{CanonicalRow, CanonicalTable, TableKind, BASE_CURRENCY};
use crate::utils::first_of_month;
use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const RATE_COLUMNS: &[&str] = &["rate_to_usd", "rate"];

/// Rates to USD keyed by (month, currency). USD is implicitly 1.0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FxTable {
    rates: BTreeMap<(NaiveDate, String), f64>,
}

impl FxTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later entries for the same (month, currency) replace earlier ones.
    /// Non-positive rates are ignored.
    pub fn insert(&mut self, month: NaiveDate, currency: &str, rate_to_usd: f64) {
        if !(rate_to_usd > 0.0) || !rate_to_usd.is_finite() {
            debug!(
                "Ignoring invalid FX rate {} for {} in {}",
                rate_to_usd,
                currency,
                month.format("%Y-%m")
            );
            return;
        }
        self.rates
            .insert((first_of_month(month), currency.trim().to_uppercase()), rate_to_usd);
    }

    pub fn from_raw(raw: &RawTable) -> Result<Self> {
        let mut amount_candidates = RATE_COLUMNS.to_vec();
        amount_candidates.extend_from_slice(AMOUNT_COLUMNS);
        let columns = ColumnMap::detect_with(raw, TableKind::Fx, &amount_candidates)?;

        let normalized = normalize_with_columns(raw, TableKind::Fx, &columns);
        let mut table = Self::new();
        for row in &normalized.rows {
            table.insert(row.month, &row.currency, row.amount);
        }
        debug!("Loaded {} FX rates", table.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Rate for an exact month. USD never consults the table.
    pub fn rate(&self, month: NaiveDate, currency: &str) -> Result<f64> {
        if currency.eq_ignore_ascii_case(BASE_CURRENCY) {
            return Ok(1.0);
        }
        let month = first_of_month(month);
        self.rates
            .get(&(month, currency.to_uppercase()))
            .copied()
            .ok_or_else(|| CopilotError::MissingRate {
                month,
                currency: currency.to_uppercase(),
            })
    }
}

/// A row dropped because no rate existed for its month and currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionWarning {
    pub table: TableKind,
    pub month: NaiveDate,
    pub currency: String,
    pub account: String,
    pub amount: f64,
}

impl std::fmt::Display for ConversionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: dropped '{}' ({} {}) in {}: no FX rate",
            self.table,
            self.account,
            self.amount,
            self.currency,
            self.month.format("%Y-%m")
        )
    }
}

pub fn convert_row(row: &CanonicalRow, fx: &FxTable) -> Result<CanonicalRow> {
    if row.is_base_currency() {
        return Ok(row.clone());
    }
    let rate = fx.rate(row.month, &row.currency)?;
    Ok(CanonicalRow {
        amount: row.amount * rate,
        currency: BASE_CURRENCY.to_string(),
        ..row.clone()
    })
}

/// Converts every row to USD. Rows without a rate are dropped and reported;
/// the rest of the table still converts.
pub fn convert_table(table: &CanonicalTable, fx: &FxTable) -> (CanonicalTable, Vec<ConversionWarning>) {
    let mut rows = Vec::with_capacity(table.rows.len());
    let mut warnings = Vec::new();

    for row in &table.rows {
        match convert_row(row, fx) {
            Ok(converted) => rows.push(converted),
            Err(e) => {
                let warning = ConversionWarning {
                    table: table.kind,
                    month: row.month,
                    currency: row.currency.clone(),
                    account: row.account.clone(),
                    amount: row.amount,
                };
                warn!("{} ({})", warning, e);
                warnings.push(warning);
            }
        }
    }

    (CanonicalTable::new(table.kind, rows), warnings)
}
