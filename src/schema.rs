use crate::utils::first_of_month;
use chrono::NaiveDate;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const BASE_CURRENCY: &str = "USD";
pub const UNCLASSIFIED_ACCOUNT: &str = "Unclassified";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    Actuals,
    Budget,
    Fx,
    Cash,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind::Actuals,
        TableKind::Budget,
        TableKind::Fx,
        TableKind::Cash,
    ];

    pub fn file_stem(&self) -> &'static str {
        match self {
            TableKind::Actuals => "actuals",
            TableKind::Budget => "budget",
            TableKind::Fx => "fx",
            TableKind::Cash => "cash",
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_stem())
    }
}

/// One normalized row. `month` is always the first of its calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub month: NaiveDate,
    /// Possibly hierarchical, e.g. "Opex:Marketing"
    pub account: String,
    pub amount: f64,
    pub currency: String,
    pub entity: Option<String>,
}

impl CanonicalRow {
    pub fn new(month: NaiveDate, account: impl Into<String>, amount: f64) -> Self {
        Self {
            month: first_of_month(month),
            account: account.into(),
            amount,
            currency: BASE_CURRENCY.to_string(),
            entity: None,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    pub fn is_base_currency(&self) -> bool {
        self.currency.eq_ignore_ascii_case(BASE_CURRENCY)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalTable {
    pub kind: TableKind,
    pub rows: Vec<CanonicalRow>,
}

impl CanonicalTable {
    pub fn new(kind: TableKind, rows: Vec<CanonicalRow>) -> Self {
        Self { kind, rows }
    }

    pub fn empty(kind: TableKind) -> Self {
        Self::new(kind, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Distinct months present, ascending.
    pub fn months(&self) -> Vec<NaiveDate> {
        let mut months: Vec<NaiveDate> = self.rows.iter().map(|r| r.month).collect();
        months.sort();
        months.dedup();
        months
    }

    pub fn latest_month(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.month).max()
    }

    pub fn earliest_month(&self) -> Option<NaiveDate> {
        self.rows.iter().map(|r| r.month).min()
    }
}

/// The USD-denominated tables a session answers questions against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinanceTables {
    pub actuals: CanonicalTable,
    pub budget: CanonicalTable,
    pub cash: CanonicalTable,
}

impl FinanceTables {
    pub fn new(actuals: Vec<CanonicalRow>, budget: Vec<CanonicalRow>, cash: Vec<CanonicalRow>) -> Self {
        Self {
            actuals: CanonicalTable::new(TableKind::Actuals, actuals),
            budget: CanonicalTable::new(TableKind::Budget, budget),
            cash: CanonicalTable::new(TableKind::Cash, cash),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }

    pub fn latest_month(&self) -> Option<NaiveDate> {
        [&self.actuals, &self.budget, &self.cash]
            .iter()
            .filter_map(|t| t.latest_month())
            .max()
    }

    pub fn earliest_month(&self) -> Option<NaiveDate> {
        [&self.actuals, &self.budget, &self.cash]
            .iter()
            .filter_map(|t| t.earliest_month())
            .min()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum MetricKind {
    #[schemars(description = "Revenue actual vs budget, in USD")]
    Revenue,

    #[schemars(description = "(Revenue - COGS) / Revenue, in percent")]
    GrossMargin,

    #[schemars(description = "Operating expenses (accounts prefixed 'Opex:'), in USD")]
    Opex,

    #[schemars(description = "Revenue - COGS - Opex; a proxy without D&A adjustments")]
    Ebitda,

    #[schemars(description = "Months of cash remaining at the recent average burn")]
    CashRunway,
}

impl MetricKind {
    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Revenue => "Revenue",
            MetricKind::GrossMargin => "Gross Margin %",
            MetricKind::Opex => "Opex",
            MetricKind::Ebitda => "EBITDA (proxy)",
            MetricKind::CashRunway => "Cash runway",
        }
    }

    pub fn unit(&self) -> Unit {
        match self {
            MetricKind::Revenue | MetricKind::Opex | MetricKind::Ebitda => Unit::Usd,
            MetricKind::GrossMargin => Unit::Percent,
            MetricKind::CashRunway => Unit::Months,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    Usd,
    Percent,
    Months,
}

/// A resolved question. Built by the intent resolver and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRequest {
    kind: MetricKind,
    start: NaiveDate,
    end: NaiveDate,
    category: Option<String>,
    breakdown: bool,
}

impl MetricRequest {
    pub(crate) fn new(kind: MetricKind, start: NaiveDate, end: NaiveDate) -> Self {
        let (start, end) = (first_of_month(start), first_of_month(end));
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        Self {
            kind,
            start,
            end,
            category: None,
            breakdown: false,
        }
    }

    pub(crate) fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub(crate) fn with_breakdown(mut self, breakdown: bool) -> Self {
        self.breakdown = breakdown;
        self
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn breakdown(&self) -> bool {
        self.breakdown
    }

    pub fn is_single_month(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "status", content = "months", rename_all = "snake_case")]
pub enum RunwayValue {
    Months(f64),
    /// Burn is zero, so cash never runs out at the current rate.
    Infinite,
    /// Not enough data to estimate a burn rate.
    Unavailable,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BurnMethod {
    #[schemars(description = "Average month-over-month decrease in the cash balance")]
    CashDelta,

    #[schemars(description = "Average negative EBITDA, used when cash history has a single observation")]
    Ebitda,

    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricValue {
    ActualVsBudget {
        actual: f64,
        budget: f64,
        variance: f64,
        #[schemars(description = "Variance as a fraction of budget; null when budget is zero")]
        variance_pct: Option<f64>,
    },
    Amount {
        usd: f64,
    },
    Percent {
        #[schemars(description = "Percentage points; null when undefined (zero revenue)")]
        value: Option<f64>,
    },
    Runway {
        runway: RunwayValue,
        latest_cash: f64,
        avg_monthly_burn: f64,
        method: BurnMethod,
        as_of: Option<NaiveDate>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct SeriesPoint {
    pub month: NaiveDate,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Series {
    pub name: String,
    pub points: Vec<SeriesPoint>,
}

impl Series {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: Vec::new(),
        }
    }

    pub fn push(&mut self, month: NaiveDate, value: Option<f64>) {
        self.points.push(SeriesPoint { month, value });
    }

    pub fn value_at(&self, month: NaiveDate) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.month == month)
            .and_then(|p| p.value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CategoryAmount {
    pub category: String,
    pub amount: f64,
}

/// What the external renderer receives for one question.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MetricResult {
    pub kind: MetricKind,
    #[schemars(description = "First month of the resolved window (first-of-month date)")]
    pub start: NaiveDate,
    #[schemars(description = "Last month of the resolved window, inclusive")]
    pub end: NaiveDate,
    pub unit: Unit,
    pub value: MetricValue,
    #[schemars(description = "Templated sentence describing the result")]
    pub narrative: String,
    #[schemars(description = "Chart-ready monthly series, ordered by month")]
    pub series: Vec<Series>,
    #[serde(default)]
    #[schemars(description = "Per-category totals over the window (Opex only)")]
    pub breakdown: Vec<CategoryAmount>,
}

impl MetricResult {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(MetricResult)
    }

    pub fn schema_as_json() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn series_named(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    pub fn breakdown_total(&self) -> f64 {
        self.breakdown.iter().map(|c| c.amount).sum()
    }
}
