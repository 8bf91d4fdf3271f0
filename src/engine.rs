use crate::schema::{
    BurnMethod, CanonicalRow, CanonicalTable, CategoryAmount, FinanceTables, MetricKind, MetricRequest,
    RunwayValue,
};
use crate::utils::months_in_range;
use chrono::NaiveDate;
use log::debug;
use std::collections::BTreeMap;

pub const DEFAULT_RUNWAY_LOOKBACK: usize = 3;

const OPEX_PREFIX: &str = "opex:";

/// Account groupings the formulas are built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountBucket {
    Revenue,
    Cogs,
    Opex,
}

impl AccountBucket {
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            AccountBucket::Revenue => &["revenue", "sales", "turnover"],
            AccountBucket::Cogs => &["cogs", "cost of goods", "cost of sales"],
            AccountBucket::Opex => &[OPEX_PREFIX],
        }
    }

    /// Case-insensitive exact or prefix match on the account label.
    pub fn matches(&self, account: &str) -> bool {
        let label = account.trim().to_lowercase();
        self.aliases().iter().any(|alias| label.starts_with(alias))
    }
}

/// Category suffix of an Opex label: "Opex:Marketing" -> "Marketing".
pub fn opex_category(account: &str) -> Option<String> {
    if !AccountBucket::Opex.matches(account) {
        return None;
    }
    let suffix = account.trim().get(OPEX_PREFIX.len()..).unwrap_or("").trim();
    Some(if suffix.is_empty() {
        "Other".to_string()
    } else {
        suffix.to_string()
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RevenueMonth {
    pub month: NaiveDate,
    pub actual: f64,
    pub budget: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginMonth {
    pub month: NaiveDate,
    pub revenue: f64,
    pub cogs: f64,
    /// `None` when revenue is zero.
    pub margin: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AmountMonth {
    pub month: NaiveDate,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EbitdaMonth {
    pub month: NaiveDate,
    pub revenue: f64,
    pub cogs: f64,
    pub opex: f64,
    pub ebitda: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunwayOutcome {
    pub as_of: Option<NaiveDate>,
    pub latest_cash: f64,
    pub avg_monthly_burn: f64,
    pub method: BurnMethod,
    /// Burns that fed the average, oldest first.
    pub burns: Vec<AmountMonth>,
    /// Cash balances at or before `as_of`, ascending.
    pub balances: Vec<AmountMonth>,
    pub runway: RunwayValue,
}

/// Revenue over a window with its totals against budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RevenueSummary {
    pub months: Vec<RevenueMonth>,
    pub actual: f64,
    pub budget: f64,
    pub variance: f64,
    /// `None` when the budget total is zero.
    pub variance_pct: Option<f64>,
}

impl RevenueSummary {
    pub fn from_months(months: Vec<RevenueMonth>) -> Self {
        let actual: f64 = months.iter().map(|m| m.actual).sum();
        let budget: f64 = months.iter().map(|m| m.budget).sum();
        let variance = actual - budget;
        Self {
            months,
            actual,
            budget,
            variance,
            variance_pct: (budget != 0.0).then(|| variance / budget),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginSummary {
    pub months: Vec<MarginMonth>,
    pub revenue: f64,
    pub cogs: f64,
    /// Margin over the whole window; `None` when window revenue is zero.
    pub margin: Option<f64>,
    /// Most recent month with a defined margin.
    pub latest: Option<(NaiveDate, f64)>,
}

impl MarginSummary {
    pub fn from_months(months: Vec<MarginMonth>) -> Self {
        let revenue: f64 = months.iter().map(|m| m.revenue).sum();
        let cogs: f64 = months.iter().map(|m| m.cogs).sum();
        let latest = months
            .iter()
            .rev()
            .find_map(|m| m.margin.map(|r| (m.month, r)));
        Self {
            months,
            revenue,
            cogs,
            margin: margin_ratio(revenue, cogs),
            latest,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpexSummary {
    pub months: Vec<AmountMonth>,
    pub total: f64,
    pub breakdown: Vec<CategoryAmount>,
}

impl OpexSummary {
    pub fn new(months: Vec<AmountMonth>, breakdown: Vec<CategoryAmount>) -> Self {
        let total = months.iter().map(|m| m.amount).sum();
        Self {
            months,
            total,
            breakdown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EbitdaSummary {
    pub months: Vec<EbitdaMonth>,
    pub revenue: f64,
    pub cogs: f64,
    pub opex: f64,
    pub ebitda: f64,
}

impl EbitdaSummary {
    pub fn from_months(months: Vec<EbitdaMonth>) -> Self {
        Self {
            revenue: months.iter().map(|m| m.revenue).sum(),
            cogs: months.iter().map(|m| m.cogs).sum(),
            opex: months.iter().map(|m| m.opex).sum(),
            ebitda: months.iter().map(|m| m.ebitda).sum(),
            months,
        }
    }
}

/// Engine output for one request, before packaging.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutput {
    Revenue(RevenueSummary),
    GrossMargin(MarginSummary),
    Opex(OpexSummary),
    Ebitda(EbitdaSummary),
    CashRunway(RunwayOutcome),
}

impl MetricKind {
    /// Each metric's computation; adding a kind forces a new arm here.
    pub fn compute(&self, engine: &MetricEngine<'_>, request: &MetricRequest) -> MetricOutput {
        let (start, end) = (request.start(), request.end());
        match self {
            MetricKind::Revenue => MetricOutput::Revenue(RevenueSummary::from_months(engine.revenue_vs_budget(start, end))),
            MetricKind::GrossMargin => MetricOutput::GrossMargin(MarginSummary::from_months(engine.gross_margin(start, end))),
            MetricKind::Opex => MetricOutput::Opex(OpexSummary::new(
                engine.opex_by_month(start, end, request.category()),
                engine.opex_breakdown(start, end, request.category()),
            )),
            MetricKind::Ebitda => MetricOutput::Ebitda(EbitdaSummary::from_months(engine.ebitda(start, end))),
            MetricKind::CashRunway => MetricOutput::CashRunway(engine.cash_runway(end)),
        }
    }
}

/// Pure metric functions over USD-converted tables.
pub struct MetricEngine<'a> {
    tables: &'a FinanceTables,
    runway_lookback: usize,
}

impl<'a> MetricEngine<'a> {
    pub fn new(tables: &'a FinanceTables) -> Self {
        Self {
            tables,
            runway_lookback: DEFAULT_RUNWAY_LOOKBACK,
        }
    }

    pub fn with_runway_lookback(mut self, months: usize) -> Self {
        self.runway_lookback = months.max(1);
        self
    }

    pub fn compute(&self, request: &MetricRequest) -> MetricOutput {
        debug!(
            "Computing {:?} for {} to {}",
            request.kind(),
            request.start().format("%Y-%m"),
            request.end().format("%Y-%m")
        );
        request.kind().compute(self, request)
    }

    /// Sums rows matching `filter` by month, over `[start, end]`.
    fn monthly_sums<F>(table: &CanonicalTable, start: NaiveDate, end: NaiveDate, filter: F) -> BTreeMap<NaiveDate, f64>
    where
        F: Fn(&CanonicalRow) -> bool,
    {
        let mut sums: BTreeMap<NaiveDate, f64> = months_in_range(start, end)
            .into_iter()
            .map(|m| (m, 0.0))
            .collect();

        for row in table.rows.iter().filter(|r| r.month >= start && r.month <= end) {
            if filter(row) {
                *sums.entry(row.month).or_insert(0.0) += row.amount;
            }
        }

        sums
    }

    fn bucket_sums(table: &CanonicalTable, bucket: AccountBucket, start: NaiveDate, end: NaiveDate) -> BTreeMap<NaiveDate, f64> {
        Self::monthly_sums(table, start, end, |row| bucket.matches(&row.account))
    }

    pub fn revenue_vs_budget(&self, start: NaiveDate, end: NaiveDate) -> Vec<RevenueMonth> {
        let actual = Self::bucket_sums(&self.tables.actuals, AccountBucket::Revenue, start, end);
        let budget = Self::bucket_sums(&self.tables.budget, AccountBucket::Revenue, start, end);

        actual
            .into_iter()
            .map(|(month, actual)| RevenueMonth {
                month,
                actual,
                budget: budget.get(&month).copied().unwrap_or(0.0),
            })
            .collect()
    }

    pub fn gross_margin(&self, start: NaiveDate, end: NaiveDate) -> Vec<MarginMonth> {
        let revenue = Self::bucket_sums(&self.tables.actuals, AccountBucket::Revenue, start, end);
        let cogs = Self::bucket_sums(&self.tables.actuals, AccountBucket::Cogs, start, end);

        revenue
            .into_iter()
            .map(|(month, revenue)| {
                let cogs = cogs.get(&month).copied().unwrap_or(0.0);
                MarginMonth {
                    month,
                    revenue,
                    cogs,
                    margin: margin_ratio(revenue, cogs),
                }
            })
            .collect()
    }

    /// Monthly Opex totals, optionally narrowed to one category.
    pub fn opex_by_month(&self, start: NaiveDate, end: NaiveDate, category: Option<&str>) -> Vec<AmountMonth> {
        Self::monthly_sums(&self.tables.actuals, start, end, |row| {
            match (opex_category(&row.account), category) {
                (Some(found), Some(wanted)) => found.eq_ignore_ascii_case(wanted),
                (Some(_), None) => true,
                (None, _) => false,
            }
        })
        .into_iter()
        .map(|(month, amount)| AmountMonth { month, amount })
        .collect()
    }

    /// Opex totals per category over the window, largest first.
    pub fn opex_breakdown(&self, start: NaiveDate, end: NaiveDate, category: Option<&str>) -> Vec<CategoryAmount> {
        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        for row in self
            .tables
            .actuals
            .rows
            .iter()
            .filter(|r| r.month >= start && r.month <= end)
        {
            let Some(found) = opex_category(&row.account) else {
                continue;
            };
            if category.is_some_and(|wanted| !found.eq_ignore_ascii_case(wanted)) {
                continue;
            }
            *totals.entry(found).or_insert(0.0) += row.amount;
        }

        let mut breakdown: Vec<CategoryAmount> = totals
            .into_iter()
            .map(|(category, amount)| CategoryAmount { category, amount })
            .collect();
        breakdown.sort_by(|a, b| {
            b.amount
                .partial_cmp(&a.amount)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });
        breakdown
    }

    pub fn ebitda(&self, start: NaiveDate, end: NaiveDate) -> Vec<EbitdaMonth> {
        let revenue = Self::bucket_sums(&self.tables.actuals, AccountBucket::Revenue, start, end);
        let cogs = Self::bucket_sums(&self.tables.actuals, AccountBucket::Cogs, start, end);
        let opex = Self::bucket_sums(&self.tables.actuals, AccountBucket::Opex, start, end);

        revenue
            .into_iter()
            .map(|(month, revenue)| {
                let cogs = cogs.get(&month).copied().unwrap_or(0.0);
                let opex = opex.get(&month).copied().unwrap_or(0.0);
                EbitdaMonth {
                    month,
                    revenue,
                    cogs,
                    opex,
                    ebitda: revenue - cogs - opex,
                }
            })
            .collect()
    }

    /// Runway from cash balances at or before `as_of`.
    ///
    /// Burn for a month is `max(0, cash[m-1] - cash[m])` across consecutive
    /// observed months; the last `runway_lookback` burns are averaged. A
    /// single cash observation falls back to negative EBITDA over the last
    /// `runway_lookback` actuals months.
    pub fn cash_runway(&self, as_of: NaiveDate) -> RunwayOutcome {
        let mut by_month: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for row in self.tables.cash.rows.iter().filter(|r| r.month <= as_of) {
            *by_month.entry(row.month).or_insert(0.0) += row.amount;
        }
        let balances: Vec<AmountMonth> = by_month
            .iter()
            .map(|(month, amount)| AmountMonth {
                month: *month,
                amount: *amount,
            })
            .collect();

        let Some(latest) = balances.last().cloned() else {
            return RunwayOutcome {
                as_of: None,
                latest_cash: 0.0,
                avg_monthly_burn: 0.0,
                method: BurnMethod::None,
                burns: Vec::new(),
                balances,
                runway: RunwayValue::Unavailable,
            };
        };

        let mut burns: Vec<AmountMonth> = balances
            .windows(2)
            .map(|pair| AmountMonth {
                month: pair[1].month,
                amount: (pair[0].amount - pair[1].amount).max(0.0),
            })
            .collect();

        let method = if burns.is_empty() {
            burns = self.ebitda_burns(latest.month);
            if burns.is_empty() {
                BurnMethod::None
            } else {
                BurnMethod::Ebitda
            }
        } else {
            BurnMethod::CashDelta
        };

        let skip = burns.len().saturating_sub(self.runway_lookback);
        let burns: Vec<AmountMonth> = burns.into_iter().skip(skip).collect();

        let avg_monthly_burn = if burns.is_empty() {
            0.0
        } else {
            burns.iter().map(|b| b.amount).sum::<f64>() / burns.len() as f64
        };

        let runway = match method {
            BurnMethod::None => RunwayValue::Unavailable,
            _ if avg_monthly_burn > 0.0 => RunwayValue::Months((latest.amount / avg_monthly_burn).max(0.0)),
            _ => RunwayValue::Infinite,
        };

        RunwayOutcome {
            as_of: Some(latest.month),
            latest_cash: latest.amount,
            avg_monthly_burn,
            method,
            burns,
            balances,
            runway,
        }
    }

    fn ebitda_burns(&self, as_of: NaiveDate) -> Vec<AmountMonth> {
        let months: Vec<NaiveDate> = self
            .tables
            .actuals
            .months()
            .into_iter()
            .filter(|m| *m <= as_of)
            .collect();
        let (Some(first), Some(last)) = (months.first(), months.last()) else {
            return Vec::new();
        };

        self.ebitda(*first, *last)
            .into_iter()
            .filter(|m| months.contains(&m.month))
            .map(|m| AmountMonth {
                month: m.month,
                amount: (-m.ebitda).max(0.0),
            })
            .collect()
    }
}

/// `(revenue - cogs) / revenue`, undefined when revenue is zero.
pub fn margin_ratio(revenue: f64, cogs: f64) -> Option<f64> {
    if revenue == 0.0 {
        None
    } else {
        Some((revenue - cogs) / revenue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn month(y: i32, m: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, 1).unwrap()
    }

    fn cash_tables(balances: &[(NaiveDate, f64)]) -> FinanceTables {
        FinanceTables::new(
            vec![],
            vec![],
            balances
                .iter()
                .map(|(m, v)| CanonicalRow::new(*m, "Cash", *v))
                .collect(),
        )
    }

    #[test]
    fn test_bucket_matching() {
        assert!(AccountBucket::Revenue.matches("Revenue"));
        assert!(AccountBucket::Revenue.matches("revenue:Product"));
        assert!(AccountBucket::Revenue.matches("Sales"));
        assert!(!AccountBucket::Revenue.matches("Deferred Revenue"));
        assert!(AccountBucket::Cogs.matches("COGS"));
        assert!(AccountBucket::Cogs.matches("Cost of Sales"));
        assert!(!AccountBucket::Revenue.matches("Cost of Sales"));
        assert!(AccountBucket::Opex.matches("Opex:Marketing"));
        assert!(!AccountBucket::Opex.matches("Opex"));
        assert_eq!(opex_category("OPEX: Eng ").as_deref(), Some("Eng"));
        assert_eq!(opex_category("Opex:").as_deref(), Some("Other"));
        assert_eq!(opex_category("Revenue"), None);
    }

    #[test]
    fn test_gross_margin_with_zero_revenue_month() {
        let tables = FinanceTables::new(
            vec![
                CanonicalRow::new(month(2023, 1), "Revenue", 100_000.0),
                CanonicalRow::new(month(2023, 1), "COGS", 40_000.0),
                CanonicalRow::new(month(2023, 2), "COGS", 5_000.0),
            ],
            vec![],
            vec![],
        );
        let engine = MetricEngine::new(&tables);
        let margins = engine.gross_margin(month(2023, 1), month(2023, 2));
        assert_eq!(margins.len(), 2);
        assert!((margins[0].margin.unwrap() - 0.6).abs() < 1e-12);
        assert_eq!(margins[1].margin, None);
    }

    #[test]
    fn test_revenue_sums_duplicates_and_entities() {
        let tables = FinanceTables::new(
            vec![
                CanonicalRow::new(month(2023, 1), "Revenue", 60.0).with_entity("US"),
                CanonicalRow::new(month(2023, 1), "Revenue", 40.0).with_entity("EU"),
                CanonicalRow::new(month(2023, 2), "Revenue", 7.0),
            ],
            vec![CanonicalRow::new(month(2023, 1), "Revenue", 90.0)],
            vec![],
        );
        let engine = MetricEngine::new(&tables);
        let revenue = engine.revenue_vs_budget(month(2023, 1), month(2023, 1));
        assert_eq!(
            revenue,
            vec![RevenueMonth {
                month: month(2023, 1),
                actual: 100.0,
                budget: 90.0
            }]
        );
    }

    #[test]
    fn test_opex_breakdown_and_filter() {
        let tables = FinanceTables::new(
            vec![
                CanonicalRow::new(month(2023, 1), "Opex:Marketing", 5_000.0),
                CanonicalRow::new(month(2023, 1), "Opex:Eng", 3_000.0),
                CanonicalRow::new(month(2023, 1), "Revenue", 20_000.0),
                CanonicalRow::new(month(2023, 2), "Opex:Eng", 1_000.0),
            ],
            vec![],
            vec![],
        );
        let engine = MetricEngine::new(&tables);

        let breakdown = engine.opex_breakdown(month(2023, 1), month(2023, 1), None);
        assert_eq!(breakdown.len(), 2);
        assert_eq!(breakdown[0].category, "Marketing");
        assert_eq!(breakdown[1].amount, 3_000.0);

        let eng = engine.opex_by_month(month(2023, 1), month(2023, 2), Some("eng"));
        assert_eq!(eng[0].amount, 3_000.0);
        assert_eq!(eng[1].amount, 1_000.0);
    }

    #[test]
    fn test_window_summaries() {
        let tables = FinanceTables::new(
            vec![
                CanonicalRow::new(month(2023, 1), "Revenue", 100.0),
                CanonicalRow::new(month(2023, 1), "COGS", 40.0),
                CanonicalRow::new(month(2023, 2), "Revenue", 300.0),
                CanonicalRow::new(month(2023, 2), "COGS", 60.0),
                CanonicalRow::new(month(2023, 3), "COGS", 10.0),
            ],
            vec![CanonicalRow::new(month(2023, 1), "Revenue", 500.0)],
            vec![],
        );
        let engine = MetricEngine::new(&tables);

        let revenue = RevenueSummary::from_months(engine.revenue_vs_budget(month(2023, 1), month(2023, 2)));
        assert_eq!((revenue.actual, revenue.budget, revenue.variance), (400.0, 500.0, -100.0));
        assert_eq!(revenue.variance_pct, Some(-0.2));

        let margin = MarginSummary::from_months(engine.gross_margin(month(2023, 1), month(2023, 3)));
        assert_eq!((margin.revenue, margin.cogs), (400.0, 110.0));
        assert!((margin.margin.unwrap() - 290.0 / 400.0).abs() < 1e-12);
        // March has no revenue, so the latest defined margin is February's.
        assert_eq!(margin.latest, Some((month(2023, 2), 0.8)));

        let empty = RevenueSummary::from_months(engine.revenue_vs_budget(month(2023, 3), month(2023, 3)));
        assert_eq!(empty.variance_pct, None);
    }

    #[test]
    fn test_ebitda_proxy() {
        let tables = FinanceTables::new(
            vec![
                CanonicalRow::new(month(2023, 1), "Revenue", 100.0),
                CanonicalRow::new(month(2023, 1), "COGS", 30.0),
                CanonicalRow::new(month(2023, 1), "Opex:Admin", 50.0),
            ],
            vec![],
            vec![],
        );
        let ebitda = MetricEngine::new(&tables).ebitda(month(2023, 1), month(2023, 1));
        assert_eq!(ebitda[0].ebitda, 20.0);
    }

    #[test]
    fn test_runway_uses_last_three_burns() {
        let tables = cash_tables(&[
            (month(2023, 1), 1_000.0),
            (month(2023, 2), 900.0),
            (month(2023, 3), 700.0),
            (month(2023, 4), 750.0),
            (month(2023, 5), 600.0),
        ]);
        let outcome = MetricEngine::new(&tables).cash_runway(month(2023, 5));
        // burns: 200, 0, 150 -> avg 116.67
        assert_eq!(outcome.method, BurnMethod::CashDelta);
        assert_eq!(outcome.burns.len(), 3);
        assert!((outcome.avg_monthly_burn - 350.0 / 3.0).abs() < 1e-9);
        match outcome.runway {
            RunwayValue::Months(m) => assert!((m - 600.0 / (350.0 / 3.0)).abs() < 1e-9),
            other => panic!("expected finite runway, got {other:?}"),
        }
    }

    #[test]
    fn test_flat_cash_is_infinite() {
        let tables = cash_tables(&[
            (month(2023, 1), 500.0),
            (month(2023, 2), 500.0),
            (month(2023, 3), 800.0),
            (month(2023, 4), 800.0),
        ]);
        let outcome = MetricEngine::new(&tables).cash_runway(month(2023, 4));
        assert_eq!(outcome.runway, RunwayValue::Infinite);
        assert_eq!(outcome.avg_monthly_burn, 0.0);
    }

    #[test]
    fn test_single_delta_is_finite() {
        let tables = cash_tables(&[(month(2023, 1), 1_000.0), (month(2023, 2), 800.0)]);
        let outcome = MetricEngine::new(&tables).cash_runway(month(2023, 2));
        assert_eq!(outcome.burns.len(), 1);
        assert_eq!(outcome.runway, RunwayValue::Months(4.0));
    }

    #[test]
    fn test_single_balance_falls_back_to_ebitda() {
        let mut tables = cash_tables(&[(month(2023, 1), 1_200.0)]);
        tables.actuals = CanonicalTable::new(
            crate::schema::TableKind::Actuals,
            vec![
                CanonicalRow::new(month(2023, 1), "Revenue", 100.0),
                CanonicalRow::new(month(2023, 1), "Opex:Payroll", 400.0),
            ],
        );
        let outcome = MetricEngine::new(&tables).cash_runway(month(2023, 1));
        assert_eq!(outcome.method, BurnMethod::Ebitda);
        assert_eq!(outcome.runway, RunwayValue::Months(4.0));

        let empty = FinanceTables::empty();
        let outcome = MetricEngine::new(&empty).cash_runway(month(2023, 1));
        assert_eq!(outcome.runway, RunwayValue::Unavailable);
    }
}
