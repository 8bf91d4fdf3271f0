use crate::engine::{AmountMonth, MetricOutput, RunwayOutcome};
use crate::schema::{
    BurnMethod, CategoryAmount, MetricKind, MetricRequest, MetricResult, MetricValue, RunwayValue, Series,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Whole-dollar amount with thousands separators: `-$1,234`.
pub fn format_usd(amount: f64) -> String {
    let rounded = amount.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0.0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// "in January 2023" or "from Jan 2023 to Mar 2023".
pub fn describe_window(start: NaiveDate, end: NaiveDate) -> String {
    if start == end {
        format!("in {}", start.format("%B %Y"))
    } else {
        format!("from {} to {}", start.format("%b %Y"), end.format("%b %Y"))
    }
}

fn amount_series(name: &str, months: &[AmountMonth]) -> Series {
    let mut series = Series::new(name);
    for m in months {
        series.push(m.month, Some(m.amount));
    }
    series
}

/// Wraps engine output into the uniform result handed to renderers.
pub fn package(request: &MetricRequest, output: MetricOutput) -> MetricResult {
    let window = describe_window(request.start(), request.end());
    let kind = request.kind();

    let (value, narrative, series, breakdown) = match output {
        MetricOutput::Revenue(summary) => {
            let mut actual_series = Series::new("Actual");
            let mut budget_series = Series::new("Budget");
            for m in &summary.months {
                actual_series.push(m.month, Some(m.actual));
                budget_series.push(m.month, Some(m.budget));
            }

            let narrative = format!(
                "Revenue {}: Actual {} vs Budget {} (Variance {}, {}).",
                window,
                format_usd(summary.actual),
                format_usd(summary.budget),
                format_usd(summary.variance),
                summary
                    .variance_pct
                    .map(format_percent)
                    .unwrap_or_else(|| "n/a".to_string())
            );
            let value = MetricValue::ActualVsBudget {
                actual: summary.actual,
                budget: summary.budget,
                variance: summary.variance,
                variance_pct: summary.variance_pct,
            };
            (value, narrative, vec![actual_series, budget_series], Vec::new())
        }
        MetricOutput::GrossMargin(summary) => {
            let mut series = Series::new("Gross Margin %");
            for m in &summary.months {
                series.push(m.month, m.margin.map(|r| r * 100.0));
            }

            let mut narrative = match summary.margin {
                Some(ratio) => format!(
                    "Gross Margin % {}: {} (Revenue {}, COGS {}).",
                    window,
                    format_percent(ratio),
                    format_usd(summary.revenue),
                    format_usd(summary.cogs)
                ),
                None => format!("Gross Margin % {} is undefined: no revenue recorded.", window),
            };
            if let (false, Some((month, ratio))) = (request.is_single_month(), summary.latest) {
                narrative.push_str(&format!(
                    " Latest Gross Margin %: {} for {}.",
                    format_percent(ratio),
                    month.format("%b %Y")
                ));
            }

            let value = MetricValue::Percent {
                value: summary.margin.map(|r| r * 100.0),
            };
            (value, narrative, vec![series], Vec::new())
        }
        MetricOutput::Opex(summary) => {
            let label = match request.category() {
                Some(category) => format!("{} Opex", category),
                None => "Opex".to_string(),
            };

            let narrative = if summary.breakdown.is_empty() {
                format!("No {} data {}.", label, window)
            } else if request.breakdown() && request.category().is_none() {
                let parts: Vec<String> = summary
                    .breakdown
                    .iter()
                    .map(|c| format!("{} {}", c.category, format_usd(c.amount)))
                    .collect();
                format!(
                    "{} {}: {} across {} categories ({}).",
                    label,
                    window,
                    format_usd(summary.total),
                    summary.breakdown.len(),
                    parts.join(", ")
                )
            } else {
                format!("{} {}: {}.", label, window, format_usd(summary.total))
            };

            let series = vec![amount_series(&label, &summary.months)];
            let breakdown: Vec<CategoryAmount> = if request.breakdown() {
                summary.breakdown
            } else {
                Vec::new()
            };
            (MetricValue::Amount { usd: summary.total }, narrative, series, breakdown)
        }
        MetricOutput::Ebitda(summary) => {
            let mut series = Series::new("EBITDA");
            for m in &summary.months {
                series.push(m.month, Some(m.ebitda));
            }

            let narrative = format!(
                "EBITDA (proxy) {}: {} (Revenue {}, COGS {}, Opex {}).",
                window,
                format_usd(summary.ebitda),
                format_usd(summary.revenue),
                format_usd(summary.cogs),
                format_usd(summary.opex)
            );
            (MetricValue::Amount { usd: summary.ebitda }, narrative, vec![series], Vec::new())
        }
        MetricOutput::CashRunway(outcome) => {
            let narrative = runway_narrative(&outcome);
            let series = amount_series("Cash", &outcome.balances);
            let value = MetricValue::Runway {
                runway: outcome.runway,
                latest_cash: outcome.latest_cash,
                avg_monthly_burn: outcome.avg_monthly_burn,
                method: outcome.method,
                as_of: outcome.as_of,
            };
            (value, narrative, vec![series], Vec::new())
        }
    };

    MetricResult {
        kind,
        start: request.start(),
        end: request.end(),
        unit: kind.unit(),
        value,
        narrative,
        series,
        breakdown,
    }
}

fn runway_narrative(outcome: &RunwayOutcome) -> String {
    let as_of = outcome
        .as_of
        .map(|m| m.format("%b %Y").to_string())
        .unwrap_or_else(|| "n/a".to_string());
    let basis = match outcome.method {
        BurnMethod::Ebitda => " (burn estimated from EBITDA)",
        _ => "",
    };

    match outcome.runway {
        RunwayValue::Months(months) => format!(
            "Cash runway: {:.1} months based on last cash {} and avg monthly burn {}{}. (Cash as of {})",
            months,
            format_usd(outcome.latest_cash),
            format_usd(outcome.avg_monthly_burn),
            basis,
            as_of
        ),
        RunwayValue::Infinite => format!(
            "No burn detected; cash of {} is flat or growing, so runway is infinite. (Cash as of {})",
            format_usd(outcome.latest_cash),
            as_of
        ),
        RunwayValue::Unavailable => "Runway could not be computed due to missing data.".to_string(),
    }
}

/// Chart data for a printable pack; drawing happens outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPack {
    pub revenue_trend: MetricResult,
    pub opex_breakdown: MetricResult,
}

impl ExportPack {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn kinds(&self) -> [MetricKind; 2] {
        [self.revenue_trend.kind, self.opex_breakdown.kind]
    }
}
