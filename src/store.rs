use crate::config::CopilotConfig;
use crate::currency::{convert_table, ConversionWarning, FxTable};
use crate::engine::{opex_category, MetricEngine};
use crate::error::{CopilotError, Result};
use crate::ingestion::{normalize_table, RawTable};
use crate::intent::{IntentResolver, ResolverContext};
use crate::report::{package, ExportPack};
use crate::schema::{CanonicalTable, FinanceTables, MetricKind, MetricRequest, MetricResult, TableKind};
use crate::utils::window_start;
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const HELP_TEXT: &str =
    "I can help with: Revenue vs Budget, Gross Margin %, Opex breakdown, EBITDA, Cash runway.";

/// A source file that could not be loaded. Other files load independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadIssue {
    pub table: TableKind,
    pub message: String,
}

/// Finds `<stem>.csv` in `dir`, ignoring case.
pub fn resolve_table_file(dir: &Path, kind: TableKind) -> Result<PathBuf> {
    let wanted = format!("{}.csv", kind.file_stem());
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.eq_ignore_ascii_case(&wanted));
        if matches && path.is_file() {
            return Ok(path);
        }
    }
    Err(CopilotError::FileNotFound {
        dir: dir.display().to_string(),
        candidates: vec![wanted],
    })
}

/// The loaded, USD-converted tables for one data directory.
///
/// A store is never mutated after construction; selecting another directory
/// builds a new one.
#[derive(Debug, Clone)]
pub struct DataStore {
    data_dir: Option<PathBuf>,
    tables: FinanceTables,
    fx: FxTable,
    warnings: Vec<ConversionWarning>,
    issues: Vec<LoadIssue>,
}

impl DataStore {
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(CopilotError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("data directory {} does not exist", dir.display()),
            )));
        }

        let read = |kind: TableKind| resolve_table_file(dir, kind).and_then(|path| RawTable::from_path(&path));
        let store = Self::assemble(
            Some(dir.to_path_buf()),
            read(TableKind::Actuals),
            read(TableKind::Budget),
            read(TableKind::Fx),
            read(TableKind::Cash),
        );

        info!(
            "Loaded {}: {} actuals, {} budget, {} cash rows, {} FX rates ({} issues, {} dropped rows)",
            dir.display(),
            store.tables.actuals.len(),
            store.tables.budget.len(),
            store.tables.cash.len(),
            store.fx.len(),
            store.issues.len(),
            store.warnings.len()
        );
        Ok(store)
    }

    /// Builds a store from tables already in memory.
    pub fn from_raw_tables(actuals: RawTable, budget: RawTable, fx: RawTable, cash: RawTable) -> Self {
        Self::assemble(None, Ok(actuals), Ok(budget), Ok(fx), Ok(cash))
    }

    /// Builds a store from canonical rows that are already in USD.
    pub fn from_tables(tables: FinanceTables) -> Self {
        Self {
            data_dir: None,
            tables,
            fx: FxTable::new(),
            warnings: Vec::new(),
            issues: Vec::new(),
        }
    }

    fn assemble(
        data_dir: Option<PathBuf>,
        actuals: Result<RawTable>,
        budget: Result<RawTable>,
        fx: Result<RawTable>,
        cash: Result<RawTable>,
    ) -> Self {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let fx = match fx.and_then(|raw| FxTable::from_raw(&raw)) {
            Ok(fx) => fx,
            Err(e) => {
                warn!("FX table unavailable, only USD rows will load: {}", e);
                issues.push(LoadIssue {
                    table: TableKind::Fx,
                    message: e.to_string(),
                });
                FxTable::new()
            }
        };

        let actuals = load_table(TableKind::Actuals, actuals, &fx, &mut warnings, &mut issues);
        let budget = load_table(TableKind::Budget, budget, &fx, &mut warnings, &mut issues);
        let cash = load_table(TableKind::Cash, cash, &fx, &mut warnings, &mut issues);

        Self {
            data_dir,
            tables: FinanceTables {
                actuals,
                budget,
                cash,
            },
            fx,
            warnings,
            issues,
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    pub fn tables(&self) -> &FinanceTables {
        &self.tables
    }

    pub fn fx(&self) -> &FxTable {
        &self.fx
    }

    /// Rows dropped for lack of an FX rate.
    pub fn warnings(&self) -> &[ConversionWarning] {
        &self.warnings
    }

    /// Files that failed to load.
    pub fn issues(&self) -> &[LoadIssue] {
        &self.issues
    }

    pub fn latest_month(&self) -> Option<NaiveDate> {
        self.tables.latest_month()
    }

    /// Distinct Opex category suffixes in the actuals.
    pub fn opex_categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = Vec::new();
        for row in &self.tables.actuals.rows {
            if let Some(category) = opex_category(&row.account) {
                if !categories.iter().any(|c| c.eq_ignore_ascii_case(&category)) {
                    categories.push(category);
                }
            }
        }
        categories
    }

    pub fn resolver_context(&self, config: &CopilotConfig) -> ResolverContext {
        ResolverContext {
            latest_month: self.latest_month(),
            opex_categories: self.opex_categories(),
            trend_months: config.trend_months,
        }
    }

    /// Runs one request through the engine and packager. Nothing is cached.
    pub fn compute(&self, request: &MetricRequest, config: &CopilotConfig) -> MetricResult {
        let engine = MetricEngine::new(&self.tables).with_runway_lookback(config.runway_lookback_months as usize);
        package(request, engine.compute(request))
    }

    pub fn answer_with(&self, resolver: &IntentResolver, question: &str, config: &CopilotConfig) -> Result<MetricResult> {
        let request = resolver.resolve(question, &self.resolver_context(config))?;
        Ok(self.compute(&request, config))
    }

    pub fn answer(&self, question: &str) -> Result<MetricResult> {
        self.answer_with(&IntentResolver::new()?, question, &CopilotConfig::default())
    }

    /// Revenue trend over the last `months` months (clamped to
    /// `1..=MAX_WINDOW_MONTHS`) and the Opex breakdown of the latest month.
    pub fn export_pack(&self, months: u32, config: &CopilotConfig) -> Result<ExportPack> {
        let latest = self
            .latest_month()
            .ok_or_else(|| CopilotError::NoData("no months loaded for export".to_string()))?;
        let start = window_start(latest, months);

        let revenue = MetricRequest::new(MetricKind::Revenue, start, latest);
        let opex = MetricRequest::new(MetricKind::Opex, latest, latest).with_breakdown(true);

        Ok(ExportPack {
            revenue_trend: self.compute(&revenue, config),
            opex_breakdown: self.compute(&opex, config),
        })
    }
}

fn load_table(
    kind: TableKind,
    raw: Result<RawTable>,
    fx: &FxTable,
    warnings: &mut Vec<ConversionWarning>,
    issues: &mut Vec<LoadIssue>,
) -> CanonicalTable {
    match raw.and_then(|raw| normalize_table(&raw, kind)) {
        Ok(table) => {
            let (converted, dropped) = convert_table(&table, fx);
            debug!("{}: {} rows in USD, {} dropped", kind, converted.len(), dropped.len());
            warnings.extend(dropped);
            converted
        }
        Err(e) => {
            warn!("Failed to load {} table: {}", kind, e);
            issues.push(LoadIssue {
                table: kind,
                message: e.to_string(),
            });
            CanonicalTable::empty(kind)
        }
    }
}

/// What the host shows for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    pub result: Option<MetricResult>,
}

/// Per-user state: the configuration and the store for the selected directory.
pub struct Session {
    config: CopilotConfig,
    resolver: IntentResolver,
    store: Option<DataStore>,
    loaded_dir: Option<PathBuf>,
}

impl Session {
    pub fn new(config: CopilotConfig) -> Result<Self> {
        Ok(Self {
            config,
            resolver: IntentResolver::new()?,
            store: None,
            loaded_dir: None,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(CopilotConfig::from_env())
    }

    pub fn config(&self) -> &CopilotConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&DataStore> {
        self.store.as_ref()
    }

    pub fn set_data_dir(&mut self, dir: impl Into<PathBuf>) {
        self.config.data_dir = dir.into();
    }

    /// Loads `dir` and replaces the current store. On failure the previous
    /// store is kept.
    pub fn load(&mut self, dir: impl AsRef<Path>) -> Result<&DataStore> {
        let dir = dir.as_ref();
        let store = DataStore::from_directory(dir)?;
        if self.loaded_dir.as_deref().is_some_and(|prev| prev != dir) {
            info!("Replacing data loaded from {:?}", self.loaded_dir);
        }
        self.config.data_dir = dir.to_path_buf();
        self.loaded_dir = Some(dir.to_path_buf());
        Ok(&*self.store.insert(store))
    }

    /// Loads the configured directory when it changed or `force` is set.
    /// Safe to call on every UI rerun.
    pub fn ensure_loaded(&mut self, force: bool) -> Result<&DataStore> {
        let dir = self.config.data_dir.clone();
        let reuse = !force && self.store.is_some() && self.loaded_dir.as_deref() == Some(dir.as_path());
        if !reuse {
            self.load(&dir)?;
        }
        self.store
            .as_ref()
            .ok_or_else(|| CopilotError::NoData("data not loaded".to_string()))
    }

    pub fn answer(&self, question: &str) -> Result<MetricResult> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| CopilotError::NoData("data not loaded".to_string()))?;
        store.answer_with(&self.resolver, question, &self.config)
    }

    /// Like `answer`, but failures become user-facing text.
    pub fn respond(&self, question: &str) -> Response {
        if self.store.is_none() {
            return Response {
                text: "Data not loaded. Set a valid data directory.".to_string(),
                result: None,
            };
        }
        match self.answer(question) {
            Ok(result) => Response {
                text: result.narrative.clone(),
                result: Some(result),
            },
            Err(CopilotError::UnrecognizedIntent(_)) => Response {
                text: HELP_TEXT.to_string(),
                result: None,
            },
            Err(e) => Response {
                text: format!("Could not answer: {}", e),
                result: None,
            },
        }
    }

    pub fn export_pack(&self) -> Result<ExportPack> {
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| CopilotError::NoData("data not loaded".to_string()))?;
        store.export_pack(self.config.export_months, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CanonicalRow;

    fn raw(csv: &str) -> RawTable {
        RawTable::from_reader(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_from_raw_tables_converts_and_records_warnings() {
        let store = DataStore::from_raw_tables(
            raw("month,account,amount,currency\n2023-01,Revenue,100,EUR\n2023-02,Revenue,100,EUR\n2023-01,COGS,40,USD\n"),
            raw("month,account,amount\n2023-01,Revenue,90\n"),
            raw("month,currency,rate_to_usd\n2023-01,EUR,1.5\n"),
            raw("month,amount\n2023-01,1000\n"),
        );
        assert!(store.issues().is_empty());
        assert_eq!(store.tables().actuals.len(), 2);
        assert_eq!(store.warnings().len(), 1);
        assert_eq!(store.tables().actuals.rows[0].amount, 150.0);
    }

    #[test]
    fn test_schema_failure_is_isolated_per_table() {
        let store = DataStore::from_raw_tables(
            raw("month,account,amount\n2023-01,Revenue,100\n"),
            raw("account,amount\nRevenue,90\n"),
            raw("month,currency,rate_to_usd\n2023-01,EUR,1.5\n"),
            raw("month,amount\n2023-01,1000\n"),
        );
        assert_eq!(store.issues().len(), 1);
        assert_eq!(store.issues()[0].table, TableKind::Budget);
        assert_eq!(store.tables().actuals.len(), 1);
        assert!(store.tables().budget.is_empty());
    }

    #[test]
    fn test_opex_categories_are_distinct() {
        let jan = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let store = DataStore::from_tables(FinanceTables::new(
            vec![
                CanonicalRow::new(jan, "Opex:Marketing", 1.0),
                CanonicalRow::new(jan, "opex:marketing", 1.0),
                CanonicalRow::new(jan, "Opex:Eng", 1.0),
                CanonicalRow::new(jan, "Revenue", 1.0),
            ],
            vec![],
            vec![],
        ));
        assert_eq!(store.opex_categories(), vec!["Marketing".to_string(), "Eng".to_string()]);
    }

    #[test]
    fn test_export_pack_with_oversized_window() {
        let jan = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let store = DataStore::from_tables(FinanceTables::new(
            vec![CanonicalRow::new(jan, "Revenue", 10.0)],
            vec![],
            vec![],
        ));
        for months in [0, 2_147_483_648, u32::MAX] {
            let pack = store.export_pack(months, &CopilotConfig::default()).unwrap();
            assert_eq!(pack.revenue_trend.end, jan);
            assert!(pack.revenue_trend.start <= jan);
        }
        let pack = store.export_pack(0, &CopilotConfig::default()).unwrap();
        assert_eq!(pack.revenue_trend.start, jan);
    }

    #[test]
    fn test_respond_without_store() {
        let session = Session::new(CopilotConfig::default()).unwrap();
        let response = session.respond("revenue");
        assert!(response.result.is_none());
        assert!(response.text.contains("Data not loaded"));
    }
}
