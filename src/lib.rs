//! # CFO Copilot
//!
//! Answers monthly finance questions ("What was January 2023 revenue vs
//! budget?") from loosely-structured CSV tables.
//!
//! ## Core Concepts
//!
//! - **Canonical rows**: every source table is normalized to
//!   `{month, account, amount, currency, entity}` with months truncated to the
//!   first of the month, whatever the original column names were
//! - **USD conversion**: non-USD rows are converted with a per-month FX table;
//!   rows without a rate are dropped with a warning
//! - **Fixed metric set**: Revenue vs Budget, Gross Margin %, Opex, EBITDA
//!   (proxy) and Cash runway
//! - **Intent resolution**: keyword classification plus month-window and
//!   Opex-category extraction, with no language model involved
//! - **Results**: a narrative sentence plus chart-ready monthly series for an
//!   external renderer
//!
//! ## Example
//!
//! ```rust,ignore
//! use cfo_copilot::*;
//!
//! let store = DataStore::from_directory("fixtures")?;
//! let result = store.answer("What was January 2023 revenue vs budget?")?;
//! println!("{}", result.narrative);
//! ```

pub mod config;
pub mod currency;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod intent;
pub mod report;
pub mod schema;
pub mod store;
pub mod utils;

pub use config::CopilotConfig;
pub use currency::{convert_row, convert_table, ConversionWarning, FxTable};
pub use engine::{
    AccountBucket, EbitdaSummary, MarginSummary, MetricEngine, MetricOutput, OpexSummary, RevenueSummary, RunwayOutcome,
};
pub use error::{CopilotError, Result};
pub use ingestion::{normalize_table, ColumnMap, RawTable};
pub use intent::{classify, IntentResolver, ResolverContext};
pub use report::{package, ExportPack};
pub use schema::*;
pub use store::{DataStore, LoadIssue, Response, Session, HELP_TEXT};
pub use utils::{first_of_month, parse_lenient_date, parse_month, window_start, MAX_WINDOW_MONTHS};
