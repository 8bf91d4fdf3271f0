use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CopilotError {
    #[error("Schema error in {table} table: {details}")]
    Schema { table: String, details: String },

    #[error("Missing FX rate for {currency} in {}", .month.format("%Y-%m"))]
    MissingRate { month: NaiveDate, currency: String },

    #[error("Could not understand the question: {0}")]
    UnrecognizedIntent(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Could not find any of {candidates:?} in {dir}")]
    FileNotFound { dir: String, candidates: Vec<String> },

    #[error("No data available: {0}")]
    NoData(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CopilotError>;
