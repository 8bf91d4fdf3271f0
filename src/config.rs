use crate::utils::clamp_window_months;
use log::warn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "CFO_DATA_DIR";
pub const TREND_MONTHS_ENV: &str = "CFO_TREND_MONTHS";
pub const RUNWAY_LOOKBACK_ENV: &str = "CFO_RUNWAY_LOOKBACK";
pub const EXPORT_MONTHS_ENV: &str = "CFO_EXPORT_MONTHS";

pub const DEFAULT_DATA_DIR: &str = "fixtures";

/// Settings supplied by whatever hosts the copilot (UI control or env).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopilotConfig {
    /// Directory holding actuals.csv, budget.csv, fx.csv and cash.csv
    pub data_dir: PathBuf,
    /// Window for a margin "trend" question with no explicit range
    #[serde(default = "default_three")]
    pub trend_months: u32,
    /// Number of recent burns averaged for runway
    #[serde(default = "default_three")]
    pub runway_lookback_months: u32,
    /// Months of revenue history in the export pack
    #[serde(default = "default_export_months")]
    pub export_months: u32,
}

fn default_three() -> u32 {
    3
}

fn default_export_months() -> u32 {
    12
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            trend_months: default_three(),
            runway_lookback_months: default_three(),
            export_months: default_export_months(),
        }
    }
}

impl CopilotConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset or invalid values keep
    /// defaults and month counts are clamped to `1..=MAX_WINDOW_MONTHS`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let data_dir = lookup(DATA_DIR_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);

        Self {
            data_dir,
            trend_months: read_months(&lookup, TREND_MONTHS_ENV, defaults.trend_months),
            runway_lookback_months: read_months(&lookup, RUNWAY_LOOKBACK_ENV, defaults.runway_lookback_months),
            export_months: read_months(&lookup, EXPORT_MONTHS_ENV, defaults.export_months),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }
}

fn read_months<F>(lookup: &F, key: &str, default: u32) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(value) => clamp_window_months(value),
            Err(_) => {
                warn!("Ignoring {}={:?}: expected a whole number of months", key, raw);
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::MAX_WINDOW_MONTHS;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CopilotConfig::from_lookup(|_| None);
        assert_eq!(config, CopilotConfig::default());
        assert_eq!(config.data_dir, PathBuf::from("fixtures"));
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = CopilotConfig::from_lookup(lookup_from(&[
            (DATA_DIR_ENV, "/tmp/finance"),
            (TREND_MONTHS_ENV, "6"),
            (RUNWAY_LOOKBACK_ENV, "zero"),
            (EXPORT_MONTHS_ENV, "0"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/finance"));
        assert_eq!(config.trend_months, 6);
        assert_eq!(config.runway_lookback_months, 3);
        assert_eq!(config.export_months, 1);
    }

    #[test]
    fn test_oversized_month_counts_are_clamped() {
        let config = CopilotConfig::from_lookup(lookup_from(&[
            (TREND_MONTHS_ENV, "2147483648"),
            (EXPORT_MONTHS_ENV, "4294967295"),
            (RUNWAY_LOOKBACK_ENV, "99999999999"),
        ]));
        assert_eq!(config.trend_months, MAX_WINDOW_MONTHS);
        assert_eq!(config.export_months, MAX_WINDOW_MONTHS);
        assert_eq!(config.runway_lookback_months, 3);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: CopilotConfig = serde_json::from_str(r#"{"data_dir": "data"}"#).unwrap();
        assert_eq!(config.trend_months, 3);
        assert_eq!(config.export_months, 12);
    }
}
