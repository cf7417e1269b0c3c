//! Statistics pagination engine
//!
//! A [`StatisticProvider`] wraps a concrete [`StatisticSource`] and
//! enforces the paging contract: options are normalized before the
//! source runs and every result field is populated afterwards,
//! regardless of what the source supplied.

mod provider;

pub use provider::{StatisticProvider, StatisticSource};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::strings;

/// Default page size when the caller supplied no limit.
pub const DEFAULT_LIMIT: u64 = 25;

/// Provider-specific filter parameters, keyed by normalized name.
pub type StatisticParameters = HashMap<String, serde_json::Value>;

/// A single result row: an open string-keyed mapping.
pub type StatisticRow = serde_json::Map<String, serde_json::Value>;

/// Caller-supplied options for a load call.
///
/// All fields are optional; [`StatisticProvider::load`] coerces them
/// into a [`LoadOptions`] instead of rejecting bad input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatisticOptions {
    /// Zero-based offset. Absent or negative values become 0.
    pub offset: Option<i64>,
    /// Page size. Absent defaults to 25; values below 1 mean "no limit".
    pub limit: Option<i64>,
    /// Filter parameters, passed through to the source.
    #[serde(default)]
    pub parameters: StatisticParameters,
}

/// A normalized page limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// At most this many rows.
    Rows(u64),
    /// No limit was requested.
    Unbounded,
}

impl Limit {
    /// The row bound, if any.
    pub fn rows(&self) -> Option<u64> {
        match self {
            Limit::Rows(n) => Some(*n),
            Limit::Unbounded => None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Limit::Unbounded)
    }
}

/// Normalized options handed to a [`StatisticSource`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoadOptions {
    pub offset: u64,
    pub limit: Limit,
    pub parameters: StatisticParameters,
}

impl LoadOptions {
    /// Normalize caller options into the form sources consume.
    ///
    /// Resolution order for `offset`: absent resolves to the default 0
    /// first, then negatives clamp to 0. For `limit`: absent resolves
    /// to 25 first, then values below 1 become [`Limit::Unbounded`].
    /// Parameter keys are trimmed and lowercased; keys that normalize
    /// to the empty string are dropped.
    pub fn normalize(options: StatisticOptions) -> Self {
        let offset = options.offset.unwrap_or(0).max(0) as u64;

        let limit = match options.limit.unwrap_or(DEFAULT_LIMIT as i64) {
            n if n < 1 => Limit::Unbounded,
            n => Limit::Rows(n as u64),
        };

        let parameters = options
            .parameters
            .into_iter()
            .filter_map(|(key, value)| {
                let key = strings::normalize(&key);
                (!key.is_empty()).then_some((key, value))
            })
            .collect();

        Self {
            offset,
            limit,
            parameters,
        }
    }
}

/// A partially-filled page as produced by a [`StatisticSource`].
///
/// Only `rows` is mandatory; the engine back-fills the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatisticPage {
    pub rows: Vec<StatisticRow>,
    pub offset: Option<u64>,
    pub total_count: Option<u64>,
    pub has_more: Option<bool>,
}

/// The fully-populated result of a load call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticResult {
    /// Result rows, in source-defined order.
    pub rows: Vec<StatisticRow>,
    /// The normalized offset the page was loaded at.
    pub offset: u64,
    /// Total rows available across all pages.
    pub total_count: u64,
    /// Whether increasing the offset would likely return more rows.
    pub has_more: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(offset: Option<i64>, limit: Option<i64>) -> StatisticOptions {
        StatisticOptions {
            offset,
            limit,
            parameters: StatisticParameters::new(),
        }
    }

    #[test]
    fn normalizes_valid_offset() {
        for o in [0, 1, 10, 5000] {
            let normalized = LoadOptions::normalize(options(Some(o), None));
            assert_eq!(normalized.offset, o as u64);
        }
    }

    #[test]
    fn defaults_missing_offset() {
        let normalized = LoadOptions::normalize(options(None, None));
        assert_eq!(normalized.offset, 0);
    }

    #[test]
    fn normalizes_negative_offset_to_zero() {
        for o in [-1, -25, i64::MIN] {
            let normalized = LoadOptions::normalize(options(Some(o), None));
            assert_eq!(normalized.offset, 0);
        }
    }

    #[test]
    fn normalizes_valid_limit() {
        for l in [1, 5, 25, 100] {
            let normalized = LoadOptions::normalize(options(None, Some(l)));
            assert_eq!(normalized.limit, Limit::Rows(l as u64));
        }
    }

    #[test]
    fn defaults_missing_limit() {
        let normalized = LoadOptions::normalize(options(None, None));
        assert_eq!(normalized.limit, Limit::Rows(DEFAULT_LIMIT));
    }

    #[test]
    fn limit_below_one_means_unbounded() {
        for l in [0, -1, -100] {
            let normalized = LoadOptions::normalize(options(None, Some(l)));
            assert_eq!(normalized.limit, Limit::Unbounded);
        }
    }

    #[test]
    fn normalizes_parameter_keys() {
        let mut parameters = StatisticParameters::new();
        parameters.insert(" Region ".to_string(), json!("emea"));
        parameters.insert("YEAR".to_string(), json!(2024));
        parameters.insert("   ".to_string(), json!("dropped"));

        let normalized = LoadOptions::normalize(StatisticOptions {
            offset: None,
            limit: None,
            parameters,
        });

        assert_eq!(normalized.parameters.len(), 2);
        assert_eq!(normalized.parameters["region"], json!("emea"));
        assert_eq!(normalized.parameters["year"], json!(2024));
    }

    #[test]
    fn result_serializes_camel_case() {
        let result = StatisticResult {
            rows: vec![],
            offset: 10,
            total_count: 42,
            has_more: true,
        };

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"rows": [], "offset": 10, "totalCount": 42, "hasMore": true})
        );
    }
}
