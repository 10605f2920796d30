//! Validation reports

use crate::validation::sentinel::ErrorSentinel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag of the strategy that reads cached values without recalculating
pub const METHOD_CACHED_VALUES: &str = "cached_values";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    ErrorsFound,
    Error,
}

/// Occurrences of one sentinel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ErrorTally {
    pub count: usize,
    /// `Sheet!Cell` strings in scan order, duplicates kept
    pub locations: Vec<String>,
    /// Set when `locations` was cut short for display
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

/// Sentinel → tally
pub type ErrorSummary = BTreeMap<ErrorSentinel, ErrorTally>;

/// Immutable result of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    status: ReportStatus,
    total_errors: usize,
    total_formulas: usize,
    validation_method: String,
    error_summary: ErrorSummary,
    /// Why the workbook could not be read (status `error` only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ValidationReport {
    /// Build from a completed tally; status follows from the error count
    pub fn from_summary(
        total_formulas: usize,
        error_summary: ErrorSummary,
        method: impl Into<String>,
    ) -> Self {
        let total_errors = error_summary.values().map(|t| t.count).sum();
        let status = if total_errors == 0 {
            ReportStatus::Success
        } else {
            ReportStatus::ErrorsFound
        };
        Self {
            status,
            total_errors,
            total_formulas,
            validation_method: method.into(),
            error_summary,
            error: None,
        }
    }

    pub fn success(total_formulas: usize, method: impl Into<String>) -> Self {
        Self::from_summary(total_formulas, ErrorSummary::new(), method)
    }

    /// Report for a workbook that could not be read
    pub fn failed(message: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Error,
            total_errors: 0,
            total_formulas: 0,
            validation_method: method.into(),
            error_summary: ErrorSummary::new(),
            error: Some(message.into()),
        }
    }

    pub fn status(&self) -> ReportStatus {
        self.status
    }

    pub fn total_errors(&self) -> usize {
        self.total_errors
    }

    pub fn total_formulas(&self) -> usize {
        self.total_formulas
    }

    pub fn validation_method(&self) -> &str {
        &self.validation_method
    }

    pub fn error_summary(&self) -> &ErrorSummary {
        &self.error_summary
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_errors(&self) -> bool {
        self.total_errors > 0
    }

    /// Locations of one sentinel, or of all sentinels in summary order
    pub fn error_locations(&self, filter: Option<ErrorSentinel>) -> Vec<String> {
        self.error_summary
            .iter()
            .filter(|(sentinel, _)| filter.map_or(true, |f| f == **sentinel))
            .flat_map(|(_, tally)| tally.locations.iter().cloned())
            .collect()
    }

    /// Copy keeping at most `limit` locations per sentinel; counts are untouched
    pub fn truncated(&self, limit: usize) -> Self {
        let mut report = self.clone();
        for tally in report.error_summary.values_mut() {
            if tally.locations.len() > limit {
                tally.locations.truncate(limit);
                tally.truncated = true;
            }
        }
        report
    }

    /// One-line summary with the error rate
    pub fn summary(&self) -> String {
        match self.status {
            ReportStatus::Error => format!(
                "Validation could not run: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
            _ if self.has_errors() => {
                let rate = if self.total_formulas > 0 {
                    self.total_errors as f64 / self.total_formulas as f64 * 100.0
                } else {
                    0.0
                };
                format!(
                    "{} errors found in {} formulas ({:.1}% error rate)",
                    self.total_errors, self.total_formulas, rate
                )
            }
            _ => format!("All {} formulas validated successfully", self.total_formulas),
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            ReportStatus::Success => write!(
                f,
                "✅ Validation passed ({} formulas via {})",
                self.total_formulas, self.validation_method
            ),
            ReportStatus::ErrorsFound => {
                let counts: Vec<String> = self
                    .error_summary
                    .iter()
                    .map(|(sentinel, tally)| format!("{}: {}", sentinel, tally.count))
                    .collect();
                write!(
                    f,
                    "❌ Validation failed ({}) - {}",
                    self.validation_method,
                    counts.join(", ")
                )
            }
            ReportStatus::Error => write!(
                f,
                "❌ Validation error ({}) - {}",
                self.validation_method,
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> ValidationReport {
        let mut summary = ErrorSummary::new();
        summary.insert(
            ErrorSentinel::DivZero,
            ErrorTally {
                count: 3,
                locations: vec![
                    "Sheet1!B1".to_string(),
                    "Sheet1!B2".to_string(),
                    "Sheet2!C9".to_string(),
                ],
                truncated: false,
            },
        );
        summary.insert(
            ErrorSentinel::Ref,
            ErrorTally {
                count: 1,
                locations: vec!["Sheet2!A1".to_string()],
                truncated: false,
            },
        );
        ValidationReport::from_summary(10, summary, METHOD_CACHED_VALUES)
    }

    #[test]
    fn test_wire_shape() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            value,
            json!({
                "status": "errors_found",
                "total_errors": 4,
                "total_formulas": 10,
                "validation_method": "cached_values",
                "error_summary": {
                    "#DIV/0!": {"count": 3, "locations": ["Sheet1!B1", "Sheet1!B2", "Sheet2!C9"]},
                    "#REF!": {"count": 1, "locations": ["Sheet2!A1"]}
                }
            })
        );
    }

    #[test]
    fn test_success_report() {
        let report = ValidationReport::success(5, METHOD_CACHED_VALUES);
        assert_eq!(report.status(), ReportStatus::Success);
        assert!(!report.has_errors());
        assert_eq!(report.summary(), "All 5 formulas validated successfully");
        assert!(report.to_string().contains("Validation passed"));
    }

    #[test]
    fn test_failed_report_carries_message() {
        let report = ValidationReport::failed("zip error", METHOD_CACHED_VALUES);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "zip error");
        assert_eq!(value["total_errors"], 0);
    }

    #[test]
    fn test_error_locations_filter() {
        let report = sample();
        assert_eq!(report.error_locations(None).len(), 4);
        assert_eq!(
            report.error_locations(Some(ErrorSentinel::Ref)),
            vec!["Sheet2!A1"]
        );
        assert!(report.error_locations(Some(ErrorSentinel::Num)).is_empty());
    }

    #[test]
    fn test_truncated_keeps_counts() {
        let short = sample().truncated(2);
        let div0 = &short.error_summary()[&ErrorSentinel::DivZero];
        assert_eq!(div0.count, 3);
        assert_eq!(div0.locations.len(), 2);
        assert!(div0.truncated);
        assert!(!short.error_summary()[&ErrorSentinel::Ref].truncated);
    }

    #[test]
    fn test_summary_rate() {
        assert_eq!(
            sample().summary(),
            "4 errors found in 10 formulas (40.0% error rate)"
        );
    }

    #[test]
    fn test_round_trip_through_json() {
        let report = sample();
        let text = serde_json::to_string(&report).unwrap();
        let back: ValidationReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back, report);
    }
}
