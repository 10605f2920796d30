//! Cached-value error scan
//!
//! Reads the last computed result stored with each formula; nothing is
//! recalculated. Sheets are visited in declared order and cells row-major,
//! which fixes the order of every location list.

use crate::error::GuardError;
use crate::excel::workbook::{Cell, Workbook};
use crate::validation::report::{ErrorSummary, ValidationReport, METHOD_CACHED_VALUES};
use crate::validation::sentinel::ErrorSentinel;
use std::path::Path;

/// Sentinel held in a formula cell's cached value, if any
pub fn cached_error(cell: &Cell) -> Option<ErrorSentinel> {
    if !cell.is_formula() {
        return None;
    }
    ErrorSentinel::from_literal(&cell.cached_display())
}

/// Scan an in-memory workbook
pub fn scan_workbook(workbook: &Workbook) -> ValidationReport {
    let mut total_formulas = 0;
    let mut summary = ErrorSummary::new();

    for sheet in workbook.sheets() {
        for (address, cell) in sheet.formula_cells() {
            total_formulas += 1;
            if let Some(sentinel) = cached_error(cell) {
                let tally = summary.entry(sentinel).or_default();
                tally.count += 1;
                tally.locations.push(format!("{}!{}", sheet.name(), address));
            }
        }
    }

    let report = ValidationReport::from_summary(total_formulas, summary, METHOD_CACHED_VALUES);
    tracing::info!(
        formulas = report.total_formulas(),
        errors = report.total_errors(),
        "scan complete"
    );
    report
}

/// Load and scan a file.
///
/// An unreadable workbook yields an `error` report rather than an `Err`,
/// so a batch over many files keeps going.
pub fn scan_file(path: &Path) -> ValidationReport {
    match Workbook::load(path) {
        Ok(workbook) => scan_workbook(&workbook),
        Err(e) => {
            let message = match &e {
                GuardError::CorruptWorkbook { message, .. } => message.clone(),
                other => other.to_string(),
            };
            tracing::warn!(path = %path.display(), error = %message, "scan could not read workbook");
            ValidationReport::failed(message, METHOD_CACHED_VALUES)
        }
    }
}
