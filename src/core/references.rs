//! Sheet reference validation
//!
//! Extracts sheet-qualified tokens (`Sheet1!A1`, `'My Sheet'!B2`) from a
//! formula and checks each against the workbook's sheet catalog.
//!
//! Extraction is pattern based, not a grammar parse. Two refinements keep
//! false positives down: double-quoted string literals are blanked out before
//! matching, and tokens that belong to an error literal (`#REF!`) or to an
//! external workbook (`[Book.xlsx]Sheet1!`) are not treated as local sheets.
//!
//! Bare names may use any letters or digits (`Données!A1`). A 3D reference
//! (`Jan:Mar!B2`) yields both end sheets.

use crate::core::address::parse_cell;
use crate::error::{GuardError, GuardResult};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::OnceLock;

/// Read-only view of the sheet names defined in a workbook
pub trait SheetCatalog {
    fn contains_sheet(&self, name: &str) -> bool;
}

impl SheetCatalog for HashSet<String> {
    fn contains_sheet(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl SheetCatalog for BTreeSet<String> {
    fn contains_sheet(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl SheetCatalog for [String] {
    fn contains_sheet(&self, name: &str) -> bool {
        self.iter().any(|s| s == name)
    }
}

impl SheetCatalog for Vec<String> {
    fn contains_sheet(&self, name: &str) -> bool {
        self.as_slice().contains_sheet(name)
    }
}

impl SheetCatalog for [&str] {
    fn contains_sheet(&self, name: &str) -> bool {
        self.contains(&name)
    }
}

/// Outcome of a reference check in its wire shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceCheck {
    pub valid: bool,
    pub error: Option<String>,
}

fn sheet_ref_regex() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"'((?:[^']|'')+)'!|(?:([\p{L}\p{N}_.$]+):)?([\p{L}\p{N}_.]+)!").ok()
        })
        .as_ref()
}

/// Replace the contents of `"..."` literals (with `""` escapes) by spaces,
/// keeping byte offsets stable.
fn blank_string_literals(formula: &str) -> String {
    let mut out = String::with_capacity(formula.len());
    let mut in_string = false;
    for c in formula.chars() {
        if c == '"' {
            in_string = !in_string;
            out.push(c);
        } else if in_string {
            out.extend(std::iter::repeat(' ').take(c.len_utf8()));
        } else {
            out.push(c);
        }
    }
    out
}

/// Sheet names referenced by `formula`, deduplicated, in order of first appearance
pub fn extract_sheet_references(formula: &str) -> Vec<String> {
    let Some(regex) = sheet_ref_regex() else {
        return Vec::new();
    };
    let scrubbed = blank_string_literals(formula);
    let mut names: Vec<String> = Vec::new();

    for caps in regex.captures_iter(&scrubbed) {
        let found: Vec<String> = if let Some(quoted) = caps.get(1) {
            if quoted.as_str().contains('[') {
                continue; // external workbook
            }
            let unescaped = quoted.as_str().replace("''", "'");
            // Sheet names cannot contain ':', so a colon splits a 3D span
            unescaped.split(':').map(str::to_string).collect()
        } else if let Some(last) = caps.get(3) {
            let first = caps.get(2);
            let start = first.map_or(last.start(), |m| m.start());
            let preceding = scrubbed[..start].chars().next_back();
            if matches!(preceding, Some('#') | Some(']')) {
                continue;
            }
            match first.filter(|m| !is_range_end(m.as_str())) {
                Some(first) => vec![first.as_str().to_string(), last.as_str().to_string()],
                None => vec![last.as_str().to_string()],
            }
        } else {
            continue;
        };

        for name in found {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

/// Left side of `A1:Data!B2`: a cell or row, not the first sheet of a span.
/// Sheets named like cells must be quoted, so this never hides a sheet.
fn is_range_end(token: &str) -> bool {
    token.contains('$') || token.chars().all(|c| c.is_ascii_digit()) || parse_cell(token).is_ok()
}

/// Fail on the first referenced sheet missing from `sheets`
pub fn validate_references<C>(formula: &str, sheets: &C) -> GuardResult<()>
where
    C: SheetCatalog + ?Sized,
{
    if formula.trim().is_empty() {
        return Err(GuardError::Formula(
            "Formula must be a non-empty string".to_string(),
        ));
    }

    for name in extract_sheet_references(formula) {
        if !sheets.contains_sheet(&name) {
            tracing::debug!(sheet = %name, formula, "formula references unknown sheet");
            return Err(GuardError::InvalidReference { sheet: name });
        }
    }
    Ok(())
}

/// [`validate_references`] in its boolean + message form
pub fn check_references<C>(formula: &str, sheets: &C) -> ReferenceCheck
where
    C: SheetCatalog + ?Sized,
{
    match validate_references(formula, sheets) {
        Ok(()) => ReferenceCheck {
            valid: true,
            error: None,
        },
        Err(GuardError::InvalidReference { sheet }) => ReferenceCheck {
            valid: false,
            error: Some(format!("Referenced sheet '{}' does not exist", sheet)),
        },
        Err(e) => ReferenceCheck {
            valid: false,
            error: Some(match e {
                GuardError::Formula(msg) => msg,
                other => other.to_string(),
            }),
        },
    }
}
