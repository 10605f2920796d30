//! CLI command handlers

pub mod commands;

pub use commands::{
    add_formula, check_refs, create, export_csv, get_value, info, repair, report_error,
    sanitize_formula, set_value, validate, FormulaArgs, Outcome, ValueArgs, ValueKind,
};
