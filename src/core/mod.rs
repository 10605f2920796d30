//! Formula integrity core: addressing, sanitizing and reference checks
//!
//! Pure functions over text and sheet-name sets; no I/O.

pub mod address;
pub mod references;
pub mod sanitizer;

pub use address::{
    column_index, format_column, is_valid_cell_reference, is_valid_range_reference,
    is_valid_sheet_name, parse_cell, parse_range, sanitize_sheet_name, CellAddress, RangeAddress,
};
pub use references::{
    check_references, extract_sheet_references, validate_references, ReferenceCheck,
    SheetCatalog,
};
pub use sanitizer::{
    sanitize, sanitize_checked, FormulaSanitizer, SanitizedFormula, ThreatSignature, Warning,
    WarningCategory,
};
