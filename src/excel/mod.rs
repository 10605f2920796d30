//! Excel workbook I/O
//!
//! - Model: ordered sheets of cells with cached formula results
//! - Import: .xlsx → model (calamine)
//! - Export: model → .xlsx (rust_xlsxwriter), cached results included
//! - Package: in-place edits of a loaded .xlsx (zip + quick-xml)

mod exporter;
mod importer;
mod package;
pub mod styles;
pub mod workbook;

pub use exporter::WorkbookExporter;
pub use importer::WorkbookImporter;
pub use package::PackagePatcher;
pub use styles::{number_format, CellStyle};
pub use workbook::{Cell, CellValue, Sheet, Workbook};
