//! SheetGuard - formula integrity guard for Excel workbooks
//!
//! Checks formulas before they are written and scans workbooks after.
//!
//! # Features
//!
//! - A1 address parsing with grid bounds (1,048,576 rows × 16,384 columns)
//! - Formula sanitizing against a table of threat signatures
//! - Sheet reference validation against the workbook's sheet catalog
//! - Cached-value error scan (`#DIV/0!`, `#REF!`, ...) and automated repair
//! - Saves of opened workbooks patch the original package, keeping formatting
//! - Advisory file locking and timestamped backups around every write
//!
//! # Example
//!
//! ```no_run
//! use royalbit_sheetguard::session::WorkbookSession;
//! use royalbit_sheetguard::validation::scan_file;
//! use std::path::Path;
//!
//! let mut session = WorkbookSession::create_new(&["Inputs", "Model"])?;
//! session.add_financial_input("Inputs", "B2", 1000.0, Some("FY24 actuals"), None)?;
//! session.add_formula("Model", "B2", "=Inputs!B2*1.05", true, false)?;
//! session.save(Some(Path::new("model.xlsx")))?;
//!
//! let report = scan_file(Path::new("model.xlsx"));
//! println!("{}", report);
//! # Ok::<(), royalbit_sheetguard::error::GuardError>(())
//! ```

pub mod atomic;
pub mod backup;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod excel;
pub mod lock;
pub mod session;
pub mod types;
pub mod validation;

// Re-export commonly used types
pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use excel::{Cell, CellValue, Workbook};
pub use validation::{ErrorSentinel, ValidationReport};
