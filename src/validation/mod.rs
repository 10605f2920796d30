//! Error scan and repair over cached formula results

pub mod repair;
pub mod report;
pub mod scanner;
pub mod sentinel;

pub use repair::{
    repair_file, repair_workbook, RepairDetail, RepairEngine, RepairOptions, RepairOutcome,
    RepairResult, RepairStatus, RepairStrategy, RepairSummary,
};
pub use report::{ErrorSummary, ErrorTally, ReportStatus, ValidationReport};
pub use scanner::{scan_file, scan_workbook};
pub use sentinel::ErrorSentinel;
