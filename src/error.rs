use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type GuardResult<T> = Result<T, GuardError>;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Formula contains potentially unsafe operations: {}", warnings.join("; "))]
    SecurityRejected { warnings: Vec<String> },

    #[error("Invalid reference: Referenced sheet '{sheet}' does not exist")]
    InvalidReference { sheet: String },

    #[error("Could not acquire lock on {} within {:.1}s", path.display(), timeout.as_secs_f64())]
    LockTimeout { path: PathBuf, timeout: Duration },

    #[error("Corrupt workbook {}: {message}", path.display())]
    CorruptWorkbook { path: PathBuf, message: String },

    #[error("Formula error: {0}")]
    Formula(String),

    #[error("Sheet '{name}' not found. Available: {available:?}")]
    SheetNotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("Sheet '{0}' already exists")]
    SheetExists(String),

    #[error("Invalid sheet name: {0}")]
    InvalidSheetName(String),

    #[error("Backup failed for {}: {message}", path.display())]
    BackupFailed { path: PathBuf, message: String },

    #[error("Export error: {0}")]
    Export(String),

    #[error("Structure error: {0}")]
    Structure(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

impl GuardError {
    /// Stable tag used in JSON error payloads
    pub fn kind(&self) -> &'static str {
        match self {
            GuardError::Io(_) => "IoError",
            GuardError::InvalidAddress(_) => "InvalidAddress",
            GuardError::SecurityRejected { .. } => "SecurityRejected",
            GuardError::InvalidReference { .. } => "InvalidReference",
            GuardError::LockTimeout { .. } => "LockTimeout",
            GuardError::CorruptWorkbook { .. } => "CorruptWorkbook",
            GuardError::Formula(_) => "FormulaError",
            GuardError::SheetNotFound { .. } => "SheetNotFound",
            GuardError::SheetExists(_) => "SheetExists",
            GuardError::InvalidSheetName(_) => "InvalidSheetName",
            GuardError::BackupFailed { .. } => "BackupFailed",
            GuardError::Export(_) => "ExportError",
            GuardError::Structure(_) => "StructureError",
            GuardError::Csv(_) => "CsvError",
            GuardError::FileNotFound(_) => "FileNotFound",
        }
    }

    /// Process exit status for this error kind.
    ///
    /// 0 and 1 are reserved for success and "errors found / partial repair".
    pub fn exit_code(&self) -> i32 {
        match self {
            GuardError::InvalidAddress(_) => 2,
            GuardError::SecurityRejected { .. } => 3,
            GuardError::InvalidReference { .. } => 4,
            GuardError::LockTimeout { .. } => 5,
            GuardError::CorruptWorkbook { .. } => 6,
            GuardError::BackupFailed { .. } => 7,
            GuardError::FileNotFound(_) => 8,
            GuardError::SheetNotFound { .. }
            | GuardError::SheetExists(_)
            | GuardError::InvalidSheetName(_) => 9,
            GuardError::Formula(_) | GuardError::Structure(_) => 10,
            GuardError::Io(_) | GuardError::Export(_) | GuardError::Csv(_) => 11,
        }
    }

    /// Structured payload printed by the CLI on failure
    pub fn to_json(&self) -> Value {
        let mut payload = json!({
            "status": "error",
            "error": self.kind(),
            "message": self.to_string(),
        });
        if let GuardError::SecurityRejected { warnings } = self {
            payload["warnings"] = json!(warnings);
        }
        if let GuardError::InvalidReference { sheet } = self {
            payload["sheet"] = json!(sheet);
        }
        payload
    }
}
