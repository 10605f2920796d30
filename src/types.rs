use crate::core::address::DEFAULT_SHEET_NAME;
use crate::error::{GuardError, GuardResult};
use crate::excel::styles::CellStyle;
use crate::excel::workbook::CellValue;
use crate::validation::report::ValidationReport;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

//==============================================================================
// Workbook creation document
//==============================================================================

/// Declarative description of a new workbook (JSON or YAML)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookStructure {
    #[serde(default = "default_sheets")]
    pub sheets: Vec<String>,
    #[serde(default)]
    pub cells: Vec<CellDef>,
    #[serde(default)]
    pub inputs: Vec<InputDef>,
    #[serde(default)]
    pub assumptions: Vec<AssumptionDef>,
}

fn default_sheets() -> Vec<String> {
    vec![DEFAULT_SHEET_NAME.to_string()]
}

impl Default for WorkbookStructure {
    fn default() -> Self {
        Self {
            sheets: default_sheets(),
            cells: Vec::new(),
            inputs: Vec::new(),
            assumptions: Vec::new(),
        }
    }
}

impl WorkbookStructure {
    /// Parse JSON or YAML text (YAML is a superset, so one parser serves both)
    pub fn parse(text: &str) -> GuardResult<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| GuardError::Structure(format!("Invalid structure document: {}", e)))
    }

    /// Read a `.json`, `.yaml` or `.yml` file
    pub fn from_path(path: &Path) -> GuardResult<Self> {
        if !path.exists() {
            return Err(GuardError::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&text)
                .map_err(|e| GuardError::Structure(format!("Invalid JSON structure: {}", e)))
        } else {
            Self::parse(&text)
        }
    }
}

/// A plain value or a formula for one cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellDef {
    pub sheet: String,
    pub cell: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<CellValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<CellStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
    /// Write the formula even if the sanitizer warns
    #[serde(default, alias = "allow_dangerous")]
    pub allow_external: bool,
}

/// Hardcoded numeric input (blue)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDef {
    pub sheet: String,
    pub cell: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

/// Key assumption (yellow, always documented)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumptionDef {
    pub sheet: String,
    pub cell: String,
    pub value: CellValue,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number_format: Option<String>,
}

/// Counters reported after building a workbook from a structure
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateStats {
    pub file: PathBuf,
    pub sheets_created: usize,
    pub formulas_added: usize,
    pub inputs_added: usize,
    pub assumptions_added: usize,
    pub cells_set: usize,
    /// Sanitizer warnings on formulas written with `allow_external`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_result: Option<ValidationReport>,
}

//==============================================================================
// Inspection payloads
//==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellInfo {
    pub sheet: String,
    pub cell: String,
    pub value: CellValue,
    /// `number`, `string`, `boolean`, `error`, `empty` or `formula`
    pub data_type: String,
    pub is_formula: bool,
    pub formula: Option<String>,
    pub style: Option<CellStyle>,
    pub number_format: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkbookInfo {
    pub sheets: Vec<String>,
    pub sheet_count: usize,
    pub total_formulas: usize,
    pub total_cells_with_data: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    /// Last modification time, RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
}

/// What `add_formula` wrote
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormulaWrite {
    pub sheet: String,
    pub cell: String,
    pub formula: String,
    /// Non-fatal warnings (only present when dangerous operations were allowed)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
