use crate::config::GuardConfig;
use crate::core::references::{check_references, extract_sheet_references, validate_references};
use crate::core::sanitizer::sanitize;
use crate::error::{GuardError, GuardResult};
use crate::excel::styles::CellStyle;
use crate::excel::workbook::{CellValue, Workbook};
use crate::session::{create_workbook_from_structure, export_sheet_to_csv, WorkbookSession};
use crate::types::WorkbookStructure;
use crate::validation::repair::{repair_file, RepairOptions, RepairResult, RepairStatus};
use crate::validation::report::{ReportStatus, ValidationReport};
use crate::validation::scanner::scan_file;
use crate::validation::sentinel::ErrorSentinel;
use colored::Colorize;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// How a command finished when it did not fail outright
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Clean,
    /// Errors found, partial repair, or a rejected formula/reference
    Flagged,
    /// Finished, but with the exit status of a specific error kind
    Failed(i32),
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Clean => 0,
            Outcome::Flagged => 1,
            Outcome::Failed(code) => code,
        }
    }
}

/// Interpretation of a raw `set-value` argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ValueKind {
    /// Number, then TRUE/FALSE, then text
    #[default]
    Auto,
    Number,
    Text,
    Bool,
}

fn emit(payload: &Value) {
    println!("{:#}", payload);
}

/// Serialize `data` and put `status` first-class into the object
fn with_status<T: Serialize>(status: &str, data: &T) -> Value {
    let mut payload = json!(data);
    if let Value::Object(map) = &mut payload {
        map.insert("status".to_string(), json!(status));
    }
    payload
}

fn require_file(file: &Path) -> GuardResult<()> {
    if file.exists() {
        Ok(())
    } else {
        Err(GuardError::FileNotFound(file.to_path_buf()))
    }
}

fn unreadable(file: &Path, message: &str) -> Outcome {
    let error = GuardError::CorruptWorkbook {
        path: file.to_path_buf(),
        message: message.to_string(),
    };
    Outcome::Failed(error.exit_code())
}

/// Print an error as JSON on stdout (and readable on stderr in text mode)
pub fn report_error(error: &GuardError, text: bool) {
    if text {
        eprintln!("{}", format!("❌ {}", error).bold().red());
    } else {
        emit(&error.to_json());
    }
}

//==============================================================================
// validate / repair
//==============================================================================

/// Scan cached formula results for error values
pub fn validate(file: PathBuf, detailed: bool, text: bool, config: &GuardConfig) -> GuardResult<Outcome> {
    require_file(&file)?;
    let full = scan_file(&file);
    let report = if detailed {
        full.clone()
    } else {
        full.truncated(config.location_preview_limit)
    };

    if text {
        print_report(&file, &report);
    } else {
        let mut payload = json!(report);
        payload["file"] = json!(file);
        payload["summary"] = json!(report.summary());
        emit(&payload);
    }

    Ok(match report.status() {
        ReportStatus::Success => Outcome::Clean,
        ReportStatus::ErrorsFound => Outcome::Flagged,
        ReportStatus::Error => unreadable(&file, report.error().unwrap_or_default()),
    })
}

fn print_report(file: &Path, report: &ValidationReport) {
    println!("{}", "🔍 SheetGuard - Validating formulas".bold().green());
    println!("   File: {}\n", file.display());

    match report.status() {
        ReportStatus::Success => {
            println!("{}", format!("✅ {}", report.summary()).bold().green());
        }
        ReportStatus::ErrorsFound => {
            println!("{}", format!("❌ {}", report.summary()).bold().red());
            for (sentinel, tally) in report.error_summary() {
                println!("\n   {} ({})", sentinel.to_string().bright_red().bold(), tally.count);
                for location in &tally.locations {
                    println!("      {}", location.bright_blue());
                }
                if tally.truncated {
                    println!(
                        "      {}",
                        format!("... {} more", tally.count - tally.locations.len()).dimmed()
                    );
                }
            }
        }
        ReportStatus::Error => {
            println!("{}", format!("❌ {}", report.summary()).bold().red());
        }
    }
}

/// Repair cached errors in place
pub fn repair(
    file: PathBuf,
    error_types: Vec<ErrorSentinel>,
    options: RepairOptions,
    text: bool,
    config: &GuardConfig,
) -> GuardResult<Outcome> {
    let options = RepairOptions {
        error_types: if error_types.is_empty() {
            None
        } else {
            Some(error_types.into_iter().collect::<BTreeSet<_>>())
        },
        ..options
    };
    let result = repair_file(&file, &options, config)?;

    if text {
        print_repair(&result);
    } else {
        emit(&json!(result));
    }

    Ok(match result.status {
        RepairStatus::Success | RepairStatus::DryRun => Outcome::Clean,
        RepairStatus::PartialSuccess => Outcome::Flagged,
        RepairStatus::Error => unreadable(&file, result.error.as_deref().unwrap_or_default()),
    })
}

fn print_repair(result: &RepairResult) {
    println!("{}", "🔧 SheetGuard - Repairing formulas".bold().green());
    println!("   File: {}", result.file.display());
    if let Some(backup) = &result.backup_file {
        println!("   Backup: {}", backup.display());
    }
    println!();

    for (sentinel, detail) in &result.details {
        if detail.flagged > 0 {
            println!(
                "   {} {} flagged ({})",
                sentinel.to_string().yellow().bold(),
                detail.flagged,
                detail.method
            );
        } else {
            println!(
                "   {} {}/{} repaired ({})",
                sentinel.to_string().bright_blue().bold(),
                detail.successful,
                detail.attempted,
                detail.method
            );
        }
        for location in &detail.locations {
            println!("      {}", location.dimmed());
        }
    }

    let line = match result.status {
        RepairStatus::Success => format!("✅ {}", result.message).bold().green(),
        RepairStatus::DryRun => format!("📋 {}", result.message).yellow(),
        RepairStatus::PartialSuccess => format!("⚠️  {}", result.message).bold().yellow(),
        RepairStatus::Error => format!("❌ {}", result.message).bold().red(),
    };
    println!("\n{}", line);
}

//==============================================================================
// formula checks
//==============================================================================

/// Normalize a formula and list its security warnings
pub fn sanitize_formula(formula: String, allow_dangerous: bool) -> GuardResult<Outcome> {
    let result = sanitize(&formula, allow_dangerous);
    let payload = json!({
        "status": "success",
        "formula": result.formula,
        "warnings": result.warning_messages(),
        "safe": result.is_clean(),
    });
    // Rejection goes through the error payload so the warnings are listed there
    result.enforce(allow_dangerous)?;
    emit(&payload);
    Ok(Outcome::Clean)
}

/// Check sheet references against a workbook and/or an explicit sheet list
pub fn check_refs(formula: String, file: Option<PathBuf>, sheets: Vec<String>) -> GuardResult<Outcome> {
    let mut known = sheets;
    if let Some(file) = &file {
        require_file(file)?;
        known.extend(Workbook::load(file)?.sheet_names());
    }

    let check = check_references(&formula, &known);
    let mut payload = json!(check);
    payload["references"] = json!(extract_sheet_references(&formula));
    payload["sheets"] = json!(known);
    emit(&payload);

    Ok(match validate_references(&formula, &known) {
        Ok(()) => Outcome::Clean,
        Err(e) => Outcome::Failed(e.exit_code()),
    })
}

//==============================================================================
// cell editing
//==============================================================================

pub struct FormulaArgs {
    pub sheet: String,
    pub cell: String,
    pub formula: String,
    pub allow_dangerous: bool,
    pub validate_refs: bool,
}

/// Write one formula into an existing workbook
pub fn add_formula(file: PathBuf, args: FormulaArgs, config: &GuardConfig) -> GuardResult<Outcome> {
    let mut session = WorkbookSession::open(&file, true, config)?;
    let written = session.add_formula(
        &args.sheet,
        &args.cell,
        &args.formula,
        args.validate_refs,
        args.allow_dangerous,
    )?;
    session.save(None)?;
    session.close()?;

    let mut payload = with_status("success", &written);
    payload["file"] = json!(file);
    emit(&payload);
    Ok(Outcome::Clean)
}

/// Interpret a raw command-line value
pub fn parse_value(raw: &str, kind: ValueKind) -> GuardResult<CellValue> {
    let as_bool = |s: &str| match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    };
    match kind {
        ValueKind::Text => Ok(CellValue::Text(raw.to_string())),
        ValueKind::Number => raw
            .trim()
            .parse::<f64>()
            .map(CellValue::Number)
            .map_err(|_| GuardError::Structure(format!("Not a number: {}", raw))),
        ValueKind::Bool => as_bool(raw.trim())
            .map(CellValue::Bool)
            .ok_or_else(|| GuardError::Structure(format!("Not a boolean: {}", raw))),
        ValueKind::Auto => {
            if raw.is_empty() {
                Ok(CellValue::Empty)
            } else if let Ok(n) = raw.trim().parse::<f64>() {
                Ok(CellValue::Number(n))
            } else if let Some(b) = as_bool(raw.trim()) {
                Ok(CellValue::Bool(b))
            } else {
                Ok(CellValue::Text(raw.to_string()))
            }
        }
    }
}

pub struct ValueArgs {
    pub sheet: String,
    pub cell: String,
    pub value: String,
    pub kind: ValueKind,
    pub style: Option<CellStyle>,
    pub number_format: Option<String>,
}

/// Write a literal value into an existing workbook
pub fn set_value(file: PathBuf, args: ValueArgs, config: &GuardConfig) -> GuardResult<Outcome> {
    let value = parse_value(&args.value, args.kind)?;
    let mut session = WorkbookSession::open(&file, true, config)?;
    session.set_cell_value(
        &args.sheet,
        &args.cell,
        value.clone(),
        args.style,
        args.number_format.as_deref(),
    )?;
    session.save(None)?;
    session.close()?;

    emit(&json!({
        "status": "success",
        "file": file,
        "sheet": args.sheet,
        "cell": args.cell.to_uppercase(),
        "value": value,
        "type": value.type_name(),
    }));
    Ok(Outcome::Clean)
}

/// Read one cell
pub fn get_value(file: PathBuf, sheet: String, cell: String) -> GuardResult<Outcome> {
    let session = WorkbookSession::open(&file, false, &GuardConfig::default())?;
    let info = session.cell_info(&sheet, &cell)?;
    emit(&with_status("success", &info));
    Ok(Outcome::Clean)
}

/// Workbook metadata
pub fn info(file: PathBuf) -> GuardResult<Outcome> {
    let session = WorkbookSession::open(&file, false, &GuardConfig::default())?;
    emit(&with_status("success", &session.workbook_info()));
    Ok(Outcome::Clean)
}

//==============================================================================
// create / export
//==============================================================================

/// Build a new workbook from a JSON/YAML structure file
pub fn create(
    output: PathBuf,
    structure: PathBuf,
    validate: bool,
    overwrite: bool,
) -> GuardResult<Outcome> {
    if output.exists() && !overwrite {
        return Err(GuardError::Structure(format!(
            "Output file already exists: {} (use --overwrite)",
            output.display()
        )));
    }
    let structure = WorkbookStructure::from_path(&structure)?;
    let stats = create_workbook_from_structure(&output, &structure, validate)?;
    let flagged = stats
        .validation_result
        .as_ref()
        .is_some_and(|r| r.status() != ReportStatus::Success);

    emit(&with_status("success", &stats));
    Ok(if flagged { Outcome::Flagged } else { Outcome::Clean })
}

/// Write a sheet as CSV
pub fn export_csv(
    file: PathBuf,
    sheet: String,
    output: PathBuf,
    range: Option<String>,
) -> GuardResult<Outcome> {
    let rows = export_sheet_to_csv(&file, &sheet, &output, range.as_deref())?;
    emit(&json!({
        "status": "success",
        "file": file,
        "sheet": sheet,
        "output": output,
        "range": range,
        "rows": rows,
    }));
    Ok(Outcome::Clean)
}
