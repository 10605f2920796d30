//! Errors raised by real operations, with their kinds and exit codes

use royalbit_sheetguard::backup::create_backup;
use royalbit_sheetguard::core::{parse_cell, parse_range, sanitize_checked, validate_references};
use royalbit_sheetguard::session::WorkbookSession;
use royalbit_sheetguard::types::WorkbookStructure;
use royalbit_sheetguard::{GuardConfig, GuardError, Workbook};
use std::path::Path;
use tempfile::TempDir;

fn assert_kind(err: &GuardError, kind: &str, exit_code: i32) {
    assert_eq!(err.kind(), kind, "unexpected error: {}", err);
    assert_eq!(err.exit_code(), exit_code, "exit code for {}", kind);
    let payload = err.to_json();
    assert_eq!(payload["status"], "error");
    assert_eq!(payload["error"], kind);
    assert_eq!(payload["message"], err.to_string());
}

#[test]
fn test_invalid_address_from_parsers() {
    assert_kind(&parse_cell("A0").unwrap_err(), "InvalidAddress", 2);
    assert_kind(&parse_range("A1:").unwrap_err(), "InvalidAddress", 2);

    let mut session = WorkbookSession::create_new(&["Sheet1"]).unwrap();
    let err = session.add_formula("Sheet1", "1A", "=1+1", true, false).unwrap_err();
    assert_kind(&err, "InvalidAddress", 2);
}

#[test]
fn test_security_rejected_carries_every_warning() {
    let err = sanitize_checked("=WEBSERVICE(\"http://x\")&HYPERLINK(\"http://y\")", false).unwrap_err();
    assert_kind(&err, "SecurityRejected", 3);
    let warnings = err.to_json()["warnings"].as_array().cloned().unwrap_or_default();
    assert_eq!(warnings.len(), 2);
}

#[test]
fn test_invalid_reference_names_the_sheet() {
    let workbook = Workbook::with_sheets(&["Sheet1"]).unwrap();
    let err = validate_references("=Sheet1!A1+Data!B2", &workbook).unwrap_err();
    assert_kind(&err, "InvalidReference", 4);
    assert_eq!(err.to_json()["sheet"], "Data");
}

#[test]
fn test_file_errors() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("missing.xlsx");

    let err = WorkbookSession::open(&missing, true, &GuardConfig::default()).unwrap_err();
    assert_kind(&err, "FileNotFound", 8);

    let err = create_backup(&missing).unwrap_err();
    assert_kind(&err, "BackupFailed", 7);

    let corrupt = temp_dir.path().join("corrupt.xlsx");
    std::fs::write(&corrupt, b"garbage").unwrap();
    let err = WorkbookSession::open(&corrupt, false, &GuardConfig::default()).unwrap_err();
    assert_kind(&err, "CorruptWorkbook", 6);
    // Failed open must not leave a lock behind
    let err = WorkbookSession::open(&corrupt, true, &GuardConfig::default()).unwrap_err();
    assert_kind(&err, "CorruptWorkbook", 6);
    assert!(!temp_dir.path().join(".corrupt.xlsx.lock").exists());
}

#[test]
fn test_sheet_errors() {
    let mut session = WorkbookSession::create_new(&["Inputs"]).unwrap();

    let err = session.add_formula("Model", "A1", "=1+1", true, false).unwrap_err();
    assert_kind(&err, "SheetNotFound", 9);
    assert!(err.to_string().contains("Inputs"), "lists available sheets");

    assert_kind(&session.add_sheet("Inputs", None).unwrap_err(), "SheetExists", 9);
    assert_kind(&session.add_sheet("Bad/Name", None).unwrap_err(), "InvalidSheetName", 9);
}

#[test]
fn test_structure_and_export_errors() {
    let err = WorkbookStructure::parse("sheets: [unclosed").unwrap_err();
    assert_kind(&err, "StructureError", 10);

    let err = WorkbookStructure::from_path(Path::new("/nonexistent/structure.yaml")).unwrap_err();
    assert_kind(&err, "FileNotFound", 8);

    let mut session = WorkbookSession::create_new::<&str>(&[]).unwrap();
    assert_kind(&session.save(None).unwrap_err(), "ExportError", 11);
}
