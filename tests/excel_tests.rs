//! Excel import/export round trip tests

use royalbit_sheetguard::core::parse_cell;
use royalbit_sheetguard::excel::{CellStyle, WorkbookExporter, WorkbookImporter};
use royalbit_sheetguard::{Cell, CellValue, GuardError, Workbook};
use tempfile::TempDir;

fn cell<'a>(workbook: &'a Workbook, sheet: &str, a1: &str) -> &'a Cell {
    workbook
        .sheet(sheet)
        .unwrap()
        .get(&parse_cell(a1).unwrap())
        .unwrap_or_else(|| panic!("{}!{} should exist", sheet, a1))
}

// ═══════════════════════════════════════════════════════════════════════════
// ROUND TRIP
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_round_trip_preserves_sheet_order_and_values() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.xlsx");

    let mut workbook = Workbook::with_sheets(&["Summary", "Inputs", "Data 2024"]).unwrap();
    let inputs = workbook.sheet_mut("Inputs").unwrap();
    inputs.set(parse_cell("A1").unwrap(), Cell::value("Revenue"));
    inputs.set(parse_cell("B1").unwrap(), Cell::value(1250.5));
    inputs.set(parse_cell("C1").unwrap(), Cell::value(true));
    WorkbookExporter::new(&workbook).save(&path).unwrap();

    let loaded = WorkbookImporter::new(&path).load().unwrap();
    assert_eq!(loaded.sheet_names(), vec!["Summary", "Inputs", "Data 2024"]);
    assert_eq!(cell(&loaded, "Inputs", "A1").value, CellValue::Text("Revenue".to_string()));
    assert_eq!(cell(&loaded, "Inputs", "B1").value, CellValue::Number(1250.5));
    assert_eq!(cell(&loaded, "Inputs", "C1").value, CellValue::Bool(true));
    assert!(loaded.sheet("Summary").unwrap().is_empty());
}

#[test]
fn test_round_trip_preserves_formulas_and_cached_results() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("formulas.xlsx");

    let mut workbook = Workbook::with_sheets(&["Inputs", "Model"]).unwrap();
    workbook
        .sheet_mut("Inputs")
        .unwrap()
        .set(parse_cell("B2").unwrap(), Cell::value(100.0));
    let model = workbook.sheet_mut("Model").unwrap();
    model.set(
        parse_cell("B2").unwrap(),
        Cell::formula("=Inputs!B2*2", CellValue::Number(200.0)),
    );
    model.set(
        parse_cell("B3").unwrap(),
        Cell::formula("=Inputs!B2/0", CellValue::Error("#DIV/0!".to_string())),
    );
    model.set(
        parse_cell("B4").unwrap(),
        Cell::formula("=NA()", CellValue::Error("#N/A".to_string())),
    );
    workbook.save(&path).unwrap();

    let loaded = Workbook::load(&path).unwrap();
    let b2 = cell(&loaded, "Model", "B2");
    assert_eq!(b2.formula.as_deref(), Some("=Inputs!B2*2"));
    assert_eq!(b2.cached_display(), "200");

    let b3 = cell(&loaded, "Model", "B3");
    assert_eq!(b3.formula.as_deref(), Some("=Inputs!B2/0"));
    assert_eq!(b3.cached_display(), "#DIV/0!");

    assert_eq!(cell(&loaded, "Model", "B4").cached_display(), "#N/A");
    assert_eq!(loaded.sheet("Model").unwrap().formula_cells().count(), 3);
}

#[test]
fn test_round_trip_keeps_cells_away_from_origin() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("offset.xlsx");

    let mut workbook = Workbook::with_sheets(&["Sheet1"]).unwrap();
    let sheet = workbook.sheet_mut("Sheet1").unwrap();
    sheet.set(parse_cell("D7").unwrap(), Cell::value(1.0));
    sheet.set(parse_cell("AA100").unwrap(), Cell::formula("=D7+1", CellValue::Number(2.0)));
    workbook.save(&path).unwrap();

    let loaded = Workbook::load(&path).unwrap();
    let addresses: Vec<String> = loaded
        .sheet("Sheet1")
        .unwrap()
        .iter()
        .map(|(a, _)| a.to_a1())
        .collect();
    assert_eq!(addresses, vec!["D7", "AA100"]);
    assert_eq!(
        cell(&loaded, "Sheet1", "AA100").formula.as_deref(),
        Some("=D7+1")
    );
}

#[test]
fn test_styled_cells_and_notes_export() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("styled.xlsx");

    let mut workbook = Workbook::with_sheets(&["Inputs"]).unwrap();
    let mut input = Cell::value(0.05);
    input.style = Some(CellStyle::Assumption);
    input.number_format = Some("0.0%".to_string());
    input.comment = Some("Long-run growth".to_string());
    workbook
        .sheet_mut("Inputs")
        .unwrap()
        .set(parse_cell("B3").unwrap(), input);
    workbook.save(&path).unwrap();

    let loaded = Workbook::load(&path).unwrap();
    assert_eq!(cell(&loaded, "Inputs", "B3").value, CellValue::Number(0.05));
}

// ═══════════════════════════════════════════════════════════════════════════
// FAILURES
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_import_missing_or_garbage_is_corrupt_workbook() {
    let temp_dir = TempDir::new().unwrap();

    let missing = temp_dir.path().join("missing.xlsx");
    let err = WorkbookImporter::new(&missing).load().unwrap_err();
    assert!(matches!(err, GuardError::CorruptWorkbook { .. }), "got {:?}", err);

    let garbage = temp_dir.path().join("garbage.xlsx");
    std::fs::write(&garbage, "name,value\nrevenue,100\n").unwrap();
    let err = Workbook::load(&garbage).unwrap_err();
    assert!(matches!(err, GuardError::CorruptWorkbook { .. }));
    assert_eq!(err.exit_code(), 6);
}
