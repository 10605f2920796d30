//! Excel exporter - [`Workbook`] → .xlsx

use crate::atomic::write_atomic_with_path;
use crate::core::address::CellAddress;
use crate::error::{GuardError, GuardResult};
use crate::excel::styles::cell_format;
use crate::excel::workbook::{Cell, CellValue, Workbook};
use rust_xlsxwriter::{Formula, Note, Workbook as XlsxWorkbook, Worksheet};
use std::path::Path;

/// Author recorded on cell notes
pub const NOTE_AUTHOR: &str = "SheetGuard";

/// Writes a [`Workbook`] including cached formula results
pub struct WorkbookExporter<'a> {
    workbook: &'a Workbook,
}

impl<'a> WorkbookExporter<'a> {
    pub fn new(workbook: &'a Workbook) -> Self {
        Self { workbook }
    }

    pub fn save(&self, output_path: &Path) -> GuardResult<()> {
        let mut xlsx = XlsxWorkbook::new();

        for sheet in self.workbook.sheets() {
            let worksheet = xlsx.add_worksheet();
            worksheet
                .set_name(sheet.name())
                .map_err(|e| GuardError::Export(format!("Failed to set worksheet name: {}", e)))?;

            for (address, cell) in sheet.iter() {
                write_cell(worksheet, address, cell)?;
            }
        }

        write_atomic_with_path(output_path, |tmp| {
            xlsx.save(tmp)
                .map_err(|e| GuardError::Export(format!("Failed to save Excel file: {}", e)))
        })?;

        tracing::info!(path = %output_path.display(), sheets = self.workbook.sheet_count(), "workbook saved");
        Ok(())
    }
}

fn write_cell(worksheet: &mut Worksheet, address: CellAddress, cell: &Cell) -> GuardResult<()> {
    // Worksheet API is 0-indexed; columns fit u16 by the grid limit
    let row = address.row() - 1;
    let col = (address.column() - 1) as u16;
    let format = cell_format(cell.style, cell.number_format.as_deref());
    let err = |what: &str, e: rust_xlsxwriter::XlsxError| {
        GuardError::Export(format!("Failed to write {} at {}: {}", what, address, e))
    };

    if let Some(formula) = &cell.formula {
        let mut xlsx_formula = Formula::new(formula.as_str());
        if !cell.value.is_empty() {
            xlsx_formula = xlsx_formula.set_result(cell.value.display());
        }
        match &format {
            Some(f) => worksheet.write_formula_with_format(row, col, xlsx_formula, f),
            None => worksheet.write_formula(row, col, xlsx_formula),
        }
        .map_err(|e| err("formula", e))?;
    } else {
        match (&cell.value, &format) {
            (CellValue::Empty, Some(f)) => worksheet.write_blank(row, col, f),
            (CellValue::Empty, None) => Ok(&mut *worksheet),
            (CellValue::Number(n), Some(f)) => worksheet.write_number_with_format(row, col, *n, f),
            (CellValue::Number(n), None) => worksheet.write_number(row, col, *n),
            (CellValue::Bool(b), Some(f)) => worksheet.write_boolean_with_format(row, col, *b, f),
            (CellValue::Bool(b), None) => worksheet.write_boolean(row, col, *b),
            (CellValue::Text(s) | CellValue::Error(s), Some(f)) => {
                worksheet.write_string_with_format(row, col, s, f)
            }
            (CellValue::Text(s) | CellValue::Error(s), None) => worksheet.write_string(row, col, s),
        }
        .map_err(|e| err("value", e))?;
    }

    if let Some(comment) = &cell.comment {
        let note = Note::new(comment).set_author(NOTE_AUTHOR);
        worksheet
            .insert_note(row, col, &note)
            .map_err(|e| err("note", e))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse_cell;
    use crate::excel::styles::CellStyle;
    use crate::excel::workbook::Sheet;
    use tempfile::TempDir;

    #[test]
    fn test_export_empty_workbook() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("empty.xlsx");

        let workbook = Workbook::new();
        let result = WorkbookExporter::new(&workbook).save(&output_path);
        assert!(result.is_ok(), "Export empty workbook should succeed");
        assert!(output_path.exists(), "Output file should exist");
    }

    #[test]
    fn test_export_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("nested/deeper/model.xlsx");

        let mut workbook = Workbook::with_sheets(&["Sheet1"]).unwrap();
        let sheet: &mut Sheet = workbook.sheet_mut("Sheet1").unwrap();
        let mut cell = Cell::value(1250.0);
        cell.style = Some(CellStyle::Input);
        cell.number_format = Some("#,##0".to_string());
        cell.comment = Some("Source: FY24 actuals".to_string());
        sheet.set(parse_cell("A1").unwrap(), cell);

        WorkbookExporter::new(&workbook).save(&output_path).unwrap();
        assert!(output_path.exists());
    }

    #[test]
    fn test_failed_save_keeps_previous_file() {
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("model.xlsx");
        std::fs::write(&output_path, b"previous contents").unwrap();

        // Over the 31-character worksheet name limit; rejected mid-export
        let mut workbook = Workbook::new();
        workbook.push_sheet(Sheet::new("A sheet name well past the limit"));
        assert!(WorkbookExporter::new(&workbook).save(&output_path).is_err());
        assert_eq!(std::fs::read(&output_path).unwrap(), b"previous contents");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 1);
    }
}
