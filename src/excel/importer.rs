//! Excel importer - .xlsx → [`Workbook`]

use crate::core::address::CellAddress;
use crate::error::{GuardError, GuardResult};
use crate::excel::workbook::{CellValue, Sheet, Workbook};
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use std::path::{Path, PathBuf};

/// Loads values, formulas and cached formula results from an .xlsx file
pub struct WorkbookImporter {
    path: PathBuf,
}

impl WorkbookImporter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Read the whole workbook.
    ///
    /// Any failure to open or parse the file is reported as `CorruptWorkbook`.
    pub fn load(&self) -> GuardResult<Workbook> {
        let mut excel: Xlsx<_> = open_workbook(&self.path).map_err(|e| self.corrupt(e))?;

        let mut workbook = Workbook::new();
        for sheet_name in excel.sheet_names().to_vec() {
            let values = excel
                .worksheet_range(&sheet_name)
                .map_err(|e| self.corrupt(e))?;
            let formulas = excel
                .worksheet_formula(&sheet_name)
                .map_err(|e| self.corrupt(e))?;

            let mut sheet = Sheet::new(sheet_name.clone());
            self.read_values(&values, &mut sheet);
            self.read_formulas(&formulas, &mut sheet);
            tracing::debug!(sheet = %sheet_name, cells = sheet.len(), "loaded worksheet");
            workbook.push_sheet(sheet);
        }
        workbook.attach_source(&self.path);

        tracing::info!(
            path = %self.path.display(),
            sheets = workbook.sheet_count(),
            "workbook loaded"
        );
        Ok(workbook)
    }

    fn read_values(&self, range: &Range<Data>, sheet: &mut Sheet) {
        // Range start offset (data may not begin at A1)
        let (start_row, start_col) = range.start().unwrap_or((0, 0));

        for (row_idx, col_idx, data) in range.used_cells() {
            let value = convert_data(data);
            if value.is_empty() {
                continue;
            }
            if let Some(address) = to_address(start_row, start_col, row_idx, col_idx) {
                sheet.cell_mut(address).value = value;
            }
        }
    }

    fn read_formulas(&self, range: &Range<String>, sheet: &mut Sheet) {
        // Formula range may start at a different offset than the value range
        let (start_row, start_col) = range.start().unwrap_or((0, 0));

        for (row_idx, col_idx, formula) in range.used_cells() {
            if formula.is_empty() {
                continue;
            }
            if let Some(address) = to_address(start_row, start_col, row_idx, col_idx) {
                // calamine strips the leading =
                let formula = if formula.starts_with('=') {
                    formula.clone()
                } else {
                    format!("={}", formula)
                };
                sheet.cell_mut(address).formula = Some(formula);
            }
        }
    }

    fn corrupt(&self, error: impl std::fmt::Display) -> GuardError {
        GuardError::CorruptWorkbook {
            path: self.path.clone(),
            message: error.to_string(),
        }
    }
}

fn to_address(start_row: u32, start_col: u32, row_idx: usize, col_idx: usize) -> Option<CellAddress> {
    let row = u32::try_from(row_idx).ok()?.checked_add(start_row)?.checked_add(1)?;
    let column = u32::try_from(col_idx).ok()?.checked_add(start_col)?.checked_add(1)?;
    CellAddress::new(row, column).ok()
}

/// calamine cell → model value. Error cells keep their literal display text.
fn convert_data(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Empty,
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::Error(e) => CellValue::Error(e.to_string()),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calamine::CellErrorType;

    #[test]
    fn test_convert_error_keeps_literal() {
        assert_eq!(
            convert_data(&Data::Error(CellErrorType::Div0)),
            CellValue::Error("#DIV/0!".to_string())
        );
        assert_eq!(
            convert_data(&Data::Error(CellErrorType::NA)),
            CellValue::Error("#N/A".to_string())
        );
    }

    #[test]
    fn test_convert_scalars() {
        assert_eq!(convert_data(&Data::Int(7)), CellValue::Number(7.0));
        assert_eq!(convert_data(&Data::Float(1.5)), CellValue::Number(1.5));
        assert_eq!(convert_data(&Data::Bool(true)), CellValue::Bool(true));
        assert_eq!(convert_data(&Data::String(String::new())), CellValue::Empty);
    }

    #[test]
    fn test_to_address_applies_offset() {
        let address = to_address(2, 1, 0, 0).unwrap();
        assert_eq!(address.to_a1(), "B3");
        assert!(to_address(crate::core::address::MAX_ROWS, 0, 0, 0).is_none());
    }

    #[test]
    fn test_missing_file_is_corrupt() {
        let result = WorkbookImporter::new("/nonexistent/dir/missing.xlsx").load();
        assert!(matches!(result, Err(GuardError::CorruptWorkbook { .. })));
    }
}
