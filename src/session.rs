//! Guarded editing of one workbook
//!
//! Every formula write runs the sanitizer, then the reference check, then
//! the sheet lookup; nothing is mutated unless all three pass.

use crate::config::GuardConfig;
use crate::core::address::{format_column, parse_cell, parse_range, CellAddress, DEFAULT_SHEET_NAME};
use crate::core::references::validate_references;
use crate::core::sanitizer::sanitize_checked;
use crate::error::{GuardError, GuardResult};
use crate::excel::styles::CellStyle;
use crate::excel::workbook::{Cell, CellValue, Sheet, Workbook};
use crate::lock::FileLock;
use crate::types::{CellInfo, CreateStats, FormulaWrite, WorkbookInfo, WorkbookStructure};
use crate::validation::scanner::scan_file;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// An open workbook, optionally holding the advisory lock on its file
#[derive(Debug)]
pub struct WorkbookSession {
    workbook: Workbook,
    path: Option<PathBuf>,
    lock: Option<FileLock>,
}

impl WorkbookSession {
    /// New in-memory workbook; an empty list yields a single default sheet
    pub fn create_new<S: AsRef<str>>(sheets: &[S]) -> GuardResult<Self> {
        let workbook = if sheets.is_empty() {
            Workbook::with_sheets(&[DEFAULT_SHEET_NAME])?
        } else {
            Workbook::with_sheets(sheets)?
        };
        Ok(Self {
            workbook,
            path: None,
            lock: None,
        })
    }

    /// Open an existing file; with `lock` the advisory lock is held until close
    pub fn open(path: &Path, lock: bool, config: &GuardConfig) -> GuardResult<Self> {
        if !path.exists() {
            return Err(GuardError::FileNotFound(path.to_path_buf()));
        }
        let lock = if lock && config.locking {
            Some(FileLock::acquire(
                path,
                config.lock_timeout,
                config.lock_poll_interval,
            )?)
        } else {
            None
        };
        let workbook = Workbook::load(path)?;
        Ok(Self {
            workbook,
            path: Some(path.to_path_buf()),
            lock,
        })
    }

    pub fn workbook(&self) -> &Workbook {
        &self.workbook
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// Write to `target`, or back to the opened file
    pub fn save(&mut self, target: Option<&Path>) -> GuardResult<PathBuf> {
        let target = match (target, &self.path) {
            (Some(t), _) => t.to_path_buf(),
            (None, Some(p)) => p.clone(),
            (None, None) => return Err(GuardError::Export("No output path specified".to_string())),
        };
        self.workbook.save(&target)?;
        self.workbook.mark_saved(&target);
        self.path = Some(target.clone());
        Ok(target)
    }

    /// Release the lock, if held
    pub fn close(mut self) -> GuardResult<()> {
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    pub fn add_sheet(&mut self, name: &str, index: Option<usize>) -> GuardResult<()> {
        self.workbook.add_sheet(name, index)?;
        Ok(())
    }

    fn sheet_mut(&mut self, sheet: &str) -> GuardResult<&mut Sheet> {
        self.workbook.sheet_mut(sheet)
    }

    /// Literal value; replaces any formula in the cell
    pub fn set_cell_value(
        &mut self,
        sheet: &str,
        cell: &str,
        value: CellValue,
        style: Option<CellStyle>,
        number_format: Option<&str>,
    ) -> GuardResult<()> {
        let address = parse_cell(cell)?;
        let target = self.sheet_mut(sheet)?.cell_mut(address);
        target.value = value;
        target.formula = None;
        if style.is_some() {
            target.style = style;
        }
        if let Some(format) = number_format {
            target.number_format = Some(format.to_string());
        }
        Ok(())
    }

    /// Sanitize, check references, then write with the Formula style.
    ///
    /// Warnings are fatal unless `allow_dangerous`, in which case they are
    /// returned alongside the written formula.
    pub fn add_formula(
        &mut self,
        sheet: &str,
        cell: &str,
        formula: &str,
        validate_refs: bool,
        allow_dangerous: bool,
    ) -> GuardResult<FormulaWrite> {
        let address = parse_cell(cell)?;
        let sanitized = sanitize_checked(formula, allow_dangerous)?;
        if validate_refs {
            validate_references(&sanitized.formula, &self.workbook)?;
        }

        let target = self.sheet_mut(sheet)?.cell_mut(address);
        target.formula = Some(sanitized.formula.clone());
        target.value = CellValue::Empty;
        target.style = Some(CellStyle::Formula);

        tracing::debug!(sheet, cell = %address, formula = %sanitized.formula, "formula written");
        Ok(FormulaWrite {
            sheet: sheet.to_string(),
            cell: address.to_a1(),
            warnings: sanitized.warning_messages(),
            formula: sanitized.formula,
        })
    }

    /// Numeric input with the Input style and an optional source note
    pub fn add_financial_input(
        &mut self,
        sheet: &str,
        cell: &str,
        value: f64,
        comment: Option<&str>,
        number_format: Option<&str>,
    ) -> GuardResult<()> {
        self.set_cell_value(sheet, cell, value.into(), Some(CellStyle::Input), number_format)?;
        if let Some(comment) = comment {
            self.set_comment(sheet, cell, comment)?;
        }
        Ok(())
    }

    /// Assumption with the Assumption style; the description becomes its note
    pub fn add_assumption(
        &mut self,
        sheet: &str,
        cell: &str,
        value: CellValue,
        description: &str,
        number_format: Option<&str>,
    ) -> GuardResult<()> {
        self.set_cell_value(sheet, cell, value, Some(CellStyle::Assumption), number_format)?;
        self.set_comment(sheet, cell, description)
    }

    fn set_comment(&mut self, sheet: &str, cell: &str, text: &str) -> GuardResult<()> {
        let address = parse_cell(cell)?;
        self.sheet_mut(sheet)?.cell_mut(address).comment = Some(text.to_string());
        Ok(())
    }

    /// Stored value; for formula cells this is the cached result
    pub fn get_value(&self, sheet: &str, cell: &str) -> GuardResult<CellValue> {
        let found = self.workbook.sheet(sheet)?.get_a1(cell)?;
        Ok(found.map(|c| c.value.clone()).unwrap_or_default())
    }

    pub fn cell_info(&self, sheet: &str, cell: &str) -> GuardResult<CellInfo> {
        let address = parse_cell(cell)?;
        let blank = Cell::default();
        let found = self.workbook.sheet(sheet)?.get(&address).unwrap_or(&blank);
        let data_type = if found.is_formula() {
            "formula"
        } else {
            found.value.type_name()
        };
        Ok(CellInfo {
            sheet: sheet.to_string(),
            cell: address.to_a1(),
            value: found.value.clone(),
            data_type: data_type.to_string(),
            is_formula: found.is_formula(),
            formula: found.formula.clone(),
            style: found.style,
            number_format: found.number_format.clone(),
            comment: found.comment.clone(),
        })
    }

    /// Fill a range from a template with `{row}`, `{col}` and `{cell}`
    /// placeholders. Each expanded formula goes through the same checks as
    /// [`Self::add_formula`]; the first failure aborts before any write.
    pub fn apply_range_formula(
        &mut self,
        sheet: &str,
        range: &str,
        template: &str,
    ) -> GuardResult<usize> {
        let range = parse_range(range)?;
        // Fail on a missing sheet before expanding
        self.workbook.sheet(sheet)?;

        let mut expanded: Vec<(CellAddress, String)> = Vec::new();
        for address in range.cells() {
            let column = format_column(address.column())?;
            let formula = template
                .replace("{row}", &address.row().to_string())
                .replace("{col}", &column)
                .replace("{cell}", &address.to_a1());
            let sanitized = sanitize_checked(&formula, false)?;
            validate_references(&sanitized.formula, &self.workbook)?;
            expanded.push((address, sanitized.formula));
        }

        let count = expanded.len();
        let target = self.sheet_mut(sheet)?;
        for (address, formula) in expanded {
            let cell = target.cell_mut(address);
            cell.formula = Some(formula);
            cell.value = CellValue::Empty;
            cell.style = Some(CellStyle::Formula);
        }
        tracing::debug!(sheet, cells = count, "range formula applied");
        Ok(count)
    }

    /// Number format on every cell of `range`
    pub fn format_range(&mut self, sheet: &str, range: &str, number_format: &str) -> GuardResult<usize> {
        let range = parse_range(range)?;
        let target = self.sheet_mut(sheet)?;
        let mut count = 0;
        for address in range.cells() {
            target.cell_mut(address).number_format = Some(number_format.to_string());
            count += 1;
        }
        Ok(count)
    }

    pub fn workbook_info(&self) -> WorkbookInfo {
        let mut total_formulas = 0;
        let mut total_cells_with_data = 0;
        for sheet in self.workbook.sheets() {
            for (_, cell) in sheet.iter() {
                if cell.is_formula() {
                    total_formulas += 1;
                    total_cells_with_data += 1;
                } else if !cell.value.is_empty() {
                    total_cells_with_data += 1;
                }
            }
        }

        let metadata = self.path.as_deref().and_then(|p| std::fs::metadata(p).ok());
        let modified = metadata
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(|t| DateTime::<Local>::from(t).to_rfc3339());

        WorkbookInfo {
            sheets: self.workbook.sheet_names(),
            sheet_count: self.workbook.sheet_count(),
            total_formulas,
            total_cells_with_data,
            file: self.path.clone(),
            file_size_bytes: metadata.map(|m| m.len()),
            modified,
        }
    }
}

/// Build a workbook from a structure document and save it to `output`
pub fn create_workbook_from_structure(
    output: &Path,
    structure: &WorkbookStructure,
    validate: bool,
) -> GuardResult<CreateStats> {
    let mut session = WorkbookSession::create_new(&structure.sheets)?;
    let mut stats = CreateStats {
        file: output.to_path_buf(),
        sheets_created: session.workbook().sheet_count(),
        ..CreateStats::default()
    };

    for def in &structure.cells {
        if let Some(formula) = &def.formula {
            let written = session.add_formula(&def.sheet, &def.cell, formula, true, def.allow_external)?;
            stats.warnings.extend(
                written
                    .warnings
                    .into_iter()
                    .map(|w| format!("{}!{}: {}", written.sheet, written.cell, w)),
            );
            stats.formulas_added += 1;
        } else if let Some(value) = &def.value {
            session.set_cell_value(
                &def.sheet,
                &def.cell,
                value.clone(),
                def.style,
                def.number_format.as_deref(),
            )?;
            stats.cells_set += 1;
        }
    }

    for def in &structure.inputs {
        session.add_financial_input(
            &def.sheet,
            &def.cell,
            def.value,
            def.comment.as_deref(),
            def.number_format.as_deref(),
        )?;
        stats.inputs_added += 1;
    }

    for def in &structure.assumptions {
        session.add_assumption(
            &def.sheet,
            &def.cell,
            def.value.clone(),
            &def.description,
            def.number_format.as_deref(),
        )?;
        stats.assumptions_added += 1;
    }

    session.save(Some(output))?;
    session.close()?;

    if validate {
        stats.validation_result = Some(scan_file(output));
    }
    tracing::info!(path = %output.display(), formulas = stats.formulas_added, "workbook created");
    Ok(stats)
}

/// Write a sheet (or part of it) as CSV; returns the number of rows written.
///
/// Without `range` the sheet's used range is exported, starting at its
/// top-left stored cell.
pub fn export_sheet_to_csv(
    path: &Path,
    sheet: &str,
    output: &Path,
    range: Option<&str>,
) -> GuardResult<usize> {
    let session = WorkbookSession::open(path, false, &GuardConfig::default())?;
    let source = session.workbook().sheet(sheet)?;
    let range = match range {
        Some(text) => Some(parse_range(text)?),
        None => source.used_range(),
    };

    let mut writer = csv::WriterBuilder::new().from_path(output)?;
    let mut rows = 0;
    if let Some(range) = range {
        let (start, end) = range.normalized();
        for row in start.row()..=end.row() {
            let mut record = Vec::with_capacity((end.column() - start.column() + 1) as usize);
            for column in start.column()..=end.column() {
                let address = CellAddress::new(row, column)?;
                record.push(
                    source
                        .get(&address)
                        .map(|c| c.cached_display())
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;

    tracing::info!(sheet, output = %output.display(), rows, "sheet exported to CSV");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::sentinel::ErrorSentinel;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn session() -> WorkbookSession {
        WorkbookSession::create_new(&["Inputs", "Model"]).unwrap()
    }

    #[test]
    fn test_create_new_default_sheet() {
        let empty: [&str; 0] = [];
        let session = WorkbookSession::create_new(&empty).unwrap();
        assert_eq!(session.workbook().sheet_names(), vec!["Sheet1"]);
    }

    #[test]
    fn test_add_formula_normalizes_and_styles() {
        let mut session = session();
        let written = session
            .add_formula("Model", "b2", "Inputs!B2*2", true, false)
            .unwrap();
        assert_eq!(written.cell, "B2");
        assert_eq!(written.formula, "=Inputs!B2*2");
        assert!(written.warnings.is_empty());

        let info = session.cell_info("Model", "B2").unwrap();
        assert!(info.is_formula);
        assert_eq!(info.data_type, "formula");
        assert_eq!(info.style, Some(CellStyle::Formula));
    }

    #[test]
    fn test_add_formula_rejects_dangerous_before_write() {
        let mut session = session();
        let result = session.add_formula("Model", "A1", "=WEBSERVICE(\"http://x\")", true, false);
        assert!(matches!(result, Err(GuardError::SecurityRejected { .. })));
        assert_eq!(session.get_value("Model", "A1").unwrap(), CellValue::Empty);
        assert!(!session.cell_info("Model", "A1").unwrap().is_formula);
    }

    #[test]
    fn test_add_formula_allowed_returns_warnings() {
        let mut session = session();
        let written = session
            .add_formula("Model", "A1", "=HYPERLINK(\"http://x\")", true, true)
            .unwrap();
        assert_eq!(written.warnings.len(), 1);
    }

    #[test]
    fn test_add_formula_missing_reference() {
        let mut session = session();
        match session.add_formula("Model", "A1", "=Data!A1", true, false) {
            Err(GuardError::InvalidReference { sheet }) => assert_eq!(sheet, "Data"),
            other => panic!("expected InvalidReference, got {:?}", other),
        }
        assert!(session.add_formula("Model", "A1", "=Data!A1", false, false).is_ok());
    }

    #[test]
    fn test_write_to_unknown_sheet() {
        let mut session = session();
        assert!(matches!(
            session.add_formula("Outputs", "A1", "=1+1", true, false),
            Err(GuardError::SheetNotFound { .. })
        ));
        assert!(matches!(
            session.set_cell_value("Outputs", "A1", 1.0.into(), None, None),
            Err(GuardError::SheetNotFound { .. })
        ));
    }

    #[test]
    fn test_bad_address_is_invalid_address() {
        let mut session = session();
        assert!(matches!(
            session.set_cell_value("Inputs", "XFE1", 1.0.into(), None, None),
            Err(GuardError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_inputs_and_assumptions() {
        let mut session = session();
        session
            .add_financial_input("Inputs", "B2", 1000.0, Some("FY24"), Some("#,##0"))
            .unwrap();
        session
            .add_assumption("Inputs", "B3", 0.05.into(), "Growth", Some("0.0%"))
            .unwrap();

        let input = session.cell_info("Inputs", "B2").unwrap();
        assert_eq!(input.style, Some(CellStyle::Input));
        assert_eq!(input.comment.as_deref(), Some("FY24"));
        assert_eq!(input.number_format.as_deref(), Some("#,##0"));

        let assumption = session.cell_info("Inputs", "B3").unwrap();
        assert_eq!(assumption.style, Some(CellStyle::Assumption));
        assert_eq!(assumption.comment.as_deref(), Some("Growth"));
        assert_eq!(session.get_value("Inputs", "B3").unwrap(), CellValue::Number(0.05));
    }

    #[test]
    fn test_apply_range_formula_placeholders() {
        let mut session = session();
        let count = session
            .apply_range_formula("Model", "B2:C3", "=Inputs!{col}{row}*2")
            .unwrap();
        assert_eq!(count, 4);
        assert_eq!(
            session.cell_info("Model", "C3").unwrap().formula.as_deref(),
            Some("=Inputs!C3*2")
        );

        session.apply_range_formula("Model", "D2", "{cell}").unwrap();
        assert_eq!(
            session.cell_info("Model", "D2").unwrap().formula.as_deref(),
            Some("=D2")
        );
    }

    #[test]
    fn test_apply_range_formula_is_all_or_nothing() {
        let mut session = session();
        let result = session.apply_range_formula("Model", "A1:A3", "=Missing!A{row}");
        assert!(matches!(result, Err(GuardError::InvalidReference { .. })));
        assert_eq!(session.workbook_info().total_formulas, 0);
    }

    #[test]
    fn test_format_range_reversed_corners() {
        let mut session = session();
        assert_eq!(session.format_range("Inputs", "C3:B2", "0.0%").unwrap(), 4);
        assert_eq!(
            session.cell_info("Inputs", "B3").unwrap().number_format.as_deref(),
            Some("0.0%")
        );
    }

    #[test]
    fn test_workbook_info_counts() {
        let mut session = session();
        session.set_cell_value("Inputs", "A1", "Revenue".into(), None, None).unwrap();
        session.add_formula("Model", "A1", "=1+1", true, false).unwrap();
        session.format_range("Model", "A2:A3", "0%").unwrap();

        let info = session.workbook_info();
        assert_eq!(info.sheet_count, 2);
        assert_eq!(info.total_formulas, 1);
        assert_eq!(info.total_cells_with_data, 2);
        assert!(info.file.is_none());
    }

    #[test]
    fn test_save_requires_target() {
        let mut session = session();
        assert!(matches!(session.save(None), Err(GuardError::Export(_))));
    }

    #[test]
    fn test_open_holds_lock_until_close() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.xlsx");
        session().save(Some(&path)).unwrap();

        let opened = WorkbookSession::open(&path, true, &GuardConfig::default()).unwrap();
        assert!(opened.is_locked());
        let lock_path = FileLock::lock_path_for(&path);
        assert!(lock_path.exists());
        opened.close().unwrap();
        assert!(!lock_path.exists());
    }

    #[test]
    fn test_create_from_structure_and_validate() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("built.xlsx");
        let structure = WorkbookStructure::parse(
            r#"
sheets: [Inputs, Model]
cells:
  - {sheet: Model, cell: A1, value: Revenue}
  - {sheet: Model, cell: B1, formula: "=Inputs!B1*2"}
inputs:
  - {sheet: Inputs, cell: B1, value: 100}
assumptions:
  - {sheet: Inputs, cell: B2, value: 0.1, description: Margin}
"#,
        )
        .unwrap();

        let stats = create_workbook_from_structure(&output, &structure, true).unwrap();
        assert_eq!(stats.sheets_created, 2);
        assert_eq!(stats.formulas_added, 1);
        assert_eq!(stats.cells_set, 1);
        assert_eq!(stats.inputs_added, 1);
        assert_eq!(stats.assumptions_added, 1);
        let report = stats.validation_result.unwrap();
        assert_eq!(report.total_formulas(), 1);
        assert!(report.error_summary().get(&ErrorSentinel::DivZero).is_none());
        assert!(output.exists());
    }

    #[test]
    fn test_export_csv_range_and_used_range() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.xlsx");
        let mut session = WorkbookSession::create_new(&["Data"]).unwrap();
        session.set_cell_value("Data", "A1", "Name".into(), None, None).unwrap();
        session.set_cell_value("Data", "B1", "Amount".into(), None, None).unwrap();
        session.set_cell_value("Data", "A2", "North".into(), None, None).unwrap();
        session.set_cell_value("Data", "B2", 12.0.into(), None, None).unwrap();
        session.save(Some(&path)).unwrap();

        let csv_path = dir.path().join("data.csv");
        let rows = export_sheet_to_csv(&path, "Data", &csv_path, None).unwrap();
        assert_eq!(rows, 2);
        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(text, "Name,Amount\nNorth,12\n");

        let rows = export_sheet_to_csv(&path, "Data", &csv_path, Some("B1:B2")).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(std::fs::read_to_string(&csv_path).unwrap(), "Amount\n12\n");
    }
}
