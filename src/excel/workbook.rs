//! In-memory workbook model
//!
//! Sheets keep their declared order; cells within a sheet are keyed by
//! [`CellAddress`], whose ordering is (row, column), so iteration is
//! row-major without any sorting.
//!
//! A workbook loaded from disk remembers its file and which cells changed,
//! so saving patches that package instead of regenerating it.

use crate::core::address::{CellAddress, RangeAddress};
use crate::core::references::SheetCatalog;
use crate::core::{is_valid_sheet_name, parse_cell};
use crate::error::{GuardError, GuardResult};
use crate::excel::styles::CellStyle;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

/// A literal cell value, or the cached result of a formula
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Bool(bool),
    Text(String),
    /// Error literal as stored in the file, e.g. `#DIV/0!`
    #[serde(skip_deserializing)]
    Error(String),
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Text as a spreadsheet would display it
    pub fn display(&self) -> String {
        match self {
            CellValue::Empty => String::new(),
            CellValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Text(s) => s.clone(),
            CellValue::Error(e) => e.clone(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Number(_) => "number",
            CellValue::Bool(_) => "boolean",
            CellValue::Text(_) => "string",
            CellValue::Error(_) => "error",
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

/// One grid cell
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Cell {
    /// Literal value, or the last cached result when `formula` is set
    pub value: CellValue,
    /// Formula text including the leading `=`
    pub formula: Option<String>,
    pub style: Option<CellStyle>,
    pub number_format: Option<String>,
    pub comment: Option<String>,
}

impl Cell {
    pub fn value(value: impl Into<CellValue>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    /// Formula cell with a cached result
    pub fn formula(formula: impl Into<String>, cached: CellValue) -> Self {
        let formula = formula.into();
        let formula = if formula.starts_with('=') {
            formula
        } else {
            format!("={}", formula)
        };
        Self {
            value: cached,
            formula: Some(formula),
            ..Self::default()
        }
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Cached display value (the value for plain cells)
    pub fn cached_display(&self) -> String {
        self.value.display()
    }

    /// True when nothing would be written for this cell
    pub fn is_blank(&self) -> bool {
        self.value.is_empty()
            && self.formula.is_none()
            && self.style.is_none()
            && self.number_format.is_none()
            && self.comment.is_none()
    }
}

/// A named worksheet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<CellAddress, Cell>,
    /// Cells changed since the last load or save
    edits: BTreeSet<CellAddress>,
    /// Not yet part of the file the workbook was loaded from
    added: bool,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
            edits: BTreeSet::new(),
            added: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, address: &CellAddress) -> Option<&Cell> {
        self.cells.get(address)
    }

    /// Look up by A1 text
    pub fn get_a1(&self, reference: &str) -> GuardResult<Option<&Cell>> {
        Ok(self.cells.get(&parse_cell(reference)?))
    }

    pub fn get_mut(&mut self, address: &CellAddress) -> Option<&mut Cell> {
        let cell = self.cells.get_mut(address)?;
        self.edits.insert(*address);
        Some(cell)
    }

    /// Existing cell or a new blank one at `address`
    pub fn cell_mut(&mut self, address: CellAddress) -> &mut Cell {
        self.edits.insert(address);
        self.cells.entry(address).or_default()
    }

    pub fn set(&mut self, address: CellAddress, cell: Cell) {
        self.edits.insert(address);
        if cell.is_blank() {
            self.cells.remove(&address);
        } else {
            self.cells.insert(address, cell);
        }
    }

    /// Cells in row-major order
    pub fn iter(&self) -> impl Iterator<Item = (CellAddress, &Cell)> {
        self.cells.iter().map(|(a, c)| (*a, c))
    }

    /// Changes made through this are not tracked; see [`Sheet::mark_dirty`]
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (CellAddress, &mut Cell)> {
        self.cells.iter_mut().map(|(a, c)| (*a, c))
    }

    /// Record a change made through [`Sheet::iter_mut`]
    pub fn mark_dirty(&mut self, address: CellAddress) {
        self.edits.insert(address);
    }

    /// Cells changed since the last load or save, row-major
    pub fn edits(&self) -> impl Iterator<Item = &CellAddress> {
        self.edits.iter()
    }

    pub fn has_edits(&self) -> bool {
        !self.edits.is_empty()
    }

    /// True until the sheet has been written to the workbook's file
    pub fn is_added(&self) -> bool {
        self.added
    }

    fn mark_clean(&mut self) {
        self.edits.clear();
        self.added = false;
    }

    pub fn formula_cells(&self) -> impl Iterator<Item = (CellAddress, &Cell)> {
        self.iter().filter(|(_, c)| c.is_formula())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Smallest range covering every stored cell
    pub fn used_range(&self) -> Option<RangeAddress> {
        let first = self.cells.keys().next()?;
        let (mut min_row, mut max_row) = (first.row(), first.row());
        let (mut min_col, mut max_col) = (first.column(), first.column());
        for address in self.cells.keys() {
            min_row = min_row.min(address.row());
            max_row = max_row.max(address.row());
            min_col = min_col.min(address.column());
            max_col = max_col.max(address.column());
        }
        let start = CellAddress::new(min_row, min_col).ok()?;
        let end = CellAddress::new(max_row, max_col).ok()?;
        Some(RangeAddress::new(start, end))
    }
}

/// Ordered collection of sheets
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    /// Package the sheets were loaded from; `None` for workbooks built in memory
    source: Option<PathBuf>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Workbook with the given (validated) sheets in order
    pub fn with_sheets<S: AsRef<str>>(names: &[S]) -> GuardResult<Self> {
        let mut workbook = Self::new();
        for name in names {
            workbook.add_sheet(name.as_ref(), None)?;
        }
        Ok(workbook)
    }

    /// Read an `.xlsx` file
    pub fn load(path: &Path) -> GuardResult<Self> {
        super::WorkbookImporter::new(path).load()
    }

    /// Write an `.xlsx` file.
    ///
    /// A workbook loaded from disk is written by patching its source package,
    /// so formatting and parts the model does not read carry over. Workbooks
    /// built in memory are generated from scratch.
    pub fn save(&self, path: &Path) -> GuardResult<()> {
        match &self.source {
            Some(source) if source.is_file() => super::PackagePatcher::new(source).apply(self, path),
            Some(source) => {
                tracing::warn!(
                    source = %source.display(),
                    "source workbook is gone; writing a new package"
                );
                super::WorkbookExporter::new(self).save(path)
            }
            None => super::WorkbookExporter::new(self).save(path),
        }
    }

    /// File this workbook is patched against on save
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Record a successful [`Workbook::save`] to `path`.
    ///
    /// Clears edit marks; a loaded workbook patches `path` from now on.
    pub fn mark_saved(&mut self, path: &Path) {
        if self.source.is_some() {
            self.source = Some(path.to_path_buf());
        }
        self.sheets.iter_mut().for_each(Sheet::mark_clean);
    }

    /// Tie the workbook to the package it was just read from
    pub(crate) fn attach_source(&mut self, path: &Path) {
        self.source = Some(path.to_path_buf());
        self.sheets.iter_mut().for_each(Sheet::mark_clean);
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|s| s.name.clone()).collect()
    }

    pub fn sheets(&self) -> impl Iterator<Item = &Sheet> {
        self.sheets.iter()
    }

    pub fn sheets_mut(&mut self) -> impl Iterator<Item = &mut Sheet> {
        self.sheets.iter_mut()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    pub fn sheet(&self, name: &str) -> GuardResult<&Sheet> {
        match self.sheets.iter().position(|s| s.name == name) {
            Some(idx) => Ok(&self.sheets[idx]),
            None => Err(self.not_found(name)),
        }
    }

    pub fn sheet_mut(&mut self, name: &str) -> GuardResult<&mut Sheet> {
        match self.sheets.iter().position(|s| s.name == name) {
            Some(idx) => Ok(&mut self.sheets[idx]),
            None => Err(self.not_found(name)),
        }
    }

    /// Insert a new sheet at `index` (appended when `None` or past the end)
    pub fn add_sheet(&mut self, name: &str, index: Option<usize>) -> GuardResult<&mut Sheet> {
        if !is_valid_sheet_name(name) {
            return Err(GuardError::InvalidSheetName(name.to_string()));
        }
        if self.contains_sheet(name) {
            return Err(GuardError::SheetExists(name.to_string()));
        }
        let idx = index.unwrap_or(self.sheets.len()).min(self.sheets.len());
        self.sheets.insert(idx, Sheet::new(name));
        Ok(&mut self.sheets[idx])
    }

    /// Sheet pushed as-is, used by the importer for names already accepted by Excel
    pub(crate) fn push_sheet(&mut self, sheet: Sheet) {
        self.sheets.push(sheet);
    }

    fn not_found(&self, name: &str) -> GuardError {
        GuardError::SheetNotFound {
            name: name.to_string(),
            available: self.sheet_names(),
        }
    }
}

impl SheetCatalog for Workbook {
    fn contains_sheet(&self, name: &str) -> bool {
        self.sheets.iter().any(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(text: &str) -> CellAddress {
        parse_cell(text).unwrap()
    }

    #[test]
    fn test_sheet_iterates_row_major() {
        let mut sheet = Sheet::new("Data");
        sheet.set(addr("B2"), Cell::value(4.0));
        sheet.set(addr("A2"), Cell::value(3.0));
        sheet.set(addr("B1"), Cell::value(2.0));
        sheet.set(addr("A1"), Cell::value(1.0));

        let order: Vec<String> = sheet.iter().map(|(a, _)| a.to_a1()).collect();
        assert_eq!(order, vec!["A1", "B1", "A2", "B2"]);
    }

    #[test]
    fn test_blank_cell_removes_entry() {
        let mut sheet = Sheet::new("Data");
        sheet.set(addr("C3"), Cell::value("x"));
        assert_eq!(sheet.len(), 1);
        sheet.set(addr("C3"), Cell::default());
        assert!(sheet.is_empty());
    }

    #[test]
    fn test_used_range() {
        let mut sheet = Sheet::new("Data");
        assert!(sheet.used_range().is_none());
        sheet.set(addr("C2"), Cell::value(1.0));
        sheet.set(addr("A5"), Cell::value(1.0));
        assert_eq!(sheet.used_range().unwrap().to_string(), "A2:C5");
    }

    #[test]
    fn test_formula_cell_normalizes_equals() {
        let cell = Cell::formula("A1/B1", CellValue::Error("#DIV/0!".to_string()));
        assert_eq!(cell.formula.as_deref(), Some("=A1/B1"));
        assert_eq!(cell.cached_display(), "#DIV/0!");
        assert!(cell.is_formula());
    }

    #[test]
    fn test_add_sheet_rules() {
        let mut workbook = Workbook::with_sheets(&["Inputs", "Model"]).unwrap();
        assert!(matches!(
            workbook.add_sheet("Inputs", None),
            Err(GuardError::SheetExists(_))
        ));
        assert!(matches!(
            workbook.add_sheet("Bad/Name", None),
            Err(GuardError::InvalidSheetName(_))
        ));
        workbook.add_sheet("Cover", Some(0)).unwrap();
        assert_eq!(workbook.sheet_names(), vec!["Cover", "Inputs", "Model"]);
    }

    #[test]
    fn test_missing_sheet_lists_available() {
        let workbook = Workbook::with_sheets(&["Inputs"]).unwrap();
        match workbook.sheet("Outputs") {
            Err(GuardError::SheetNotFound { name, available }) => {
                assert_eq!(name, "Outputs");
                assert_eq!(available, vec!["Inputs"]);
            }
            other => panic!("expected SheetNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_edits_are_tracked_until_saved() {
        let mut workbook = Workbook::with_sheets(&["Data"]).unwrap();
        let sheet = workbook.sheet_mut("Data").unwrap();
        assert!(sheet.is_added());
        sheet.set(addr("A1"), Cell::value(1.0));
        sheet.cell_mut(addr("B2")).value = CellValue::Number(2.0);
        let first = sheet.iter_mut().next().map(|(address, cell)| {
            cell.value = CellValue::Number(3.0);
            address
        });
        if let Some(address) = first {
            sheet.mark_dirty(address);
        }
        let edits: Vec<String> = sheet.edits().map(|a| a.to_a1()).collect();
        assert_eq!(edits, vec!["A1", "B2"]);

        workbook.mark_saved(Path::new("out.xlsx"));
        let sheet = workbook.sheet("Data").unwrap();
        assert!(!sheet.has_edits());
        assert!(!sheet.is_added());
        assert_eq!(workbook.source(), None, "generated workbooks stay unattached");
    }

    #[test]
    fn test_attached_workbook_follows_saves() {
        let mut workbook = Workbook::with_sheets(&["Data"]).unwrap();
        workbook.attach_source(Path::new("model.xlsx"));
        assert!(!workbook.sheet("Data").unwrap().is_added());
        workbook.add_sheet("Later", None).unwrap();
        assert!(workbook.sheet("Later").unwrap().is_added());

        workbook.mark_saved(Path::new("copy.xlsx"));
        assert_eq!(workbook.source(), Some(Path::new("copy.xlsx")));
        assert!(!workbook.sheet("Later").unwrap().is_added());
    }

    #[test]
    fn test_value_display() {
        assert_eq!(CellValue::Number(10.0).display(), "10");
        assert_eq!(CellValue::Number(2.5).display(), "2.5");
        assert_eq!(CellValue::Bool(true).display(), "TRUE");
        assert_eq!(CellValue::Empty.display(), "");
    }
}
