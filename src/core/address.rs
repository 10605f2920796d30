//! Cell and range addressing
//!
//! Converts A1-style text into 1-indexed (row, column) coordinates and back,
//! enforcing the Excel grid limits.

use crate::error::{GuardError, GuardResult};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Last row of an Excel grid (1-indexed)
pub const MAX_ROWS: u32 = 1_048_576;

/// Last column of an Excel grid (1-indexed, XFD)
pub const MAX_COLS: u32 = 16_384;

/// Maximum length of a sheet name
pub const MAX_SHEET_NAME_LEN: usize = 31;

/// Name used when sanitizing leaves nothing usable
pub const DEFAULT_SHEET_NAME: &str = "Sheet1";

const INVALID_SHEET_CHARS: [char; 7] = [':', '\\', '/', '?', '*', '[', ']'];

/// A single cell coordinate. Both fields are 1-indexed and always within grid limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct CellAddress {
    row: u32,
    column: u32,
}

impl CellAddress {
    /// Build an address from numeric coordinates
    pub fn new(row: u32, column: u32) -> GuardResult<Self> {
        if !(1..=MAX_ROWS).contains(&row) {
            return Err(GuardError::InvalidAddress(format!(
                "Row {} out of range (1-{})",
                row, MAX_ROWS
            )));
        }
        if !(1..=MAX_COLS).contains(&column) {
            return Err(GuardError::InvalidAddress(format!(
                "Column {} out of range (1-{})",
                column, MAX_COLS
            )));
        }
        Ok(Self { row, column })
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn column(&self) -> u32 {
        self.column
    }

    /// Render as A1 text (e.g. `BZ5000`)
    pub fn to_a1(&self) -> String {
        // column is bounded at construction, so formatting cannot fail
        format!("{}{}", column_letters(self.column), self.row)
    }
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_a1())
    }
}

impl FromStr for CellAddress {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cell(s)
    }
}

/// A rectangular block between two corners.
///
/// Corners are stored exactly as given; `A5:A1` keeps `start = A5`.
/// Use [`RangeAddress::normalized`] for top-left/bottom-right corners,
/// and [`RangeAddress::cells`] iterates row-major in either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RangeAddress {
    pub start: CellAddress,
    pub end: CellAddress,
}

impl RangeAddress {
    pub fn new(start: CellAddress, end: CellAddress) -> Self {
        Self { start, end }
    }

    /// Top-left and bottom-right corners
    pub fn normalized(&self) -> (CellAddress, CellAddress) {
        let top_left = CellAddress {
            row: self.start.row.min(self.end.row),
            column: self.start.column.min(self.end.column),
        };
        let bottom_right = CellAddress {
            row: self.start.row.max(self.end.row),
            column: self.start.column.max(self.end.column),
        };
        (top_left, bottom_right)
    }

    pub fn row_count(&self) -> u32 {
        let (tl, br) = self.normalized();
        br.row - tl.row + 1
    }

    pub fn column_count(&self) -> u32 {
        let (tl, br) = self.normalized();
        br.column - tl.column + 1
    }

    /// Every cell of the range in row-major order
    pub fn cells(&self) -> impl Iterator<Item = CellAddress> {
        let (tl, br) = self.normalized();
        (tl.row..=br.row)
            .flat_map(move |row| (tl.column..=br.column).map(move |column| CellAddress { row, column }))
    }

    pub fn contains(&self, cell: &CellAddress) -> bool {
        let (tl, br) = self.normalized();
        (tl.row..=br.row).contains(&cell.row) && (tl.column..=br.column).contains(&cell.column)
    }
}

impl fmt::Display for RangeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

//==============================================================================
// Parsing
//==============================================================================

/// Split `text` into its letter and digit runs, checking the A1 grammar:
/// 1-3 letters followed by 1-7 digits and nothing else.
fn split_a1(text: &str) -> Option<(&str, &str)> {
    let letters_end = text
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let (letters, digits) = text.split_at(letters_end);

    if !(1..=3).contains(&letters.len()) || !(1..=7).contains(&digits.len()) {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((letters, digits))
}

/// Decode column letters (case-insensitive) into a 1-indexed column number.
///
/// Base-26 without a zero digit: A=1 ... Z=26, AA=27.
pub fn column_index(letters: &str) -> GuardResult<u32> {
    if letters.is_empty() || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(GuardError::InvalidAddress(format!(
            "Invalid column letters: {}",
            letters
        )));
    }
    let mut column: u64 = 0;
    for b in letters.to_ascii_uppercase().bytes() {
        column = column * 26 + u64::from(b - b'A' + 1);
        if column > u64::from(MAX_COLS) {
            return Err(GuardError::InvalidAddress(format!(
                "Column {} out of range (max {})",
                letters, MAX_COLS
            )));
        }
    }
    Ok(column as u32)
}

fn column_letters(mut column: u32) -> String {
    let mut letters = Vec::with_capacity(3);
    while column > 0 {
        let remainder = (column - 1) % 26;
        letters.push(b'A' + remainder as u8);
        column = (column - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Convert a 1-indexed column number to letters (1 → A, 27 → AA, 16384 → XFD)
pub fn format_column(column: u32) -> GuardResult<String> {
    if !(1..=MAX_COLS).contains(&column) {
        return Err(GuardError::InvalidAddress(format!(
            "Column number {} out of range (1-{})",
            column, MAX_COLS
        )));
    }
    Ok(column_letters(column))
}

/// Parse an A1-style cell reference such as `B7` or `xfd1048576`
pub fn parse_cell(text: &str) -> GuardResult<CellAddress> {
    let upper = text.trim().to_ascii_uppercase();
    let (letters, digits) = split_a1(&upper)
        .ok_or_else(|| GuardError::InvalidAddress(format!("Invalid cell reference: {}", text)))?;

    let column = column_index(letters)
        .map_err(|_| GuardError::InvalidAddress(format!("Reference out of bounds: {}", text)))?;
    // At most 7 digits, always fits in u32
    let row: u32 = digits
        .parse()
        .map_err(|_| GuardError::InvalidAddress(format!("Invalid row in reference: {}", text)))?;

    if row == 0 || row > MAX_ROWS {
        return Err(GuardError::InvalidAddress(format!(
            "Reference out of bounds: {}",
            text
        )));
    }

    Ok(CellAddress { row, column })
}

/// Parse `A1:B10`, `A1` or `Sheet!A1:B10`.
///
/// A leading sheet qualifier is discarded without validation.
pub fn parse_range(text: &str) -> GuardResult<RangeAddress> {
    let body = match text.rsplit_once('!') {
        Some((_, body)) => body,
        None => text,
    };

    match body.split_once(':') {
        Some((start, end)) => Ok(RangeAddress::new(parse_cell(start)?, parse_cell(end)?)),
        None => {
            let cell = parse_cell(body)?;
            Ok(RangeAddress::new(cell, cell))
        }
    }
}

/// True when `text` parses as an in-bounds cell reference
pub fn is_valid_cell_reference(text: &str) -> bool {
    parse_cell(text).is_ok()
}

/// True when `text` parses as an in-bounds range (optionally sheet-qualified)
pub fn is_valid_range_reference(text: &str) -> bool {
    !text.is_empty() && text.matches('!').count() <= 1 && parse_range(text).is_ok()
}

//==============================================================================
// Sheet names
//==============================================================================

/// Excel sheet name rules: 1-31 characters, none of `: \ / ? * [ ]`
pub fn is_valid_sheet_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= MAX_SHEET_NAME_LEN
        && !name.contains(&INVALID_SHEET_CHARS[..])
}

/// Replace forbidden characters with `_` and truncate to 31 characters
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if INVALID_SHEET_CHARS.contains(&c) { '_' } else { c })
        .take(MAX_SHEET_NAME_LEN)
        .collect();

    if cleaned.is_empty() {
        DEFAULT_SHEET_NAME.to_string()
    } else {
        cleaned
    }
}
