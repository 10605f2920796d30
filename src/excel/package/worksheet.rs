//! Worksheet part rewriting
//!
//! Events are streamed through unchanged except for patched `<c>` elements,
//! which are written fresh from the model. Cells and rows the part does not
//! have yet are inserted in row-major position.

use super::{attr, emit, xml_failed};
use crate::core::address::{parse_cell, CellAddress, MAX_COLS};
use crate::error::GuardResult;
use crate::excel::workbook::{Cell, CellValue};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::BTreeMap;
use std::io::Write;

/// Minimal worksheet part for a sheet added to an existing package
pub(super) const EMPTY_WORKSHEET: &str = concat!(
    r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
    "\n",
    r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
    r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
    "<sheetData/></worksheet>"
);

/// New content for one cell
#[derive(Debug, Clone, Copy)]
pub(super) struct CellPatch<'a> {
    /// `None` removes the cell element
    pub cell: Option<&'a Cell>,
    /// New `s` attribute; `None` keeps the existing one
    pub style: Option<u32>,
}

pub(super) type Patches<'a> = BTreeMap<CellAddress, CellPatch<'a>>;

/// What the rewrite needs to know about a part before touching it
#[derive(Debug, Default)]
pub(super) struct WorksheetScan {
    /// Existing `s` attribute per cell
    pub styles: BTreeMap<CellAddress, u32>,
    /// Shared formula group id per member cell, and whether the cell anchors it
    pub shared: BTreeMap<CellAddress, (String, bool)>,
}

impl WorksheetScan {
    /// Members of shared formula groups whose anchor is in `edited`.
    ///
    /// Once the anchor is rewritten the members lose their formula text, so
    /// they must be written out in full as well.
    pub fn orphaned_by<'e>(
        &self,
        edited: impl IntoIterator<Item = &'e CellAddress>,
    ) -> Vec<CellAddress> {
        let groups: Vec<&str> = edited
            .into_iter()
            .filter_map(|address| self.shared.get(address))
            .filter(|(_, anchor)| *anchor)
            .map(|(si, _)| si.as_str())
            .collect();
        self.shared
            .iter()
            .filter(|(_, (si, anchor))| !anchor && groups.contains(&si.as_str()))
            .map(|(address, _)| *address)
            .collect()
    }
}

fn cell_ref(e: &BytesStart<'_>) -> Option<CellAddress> {
    attr(e, b"r").and_then(|r| parse_cell(&r).ok())
}

fn row_number(e: &BytesStart<'_>) -> Option<u32> {
    attr(e, b"r").and_then(|r| r.parse().ok())
}

pub(super) fn scan(xml: &str) -> GuardResult<WorksheetScan> {
    let mut reader = Reader::from_str(xml);
    let mut scan = WorksheetScan::default();
    let mut current: Option<CellAddress> = None;

    loop {
        match reader.read_event().map_err(xml_failed)? {
            Event::Start(e) if e.name().as_ref() == b"c" => {
                current = cell_ref(&e);
                record_style(&mut scan, current, &e);
            }
            Event::Empty(e) if e.name().as_ref() == b"c" => {
                record_style(&mut scan, cell_ref(&e), &e);
                current = None;
            }
            Event::End(e) if e.name().as_ref() == b"c" => current = None,
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"f" => {
                let Some(address) = current else { continue };
                if attr(&e, b"t").as_deref() != Some("shared") {
                    continue;
                }
                if let Some(si) = attr(&e, b"si") {
                    let anchor = attr(&e, b"ref").is_some();
                    scan.shared.insert(address, (si, anchor));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(scan)
}

fn record_style(scan: &mut WorksheetScan, address: Option<CellAddress>, e: &BytesStart<'_>) {
    let style = attr(e, b"s").and_then(|s| s.parse().ok());
    if let (Some(address), Some(style)) = (address, style) {
        scan.styles.insert(address, style);
    }
}

/// Patch cells in a worksheet part
pub(super) fn rewrite(xml: &str, patches: &Patches<'_>) -> GuardResult<Vec<u8>> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 256));
    let mut pending: Patches<'_> = patches.clone();
    let mut in_sheet_data = false;
    let mut current_row: Option<u32> = None;
    // Depth inside a replaced cell whose original children are dropped
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_failed)?;
        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(e) if e.name().as_ref() == b"sheetData" => {
                emit(&mut writer, Event::Start(e))?;
                in_sheet_data = true;
            }
            Event::Empty(e) if e.name().as_ref() == b"sheetData" => {
                emit(&mut writer, Event::Start(e))?;
                write_rows(&mut writer, take_rows_before(&mut pending, None))?;
                emit(&mut writer, Event::End(BytesEnd::new("sheetData")))?;
            }
            Event::End(e) if e.name().as_ref() == b"sheetData" => {
                write_rows(&mut writer, take_rows_before(&mut pending, None))?;
                in_sheet_data = false;
                emit(&mut writer, Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && e.name().as_ref() == b"row" => {
                let row = row_number(&e);
                if let Some(row) = row {
                    write_rows(&mut writer, take_rows_before(&mut pending, Some(row)))?;
                }
                emit(&mut writer, Event::Start(e))?;
                current_row = row;
            }
            Event::Empty(e) if in_sheet_data && e.name().as_ref() == b"row" => {
                let Some(row) = row_number(&e) else {
                    emit(&mut writer, Event::Empty(e))?;
                    continue;
                };
                write_rows(&mut writer, take_rows_before(&mut pending, Some(row)))?;
                let cells = take_cells(&mut pending, row, MAX_COLS + 1)?;
                if cells.iter().any(|(_, patch)| patch.cell.is_some()) {
                    emit(&mut writer, Event::Start(e))?;
                    write_new_cells(&mut writer, cells)?;
                    emit(&mut writer, Event::End(BytesEnd::new("row")))?;
                } else {
                    emit(&mut writer, Event::Empty(e))?;
                }
            }
            Event::End(e) if in_sheet_data && e.name().as_ref() == b"row" => {
                if let Some(row) = current_row.take() {
                    let rest = take_cells(&mut pending, row, MAX_COLS + 1)?;
                    write_new_cells(&mut writer, rest)?;
                }
                emit(&mut writer, Event::End(e))?;
            }
            Event::Start(e) if in_sheet_data && e.name().as_ref() == b"c" => {
                let address = cell_ref(&e);
                insert_before(&mut writer, &mut pending, current_row, address)?;
                match address.and_then(|a| pending.remove(&a).map(|p| (a, p))) {
                    Some((address, patch)) => {
                        write_cell(&mut writer, address, Some(&e), &patch)?;
                        skip_depth = 1;
                    }
                    None => emit(&mut writer, Event::Start(e))?,
                }
            }
            Event::Empty(e) if in_sheet_data && e.name().as_ref() == b"c" => {
                let address = cell_ref(&e);
                insert_before(&mut writer, &mut pending, current_row, address)?;
                match address.and_then(|a| pending.remove(&a).map(|p| (a, p))) {
                    Some((address, patch)) => write_cell(&mut writer, address, Some(&e), &patch)?,
                    None => emit(&mut writer, Event::Empty(e))?,
                }
            }
            Event::Eof => break,
            other => emit(&mut writer, other)?,
        }
    }

    if !pending.is_empty() {
        tracing::warn!(cells = pending.len(), "worksheet has no sheetData; edits dropped");
    }
    Ok(writer.into_inner())
}

/// New cells of the current row that sort before `address`
fn insert_before<W: Write>(
    writer: &mut Writer<W>,
    pending: &mut Patches<'_>,
    row: Option<u32>,
    address: Option<CellAddress>,
) -> GuardResult<()> {
    if let (Some(row), Some(address)) = (row, address) {
        if address.row() == row {
            let before = take_cells(pending, row, address.column())?;
            write_new_cells(writer, before)?;
        }
    }
    Ok(())
}

/// Pending cells in `row` with a column below `before_column`
fn take_cells<'a>(
    pending: &mut Patches<'a>,
    row: u32,
    before_column: u32,
) -> GuardResult<Vec<(CellAddress, CellPatch<'a>)>> {
    let start = CellAddress::new(row, 1)?;
    let keys: Vec<CellAddress> = pending
        .range(start..)
        .take_while(|(a, _)| a.row() == row && a.column() < before_column)
        .map(|(a, _)| *a)
        .collect();
    Ok(keys
        .into_iter()
        .filter_map(|a| pending.remove(&a).map(|p| (a, p)))
        .collect())
}

/// Pending cells in rows before `row` (all of them for `None`), grouped by row
fn take_rows_before<'a>(
    pending: &mut Patches<'a>,
    row: Option<u32>,
) -> BTreeMap<u32, Vec<(CellAddress, CellPatch<'a>)>> {
    let keys: Vec<CellAddress> = pending
        .keys()
        .take_while(|a| row.map_or(true, |r| a.row() < r))
        .copied()
        .collect();
    let mut rows: BTreeMap<u32, Vec<(CellAddress, CellPatch<'a>)>> = BTreeMap::new();
    for address in keys {
        if let Some(patch) = pending.remove(&address) {
            rows.entry(address.row()).or_default().push((address, patch));
        }
    }
    rows
}

fn write_rows<W: Write>(
    writer: &mut Writer<W>,
    rows: BTreeMap<u32, Vec<(CellAddress, CellPatch<'_>)>>,
) -> GuardResult<()> {
    for (row, cells) in rows {
        if cells.iter().all(|(_, patch)| patch.cell.is_none()) {
            continue;
        }
        let number = row.to_string();
        let mut start = BytesStart::new("row");
        start.push_attribute(("r", number.as_str()));
        emit(writer, Event::Start(start))?;
        write_new_cells(writer, cells)?;
        emit(writer, Event::End(BytesEnd::new("row")))?;
    }
    Ok(())
}

fn write_new_cells<W: Write>(
    writer: &mut Writer<W>,
    cells: Vec<(CellAddress, CellPatch<'_>)>,
) -> GuardResult<()> {
    for (address, patch) in cells {
        write_cell(writer, address, None, &patch)?;
    }
    Ok(())
}

enum Payload {
    Value(String),
    Inline(String),
}

/// Cell type attribute and stored content for a value
fn encode(cell: &Cell) -> (Option<&'static str>, Option<Payload>) {
    match &cell.value {
        CellValue::Empty => (None, None),
        CellValue::Number(n) if n.is_finite() => (None, Some(Payload::Value(n.to_string()))),
        CellValue::Number(_) => (Some("e"), Some(Payload::Value("#NUM!".to_string()))),
        CellValue::Bool(b) => (Some("b"), Some(Payload::Value(if *b { "1" } else { "0" }.to_string()))),
        CellValue::Text(s) if cell.is_formula() => (Some("str"), Some(Payload::Value(s.clone()))),
        CellValue::Text(s) => (Some("inlineStr"), Some(Payload::Inline(s.clone()))),
        CellValue::Error(e) => (Some("e"), Some(Payload::Value(e.clone()))),
    }
}

/// One `<c>` from the model, keeping the original's other attributes
fn write_cell<W: Write>(
    writer: &mut Writer<W>,
    address: CellAddress,
    original: Option<&BytesStart<'_>>,
    patch: &CellPatch<'_>,
) -> GuardResult<()> {
    let Some(cell) = patch.cell else {
        return Ok(());
    };
    let (kind, payload) = encode(cell);

    let reference = address.to_a1();
    let mut start = BytesStart::new("c");
    start.push_attribute(("r", reference.as_str()));
    let style = patch
        .style
        .map(|s| s.to_string())
        .or_else(|| original.and_then(|e| attr(e, b"s")));
    if let Some(style) = &style {
        start.push_attribute(("s", style.as_str()));
    }
    if let Some(kind) = kind {
        start.push_attribute(("t", kind));
    }
    if let Some(original) = original {
        // Value metadata and the type describe the old content
        for a in original.attributes().flatten() {
            if !matches!(a.key.as_ref(), b"r" | b"s" | b"t" | b"cm" | b"vm") {
                start.push_attribute(a);
            }
        }
    }

    let formula = cell
        .formula
        .as_deref()
        .map(|f| f.strip_prefix('=').unwrap_or(f));
    if formula.is_none() && payload.is_none() {
        return emit(writer, Event::Empty(start));
    }

    emit(writer, Event::Start(start))?;
    if let Some(formula) = formula {
        text_element(writer, BytesStart::new("f"), formula)?;
    }
    match payload {
        Some(Payload::Value(text)) => text_element(writer, BytesStart::new("v"), &text)?,
        Some(Payload::Inline(text)) => {
            emit(writer, Event::Start(BytesStart::new("is")))?;
            let mut t = BytesStart::new("t");
            t.push_attribute(("xml:space", "preserve"));
            text_element(writer, t, &text)?;
            emit(writer, Event::End(BytesEnd::new("is")))?;
        }
        None => {}
    }
    emit(writer, Event::End(BytesEnd::new("c")))
}

fn text_element<W: Write>(writer: &mut Writer<W>, start: BytesStart<'_>, text: &str) -> GuardResult<()> {
    let end = BytesEnd::new(String::from_utf8_lossy(start.name().as_ref()).into_owned());
    emit(writer, Event::Start(start))?;
    emit(writer, Event::Text(BytesText::new(text)))?;
    emit(writer, Event::End(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse_cell;

    const SHEET: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main">"#,
        r#"<cols><col min="1" max="1" width="18.5" customWidth="1"/></cols>"#,
        r#"<sheetData>"#,
        r#"<row r="1" spans="1:2"><c r="A1" s="3"><v>1000</v></c><c r="B1" s="1" t="e"><f>A1/0</f><v>#DIV/0!</v></c></row>"#,
        r#"<row r="3"><c r="A3"><v>5</v></c></row>"#,
        r#"</sheetData>"#,
        r#"<mergeCells count="1"><mergeCell ref="C5:D5"/></mergeCells>"#,
        r#"</worksheet>"#
    );

    fn addr(a1: &str) -> CellAddress {
        parse_cell(a1).unwrap()
    }

    fn rewritten(patches: &Patches<'_>) -> String {
        String::from_utf8(rewrite(SHEET, patches).unwrap()).unwrap()
    }

    #[test]
    fn test_replaces_only_the_patched_cell() {
        let repaired = Cell::formula("=IFERROR(A1/0, 0)", CellValue::Number(0.0));
        let patches: Patches<'_> = [(addr("B1"), CellPatch { cell: Some(&repaired), style: None })]
            .into_iter()
            .collect();

        let xml = rewritten(&patches);
        assert!(xml.contains(r#"<c r="A1" s="3"><v>1000</v></c>"#), "{}", xml);
        assert!(xml.contains(r#"<c r="B1" s="1"><f>IFERROR(A1/0, 0)</f><v>0</v></c>"#), "{}", xml);
        assert!(!xml.contains("#DIV/0!"));
        assert!(xml.contains(r#"<col min="1" max="1" width="18.5" customWidth="1"/>"#));
        assert!(xml.contains(r#"<mergeCell ref="C5:D5"/>"#));
    }

    #[test]
    fn test_inserts_cells_and_rows_in_order() {
        let text = Cell::value("Total");
        let number = Cell::value(2.5);
        let formula = Cell::formula("=A1&A3", CellValue::Text("10005".to_string()));
        let patches: Patches<'_> = [
            (addr("C1"), CellPatch { cell: Some(&number), style: Some(7) }),
            (addr("A2"), CellPatch { cell: Some(&text), style: None }),
            (addr("B3"), CellPatch { cell: Some(&formula), style: None }),
            (addr("A9"), CellPatch { cell: Some(&number), style: None }),
        ]
        .into_iter()
        .collect();

        let xml = rewritten(&patches);
        let c1 = xml.find(r#"<c r="C1" s="7"><v>2.5</v></c>"#).expect("C1 appended to row 1");
        let row2 = xml.find(r#"<row r="2"><c r="A2" t="inlineStr"><is><t xml:space="preserve">Total</t></is></c></row>"#)
            .expect("row 2 created");
        let row3 = xml.find(r#"<row r="3">"#).unwrap();
        let b3 = xml
            .find(r#"<c r="B3" t="str"><f>A1&amp;A3</f><v>10005</v></c>"#)
            .expect("B3 after A3");
        let row9 = xml.find(r#"<row r="9">"#).expect("row 9 appended");
        assert!(c1 < row2 && row2 < row3 && row3 < b3 && b3 < row9, "{}", xml);
    }

    #[test]
    fn test_removed_cell_is_dropped() {
        let patches: Patches<'_> = [(addr("A3"), CellPatch { cell: None, style: None })]
            .into_iter()
            .collect();
        let xml = rewritten(&patches);
        assert!(!xml.contains(r#"r="A3""#));
        assert!(xml.contains(r#"<row r="3"></row>"#));
    }

    #[test]
    fn test_empty_sheet_data_gets_rows() {
        let value = Cell::value(true);
        let patches: Patches<'_> = [(addr("B2"), CellPatch { cell: Some(&value), style: None })]
            .into_iter()
            .collect();
        let xml = String::from_utf8(rewrite(EMPTY_WORKSHEET, &patches).unwrap()).unwrap();
        assert!(xml.contains(r#"<sheetData><row r="2"><c r="B2" t="b"><v>1</v></c></row></sheetData>"#), "{}", xml);
    }

    #[test]
    fn test_scan_finds_styles_and_shared_groups() {
        let xml = concat!(
            r#"<worksheet><sheetData><row r="1">"#,
            r#"<c r="A1" s="2"><f t="shared" ref="A1:A3" si="0">B1*2</f><v>2</v></c>"#,
            r#"<c r="A2"><f t="shared" si="0"/><v>4</v></c>"#,
            r#"<c r="A3"><f t="shared" si="0"/><v>6</v></c>"#,
            r#"<c r="C1"><f t="shared" ref="C1:C2" si="1">D1</f></c>"#,
            r#"<c r="C2"><f t="shared" si="1"/></c>"#,
            r#"</row></sheetData></worksheet>"#
        );
        let scan = scan(xml).unwrap();
        assert_eq!(scan.styles.get(&addr("A1")), Some(&2));
        assert_eq!(scan.orphaned_by([&addr("A1")]), vec![addr("A2"), addr("A3")]);
        assert!(scan.orphaned_by([&addr("A2")]).is_empty(), "members do not orphan anything");
    }
}
