//! Workbook-level parts: the sheet list, its relationships, content types

use super::{attr, emit, read_part, xml_failed};
use crate::error::{GuardError, GuardResult};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Seek};
use zip::ZipArchive;

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES: &str = "[Content_Types].xml";

const WORKSHEET_REL: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet";
const WORKSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml";

#[derive(Debug, Clone)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
}

/// A sheet new to the package
#[derive(Debug, Clone)]
pub(super) struct AddedSheet {
    pub name: String,
    pub part: String,
    rel_id: String,
    sheet_id: u32,
}

/// Rewritten workbook-level parts, keyed by part name
#[derive(Debug, Default)]
pub(super) struct ManifestEdit {
    pub parts: BTreeMap<String, Vec<u8>>,
    pub added: Vec<AddedSheet>,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Existing(usize),
    Added(usize),
}

#[derive(Debug)]
pub(super) struct Manifest {
    workbook_xml: String,
    rels_xml: String,
    content_types_xml: String,
    /// `<sheet>` elements in package order
    sheets: Vec<BytesStart<'static>>,
    rels: Vec<Relationship>,
}

impl Manifest {
    pub fn read<R: Read + Seek>(archive: &mut ZipArchive<R>) -> GuardResult<Self> {
        let workbook_xml = required_part(archive, WORKBOOK_PART)?;
        let rels_xml = required_part(archive, WORKBOOK_RELS)?;
        let content_types_xml = required_part(archive, CONTENT_TYPES)?;

        let sheets = read_sheets(&workbook_xml)?;
        let rels = read_relationships(&rels_xml)?;
        Ok(Self {
            workbook_xml,
            rels_xml,
            content_types_xml,
            sheets,
            rels,
        })
    }

    /// Worksheet part for the named sheet, e.g. `xl/worksheets/sheet1.xml`
    pub fn sheet_part(&self, name: &str) -> Option<String> {
        let sheet = self
            .sheets
            .iter()
            .find(|e| attr(e, b"name").as_deref() == Some(name))?;
        let id = rel_id(sheet)?;
        self.rels
            .iter()
            .find(|r| r.id == id)
            .map(|r| resolve_target(&r.target))
    }

    pub fn styles_part(&self) -> Option<String> {
        self.part_of_kind("/styles")
    }

    pub fn calc_chain_part(&self) -> Option<String> {
        self.part_of_kind("/calcChain")
    }

    fn part_of_kind(&self, suffix: &str) -> Option<String> {
        self.rels
            .iter()
            .find(|r| r.kind.ends_with(suffix))
            .map(|r| resolve_target(&r.target))
    }

    /// Register the sheets flagged as added in `order` (the model's sheet
    /// order) and, with `drop_calc_chain`, unlink the calculation chain.
    ///
    /// `taken` holds every entry name already in the package.
    pub fn edit(
        &self,
        order: &[(&str, bool)],
        drop_calc_chain: bool,
        taken: &BTreeSet<String>,
    ) -> GuardResult<ManifestEdit> {
        let added = self.allocate(order, taken);
        let calc_chain = if drop_calc_chain {
            self.calc_chain_part()
        } else {
            None
        };

        let mut edit = ManifestEdit::default();
        if !added.is_empty() {
            let slots = self.slots(order, added.len());
            edit.parts
                .insert(WORKBOOK_PART.to_string(), self.rewrite_workbook(&slots, &added)?);
        }
        if !added.is_empty() || calc_chain.is_some() {
            edit.parts.insert(
                WORKBOOK_RELS.to_string(),
                self.rewrite_rels(&added, drop_calc_chain)?,
            );
            edit.parts.insert(
                CONTENT_TYPES.to_string(),
                self.rewrite_content_types(&added, calc_chain.as_deref())?,
            );
        }
        edit.added = added;
        Ok(edit)
    }

    /// Part name, relationship id and sheet id for each added sheet
    fn allocate(&self, order: &[(&str, bool)], taken: &BTreeSet<String>) -> Vec<AddedSheet> {
        let mut next_rel = self
            .rels
            .iter()
            .filter_map(|r| r.id.strip_prefix("rId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let mut next_sheet_id = self
            .sheets
            .iter()
            .filter_map(|e| attr(e, b"sheetId")?.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        let mut next_part = 1u32;

        let mut added = Vec::new();
        for (name, _) in order.iter().filter(|(_, is_added)| *is_added) {
            let part = loop {
                let candidate = format!("xl/worksheets/sheet{}.xml", next_part);
                next_part += 1;
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            let rel_id = loop {
                let candidate = format!("rId{}", next_rel);
                next_rel += 1;
                if !self.rels.iter().any(|r| r.id == candidate) {
                    break candidate;
                }
            };
            added.push(AddedSheet {
                name: name.to_string(),
                part,
                rel_id,
                sheet_id: next_sheet_id,
            });
            next_sheet_id += 1;
        }
        added
    }

    /// Final sheet order. Added sheets go before the first existing sheet
    /// that follows them in `order`.
    fn slots(&self, order: &[(&str, bool)], added_count: usize) -> Vec<Slot> {
        let added_positions: Vec<usize> = order
            .iter()
            .enumerate()
            .filter(|(_, (_, is_added))| *is_added)
            .map(|(i, _)| i)
            .collect();
        let mut slots = Vec::with_capacity(self.sheets.len() + added_count);
        let mut next = 0;
        for (i, sheet) in self.sheets.iter().enumerate() {
            let name = attr(sheet, b"name").unwrap_or_default();
            if let Some(position) = order.iter().position(|(n, is_added)| !is_added && *n == name) {
                while next < added_positions.len() && added_positions[next] < position {
                    slots.push(Slot::Added(next));
                    next += 1;
                }
            }
            slots.push(Slot::Existing(i));
        }
        slots.extend((next..added_positions.len()).map(Slot::Added));
        slots
    }

    fn rewrite_workbook(&self, slots: &[Slot], added: &[AddedSheet]) -> GuardResult<Vec<u8>> {
        // Old sheet index -> new index, for localSheetId and activeTab
        let mut moved = vec![0usize; self.sheets.len()];
        for (position, slot) in slots.iter().enumerate() {
            if let Slot::Existing(i) = slot {
                moved[*i] = position;
            }
        }
        let id_key = self
            .sheets
            .first()
            .and_then(rel_id_key)
            .unwrap_or_else(|| "r:id".to_string());

        let mut reader = Reader::from_str(&self.workbook_xml);
        let mut writer = Writer::new(Vec::with_capacity(self.workbook_xml.len() + 256));
        let mut in_sheets = false;
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
                Event::Start(e) if e.name().as_ref() == b"sheets" => {
                    in_sheets = true;
                    emit(&mut writer, Event::Start(e))?;
                }
                Event::Start(e) if in_sheets && e.name().as_ref() == b"sheet" => skip_depth = 1,
                Event::Empty(e) if in_sheets && e.name().as_ref() == b"sheet" => {}
                Event::End(e) if e.name().as_ref() == b"sheets" => {
                    in_sheets = false;
                    for slot in slots {
                        let sheet = match slot {
                            Slot::Existing(i) => self.sheets[*i].clone(),
                            Slot::Added(k) => sheet_element(&added[*k], &id_key),
                        };
                        emit(&mut writer, Event::Empty(sheet))?;
                    }
                    emit(&mut writer, Event::End(e))?;
                }
                Event::Start(e) if e.name().as_ref() == b"definedName" => {
                    emit(&mut writer, Event::Start(remap(&e, &["localSheetId"], &moved)))?;
                }
                Event::Start(e) if e.name().as_ref() == b"workbookView" => {
                    let view = remap(&e, &["activeTab", "firstSheet"], &moved);
                    emit(&mut writer, Event::Start(view))?;
                }
                Event::Empty(e) if e.name().as_ref() == b"workbookView" => {
                    let view = remap(&e, &["activeTab", "firstSheet"], &moved);
                    emit(&mut writer, Event::Empty(view))?;
                }
                Event::Eof => break,
                other => emit(&mut writer, other)?,
            }
        }
        Ok(writer.into_inner())
    }

    fn rewrite_rels(&self, added: &[AddedSheet], drop_calc_chain: bool) -> GuardResult<Vec<u8>> {
        let mut reader = Reader::from_str(&self.rels_xml);
        let mut writer = Writer::new(Vec::with_capacity(self.rels_xml.len() + 256));
        loop {
            match reader.read_event().map_err(xml_failed)? {
                Event::Empty(e)
                    if drop_calc_chain
                        && e.name().as_ref() == b"Relationship"
                        && attr(&e, b"Type").is_some_and(|t| t.ends_with("/calcChain")) => {}
                Event::End(e) if e.name().as_ref() == b"Relationships" => {
                    for sheet in added {
                        let target = sheet.part.strip_prefix("xl/").unwrap_or(&sheet.part);
                        let mut rel = BytesStart::new("Relationship");
                        rel.push_attribute(("Id", sheet.rel_id.as_str()));
                        rel.push_attribute(("Type", WORKSHEET_REL));
                        rel.push_attribute(("Target", target));
                        emit(&mut writer, Event::Empty(rel))?;
                    }
                    emit(&mut writer, Event::End(e))?;
                }
                Event::Eof => break,
                other => emit(&mut writer, other)?,
            }
        }
        Ok(writer.into_inner())
    }

    fn rewrite_content_types(&self, added: &[AddedSheet], calc_chain: Option<&str>) -> GuardResult<Vec<u8>> {
        let dropped = calc_chain.map(|part| format!("/{}", part));
        let mut reader = Reader::from_str(&self.content_types_xml);
        let mut writer = Writer::new(Vec::with_capacity(self.content_types_xml.len() + 256));
        loop {
            match reader.read_event().map_err(xml_failed)? {
                Event::Empty(e)
                    if e.name().as_ref() == b"Override"
                        && dropped.is_some()
                        && attr(&e, b"PartName") == dropped => {}
                Event::End(e) if e.name().as_ref() == b"Types" => {
                    for sheet in added {
                        let part_name = format!("/{}", sheet.part);
                        let mut entry = BytesStart::new("Override");
                        entry.push_attribute(("PartName", part_name.as_str()));
                        entry.push_attribute(("ContentType", WORKSHEET_CONTENT_TYPE));
                        emit(&mut writer, Event::Empty(entry))?;
                    }
                    emit(&mut writer, Event::End(e))?;
                }
                Event::Eof => break,
                other => emit(&mut writer, other)?,
            }
        }
        Ok(writer.into_inner())
    }
}

fn required_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> GuardResult<String> {
    read_part(archive, name)?
        .ok_or_else(|| GuardError::Export(format!("Workbook package has no {}", name)))
}

fn read_sheets(xml: &str) -> GuardResult<Vec<BytesStart<'static>>> {
    let mut reader = Reader::from_str(xml);
    let mut sheets = Vec::new();
    loop {
        match reader.read_event().map_err(xml_failed)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"sheet" => {
                sheets.push(e.into_owned());
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(sheets)
}

fn read_relationships(xml: &str) -> GuardResult<Vec<Relationship>> {
    let mut reader = Reader::from_str(xml);
    let mut rels = Vec::new();
    loop {
        match reader.read_event().map_err(xml_failed)? {
            Event::Start(e) | Event::Empty(e) if e.name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(kind), Some(target)) =
                    (attr(&e, b"Id"), attr(&e, b"Type"), attr(&e, b"Target"))
                {
                    rels.push(Relationship { id, kind, target });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Targets are relative to `xl/` unless rooted
fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

/// The prefixed `id` attribute (`r:id` under the usual prefix)
fn rel_id_key(sheet: &BytesStart<'_>) -> Option<String> {
    sheet
        .attributes()
        .flatten()
        .find(|a| a.key.prefix().is_some() && a.key.local_name().as_ref() == b"id")
        .map(|a| String::from_utf8_lossy(a.key.as_ref()).into_owned())
}

fn rel_id(sheet: &BytesStart<'_>) -> Option<String> {
    rel_id_key(sheet).and_then(|key| attr(sheet, key.as_bytes()))
}

fn sheet_element(sheet: &AddedSheet, id_key: &str) -> BytesStart<'static> {
    let sheet_id = sheet.sheet_id.to_string();
    let mut e = BytesStart::new("sheet");
    e.push_attribute(("name", sheet.name.as_str()));
    e.push_attribute(("sheetId", sheet_id.as_str()));
    e.push_attribute((id_key, sheet.rel_id.as_str()));
    e
}

/// Copy of `e` with sheet-index attributes moved to their new positions
fn remap(e: &BytesStart<'_>, keys: &[&str], moved: &[usize]) -> BytesStart<'static> {
    let mut out = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes().flatten() {
        let index = keys
            .iter()
            .any(|k| a.key.as_ref() == k.as_bytes())
            .then(|| String::from_utf8_lossy(&a.value).parse::<usize>().ok())
            .flatten()
            .and_then(|old| moved.get(old));
        match index {
            Some(new) => {
                let key = String::from_utf8_lossy(a.key.as_ref()).into_owned();
                out.push_attribute((key.as_str(), new.to_string().as_str()));
            }
            None => out.push_attribute(a),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WORKBOOK: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" "#,
        r#"xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">"#,
        r#"<bookViews><workbookView activeTab="1"/></bookViews>"#,
        r#"<sheets><sheet name="Inputs" sheetId="1" r:id="rId1"/><sheet name="P&amp;L" sheetId="4" r:id="rId2"/></sheets>"#,
        r#"<definedNames><definedName name="Rate" localSheetId="1">'P&amp;L'!$B$2</definedName></definedNames>"#,
        r#"</workbook>"#
    );

    const RELS: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>"#,
        r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="/xl/worksheets/sheet2.xml"/>"#,
        r#"<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#,
        r#"<Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#,
        r#"</Relationships>"#
    );

    const CONTENT: &str = concat!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#,
        r#"<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">"#,
        r#"<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
        r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#,
        r#"</Types>"#
    );

    fn manifest() -> Manifest {
        Manifest {
            workbook_xml: WORKBOOK.to_string(),
            rels_xml: RELS.to_string(),
            content_types_xml: CONTENT.to_string(),
            sheets: read_sheets(WORKBOOK).unwrap(),
            rels: read_relationships(RELS).unwrap(),
        }
    }

    fn text(edit: &ManifestEdit, part: &str) -> String {
        String::from_utf8(edit.parts[part].clone()).unwrap()
    }

    #[test]
    fn test_resolves_parts_through_relationships() {
        let manifest = manifest();
        assert_eq!(manifest.sheet_part("Inputs").as_deref(), Some("xl/worksheets/sheet1.xml"));
        assert_eq!(manifest.sheet_part("P&L").as_deref(), Some("xl/worksheets/sheet2.xml"));
        assert_eq!(manifest.sheet_part("Missing"), None);
        assert_eq!(manifest.styles_part().as_deref(), Some("xl/styles.xml"));
        assert_eq!(manifest.calc_chain_part().as_deref(), Some("xl/calcChain.xml"));
    }

    #[test]
    fn test_cell_edits_only_unlink_calc_chain() {
        let edit = manifest()
            .edit(&[("Inputs", false), ("P&L", false)], true, &BTreeSet::new())
            .unwrap();
        assert!(!edit.parts.contains_key(WORKBOOK_PART));
        assert!(!text(&edit, WORKBOOK_RELS).contains("calcChain"));
        assert!(!text(&edit, CONTENT_TYPES).contains("calcChain"));
        assert!(text(&edit, CONTENT_TYPES).contains(r#"PartName="/xl/workbook.xml""#));
    }

    #[test]
    fn test_nothing_to_do_rewrites_nothing() {
        let edit = manifest()
            .edit(&[("Inputs", false), ("P&L", false)], false, &BTreeSet::new())
            .unwrap();
        assert!(edit.parts.is_empty());
        assert!(edit.added.is_empty());
    }

    #[test]
    fn test_added_sheet_is_registered_in_position() {
        let taken: BTreeSet<String> = ["xl/worksheets/sheet1.xml", "xl/worksheets/sheet2.xml"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let order = [("Cover", true), ("Inputs", false), ("P&L", false)];
        let edit = manifest().edit(&order, true, &taken).unwrap();

        assert_eq!(edit.added.len(), 1);
        assert_eq!(edit.added[0].part, "xl/worksheets/sheet3.xml");

        let workbook = text(&edit, WORKBOOK_PART);
        assert!(workbook.contains(concat!(
            r#"<sheets><sheet name="Cover" sheetId="5" r:id="rId5"/>"#,
            r#"<sheet name="Inputs" sheetId="1" r:id="rId1"/>"#,
            r#"<sheet name="P&amp;L" sheetId="4" r:id="rId2"/></sheets>"#
        )), "{}", workbook);
        // Indexes shift by one for the inserted sheet
        assert!(workbook.contains(r#"<workbookView activeTab="2"/>"#), "{}", workbook);
        assert!(workbook.contains(r#"<definedName name="Rate" localSheetId="2">"#), "{}", workbook);

        let rels = text(&edit, WORKBOOK_RELS);
        assert!(rels.contains(r#"<Relationship Id="rId5" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet3.xml"/>"#), "{}", rels);
        let content = text(&edit, CONTENT_TYPES);
        assert!(content.contains(r#"<Override PartName="/xl/worksheets/sheet3.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#));
    }

    #[test]
    fn test_appended_sheet_keeps_indexes() {
        let order = [("Inputs", false), ("P&L", false), ("Later", true)];
        let edit = manifest().edit(&order, false, &BTreeSet::new()).unwrap();
        let workbook = text(&edit, WORKBOOK_PART);
        assert!(workbook.contains(r#"<sheet name="Later" sheetId="5" r:id="rId5"/></sheets>"#));
        assert!(workbook.contains(r#"activeTab="1""#));
        // calcChain stays linked when only asked to add
        assert!(text(&edit, WORKBOOK_RELS).contains("calcChain"));
    }
}
