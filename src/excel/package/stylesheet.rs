//! styles.xml additions
//!
//! A cell given a named style or number format gets a new `cellXfs` record
//! derived from the record it already uses. Existing records are never
//! modified, so every untouched cell keeps its exact formatting.

use super::{attr, emit, unescape_xml, xml_failed};
use crate::error::GuardResult;
use crate::excel::styles::{CellStyle, COLOR_ASSUMPTION, COLOR_FORMULA, COLOR_INPUT};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

/// First id available to custom number formats
const FIRST_CUSTOM_NUM_FMT: u32 = 164;

/// Built-in number formats every reader knows by id
const BUILTIN_NUM_FMTS: &[(u32, &str)] = &[
    (0, "General"),
    (1, "0"),
    (2, "0.00"),
    (3, "#,##0"),
    (4, "#,##0.00"),
    (9, "0%"),
    (10, "0.00%"),
    (11, "0.00E+00"),
    (14, "mm-dd-yy"),
    (49, "@"),
];

/// Format wanted for a cell currently using the `base` record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct FormatRequest {
    pub base: u32,
    pub style: Option<CellStyle>,
    pub number_format: Option<String>,
}

#[derive(Debug, Clone)]
struct XfRecord {
    attrs: Vec<(String, String)>,
    children: Vec<Event<'static>>,
}

impl XfRecord {
    fn from_start(e: &BytesStart<'_>) -> Self {
        let attrs = e
            .attributes()
            .flatten()
            .map(|a| {
                (
                    String::from_utf8_lossy(a.key.as_ref()).into_owned(),
                    unescape_xml(&String::from_utf8_lossy(&a.value)),
                )
            })
            .collect();
        Self {
            attrs,
            children: Vec::new(),
        }
    }

    fn default_record() -> Self {
        Self {
            attrs: ["numFmtId", "fontId", "fillId", "borderId", "xfId"]
                .iter()
                .map(|k| (k.to_string(), "0".to_string()))
                .collect(),
            children: Vec::new(),
        }
    }

    fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.attrs.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key.to_string(), value)),
        }
    }

    /// Replace any alignment with a horizontal one
    fn align(&mut self, horizontal: &str) {
        self.children.retain(|event| match event {
            Event::Start(e) | Event::Empty(e) => e.name().as_ref() != b"alignment",
            Event::End(e) => e.name().as_ref() != b"alignment",
            _ => true,
        });
        let mut alignment = BytesStart::new("alignment");
        alignment.push_attribute(("horizontal", horizontal));
        // alignment precedes protection
        self.children.insert(0, Event::Empty(alignment));
        self.set("applyAlignment", 1);
    }

    fn write<W: Write>(&self, writer: &mut Writer<W>) -> GuardResult<()> {
        let mut start = BytesStart::new("xf");
        for (key, value) in &self.attrs {
            start.push_attribute((key.as_str(), value.as_str()));
        }
        if self.children.is_empty() {
            return emit(writer, Event::Empty(start));
        }
        emit(writer, Event::Start(start))?;
        for child in &self.children {
            emit(writer, child.clone())?;
        }
        emit(writer, Event::End(BytesEnd::new("xf")))
    }
}

/// What styles.xml already holds
#[derive(Debug, Default)]
struct StyleTable {
    num_fmts: Vec<(u32, String)>,
    fonts: usize,
    fills: usize,
    cell_xfs: Vec<XfRecord>,
}

const SECTIONS: [&[u8]; 4] = [b"numFmts", b"fonts", b"fills", b"cellXfs"];

fn read_table(xml: &str) -> GuardResult<StyleTable> {
    let mut reader = Reader::from_str(xml);
    let mut table = StyleTable::default();
    let mut section: Option<Vec<u8>> = None;
    let mut open_xf: Option<XfRecord> = None;

    loop {
        let event = reader.read_event().map_err(xml_failed)?;
        if let Some(record) = open_xf.as_mut() {
            match event {
                Event::End(e) if e.name().as_ref() == b"xf" => {
                    if let Some(done) = open_xf.take() {
                        table.cell_xfs.push(done);
                    }
                }
                Event::Eof => break,
                other => record.children.push(other.into_owned()),
            }
            continue;
        }

        let in_xfs = section.as_deref() == Some(b"cellXfs".as_slice());
        match event {
            Event::Start(e) if SECTIONS.contains(&e.name().as_ref()) => {
                section = Some(e.name().as_ref().to_vec());
            }
            Event::End(e) if section.as_deref() == Some(e.name().as_ref()) => section = None,
            Event::Start(e) if in_xfs && e.name().as_ref() == b"xf" => {
                open_xf = Some(XfRecord::from_start(&e));
            }
            Event::Empty(e) if in_xfs && e.name().as_ref() == b"xf" => {
                table.cell_xfs.push(XfRecord::from_start(&e));
            }
            Event::Start(e) | Event::Empty(e) => match (section.as_deref(), e.name().as_ref()) {
                (Some(b"numFmts"), b"numFmt") => {
                    let id = attr(&e, b"numFmtId").and_then(|v| v.parse().ok());
                    if let (Some(id), Some(code)) = (id, attr(&e, b"formatCode")) {
                        table.num_fmts.push((id, code));
                    }
                }
                (Some(b"fonts"), b"font") => table.fonts += 1,
                (Some(b"fills"), b"fill") => table.fills += 1,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(table)
}

fn argb(rgb: u32) -> String {
    format!("FF{:06X}", rgb)
}

fn write_font<W: Write>(writer: &mut Writer<W>, style: CellStyle) -> GuardResult<()> {
    let (color, bold) = match style {
        CellStyle::Input => (COLOR_INPUT, false),
        CellStyle::Formula => (COLOR_FORMULA, false),
        CellStyle::Assumption => (0x000000, true),
    };
    emit(writer, Event::Start(BytesStart::new("font")))?;
    if bold {
        emit(writer, Event::Empty(BytesStart::new("b")))?;
    }
    let color = argb(color);
    let children: [(&str, &str, &str); 5] = [
        ("sz", "val", "11"),
        ("color", "rgb", color.as_str()),
        ("name", "val", "Calibri"),
        ("family", "val", "2"),
        ("scheme", "val", "minor"),
    ];
    for (name, key, value) in children {
        let mut child = BytesStart::new(name);
        child.push_attribute((key, value));
        emit(writer, Event::Empty(child))?;
    }
    emit(writer, Event::End(BytesEnd::new("font")))
}

fn write_solid_fill<W: Write>(writer: &mut Writer<W>, rgb: u32) -> GuardResult<()> {
    emit(writer, Event::Start(BytesStart::new("fill")))?;
    let mut pattern = BytesStart::new("patternFill");
    pattern.push_attribute(("patternType", "solid"));
    emit(writer, Event::Start(pattern))?;
    let color = argb(rgb);
    let mut fg = BytesStart::new("fgColor");
    fg.push_attribute(("rgb", color.as_str()));
    emit(writer, Event::Empty(fg))?;
    let mut bg = BytesStart::new("bgColor");
    bg.push_attribute(("indexed", "64"));
    emit(writer, Event::Empty(bg))?;
    emit(writer, Event::End(BytesEnd::new("patternFill")))?;
    emit(writer, Event::End(BytesEnd::new("fill")))
}

/// New children for one section, already serialized
struct Additions {
    existing: usize,
    count: usize,
    xml: Writer<Vec<u8>>,
}

impl Additions {
    fn new(existing: usize) -> Self {
        Self {
            existing,
            count: 0,
            xml: Writer::new(Vec::new()),
        }
    }

    fn next_index(&self) -> usize {
        self.existing + self.count
    }
}

struct Plan {
    num_fmts: Additions,
    fonts: Additions,
    fills: Additions,
    cell_xfs: Additions,
    assigned: BTreeMap<FormatRequest, u32>,
}

impl Plan {
    fn section_mut(&mut self, name: &[u8]) -> Option<&mut Additions> {
        match name {
            b"numFmts" => Some(&mut self.num_fmts),
            b"fonts" => Some(&mut self.fonts),
            b"fills" => Some(&mut self.fills),
            b"cellXfs" => Some(&mut self.cell_xfs),
            _ => None,
        }
    }
}

fn plan(table: &StyleTable, requests: &BTreeSet<FormatRequest>) -> GuardResult<Plan> {
    let mut plan = Plan {
        num_fmts: Additions::new(table.num_fmts.len()),
        fonts: Additions::new(table.fonts),
        fills: Additions::new(table.fills),
        cell_xfs: Additions::new(table.cell_xfs.len()),
        assigned: BTreeMap::new(),
    };
    let mut known_fmts = table.num_fmts.clone();
    let mut next_fmt = known_fmts
        .iter()
        .map(|(id, _)| id + 1)
        .max()
        .unwrap_or(0)
        .max(FIRST_CUSTOM_NUM_FMT);
    let mut fonts: BTreeMap<CellStyle, usize> = BTreeMap::new();
    let mut assumption_fill: Option<usize> = None;

    for request in requests {
        let mut record = table
            .cell_xfs
            .get(request.base as usize)
            .cloned()
            .unwrap_or_else(XfRecord::default_record);

        if let Some(code) = &request.number_format {
            let known = BUILTIN_NUM_FMTS
                .iter()
                .map(|(id, c)| (*id, *c))
                .chain(known_fmts.iter().map(|(id, c)| (*id, c.as_str())))
                .find(|(_, c)| c == code)
                .map(|(id, _)| id);
            let id = match known {
                Some(id) => id,
                None => {
                    let id = next_fmt;
                    next_fmt += 1;
                    let number = id.to_string();
                    let mut e = BytesStart::new("numFmt");
                    e.push_attribute(("numFmtId", number.as_str()));
                    e.push_attribute(("formatCode", code.as_str()));
                    emit(&mut plan.num_fmts.xml, Event::Empty(e))?;
                    plan.num_fmts.count += 1;
                    known_fmts.push((id, code.clone()));
                    id
                }
            };
            record.set("numFmtId", id);
            record.set("applyNumberFormat", 1);
        }

        if let Some(style) = request.style {
            let font = match fonts.get(&style) {
                Some(index) => *index,
                None => {
                    let index = plan.fonts.next_index();
                    write_font(&mut plan.fonts.xml, style)?;
                    plan.fonts.count += 1;
                    fonts.insert(style, index);
                    index
                }
            };
            record.set("fontId", font);
            record.set("applyFont", 1);

            if style == CellStyle::Assumption {
                let fill = match assumption_fill {
                    Some(index) => index,
                    None => {
                        let index = plan.fills.next_index();
                        write_solid_fill(&mut plan.fills.xml, COLOR_ASSUMPTION)?;
                        plan.fills.count += 1;
                        assumption_fill = Some(index);
                        index
                    }
                };
                record.set("fillId", fill);
                record.set("applyFill", 1);
            }

            record.align(match style {
                CellStyle::Input => "left",
                CellStyle::Formula => "right",
                CellStyle::Assumption => "center",
            });
        }

        let index = plan.cell_xfs.next_index() as u32;
        record.write(&mut plan.cell_xfs.xml)?;
        plan.cell_xfs.count += 1;
        plan.assigned.insert(request.clone(), index);
    }
    Ok(plan)
}

fn with_count(e: &BytesStart<'_>, count: usize) -> BytesStart<'static> {
    let mut start = BytesStart::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
    for a in e.attributes().flatten() {
        if a.key.as_ref() != b"count" {
            start.push_attribute(a);
        }
    }
    start.push_attribute(("count", count.to_string().as_str()));
    start
}

fn append(writer: &mut Writer<Vec<u8>>, additions: &Additions) {
    writer.get_mut().extend_from_slice(additions.xml.get_ref());
}

/// Add the records `requests` need; returns the new part and each request's
/// `cellXfs` index
pub(super) fn apply(
    xml: &str,
    requests: &BTreeSet<FormatRequest>,
) -> GuardResult<(Vec<u8>, BTreeMap<FormatRequest, u32>)> {
    let table = read_table(xml)?;
    let mut plan = plan(&table, requests)?;

    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + 1024));
    let mut num_fmts_seen = false;

    loop {
        let event = reader.read_event().map_err(xml_failed)?;
        if let Event::Start(e) | Event::Empty(e) = &event {
            match e.name().as_ref() {
                b"numFmts" => num_fmts_seen = true,
                // numFmts comes first; add the section when the part has none
                b"fonts" if !num_fmts_seen && plan.num_fmts.count > 0 => {
                    num_fmts_seen = true;
                    let start = BytesStart::new("numFmts");
                    emit(&mut writer, Event::Start(with_count(&start, plan.num_fmts.count)))?;
                    append(&mut writer, &plan.num_fmts);
                    emit(&mut writer, Event::End(BytesEnd::new("numFmts")))?;
                }
                _ => {}
            }
        }

        match event {
            Event::Start(e) => match plan.section_mut(e.name().as_ref()) {
                Some(additions) if additions.count > 0 => {
                    let start = with_count(&e, additions.next_index());
                    emit(&mut writer, Event::Start(start))?;
                }
                _ => emit(&mut writer, Event::Start(e))?,
            },
            Event::Empty(e) => match plan.section_mut(e.name().as_ref()) {
                Some(additions) if additions.count > 0 => {
                    let start = with_count(&e, additions.next_index());
                    let end = BytesEnd::new(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    emit(&mut writer, Event::Start(start))?;
                    append(&mut writer, additions);
                    emit(&mut writer, Event::End(end))?;
                }
                _ => emit(&mut writer, Event::Empty(e))?,
            },
            Event::End(e) => {
                if let Some(additions) = plan.section_mut(e.name().as_ref()) {
                    if additions.count > 0 {
                        append(&mut writer, additions);
                    }
                }
                emit(&mut writer, Event::End(e))?;
            }
            Event::Eof => break,
            other => emit(&mut writer, other)?,
        }
    }

    Ok((writer.into_inner(), plan.assigned))
}
