//! In-place edits of an existing .xlsx package
//!
//! Every zip entry is raw-copied except the parts holding edited cells, so
//! whatever the model does not read (notes, number formats, merged cells,
//! defined names, validation rules, charts) is carried over byte for byte.
//!
//! - worksheet: `<c>` rewrites inside `sheetData`
//! - stylesheet: `cellXfs` records for newly styled cells
//! - manifest: workbook.xml, its relationships and content types

mod manifest;
mod stylesheet;
mod worksheet;

use crate::atomic::write_atomic;
use crate::core::address::CellAddress;
use crate::error::{GuardError, GuardResult};
use crate::excel::workbook::{Cell, Sheet, Workbook};
use manifest::Manifest;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Writer;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read, Seek, Write};
use std::path::{Path, PathBuf};
use stylesheet::FormatRequest;
use worksheet::{CellPatch, Patches, WorksheetScan, EMPTY_WORKSHEET};
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Writes a [`Workbook`] by patching the package it was loaded from
pub struct PackagePatcher {
    source: PathBuf,
}

/// One worksheet part to rewrite
struct SheetEdit<'w> {
    sheet: &'w Sheet,
    part: String,
    xml: String,
    scan: WorksheetScan,
    addresses: BTreeSet<CellAddress>,
    new: bool,
}

impl SheetEdit<'_> {
    fn format_request(&self, address: &CellAddress) -> Option<FormatRequest> {
        let cell = self.sheet.get(address)?;
        if cell.style.is_none() && cell.number_format.is_none() {
            return None;
        }
        Some(FormatRequest {
            base: self.scan.styles.get(address).copied().unwrap_or(0),
            style: cell.style,
            number_format: cell.number_format.clone(),
        })
    }
}

impl PackagePatcher {
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
        }
    }

    /// Write `workbook` to `output`, carrying over every part it did not edit.
    ///
    /// `output` may be the source itself; it is replaced atomically.
    pub fn apply(&self, workbook: &Workbook, output: &Path) -> GuardResult<()> {
        reject_new_notes(workbook)?;

        let file = File::open(&self.source)?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| self.corrupt(e))?;
        let manifest = Manifest::read(&mut archive)?;
        let taken: BTreeSet<String> = archive.file_names().map(str::to_string).collect();

        let changed = workbook.sheets().any(|s| s.is_added() || s.has_edits());
        let order: Vec<(&str, bool)> = workbook.sheets().map(|s| (s.name(), s.is_added())).collect();
        let manifest_edit = manifest.edit(&order, changed, &taken)?;

        let mut edits = Vec::new();
        for sheet in workbook.sheets() {
            let (part, xml, mut addresses) = if sheet.is_added() {
                let part = manifest_edit
                    .added
                    .iter()
                    .find(|a| a.name == sheet.name())
                    .map(|a| a.part.clone())
                    .ok_or_else(|| missing_part(sheet.name()))?;
                let addresses: BTreeSet<CellAddress> = sheet.iter().map(|(a, _)| a).collect();
                (part, EMPTY_WORKSHEET.to_string(), addresses)
            } else if sheet.has_edits() {
                let part = manifest.sheet_part(sheet.name()).ok_or_else(|| {
                    GuardError::Export(format!("Sheet '{}' has no worksheet part", sheet.name()))
                })?;
                let xml = read_part(&mut archive, &part)?.ok_or_else(|| missing_part(&part))?;
                (part, xml, sheet.edits().copied().collect())
            } else {
                continue;
            };

            let scan = worksheet::scan(&xml)?;
            let orphaned = scan.orphaned_by(&addresses);
            addresses.extend(orphaned);
            edits.push(SheetEdit {
                sheet,
                part,
                xml,
                scan,
                addresses,
                new: sheet.is_added(),
            });
        }

        let mut replaced = manifest_edit.parts;
        let requests: BTreeSet<FormatRequest> = edits
            .iter()
            .flat_map(|edit| edit.addresses.iter().filter_map(|a| edit.format_request(a)))
            .collect();
        let assigned = if requests.is_empty() {
            BTreeMap::new()
        } else {
            let part = manifest.styles_part().ok_or_else(|| missing_part("styles"))?;
            let xml = read_part(&mut archive, &part)?.ok_or_else(|| missing_part(&part))?;
            let (bytes, assigned) = stylesheet::apply(&xml, &requests)?;
            replaced.insert(part, bytes);
            assigned
        };

        // Stands in for a removed cell that still carries formatting
        let blank = Cell::default();
        let mut added = Vec::new();
        for edit in &edits {
            let patches: Patches<'_> = edit
                .addresses
                .iter()
                .map(|address| {
                    let cell = edit
                        .sheet
                        .get(address)
                        .or_else(|| edit.scan.styles.contains_key(address).then_some(&blank));
                    let style = edit
                        .format_request(address)
                        .and_then(|r| assigned.get(&r).copied());
                    (*address, CellPatch { cell, style })
                })
                .collect();
            let bytes = worksheet::rewrite(&edit.xml, &patches)?;
            tracing::debug!(sheet = %edit.sheet.name(), part = %edit.part, cells = patches.len(), "worksheet patched");
            if edit.new {
                added.push((edit.part.clone(), bytes));
            } else {
                replaced.insert(edit.part.clone(), bytes);
            }
        }

        // Cell order in calcChain no longer matches the formulas
        let dropped: BTreeSet<String> = if changed {
            manifest.calc_chain_part().into_iter().collect()
        } else {
            BTreeSet::new()
        };

        let parts_rewritten = replaced.len() + added.len();
        write_atomic(output, move |file| {
            let mut zip = ZipWriter::new(file);
            let options = FileOptions::<()>::default().compression_method(CompressionMethod::Deflated);

            for i in 0..archive.len() {
                let entry = archive.by_index(i).map_err(zip_failed)?;
                let name = entry.name().to_string();
                if dropped.contains(&name) {
                    continue;
                }
                match replaced.remove(&name) {
                    Some(bytes) => {
                        drop(entry);
                        zip.start_file(name, options).map_err(zip_failed)?;
                        zip.write_all(&bytes)?;
                    }
                    None => zip.raw_copy_file(entry).map_err(zip_failed)?,
                }
            }
            for (name, bytes) in added {
                zip.start_file(name, options).map_err(zip_failed)?;
                zip.write_all(&bytes)?;
            }
            zip.finish().map_err(zip_failed)?;
            Ok(())
        })?;

        tracing::info!(
            source = %self.source.display(),
            path = %output.display(),
            parts = parts_rewritten,
            "workbook package patched"
        );
        Ok(())
    }

    fn corrupt(&self, error: impl Display) -> GuardError {
        GuardError::CorruptWorkbook {
            path: self.source.clone(),
            message: error.to_string(),
        }
    }
}

/// Notes live in separate comment and drawing parts that are not generated here
fn reject_new_notes(workbook: &Workbook) -> GuardResult<()> {
    for sheet in workbook.sheets() {
        let noted = if sheet.is_added() {
            sheet.iter().find(|(_, c)| c.comment.is_some()).map(|(a, _)| a)
        } else {
            sheet
                .edits()
                .find(|a| sheet.get(a).is_some_and(|c| c.comment.is_some()))
                .copied()
        };
        if let Some(address) = noted {
            return Err(GuardError::Export(format!(
                "Cannot add a note to {}!{}: notes can only be written to workbooks created by sheetguard",
                sheet.name(),
                address
            )));
        }
    }
    Ok(())
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> GuardResult<Option<String>> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(zip_failed(e)),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

fn missing_part(name: &str) -> GuardError {
    GuardError::Export(format!("Workbook package has no {} part", name))
}

fn zip_failed(e: impl Display) -> GuardError {
    GuardError::Export(format!("Failed to rewrite workbook package: {}", e))
}

fn xml_failed(e: impl Display) -> GuardError {
    GuardError::Export(format!("Malformed workbook XML: {}", e))
}

fn write_failed(e: impl Display) -> GuardError {
    GuardError::Export(format!("Failed to write workbook XML: {}", e))
}

fn emit<W: Write>(writer: &mut Writer<W>, event: Event<'_>) -> GuardResult<()> {
    writer.write_event(event).map_err(write_failed)
}

/// Attribute value with entities resolved
fn attr(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| unescape_xml(&String::from_utf8_lossy(&a.value)))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
