//! Automated repair of cached formula errors
//!
//! Each sentinel maps to at most one [`RepairStrategy`]. A sentinel with no
//! entry in the engine's table is flagged for manual review and left as-is.

use crate::backup::create_backup_in;
use crate::config::GuardConfig;
use crate::core::sanitizer::MAX_FORMULA_LENGTH;
use crate::error::{GuardError, GuardResult};
use crate::excel::workbook::{Cell, CellValue, Workbook};
use crate::lock::FileLock;
use crate::validation::report::{ReportStatus, ValidationReport};
use crate::validation::scanner::{cached_error, scan_file};
use crate::validation::sentinel::ErrorSentinel;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

pub const METHOD_IFERROR: &str = "IFERROR wrapper";
pub const METHOD_FLAG_ONLY: &str = "flagged for manual review";

/// What a strategy did to one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    Repaired,
    /// Already carries the fix; not counted
    AlreadyRepaired,
    Failed,
}

pub type RepairFn = fn(&mut Cell) -> RepairOutcome;

#[derive(Debug, Clone, Copy)]
pub struct RepairStrategy {
    pub method: &'static str,
    pub apply: RepairFn,
}

/// Wrap the formula body as `IFERROR(body, 0)`.
///
/// The cached value becomes 0, which is what the wrapped formula evaluates
/// to while the underlying error persists.
pub fn wrap_iferror(cell: &mut Cell) -> RepairOutcome {
    let Some(formula) = cell.formula.as_deref() else {
        return RepairOutcome::Failed;
    };
    if formula.to_uppercase().contains("IFERROR") {
        return RepairOutcome::AlreadyRepaired;
    }
    let body = formula.strip_prefix('=').unwrap_or(formula).trim();
    if body.is_empty() {
        return RepairOutcome::Failed;
    }
    let wrapped = format!("=IFERROR({}, 0)", body);
    if wrapped.len() > MAX_FORMULA_LENGTH {
        return RepairOutcome::Failed;
    }
    cell.formula = Some(wrapped);
    cell.value = CellValue::Number(0.0);
    RepairOutcome::Repaired
}

/// Per-sentinel repair counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairDetail {
    pub attempted: usize,
    pub successful: usize,
    pub method: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub flagged: usize,
    /// Cells still needing attention: flagged, or attempted and failed
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<String>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl RepairDetail {
    fn new(method: &str) -> Self {
        Self {
            attempted: 0,
            successful: 0,
            method: method.to_string(),
            flagged: 0,
            locations: Vec::new(),
        }
    }
}

/// Outcome of one in-memory repair pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairSummary {
    pub repairs_attempted: usize,
    pub repairs_successful: usize,
    pub details: BTreeMap<ErrorSentinel, RepairDetail>,
}

impl RepairSummary {
    pub fn flagged(&self) -> usize {
        self.details.values().map(|d| d.flagged).sum()
    }
}

/// Strategy table keyed by sentinel
#[derive(Debug, Clone)]
pub struct RepairEngine {
    strategies: BTreeMap<ErrorSentinel, RepairStrategy>,
}

impl Default for RepairEngine {
    fn default() -> Self {
        Self::empty().with_strategy(
            ErrorSentinel::DivZero,
            RepairStrategy {
                method: METHOD_IFERROR,
                apply: wrap_iferror,
            },
        )
    }
}

impl RepairEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that only flags
    pub fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    pub fn with_strategy(mut self, sentinel: ErrorSentinel, strategy: RepairStrategy) -> Self {
        self.strategies.insert(sentinel, strategy);
        self
    }

    pub fn strategy(&self, sentinel: ErrorSentinel) -> Option<&RepairStrategy> {
        self.strategies.get(&sentinel)
    }

    /// Apply strategies to every formula cell whose cached error is selected.
    ///
    /// `selection` of `None` means every sentinel.
    pub fn repair(
        &self,
        workbook: &mut Workbook,
        selection: Option<&BTreeSet<ErrorSentinel>>,
    ) -> RepairSummary {
        let mut summary = RepairSummary::default();

        for sheet in workbook.sheets_mut() {
            let sheet_name = sheet.name().to_string();
            let mut repaired = Vec::new();
            for (address, cell) in sheet.iter_mut() {
                let Some(sentinel) = cached_error(cell) else {
                    continue;
                };
                if selection.is_some_and(|s| !s.contains(&sentinel)) {
                    continue;
                }
                let location = format!("{}!{}", sheet_name, address);

                let Some(strategy) = self.strategies.get(&sentinel) else {
                    let detail = summary
                        .details
                        .entry(sentinel)
                        .or_insert_with(|| RepairDetail::new(METHOD_FLAG_ONLY));
                    detail.flagged += 1;
                    detail.locations.push(location);
                    continue;
                };

                let outcome = (strategy.apply)(cell);
                if outcome == RepairOutcome::AlreadyRepaired {
                    continue;
                }
                let detail = summary
                    .details
                    .entry(sentinel)
                    .or_insert_with(|| RepairDetail::new(strategy.method));
                detail.attempted += 1;
                summary.repairs_attempted += 1;
                if outcome == RepairOutcome::Repaired {
                    detail.successful += 1;
                    summary.repairs_successful += 1;
                    repaired.push(address);
                    tracing::info!(cell = %location, error = %sentinel, method = strategy.method, "repaired");
                } else {
                    tracing::warn!(cell = %location, error = %sentinel, "repair failed");
                    detail.locations.push(location);
                }
            }
            for address in repaired {
                sheet.mark_dirty(address);
            }
        }

        summary
    }
}

/// In-memory repair with the default strategies
pub fn repair_workbook(
    workbook: &mut Workbook,
    selection: Option<&BTreeSet<ErrorSentinel>>,
) -> RepairSummary {
    RepairEngine::default().repair(workbook, selection)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    Success,
    PartialSuccess,
    DryRun,
    Error,
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RepairStatus::Success => "success",
            RepairStatus::PartialSuccess => "partial_success",
            RepairStatus::DryRun => "dry_run",
            RepairStatus::Error => "error",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone)]
pub struct RepairOptions {
    /// `None` repairs every sentinel
    pub error_types: Option<BTreeSet<ErrorSentinel>>,
    pub backup: bool,
    /// Where backups go; the workbook's own directory when `None`
    pub backup_dir: Option<PathBuf>,
    /// Scan first and stop early when the workbook is clean
    pub validate_first: bool,
    /// Report what would change without touching the file
    pub dry_run: bool,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            error_types: None,
            backup: true,
            backup_dir: None,
            validate_first: false,
            dry_run: false,
        }
    }
}

/// Full record of a file repair run
#[derive(Debug, Clone, Serialize)]
pub struct RepairResult {
    pub status: RepairStatus,
    pub file: PathBuf,
    pub dry_run: bool,
    pub repairs_attempted: usize,
    pub repairs_successful: usize,
    pub backup_file: Option<PathBuf>,
    pub details: BTreeMap<ErrorSentinel, RepairDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_errors: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors_that_would_be_repaired: Option<usize>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RepairResult {
    fn new(path: &Path, dry_run: bool) -> Self {
        Self {
            status: RepairStatus::Success,
            file: path.to_path_buf(),
            dry_run,
            repairs_attempted: 0,
            repairs_successful: 0,
            backup_file: None,
            details: BTreeMap::new(),
            pre_validation: None,
            post_validation: None,
            remaining_errors: None,
            errors_that_would_be_repaired: None,
            message: String::new(),
            error: None,
        }
    }

    fn unreadable(mut self, message: String) -> Self {
        self.status = RepairStatus::Error;
        self.message = format!("Could not read workbook: {}", message);
        self.error = Some(message);
        self
    }

    fn absorb(&mut self, summary: RepairSummary) {
        self.repairs_attempted = summary.repairs_attempted;
        self.repairs_successful = summary.repairs_successful;
        self.details = summary.details;
    }
}

/// Load for repair; `Ok(Err(message))` when the file is not a readable workbook
fn load_for_repair(path: &Path) -> GuardResult<Result<Workbook, String>> {
    match Workbook::load(path) {
        Ok(workbook) => Ok(Ok(workbook)),
        Err(GuardError::CorruptWorkbook { message, .. }) => Ok(Err(message)),
        Err(e) => Err(e),
    }
}

/// The repair is already on disk; a leftover lock file is only logged
fn release_after_save(lock: Option<FileLock>, path: &Path) {
    if let Some(lock) = lock {
        if let Err(e) = lock.release() {
            tracing::warn!(path = %path.display(), error = %e, "could not remove lock file");
        }
    }
}

/// Repair a workbook file in place.
///
/// Order: lock, load, backup, repair, save, release, re-scan. A backup
/// failure aborts before the file is written. Unreadable workbooks come back
/// as an `error` result, not an `Err`.
pub fn repair_file(
    path: &Path,
    options: &RepairOptions,
    config: &GuardConfig,
) -> GuardResult<RepairResult> {
    if !path.is_file() {
        return Err(GuardError::FileNotFound(path.to_path_buf()));
    }
    let engine = RepairEngine::default();
    let selection = options.error_types.as_ref();
    let mut result = RepairResult::new(path, options.dry_run);

    if options.validate_first {
        let pre = scan_file(path);
        if pre.status() == ReportStatus::Error {
            let message = pre.error().unwrap_or("unknown error").to_string();
            result.pre_validation = Some(pre);
            return Ok(result.unreadable(message));
        }
        let clean = !pre.has_errors();
        result.pre_validation = Some(pre);
        if clean {
            result.message = "No errors found, no repairs needed".to_string();
            return Ok(result);
        }
    }

    if options.dry_run {
        let mut workbook = match load_for_repair(path)? {
            Ok(workbook) => workbook,
            Err(message) => return Ok(result.unreadable(message)),
        };
        let preview = engine.repair(&mut workbook, selection);
        result.status = RepairStatus::DryRun;
        result.errors_that_would_be_repaired = Some(preview.repairs_attempted);
        result.details = preview.details;
        result.message = "Dry run - no changes made".to_string();
        return Ok(result);
    }

    let lock = if config.locking {
        Some(FileLock::acquire(
            path,
            config.lock_timeout,
            config.lock_poll_interval,
        )?)
    } else {
        None
    };

    let mut workbook = match load_for_repair(path)? {
        Ok(workbook) => workbook,
        Err(message) => return Ok(result.unreadable(message)),
    };

    if options.backup {
        result.backup_file = Some(create_backup_in(path, options.backup_dir.as_deref())?);
    }

    let summary = engine.repair(&mut workbook, selection);
    if summary.repairs_successful > 0 {
        workbook.save(path)?;
    }
    result.absorb(summary);

    release_after_save(lock, path);

    let post = scan_file(path);
    match post.status() {
        ReportStatus::Success => {
            result.status = RepairStatus::Success;
            result.message = "All errors repaired successfully".to_string();
        }
        ReportStatus::ErrorsFound => {
            result.status = RepairStatus::PartialSuccess;
            result.remaining_errors = Some(post.total_errors());
            result.message = format!(
                "{} repairs made, {} errors remain",
                result.repairs_successful,
                post.total_errors()
            );
        }
        ReportStatus::Error => {
            result.status = RepairStatus::Error;
            result.error = post.error().map(str::to_string);
            result.message = "Repaired workbook could not be re-read".to_string();
        }
    }
    result.post_validation = Some(post);

    Ok(result)
}
