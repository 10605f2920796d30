use clap::{Parser, Subcommand};
use royalbit_sheetguard::cli::{self, FormulaArgs, Outcome, ValueArgs, ValueKind};
use royalbit_sheetguard::config::GuardConfig;
use royalbit_sheetguard::error::GuardResult;
use royalbit_sheetguard::excel::CellStyle;
use royalbit_sheetguard::validation::{ErrorSentinel, RepairOptions};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "sheetguard")]
#[command(about = "Formula integrity guard for Excel workbooks")]
#[command(long_about = "SheetGuard - Safe formula editing and error repair for .xlsx files

COMMANDS:
  validate    - Scan cached formula results for #DIV/0!, #REF!, ...
  repair      - Wrap #DIV/0! formulas in IFERROR, flag the rest
  sanitize    - Report dangerous constructs in a formula
  check-refs  - Verify that every referenced sheet exists
  add-formula - Write a sanitized, reference-checked formula
  set-value   - Write a literal value
  get-value   - Read one cell
  info        - Workbook metadata
  create      - Build a workbook from a JSON/YAML structure
  export-csv  - Write one sheet as CSV

OUTPUT:
  JSON on stdout. Logs go to stderr (RUST_LOG=royalbit_sheetguard=debug).

EXIT CODES:
  0 success | 1 errors found / partial repair | 2 invalid address
  3 security rejected | 4 invalid reference | 5 lock timeout
  6 corrupt workbook | 7 backup failed | 8 file not found
  9 sheet error | 10 formula/structure error | 11 I/O error

EXAMPLES:
  sheetguard validate model.xlsx --detailed
  sheetguard repair model.xlsx --validate-first --error-types '#DIV/0!'
  sheetguard add-formula model.xlsx Model B5 '=Inputs!B2*(1+Inputs!B3)'")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Seconds to wait for another writer's lock
    #[arg(long, global = true, env = "SHEETGUARD_LOCK_TIMEOUT", default_value_t = 10.0)]
    lock_timeout: f64,

    /// Skip the advisory lock file
    #[arg(long, global = true, env = "SHEETGUARD_NO_LOCK")]
    no_lock: bool,

    /// Colored human output instead of JSON (validate, repair, errors)
    #[arg(long, global = true)]
    text: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan cached formula results for error values
    Validate {
        /// Excel file (.xlsx)
        file: PathBuf,

        /// Include every error location (default: first 5 per type)
        #[arg(long)]
        detailed: bool,
    },

    #[command(long_about = "Repair formula errors in place.

REPAIR METHODS:
  #DIV/0!  Wrap formula in IFERROR(..., 0)
  others   Flagged for manual review, formula untouched

A timestamped backup (<name>_backup_YYYYmmdd_HHMMSS.xlsx) is written first,
next to the workbook or into --backup-dir, unless --no-backup is given. Only
the repaired cells are rewritten; formatting and notes are kept. The workbook
is re-scanned afterwards.")]
    /// Repair formula errors in place
    Repair {
        /// Excel file (.xlsx)
        file: PathBuf,

        /// Only repair these error types (e.g. '#DIV/0!', div/0, ref)
        #[arg(long, value_delimiter = ',')]
        error_types: Vec<ErrorSentinel>,

        /// Do not create a backup copy
        #[arg(long)]
        no_backup: bool,

        /// Directory for the backup copy (default: next to the workbook)
        #[arg(long, value_name = "DIR", conflicts_with = "no_backup")]
        backup_dir: Option<PathBuf>,

        /// Scan first and stop if the workbook is clean
        #[arg(long)]
        validate_first: bool,

        /// Report what would change without writing
        #[arg(short = 'n', long)]
        dry_run: bool,
    },

    /// Normalize a formula and report dangerous constructs
    Sanitize {
        formula: String,

        /// Report warnings without rejecting
        #[arg(long)]
        allow_dangerous: bool,
    },

    /// Check that every sheet a formula references exists
    CheckRefs {
        formula: String,

        /// Read sheet names from this workbook
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Known sheet names (comma separated or repeated)
        #[arg(short, long = "sheet", value_delimiter = ',')]
        sheets: Vec<String>,
    },

    /// Write a sanitized, reference-checked formula
    AddFormula {
        file: PathBuf,
        sheet: String,
        cell: String,
        formula: String,

        /// Write even if the sanitizer warns
        #[arg(long)]
        allow_dangerous: bool,

        /// Skip the sheet reference check
        #[arg(long)]
        no_validate_refs: bool,
    },

    /// Write a literal value
    SetValue {
        file: PathBuf,
        sheet: String,
        cell: String,
        value: String,

        /// How to interpret VALUE
        #[arg(long = "type", value_enum, default_value_t = ValueKind::Auto)]
        kind: ValueKind,

        /// Named style: input, formula, assumption
        #[arg(long)]
        style: Option<CellStyle>,

        /// Excel number format, e.g. '#,##0.00'
        #[arg(long)]
        number_format: Option<String>,
    },

    /// Read one cell (value, formula, style, comment)
    GetValue {
        file: PathBuf,
        sheet: String,
        cell: String,
    },

    /// Workbook metadata: sheets, formula and data cell counts
    Info { file: PathBuf },

    /// Build a workbook from a JSON/YAML structure document
    Create {
        /// Output Excel file (.xlsx)
        output: PathBuf,

        /// Structure document (.json, .yaml)
        #[arg(short, long)]
        structure: PathBuf,

        /// Scan the result after writing
        #[arg(long)]
        validate: bool,

        /// Replace an existing output file
        #[arg(long)]
        overwrite: bool,
    },

    /// Write one sheet as CSV
    ExportCsv {
        file: PathBuf,
        sheet: String,
        output: PathBuf,

        /// Limit to a range, e.g. A1:D20
        #[arg(short, long)]
        range: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "royalbit_sheetguard=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> GuardResult<Outcome> {
    let mut config = GuardConfig::default()
        .with_lock_timeout(Duration::from_secs_f64(cli.lock_timeout.max(0.0)));
    if cli.no_lock {
        config = config.without_locking();
    }
    let text = cli.text;

    match cli.command {
        Commands::Validate { file, detailed } => cli::validate(file, detailed, text, &config),

        Commands::Repair {
            file,
            error_types,
            no_backup,
            backup_dir,
            validate_first,
            dry_run,
        } => {
            let options = RepairOptions {
                error_types: None,
                backup: !no_backup,
                backup_dir,
                validate_first,
                dry_run,
            };
            cli::repair(file, error_types, options, text, &config)
        }

        Commands::Sanitize {
            formula,
            allow_dangerous,
        } => cli::sanitize_formula(formula, allow_dangerous),

        Commands::CheckRefs {
            formula,
            file,
            sheets,
        } => cli::check_refs(formula, file, sheets),

        Commands::AddFormula {
            file,
            sheet,
            cell,
            formula,
            allow_dangerous,
            no_validate_refs,
        } => cli::add_formula(
            file,
            FormulaArgs {
                sheet,
                cell,
                formula,
                allow_dangerous,
                validate_refs: !no_validate_refs,
            },
            &config,
        ),

        Commands::SetValue {
            file,
            sheet,
            cell,
            value,
            kind,
            style,
            number_format,
        } => cli::set_value(
            file,
            ValueArgs {
                sheet,
                cell,
                value,
                kind,
                style,
                number_format,
            },
            &config,
        ),

        Commands::GetValue { file, sheet, cell } => cli::get_value(file, sheet, cell),

        Commands::Info { file } => cli::info(file),

        Commands::Create {
            output,
            structure,
            validate,
            overwrite,
        } => cli::create(output, structure, validate, overwrite),

        Commands::ExportCsv {
            file,
            sheet,
            output,
            range,
        } => cli::export_csv(file, sheet, output, range),
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let text = cli.text;

    let code = match run(cli) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            tracing::debug!(error = %e, kind = e.kind(), "command failed");
            cli::report_error(&e, text);
            e.exit_code()
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
