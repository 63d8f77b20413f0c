use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use ledger_ingest::analysis::compare::ComparisonFilter;
use ledger_ingest::catalog::Catalog;
use ledger_ingest::config::EngineConfig;
use ledger_ingest::io::{self, excel_write};
use ledger_ingest::logging;
use ledger_ingest::model::DuplicateStatus;
use ledger_ingest::pipeline::Engine;
use ledger_ingest::{IngestError, Result};
use serde::Serialize;
use tracing::info;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    logging::init_tracing(cli.verbose)?;
    match cli.command {
        Command::Analyze(args) => execute_analyze(args),
        Command::Classify(args) => execute_classify(args),
    }
}

fn execute_analyze(args: AnalyzeArgs) -> Result<()> {
    check_inputs(&args.source.inputs)?;
    let mut config = match &args.source.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    args.source.apply(&mut config);
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(timeout) = args.timeout_secs {
        config.file_timeout_secs = timeout;
    }

    let comparisons = args
        .compare
        .iter()
        .map(|pair| parse_pair(pair))
        .collect::<Result<Vec<_>>>()?;
    let filter = args.comparison_filter()?;

    let catalog = Arc::new(Catalog::load(&args.source.catalog)?);
    let engine = Engine::new(catalog, config);
    let mut report = engine.process_files(&args.source.inputs)?;
    for (a, b) in comparisons {
        let comparison = engine.compare(&report.groups, &a, &b, &filter)?;
        report.comparisons.push(comparison);
    }

    if let Some(path) = &args.xlsx {
        excel_write::write_grouped_sets(path, &report.groups)?;
        info!(output = %path.display(), "record sets written");
    }
    emit(&report, args.output.as_ref())
}

fn execute_classify(args: ClassifyArgs) -> Result<()> {
    check_inputs(&args.source.inputs)?;
    let mut config = match &args.source.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    args.source.apply(&mut config);

    let catalog = Arc::new(Catalog::load(&args.source.catalog)?);
    let engine = Engine::new(catalog, config);
    let mut matches = Vec::new();
    for input in &args.source.inputs {
        matches.extend(engine.classify(input)?);
    }
    emit(&matches, None)
}

fn check_inputs(inputs: &[PathBuf]) -> Result<()> {
    for input in inputs {
        if !input.exists() {
            return Err(IngestError::MissingInput(input.clone()));
        }
        if !io::is_supported(input) {
            return Err(IngestError::UnsupportedInput(input.clone()));
        }
    }
    Ok(())
}

fn parse_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((a, b)) if !a.trim().is_empty() && !b.trim().is_empty() => {
            Ok((a.trim().to_string(), b.trim().to_string()))
        }
        _ => Err(IngestError::Comparison(format!(
            "expected CATEGORY_A:CATEGORY_B, got '{raw}'"
        ))),
    }
}

fn emit<T: Serialize>(value: &T, output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, json)?,
        None => println!("{json}"),
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Recognise, normalise and analyse financial spreadsheet exports."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Normalise a batch of files and print the analysis report as JSON.
    Analyze(AnalyzeArgs),
    /// Report the detected category and header row of every sheet.
    Classify(ClassifyArgs),
}

#[derive(clap::Args)]
struct SourceArgs {
    /// Schema catalog: a JSON document or the parameter workbook.
    #[arg(long)]
    catalog: PathBuf,

    /// Spreadsheet or CSV files to process.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Optional JSON file overriding engine defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Leading rows searched for a header row.
    #[arg(long)]
    max_scan_rows: Option<usize>,
}

impl SourceArgs {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(rows) = self.max_scan_rows {
            config.max_scan_rows = rows;
        }
    }
}

#[derive(clap::Args)]
struct AnalyzeArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also write the normalised record sets to this workbook.
    #[arg(long)]
    xlsx: Option<PathBuf>,

    /// Worker threads used to normalise files.
    #[arg(long)]
    workers: Option<usize>,

    /// Processing deadline per file, in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Category pair to compare, as CATEGORY_A:CATEGORY_B. Repeatable.
    #[arg(long)]
    compare: Vec<String>,

    /// Compare only records dated on or after this day (YYYY-MM-DD).
    #[arg(long)]
    compare_from: Option<NaiveDate>,

    /// Compare only records dated on or before this day (YYYY-MM-DD).
    #[arg(long)]
    compare_to: Option<NaiveDate>,

    /// Duplicate status admitted to comparisons, e.g. "NO duplicates".
    /// Repeatable; all statuses when omitted.
    #[arg(long = "compare-status")]
    compare_statuses: Vec<String>,
}

impl AnalyzeArgs {
    fn comparison_filter(&self) -> Result<ComparisonFilter> {
        let statuses = self
            .compare_statuses
            .iter()
            .map(|raw| {
                DuplicateStatus::parse(raw).ok_or_else(|| {
                    IngestError::Comparison(format!("unknown duplicate status '{raw}'"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ComparisonFilter {
            from: self.compare_from,
            to: self.compare_to,
            statuses,
        })
    }
}

#[derive(clap::Args)]
struct ClassifyArgs {
    #[command(flatten)]
    source: SourceArgs,
}
