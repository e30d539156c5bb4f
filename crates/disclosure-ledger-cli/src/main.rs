use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use disclosure_ledger_api::{parse_extraction, FactFamily, IngestRequest, LedgerApi, PipelineConfig};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "dl")]
#[command(about = "Disclosure Ledger CLI")]
struct Cli {
    #[arg(long, default_value = "./disclosure_ledger.sqlite3")]
    db: PathBuf,

    /// YAML pipeline configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    /// Print the canonical form of an extraction file.
    Normalize(NormalizeArgs),
    /// Normalize, register and materialize one report version.
    Ingest(IngestArgs),
    Facts(FactsArgs),
    /// Look up the evidence cell behind an issue.
    Cell(CellArgs),
    Check(CheckArgs),
    Diff(DiffArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct NormalizeArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct IngestArgs {
    #[arg(long)]
    report_id: i64,
    #[arg(long)]
    version_id: i64,
    #[arg(long)]
    organization: String,
    #[arg(long)]
    year: i32,
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Args)]
struct FactsArgs {
    #[arg(long)]
    report_id: i64,
    #[arg(long)]
    version_id: i64,
    #[arg(long, value_enum)]
    family: Option<FamilyArg>,
}

#[derive(Debug, Args)]
struct CellArgs {
    #[arg(long)]
    version_id: i64,
    #[arg(long)]
    cell_ref: String,
}

#[derive(Debug, Args)]
struct CheckArgs {
    #[arg(long)]
    version_id: i64,
    #[arg(long, default_value_t = false)]
    cross_year: bool,
}

#[derive(Debug, Args)]
struct DiffArgs {
    #[arg(long)]
    old: i64,
    #[arg(long)]
    new: i64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FamilyArg {
    ActiveDisclosure,
    Application,
    LegalProceeding,
}

impl FamilyArg {
    fn into_family(self) -> FactFamily {
        match self {
            Self::ActiveDisclosure => FactFamily::ActiveDisclosure,
            Self::Application => FactFamily::Application,
            Self::LegalProceeding => FactFamily::LegalProceeding,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let api = LedgerApi::with_config(cli.db, config);

    match cli.command {
        Command::Db { command } => run_db(command, &api),
        Command::Normalize(args) => run_normalize(&args),
        Command::Ingest(args) => run_ingest(args, &api),
        Command::Facts(args) => run_facts(&args, &api),
        Command::Cell(args) => run_cell(&args, &api),
        Command::Check(args) => run_check(&args, &api),
        Command::Diff(args) => run_diff(&args, &api),
    }
}

fn run_db(command: DbCommand, api: &LedgerApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty(),
                "inferred_from_legacy": status.inferred_from_legacy
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::IntegrityCheck => {
            let report = api.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn read_extraction(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read extraction file {}", path.display()))?;
    Ok(parse_extraction(&raw))
}

fn run_normalize(args: &NormalizeArgs) -> Result<()> {
    let canonical = LedgerApi::normalize_extraction(&read_extraction(&args.input)?);
    emit_json(serde_json::json!({ "report": canonical.into_value() }))
}

fn run_ingest(args: IngestArgs, api: &LedgerApi) -> Result<()> {
    let raw = read_extraction(&args.input)?;
    let outcome = api.ingest(IngestRequest {
        report_id: args.report_id,
        version_id: args.version_id,
        organization: args.organization,
        report_year: args.year,
        raw,
    })?;
    emit_json(serde_json::to_value(&outcome).context("failed to serialize ingest outcome")?)
}

fn run_facts(args: &FactsArgs, api: &LedgerApi) -> Result<()> {
    let view = api.facts(args.report_id, args.version_id, args.family.map(FamilyArg::into_family))?;
    emit_json(serde_json::to_value(&view).context("failed to serialize facts")?)
}

fn run_cell(args: &CellArgs, api: &LedgerApi) -> Result<()> {
    let cell = api.cell_evidence(args.version_id, &args.cell_ref)?;
    emit_json(serde_json::json!({
        "version_id": args.version_id,
        "cell": cell
    }))
}

fn run_check(args: &CheckArgs, api: &LedgerApi) -> Result<()> {
    let report = api.check_version(args.version_id, args.cross_year)?;
    emit_json(serde_json::to_value(&report).context("failed to serialize check report")?)
}

fn run_diff(args: &DiffArgs, api: &LedgerApi) -> Result<()> {
    let diff = api.diff_versions(args.old, args.new)?;
    emit_json(serde_json::to_value(&diff).context("failed to serialize diff")?)
}
