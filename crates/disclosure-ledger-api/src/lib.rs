//! Pipeline facade over one ledger database: ingest, check, diff and evidence lookup.

use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use disclosure_ledger_core::consistency::sort_issues;
use disclosure_ledger_core::{
    check_cross_year, check_within_year, diff_reports, normalize, summarize, ActiveDisclosureFact,
    ApplicationFact, CanonicalReport, CheckSummary, ConsistencyIssue, DiffResult,
    LegalProceedingFact, ValueCell,
};
use disclosure_ledger_store_sqlite::{
    IngestOutcome, IntegrityReport, NewReportVersion, ReportVersion, SchemaStatus, SqliteStore,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod config;

pub use config::{ConfigError, PipelineConfig};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    pub report_id: i64,
    pub version_id: i64,
    pub organization: String,
    pub report_year: i32,
    /// Extraction output as received.
    pub raw: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FactFamily {
    ActiveDisclosure,
    Application,
    LegalProceeding,
}

impl FactFamily {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActiveDisclosure => "active_disclosure",
            Self::Application => "application",
            Self::LegalProceeding => "legal_proceeding",
        }
    }
}

/// Fact rows of one version; families not requested are `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FactsView {
    pub report_id: i64,
    pub version_id: i64,
    pub active_disclosure: Option<Vec<ActiveDisclosureFact>>,
    pub application: Option<Vec<ApplicationFact>>,
    pub legal_proceeding: Option<Vec<LegalProceedingFact>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckReport {
    pub version_id: i64,
    pub cross_year: bool,
    /// Version the cross-year formulas were evaluated against, if one was found.
    pub previous_version_id: Option<i64>,
    pub summary: CheckSummary,
    pub issues: Vec<ConsistencyIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionDiff {
    pub old_version_id: i64,
    pub new_version_id: i64,
    #[serde(flatten)]
    pub result: DiffResult,
}

#[derive(Debug, Clone)]
pub struct LedgerApi {
    db_path: PathBuf,
    config: PipelineConfig,
}

impl LedgerApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_config(db_path, PipelineConfig::default())
    }

    #[must_use]
    pub fn with_config(db_path: PathBuf, config: PipelineConfig) -> Self {
        Self { db_path, config }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run `SQLite` health probes.
    ///
    /// # Errors
    /// Returns an error when any probe fails to run.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.open_store()?.integrity_check()
    }

    /// Normalize raw extraction text without touching the database. Text that is not
    /// JSON degrades to the all-default report.
    #[must_use]
    pub fn normalize_text(raw: &str) -> CanonicalReport {
        Self::normalize_extraction(&parse_extraction(raw))
    }

    /// Normalize an already parsed extraction.
    #[must_use]
    pub fn normalize_extraction(raw: &Value) -> CanonicalReport {
        normalize(raw)
    }

    /// Register and materialize one report version. Facts come from the extraction as
    /// received; its normalized form is stored for diffing.
    ///
    /// # Errors
    /// Returns an error when the store cannot be migrated or the transactional write fails.
    pub fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let mut store = self.open_migrated_store()?;
        let version = NewReportVersion {
            version_id: request.version_id,
            report_id: request.report_id,
            organization: request.organization,
            report_year: request.report_year,
        };
        store
            .ingest(&version, &request.raw)
            .with_context(|| format!("failed to ingest version {}", request.version_id))
    }

    /// Fact rows of one version, optionally a single family.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn facts(
        &self,
        report_id: i64,
        version_id: i64,
        family: Option<FactFamily>,
    ) -> Result<FactsView> {
        let store = self.open_migrated_store()?;
        let wants = |candidate: FactFamily| family.is_none() || family == Some(candidate);

        let mut view = FactsView { report_id, version_id, ..FactsView::default() };
        if wants(FactFamily::ActiveDisclosure) {
            view.active_disclosure =
                Some(store.active_disclosure_facts(report_id, version_id, None)?);
        }
        if wants(FactFamily::Application) {
            view.application = Some(store.application_facts(report_id, version_id, None)?);
        }
        if wants(FactFamily::LegalProceeding) {
            view.legal_proceeding =
                Some(store.legal_proceeding_facts(report_id, version_id, None)?);
        }
        Ok(view)
    }

    /// Evidence lookup for one cell.
    ///
    /// # Errors
    /// Returns an error when the cell does not exist or the store cannot be read.
    pub fn cell_evidence(&self, version_id: i64, cell_ref: &str) -> Result<ValueCell> {
        let store = self.open_migrated_store()?;
        store
            .cell(version_id, cell_ref)?
            .ok_or_else(|| anyhow!("cell {cell_ref} not found for version {version_id}"))
    }

    /// Evaluate the within-year formulas, plus the cross-year formulas against the
    /// previous report-year of the same organization when `cross_year` is set.
    ///
    /// # Errors
    /// Returns an error when the version was never ingested, the configured formula
    /// set is invalid, or the store cannot be read.
    pub fn check_version(&self, version_id: i64, cross_year: bool) -> Result<CheckReport> {
        let store = self.open_migrated_store()?;
        let version = registered_version(&store, version_id)?;
        let current = store.load_snapshot(version_id)?;

        let mut issues = check_within_year(&current, &self.config.within_year_formulas()?)?;
        let mut previous_version_id = None;

        if cross_year {
            let previous = store.previous_year_version(&version.organization, version.report_year)?;
            let previous_snapshot = match &previous {
                Some(previous) => Some(store.load_snapshot(previous.version_id)?),
                None => {
                    tracing::warn!(
                        version_id,
                        organization = %version.organization,
                        report_year = version.report_year,
                        "no previous-year version; cross-year formulas are indeterminate"
                    );
                    None
                }
            };
            previous_version_id = previous.map(|previous| previous.version_id);
            issues.extend(check_cross_year(
                previous_snapshot.as_ref(),
                &current,
                &self.config.cross_year_formulas()?,
            )?);
            sort_issues(&mut issues);
        }

        let summary = summarize(&issues);
        tracing::info!(
            version_id,
            pass = summary.pass,
            fail = summary.fail,
            unknown = summary.unknown,
            "checked report version"
        );
        Ok(CheckReport { version_id, cross_year, previous_version_id, summary, issues })
    }

    /// Diff the canonical reports of two ingested versions.
    ///
    /// # Errors
    /// Returns an error when either version was never ingested.
    pub fn diff_versions(&self, old_version_id: i64, new_version_id: i64) -> Result<VersionDiff> {
        let store = self.open_migrated_store()?;
        let old = canonical_report(&store, old_version_id)?;
        let new = canonical_report(&store, new_version_id)?;
        let result = diff_reports(&old, &new, &self.config.diff_options());
        Ok(VersionDiff { old_version_id, new_version_id, result })
    }
}

/// Extraction text as a JSON value; text that is not JSON is kept as a string so
/// normalization can degrade it.
#[must_use]
pub fn parse_extraction(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn registered_version(store: &SqliteStore, version_id: i64) -> Result<ReportVersion> {
    store.version(version_id)?.ok_or_else(|| anyhow!("version {version_id} has not been ingested"))
}

fn canonical_report(store: &SqliteStore, version_id: i64) -> Result<Value> {
    store
        .canonical_report(version_id)?
        .ok_or_else(|| anyhow!("version {version_id} has not been ingested"))
}
