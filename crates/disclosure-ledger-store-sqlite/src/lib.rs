use std::path::Path;

use anyhow::{anyhow, Context, Result};
use disclosure_ledger_core::{
    extraction_object, flatten_report, normalize, ActiveDisclosureFact, ApplicationFact,
    CoreError, FactSnapshot, Flattened, LegalProceedingFact, SemanticKind, ValueCell,
    CLASSIFIER_REVISION,
};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use ulid::Ulid;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS cells (
  report_id INTEGER NOT NULL,
  version_id INTEGER NOT NULL,
  table_id TEXT NOT NULL,
  row_key TEXT NOT NULL,
  col_key TEXT NOT NULL,
  cell_ref TEXT NOT NULL,
  value_raw TEXT,
  value_num REAL,
  value_semantic TEXT NOT NULL CHECK (value_semantic IN ('ZERO','EMPTY','NA','TEXT','NUMERIC')),
  normalized_value TEXT,
  CHECK ((value_num IS NULL) = (value_semantic NOT IN ('ZERO','NUMERIC'))),
  UNIQUE(version_id, cell_ref)
);

CREATE TABLE IF NOT EXISTS fact_active_disclosure (
  report_id INTEGER NOT NULL,
  version_id INTEGER NOT NULL,
  category TEXT NOT NULL,
  made_count REAL,
  repealed_count REAL,
  valid_count REAL,
  processed_count REAL,
  amount REAL,
  UNIQUE(version_id, category)
);

CREATE TABLE IF NOT EXISTS fact_application (
  report_id INTEGER NOT NULL,
  version_id INTEGER NOT NULL,
  applicant_type TEXT NOT NULL,
  response_type TEXT NOT NULL,
  count REAL,
  UNIQUE(version_id, applicant_type, response_type)
);

CREATE TABLE IF NOT EXISTS fact_legal_proceeding (
  report_id INTEGER NOT NULL,
  version_id INTEGER NOT NULL,
  case_type TEXT NOT NULL,
  result_type TEXT NOT NULL,
  count REAL,
  UNIQUE(version_id, case_type, result_type)
);

CREATE INDEX IF NOT EXISTS idx_cells_report_version ON cells(report_id, version_id);
CREATE INDEX IF NOT EXISTS idx_fact_active_disclosure_report ON fact_active_disclosure(report_id, version_id);
CREATE INDEX IF NOT EXISTS idx_fact_application_report ON fact_application(report_id, version_id);
CREATE INDEX IF NOT EXISTS idx_fact_legal_proceeding_report ON fact_legal_proceeding(report_id, version_id);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS report_versions (
  version_id INTEGER PRIMARY KEY,
  report_id INTEGER NOT NULL,
  organization TEXT NOT NULL,
  report_year INTEGER NOT NULL,
  ingestion_id TEXT NOT NULL UNIQUE,
  canonical_json TEXT NOT NULL,
  content_sha256 TEXT NOT NULL,
  classifier_rev TEXT NOT NULL,
  ingested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_report_versions_org_year ON report_versions(organization, report_year);
CREATE INDEX IF NOT EXISTS idx_report_versions_report ON report_versions(report_id);
";

const VERSION_COLUMNS: &str = "version_id, report_id, organization, report_year, ingestion_id,
     content_sha256, classifier_rev, ingested_at";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterializeSummary {
    pub facts_created: usize,
    pub cells_created: usize,
}

/// Registry entry for one ingested report version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportVersion {
    pub version_id: i64,
    pub report_id: i64,
    pub organization: String,
    pub report_year: i32,
    pub ingestion_id: String,
    pub content_sha256: String,
    pub classifier_rev: String,
    pub ingested_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReportVersion {
    pub version_id: i64,
    pub report_id: i64,
    pub organization: String,
    pub report_year: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestOutcome {
    pub version: ReportVersion,
    pub materialized: MaterializeSummary,
}

/// Failure of a materialize or ingest call. `Parse` means the payload itself is bad
/// and retrying is pointless; `Storage` leaves the version's previous rows intact.
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error(transparent)]
    Parse(#[from] CoreError),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("failed to encode canonical report: {0}")]
    Encode(#[from] serde_json::Error),
}

impl MaterializeError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl SqliteStore {
    /// Open a SQLite-backed ledger and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when any migration step fails or the recorded version is newer
    /// than this build understands.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;
        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 1 {
            self.apply_migration(1, MIGRATION_001_SQL)?;
            version = 1;
        }

        if version < 2 {
            self.apply_migration(2, MIGRATION_002_SQL)?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    /// Record versions for tables created before `schema_migrations` existed.
    fn bootstrap_schema_version(&self) -> Result<i64> {
        if !table_exists(&self.conn, "cells")? {
            return Ok(0);
        }

        record_schema_version(&self.conn, 1)?;
        if table_exists(&self.conn, "report_versions")? {
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }
        Ok(1)
    }

    fn apply_migration(&mut self, version: i64, sql: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("failed to start migration v{version} transaction"))?;
        tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
        record_schema_version(&tx, version)?;
        tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
        tracing::info!(version, "applied schema migration");
        Ok(())
    }

    /// Flatten `payload` and replace every cell and fact row of `version_id` with the
    /// result, inside one immediate transaction.
    ///
    /// # Errors
    /// Returns [`MaterializeError::Parse`] before touching the database when the payload
    /// is not a JSON object, and [`MaterializeError::Storage`] when any write fails; the
    /// version then keeps its previous rows.
    pub fn materialize(
        &mut self,
        report_id: i64,
        version_id: i64,
        payload: &Value,
    ) -> Result<MaterializeSummary, MaterializeError> {
        let flattened = flatten_report(payload)?;

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let summary = replace_version_rows(&tx, report_id, version_id, &flattened)?;
        tx.commit()?;

        tracing::info!(
            report_id,
            version_id,
            facts_created = summary.facts_created,
            cells_created = summary.cells_created,
            "materialized report version"
        );
        Ok(summary)
    }

    /// Register a version and materialize it, atomically. Re-ingesting a version id
    /// replaces both its registry entry and its rows.
    ///
    /// Fact and cell rows come from the extraction as received, so a value it never
    /// carried stays `EMPTY`; the normalized report is stored for diffing. A payload
    /// that is not a JSON object is ingested as an empty report.
    ///
    /// # Errors
    /// Same as [`SqliteStore::materialize`], plus [`MaterializeError::Encode`] when the
    /// canonical report cannot be serialized.
    pub fn ingest(
        &mut self,
        version: &NewReportVersion,
        extraction: &Value,
    ) -> Result<IngestOutcome, MaterializeError> {
        let extracted = Value::Object(extraction_object(extraction));
        let flattened = flatten_report(&extracted)?;
        let canonical_json = serde_json::to_string(normalize(&extracted).as_value())?;
        let record = ReportVersion {
            version_id: version.version_id,
            report_id: version.report_id,
            organization: version.organization.clone(),
            report_year: version.report_year,
            ingestion_id: Ulid::new().to_string(),
            content_sha256: format!("{:x}", Sha256::digest(canonical_json.as_bytes())),
            classifier_rev: CLASSIFIER_REVISION.to_string(),
            ingested_at: now_rfc3339(),
        };

        let tx = self.conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO report_versions(
                version_id, report_id, organization, report_year, ingestion_id,
                canonical_json, content_sha256, classifier_rev, ingested_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(version_id) DO UPDATE SET
                report_id = excluded.report_id,
                organization = excluded.organization,
                report_year = excluded.report_year,
                ingestion_id = excluded.ingestion_id,
                canonical_json = excluded.canonical_json,
                content_sha256 = excluded.content_sha256,
                classifier_rev = excluded.classifier_rev,
                ingested_at = excluded.ingested_at",
            params![
                record.version_id,
                record.report_id,
                record.organization,
                record.report_year,
                record.ingestion_id,
                canonical_json,
                record.content_sha256,
                record.classifier_rev,
                record.ingested_at,
            ],
        )?;
        let materialized =
            replace_version_rows(&tx, version.report_id, version.version_id, &flattened)?;
        tx.commit()?;

        tracing::info!(
            report_id = record.report_id,
            version_id = record.version_id,
            organization = %record.organization,
            report_year = record.report_year,
            facts_created = materialized.facts_created,
            cells_created = materialized.cells_created,
            "ingested report version"
        );
        Ok(IngestOutcome { version: record, materialized })
    }

    /// Load one version's registry entry.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn version(&self, version_id: i64) -> Result<Option<ReportVersion>> {
        self.conn
            .query_row(
                &format!("SELECT {VERSION_COLUMNS} FROM report_versions WHERE version_id = ?1"),
                params![version_id],
                version_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load report version {version_id}"))
    }

    /// Latest ingested version of the year before `report_year` for the same organization.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn previous_year_version(
        &self,
        organization: &str,
        report_year: i32,
    ) -> Result<Option<ReportVersion>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {VERSION_COLUMNS} FROM report_versions
                     WHERE organization = ?1 AND report_year = ?2
                     ORDER BY ingested_at DESC, version_id DESC
                     LIMIT 1"
                ),
                params![organization, report_year - 1],
                version_from_row,
            )
            .optional()
            .with_context(|| {
                format!("failed to look up {organization} report for year {}", report_year - 1)
            })
    }

    /// The canonical report stored at ingest time.
    ///
    /// # Errors
    /// Returns an error when the query fails or the stored JSON is corrupt.
    pub fn canonical_report(&self, version_id: i64) -> Result<Option<Value>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT canonical_json FROM report_versions WHERE version_id = ?1",
                params![version_id],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("failed to load canonical report for version {version_id}"))?;

        raw.map(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("stored canonical report for version {version_id} is corrupt"))
        })
        .transpose()
    }

    /// Evidence lookup by `(version_id, cell_ref)`.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored semantic kind is unknown.
    pub fn cell(&self, version_id: i64, cell_ref: &str) -> Result<Option<ValueCell>> {
        self.conn
            .query_row(
                "SELECT table_id, row_key, col_key, cell_ref, value_raw, value_num,
                        value_semantic, normalized_value
                 FROM cells WHERE version_id = ?1 AND cell_ref = ?2",
                params![version_id, cell_ref],
                cell_from_row,
            )
            .optional()
            .with_context(|| format!("failed to load cell {cell_ref} of version {version_id}"))
    }

    /// Every cell of a version, in materialization order.
    ///
    /// # Errors
    /// Returns an error when the query fails or a stored semantic kind is unknown.
    pub fn cells_for_version(&self, version_id: i64) -> Result<Vec<ValueCell>> {
        let mut stmt = self.conn.prepare(
            "SELECT table_id, row_key, col_key, cell_ref, value_raw, value_num,
                    value_semantic, normalized_value
             FROM cells WHERE version_id = ?1
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![version_id], cell_from_row)?;

        let mut cells = Vec::new();
        for row in rows {
            cells.push(row.with_context(|| format!("failed to decode cell of version {version_id}"))?);
        }
        Ok(cells)
    }

    /// Cells of a version keyed for consistency evaluation.
    ///
    /// # Errors
    /// See [`SqliteStore::cells_for_version`].
    pub fn load_snapshot(&self, version_id: i64) -> Result<FactSnapshot> {
        Ok(self.cells_for_version(version_id)?.into_iter().collect())
    }

    /// Active disclosure facts, optionally restricted to one category.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn active_disclosure_facts(
        &self,
        report_id: i64,
        version_id: i64,
        category: Option<&str>,
    ) -> Result<Vec<ActiveDisclosureFact>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, made_count, repealed_count, valid_count, processed_count, amount
             FROM fact_active_disclosure
             WHERE report_id = ?1 AND version_id = ?2 AND (?3 IS NULL OR category = ?3)
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![report_id, version_id, category], |row| {
            Ok(ActiveDisclosureFact {
                category: row.get(0)?,
                made_count: row.get(1)?,
                repealed_count: row.get(2)?,
                valid_count: row.get(3)?,
                processed_count: row.get(4)?,
                amount: row.get(5)?,
            })
        })?;

        let mut facts = Vec::new();
        for row in rows {
            facts.push(row?);
        }
        Ok(facts)
    }

    /// Application matrix facts, optionally restricted to one applicant column.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn application_facts(
        &self,
        report_id: i64,
        version_id: i64,
        applicant_type: Option<&str>,
    ) -> Result<Vec<ApplicationFact>> {
        let mut stmt = self.conn.prepare(
            "SELECT applicant_type, response_type, count
             FROM fact_application
             WHERE report_id = ?1 AND version_id = ?2 AND (?3 IS NULL OR applicant_type = ?3)
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![report_id, version_id, applicant_type], |row| {
            Ok(ApplicationFact {
                applicant_type: row.get(0)?,
                response_type: row.get(1)?,
                count: row.get(2)?,
            })
        })?;

        let mut facts = Vec::new();
        for row in rows {
            facts.push(row?);
        }
        Ok(facts)
    }

    /// Review and litigation facts, optionally restricted to one case type.
    ///
    /// # Errors
    /// Returns an error when the query fails.
    pub fn legal_proceeding_facts(
        &self,
        report_id: i64,
        version_id: i64,
        case_type: Option<&str>,
    ) -> Result<Vec<LegalProceedingFact>> {
        let mut stmt = self.conn.prepare(
            "SELECT case_type, result_type, count
             FROM fact_legal_proceeding
             WHERE report_id = ?1 AND version_id = ?2 AND (?3 IS NULL OR case_type = ?3)
             ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![report_id, version_id, case_type], |row| {
            Ok(LegalProceedingFact {
                case_type: row.get(0)?,
                result_type: row.get(1)?,
                count: row.get(2)?,
            })
        })?;

        let mut facts = Vec::new();
        for row in rows {
            facts.push(row?);
        }
        Ok(facts)
    }

    /// Run quick-check, foreign-key-check, and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

fn replace_version_rows(
    tx: &Transaction<'_>,
    report_id: i64,
    version_id: i64,
    flattened: &Flattened,
) -> Result<MaterializeSummary, rusqlite::Error> {
    for table in ["cells", "fact_active_disclosure", "fact_application", "fact_legal_proceeding"] {
        tx.execute(&format!("DELETE FROM {table} WHERE version_id = ?1"), params![version_id])?;
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO fact_active_disclosure(
                report_id, version_id, category, made_count, repealed_count,
                valid_count, processed_count, amount
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for fact in &flattened.active_disclosure {
            insert.execute(params![
                report_id,
                version_id,
                fact.category,
                fact.made_count,
                fact.repealed_count,
                fact.valid_count,
                fact.processed_count,
                fact.amount,
            ])?;
        }
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO fact_application(report_id, version_id, applicant_type, response_type, count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for fact in &flattened.application {
            insert.execute(params![
                report_id,
                version_id,
                fact.applicant_type,
                fact.response_type,
                fact.count,
            ])?;
        }
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO fact_legal_proceeding(report_id, version_id, case_type, result_type, count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for fact in &flattened.legal_proceeding {
            insert.execute(params![
                report_id,
                version_id,
                fact.case_type,
                fact.result_type,
                fact.count,
            ])?;
        }
    }

    {
        let mut insert = tx.prepare(
            "INSERT INTO cells(
                report_id, version_id, table_id, row_key, col_key, cell_ref,
                value_raw, value_num, value_semantic, normalized_value
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;
        for cell in &flattened.cells {
            insert.execute(params![
                report_id,
                version_id,
                cell.table_id,
                cell.row_key,
                cell.col_key,
                cell.cell_ref,
                cell.value_raw,
                cell.value_num,
                cell.value_semantic.as_str(),
                cell.normalized_value,
            ])?;
        }
    }

    Ok(MaterializeSummary {
        facts_created: flattened.fact_count(),
        cells_created: flattened.cells.len(),
    })
}

fn cell_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ValueCell> {
    let semantic_raw: String = row.get(6)?;
    let value_semantic = SemanticKind::parse(&semantic_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown value_semantic: {semantic_raw}").into(),
        )
    })?;

    Ok(ValueCell {
        table_id: row.get(0)?,
        row_key: row.get(1)?,
        col_key: row.get(2)?,
        cell_ref: row.get(3)?,
        value_raw: row.get(4)?,
        value_num: row.get(5)?,
        value_semantic,
        normalized_value: row.get(7)?,
    })
}

fn version_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReportVersion> {
    Ok(ReportVersion {
        version_id: row.get(0)?,
        report_id: row.get(1)?,
        organization: row.get(2)?,
        report_year: row.get(3)?,
        ingestion_id: row.get(4)?,
        content_sha256: row.get(5)?,
        classifier_rev: row.get(6)?,
        ingested_at: row.get(7)?,
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
        row.get::<_, i64>(0)
    })
    .context("failed to read current schema version")
}

/// Recorded version, or the version implied by which tables exist when nothing has
/// been recorded yet.
fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, "cells")? {
        return Ok((0, false));
    }
    if table_exists(conn, "report_versions")? {
        return Ok((2, true));
    }
    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now_rfc3339()],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
