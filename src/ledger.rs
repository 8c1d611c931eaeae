//! Append-only audit ledger.
//!
//! SQLite-backed, single-writer. Three relations: specifications (by
//! control id and version), manifests (one row per `(alias, hash)` ever
//! seen), and executions (by UUID, holding the verbatim SQL, verdict,
//! counts, inline evidence hashes, and sanitized exception sample).
//! Writes are idempotent by primary key and there is no update path:
//! a recorded execution cannot be mutated through this API.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::manifest::{EvidenceManifest, ManifestEntry};
use crate::report::ExecutionReport;
use crate::spec::ControlSpec;

/// Errors from ledger operations. A failed write means the execution is
/// not recorded; the caller decides what to do with the report.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution {0} is not recorded in the ledger")]
    UnknownExecution(uuid::Uuid),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Who approved a specification, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalMetadata {
    pub approved_by: String,
    pub approved_at: chrono::DateTime<chrono::Utc>,
}

/// One row of the execution history listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub control_id: String,
    pub specification_version: String,
    pub verdict: String,
    pub exception_count: i64,
    pub total_population: i64,
    pub exception_rate_percent: f64,
    pub executed_at: String,
}

/// Integrity of one dataset referenced by an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityStatus {
    /// Inline hash matches the current manifests row.
    Valid,
    /// Inline hash disagrees with the current manifests row.
    Tampered,
    /// The alias has no row in the manifests relation.
    Missing,
}

/// One line of the integrity view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetIntegrity {
    pub dataset_alias: String,
    pub execution_hash: String,
    pub ledger_hash: Option<String>,
    pub status: IntegrityStatus,
}

/// The append-only ledger. Writes serialize behind an internal mutex;
/// reads go through the same connection and are therefore serialized
/// too, which is acceptable for an audit trail.
pub struct AuditLedger {
    conn: Mutex<Connection>,
}

impl AuditLedger {
    /// Open or create the ledger at the given path.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init()?;
        info!(path = %path.display(), "audit ledger opened");
        Ok(ledger)
    }

    /// In-memory ledger, for tests and dry runs.
    pub fn open_in_memory() -> LedgerResult<Self> {
        let ledger = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        ledger.init()?;
        Ok(ledger)
    }

    fn init(&self) -> LedgerResult<()> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS specifications (
                control_id TEXT NOT NULL,
                version TEXT NOT NULL,
                spec_json TEXT NOT NULL,
                owner_role TEXT NOT NULL,
                approved_by TEXT NOT NULL,
                approved_at TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (control_id, version)
            );

            CREATE TABLE IF NOT EXISTS manifests (
                dataset_alias TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                path TEXT NOT NULL,
                row_count INTEGER NOT NULL,
                schema_fingerprint TEXT NOT NULL,
                source_system TEXT,
                extracted_at TEXT,
                schema_version TEXT,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (dataset_alias, content_hash)
            );

            CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                control_id TEXT NOT NULL,
                specification_version TEXT NOT NULL,
                verdict TEXT NOT NULL CHECK (verdict IN ('PASS', 'FAIL', 'ERROR')),
                error_kind TEXT,
                error_message TEXT,
                exception_count INTEGER NOT NULL,
                total_population INTEGER NOT NULL,
                exception_rate_percent REAL NOT NULL,
                materiality_threshold_percent REAL NOT NULL,
                query_text TEXT NOT NULL,
                manifest_hashes TEXT NOT NULL,
                exceptions_sample TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_executions_control
                ON executions (control_id);
            CREATE INDEX IF NOT EXISTS idx_executions_verdict
                ON executions (verdict);
            CREATE INDEX IF NOT EXISTS idx_executions_date
                ON executions (executed_at);
            ",
        )?;
        Ok(())
    }

    /// Record an approved specification. Idempotent on
    /// `(control_id, version)`.
    pub fn record_specification(
        &self,
        spec: &ControlSpec,
        approval: &ApprovalMetadata,
    ) -> LedgerResult<()> {
        let spec_json = serde_json::to_string_pretty(spec)?;
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.execute(
            "INSERT OR IGNORE INTO specifications
             (control_id, version, spec_json, owner_role, approved_by, approved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                spec.governance.control_id,
                spec.governance.version,
                spec_json,
                spec.governance.owner_role,
                approval.approved_by,
                approval.approved_at.to_rfc3339(),
            ],
        )?;
        debug!(
            control_id = %spec.governance.control_id,
            version = %spec.governance.version,
            "specification recorded"
        );
        Ok(())
    }

    /// Retrieve a recorded specification.
    pub fn get_specification(
        &self,
        control_id: &str,
        version: &str,
    ) -> LedgerResult<Option<ControlSpec>> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let json: Option<String> = conn
            .query_row(
                "SELECT spec_json FROM specifications
                 WHERE control_id = ?1 AND version = ?2",
                params![control_id, version],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(
                ControlSpec::from_json(&json)
                    .map_err(|e| LedgerError::Json(serde::de::Error::custom(e.to_string())))?,
            )),
            None => Ok(None),
        }
    }

    /// Record one execution together with any manifest rows it is the
    /// first to reference, in a single transaction. Idempotent on every
    /// primary key: a control never appears in a partially written
    /// state.
    pub fn record_execution(
        &self,
        report: &ExecutionReport,
        manifest: &EvidenceManifest,
    ) -> LedgerResult<()> {
        let hashes_json = serde_json::to_string(&report.manifest_hashes)?;
        let sample_json = serde_json::to_string(&report.exceptions_sample)?;

        let mut conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = conn.transaction()?;

        for entry in manifest.entries() {
            insert_manifest_row(&tx, entry)?;
        }

        tx.execute(
            "INSERT OR IGNORE INTO executions
             (execution_id, control_id, specification_version, verdict, error_kind,
              error_message, exception_count, total_population, exception_rate_percent,
              materiality_threshold_percent, query_text, manifest_hashes,
              exceptions_sample, executed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                report.execution_id.to_string(),
                report.control_id,
                report.specification_version,
                report.verdict.as_str(),
                report.error_kind.map(|k| k.as_str()),
                report.error_message,
                report.exception_count,
                report.total_population,
                report.exception_rate_percent,
                report.materiality_threshold_percent,
                report.query_text,
                hashes_json,
                sample_json,
                report.executed_at.to_rfc3339(),
            ],
        )?;

        tx.commit()?;
        info!(
            execution_id = %report.execution_id,
            control_id = %report.control_id,
            verdict = %report.verdict,
            "execution recorded"
        );
        Ok(())
    }

    /// Most recent executions of a control, newest first.
    pub fn execution_history(
        &self,
        control_id: &str,
        limit: usize,
    ) -> LedgerResult<Vec<ExecutionSummary>> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stmt = conn.prepare(
            "SELECT execution_id, control_id, specification_version, verdict,
                    exception_count, total_population, exception_rate_percent, executed_at
             FROM executions
             WHERE control_id = ?1
             ORDER BY executed_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![control_id, limit as i64], |row| {
                Ok(ExecutionSummary {
                    execution_id: row.get(0)?,
                    control_id: row.get(1)?,
                    specification_version: row.get(2)?,
                    verdict: row.get(3)?,
                    exception_count: row.get(4)?,
                    total_population: row.get(5)?,
                    exception_rate_percent: row.get(6)?,
                    executed_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The integrity view: for each dataset an execution references,
    /// compare its inline hash with the latest manifests row for that
    /// alias.
    pub fn verify_integrity(
        &self,
        execution_id: uuid::Uuid,
    ) -> LedgerResult<Vec<DatasetIntegrity>> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let hashes_json: Option<String> = conn
            .query_row(
                "SELECT manifest_hashes FROM executions WHERE execution_id = ?1",
                params![execution_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let hashes_json = hashes_json.ok_or(LedgerError::UnknownExecution(execution_id))?;
        let hashes: BTreeMap<String, String> = serde_json::from_str(&hashes_json)?;

        let mut results = Vec::new();
        for (alias, execution_hash) in hashes {
            let ledger_hash: Option<String> = conn
                .query_row(
                    "SELECT content_hash FROM manifests
                     WHERE dataset_alias = ?1
                     ORDER BY recorded_at DESC, rowid DESC
                     LIMIT 1",
                    params![alias],
                    |row| row.get(0),
                )
                .optional()?;
            let status = match &ledger_hash {
                Some(hash) if *hash == execution_hash => IntegrityStatus::Valid,
                Some(_) => IntegrityStatus::Tampered,
                None => IntegrityStatus::Missing,
            };
            results.push(DatasetIntegrity {
                dataset_alias: alias,
                execution_hash,
                ledger_hash,
                status,
            });
        }
        Ok(results)
    }
}

fn insert_manifest_row(tx: &rusqlite::Transaction<'_>, entry: &ManifestEntry) -> LedgerResult<()> {
    tx.execute(
        "INSERT OR IGNORE INTO manifests
         (dataset_alias, content_hash, path, row_count, schema_fingerprint,
          source_system, extracted_at, schema_version, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.alias,
            entry.content_hash,
            entry.path.to_string_lossy().into_owned(),
            entry.row_count as i64,
            entry.schema_fingerprint(),
            entry.source.source_system,
            entry.source.extracted_at.map(|t| t.to_rfc3339()),
            entry.source.schema_version,
            chrono::Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}
