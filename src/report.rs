//! Execution reports: the immutable record of one control run.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The outcome of a control run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Error,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Pass => "PASS",
            Verdict::Fail => "FAIL",
            Verdict::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a run ended with an ERROR verdict.
///
/// Specification rejection has no kind here: an invalid specification is
/// raised synchronously at construction and never produces a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A referenced dataset alias is absent from the manifest.
    ManifestMissing,
    /// A referenced column is not present in the physical file.
    SchemaDrift,
    /// The physical type is incompatible with the intended operation.
    TypeMismatch,
    /// The analytical engine's planner rejected the generated SQL.
    CompileRejected,
    /// The query parsed but failed at run time.
    ExecutionFailed,
    /// The base dataset had no rows after population filters.
    ZeroPopulation,
    /// Cancellation was observed before the run completed.
    Canceled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ManifestMissing => "ManifestMissing",
            ErrorKind::SchemaDrift => "SchemaDrift",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::CompileRejected => "CompileRejected",
            ErrorKind::ExecutionFailed => "ExecutionFailed",
            ErrorKind::ZeroPopulation => "ZeroPopulation",
            ErrorKind::Canceled => "Canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ManifestMissing" => Some(ErrorKind::ManifestMissing),
            "SchemaDrift" => Some(ErrorKind::SchemaDrift),
            "TypeMismatch" => Some(ErrorKind::TypeMismatch),
            "CompileRejected" => Some(ErrorKind::CompileRejected),
            "ExecutionFailed" => Some(ErrorKind::ExecutionFailed),
            "ZeroPopulation" => Some(ErrorKind::ZeroPopulation),
            "Canceled" => Some(ErrorKind::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The full record of one execution, written to the audit ledger.
///
/// `manifest_hashes` binds the verdict to the exact evidence bytes that
/// were tested; `query_text` is the SQL that ran, verbatim, so an
/// external party can re-verify the result without this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub execution_id: Uuid,
    pub control_id: String,
    pub specification_version: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub total_population: i64,
    pub exception_count: i64,
    pub exception_rate_percent: f64,
    pub materiality_threshold_percent: f64,
    pub query_text: String,
    pub manifest_hashes: BTreeMap<String, String>,
    /// At most the first 100 exception rows, canonicalized: sorted
    /// column keys, ISO-8601 temporals, NaN and missing values as null.
    pub exceptions_sample: Vec<serde_json::Value>,
    pub executed_at: DateTime<Utc>,
}
