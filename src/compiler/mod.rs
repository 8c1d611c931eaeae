//! Deterministic SQL compiler.
//!
//! Compilation is a pure function: a validated specification plus an
//! evidence manifest produce a `QueryPlan` — the exact SQL to execute,
//! the population-count query, and enough structured metadata for the
//! schema validator to resolve every referenced column without reading
//! any data. Compiling the same inputs twice yields byte-identical SQL.

mod assemble;
mod assertion;
mod pipeline;

use std::collections::BTreeMap;

use tracing::debug;

use crate::manifest::{EvidenceManifest, LogicalType};
use crate::report::ErrorKind;
use crate::spec::value::{AggFunc, ScalarKind};
use crate::spec::ControlSpec;
use crate::sql::emit::EmitError;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while lowering a specification to SQL.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("dataset '{0}' is not present in the evidence manifest")]
    ManifestMissing(String),

    #[error("join '{step_id}' would duplicate non-key column '{column}'; rename the column upstream or exclude it during ingestion")]
    DuplicateColumn { step_id: String, column: String },

    #[error(transparent)]
    Emit(#[from] EmitError),
}

impl CompileError {
    /// The report error kind this failure maps to.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            CompileError::ManifestMissing(_) => ErrorKind::ManifestMissing,
            CompileError::DuplicateColumn { .. } | CompileError::Emit(_) => {
                ErrorKind::CompileRejected
            }
        }
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

// =============================================================================
// Plan metadata
// =============================================================================

/// Which shape the final query takes.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryShape {
    RowLevel,
    Aggregated {
        group_by: Vec<String>,
        metric_column: String,
    },
}

/// A CTE and the evidence file it reads.
#[derive(Debug, Clone, PartialEq)]
pub struct CteSource {
    pub cte: String,
    pub dataset: String,
    pub path: String,
}

/// A resolved or resolvable column reference.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldRef {
    /// Qualifier as written in the specification, if any.
    pub dataset: Option<String>,
    pub column: String,
}

impl FieldRef {
    pub fn parse(field: &str) -> Self {
        match field.rsplit_once('.') {
            Some((dataset, column)) => Self {
                dataset: Some(dataset.to_string()),
                column: column.to_string(),
            },
            None => Self {
                dataset: None,
                column: field.to_string(),
            },
        }
    }
}

/// What an operation intends to do with a column. Drives the coarse
/// type checks in the schema validator.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldIntent {
    /// Population filter or value match against a scalar of this kind.
    Compare(ScalarKind),
    /// Membership test against a list whose elements share this kind.
    Membership(ScalarKind),
    NullCheck,
    ColumnCompare,
    DateMath,
    GroupBy,
    Metric(AggFunc),
    /// Ontology binding claiming the column has this logical type.
    Binding(LogicalType),
}

/// One referenced field together with its intent.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldUse {
    pub field: FieldRef,
    pub intent: FieldIntent,
}

/// A join key pair for type-compatibility checking.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinKeyPair {
    pub step_id: String,
    pub left: FieldRef,
    pub right: FieldRef,
}

/// A column of the post-join population output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputColumn {
    pub name: String,
    pub dataset: String,
    pub logical_type: LogicalType,
}

/// The compiled plan: SQL text plus the metadata needed to validate it
/// against the physical schema before any data is read.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub control_id: String,
    pub specification_version: String,
    pub base_dataset: String,
    /// The exception query, persisted verbatim in the audit ledger.
    pub sql: String,
    /// Row count of the final CTE under population filters only.
    pub population_count_sql: String,
    pub shape: QueryShape,
    pub sources: Vec<CteSource>,
    pub fields: Vec<FieldUse>,
    pub join_keys: Vec<JoinKeyPair>,
    pub output_columns: Vec<OutputColumn>,
    /// Content hashes of every dataset this control reads.
    pub manifest_hashes: BTreeMap<String, String>,
}

// =============================================================================
// Entry point
// =============================================================================

/// Compile a specification against a manifest.
pub fn compile(spec: &ControlSpec, manifest: &EvidenceManifest) -> CompileResult<QueryPlan> {
    let population = pipeline::compile_population(spec, manifest)?;
    let assertions = assertion::compile_assertions(spec)?;
    let assembled = assemble::assemble(spec, &population, &assertions)?;

    let mut fields = population.fields;
    fields.extend(assertions.fields);
    for binding in &spec.ontology_bindings {
        fields.push(FieldUse {
            field: FieldRef {
                dataset: Some(binding.dataset_alias.clone()),
                column: binding.technical_field.clone(),
            },
            intent: FieldIntent::Binding(binding.data_type),
        });
    }

    debug!(
        control_id = %spec.governance.control_id,
        shape = ?assembled.shape,
        sql_bytes = assembled.sql.len(),
        "specification compiled"
    );

    Ok(QueryPlan {
        control_id: spec.governance.control_id.clone(),
        specification_version: spec.governance.version.clone(),
        base_dataset: spec.population.base_dataset.clone(),
        sql: assembled.sql,
        population_count_sql: assembled.population_count_sql,
        shape: assembled.shape,
        sources: population.sources,
        fields,
        join_keys: population.join_keys,
        output_columns: population.output_columns,
        manifest_hashes: population.hashes,
    })
}

/// Strip the dataset qualifier and validate the bare column name.
///
/// Post-join rows carry unqualified columns (the join emitter excludes
/// right-side keys and rejects other duplicates), so every reference is
/// rendered by its bare name.
pub(crate) fn normalize_column(field: &str) -> CompileResult<String> {
    let reference = FieldRef::parse(field);
    if let Some(dataset) = &reference.dataset {
        crate::sql::emit::identifier(dataset)?;
    }
    Ok(crate::sql::emit::identifier(&reference.column)?.to_string())
}
