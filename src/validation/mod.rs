//! Pre-flight schema validation.
//!
//! Runs after compilation and before any data is read: every column the
//! plan references must exist in the physical files, and its logical
//! type must be coarsely compatible with what the operation does to it.
//! This is distinct from the analytical engine's own parse pass — both
//! must succeed before execution.

use crate::compiler::{FieldIntent, FieldRef, QueryPlan};
use crate::manifest::{EvidenceManifest, LogicalType};
use crate::report::ErrorKind;

/// Validation failure for one reference.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A dataset alias the plan references is absent from the manifest.
    MissingDataset { dataset: String },
    /// A referenced column is not present in the physical schema.
    SchemaDrift {
        dataset: String,
        column: String,
        closest: Vec<String>,
    },
    /// The physical type cannot support the intended operation.
    TypeMismatch {
        dataset: String,
        column: String,
        logical_type: LogicalType,
        operation: String,
    },
}

impl ValidationError {
    /// The report error kind this failure maps to.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            ValidationError::MissingDataset { .. } => ErrorKind::ManifestMissing,
            ValidationError::SchemaDrift { .. } => ErrorKind::SchemaDrift,
            ValidationError::TypeMismatch { .. } => ErrorKind::TypeMismatch,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingDataset { dataset } => {
                write!(
                    f,
                    "dataset '{}' is not present in the evidence manifest",
                    dataset
                )
            }
            ValidationError::SchemaDrift {
                dataset,
                column,
                closest,
            } => {
                write!(f, "column '{}' not found in '{}'", column, dataset)?;
                if !closest.is_empty() {
                    write!(f, " (closest: {})", closest.join(", "))?;
                }
                Ok(())
            }
            ValidationError::TypeMismatch {
                dataset,
                column,
                logical_type,
                operation,
            } => {
                write!(
                    f,
                    "column '{}.{}' has type {} which does not support {}",
                    dataset, column, logical_type, operation
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a compiled plan against the physical schema.
///
/// All failures are collected so a reviewer sees every drifted column in
/// one pass, not one per run.
pub fn validate(plan: &QueryPlan, manifest: &EvidenceManifest) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for field_use in &plan.fields {
        if let Some((dataset, column, logical_type)) =
            resolve(plan, manifest, &field_use.field, &mut errors)
        {
            check_intent(&field_use.intent, &dataset, &column, logical_type, &mut errors);
        }
    }

    for pair in &plan.join_keys {
        let left = resolve(plan, manifest, &pair.left, &mut errors);
        let right = resolve(plan, manifest, &pair.right, &mut errors);
        if let (Some((_, _, left_type)), Some((right_dataset, right_column, right_type))) =
            (left, right)
        {
            if !join_compatible(left_type, right_type) {
                errors.push(ValidationError::TypeMismatch {
                    dataset: right_dataset,
                    column: right_column,
                    logical_type: right_type,
                    operation: format!("a join against a {} key", left_type),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Resolve a reference to `(dataset, column, type)`, recording an error
/// and returning None when it cannot be resolved.
fn resolve(
    plan: &QueryPlan,
    manifest: &EvidenceManifest,
    reference: &FieldRef,
    errors: &mut Vec<ValidationError>,
) -> Option<(String, String, LogicalType)> {
    match &reference.dataset {
        Some(dataset) => match manifest.get(dataset) {
            None => {
                errors.push(ValidationError::MissingDataset {
                    dataset: dataset.clone(),
                });
                None
            }
            Some(entry) => match entry.column_type(&reference.column) {
                Some(logical_type) => {
                    Some((dataset.clone(), reference.column.clone(), logical_type))
                }
                None => {
                    let names: Vec<&str> = entry.columns.iter().map(|c| c.name.as_str()).collect();
                    errors.push(ValidationError::SchemaDrift {
                        dataset: dataset.clone(),
                        column: reference.column.clone(),
                        closest: closest_names(&reference.column, &names),
                    });
                    None
                }
            },
        },
        None => {
            // Unqualified: the post-join output column set, where the
            // join emitter has already guaranteed uniqueness.
            match plan
                .output_columns
                .iter()
                .find(|c| c.name == reference.column)
            {
                Some(column) => Some((
                    column.dataset.clone(),
                    column.name.clone(),
                    column.logical_type,
                )),
                None => {
                    let names: Vec<&str> = plan
                        .output_columns
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect();
                    errors.push(ValidationError::SchemaDrift {
                        dataset: plan.base_dataset.clone(),
                        column: reference.column.clone(),
                        closest: closest_names(&reference.column, &names),
                    });
                    None
                }
            }
        }
    }
}

fn check_intent(
    intent: &FieldIntent,
    dataset: &str,
    column: &str,
    logical_type: LogicalType,
    errors: &mut Vec<ValidationError>,
) {
    let mismatch = |operation: String| ValidationError::TypeMismatch {
        dataset: dataset.to_string(),
        column: column.to_string(),
        logical_type,
        operation,
    };
    match intent {
        FieldIntent::Compare(kind) | FieldIntent::Membership(kind) => {
            let numeric = matches!(
                kind,
                crate::spec::value::ScalarKind::Integer | crate::spec::value::ScalarKind::Float
            );
            if numeric && logical_type == LogicalType::String {
                errors.push(mismatch("a numeric comparison".to_string()));
            }
        }
        FieldIntent::DateMath => {
            if logical_type == LogicalType::String {
                errors.push(mismatch("date arithmetic".to_string()));
            }
        }
        FieldIntent::Metric(function) => {
            if function.requires_numeric() && logical_type == LogicalType::String {
                errors.push(mismatch(format!("{} aggregation", function.sql())));
            }
        }
        FieldIntent::Binding(declared) => {
            if *declared != logical_type {
                errors.push(mismatch(format!(
                    "an ontology binding declaring type {}",
                    declared
                )));
            }
        }
        FieldIntent::NullCheck | FieldIntent::ColumnCompare | FieldIntent::GroupBy => {}
    }
}

fn join_compatible(left: LogicalType, right: LogicalType) -> bool {
    left == right || (left.is_temporal() && right.is_temporal())
}

/// The three closest column names by edit distance, ties broken
/// alphabetically.
fn closest_names(target: &str, names: &[&str]) -> Vec<String> {
    let mut scored: Vec<(usize, &str)> = names
        .iter()
        .map(|name| (edit_distance(target, name), *name))
        .collect();
    scored.sort();
    scored
        .into_iter()
        .take(3)
        .map(|(_, name)| name.to_string())
        .collect()
}

fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
