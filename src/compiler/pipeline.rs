//! Population pipeline lowering: filter accumulation and join CTEs.
//!
//! Filters never materialize as CTEs; they accumulate into one conjunct
//! list applied in the final WHERE. Joins each emit a CTE named after
//! their step id, chained off whatever the previous CTE was, so the
//! declared step order is exactly the SQL evaluation order.

use std::collections::BTreeMap;

use crate::manifest::EvidenceManifest;
use crate::spec::pipeline::{FilterComparison, FilterInList, FilterIsNull, JoinLeft};
use crate::spec::value::{CompareOp, ScalarValue};
use crate::spec::{ControlSpec, PipelineAction};
use crate::sql::emit;

use super::{
    normalize_column, CompileError, CompileResult, CteSource, FieldIntent, FieldRef, FieldUse,
    JoinKeyPair, OutputColumn,
};

#[derive(Debug)]
pub(crate) struct PipelinePlan {
    pub filters: Vec<String>,
    pub ctes: Vec<String>,
    pub final_alias: String,
    pub sources: Vec<CteSource>,
    pub fields: Vec<FieldUse>,
    pub join_keys: Vec<JoinKeyPair>,
    pub output_columns: Vec<OutputColumn>,
    pub hashes: BTreeMap<String, String>,
}

pub(crate) fn compile_population(
    spec: &ControlSpec,
    manifest: &EvidenceManifest,
) -> CompileResult<PipelinePlan> {
    let base_alias = &spec.population.base_dataset;
    let base = manifest
        .get(base_alias)
        .ok_or_else(|| CompileError::ManifestMissing(base_alias.clone()))?;

    let base_path = base.path.to_string_lossy().into_owned();
    let mut ctes = vec![format!(
        "base AS (SELECT * FROM read_parquet({}))",
        emit::quote_str(&base_path)
    )];
    let mut sources = vec![CteSource {
        cte: "base".to_string(),
        dataset: base_alias.clone(),
        path: base_path,
    }];
    let mut hashes = BTreeMap::new();
    hashes.insert(base_alias.clone(), base.content_hash.clone());

    let mut output_columns: Vec<OutputColumn> = base
        .columns
        .iter()
        .map(|c| OutputColumn {
            name: c.name.clone(),
            dataset: base_alias.clone(),
            logical_type: c.logical_type,
        })
        .collect();

    let mut filters = Vec::new();
    let mut fields = Vec::new();
    let mut join_keys = Vec::new();
    let mut current_alias = "base".to_string();

    for step in &spec.population.steps {
        match &step.action {
            PipelineAction::FilterComparison(filter) => {
                filters.push(comparison_predicate(filter)?);
                fields.push(FieldUse {
                    field: FieldRef::parse(&filter.field),
                    intent: FieldIntent::Compare(filter.value.kind()),
                });
            }
            PipelineAction::FilterInList(filter) => {
                filters.push(in_list_predicate(filter)?);
                let kind = filter
                    .values
                    .first()
                    .map(ScalarValue::kind)
                    .unwrap_or(crate::spec::value::ScalarKind::Null);
                fields.push(FieldUse {
                    field: FieldRef::parse(&filter.field),
                    intent: FieldIntent::Membership(kind),
                });
            }
            PipelineAction::FilterIsNull(filter) => {
                filters.push(is_null_predicate(filter)?);
                fields.push(FieldUse {
                    field: FieldRef::parse(&filter.field),
                    intent: FieldIntent::NullCheck,
                });
            }
            PipelineAction::JoinLeft(join) => {
                let right = manifest
                    .get(&join.right_dataset)
                    .ok_or_else(|| CompileError::ManifestMissing(join.right_dataset.clone()))?;
                let right_path = right.path.to_string_lossy().into_owned();

                // Non-key columns shared with the current rowset would be
                // ambiguous after the join. EXCLUDE resolves the key
                // collision; anything else is an error naming the column.
                for column in &right.columns {
                    if join.right_keys.contains(&column.name) {
                        continue;
                    }
                    if output_columns.iter().any(|c| c.name == column.name) {
                        return Err(CompileError::DuplicateColumn {
                            step_id: step.step_id.clone(),
                            column: column.name.clone(),
                        });
                    }
                    output_columns.push(OutputColumn {
                        name: column.name.clone(),
                        dataset: join.right_dataset.clone(),
                        logical_type: column.logical_type,
                    });
                }

                ctes.push(join_cte(&step.step_id, &current_alias, join, &right_path)?);
                sources.push(CteSource {
                    cte: step.step_id.clone(),
                    dataset: join.right_dataset.clone(),
                    path: right_path,
                });
                hashes.insert(join.right_dataset.clone(), right.content_hash.clone());

                for (left, right_key) in join.left_keys.iter().zip(&join.right_keys) {
                    join_keys.push(JoinKeyPair {
                        step_id: step.step_id.clone(),
                        left: FieldRef::parse(left),
                        right: FieldRef {
                            dataset: Some(join.right_dataset.clone()),
                            column: right_key.clone(),
                        },
                    });
                }

                current_alias = step.step_id.clone();
            }
        }
    }

    Ok(PipelinePlan {
        filters,
        ctes,
        final_alias: current_alias,
        sources,
        fields,
        join_keys,
        output_columns,
        hashes,
    })
}

fn comparison_predicate(filter: &FilterComparison) -> CompileResult<String> {
    let column = normalize_column(&filter.field)?;
    match (&filter.value, filter.operator) {
        (ScalarValue::Null, CompareOp::Eq) => Ok(format!("{} IS NULL", column)),
        (ScalarValue::Null, CompareOp::Neq) => Ok(format!("{} IS NOT NULL", column)),
        (value, op) => Ok(format!("{} {} {}", column, op.sql(), emit::literal(value)?)),
    }
}

fn in_list_predicate(filter: &FilterInList) -> CompileResult<String> {
    let column = normalize_column(&filter.field)?;
    let values = filter
        .values
        .iter()
        .map(emit::literal)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("{} IN ({})", column, values.join(", ")))
}

fn is_null_predicate(filter: &FilterIsNull) -> CompileResult<String> {
    let column = normalize_column(&filter.field)?;
    if filter.is_null {
        Ok(format!("{} IS NULL", column))
    } else {
        Ok(format!("{} IS NOT NULL", column))
    }
}

fn join_cte(
    step_id: &str,
    previous: &str,
    join: &JoinLeft,
    right_path: &str,
) -> CompileResult<String> {
    let step = emit::identifier(step_id)?;
    let prev = emit::identifier(previous)?;

    let conditions = join
        .left_keys
        .iter()
        .zip(&join.right_keys)
        .map(|(left, right)| {
            Ok(format!(
                "{}.{} = joined.{}",
                prev,
                emit::identifier(&FieldRef::parse(left).column)?,
                emit::identifier(right)?
            ))
        })
        .collect::<CompileResult<Vec<_>>>()?
        .join(" AND ");

    let excluded = join
        .right_keys
        .iter()
        .map(|key| emit::identifier(key).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?
        .join(", ");

    Ok(format!(
        "{step} AS (\n    SELECT {prev}.*,\n           joined.* EXCLUDE ({excluded})\n    FROM {prev}\n    LEFT JOIN read_parquet({path}) AS joined\n    ON {conditions}\n)",
        step = step,
        prev = prev,
        excluded = excluded,
        path = emit::quote_str(right_path),
        conditions = conditions,
    ))
}
