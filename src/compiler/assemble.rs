//! Final query assembly: CTE chain, shape selection, sampling.

use crate::spec::pipeline::SamplingStrategy;
use crate::spec::ControlSpec;
use crate::sql::emit;

use super::assertion::AssertionPlan;
use super::pipeline::PipelinePlan;
use super::{CompileResult, QueryShape};

pub(crate) struct AssembledQuery {
    pub sql: String,
    pub population_count_sql: String,
    pub shape: QueryShape,
}

pub(crate) fn assemble(
    spec: &ControlSpec,
    population: &PipelinePlan,
    assertions: &AssertionPlan,
) -> CompileResult<AssembledQuery> {
    let with = format!("WITH {}", population.ctes.join(",\n"));
    // The population part of WHERE is never empty; `1=1` keeps the
    // clause well-formed and makes "no filters" auditable at a glance.
    let population_clause = if population.filters.is_empty() {
        "1=1".to_string()
    } else {
        population.filters.join(" AND ")
    };

    match &assertions.aggregation {
        Some(aggregation) => {
            let group_list = aggregation.group_by.join(", ");
            let sql = format!(
                "{with}\nSELECT {groups},\n       COUNT(*) AS exception_count,\n       {metric} AS {metric_column}\nFROM {from}\nWHERE {population}\nGROUP BY {groups}\nHAVING {having}",
                with = with,
                groups = group_list,
                metric = aggregation.select_metric,
                metric_column = aggregation.metric_column,
                from = population.final_alias,
                population = population_clause,
                having = aggregation.having,
            );
            // Aggregated population: the number of distinct group keys.
            let population_count_sql = format!(
                "{with}\nSELECT COUNT(*)\nFROM (SELECT DISTINCT {groups} FROM {from} WHERE {population}) AS population_keys",
                with = with,
                groups = group_list,
                from = population.final_alias,
                population = population_clause,
            );
            Ok(AssembledQuery {
                sql,
                population_count_sql,
                shape: QueryShape::Aggregated {
                    group_by: aggregation.group_by.clone(),
                    metric_column: aggregation.metric_column.clone(),
                },
            })
        }
        None => {
            // A row is an exception when it violates at least one
            // assertion, so exception predicates combine with OR.
            let exceptions = assertions.exception_predicates.join(" OR ");
            let sampling = match &spec.population.sampling {
                Some(strategy) => sampling_clause(strategy)?,
                None => String::new(),
            };
            let sql = format!(
                "{with}\nSELECT *\nFROM {from}{sampling}\nWHERE ({population}) AND ({exceptions})",
                with = with,
                from = population.final_alias,
                sampling = sampling,
                population = population_clause,
                exceptions = exceptions,
            );
            let population_count_sql = format!(
                "{with}\nSELECT COUNT(*)\nFROM {from}\nWHERE {population}",
                with = with,
                from = population.final_alias,
                population = population_clause,
            );
            Ok(AssembledQuery {
                sql,
                population_count_sql,
                shape: QueryShape::RowLevel,
            })
        }
    }
}

fn sampling_clause(strategy: &SamplingStrategy) -> CompileResult<String> {
    let mut clause = match (strategy.sample_size, strategy.sample_percentage) {
        (Some(rows), _) => format!(" TABLESAMPLE RESERVOIR({} ROWS)", rows),
        (None, Some(percentage)) => {
            format!(" TABLESAMPLE RESERVOIR({}%)", emit::number(percentage)?)
        }
        // One of the two is guaranteed at construction.
        (None, None) => String::new(),
    };
    if let Some(seed) = strategy.random_seed {
        clause.push_str(&format!(" REPEATABLE ({})", seed));
    }
    Ok(clause)
}
