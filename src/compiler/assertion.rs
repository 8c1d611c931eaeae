//! Assertion lowering: one boolean condition per assertion, flipped into
//! an exception predicate.
//!
//! Every assertion compiles to the condition `E` a compliant row
//! satisfies; the exception predicate is `(E) IS NOT TRUE`. Under SQL
//! three-valued logic `NOT (E)` would let an UNKNOWN comparison slip out
//! of the result; `IS NOT TRUE` routes missing data to the exception
//! side, so a null where evidence was expected is a finding, not a pass.

use crate::spec::assertion::{
    Aggregation, Assertion, ColumnComparison, MatchValue, TemporalDateMath, ValueMatch,
};
use crate::spec::value::ScalarValue;
use crate::spec::ControlSpec;
use crate::sql::emit::{self, EmitError};

use super::{normalize_column, CompileResult, FieldIntent, FieldRef, FieldUse};

pub(crate) struct AggregationShape {
    pub group_by: Vec<String>,
    pub select_metric: String,
    pub metric_column: String,
    pub having: String,
}

pub(crate) struct AssertionPlan {
    pub exception_predicates: Vec<String>,
    pub aggregation: Option<AggregationShape>,
    pub fields: Vec<FieldUse>,
}

pub(crate) fn compile_assertions(spec: &ControlSpec) -> CompileResult<AssertionPlan> {
    let mut exception_predicates = Vec::new();
    let mut aggregation = None;
    let mut fields = Vec::new();

    for assertion in &spec.assertions {
        match assertion {
            Assertion::ValueMatch(value_match) => {
                let condition = value_match_condition(value_match)?;
                exception_predicates.push(exception(&condition));
                fields.push(FieldUse {
                    field: FieldRef::parse(&value_match.field),
                    intent: match &value_match.expected_value {
                        MatchValue::Scalar(v) => FieldIntent::Compare(v.kind()),
                        MatchValue::List(vs) => FieldIntent::Membership(
                            vs.first()
                                .map(ScalarValue::kind)
                                .unwrap_or(crate::spec::value::ScalarKind::Null),
                        ),
                    },
                });
            }
            Assertion::ColumnComparison(comparison) => {
                let condition = column_comparison_condition(comparison)?;
                exception_predicates.push(exception(&condition));
                for field in [&comparison.left_field, &comparison.right_field] {
                    fields.push(FieldUse {
                        field: FieldRef::parse(field),
                        intent: FieldIntent::ColumnCompare,
                    });
                }
            }
            Assertion::TemporalDateMath(date_math) => {
                let condition = date_math_condition(date_math)?;
                exception_predicates.push(exception(&condition));
                for field in [&date_math.base_date_field, &date_math.target_date_field] {
                    fields.push(FieldUse {
                        field: FieldRef::parse(field),
                        intent: FieldIntent::DateMath,
                    });
                }
            }
            Assertion::Aggregation(agg) => {
                aggregation = Some(aggregation_shape(agg)?);
                for field in &agg.group_by_fields {
                    fields.push(FieldUse {
                        field: FieldRef::parse(field),
                        intent: FieldIntent::GroupBy,
                    });
                }
                fields.push(FieldUse {
                    field: FieldRef::parse(&agg.metric_field),
                    intent: FieldIntent::Metric(agg.aggregation_function),
                });
            }
        }
    }

    Ok(AssertionPlan {
        exception_predicates,
        aggregation,
        fields,
    })
}

fn exception(condition: &str) -> String {
    format!("({}) IS NOT TRUE", condition)
}

fn value_match_condition(assertion: &ValueMatch) -> CompileResult<String> {
    let column = normalize_column(&assertion.field)?;

    match &assertion.expected_value {
        MatchValue::Scalar(ScalarValue::Null) => match assertion.operator {
            crate::spec::value::MatchOp::Eq => Ok(format!("{} IS NULL", column)),
            crate::spec::value::MatchOp::Neq => Ok(format!("{} IS NOT NULL", column)),
            // Any other operator against null is rejected at construction.
            _ => Err(EmitError::NullLiteral.into()),
        },
        MatchValue::List(values) => {
            let fold = assertion.ignore_case_and_space && values.iter().all(ScalarValue::is_string);
            let rendered = values
                .iter()
                .map(|value| {
                    let literal = emit::literal(value)?;
                    Ok(if fold {
                        format!("TRIM(UPPER({}))", literal)
                    } else {
                        literal
                    })
                })
                .collect::<CompileResult<Vec<_>>>()?;
            let subject = if fold {
                format!("TRIM(UPPER(CAST({} AS VARCHAR)))", column)
            } else {
                column
            };
            Ok(format!(
                "{} {} ({})",
                subject,
                assertion.operator.sql(),
                rendered.join(", ")
            ))
        }
        MatchValue::Scalar(value) => {
            let literal = emit::literal(value)?;
            if assertion.ignore_case_and_space && value.is_string() {
                Ok(format!(
                    "TRIM(UPPER(CAST({} AS VARCHAR))) {} TRIM(UPPER({}))",
                    column,
                    assertion.operator.sql(),
                    literal
                ))
            } else {
                Ok(format!("{} {} {}", column, assertion.operator.sql(), literal))
            }
        }
    }
}

fn column_comparison_condition(assertion: &ColumnComparison) -> CompileResult<String> {
    // Both sides are columns; neither goes through literal quoting.
    Ok(format!(
        "{} {} {}",
        normalize_column(&assertion.left_field)?,
        assertion.operator.sql(),
        normalize_column(&assertion.right_field)?
    ))
}

fn date_math_condition(assertion: &TemporalDateMath) -> CompileResult<String> {
    // CAST normalizes timestamps to dates so the offset is a whole-day
    // shift regardless of the underlying physical type.
    Ok(format!(
        "CAST({} AS DATE) {} CAST({} AS DATE) + {}",
        normalize_column(&assertion.base_date_field)?,
        assertion.operator.sql(),
        normalize_column(&assertion.target_date_field)?,
        emit::interval_days(assertion.offset_days)
    ))
}

fn aggregation_shape(assertion: &Aggregation) -> CompileResult<AggregationShape> {
    let mut group_by = Vec::new();
    for field in &assertion.group_by_fields {
        let column = normalize_column(field)?;
        if !group_by.contains(&column) {
            group_by.push(column);
        }
    }
    let metric = normalize_column(&assertion.metric_field)?;
    let function = assertion.aggregation_function;
    let select_metric = format!("{}({})", function.sql(), metric);
    let having = format!(
        "({} {} {}) IS NOT TRUE",
        select_metric,
        assertion.operator.sql(),
        emit::number(assertion.threshold)?
    );
    Ok(AggregationShape {
        group_by,
        metric_column: format!("{}_{}", function.label(), metric),
        select_metric,
        having,
    })
}
