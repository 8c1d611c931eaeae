//! The control specification: construction and structural validation.
//!
//! A `ControlSpec` is the sole input contract to the compiler. Everything
//! structurally wrong with a candidate document is rejected here, with a
//! path into the document tree; nothing downstream re-validates shape.
//! Construction is pure and idempotent: the same document either always
//! constructs the same value or always fails with the same rejection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SpecError, SpecResult};
use crate::sql::emit::is_identifier;

use super::assertion::{Assertion, MatchValue};
use super::governance::{is_semantic_version, EvidenceRequirements, Governance, OntologyBinding};
use super::pipeline::{PipelineAction, PopulationPipeline, SamplingStrategy};
use super::value::ScalarValue;

/// A validated, immutable compliance control specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSpec {
    pub governance: Governance,
    pub ontology_bindings: Vec<OntologyBinding>,
    pub population: PopulationPipeline,
    pub assertions: Vec<Assertion>,
    pub evidence: EvidenceRequirements,
}

impl ControlSpec {
    /// Construct from a JSON document string.
    pub fn from_json(source: &str) -> SpecResult<Self> {
        let value: serde_json::Value = serde_json::from_str(source)
            .map_err(|e| SpecError::invalid("$", e.to_string()))?;
        Self::from_value(value)
    }

    /// Construct from a JSON document tree.
    pub fn from_value(value: serde_json::Value) -> SpecResult<Self> {
        let spec: ControlSpec = serde_json::from_value(value)
            .map_err(|e| SpecError::invalid("$", e.to_string()))?;
        spec.validate()?;
        debug!(
            control_id = %spec.governance.control_id,
            steps = spec.population.steps.len(),
            assertions = spec.assertions.len(),
            "control specification constructed"
        );
        Ok(spec)
    }

    /// The specification-wide materiality threshold: the maximum across
    /// all assertions.
    pub fn max_materiality(&self) -> f64 {
        self.assertions
            .iter()
            .map(Assertion::materiality_threshold_percent)
            .fold(0.0, f64::max)
    }

    /// The single aggregation assertion, if this control is aggregated.
    pub fn aggregation(&self) -> Option<&super::assertion::Aggregation> {
        self.assertions.iter().find_map(|a| match a {
            Assertion::Aggregation(agg) => Some(agg),
            _ => None,
        })
    }

    /// Enforce every structural invariant not already covered by the
    /// closed-schema deserialization.
    pub fn validate(&self) -> SpecResult<()> {
        self.validate_governance()?;
        self.validate_bindings()?;
        self.validate_population()?;
        self.validate_assertions()?;
        self.validate_evidence()?;
        Ok(())
    }

    fn validate_governance(&self) -> SpecResult<()> {
        if self.governance.control_id.trim().is_empty() {
            return Err(SpecError::invalid(
                "governance.control_id",
                "control id must be non-empty",
            ));
        }
        if !is_semantic_version(&self.governance.version) {
            return Err(SpecError::invalid(
                "governance.version",
                format!(
                    "'{}' is not a MAJOR.MINOR.PATCH semantic version",
                    self.governance.version
                ),
            ));
        }
        Ok(())
    }

    fn validate_bindings(&self) -> SpecResult<()> {
        for (i, binding) in self.ontology_bindings.iter().enumerate() {
            let path = format!("ontology_bindings[{}]", i);
            check_identifier(&binding.dataset_alias, &format!("{}.dataset_alias", path))?;
            check_identifier(
                &binding.technical_field,
                &format!("{}.technical_field", path),
            )?;
        }
        Ok(())
    }

    fn validate_population(&self) -> SpecResult<()> {
        check_identifier(&self.population.base_dataset, "population.base_dataset")?;

        // Datasets a later join may name on its left side: the base, plus
        // anything a prior step introduced.
        let mut known = vec![self.population.base_dataset.clone()];
        let mut seen_step_ids: Vec<&str> = Vec::new();

        for (i, step) in self.population.steps.iter().enumerate() {
            let path = format!("population.steps[{}]", i);
            check_identifier(&step.step_id, &format!("{}.step_id", path))?;
            if step.step_id == "base" || step.step_id == "joined" {
                return Err(SpecError::invalid(
                    format!("{}.step_id", path),
                    format!("'{}' is a reserved alias", step.step_id),
                ));
            }
            if seen_step_ids.contains(&step.step_id.as_str()) {
                return Err(SpecError::invalid(
                    format!("{}.step_id", path),
                    format!("duplicate step id '{}'", step.step_id),
                ));
            }
            seen_step_ids.push(step.step_id.as_str());

            match &step.action {
                PipelineAction::FilterComparison(f) => {
                    check_field_ref(&f.field, &format!("{}.action.field", path))?;
                    if !f.operator.admits(&f.value) {
                        return Err(SpecError::invalid(
                            format!("{}.action.value", path),
                            "ordered comparison against null; use eq for IS NULL or neq for IS NOT NULL",
                        ));
                    }
                }
                PipelineAction::FilterInList(f) => {
                    check_field_ref(&f.field, &format!("{}.action.field", path))?;
                    check_value_list(&f.values, &format!("{}.action.values", path))?;
                }
                PipelineAction::FilterIsNull(f) => {
                    check_field_ref(&f.field, &format!("{}.action.field", path))?;
                }
                PipelineAction::JoinLeft(j) => {
                    check_identifier(&j.left_dataset, &format!("{}.action.left_dataset", path))?;
                    check_identifier(&j.right_dataset, &format!("{}.action.right_dataset", path))?;
                    if j.left_keys.is_empty() {
                        return Err(SpecError::invalid(
                            format!("{}.action.left_keys", path),
                            "at least one join key is required",
                        ));
                    }
                    if j.left_keys.len() != j.right_keys.len() {
                        return Err(SpecError::invalid(
                            format!("{}.action.right_keys", path),
                            format!(
                                "{} left keys but {} right keys",
                                j.left_keys.len(),
                                j.right_keys.len()
                            ),
                        ));
                    }
                    for (k, key) in j.left_keys.iter().enumerate() {
                        check_identifier(key, &format!("{}.action.left_keys[{}]", path, k))?;
                    }
                    for (k, key) in j.right_keys.iter().enumerate() {
                        check_identifier(key, &format!("{}.action.right_keys[{}]", path, k))?;
                    }
                    if !known.contains(&j.left_dataset) && !seen_step_ids.contains(&j.left_dataset.as_str()) {
                        return Err(SpecError::invalid(
                            format!("{}.action.left_dataset", path),
                            format!(
                                "'{}' is neither the base dataset nor introduced by a prior step",
                                j.left_dataset
                            ),
                        ));
                    }
                    known.push(j.right_dataset.clone());
                }
            }
        }

        if let Some(sampling) = &self.population.sampling {
            validate_sampling(sampling)?;
        }
        Ok(())
    }

    fn validate_assertions(&self) -> SpecResult<()> {
        if self.assertions.is_empty() {
            return Err(SpecError::invalid(
                "assertions",
                "at least one assertion is required",
            ));
        }
        let aggregations = self.assertions.iter().filter(|a| a.is_aggregation()).count();
        if aggregations > 1 {
            return Err(SpecError::invalid(
                "assertions",
                "at most one aggregation assertion is allowed",
            ));
        }
        if aggregations == 1 && self.assertions.len() > 1 {
            return Err(SpecError::invalid(
                "assertions",
                "aggregation and row-level assertions cannot coexist in one control",
            ));
        }

        for (i, assertion) in self.assertions.iter().enumerate() {
            let path = format!("assertions[{}]", i);
            let materiality = assertion.materiality_threshold_percent();
            if !(0.0..=100.0).contains(&materiality) {
                return Err(SpecError::invalid(
                    format!("{}.materiality_threshold_percent", path),
                    format!("{} is outside [0, 100]", materiality),
                ));
            }
            match assertion {
                Assertion::ValueMatch(v) => {
                    check_field_ref(&v.field, &format!("{}.field", path))?;
                    validate_match(v, &path)?;
                }
                Assertion::ColumnComparison(c) => {
                    check_field_ref(&c.left_field, &format!("{}.left_field", path))?;
                    check_field_ref(&c.right_field, &format!("{}.right_field", path))?;
                }
                Assertion::TemporalDateMath(t) => {
                    check_field_ref(&t.base_date_field, &format!("{}.base_date_field", path))?;
                    check_field_ref(&t.target_date_field, &format!("{}.target_date_field", path))?;
                }
                Assertion::Aggregation(a) => {
                    if a.group_by_fields.is_empty() {
                        return Err(SpecError::invalid(
                            format!("{}.group_by_fields", path),
                            "at least one grouping column is required",
                        ));
                    }
                    for (k, field) in a.group_by_fields.iter().enumerate() {
                        check_field_ref(field, &format!("{}.group_by_fields[{}]", path, k))?;
                    }
                    check_field_ref(&a.metric_field, &format!("{}.metric_field", path))?;
                    if !a.threshold.is_finite() {
                        return Err(SpecError::invalid(
                            format!("{}.threshold", path),
                            "threshold must be a finite number",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_evidence(&self) -> SpecResult<()> {
        if self.evidence.retention_years <= 0 {
            return Err(SpecError::invalid(
                "evidence.retention_years",
                "retention must be a positive number of years",
            ));
        }
        Ok(())
    }
}

fn validate_match(v: &super::assertion::ValueMatch, path: &str) -> SpecResult<()> {
    match (&v.expected_value, v.operator.is_membership()) {
        (MatchValue::List(values), true) => {
            check_value_list(values, &format!("{}.expected_value", path))
        }
        (MatchValue::Scalar(_), true) => Err(SpecError::invalid(
            format!("{}.expected_value", path),
            "in/not_in require a list of values",
        )),
        (MatchValue::List(_), false) => Err(SpecError::invalid(
            format!("{}.expected_value", path),
            "a list value requires the in or not_in operator",
        )),
        (MatchValue::Scalar(value), false) => {
            if value.is_null() && v.operator.is_ordered() {
                return Err(SpecError::invalid(
                    format!("{}.expected_value", path),
                    "ordered comparison against null; use eq for IS NULL or neq for IS NOT NULL",
                ));
            }
            Ok(())
        }
    }
}

fn validate_sampling(sampling: &SamplingStrategy) -> SpecResult<()> {
    match (sampling.sample_size, sampling.sample_percentage) {
        (Some(_), Some(_)) => {
            return Err(SpecError::invalid(
                "population.sampling",
                "sample_size and sample_percentage are mutually exclusive",
            ))
        }
        (None, None) => {
            return Err(SpecError::invalid(
                "population.sampling",
                "one of sample_size or sample_percentage is required",
            ))
        }
        (Some(size), None) if size <= 0 => {
            return Err(SpecError::invalid(
                "population.sampling.sample_size",
                "sample size must be positive",
            ))
        }
        (None, Some(pct)) if !(pct > 0.0 && pct <= 100.0) => {
            return Err(SpecError::invalid(
                "population.sampling.sample_percentage",
                format!("{} is outside (0, 100]", pct),
            ))
        }
        _ => {}
    }
    if sampling.justification.trim().is_empty() {
        return Err(SpecError::invalid(
            "population.sampling.justification",
            "sampling requires a justification",
        ));
    }
    Ok(())
}

fn check_identifier(name: &str, path: &str) -> SpecResult<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(SpecError::invalid(
            path,
            format!("'{}' is not a valid identifier", name),
        ))
    }
}

/// A field reference is `column` or `dataset_alias.column`.
fn check_field_ref(field: &str, path: &str) -> SpecResult<()> {
    let mut parts = field.split('.');
    let first = parts.next().unwrap_or("");
    match (parts.next(), parts.next()) {
        (None, _) => check_identifier(first, path),
        (Some(second), None) => {
            check_identifier(first, path)?;
            check_identifier(second, path)
        }
        (Some(_), Some(_)) => Err(SpecError::invalid(
            path,
            format!("'{}' has more than one qualifier", field),
        )),
    }
}

fn check_value_list(values: &[ScalarValue], path: &str) -> SpecResult<()> {
    if values.is_empty() {
        return Err(SpecError::invalid(path, "value list must be non-empty"));
    }
    if values.iter().any(ScalarValue::is_null) {
        return Err(SpecError::invalid(
            path,
            "null is not allowed inside a value list",
        ));
    }
    Ok(())
}
