//! Population pipeline: the ordered steps that derive the tested rowset.
//!
//! Steps form a discriminated union keyed on `operation`. Deserialization
//! is closed: an unknown tag or an unknown key anywhere in a step is a
//! construction-time rejection, never a silent ignore.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use super::value::{CompareOp, ScalarValue};

/// Filter rows by comparing a column against a scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterComparison {
    pub field: String,
    pub operator: CompareOp,
    pub value: ScalarValue,
}

/// Filter rows by list membership.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterInList {
    pub field: String,
    pub values: Vec<ScalarValue>,
}

/// Filter rows where a column is (or is not) null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterIsNull {
    pub field: String,
    pub is_null: bool,
}

/// Left join another dataset on one or more key pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinLeft {
    pub left_dataset: String,
    pub right_dataset: String,
    pub left_keys: Vec<String>,
    pub right_keys: Vec<String>,
}

/// A pipeline action, discriminated on the `operation` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum PipelineAction {
    FilterComparison(FilterComparison),
    FilterInList(FilterInList),
    FilterIsNull(FilterIsNull),
    JoinLeft(JoinLeft),
}

const ACTION_TAGS: &[&str] = &[
    "filter_comparison",
    "filter_in_list",
    "filter_is_null",
    "join_left",
];

// serde's derived deserializer cannot enforce closed keys inside an
// internally tagged enum, so the tag is dispatched by hand and the
// payload handed to the variant struct, which does deny unknown keys.
impl<'de> Deserialize<'de> for PipelineAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = serde_json::Map::deserialize(deserializer)?;
        let tag = map
            .remove("operation")
            .ok_or_else(|| D::Error::missing_field("operation"))?;
        let tag = tag
            .as_str()
            .ok_or_else(|| D::Error::custom("operation tag must be a string"))?
            .to_string();
        let rest = serde_json::Value::Object(map);
        match tag.as_str() {
            "filter_comparison" => serde_json::from_value(rest)
                .map(PipelineAction::FilterComparison)
                .map_err(D::Error::custom),
            "filter_in_list" => serde_json::from_value(rest)
                .map(PipelineAction::FilterInList)
                .map_err(D::Error::custom),
            "filter_is_null" => serde_json::from_value(rest)
                .map(PipelineAction::FilterIsNull)
                .map_err(D::Error::custom),
            "join_left" => serde_json::from_value(rest)
                .map(PipelineAction::JoinLeft)
                .map_err(D::Error::custom),
            other => Err(D::Error::unknown_variant(other, ACTION_TAGS)),
        }
    }
}

/// A single step in the population pipeline. The `step_id` names the CTE
/// the step emits and must be unique within a specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineStep {
    pub step_id: String,
    pub action: PipelineAction,
}

/// Audit-grade sampling configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMethod {
    Random,
    Stratified,
    Systematic,
}

/// Sampling applied to the final rowset. Exactly one of `sample_size`
/// and `sample_percentage` must be present; a seed makes the draw
/// reproducible and audits demand it whenever present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingStrategy {
    pub method: SamplingMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_percentage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub random_seed: Option<i64>,
    pub justification: String,
}

/// The population derivation: a base dataset, ordered steps, and
/// optional sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PopulationPipeline {
    pub base_dataset: String,
    pub steps: Vec<PipelineStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingStrategy>,
}
