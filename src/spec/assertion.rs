//! Assertion taxonomy: the rules every population row (or group) must
//! satisfy.
//!
//! Like pipeline actions, assertions form a closed discriminated union,
//! keyed on `assertion_type`. Every assertion carries an id, a prose
//! description, and a materiality threshold in percent.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize};

use super::value::{AggFunc, CompareOp, MatchOp, OrderingOp, ScalarValue};

/// The expected side of a `ValueMatch`: a single scalar, or a list for
/// the membership operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

impl MatchValue {
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            MatchValue::Scalar(v) => Some(v),
            MatchValue::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ScalarValue]> {
        match self {
            MatchValue::List(v) => Some(v),
            MatchValue::Scalar(_) => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Row-level comparison of a column against an expected value or list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueMatch {
    pub assertion_id: String,
    pub description: String,
    #[serde(default)]
    pub materiality_threshold_percent: f64,
    pub field: String,
    pub operator: MatchOp,
    pub expected_value: MatchValue,
    /// Trim and upper-case both sides of string comparisons before
    /// comparing. Ignored for non-string expected values.
    #[serde(default = "default_true")]
    pub ignore_case_and_space: bool,
}

/// Row-level comparison of two columns against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnComparison {
    pub assertion_id: String,
    pub description: String,
    #[serde(default)]
    pub materiality_threshold_percent: f64,
    pub left_field: String,
    pub operator: CompareOp,
    pub right_field: String,
}

/// Row-level comparison of a date column against another date column
/// shifted by a whole number of days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemporalDateMath {
    pub assertion_id: String,
    pub description: String,
    #[serde(default)]
    pub materiality_threshold_percent: f64,
    pub base_date_field: String,
    pub operator: OrderingOp,
    pub target_date_field: String,
    /// Days added to the target date; may be negative.
    pub offset_days: i64,
}

/// Group-level threshold over an aggregate of a metric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Aggregation {
    pub assertion_id: String,
    pub description: String,
    #[serde(default)]
    pub materiality_threshold_percent: f64,
    pub group_by_fields: Vec<String>,
    pub metric_field: String,
    pub aggregation_function: AggFunc,
    pub operator: OrderingOp,
    pub threshold: f64,
}

/// An assertion, discriminated on the `assertion_type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "assertion_type", rename_all = "snake_case")]
pub enum Assertion {
    ValueMatch(ValueMatch),
    ColumnComparison(ColumnComparison),
    TemporalDateMath(TemporalDateMath),
    Aggregation(Aggregation),
}

const ASSERTION_TAGS: &[&str] = &[
    "value_match",
    "column_comparison",
    "temporal_date_math",
    "aggregation",
];

impl<'de> Deserialize<'de> for Assertion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut map = serde_json::Map::deserialize(deserializer)?;
        let tag = map
            .remove("assertion_type")
            .ok_or_else(|| D::Error::missing_field("assertion_type"))?;
        let tag = tag
            .as_str()
            .ok_or_else(|| D::Error::custom("assertion_type tag must be a string"))?
            .to_string();
        let rest = serde_json::Value::Object(map);
        match tag.as_str() {
            "value_match" => serde_json::from_value(rest)
                .map(Assertion::ValueMatch)
                .map_err(D::Error::custom),
            "column_comparison" => serde_json::from_value(rest)
                .map(Assertion::ColumnComparison)
                .map_err(D::Error::custom),
            "temporal_date_math" => serde_json::from_value(rest)
                .map(Assertion::TemporalDateMath)
                .map_err(D::Error::custom),
            "aggregation" => serde_json::from_value(rest)
                .map(Assertion::Aggregation)
                .map_err(D::Error::custom),
            other => Err(D::Error::unknown_variant(other, ASSERTION_TAGS)),
        }
    }
}

impl Assertion {
    pub fn assertion_id(&self) -> &str {
        match self {
            Assertion::ValueMatch(a) => &a.assertion_id,
            Assertion::ColumnComparison(a) => &a.assertion_id,
            Assertion::TemporalDateMath(a) => &a.assertion_id,
            Assertion::Aggregation(a) => &a.assertion_id,
        }
    }

    pub fn materiality_threshold_percent(&self) -> f64 {
        match self {
            Assertion::ValueMatch(a) => a.materiality_threshold_percent,
            Assertion::ColumnComparison(a) => a.materiality_threshold_percent,
            Assertion::TemporalDateMath(a) => a.materiality_threshold_percent,
            Assertion::Aggregation(a) => a.materiality_threshold_percent,
        }
    }

    pub fn is_aggregation(&self) -> bool {
        matches!(self, Assertion::Aggregation(_))
    }
}
