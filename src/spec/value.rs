//! Scalar value model and operator vocabulary.
//!
//! Every value that can appear in a filter or assertion is one of the
//! `ScalarValue` kinds. Null is a first-class value, not a sentinel: the
//! compiler rewrites comparisons against it to `IS NULL` / `IS NOT NULL`
//! and the emitter refuses to render it as a literal.

use chrono::{NaiveDate, NaiveDateTime};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// Scalar values
// =============================================================================

/// A typed scalar value.
///
/// JSON carries no temporal type, so strings shaped exactly like an ISO
/// date (`YYYY-MM-DD`) or ISO timestamp are promoted to the temporal
/// kinds during deserialization; every other string stays a string.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Null,
}

/// The kind of a scalar, used for operator admissibility and coarse
/// type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Null,
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            ScalarValue::String(_) => ScalarKind::String,
            ScalarValue::Integer(_) => ScalarKind::Integer,
            ScalarValue::Float(_) => ScalarKind::Float,
            ScalarValue::Boolean(_) => ScalarKind::Boolean,
            ScalarValue::Date(_) => ScalarKind::Date,
            ScalarValue::Timestamp(_) => ScalarKind::Timestamp,
            ScalarValue::Null => ScalarKind::Null,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    pub fn is_string(&self) -> bool {
        matches!(self, ScalarValue::String(_))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarValue::Integer(_) | ScalarValue::Float(_))
    }

    /// Build a scalar from a JSON node. Arrays and objects are rejected.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::Null => Ok(ScalarValue::Null),
            serde_json::Value::Bool(b) => Ok(ScalarValue::Boolean(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(ScalarValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(ScalarValue::Float(f))
                } else {
                    Err(format!("number {} is out of range", n))
                }
            }
            serde_json::Value::String(s) => Ok(Self::from_text(s)),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                Err("expected a scalar value".to_string())
            }
        }
    }

    fn from_text(s: &str) -> Self {
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return ScalarValue::Date(date);
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(ts) = NaiveDateTime::parse_from_str(s, format) {
                return ScalarValue::Timestamp(ts);
            }
        }
        ScalarValue::String(s.to_string())
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScalarValue::String(s) => serializer.serialize_str(s),
            ScalarValue::Integer(i) => serializer.serialize_i64(*i),
            ScalarValue::Float(f) => serializer.serialize_f64(*f),
            ScalarValue::Boolean(b) => serializer.serialize_bool(*b),
            ScalarValue::Date(d) => serializer.serialize_str(&d.format("%Y-%m-%d").to_string()),
            ScalarValue::Timestamp(t) => {
                serializer.serialize_str(&t.format("%Y-%m-%dT%H:%M:%S").to_string())
            }
            ScalarValue::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for ScalarValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        ScalarValue::from_json(&value).map_err(D::Error::custom)
    }
}

// =============================================================================
// Operators
// =============================================================================

/// Comparison operators available to population filters and
/// column-to-column assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// SQL infix form.
    pub fn sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "<>",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    /// Whether the operator imposes an ordering (everything but eq/neq).
    pub fn is_ordered(self) -> bool {
        !matches!(self, CompareOp::Eq | CompareOp::Neq)
    }

    /// Whether the operator can be applied to the given value.
    /// Ordered comparisons against null are inadmissible; equality
    /// against null is rewritten to `IS [NOT] NULL` by the compiler.
    pub fn admits(self, value: &ScalarValue) -> bool {
        !(self.is_ordered() && value.is_null())
    }
}

/// Operators available to `ValueMatch` assertions: the comparison set
/// plus list membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

impl MatchOp {
    pub fn sql(self) -> &'static str {
        match self {
            MatchOp::Eq => "=",
            MatchOp::Neq => "<>",
            MatchOp::Gt => ">",
            MatchOp::Gte => ">=",
            MatchOp::Lt => "<",
            MatchOp::Lte => "<=",
            MatchOp::In => "IN",
            MatchOp::NotIn => "NOT IN",
        }
    }

    pub fn is_membership(self) -> bool {
        matches!(self, MatchOp::In | MatchOp::NotIn)
    }

    pub fn is_ordered(self) -> bool {
        matches!(
            self,
            MatchOp::Gt | MatchOp::Gte | MatchOp::Lt | MatchOp::Lte
        )
    }
}

/// Operators for threshold and date-offset comparisons. Inequality is
/// deliberately absent: "not equal to a threshold" is not a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl OrderingOp {
    pub fn sql(self) -> &'static str {
        match self {
            OrderingOp::Eq => "=",
            OrderingOp::Gt => ">",
            OrderingOp::Gte => ">=",
            OrderingOp::Lt => "<",
            OrderingOp::Lte => "<=",
        }
    }
}

/// Aggregation functions for the aggregated assertion shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggFunc {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    /// SQL function name.
    pub fn sql(self) -> &'static str {
        match self {
            AggFunc::Sum => "SUM",
            AggFunc::Count => "COUNT",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }

    /// Lowercase label used when naming the metric output column.
    pub fn label(self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::Count => "count",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }

    /// Whether the function only makes sense over numeric inputs.
    pub fn requires_numeric(self) -> bool {
        matches!(self, AggFunc::Sum | AggFunc::Avg)
    }
}
