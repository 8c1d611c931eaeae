//! SQL rendering primitives.
//!
//! The three functions here are the only place in the crate where a
//! dynamic value becomes SQL text. Everything else composes fragments
//! out of their outputs, so literal quoting and identifier policy live
//! in exactly one file.
//!
//! Identifier policy: bare identifiers pass through unchanged when they
//! match `[A-Za-z_][A-Za-z0-9_]*` and are rejected otherwise. Rejection,
//! not quoting, is the injection shield: column names arrive from the
//! ingestor already normalized to this alphabet, so anything else in an
//! identifier position is hostile or corrupt.

use crate::spec::value::ScalarValue;

/// Errors from the rendering primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("'{0}' is not a valid SQL identifier")]
    InvalidIdentifier(String),

    #[error("null cannot be rendered as a literal; rewrite to IS NULL / IS NOT NULL")]
    NullLiteral,

    #[error("non-finite number cannot be rendered as a SQL literal")]
    NonFiniteNumber,
}

/// Whether `name` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b.is_ascii_alphabetic() || b == b'_' => {}
        _ => return false,
    }
    bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Pass an identifier through, rejecting anything outside the alphabet.
pub fn identifier(name: &str) -> Result<&str, EmitError> {
    if is_identifier(name) {
        Ok(name)
    } else {
        Err(EmitError::InvalidIdentifier(name.to_string()))
    }
}

/// Render a scalar as a SQL literal.
///
/// Strings double every embedded apostrophe and are wrapped in single
/// quotes; no other transformation is applied. Dates and timestamps
/// render as typed literals. Null never reaches this function: the
/// compiler must already have rewritten the comparison.
pub fn literal(value: &ScalarValue) -> Result<String, EmitError> {
    match value {
        ScalarValue::String(s) => Ok(quote_str(s)),
        ScalarValue::Integer(i) => Ok(i.to_string()),
        ScalarValue::Float(f) => float_literal(*f),
        ScalarValue::Boolean(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
        ScalarValue::Date(d) => Ok(format!("DATE '{}'", d.format("%Y-%m-%d"))),
        ScalarValue::Timestamp(t) => {
            Ok(format!("TIMESTAMP '{}'", t.format("%Y-%m-%dT%H:%M:%S")))
        }
        ScalarValue::Null => Err(EmitError::NullLiteral),
    }
}

/// Render a numeric threshold (always finite by spec validation).
pub fn number(value: f64) -> Result<String, EmitError> {
    float_literal(value)
}

/// Render a day-interval: `INTERVAL <signed_int> DAY`.
pub fn interval_days(days: i64) -> String {
    format!("INTERVAL {} DAY", days)
}

/// Quote a string for use inside a SQL statement. Also used for file
/// paths handed to `read_parquet`, which share string-literal syntax.
pub fn quote_str(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn float_literal(f: f64) -> Result<String, EmitError> {
    if !f.is_finite() {
        return Err(EmitError::NonFiniteNumber);
    }
    if f == f.trunc() && f.abs() < 1e15 {
        // Whole-valued thresholds read as integers in audit output.
        return Ok(format!("{}", f as i64));
    }
    let mut buffer = ryu::Buffer::new();
    Ok(buffer.format(f).to_string())
}
