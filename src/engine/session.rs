//! One analytical session per control.
//!
//! A session owns a fresh in-memory DuckDB connection. Evidence files
//! are opened read-only through `read_parquet`; the engine never writes
//! into them. Exception rows are streamed: every row is counted, only
//! the first N survive into the report, canonicalized for the ledger.

use chrono::NaiveDate;
use duckdb::types::{TimeUnit, ValueRef};
use duckdb::Connection;

use super::EngineConfig;

pub(crate) struct Session {
    conn: Connection,
}

impl Session {
    pub fn open(config: &EngineConfig) -> duckdb::Result<Self> {
        let conn = Connection::open_in_memory()?;
        if let Some(limit_mb) = config.memory_limit_mb {
            conn.execute_batch(&format!("SET memory_limit = '{}MB'", limit_mb))?;
        }
        Ok(Self { conn })
    }

    /// Parse/plan dry-run. Fails exactly when the engine's planner
    /// rejects the SQL, without reading evidence.
    pub fn explain(&self, sql: &str) -> duckdb::Result<()> {
        let mut stmt = self.conn.prepare(&format!("EXPLAIN {}", sql))?;
        let mut rows = stmt.query([])?;
        while rows.next()?.is_some() {}
        Ok(())
    }

    /// Run a single-value COUNT query.
    pub fn count(&self, sql: &str) -> duckdb::Result<i64> {
        self.conn.query_row(sql, [], |row| row.get(0))
    }

    /// Execute the exception query: exact row count, plus the first
    /// `sample_limit` rows canonicalized to JSON.
    pub fn collect(
        &self,
        sql: &str,
        sample_limit: usize,
    ) -> duckdb::Result<(i64, Vec<serde_json::Value>)> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let column_names: Vec<String> = (0..column_count)
            .map(|i| {
                stmt.column_name(i)
                    .map(|name| name.to_string())
                    .unwrap_or_else(|_| format!("column_{}", i))
            })
            .collect();

        let mut rows = stmt.query([])?;
        let mut total: i64 = 0;
        let mut sample = Vec::new();
        while let Some(row) = rows.next()? {
            total += 1;
            if sample.len() < sample_limit {
                sample.push(row_to_json(row, &column_names)?);
            }
        }
        Ok((total, sample))
    }
}

/// Canonicalize one result row: column keys sorted (serde_json's map is
/// ordered), temporals as ISO-8601, NaN as null, exotic values as their
/// canonical string form.
fn row_to_json(
    row: &duckdb::Row<'_>,
    column_names: &[String],
) -> duckdb::Result<serde_json::Value> {
    let mut object = serde_json::Map::new();
    for (index, name) in column_names.iter().enumerate() {
        object.insert(name.clone(), sanitize(row.get_ref(index)?));
    }
    Ok(serde_json::Value::Object(object))
}

fn sanitize(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Boolean(b) => serde_json::Value::Bool(b),
        ValueRef::TinyInt(v) => v.into(),
        ValueRef::SmallInt(v) => v.into(),
        ValueRef::Int(v) => v.into(),
        ValueRef::BigInt(v) => v.into(),
        ValueRef::HugeInt(v) => match i64::try_from(v) {
            Ok(narrow) => narrow.into(),
            Err(_) => serde_json::Value::String(v.to_string()),
        },
        ValueRef::UTinyInt(v) => v.into(),
        ValueRef::USmallInt(v) => v.into(),
        ValueRef::UInt(v) => v.into(),
        ValueRef::UBigInt(v) => v.into(),
        ValueRef::Float(v) => float_value(f64::from(v)),
        ValueRef::Double(v) => float_value(v),
        ValueRef::Decimal(d) => serde_json::Value::String(d.to_string()),
        ValueRef::Text(bytes) => {
            serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Blob(bytes) => serde_json::Value::String(hex_string(bytes)),
        ValueRef::Date32(days) => date_value(days),
        ValueRef::Timestamp(unit, raw) => timestamp_value(unit, raw),
        other => serde_json::Value::String(format!("{:?}", other)),
    }
}

fn float_value(value: f64) -> serde_json::Value {
    if value.is_nan() {
        return serde_json::Value::Null;
    }
    match serde_json::Number::from_f64(value) {
        Some(number) => serde_json::Value::Number(number),
        None => serde_json::Value::String(value.to_string()),
    }
}

fn date_value(days_since_epoch: i32) -> serde_json::Value {
    // 719_163 days from 0001-01-01 to the Unix epoch.
    match NaiveDate::from_num_days_from_ce_opt(days_since_epoch + 719_163) {
        Some(date) => serde_json::Value::String(date.format("%Y-%m-%d").to_string()),
        None => serde_json::Value::Null,
    }
}

fn timestamp_value(unit: TimeUnit, raw: i64) -> serde_json::Value {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    match chrono::DateTime::from_timestamp_micros(micros) {
        Some(ts) => {
            serde_json::Value::String(ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
        }
        None => serde_json::Value::Null,
    }
}

fn hex_string(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
