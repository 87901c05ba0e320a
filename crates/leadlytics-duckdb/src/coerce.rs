//! The single boundary where loosely typed driver values become Rust numbers
//! and timestamps. Aggregates are read as [`Value`] and coerced here; a
//! missing or odd count becomes 0 instead of an error.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use duckdb::types::Value;

const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub fn to_integer(value: &Value) -> i64 {
    match value {
        Value::Null => 0,
        Value::Boolean(b) => i64::from(*b),
        Value::TinyInt(v) => i64::from(*v),
        Value::SmallInt(v) => i64::from(*v),
        Value::Int(v) => i64::from(*v),
        Value::BigInt(v) => *v,
        Value::HugeInt(v) => i64::try_from(*v).unwrap_or(if *v < 0 { i64::MIN } else { i64::MAX }),
        Value::UTinyInt(v) => i64::from(*v),
        Value::USmallInt(v) => i64::from(*v),
        Value::UInt(v) => i64::from(*v),
        Value::UBigInt(v) => i64::try_from(*v).unwrap_or(i64::MAX),
        Value::Float(v) => float_to_integer(f64::from(*v)),
        Value::Double(v) => float_to_integer(*v),
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(float_to_integer))
            .unwrap_or(0),
        _ => 0,
    }
}

fn float_to_integer(v: f64) -> i64 {
    if v.is_finite() {
        v.round() as i64
    } else {
        0
    }
}

/// Nullable float: `None` for NULL or anything that is not a number.
pub fn to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Float(v) => Some(f64::from(*v)),
        Value::Double(v) => Some(*v),
        Value::Null => None,
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        other => {
            let v = to_integer(other);
            Some(v as f64)
        }
    }
    .filter(|v| v.is_finite())
}

/// Read column `idx` as an integer through [`to_integer`].
pub fn column_integer(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<i64> {
    Ok(to_integer(&row.get::<_, Value>(idx)?))
}

pub fn column_float(row: &duckdb::Row<'_>, idx: usize) -> duckdb::Result<Option<f64>> {
    Ok(to_float(&row.get::<_, Value>(idx)?))
}

/// Format a UTC instant the way it is bound into `TIMESTAMP` columns.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.naive_utc().format(TS_FORMAT).to_string()
}

/// Parse a `CAST(ts AS VARCHAR)` value back into a UTC instant.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw.trim(), TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

pub fn format_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_from_every_numeric_shape() {
        assert_eq!(to_integer(&Value::Null), 0);
        assert_eq!(to_integer(&Value::BigInt(42)), 42);
        assert_eq!(to_integer(&Value::HugeInt(7)), 7);
        assert_eq!(to_integer(&Value::HugeInt(i128::MAX)), i64::MAX);
        assert_eq!(to_integer(&Value::UBigInt(u64::MAX)), i64::MAX);
        assert_eq!(to_integer(&Value::Double(2.6)), 3);
        assert_eq!(to_integer(&Value::Double(f64::NAN)), 0);
        assert_eq!(to_integer(&Value::Text("12".into())), 12);
        assert_eq!(to_integer(&Value::Text("12.4".into())), 12);
        assert_eq!(to_integer(&Value::Text("n/a".into())), 0);
    }

    #[test]
    fn floats_keep_null_as_none() {
        assert_eq!(to_float(&Value::Null), None);
        assert_eq!(to_float(&Value::Double(1.5)), Some(1.5));
        assert_eq!(to_float(&Value::BigInt(3)), Some(3.0));
        assert_eq!(to_float(&Value::Text("x".into())), None);
    }

    #[test]
    fn timestamps_round_trip_through_sql_text() {
        let ts = NaiveDate::from_ymd_opt(2026, 1, 10)
            .and_then(|d| d.and_hms_milli_opt(8, 30, 15, 250))
            .expect("valid")
            .and_utc();
        assert_eq!(format_ts(ts), "2026-01-10 08:30:15.250");
        assert_eq!(parse_ts("2026-01-10 08:30:15.250"), Some(ts));
        assert!(parse_ts("2026-01-10 08:30:15").is_some());
        assert_eq!(parse_ts("garbage"), None);
    }
}
