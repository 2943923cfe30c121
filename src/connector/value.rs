//! Driver value extraction into JSON.
//!
//! Dates, times and decimals become strings; binary data becomes hex.
//! Anything the chain does not recognise is `null`.

use serde_json::{Number, Value};
use sqlx::{Column, Row, mysql::MySqlRow, postgres::PgRow};

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

fn opt<T>(v: Option<T>, f: impl FnOnce(T) -> Value) -> Value {
    v.map(f).unwrap_or(Value::Null)
}

pub fn pg_value(row: &PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return opt(v, Value::Bool);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return opt(v, float);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return opt(v, |f| float(f as f64));
    }
    if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
        return opt(v, |d| Value::String(d.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return opt(v, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return opt(v, |dt| Value::String(dt.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return opt(v, |dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return opt(v, |d| Value::String(d.format("%Y-%m-%d").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return opt(v, |t| Value::String(t.format("%H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return opt(v, |b| Value::String(hex::encode(b)));
    }
    Value::Null
}

pub fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    // BIGINT UNSIGNED first, it does not fit i64
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<i8>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<u8>, _>(idx) {
        return opt(v, Value::from);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return opt(v, Value::Bool);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return opt(v, float);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return opt(v, |f| float(f as f64));
    }
    if let Ok(v) = row.try_get::<Option<rust_decimal::Decimal>, _>(idx) {
        return opt(v, |d| Value::String(d.to_string()));
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return opt(v, Value::String);
    }
    if let Ok(v) = row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
        return opt(v, |dt| Value::String(dt.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
        return opt(v, |dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
        return opt(v, |d| Value::String(d.format("%Y-%m-%d").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<chrono::NaiveTime>, _>(idx) {
        return opt(v, |t| Value::String(t.format("%H:%M:%S").to_string()));
    }
    if let Ok(v) = row.try_get::<Option<serde_json::Value>, _>(idx) {
        return v.unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return opt(v, |b| match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::String(hex::encode(e.into_bytes()))
        });
    }
    Value::Null
}

pub fn column_names<R: Row>(row: &R) -> Vec<String> {
    row.columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}
