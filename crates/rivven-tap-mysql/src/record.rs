//! Row conformance
//!
//! Converts database values into JSON records. Calendar dates stay dates:
//! a `DATE` becomes `YYYY-MM-DD` and is never widened to a midnight
//! timestamp. Date-times render as ISO-8601 without a timezone suffix.

use base64::Engine;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value as JsonValue};
use std::str::FromStr;

use crate::types::{widen_f32, Row, Value};

/// One extracted row, keyed by column in result order
pub type Record = Map<String, JsonValue>;

fn format_datetime(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn format_time(t: &NaiveTime) -> String {
    if t.nanosecond() == 0 {
        t.format("%H:%M:%S").to_string()
    } else {
        t.format("%H:%M:%S%.6f").to_string()
    }
}

fn format_interval(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let total = micros.unsigned_abs();
    let frac = total % 1_000_000;
    let secs = total / 1_000_000;
    let base = format!(
        "{sign}{}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    );
    if frac == 0 {
        base
    } else {
        format!("{base}.{frac:06}")
    }
}

fn float_to_json(f: f64) -> JsonValue {
    Number::from_f64(f).map_or(JsonValue::Null, JsonValue::Number)
}

/// A decimal becomes a JSON number only when the number reads back as the
/// same decimal; otherwise its exact digits are kept as a string
fn decimal_to_json(d: &Decimal) -> JsonValue {
    let text = d.to_string();
    match text.parse::<Number>() {
        Ok(n) if Decimal::from_str(&n.to_string()).is_ok_and(|back| back == *d) => {
            JsonValue::Number(n)
        }
        _ => JsonValue::String(text),
    }
}

/// Conform a single value
pub fn conform_value(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int8(n) => JsonValue::from(*n),
        Value::Int16(n) => JsonValue::from(*n),
        Value::Int32(n) => JsonValue::from(*n),
        Value::Int64(n) => JsonValue::from(*n),
        Value::Float32(n) => float_to_json(widen_f32(*n)),
        Value::Float64(n) => float_to_json(*n),
        Value::Decimal(d) => decimal_to_json(d),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => {
            JsonValue::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => JsonValue::String(format_time(t)),
        Value::DateTime(dt) => JsonValue::String(format_datetime(dt)),
        Value::Json(j) => j.clone(),
        Value::Interval(micros) => JsonValue::String(format_interval(*micros)),
    }
}

/// Conform a row into a record
pub fn conform_row(row: &Row) -> Record {
    row.iter()
        .map(|(name, value)| (name.to_string(), conform_value(value)))
        .collect()
}
