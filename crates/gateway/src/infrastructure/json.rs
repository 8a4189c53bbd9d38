//! Field extraction for loosely typed exchange JSON.
//!
//! Exchanges mix numbers and numeric strings freely, so every accessor
//! accepts both and yields `None` for anything else.

use chrono::{DateTime, Utc};
use marketfeed_core::Timestamp;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Decimal from a JSON number or numeric string
pub fn decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => parse_decimal(&n.to_string()),
        Value::String(s) => parse_decimal(s.trim()),
        _ => None,
    }
}

/// Decimal at an array index
pub fn decimal_at(value: &Value, index: usize) -> Option<Decimal> {
    value.get(index).and_then(decimal)
}

/// Decimal in an object field
pub fn decimal_field(value: &Value, field: &str) -> Option<Decimal> {
    value.get(field).and_then(decimal)
}

fn parse_decimal(s: &str) -> Option<Decimal> {
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Integer from a JSON number or numeric string
pub fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn integer_field(value: &Value, field: &str) -> Option<i64> {
    value.get(field).and_then(integer)
}

pub fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}

pub fn from_millis(millis: i64) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

pub fn from_secs(secs: i64) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}

pub fn from_micros(micros: i64) -> Option<Timestamp> {
    DateTime::<Utc>::from_timestamp_micros(micros)
}

/// ISO-8601 / RFC 3339 time string
pub fn from_rfc3339(s: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
