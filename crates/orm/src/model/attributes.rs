//! Per-entity attribute state
//!
//! Holds the current attribute map plus the original snapshot taken at the
//! last load or save. The dirty set is always derived by diffing the two,
//! with numeric-string tolerant comparison so `1` and `"1"` do not register
//! as a change after a round-trip through the driver.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::error::{ModelError, ModelResult};

/// Current attributes plus the last-synchronized snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeStore {
    attributes: BTreeMap<String, Value>,
    original: BTreeMap<String, Value>,
}

impl AttributeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a fetched row; the snapshot equals the attributes
    pub fn from_row(row: BTreeMap<String, Value>) -> Self {
        Self {
            original: row.clone(),
            attributes: row,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    pub fn all(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    pub fn original(&self, key: &str) -> Option<&Value> {
        self.original.get(key)
    }

    /// Take the current attributes as the new snapshot
    pub fn sync_original(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Attributes whose value differs from the snapshot
    pub fn dirty(&self) -> BTreeMap<String, Value> {
        self.attributes
            .iter()
            .filter(|(key, value)| match self.original.get(*key) {
                Some(original) => !values_equivalent(value, original),
                None => true,
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// True when any of the given attributes (or any attribute at all, for an
    /// empty list) differs from the snapshot
    pub fn is_dirty(&self, keys: &[&str]) -> bool {
        let dirty = self.dirty();
        if keys.is_empty() {
            !dirty.is_empty()
        } else {
            keys.iter().any(|key| dirty.contains_key(*key))
        }
    }
}

/// Loose equality used for dirty detection: values equal under JSON equality
/// are clean, and a number compares equal to the string spelling of the same
/// number.
pub fn values_equivalent(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (numeric_value(a), numeric_value(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn numeric_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Normalize a date-cast attribute to the canonical RFC 3339 UTC spelling.
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, bare dates, and Unix epoch
/// seconds.
pub fn normalize_date_value(value: &Value) -> ModelResult<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => {
            let secs = n.as_i64().ok_or_else(|| {
                ModelError::Serialization(format!("invalid epoch timestamp: {}", n))
            })?;
            let dt = Utc
                .timestamp_opt(secs, 0)
                .single()
                .ok_or_else(|| {
                    ModelError::Serialization(format!("epoch timestamp out of range: {}", secs))
                })?;
            Ok(Value::String(dt.to_rfc3339()))
        }
        Value::String(s) => {
            let dt = parse_date_string(s)?;
            Ok(Value::String(dt.to_rfc3339()))
        }
        other => Err(ModelError::Serialization(format!(
            "cannot cast {} to a date",
            other
        ))),
    }
}

fn parse_date_string(s: &str) -> ModelResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(ModelError::Serialization(format!(
        "unrecognized date format: '{}'",
        s
    )))
}
