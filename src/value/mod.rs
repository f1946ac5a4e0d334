//! # Value Type System
//!
//! Core record/value types flowing through the pipeline: Null, Bool, Int,
//! Float, Decimal, String, DateTime, nested Record, List.
//!
//! Values implement `Eq` and `Hash` (floats hash by bit pattern) so tuples of
//! field values can serve directly as grouping keys.
//!
//! ## Usage
//!
//! ```rust
//! use reportflow::value::{Record, Value};
//!
//! let mut record = Record::new();
//! record.insert("customer", Value::from("ACME"));
//! record.insert("amount", Value::Float(120.5));
//!
//! assert_eq!(record.get("amount").and_then(Value::as_f64), Some(120.5));
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single field value.
///
/// Records are opaque maps from field name to `Value`; the pipeline never
/// interprets values beyond the numeric coercion used by aggregation.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent / nil. Missing fields and explicit nulls coalesce to this.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Fixed-point decimal (currency amounts, quantities).
    Decimal(Decimal),
    Str(String),
    /// Timezone-normalized timestamp.
    DateTime(DateTime<Utc>),
    /// Nested record (loaded relationship).
    Record(Record),
    List(Vec<Value>),
}

impl Value {
    /// Numeric view of the value. `Int`, `Float` and `Decimal` coerce;
    /// everything else (including `Null`) is non-numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Name of the variant, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Record(_) => "record",
            Value::List(_) => "list",
        }
    }

    /// Convert a JSON value into a `Value`. Integers stay `Int`; fractional
    /// numbers become `Float`. There is no datetime sniffing on strings.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::List(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => {
                let mut record = Record::new();
                for (k, v) in fields {
                    record.insert(k, Value::from_json(v));
                }
                Value::Record(record)
            }
        }
    }

    /// JSON view of the value. Datetimes render as RFC 3339 strings and
    /// decimals as JSON numbers.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Decimal(d) => d
                .to_f64()
                .and_then(serde_json::Number::from_f64)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Value::Record(r) => r.to_json(),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit-pattern equality so Value can be a hash key. NaN == NaN here.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Decimal(d) => d.hash(state),
            Value::Str(s) => s.hash(state),
            Value::DateTime(dt) => dt.hash(state),
            Value::Record(r) => {
                // Order-independent: XOR of per-field hashes.
                let mut acc: u64 = 0;
                for (k, v) in r.iter() {
                    let mut h = std::collections::hash_map::DefaultHasher::new();
                    k.hash(&mut h);
                    v.hash(&mut h);
                    acc ^= h.finish();
                }
                acc.hash(state);
            }
            Value::List(items) => items.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Decimal(d) => write!(f, "{d}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::DateTime(dt) => write!(f, "{}", dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
            Value::Record(_) => write!(f, "<record>"),
            Value::List(items) => write!(f, "<list[{}]>", items.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// An opaque record: field name → value.
///
/// Records move through the pipeline by value; each stage owns the records it
/// is currently processing and hands ownership downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Record {
            fields: HashMap::new(),
        }
    }

    /// Build a record from `(name, value)` pairs.
    pub fn from_pairs<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Record {
            fields: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field lookup that coalesces missing fields and explicit nulls: both
    /// return `Value::Null`.
    pub fn get_or_null(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }

    /// Resolve a nested path, descending into `Record` values segment by
    /// segment. A missing segment anywhere yields `Value::Null`.
    pub fn get_path(&self, path: &[String]) -> Value {
        match path {
            [] => Value::Null,
            [head, rest @ ..] => match (self.get(head), rest.is_empty()) {
                (Some(value), true) => value.clone(),
                (Some(Value::Record(nested)), false) => nested.get_path(rest),
                _ => Value::Null,
            },
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Parse a JSON object into a record. Non-object JSON yields an empty
    /// record.
    pub fn from_json(json: &serde_json::Value) -> Record {
        match Value::from_json(json) {
            Value::Record(r) => r,
            _ => Record::new(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        for k in keys {
            map.insert(k.clone(), self.fields[k].to_json());
        }
        serde_json::Value::Object(map)
    }

    /// Rough in-memory footprint in bytes, used for cache sizing and registry
    /// memory accounting. Intentionally cheap, not exact.
    pub fn estimated_size(&self) -> usize {
        let mut size = std::mem::size_of::<Record>();
        for (k, v) in &self.fields {
            size += k.len() + estimated_value_size(v);
        }
        size
    }
}

fn estimated_value_size(value: &Value) -> usize {
    let base = std::mem::size_of::<Value>();
    match value {
        Value::Str(s) => base + s.len(),
        Value::Record(r) => base + r.estimated_size(),
        Value::List(items) => base + items.iter().map(estimated_value_size).sum::<usize>(),
        _ => base,
    }
}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut acc: u64 = 0;
        for (k, v) in &self.fields {
            let mut h = std::collections::hash_map::DefaultHasher::new();
            k.hash(&mut h);
            v.hash(&mut h);
            acc ^= h.finish();
        }
        acc.hash(state);
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        let mut keys: Vec<&String> = self.fields.keys().collect();
        keys.sort();
        for k in keys {
            map.serialize_entry(k, &self.fields[k])?;
        }
        map.end()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Record::from_pairs(iter)
    }
}

/// A grouping key: the tuple of field values named by a group spec, in spec
/// order. Missing fields and explicit nulls both contribute `Value::Null`, so
/// they land in the same group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey(pub Vec<Value>);

impl GroupKey {
    /// Extract the key for `fields` from a record.
    pub fn from_record(record: &Record, fields: &[String]) -> GroupKey {
        GroupKey(fields.iter().map(|f| record.get_or_null(f)).collect())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "({})", parts.join(", "))
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for v in &self.0 {
            seq.serialize_element(v)?;
        }
        seq.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(2.5).as_f64(), Some(2.5));
        assert_eq!(
            Value::Decimal(Decimal::new(1250, 2)).as_f64(),
            Some(12.5)
        );
        assert_eq!(Value::Str("3".into()).as_f64(), None);
        assert_eq!(Value::Null.as_f64(), None);
    }

    #[test]
    fn test_missing_and_null_coalesce() {
        let mut record = Record::new();
        record.insert("status", Value::Null);

        assert_eq!(record.get_or_null("status"), Value::Null);
        assert_eq!(record.get_or_null("absent"), Value::Null);

        let a = GroupKey::from_record(&record, &["status".to_string()]);
        let b = GroupKey::from_record(&Record::new(), &["status".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_group_key_hashable() {
        let mut seen = HashSet::new();
        seen.insert(GroupKey(vec![Value::from("west"), Value::Int(1)]));
        assert!(seen.contains(&GroupKey(vec![Value::from("west"), Value::Int(1)])));
        assert!(!seen.contains(&GroupKey(vec![Value::from("east"), Value::Int(1)])));
    }

    #[test]
    fn test_float_keys_use_bit_patterns() {
        let a = GroupKey(vec![Value::Float(1.5)]);
        let b = GroupKey(vec![Value::Float(1.5)]);
        assert_eq!(a, b);

        let mut seen = HashSet::new();
        seen.insert(a);
        assert!(seen.contains(&b));
    }

    #[test]
    fn test_nested_path_resolution() {
        let mut inner = Record::new();
        inner.insert("name", Value::from("ACME"));
        let mut outer = Record::new();
        outer.insert("customer", Value::Record(inner));

        let path = vec!["customer".to_string(), "name".to_string()];
        assert_eq!(outer.get_path(&path), Value::from("ACME"));

        let missing = vec!["customer".to_string(), "city".to_string()];
        assert_eq!(outer.get_path(&missing), Value::Null);

        let through_scalar = vec!["customer".to_string(), "name".to_string(), "x".to_string()];
        assert_eq!(outer.get_path(&through_scalar), Value::Null);
    }

    #[test]
    fn test_json_round_trip() {
        let json = serde_json::json!({
            "id": 1,
            "amount": 12.5,
            "customer": { "name": "ACME" },
            "tags": ["a", "b"],
            "note": null
        });
        let record = Record::from_json(&json);
        assert_eq!(record.get("id"), Some(&Value::Int(1)));
        assert_eq!(record.get("amount"), Some(&Value::Float(12.5)));
        assert_eq!(record.get("note"), Some(&Value::Null));
        assert_eq!(record.to_json(), json);
    }
}
