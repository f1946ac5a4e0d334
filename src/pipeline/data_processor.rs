//! Record Type Conversion
//!
//! Optional post-transform step normalizing value types for downstream
//! consumers: datetimes to ISO 8601 strings, decimals to floats (with
//! configurable precision) or strings, nil replacement, and shallow
//! relationship flattening.
//!
//! The step is all-or-nothing per batch: if conversion fails, the caller
//! logs and falls back to the unconverted records. Processing never stops on
//! a conversion failure.

use crate::value::{Record, Value};
use chrono::SecondsFormat;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessError {
    #[error("cannot convert decimal value of field '{0}' to float")]
    DecimalOutOfRange(String),
}

/// How decimal values convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalMode {
    /// To `f64`, optionally rounded to a fixed number of decimal places
    /// first.
    Float,
    /// To the decimal's canonical string form.
    Text,
}

/// Conversion options. The empty default performs datetime conversion only.
#[derive(Debug, Clone, Deserialize)]
pub struct ConversionOptions {
    /// Convert datetimes to ISO 8601 strings.
    #[serde(default = "default_true")]
    pub datetime_to_iso: bool,

    #[serde(default = "default_decimal_mode")]
    pub decimal_mode: DecimalMode,

    /// Round decimals to this many places before float conversion.
    #[serde(default)]
    pub decimal_precision: Option<u32>,

    /// Replace nil values with this replacement (kept as nil when unset).
    #[serde(default)]
    pub nil_replacement: Option<ReplacementValue>,

    /// Lift one level of nested-record fields to `{field}_{subfield}`.
    #[serde(default)]
    pub flatten_relationships: bool,
}

fn default_true() -> bool {
    true
}

fn default_decimal_mode() -> DecimalMode {
    DecimalMode::Float
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            datetime_to_iso: true,
            decimal_mode: DecimalMode::Float,
            decimal_precision: None,
            nil_replacement: None,
            flatten_relationships: false,
        }
    }
}

/// Scalar replacement for nils, deserializable from report options.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReplacementValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl ReplacementValue {
    fn to_value(&self) -> Value {
        match self {
            ReplacementValue::Str(s) => Value::Str(s.clone()),
            ReplacementValue::Int(i) => Value::Int(*i),
            ReplacementValue::Float(f) => Value::Float(*f),
            ReplacementValue::Bool(b) => Value::Bool(*b),
        }
    }
}

/// Convert a whole batch. Any field-level failure fails the batch.
pub fn process_batch(
    records: &[Record],
    opts: &ConversionOptions,
) -> Result<Vec<Record>, ProcessError> {
    records.iter().map(|r| process_record(r, opts)).collect()
}

fn process_record(record: &Record, opts: &ConversionOptions) -> Result<Record, ProcessError> {
    let mut out = Record::new();
    for (field, value) in record.iter() {
        match value {
            Value::Record(nested) if opts.flatten_relationships => {
                for (sub, sub_value) in nested.iter() {
                    out.insert(
                        format!("{field}_{sub}"),
                        convert_scalar(field, sub_value, opts)?,
                    );
                }
            }
            other => {
                out.insert(field.clone(), convert_scalar(field, other, opts)?);
            }
        }
    }
    Ok(out)
}

fn convert_scalar(
    field: &str,
    value: &Value,
    opts: &ConversionOptions,
) -> Result<Value, ProcessError> {
    Ok(match value {
        Value::DateTime(dt) if opts.datetime_to_iso => {
            Value::Str(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
        }
        Value::Decimal(d) => match opts.decimal_mode {
            DecimalMode::Float => {
                let rounded = match opts.decimal_precision {
                    Some(places) => d.round_dp(places),
                    None => *d,
                };
                Value::Float(
                    rounded
                        .to_f64()
                        .ok_or_else(|| ProcessError::DecimalOutOfRange(field.to_string()))?,
                )
            }
            DecimalMode::Text => Value::Str(d.to_string()),
        },
        Value::Null => match &opts.nil_replacement {
            Some(replacement) => replacement.to_value(),
            None => Value::Null,
        },
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    #[test]
    fn test_datetime_to_iso() {
        let dt = chrono::Utc
            .with_ymd_and_hms(2024, 6, 1, 10, 30, 0)
            .single()
            .expect("valid");
        let record = Record::from_pairs([("created_at", Value::DateTime(dt))]);

        let out = process_batch(&[record], &ConversionOptions::default()).expect("converts");
        assert_eq!(
            out[0].get("created_at"),
            Some(&Value::Str("2024-06-01T10:30:00Z".to_string()))
        );
    }

    #[test]
    fn test_decimal_to_float_with_precision() {
        let record = Record::from_pairs([(
            "amount",
            Value::Decimal(Decimal::from_str("12.3456").expect("valid")),
        )]);
        let opts = ConversionOptions {
            decimal_precision: Some(2),
            ..ConversionOptions::default()
        };

        let out = process_batch(&[record], &opts).expect("converts");
        assert_eq!(out[0].get("amount"), Some(&Value::Float(12.35)));
    }

    #[test]
    fn test_decimal_to_string() {
        let record = Record::from_pairs([(
            "amount",
            Value::Decimal(Decimal::from_str("12.3456").expect("valid")),
        )]);
        let opts = ConversionOptions {
            decimal_mode: DecimalMode::Text,
            ..ConversionOptions::default()
        };

        let out = process_batch(&[record], &opts).expect("converts");
        assert_eq!(out[0].get("amount"), Some(&Value::Str("12.3456".to_string())));
    }

    #[test]
    fn test_nil_replacement() {
        let record = Record::from_pairs([("status", Value::Null), ("kept", Value::Int(1))]);
        let opts = ConversionOptions {
            nil_replacement: Some(ReplacementValue::Str("unknown".to_string())),
            ..ConversionOptions::default()
        };

        let out = process_batch(&[record], &opts).expect("converts");
        assert_eq!(out[0].get("status"), Some(&Value::Str("unknown".to_string())));
        assert_eq!(out[0].get("kept"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_shallow_relationship_flattening() {
        let customer = Record::from_pairs([
            ("name", Value::from("ACME")),
            ("territory", Value::from("west")),
        ]);
        let record = Record::from_pairs([
            ("id", Value::Int(1)),
            ("customer", Value::Record(customer)),
        ]);
        let opts = ConversionOptions {
            flatten_relationships: true,
            ..ConversionOptions::default()
        };

        let out = process_batch(&[record], &opts).expect("converts");
        assert_eq!(out[0].get("customer"), None);
        assert_eq!(out[0].get("customer_name"), Some(&Value::from("ACME")));
        assert_eq!(
            out[0].get("customer_territory"),
            Some(&Value::from("west"))
        );
        assert_eq!(out[0].get("id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_options_deserialize() {
        let opts: ConversionOptions = serde_json::from_str(
            r#"{ "decimal_mode": "text", "nil_replacement": 0, "flatten_relationships": true }"#,
        )
        .expect("valid options");
        assert_eq!(opts.decimal_mode, DecimalMode::Text);
        assert_eq!(opts.nil_replacement, Some(ReplacementValue::Int(0)));
        assert!(opts.flatten_relationships);
        assert!(opts.datetime_to_iso);
    }
}
