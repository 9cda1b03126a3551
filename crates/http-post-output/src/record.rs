//! Record normalization and field manipulation.
//!
//! Incoming records are semi-structured: field values may arrive as text,
//! raw bytes, or numbers depending on the host process. Normalization coerces
//! every value to text up front so the rest of the pipeline operates on a
//! plain string map; a value that cannot be represented as text fails the
//! whole record with a typed error instead of a runtime cast failure.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::error::RecordError;

/// Separator joining dedup key field values.
const DEDUP_KEY_SEPARATOR: &str = ":";

/// A raw field value as supplied by the host process.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    /// Coerces the value to text.
    ///
    /// Bytes must be valid UTF-8; numbers and booleans render with their
    /// canonical display form.
    fn into_text(self, key: &str) -> Result<String, RecordError> {
        match self {
            FieldValue::Text(s) => Ok(s),
            FieldValue::Bytes(b) => String::from_utf8(b)
                .map_err(|_| RecordError::NonTextValue(key.to_string())),
            FieldValue::Int(i) => Ok(i.to_string()),
            FieldValue::UInt(u) => Ok(u.to_string()),
            FieldValue::Float(f) => Ok(f.to_string()),
            FieldValue::Bool(b) => Ok(b.to_string()),
        }
    }
}

/// Value injected into the configured output time field.
#[derive(Debug, Clone, PartialEq)]
pub enum TimeValue {
    /// Formatted representation, per `output_time_format`.
    Text(String),
    /// Epoch seconds, when `output_time_integer` is set.
    Epoch(i64),
}

/// A normalized record: an order-irrelevant mapping from field name to text.
///
/// Stored as a `BTreeMap` so serialization and iteration are deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: BTreeMap<String, String>,
}

impl Record {
    /// Normalizes a raw record, coercing every field value to text.
    ///
    /// Fails if any value cannot be represented as text; the caller drops
    /// the record in that case.
    pub fn normalize<I>(raw: I) -> Result<Self, RecordError>
    where
        I: IntoIterator<Item = (String, FieldValue)>,
    {
        let mut fields = BTreeMap::new();
        for (key, value) in raw {
            let text = value.into_text(&key)?;
            fields.insert(key, text);
        }
        Ok(Record { fields })
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Derives the deduplication key from the configured field list.
    ///
    /// Values are joined in the configured order with `:`; a field absent
    /// from the record contributes the empty string. Two records are "the
    /// same event" iff this key is equal.
    #[must_use]
    pub fn dedup_key(&self, key_fields: &[String]) -> String {
        key_fields
            .iter()
            .map(|f| self.get(f).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(DEDUP_KEY_SEPARATOR)
    }

    /// Merges enrichment fields into the record.
    ///
    /// Enrichment overwrites any pre-existing field of the same name.
    pub fn enrich(&mut self, enrichment: &HashMap<String, String>) {
        for (key, value) in enrichment {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    /// Deletes every listed field from the record.
    pub fn remove_fields(&mut self, fields: &[String]) {
        for field in fields {
            self.fields.remove(field);
        }
    }

    /// Serializes the record as a single JSON object.
    ///
    /// The optional time field is applied last, so it overwrites any field of
    /// the same name and can never itself be removed or participate in
    /// matching or deduplication.
    pub fn to_json(&self, time_field: Option<(&str, TimeValue)>) -> Result<Vec<u8>, RecordError> {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        for (key, value) in &self.fields {
            object.insert(key.clone(), Value::String(value.clone()));
        }
        if let Some((key, value)) = time_field {
            let json_value = match value {
                TimeValue::Text(s) => Value::String(s),
                TimeValue::Epoch(secs) => Value::Number(secs.into()),
            };
            object.insert(key.to_string(), json_value);
        }
        Ok(serde_json::to_vec(&Value::Object(object))?)
    }
}

impl FromIterator<(String, String)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Record {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_normalize_mixed_values() {
        let raw = vec![
            ("msg".to_string(), FieldValue::Text("hello".to_string())),
            ("host".to_string(), FieldValue::Bytes(b"web-01".to_vec())),
            ("code".to_string(), FieldValue::Int(-2)),
            ("count".to_string(), FieldValue::UInt(7)),
            ("ok".to_string(), FieldValue::Bool(true)),
        ];
        let record = Record::normalize(raw).expect("normalization should succeed");

        assert_eq!(record.get("msg"), Some("hello"));
        assert_eq!(record.get("host"), Some("web-01"));
        assert_eq!(record.get("code"), Some("-2"));
        assert_eq!(record.get("count"), Some("7"));
        assert_eq!(record.get("ok"), Some("true"));
    }

    #[test]
    fn test_normalize_invalid_utf8_fails() {
        let raw = vec![("blob".to_string(), FieldValue::Bytes(vec![0xff, 0xfe]))];
        let err = Record::normalize(raw).expect_err("invalid UTF-8 must fail");
        assert!(err.to_string().contains("blob"));
    }

    #[test]
    fn test_dedup_key_order_and_missing_fields() {
        let record = record(&[("a", "1"), ("b", "2")]);
        let fields = vec!["a".to_string(), "missing".to_string(), "b".to_string()];
        assert_eq!(record.dedup_key(&fields), "1::2");
    }

    #[test]
    fn test_dedup_key_is_deterministic() {
        let first = record(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let second = record(&[("c", "3"), ("b", "2"), ("a", "1")]);
        let fields = vec!["a".to_string(), "b".to_string()];
        assert_eq!(first.dedup_key(&fields), second.dedup_key(&fields));
    }

    #[test]
    fn test_enrich_overwrites_existing() {
        let mut record = record(&[("env", "staging"), ("msg", "x")]);
        let enrichment =
            HashMap::from([("env".to_string(), "prod".to_string()),
                           ("team".to_string(), "core".to_string())]);
        record.enrich(&enrichment);

        assert_eq!(record.get("env"), Some("prod"));
        assert_eq!(record.get("team"), Some("core"));
        assert_eq!(record.get("msg"), Some("x"));
    }

    #[test]
    fn test_remove_fields() {
        let mut record = record(&[("keep", "1"), ("drop", "2")]);
        record.remove_fields(&["drop".to_string(), "absent".to_string()]);
        assert_eq!(record.get("drop"), None);
        assert_eq!(record.get("keep"), Some("1"));
    }

    #[test]
    fn test_to_json_plain() {
        let record = record(&[("b", "2"), ("a", "1")]);
        let json = record.to_json(None).expect("serialization should succeed");
        assert_eq!(String::from_utf8(json).expect("utf8"), r#"{"a":"1","b":"2"}"#);
    }

    #[test]
    fn test_to_json_time_field_overwrites() {
        let record = record(&[("t", "original")]);
        let json = record
            .to_json(Some(("t", TimeValue::Epoch(1_700_000_000))))
            .expect("serialization should succeed");
        assert_eq!(
            String::from_utf8(json).expect("utf8"),
            r#"{"t":1700000000}"#
        );
    }

    #[test]
    fn test_to_json_time_field_text() {
        let record = record(&[("msg", "x")]);
        let json = record
            .to_json(Some(("ts", TimeValue::Text("2026-01-01".to_string()))))
            .expect("serialization should succeed");
        assert_eq!(
            String::from_utf8(json).expect("utf8"),
            r#"{"msg":"x","ts":"2026-01-01"}"#
        );
    }
}
