//! Value Model & Field-Path Resolver (spec component A).
//!
//! A [`Value`] is the tagged union every document field, filter operand, and
//! transform payload is expressed in. Its wire shape (§3) attaches the type
//! tag as the key of a one-key object; its storage shape does the same but as
//! a BSON document, since the engine addresses values by type-qualified path
//! (§4.A) rather than by native BSON type.

mod field_path;
mod type_inference;
mod wire;

pub use field_path::FieldPath;
pub use type_inference::determine_value_type;
pub use wire::resolve_storage_path;

use crate::errors::{RepositoryError, RepositoryResult};
use base64::Engine;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ValueType {
    Null,
    Bool,
    Int64,
    Double,
    String,
    Bytes,
    Timestamp,
    Reference,
    GeoPoint,
    Array,
    Map,
}

impl ValueType {
    /// The terminal segment of a storage path for this type (spec §4.A).
    pub fn tag(&self) -> &'static str {
        match self {
            ValueType::Null => "nullValue",
            ValueType::Bool => "booleanValue",
            ValueType::Int64 => "integerValue",
            ValueType::Double => "doubleValue",
            ValueType::String => "stringValue",
            ValueType::Bytes => "bytesValue",
            ValueType::Timestamp => "timestampValue",
            ValueType::Reference => "referenceValue",
            ValueType::GeoPoint => "geoPointValue",
            ValueType::Array => "arrayValue",
            ValueType::Map => "mapValue",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Reference(String),
    GeoPoint(GeoPoint),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Bool(_) => ValueType::Bool,
            Value::Int64(_) => ValueType::Int64,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Bytes(_) => ValueType::Bytes,
            Value::Timestamp(_) => ValueType::Timestamp,
            Value::Reference(_) => ValueType::Reference,
            Value::GeoPoint(_) => ValueType::GeoPoint,
            Value::Array(_) => ValueType::Array,
            Value::Map(_) => ValueType::Map,
        }
    }

    /// Attaches the type tag as the key of a one-key JSON object (spec §3).
    pub fn wrap_for_wire(&self) -> serde_json::Value {
        use serde_json::json;
        let tag = self.value_type().tag();
        let payload = match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Int64(i) => json!(i),
            Value::Double(d) => json!(d),
            Value::String(s) => json!(s),
            Value::Bytes(b) => json!(base64::engine::general_purpose::STANDARD.encode(b)),
            Value::Timestamp(t) => json!(t.to_rfc3339()),
            Value::Reference(r) => json!(r),
            Value::GeoPoint(g) => json!({"latitude": g.latitude, "longitude": g.longitude}),
            Value::Array(values) => {
                json!({"values": values.iter().map(Value::wrap_for_wire).collect::<Vec<_>>()})
            }
            Value::Map(fields) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in fields {
                    obj.insert(k.clone(), v.wrap_for_wire());
                }
                json!({"fields": obj})
            }
        };
        json!({ tag: payload })
    }

    /// Encodes this value as the tagged BSON document stored on-disk (spec §6).
    pub fn to_storage_bson(&self) -> bson::Bson {
        let tag = self.value_type().tag();
        let mut doc = bson::Document::new();
        match self {
            Value::Null => {
                doc.insert(tag, bson::Bson::Null);
            }
            Value::Bool(b) => {
                doc.insert(tag, bson::Bson::Boolean(*b));
            }
            Value::Int64(i) => {
                doc.insert(tag, bson::Bson::Int64(*i));
            }
            Value::Double(d) => {
                doc.insert(tag, bson::Bson::Double(*d));
            }
            Value::String(s) => {
                doc.insert(tag, bson::Bson::String(s.clone()));
            }
            Value::Bytes(b) => {
                doc.insert(
                    tag,
                    bson::Bson::Binary(bson::Binary {
                        subtype: bson::spec::BinarySubtype::Generic,
                        bytes: b.clone(),
                    }),
                );
            }
            Value::Timestamp(t) => {
                doc.insert(tag, bson::Bson::DateTime(bson::DateTime::from_chrono(*t)));
            }
            Value::Reference(r) => {
                doc.insert(tag, bson::Bson::String(r.clone()));
            }
            Value::GeoPoint(g) => {
                let mut gp = bson::Document::new();
                gp.insert("latitude", g.latitude);
                gp.insert("longitude", g.longitude);
                doc.insert(tag, bson::Bson::Document(gp));
            }
            Value::Array(values) => {
                let mut inner = bson::Document::new();
                inner.insert(
                    "values",
                    bson::Bson::Array(values.iter().map(Value::to_storage_bson).collect()),
                );
                doc.insert(tag, bson::Bson::Document(inner));
            }
            Value::Map(fields) => {
                let mut inner = bson::Document::new();
                let mut value_doc = bson::Document::new();
                for (k, v) in fields {
                    value_doc.insert(k, v.to_storage_bson());
                }
                inner.insert("value", bson::Bson::Document(value_doc));
                doc.insert(tag, bson::Bson::Document(inner));
            }
        }
        bson::Bson::Document(doc)
    }

    /// Decodes a tagged BSON document back into a [`Value`].
    pub fn from_storage_bson(bson_value: &bson::Bson) -> RepositoryResult<Value> {
        let doc = bson_value
            .as_document()
            .ok_or_else(|| RepositoryError::internal("Expected a tagged value document"))?;
        let (tag, payload) = doc
            .iter()
            .next()
            .ok_or_else(|| RepositoryError::internal("Tagged value document had no key"))?;
        Ok(match tag.as_str() {
            "nullValue" => Value::Null,
            "booleanValue" => Value::Bool(payload.as_bool().unwrap_or(false)),
            "integerValue" => Value::Int64(
                payload
                    .as_i64()
                    .or_else(|| payload.as_i32().map(i64::from))
                    .unwrap_or(0),
            ),
            "doubleValue" => Value::Double(payload.as_f64().unwrap_or(0.0)),
            "stringValue" => Value::String(payload.as_str().unwrap_or_default().to_string()),
            "bytesValue" => match payload {
                bson::Bson::Binary(b) => Value::Bytes(b.bytes.clone()),
                _ => Value::Bytes(Vec::new()),
            },
            "timestampValue" => match payload {
                bson::Bson::DateTime(dt) => Value::Timestamp(dt.to_chrono()),
                _ => return Err(RepositoryError::internal("Malformed timestampValue")),
            },
            "referenceValue" => Value::Reference(payload.as_str().unwrap_or_default().to_string()),
            "geoPointValue" => {
                let gp = payload
                    .as_document()
                    .ok_or_else(|| RepositoryError::internal("Malformed geoPointValue"))?;
                Value::GeoPoint(GeoPoint {
                    latitude: gp.get_f64("latitude").unwrap_or(0.0),
                    longitude: gp.get_f64("longitude").unwrap_or(0.0),
                })
            }
            "arrayValue" => {
                let inner = payload
                    .as_document()
                    .ok_or_else(|| RepositoryError::internal("Malformed arrayValue"))?;
                let values = inner
                    .get_array("values")
                    .map(|a| a.as_slice())
                    .unwrap_or(&[]);
                let mut out = Vec::with_capacity(values.len());
                for v in values {
                    out.push(Value::from_storage_bson(v)?);
                }
                Value::Array(out)
            }
            "mapValue" => {
                let inner = payload
                    .as_document()
                    .ok_or_else(|| RepositoryError::internal("Malformed mapValue"))?;
                let value_doc = inner.get_document("value").map_err(|_| {
                    RepositoryError::internal("Malformed mapValue: missing value node")
                })?;
                let mut fields = BTreeMap::new();
                for (k, v) in value_doc {
                    fields.insert(k.clone(), Value::from_storage_bson(v)?);
                }
                Value::Map(fields)
            }
            other => {
                return Err(RepositoryError::internal(format!(
                    "Unknown value tag: {other}"
                )))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_variant_through_storage_bson() {
        let mut fields = BTreeMap::new();
        fields.insert("nested".to_string(), Value::Int64(7));
        let values = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int64(-42),
            Value::Double(1.5),
            Value::String("hello".to_string()),
            Value::Bytes(vec![1, 2, 3]),
            Value::Timestamp(Utc::now()),
            Value::Reference("projects/p/databases/d/documents/c/doc".to_string()),
            Value::GeoPoint(GeoPoint {
                latitude: 1.0,
                longitude: 2.0,
            }),
            Value::Array(vec![Value::Int64(1), Value::String("a".to_string())]),
            Value::Map(fields),
        ];
        for v in values {
            let bson = v.to_storage_bson();
            let decoded = Value::from_storage_bson(&bson).unwrap();
            assert_eq!(v, decoded);
        }
    }

    #[test]
    fn wrap_for_wire_uses_type_tag_as_key() {
        let wrapped = Value::String("x".to_string()).wrap_for_wire();
        assert_eq!(wrapped, serde_json::json!({"stringValue": "x"}));
    }

    #[test]
    fn wrap_for_wire_base64_encodes_bytes() {
        let wrapped = Value::Bytes(vec![1, 2, 3]).wrap_for_wire();
        assert_eq!(wrapped, serde_json::json!({"bytesValue": "AQID"}));
    }
}
