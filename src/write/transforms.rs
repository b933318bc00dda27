//! Atomic field transforms (spec §4.D): increment, array-union, array-remove,
//! server-timestamp. Each reads the current field value out of an
//! already-loaded [`Document`] and writes the transformed value back onto it
//! — the caller is responsible for the single read/write engine operation
//! this is embedded in.

use crate::document::{self, Document};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::value::{FieldPath, Value};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub enum FieldTransform {
    Increment { field: FieldPath, delta: Value },
    ArrayUnion { field: FieldPath, values: Vec<Value> },
    ArrayRemove { field: FieldPath, values: Vec<Value> },
    ServerTimestamp { field: FieldPath },
}

/// Applies every transform to `document.fields` in order, using `now` as the
/// single engine-current-time read for any `ServerTimestamp` transforms
/// (spec §11: one `Utc::now()` read per write operation).
pub fn apply_transforms(
    document: &mut Document,
    transforms: &[FieldTransform],
    now: DateTime<Utc>,
) -> RepositoryResult<()> {
    for transform in transforms {
        apply_one(document, transform, now)?;
    }
    Ok(())
}

fn apply_one(document: &mut Document, transform: &FieldTransform, now: DateTime<Utc>) -> RepositoryResult<()> {
    match transform {
        FieldTransform::Increment { field, delta } => {
            let current = document::get_field(&document.fields, field).cloned();
            let incremented = increment(current.as_ref(), delta)?;
            document::set_field(&mut document.fields, field, incremented);
        }
        FieldTransform::ArrayUnion { field, values } => {
            let mut array = current_array(&document.fields, field);
            for value in values {
                if !array.iter().any(|existing| wrapped_eq(existing, value)) {
                    array.push(value.clone());
                }
            }
            document::set_field(&mut document.fields, field, Value::Array(array));
        }
        FieldTransform::ArrayRemove { field, values } => {
            let array = current_array(&document.fields, field);
            let filtered = array
                .into_iter()
                .filter(|existing| !values.iter().any(|value| wrapped_eq(existing, value)))
                .collect();
            document::set_field(&mut document.fields, field, Value::Array(filtered));
        }
        FieldTransform::ServerTimestamp { field } => {
            document::set_field(&mut document.fields, field, Value::Timestamp(now));
        }
    }
    Ok(())
}

fn current_array(fields: &std::collections::BTreeMap<String, Value>, field: &FieldPath) -> Vec<Value> {
    match document::get_field(fields, field) {
        Some(Value::Array(values)) => values.clone(),
        _ => Vec::new(),
    }
}

fn increment(current: Option<&Value>, delta: &Value) -> RepositoryResult<Value> {
    let base = current.cloned().unwrap_or(Value::Int64(0));
    match (&base, delta) {
        (Value::Int64(a), Value::Int64(b)) => a
            .checked_add(*b)
            .map(Value::Int64)
            .ok_or_else(|| RepositoryError::invalid_argument("Integer increment overflow")),
        (Value::Int64(a), Value::Double(b)) => Ok(Value::Double(*a as f64 + b)),
        (Value::Double(a), Value::Int64(b)) => Ok(Value::Double(a + *b as f64)),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (_, Value::Int64(_) | Value::Double(_)) => Err(RepositoryError::invalid_argument(
            "Cannot increment a non-numeric field",
        )),
        _ => Err(RepositoryError::invalid_argument(
            "Increment delta must be numeric",
        )),
    }
}

/// Equality on the wrapped-value representation (spec §4.D), so that e.g.
/// `Int64(1)` and `Double(1.0)` are distinct elements.
fn wrapped_eq(a: &Value, b: &Value) -> bool {
    a.to_storage_bson() == b.to_storage_bson()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn document() -> Document {
        Document::new(
            "p".to_string(),
            "d".to_string(),
            "counters".to_string(),
            "c1".to_string(),
            "counters/c1".to_string(),
            BTreeMap::new(),
            Utc::now(),
        )
    }

    #[test]
    fn increment_on_absent_field_starts_from_zero() {
        let mut doc = document();
        apply_transforms(
            &mut doc,
            &[FieldTransform::Increment {
                field: FieldPath::parse("views").unwrap(),
                delta: Value::Int64(5),
            }],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(doc.fields.get("views"), Some(&Value::Int64(5)));
    }

    #[test]
    fn increment_overflow_is_rejected() {
        let mut fields = BTreeMap::new();
        fields.insert("views".to_string(), Value::Int64(i64::MAX));
        let mut doc = document();
        doc.fields = fields;
        let err = apply_transforms(
            &mut doc,
            &[FieldTransform::Increment {
                field: FieldPath::parse("views").unwrap(),
                delta: Value::Int64(1),
            }],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::InvalidArgument);
    }

    #[test]
    fn array_union_appends_only_new_elements() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "tags".to_string(),
            Value::Array(vec![Value::String("a".to_string())]),
        );
        let mut doc = document();
        doc.fields = fields;
        apply_transforms(
            &mut doc,
            &[FieldTransform::ArrayUnion {
                field: FieldPath::parse("tags").unwrap(),
                values: vec![Value::String("a".to_string()), Value::String("b".to_string())],
            }],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            doc.fields.get("tags"),
            Some(&Value::Array(vec![
                Value::String("a".to_string()),
                Value::String("b".to_string())
            ]))
        );
    }

    #[test]
    fn array_remove_drops_all_matching_elements() {
        let mut fields = BTreeMap::new();
        fields.insert(
            "tags".to_string(),
            Value::Array(vec![
                Value::String("a".to_string()),
                Value::String("b".to_string()),
                Value::String("a".to_string()),
            ]),
        );
        let mut doc = document();
        doc.fields = fields;
        apply_transforms(
            &mut doc,
            &[FieldTransform::ArrayRemove {
                field: FieldPath::parse("tags").unwrap(),
                values: vec![Value::String("a".to_string())],
            }],
            Utc::now(),
        )
        .unwrap();
        assert_eq!(
            doc.fields.get("tags"),
            Some(&Value::Array(vec![Value::String("b".to_string())]))
        );
    }

    #[test]
    fn server_timestamp_sets_now() {
        let mut doc = document();
        let now = Utc::now();
        apply_transforms(
            &mut doc,
            &[FieldTransform::ServerTimestamp {
                field: FieldPath::parse("updatedAt").unwrap(),
            }],
            now,
        )
        .unwrap();
        assert_eq!(doc.fields.get("updatedAt"), Some(&Value::Timestamp(now)));
    }
}
