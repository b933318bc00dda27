//! Filter → storage-predicate translation (spec §4.C).

use super::models::{CompareOp, CompositeOp, Filter, FilterValue};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::value::{resolve_storage_path, FieldPath, Value, ValueType};
use bson::{doc, Bson};

pub const MAX_FILTER_COUNT: usize = 100;
pub const MAX_ORDER_COUNT: usize = 32;

/// Validates a query's filters and orders against spec §4.C's limits before
/// any translation is attempted.
pub fn validate_filters(filters: &[Filter], order_count: usize) -> RepositoryResult<()> {
    let total = count_filters(filters);
    if total > MAX_FILTER_COUNT {
        return Err(RepositoryError::invalid_argument(format!(
            "Filter count {total} exceeds the maximum of {MAX_FILTER_COUNT}"
        )));
    }
    if order_count > MAX_ORDER_COUNT {
        return Err(RepositoryError::invalid_argument(format!(
            "Order count {order_count} exceeds the maximum of {MAX_ORDER_COUNT}"
        )));
    }
    for filter in filters {
        validate_filter_shape(filter)?;
    }
    Ok(())
}

fn count_filters(filters: &[Filter]) -> usize {
    filters
        .iter()
        .map(|f| match f {
            Filter::Compare { .. } => 1,
            Filter::Composite { filters, .. } => count_filters(filters),
        })
        .sum()
}

fn validate_filter_shape(filter: &Filter) -> RepositoryResult<()> {
    match filter {
        Filter::Compare { field, op, .. } => {
            if matches!(op, CompareOp::ArrayContains | CompareOp::ArrayContainsAny)
                && !field.is_simple()
            {
                return Err(RepositoryError::invalid_argument(
                    "Array operators do not support nested field paths",
                ));
            }
            Ok(())
        }
        Filter::Composite { filters, .. } => {
            for nested in filters {
                validate_filter_shape(nested)?;
            }
            Ok(())
        }
    }
}

/// Translates a (possibly composite) filter tree into a storage-engine filter
/// document. The value type of each comparand is resolved directly from its
/// runtime [`Value`] variant (spec §4.A) — callers needing the four-step
/// cache/peer/sample priority for value-less predicates (order-by, cursors)
/// use [`super::type_inference_cache::FieldTypeCache`] instead.
pub fn translate_filter(filter: &Filter) -> bson::Document {
    match filter {
        Filter::Compare { field, op, value } => translate_compare(field, *op, value),
        Filter::Composite { op, filters } => translate_composite(*op, filters),
    }
}

fn translate_composite(op: CompositeOp, filters: &[Filter]) -> bson::Document {
    if filters.is_empty() {
        return doc! {};
    }
    let translated: Vec<Bson> = filters
        .iter()
        .map(|f| Bson::Document(translate_filter(f)))
        .collect();
    if translated.len() == 1 {
        return translated[0].as_document().cloned().unwrap_or_default();
    }
    let key = match op {
        CompositeOp::And => "$and",
        CompositeOp::Or => "$or",
    };
    doc! { key: translated }
}

fn translate_compare(field: &FieldPath, op: CompareOp, value: &FilterValue) -> bson::Document {
    // Built with explicit `Document::insert` rather than `doc! { path: .. }`
    // throughout, since `path` here is a runtime `String` and the `doc!`
    // macro's key position only accepts literals.
    match op {
        CompareOp::ArrayContains => {
            let element = single_value(value);
            let path = format!("fields.{}.arrayValue.values", field.raw());
            let mut predicate = bson::Document::new();
            predicate.insert("$elemMatch", wrapped_equality(element));
            let mut out = bson::Document::new();
            out.insert(path, predicate);
            out
        }
        CompareOp::ArrayContainsAny => {
            let elements = many_values(value);
            let path = format!("fields.{}.arrayValue.values", field.raw());
            let wrapped: Vec<Bson> = elements.iter().map(wrapped_bson).collect();
            let mut inner = bson::Document::new();
            inner.insert("$in", wrapped);
            let mut predicate = bson::Document::new();
            predicate.insert("$elemMatch", inner);
            let mut out = bson::Document::new();
            out.insert(path, predicate);
            out
        }
        CompareOp::In | CompareOp::NotIn => {
            let elements = many_values(value);
            let ty = elements
                .first()
                .map(|v| v.value_type())
                .unwrap_or(ValueType::String);
            let path = resolve_storage_path(field, ty);
            let wrapped: Vec<Bson> = elements.iter().map(value_payload_bson).collect();
            let operator = if op == CompareOp::In { "$in" } else { "$nin" };
            let mut predicate = bson::Document::new();
            predicate.insert(operator, wrapped);
            let mut out = bson::Document::new();
            out.insert(path, predicate);
            out
        }
        CompareOp::Equal => {
            // Bare value equality, matching spec §8's translated-predicate
            // examples directly rather than an explicit `$eq` wrapper.
            let v = single_value(value);
            let path = resolve_storage_path(field, v.value_type());
            let mut out = bson::Document::new();
            out.insert(path, value_payload_bson(v));
            out
        }
        _ => {
            let v = single_value(value);
            let path = resolve_storage_path(field, v.value_type());
            let operator = match op {
                CompareOp::NotEqual => "$ne",
                CompareOp::LessThan => "$lt",
                CompareOp::LessThanOrEqual => "$lte",
                CompareOp::GreaterThan => "$gt",
                CompareOp::GreaterThanOrEqual => "$gte",
                _ => unreachable!("handled above"),
            };
            let mut predicate = bson::Document::new();
            predicate.insert(operator, value_payload_bson(v));
            let mut out = bson::Document::new();
            out.insert(path, predicate);
            out
        }
    }
}

fn single_value(value: &FilterValue) -> &Value {
    match value {
        FilterValue::One(v) => v,
        FilterValue::Many(values) => values.first().expect("non-empty filter value"),
    }
}

fn many_values(value: &FilterValue) -> &[Value] {
    match value {
        FilterValue::One(v) => std::slice::from_ref(v),
        FilterValue::Many(values) => values,
    }
}

fn wrapped_equality(value: &Value) -> bson::Document {
    value
        .to_storage_bson()
        .as_document()
        .cloned()
        .unwrap_or_default()
}

fn wrapped_bson(value: &Value) -> Bson {
    Bson::Document(wrapped_equality(value))
}

/// The payload half of a tagged BSON value — i.e. everything past the type
/// tag — which is what a predicate at a type-qualified storage path compares
/// against.
fn value_payload_bson(value: &Value) -> Bson {
    let tagged = value.to_storage_bson();
    match tagged {
        Bson::Document(doc) => doc.iter().next().map(|(_, v)| v.clone()).unwrap_or(Bson::Null),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldPath;

    #[test]
    fn array_contains_uses_elem_match_on_wrapped_value() {
        let filter = Filter::Compare {
            field: FieldPath::parse("tags").unwrap(),
            op: CompareOp::ArrayContains,
            value: FilterValue::One(Value::String("a".to_string())),
        };
        let translated = translate_filter(&filter);
        assert_eq!(
            translated,
            doc! { "fields.tags.arrayValue.values": { "$elemMatch": { "stringValue": "a" } } }
        );
    }

    #[test]
    fn composite_and_combines_two_leaves() {
        let filter = Filter::Composite {
            op: CompositeOp::And,
            filters: vec![
                Filter::Compare {
                    field: FieldPath::parse("category").unwrap(),
                    op: CompareOp::Equal,
                    value: FilterValue::One(Value::String("Electronics".to_string())),
                },
                Filter::Compare {
                    field: FieldPath::parse("available").unwrap(),
                    op: CompareOp::Equal,
                    value: FilterValue::One(Value::Bool(true)),
                },
            ],
        };
        let translated = translate_filter(&filter);
        assert_eq!(
            translated,
            doc! {
                "$and": [
                    { "fields.category.stringValue": "Electronics" },
                    { "fields.available.booleanValue": true },
                ]
            }
        );
    }

    #[test]
    fn array_operator_on_nested_path_is_rejected() {
        let filter = Filter::Compare {
            field: FieldPath::parse("address.tags").unwrap(),
            op: CompareOp::ArrayContains,
            value: FilterValue::One(Value::String("a".to_string())),
        };
        assert!(validate_filter_shape(&filter).is_err());
    }

    #[test]
    fn empty_composite_is_identity() {
        let filter = Filter::Composite {
            op: CompositeOp::And,
            filters: vec![],
        };
        assert_eq!(translate_filter(&filter), doc! {});
    }
}
