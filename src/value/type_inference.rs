use super::{GeoPoint, Value, ValueType};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// A caller-supplied value whose Firestore-compatible type has not yet been
/// pinned down — the input to [`determine_value_type`] (spec §4.A).
///
/// Distinct `Bytes` and `String` variants exist because the priority order in
/// §4.A assumes a dynamically-typed source language that can tell the two
/// apart at the value level; JSON alone cannot, so callers that need byte
/// strings must construct `RawInput::Bytes` explicitly rather than going
/// through the `serde_json::Value` conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum RawInput {
    Null,
    Bool(bool),
    Int64(i64),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Map(BTreeMap<String, RawInput>),
    Array(Vec<RawInput>),
}

impl From<serde_json::Value> for RawInput {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => RawInput::Null,
            serde_json::Value::Bool(b) => RawInput::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    RawInput::Int64(i)
                } else {
                    RawInput::Double(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => RawInput::String(s),
            serde_json::Value::Array(a) => {
                RawInput::Array(a.into_iter().map(RawInput::from).collect())
            }
            serde_json::Value::Object(o) => RawInput::Map(
                o.into_iter()
                    .map(|(k, v)| (k, RawInput::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Infers the Firestore-compatible [`ValueType`] of a raw input, following the
/// priority order in spec §4.A: exact runtime type first, then string-timestamp
/// detection, falling back to `String`.
pub fn determine_value_type(raw: &RawInput) -> ValueType {
    match raw {
        RawInput::Null => ValueType::Null,
        RawInput::Bool(_) => ValueType::Bool,
        RawInput::Int64(_) => ValueType::Int64,
        RawInput::Double(_) => ValueType::Double,
        RawInput::Bytes(_) => ValueType::Bytes,
        RawInput::Map(_) => ValueType::Map,
        RawInput::Array(_) => ValueType::Array,
        RawInput::String(s) => {
            if looks_like_timestamp(s) {
                ValueType::Timestamp
            } else {
                ValueType::String
            }
        }
    }
}

/// Coerces a raw input into a fully typed [`Value`], using the same priority
/// order as [`determine_value_type`] so the two never disagree.
pub fn coerce_to_value(raw: &RawInput) -> Value {
    match raw {
        RawInput::Null => Value::Null,
        RawInput::Bool(b) => Value::Bool(*b),
        RawInput::Int64(i) => Value::Int64(*i),
        RawInput::Double(d) => Value::Double(*d),
        RawInput::Bytes(b) => Value::Bytes(b.clone()),
        RawInput::Map(m) => {
            let mut fields = BTreeMap::new();
            for (k, v) in m {
                fields.insert(k.clone(), coerce_to_value(v));
            }
            Value::Map(fields)
        }
        RawInput::Array(a) => Value::Array(a.iter().map(coerce_to_value).collect()),
        RawInput::String(s) => match parse_timestamp(s) {
            Some(ts) => Value::Timestamp(ts),
            None => Value::String(s.clone()),
        },
    }
}

/// Cheap structural check before attempting a full parse: an ISO-8601 /
/// RFC3339 instant starts with `YYYY-MM-DD` followed by a `T` or space.
fn looks_like_timestamp(s: &str) -> bool {
    parse_timestamp(s).is_some()
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let bytes = s.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    let looks_like_date = bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2].is_ascii_digit()
        && bytes[3].is_ascii_digit()
        && bytes[4] == b'-'
        && bytes[5].is_ascii_digit()
        && bytes[6].is_ascii_digit()
        && bytes[7] == b'-'
        && bytes[8].is_ascii_digit()
        && bytes[9].is_ascii_digit();
    if !looks_like_date {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Decodes a `GeoPoint`-shaped raw map with `latitude`/`longitude` keys, used
/// by callers that need to hand geo points through the untyped path.
pub fn geo_point_from_map(m: &BTreeMap<String, RawInput>) -> Option<GeoPoint> {
    let lat = match m.get("latitude")? {
        RawInput::Double(d) => *d,
        RawInput::Int64(i) => *i as f64,
        _ => return None,
    };
    let lng = match m.get("longitude")? {
        RawInput::Double(d) => *d,
        RawInput::Int64(i) => *i as f64,
        _ => return None,
    };
    Some(GeoPoint {
        latitude: lat,
        longitude: lng,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_prefers_runtime_type_over_string_detection() {
        assert_eq!(determine_value_type(&RawInput::Bool(true)), ValueType::Bool);
        assert_eq!(determine_value_type(&RawInput::Int64(7)), ValueType::Int64);
        assert_eq!(
            determine_value_type(&RawInput::Double(1.5)),
            ValueType::Double
        );
        assert_eq!(
            determine_value_type(&RawInput::Bytes(vec![1])),
            ValueType::Bytes
        );
    }

    #[test]
    fn detects_rfc3339_timestamps_in_strings() {
        assert_eq!(
            determine_value_type(&RawInput::String("2024-01-15T10:00:00Z".to_string())),
            ValueType::Timestamp
        );
    }

    #[test]
    fn falls_back_to_string_for_everything_else() {
        assert_eq!(
            determine_value_type(&RawInput::String("Electronics".to_string())),
            ValueType::String
        );
    }
}
