use super::{FieldPath, ValueType};

/// Translates a field path and its inferred value type into the engine-level
/// storage path used to query a tagged value (spec §4.A).
///
/// For a simple path `F` of type `T`: `fields.F.{T-tag}`.
/// For a nested path `A.B...Z` of type `T`: `fields.A.value.B.value...Z.{T-tag}`
/// — every intermediate segment gets a `.value` node because maps persist as
/// tagged `{ mapValue: { value: { ... } } }` objects.
///
/// Array operators always address `arrayValue.values` regardless of this
/// function; callers append that suffix themselves (see `query::translate`).
pub fn resolve_storage_path(path: &FieldPath, value_type: ValueType) -> String {
    let segments = path.segments();
    let mut out = String::from("fields.");
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(segment);
        if i + 1 < segments.len() {
            out.push_str(".value.");
        }
    }
    out.push('.');
    out.push_str(value_type.tag());
    out
}
