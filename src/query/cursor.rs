//! Cursor predicate generation (spec §4.C).

use super::models::{Direction, Order};
use crate::value::{resolve_storage_path, Value, ValueType};
use bson::Bson;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorKind {
    StartAt,
    StartAfter,
    EndAt,
    EndBefore,
}

/// Builds the cursor bound predicates the caller's filter is ANDed with
/// (spec §4.C: "the engine merges into a single and array, never nested").
/// Each of `startAt`/`startAfter`/`endAt`/`endBefore` contributes at most one
/// predicate; a multi-field bound is a lexicographic `$or`-of-`$and`s, not a
/// flat conjunction of independent per-field inequalities (spec §8 scenario
/// 3: order `price desc, name asc`, `startAfter=[500,"Alice"]` must match
/// `price<500 OR (price==500 AND name>"Alice")`, not `price<500 AND
/// name>"Alice"`).
#[allow(clippy::too_many_arguments)]
pub fn build_cursor_predicates(
    orders: &[Order],
    field_types: &[ValueType],
    start_at: &[Value],
    start_after: &[Value],
    end_at: &[Value],
    end_before: &[Value],
) -> Vec<bson::Document> {
    [
        cursor_predicate_for(orders, field_types, start_at, CursorKind::StartAt),
        cursor_predicate_for(orders, field_types, start_after, CursorKind::StartAfter),
        cursor_predicate_for(orders, field_types, end_at, CursorKind::EndAt),
        cursor_predicate_for(orders, field_types, end_before, CursorKind::EndBefore),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// The strict-inequality cursor kind on the same side (lower/upper bound) as
/// `kind` — used for every non-terminal field of an `$or` clause, since only
/// the clause's terminal field carries `kind`'s own inclusive/exclusive
/// boundary semantics.
fn strict_side(kind: CursorKind) -> CursorKind {
    match kind {
        CursorKind::StartAt | CursorKind::StartAfter => CursorKind::StartAfter,
        CursorKind::EndAt | CursorKind::EndBefore => CursorKind::EndBefore,
    }
}

fn cursor_predicate_for(
    orders: &[Order],
    field_types: &[ValueType],
    cursor_values: &[Value],
    kind: CursorKind,
) -> Option<bson::Document> {
    // Extra cursor values beyond the number of ordered fields are ignored.
    let len = cursor_values.len().min(orders.len()).min(field_types.len());
    if len == 0 {
        return None;
    }
    let strict = strict_side(kind);

    let mut or_clauses = Vec::with_capacity(len);
    for i in 0..len {
        let mut and_clauses = Vec::with_capacity(i + 1);
        for (order, field_type, value) in zip_prefix(&orders[..i], &field_types[..i], &cursor_values[..i]) {
            let path = resolve_storage_path(&order.field, field_type);
            and_clauses.push(bson::doc! { path: value_payload(value) });
        }

        let terminal_kind = if i == len - 1 { kind } else { strict };
        let path = resolve_storage_path(&orders[i].field, field_types[i]);
        let operator = operator_for(terminal_kind, orders[i].direction);
        let mut predicate_op = bson::Document::new();
        predicate_op.insert(operator, value_payload(&cursor_values[i]));
        and_clauses.push(bson::doc! { path: predicate_op });

        or_clauses.push(merge_clauses("$and", and_clauses));
    }
    Some(merge_clauses("$or", or_clauses))
}

/// Zips three same-length prefix slices together.
fn zip_prefix<'a>(
    orders: &'a [Order],
    field_types: &'a [ValueType],
    values: &'a [Value],
) -> impl Iterator<Item = (&'a Order, ValueType, &'a Value)> {
    orders
        .iter()
        .zip(field_types.iter().copied())
        .zip(values.iter())
        .map(|((order, field_type), value)| (order, field_type, value))
}

/// Collapses a list of clause documents with `op` (`$and`/`$or`), returning
/// the single clause unwrapped when there's only one.
fn merge_clauses(op: &str, clauses: Vec<bson::Document>) -> bson::Document {
    if clauses.len() == 1 {
        return clauses.into_iter().next().unwrap();
    }
    let mut out = bson::Document::new();
    out.insert(op, clauses.into_iter().map(bson::Bson::Document).collect::<Vec<_>>());
    out
}

fn operator_for(kind: CursorKind, direction: Direction) -> &'static str {
    use CursorKind::*;
    use Direction::*;
    match (kind, direction) {
        (StartAt, Ascending) => "$gte",
        (StartAt, Descending) => "$lte",
        (StartAfter, Ascending) => "$gt",
        (StartAfter, Descending) => "$lt",
        (EndAt, Ascending) => "$lte",
        (EndAt, Descending) => "$gte",
        (EndBefore, Ascending) => "$lt",
        (EndBefore, Descending) => "$gt",
    }
}

fn value_payload(value: &Value) -> Bson {
    match value.to_storage_bson() {
        Bson::Document(doc) => doc.iter().next().map(|(_, v)| v.clone()).unwrap_or(Bson::Null),
        other => other,
    }
}
