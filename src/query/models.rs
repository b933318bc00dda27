//! Query data model (spec §4.C).

use crate::value::{FieldPath, Value};
use rsb_derive::Builder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    In,
    NotIn,
    ArrayContains,
    ArrayContainsAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    One(Value),
    Many(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare {
        field: FieldPath,
        op: CompareOp,
        value: FilterValue,
    },
    Composite {
        op: CompositeOp,
        filters: Vec<Filter>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: FieldPath,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct Query {
    pub collection_id: String,

    #[default = "Vec::new()"]
    pub filters: Vec<Filter>,

    #[default = "Vec::new()"]
    pub orders: Vec<Order>,

    #[default = "None"]
    pub limit: Option<i64>,

    #[default = "None"]
    pub offset: Option<u64>,

    #[default = "false"]
    pub limit_to_last: bool,

    #[default = "Vec::new()"]
    pub start_at: Vec<Value>,

    #[default = "Vec::new()"]
    pub start_after: Vec<Value>,

    #[default = "Vec::new()"]
    pub end_at: Vec<Value>,

    #[default = "Vec::new()"]
    pub end_before: Vec<Value>,

    #[default = "Vec::new()"]
    pub select_fields: Vec<String>,

    #[default = "false"]
    pub all_descendants: bool,
}

/// Capabilities the engine advertises (spec §4.C, end of section).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCapabilities {
    pub nested_fields: bool,
    pub array_contains: bool,
    pub array_contains_any: bool,
    pub composite: bool,
    pub order_by: bool,
    pub cursor_pagination: bool,
    pub offset_pagination: bool,
    pub projection: bool,
}

impl Default for QueryCapabilities {
    fn default() -> Self {
        QueryCapabilities {
            nested_fields: true,
            array_contains: true,
            array_contains_any: true,
            composite: true,
            order_by: true,
            cursor_pagination: true,
            offset_pagination: true,
            projection: true,
        }
    }
}
