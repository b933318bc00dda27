//! Tenant catalog data model (spec §3, §4.B).

use chrono::{DateTime, Utc};
use rsb_derive::Builder;

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Organization {
    pub organization_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct Project {
    pub organization_id: String,
    pub project_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct DatabaseMeta {
    pub organization_id: String,
    pub project_id: String,
    pub database_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash)]
pub enum IndexState {
    Creating,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct IndexField {
    pub path: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Builder)]
pub struct IndexMeta {
    pub name: String,
    pub fields: Vec<IndexField>,
    pub state: IndexState,

    #[default = "None"]
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Builder)]
pub struct CollectionMeta {
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
    pub path: String,

    /// Empty for root collections, set for subcollections of a specific document.
    #[default = "String::new()"]
    pub parent_path: String,

    #[default = "0"]
    pub document_count: i64,

    #[default = "0"]
    pub storage_size: i64,

    #[default = "true"]
    pub is_active: bool,

    #[default = "Vec::new()"]
    pub indexes: Vec<IndexMeta>,

    #[default = "Utc::now()"]
    pub create_time: DateTime<Utc>,
}

impl CollectionMeta {
    pub fn is_subcollection(&self) -> bool {
        !self.parent_path.is_empty()
    }
}
