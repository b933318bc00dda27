//! Document model and its on-storage encoding (spec §3, §6).

use crate::errors::{RepositoryError, RepositoryResult};
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Identifies a document without carrying its fields or timestamps — the
/// parameter shape every write-engine operation addresses its target by
/// (spec §4.D: "all parameterized by `(project, database, collection,
/// documentID)` or by `path`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAddress {
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
    pub document_id: String,
    pub path: String,
}

impl DocumentAddress {
    pub fn new(
        project_id: String,
        database_id: String,
        collection_id: String,
        document_id: String,
        path: String,
    ) -> Self {
        DocumentAddress {
            project_id,
            database_id,
            collection_id,
            document_id,
            path,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub project_id: String,
    pub database_id: String,
    pub collection_id: String,
    pub document_id: String,
    pub path: String,
    pub fields: BTreeMap<String, Value>,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    pub version: u64,
    pub exists: bool,
}

impl Document {
    pub fn new(
        project_id: String,
        database_id: String,
        collection_id: String,
        document_id: String,
        path: String,
        fields: BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> Self {
        Document {
            project_id,
            database_id,
            collection_id,
            document_id,
            path,
            fields,
            create_time: now,
            update_time: now,
            version: 1,
            exists: true,
        }
    }

    /// Encodes this document into the on-storage shape (spec §6).
    pub fn to_storage_document(&self) -> bson::Document {
        let mut fields_doc = bson::Document::new();
        for (name, value) in &self.fields {
            fields_doc.insert(name, value.to_storage_bson());
        }

        let mut doc = bson::Document::new();
        doc.insert("_id", &self.path);
        doc.insert("project_id", &self.project_id);
        doc.insert("database_id", &self.database_id);
        doc.insert("collection_id", &self.collection_id);
        doc.insert("document_id", &self.document_id);
        doc.insert("path", &self.path);
        doc.insert("fields", fields_doc);
        doc.insert("create_time", bson::DateTime::from_chrono(self.create_time));
        doc.insert("update_time", bson::DateTime::from_chrono(self.update_time));
        doc.insert("version", self.version as i64);
        doc.insert("exists", self.exists);
        doc
    }

    pub fn from_storage_document(doc: &bson::Document) -> RepositoryResult<Document> {
        let err = || RepositoryError::internal("Malformed stored document");

        let fields_doc = doc.get_document("fields").map_err(|_| err())?;
        let mut fields = BTreeMap::new();
        for (name, value) in fields_doc {
            fields.insert(name.clone(), Value::from_storage_bson(value)?);
        }

        Ok(Document {
            project_id: doc.get_str("project_id").map_err(|_| err())?.to_string(),
            database_id: doc.get_str("database_id").map_err(|_| err())?.to_string(),
            collection_id: doc.get_str("collection_id").map_err(|_| err())?.to_string(),
            document_id: doc.get_str("document_id").map_err(|_| err())?.to_string(),
            path: doc.get_str("path").map_err(|_| err())?.to_string(),
            fields,
            create_time: doc
                .get_datetime("create_time")
                .map_err(|_| err())?
                .to_chrono(),
            update_time: doc
                .get_datetime("update_time")
                .map_err(|_| err())?
                .to_chrono(),
            version: doc.get_i64("version").map_err(|_| err())? as u64,
            exists: doc.get_bool("exists").unwrap_or(true),
        })
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.update_time = now;
        self.version += 1;
    }
}

/// Reads a (possibly dotted) field path out of a field map, descending
/// through nested [`Value::Map`]s (spec §4.D: "dotted paths allowed; nested
/// maps merged").
pub fn get_field<'a>(fields: &'a BTreeMap<String, Value>, path: &crate::value::FieldPath) -> Option<&'a Value> {
    let segments = path.segments();
    let mut current = fields.get(&segments[0])?;
    for segment in &segments[1..] {
        match current {
            Value::Map(nested) => current = nested.get(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Writes `value` at a (possibly dotted) field path, creating intermediate
/// maps as needed.
pub fn set_field(fields: &mut BTreeMap<String, Value>, path: &crate::value::FieldPath, value: Value) {
    set_field_segments(fields, path.segments(), value);
}

fn set_field_segments(fields: &mut BTreeMap<String, Value>, segments: &[String], value: Value) {
    if segments.len() == 1 {
        fields.insert(segments[0].clone(), value);
        return;
    }
    let entry = fields
        .entry(segments[0].clone())
        .or_insert_with(|| Value::Map(BTreeMap::new()));
    if !matches!(entry, Value::Map(_)) {
        *entry = Value::Map(BTreeMap::new());
    }
    if let Value::Map(nested) = entry {
        set_field_segments(nested, &segments[1..], value);
    }
}

/// Removes the value at a (possibly dotted) field path, if present.
pub fn remove_field(fields: &mut BTreeMap<String, Value>, path: &crate::value::FieldPath) {
    remove_field_segments(fields, path.segments());
}

fn remove_field_segments(fields: &mut BTreeMap<String, Value>, segments: &[String]) {
    if segments.len() == 1 {
        fields.remove(&segments[0]);
        return;
    }
    if let Some(Value::Map(nested)) = fields.get_mut(&segments[0]) {
        remove_field_segments(nested, &segments[1..]);
    }
}

/// Merges `incoming` into `fields` at the field level: nested maps merge
/// recursively, every other value type replaces wholesale (spec §4.D `Set`
/// with `merge=true`).
pub fn merge_fields(fields: &mut BTreeMap<String, Value>, incoming: &BTreeMap<String, Value>) {
    for (key, value) in incoming {
        match (fields.get_mut(key), value) {
            (Some(Value::Map(existing)), Value::Map(incoming_nested)) => {
                merge_fields(existing, incoming_nested);
            }
            _ => {
                fields.insert(key.clone(), value.clone());
            }
        }
    }
}
