use super::precondition::Precondition;
use crate::document::{self, Document, DocumentAddress};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::{FindOptions, StorageCollection};
use crate::value::{FieldPath, Value};
use bson::doc;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Validates and computes the document an `Update` would write, without
/// touching storage (see [`super::create::plan`] for why this is split out).
pub(crate) async fn plan(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    data: BTreeMap<String, Value>,
    update_mask: Option<Vec<FieldPath>>,
    precondition: &Precondition,
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let stored = collection
        .find_one(doc! { "_id": &address.path }, FindOptions::default())
        .await?;
    let mut document = match stored {
        Some(raw) => Document::from_storage_document(&raw)?,
        None => {
            return Err(RepositoryError::not_found(format!(
                "No document at {}",
                address.path
            )))
        }
    };
    precondition.check(Some(&document))?;

    match update_mask {
        Some(mask) => {
            for path in &mask {
                match document::get_field(&data, path).cloned() {
                    Some(value) => document::set_field(&mut document.fields, path, value),
                    None => document::remove_field(&mut document.fields, path),
                }
            }
        }
        None => {
            for (key, value) in data {
                document.fields.insert(key, value);
            }
        }
    }

    document.touch(now);
    Ok(document)
}

/// `Update` (spec §4.D): `NotFound` if absent. With an `update_mask`, only
/// those field paths are set from `data` (missing-from-data paths are
/// deleted); without one, every top-level field supplied in `data` replaces
/// the corresponding stored field. Always increments `Version`.
pub async fn update(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    data: BTreeMap<String, Value>,
    update_mask: Option<Vec<FieldPath>>,
    precondition: &Precondition,
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let document = plan(collection, address, data, update_mask, precondition, now).await?;
    collection
        .replace_one(doc! { "_id": &address.path }, document.to_storage_document())
        .await?;
    Ok(document)
}
