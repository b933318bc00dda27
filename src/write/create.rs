use super::precondition::Precondition;
use crate::document::{Document, DocumentAddress};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::{FindOptions, StorageCollection};
use crate::value::Value;
use bson::doc;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Validates and computes the document a `Create` would write, without
/// touching storage — split out from [`create`] so batch execution (spec
/// §4.D, §5) can validate every operation before committing any of them.
/// Takes the collection directly (rather than a `DatabaseProvider`) so a
/// caller inside a transaction can pass a session-bound handle and keep
/// every write attached to that session (spec §5).
pub(crate) async fn plan(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    fields: BTreeMap<String, Value>,
    precondition: &Precondition,
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let existing = collection
        .find_one(doc! { "_id": &address.path }, FindOptions::default())
        .await?;
    if existing.is_some() {
        return Err(RepositoryError::already_exists(format!(
            "Document already exists at {}",
            address.path
        )));
    }
    precondition.check(None)?;

    Ok(Document::new(
        address.project_id.clone(),
        address.database_id.clone(),
        address.collection_id.clone(),
        address.document_id.clone(),
        address.path.clone(),
        fields,
        now,
    ))
}

/// `Create` (spec §4.D): fails `AlreadyExists` if a document is already
/// present at `address.path`, else writes with
/// `CreateTime=UpdateTime=now, Version=1`.
pub async fn create(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    fields: BTreeMap<String, Value>,
    precondition: &Precondition,
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let document = plan(collection, address, fields, precondition, now).await?;
    collection.insert_one(document.to_storage_document()).await?;
    Ok(document)
}
