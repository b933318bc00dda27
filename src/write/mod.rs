//! Write engine (spec component D): single-document writes, atomic field
//! transforms, batches, and transactions, all built on the same
//! read-current-document-then-write contract the storage layer exposes.

pub mod batch;
pub mod create;
pub mod delete;
pub mod precondition;
pub mod set;
pub mod transaction;
pub mod transforms;

pub use precondition::Precondition;
pub use transforms::FieldTransform;

use crate::document::{Document, DocumentAddress};
use crate::errors::RepositoryResult;
use crate::storage::{FindOptions, StorageCollection};
use bson::doc;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Outcome of a single write operation, enough for a caller to confirm when
/// it took effect (spec §4.D).
#[derive(Debug, Clone, Copy)]
pub struct WriteResult {
    pub update_time: DateTime<Utc>,
}

/// Reads the current document at `address`, applies `transforms` to it, and
/// returns the transformed document without writing it — the counterpart to
/// [`create::plan`]/[`update::plan`]/[`set::plan`]/[`delete::plan`] for the
/// fifth kind of write operation a batch or transaction can carry.
pub(crate) async fn plan_field_transforms(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    transforms: &[FieldTransform],
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let stored = collection
        .find_one(doc! { "_id": &address.path }, FindOptions::default())
        .await?;
    let is_new = stored.is_none();
    let mut document = match stored {
        Some(raw) => Document::from_storage_document(&raw)?,
        None => Document::new(
            address.project_id.clone(),
            address.database_id.clone(),
            address.collection_id.clone(),
            address.document_id.clone(),
            address.path.clone(),
            Default::default(),
            now,
        ),
    };
    transforms::apply_transforms(&mut document, transforms, now)?;
    // A freshly-constructed document is already at version 1 as of `now`;
    // only an existing document's write needs to advance its version.
    if !is_new {
        document.touch(now);
    }
    Ok(document)
}

/// `ApplyFieldTransforms` (spec §4.D): reads, transforms, and writes a
/// document in one step, outside of a batch or transaction.
pub async fn apply_field_transforms(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    transforms: &[FieldTransform],
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let document = plan_field_transforms(collection, address, transforms, now).await?;
    collection
        .replace_one(doc! { "_id": &address.path }, document.to_storage_document())
        .await?;
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeDatabaseProvider;
    use crate::storage::DatabaseProvider;
    use crate::value::{FieldPath, Value};

    fn address() -> DocumentAddress {
        DocumentAddress::new(
            "p".to_string(),
            "d".to_string(),
            "counters".to_string(),
            "c1".to_string(),
            "counters/c1".to_string(),
        )
    }

    #[tokio::test]
    async fn transform_against_a_nonexistent_document_lands_on_version_one() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let collection = tenant_db.collection(&address().collection_id);
        let document = apply_field_transforms(
            &collection,
            &address(),
            &[FieldTransform::Increment {
                field: FieldPath::parse("count").unwrap(),
                delta: Value::Int64(1),
            }],
            Utc::now(),
        )
        .await
        .unwrap();
        assert_eq!(document.version, 1);
    }

    #[tokio::test]
    async fn transform_against_an_existing_document_advances_version_by_one() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let collection = tenant_db.collection(&address().collection_id);
        let transform = [FieldTransform::Increment {
            field: FieldPath::parse("count").unwrap(),
            delta: Value::Int64(1),
        }];
        apply_field_transforms(&collection, &address(), &transform, Utc::now())
            .await
            .unwrap();
        let second = apply_field_transforms(&collection, &address(), &transform, Utc::now())
            .await
            .unwrap();
        assert_eq!(second.version, 2);
    }
}
