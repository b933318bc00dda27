use super::precondition::Precondition;
use crate::document::{Document, DocumentAddress};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::{FindOptions, StorageCollection};
use bson::doc;
use std::sync::Arc;

/// Validates the document a `Delete` would remove, without touching storage
/// (see [`super::create::plan`] for why this is split out). Returns the
/// document being deleted so batch execution can still build its event.
pub(crate) async fn plan(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    precondition: &Precondition,
) -> RepositoryResult<Document> {
    let stored = collection
        .find_one(doc! { "_id": &address.path }, FindOptions::default())
        .await?;
    let existing = match stored {
        Some(raw) => Document::from_storage_document(&raw)?,
        None => {
            return Err(RepositoryError::not_found(format!(
                "No document at {}",
                address.path
            )))
        }
    };
    precondition.check(Some(&existing))?;
    Ok(existing)
}

/// `Delete` (spec §4.D, §9 Open Question (b)): uniformly `NotFound` when the
/// document is absent, resolving the source's inconsistency between its
/// typed and path-based APIs.
pub async fn delete(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    precondition: &Precondition,
) -> RepositoryResult<()> {
    plan(collection, address, precondition).await?;
    collection.delete_one(doc! { "_id": &address.path }).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeDatabaseProvider;
    use crate::storage::DatabaseProvider;
    use crate::value::Value;
    use crate::write::create::create;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn address() -> DocumentAddress {
        DocumentAddress::new(
            "p".to_string(),
            "d".to_string(),
            "orders".to_string(),
            "o1".to_string(),
            "orders/o1".to_string(),
        )
    }

    #[tokio::test]
    async fn delete_removes_existing_document() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let collection = tenant_db.collection(&address().collection_id);
        create(
            &collection,
            &address(),
            BTreeMap::<String, Value>::new(),
            &Precondition::none(),
            Utc::now(),
        )
        .await
        .unwrap();

        delete(&collection, &address(), &Precondition::none())
            .await
            .unwrap();

        let err = delete(&collection, &address(), &Precondition::none())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::NotFound);
    }
}
