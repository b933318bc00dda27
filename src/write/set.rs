use super::precondition::Precondition;
use crate::document::{self, Document, DocumentAddress};
use crate::errors::RepositoryResult;
use crate::storage::{FindOptions, StorageCollection};
use crate::value::Value;
use bson::doc;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Validates and computes the document a `Set` would write, without
/// touching storage (see [`super::create::plan`] for why this is split out).
pub(crate) async fn plan(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    data: BTreeMap<String, Value>,
    merge: bool,
    precondition: &Precondition,
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let stored = collection
        .find_one(doc! { "_id": &address.path }, FindOptions::default())
        .await?;
    let existing = match &stored {
        Some(raw) => Some(Document::from_storage_document(raw)?),
        None => None,
    };
    precondition.check(existing.as_ref())?;

    let document = match existing {
        Some(mut current) if merge => {
            document::merge_fields(&mut current.fields, &data);
            current.touch(now);
            current
        }
        Some(mut current) => {
            current.fields = data;
            current.touch(now);
            current
        }
        None => Document::new(
            address.project_id.clone(),
            address.database_id.clone(),
            address.collection_id.clone(),
            address.document_id.clone(),
            address.path.clone(),
            data,
            now,
        ),
    };

    Ok(document)
}

/// `Set` (spec §4.D): upserts. With `merge=true` the supplied fields merge
/// into the existing field map (nested maps recursing); otherwise the entire
/// field map is replaced.
pub async fn set(
    collection: &Arc<dyn StorageCollection>,
    address: &DocumentAddress,
    data: BTreeMap<String, Value>,
    merge: bool,
    precondition: &Precondition,
    now: DateTime<Utc>,
) -> RepositoryResult<Document> {
    let document = plan(collection, address, data, merge, precondition, now).await?;
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
    async fn set_without_merge_replaces_entire_field_map() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let collection = tenant_db.collection(&address().collection_id);
        let mut first = BTreeMap::new();
        first.insert("status".to_string(), Value::String("pending".to_string()));
        first.insert("total".to_string(), Value::Int64(100));
        set(&collection, &address(), first, false, &Precondition::none(), Utc::now())
            .await
            .unwrap();

        let mut second = BTreeMap::new();
        second.insert("status".to_string(), Value::String("shipped".to_string()));
        let document = set(&collection, &address(), second, false, &Precondition::none(), Utc::now())
            .await
            .unwrap();
        assert_eq!(document.fields.get("total"), None);
        assert_eq!(
            document.fields.get("status"),
            Some(&Value::String("shipped".to_string()))
        );
    }

    #[tokio::test]
    async fn set_with_merge_keeps_untouched_fields() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let collection = tenant_db.collection(&address().collection_id);
        let mut first = BTreeMap::new();
        first.insert("status".to_string(), Value::String("pending".to_string()));
        first.insert("total".to_string(), Value::Int64(100));
        set(&collection, &address(), first, true, &Precondition::none(), Utc::now())
            .await
            .unwrap();

        let mut second = BTreeMap::new();
        second.insert("status".to_string(), Value::String("shipped".to_string()));
        let document = set(&collection, &address(), second, true, &Precondition::none(), Utc::now())
            .await
            .unwrap();
        assert_eq!(document.fields.get("total"), Some(&Value::Int64(100)));
        assert_eq!(
            document.fields.get("status"),
            Some(&Value::String("shipped".to_string()))
        );
    }

    #[tokio::test]
    async fn set_upserts_when_document_absent() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let collection = tenant_db.collection(&address().collection_id);
        let mut fields = BTreeMap::new();
        fields.insert("status".to_string(), Value::String("new".to_string()));
        let document = set(&collection, &address(), fields, true, &Precondition::none(), Utc::now())
            .await
            .unwrap();
        assert_eq!(document.version, 1);
    }
}
