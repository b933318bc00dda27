//! Index Operations (spec component E): logical index records live on the
//! tenant's [`CollectionMeta`] in the master catalog; physical indexes are
//! built on the tenant database's own collection. The two are kept in step
//! by the rollback rules below rather than by a shared transaction, since
//! one lives in the master database and the other in a tenant database.

use crate::catalog::collections;
use crate::catalog::models::{CollectionMeta, IndexField, IndexMeta, IndexState, SortOrder};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::DatabaseProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::*;

#[derive(Debug, Clone, Copy)]
pub struct IndexStatistics {
    pub document_count: u64,
    pub storage_size: i64,
    pub last_used: Option<DateTime<Utc>>,
}

fn sort_order_key(order: SortOrder) -> i32 {
    match order {
        SortOrder::Asc => 1,
        SortOrder::Desc => -1,
    }
}

/// Maps each compound-index field to the engine-level key spec §4.E names:
/// `fields.F.value`, direction ±1.
fn physical_keys(fields: &[IndexField]) -> bson::Document {
    let mut keys = bson::Document::new();
    for field in fields {
        keys.insert(format!("fields.{}.value", field.path), sort_order_key(field.order));
    }
    keys
}

async fn load_collection(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
) -> RepositoryResult<CollectionMeta> {
    collections::get_collection(master, project_id, database_id, collection_id).await
}

/// `Create` (spec §4.E): inserts the logical record as `creating`, builds the
/// physical index, then promotes the record to `ready`. A physical build
/// failure rolls back the logical record and surfaces `FailedPrecondition`.
pub async fn create_index(
    master: &Arc<dyn DatabaseProvider>,
    tenant_db: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
    name: String,
    fields: Vec<IndexField>,
) -> RepositoryResult<IndexMeta> {
    let span = span!(Level::DEBUG, "Index Create", collection_id);
    let _enter = span.enter();

    let mut meta = load_collection(master, project_id, database_id, collection_id).await?;
    if meta.indexes.iter().any(|i| i.name == name) {
        return Err(RepositoryError::already_exists(format!(
            "Index already exists: {name}"
        )));
    }

    meta.indexes
        .push(IndexMeta::new(name.clone(), fields.clone(), IndexState::Creating));
    collections::update_collection(master, &meta).await?;

    let keys = physical_keys(&fields);
    if let Err(build_err) = tenant_db.collection(collection_id).create_index(keys, &name).await {
        warn!("Physical index build failed for {name}: {build_err}");
        meta.indexes.retain(|i| i.name != name);
        collections::update_collection(master, &meta).await?;
        return Err(RepositoryError::failed_precondition(format!(
            "Index build failed for {name}: {build_err}"
        )));
    }

    let entry = meta
        .indexes
        .iter_mut()
        .find(|i| i.name == name)
        .expect("index just inserted above");
    entry.state = IndexState::Ready;
    let ready = entry.clone();
    collections::update_collection(master, &meta).await?;
    debug!("Index {name} ready on {collection_id}");
    Ok(ready)
}

/// `Delete` (spec §4.E): drops the physical index first; if that fails the
/// logical record is left untouched and the error surfaces.
pub async fn delete_index(
    master: &Arc<dyn DatabaseProvider>,
    tenant_db: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
    name: &str,
) -> RepositoryResult<()> {
    let mut meta = load_collection(master, project_id, database_id, collection_id).await?;
    if !meta.indexes.iter().any(|i| i.name == name) {
        return Err(RepositoryError::not_found(format!("Index not found: {name}")));
    }

    tenant_db.collection(collection_id).drop_index(name).await?;

    meta.indexes.retain(|i| i.name != name);
    collections::update_collection(master, &meta).await?;
    Ok(())
}

/// `Rebuild` (spec §4.E): marks the record `creating`, drops the existing
/// physical index (a failure there is only logged), then rebuilds it; a
/// failed rebuild leaves the record in `error`.
pub async fn rebuild_index(
    master: &Arc<dyn DatabaseProvider>,
    tenant_db: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
    name: &str,
) -> RepositoryResult<IndexMeta> {
    let mut meta = load_collection(master, project_id, database_id, collection_id).await?;
    let position = meta
        .indexes
        .iter()
        .position(|i| i.name == name)
        .ok_or_else(|| RepositoryError::not_found(format!("Index not found: {name}")))?;

    meta.indexes[position].state = IndexState::Creating;
    collections::update_collection(master, &meta).await?;

    if let Err(drop_err) = tenant_db.collection(collection_id).drop_index(name).await {
        warn!("Failed to drop index {name} before rebuild: {drop_err}");
    }

    let fields = meta.indexes[position].fields.clone();
    let keys = physical_keys(&fields);
    if let Err(build_err) = tenant_db.collection(collection_id).create_index(keys, name).await {
        meta.indexes[position].state = IndexState::Error;
        collections::update_collection(master, &meta).await?;
        return Err(RepositoryError::failed_precondition(format!(
            "Index rebuild failed for {name}: {build_err}"
        )));
    }

    meta.indexes[position].state = IndexState::Ready;
    let rebuilt = meta.indexes[position].clone();
    collections::update_collection(master, &meta).await?;
    Ok(rebuilt)
}

pub async fn get_index(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
    name: &str,
) -> RepositoryResult<IndexMeta> {
    let meta = load_collection(master, project_id, database_id, collection_id).await?;
    meta.indexes
        .into_iter()
        .find(|i| i.name == name)
        .ok_or_else(|| RepositoryError::not_found(format!("Index not found: {name}")))
}

pub async fn list_indexes(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
) -> RepositoryResult<Vec<IndexMeta>> {
    Ok(load_collection(master, project_id, database_id, collection_id)
        .await?
        .indexes)
}

/// `GetIndexStatistics` (spec §4.E): document count and storage size come
/// from the collection record; `lastUsed` from the logical index record.
/// Fails `NotFound` if the physical index is no longer present, even if the
/// logical record still is — the two can drift if a direct storage-engine
/// operation bypassed this module.
pub async fn get_index_statistics(
    master: &Arc<dyn DatabaseProvider>,
    tenant_db: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
    name: &str,
) -> RepositoryResult<IndexStatistics> {
    let meta = load_collection(master, project_id, database_id, collection_id).await?;
    let index = meta
        .indexes
        .iter()
        .find(|i| i.name == name)
        .ok_or_else(|| RepositoryError::not_found(format!("Index not found: {name}")))?;

    let specs = tenant_db.collection(collection_id).list_index_specifications().await?;
    if !specs.iter().any(|s| s.name == name) {
        return Err(RepositoryError::not_found(format!(
            "Physical index not found: {name}"
        )));
    }

    let document_count = tenant_db.collection(collection_id).count_documents(bson::doc! {}).await?;
    Ok(IndexStatistics {
        document_count,
        storage_size: meta.storage_size,
        last_used: index.last_used,
    })
}
