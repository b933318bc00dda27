use super::models::{CollectionMeta, IndexField, IndexMeta, IndexState, SortOrder};
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::DatabaseProvider;
use bson::{doc, Bson};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::*;

pub(crate) const COLLECTION: &str = "collections";

fn index_state_tag(state: IndexState) -> &'static str {
    match state {
        IndexState::Creating => "creating",
        IndexState::Ready => "ready",
        IndexState::Error => "error",
    }
}

fn index_state_from_tag(tag: &str) -> IndexState {
    match tag {
        "ready" => IndexState::Ready,
        "error" => IndexState::Error,
        _ => IndexState::Creating,
    }
}

fn sort_order_tag(order: SortOrder) -> i32 {
    match order {
        SortOrder::Asc => 1,
        SortOrder::Desc => -1,
    }
}

fn index_to_document(index: &IndexMeta) -> bson::Document {
    let fields: Vec<Bson> = index
        .fields
        .iter()
        .map(|f| {
            Bson::Document(doc! {
                "path": &f.path,
                "order": sort_order_tag(f.order),
            })
        })
        .collect();
    doc! {
        "name": &index.name,
        "fields": fields,
        "state": index_state_tag(index.state),
        "last_used": index.last_used.map(bson::DateTime::from_chrono),
    }
}

fn index_from_document(doc: &bson::Document) -> RepositoryResult<IndexMeta> {
    let err = || RepositoryError::internal("Malformed index record");
    let name = doc.get_str("name").map_err(|_| err())?.to_string();
    let state = index_state_from_tag(doc.get_str("state").unwrap_or("creating"));
    let fields = doc
        .get_array("fields")
        .map_err(|_| err())?
        .iter()
        .map(|f| {
            let f = f.as_document().ok_or_else(err)?;
            let order = if f.get_i32("order").unwrap_or(1) < 0 {
                SortOrder::Desc
            } else {
                SortOrder::Asc
            };
            Ok(IndexField::new(
                f.get_str("path").map_err(|_| err())?.to_string(),
                order,
            ))
        })
        .collect::<RepositoryResult<Vec<_>>>()?;
    let last_used = doc.get_datetime("last_used").ok().map(|dt| dt.to_chrono());
    Ok(IndexMeta::new(name, fields, state).opt_last_used(last_used))
}

fn to_document(meta: &CollectionMeta) -> bson::Document {
    doc! {
        "_id": format!("{}/{}/{}", meta.project_id, meta.database_id, meta.collection_id),
        "project_id": &meta.project_id,
        "database_id": &meta.database_id,
        "collection_id": &meta.collection_id,
        "path": &meta.path,
        "parent_path": &meta.parent_path,
        "document_count": meta.document_count,
        "storage_size": meta.storage_size,
        "is_active": meta.is_active,
        "indexes": meta.indexes.iter().map(index_to_document).map(Bson::Document).collect::<Vec<_>>(),
        "create_time": bson::DateTime::from_chrono(meta.create_time),
    }
}

fn from_document(doc: &bson::Document) -> RepositoryResult<CollectionMeta> {
    let err = || RepositoryError::internal("Malformed collection record");
    let indexes = doc
        .get_array("indexes")
        .ok()
        .map(|indexes| {
            indexes
                .iter()
                .map(|i| index_from_document(i.as_document().ok_or_else(err)?))
                .collect::<RepositoryResult<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();
    Ok(CollectionMeta::new(
        doc.get_str("project_id").map_err(|_| err())?.to_string(),
        doc.get_str("database_id").map_err(|_| err())?.to_string(),
        doc.get_str("collection_id").map_err(|_| err())?.to_string(),
        doc.get_str("path").map_err(|_| err())?.to_string(),
    )
    .opt_parent_path(doc.get_str("parent_path").ok().map(str::to_string))
    .opt_document_count(doc.get_i64("document_count").ok())
    .opt_storage_size(doc.get_i64("storage_size").ok())
    .opt_is_active(doc.get_bool("is_active").ok())
    .opt_indexes(Some(indexes)))
}

/// Persists a collection record whose fields (most often its `indexes` list)
/// have been mutated in place by the caller.
pub async fn update_collection(
    master: &Arc<dyn DatabaseProvider>,
    meta: &CollectionMeta,
) -> RepositoryResult<()> {
    let collection = master.collection(COLLECTION);
    let outcome = collection
        .replace_one(
            doc! {
                "project_id": &meta.project_id,
                "database_id": &meta.database_id,
                "collection_id": &meta.collection_id,
            },
            to_document(meta),
        )
        .await?;
    if outcome.matched == 0 {
        return Err(RepositoryError::not_found(format!(
            "Collection not found: {}",
            meta.collection_id
        )));
    }
    Ok(())
}

pub async fn create_collection(
    master: &Arc<dyn DatabaseProvider>,
    meta: CollectionMeta,
) -> RepositoryResult<CollectionMeta> {
    let collection = master.collection(COLLECTION);
    let existing = collection
        .count_documents(doc! {
            "project_id": &meta.project_id,
            "database_id": &meta.database_id,
            "collection_id": &meta.collection_id,
        })
        .await?;
    if existing > 0 {
        return Err(RepositoryError::already_exists(format!(
            "Collection already exists: {}",
            meta.collection_id
        )));
    }
    collection.insert_one(to_document(&meta)).await?;
    debug!("Created collection {}", meta.collection_id);
    Ok(meta)
}

pub async fn get_collection(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
) -> RepositoryResult<CollectionMeta> {
    let collection = master.collection(COLLECTION);
    let found = collection
        .find_one(
            doc! {
                "project_id": project_id,
                "database_id": database_id,
                "collection_id": collection_id,
            },
            Default::default(),
        )
        .await?;
    match found {
        Some(doc) => from_document(&doc),
        None => Err(RepositoryError::not_found(format!(
            "Collection not found: {collection_id}"
        ))),
    }
}

pub async fn delete_collection(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
    collection_id: &str,
    document_count: i64,
) -> RepositoryResult<()> {
    if document_count > 0 {
        return Err(RepositoryError::failed_precondition(format!(
            "Collection {collection_id} still has documents"
        )));
    }
    let collection = master.collection(COLLECTION);
    let outcome = collection
        .delete_one(doc! {
            "project_id": project_id,
            "database_id": database_id,
            "collection_id": collection_id,
        })
        .await?;
    if outcome.deleted == 0 {
        return Err(RepositoryError::not_found(format!(
            "Collection not found: {collection_id}"
        )));
    }
    Ok(())
}

pub async fn list_collections(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
) -> RepositoryResult<Vec<CollectionMeta>> {
    let collection = master.collection(COLLECTION);
    let docs = collection
        .find(
            doc! { "project_id": project_id, "database_id": database_id },
            Default::default(),
        )
        .await?;
    docs.iter().map(from_document).collect()
}

/// Returns the distinct subcollection IDs directly under `parent_document_path`
/// (spec §4.B): every tenant-database collection is aggregated for document
/// paths (`_id`) under the parent prefix, and each contributes the first
/// path segment past that prefix, deduplicated and sorted ascending. Reading
/// actual document paths (rather than master-catalog metadata records) means
/// a collection a caller has only ever written documents into is still
/// found, even without a separate `create_collection` call.
pub async fn list_subcollections(
    tenant_db: &Arc<dyn DatabaseProvider>,
    parent_document_path: &str,
) -> RepositoryResult<Vec<String>> {
    let prefix = format!("{}/", parent_document_path.trim_end_matches('/'));
    let pipeline = vec![
        doc! { "$match": { "_id": { "$regex": format!("^{}", regex_escape(&prefix)) } } },
        doc! { "$project": { "_id": 1 } },
    ];

    let mut subcollection_ids = BTreeSet::new();
    for name in tenant_db.list_collection_names().await? {
        let docs = tenant_db.collection(&name).aggregate(pipeline.clone()).await?;
        for doc in &docs {
            let path = match doc.get("_id") {
                Some(Bson::String(p)) => p,
                _ => continue,
            };
            if let Some(remainder) = path.strip_prefix(&prefix) {
                if let Some(first_segment) = remainder.split('/').next() {
                    if !first_segment.is_empty() {
                        subcollection_ids.insert(first_segment.to_string());
                    }
                }
            }
        }
    }
    Ok(subcollection_ids.into_iter().collect())
}

fn regex_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
