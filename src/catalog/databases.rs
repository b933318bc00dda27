use super::models::DatabaseMeta;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::DatabaseProvider;
use bson::doc;
use std::sync::Arc;
use tracing::*;

pub(crate) const COLLECTION: &str = "databases";

fn to_document(database: &DatabaseMeta) -> bson::Document {
    doc! {
        "_id": format!("{}/{}/{}", database.organization_id, database.project_id, database.database_id),
        "organization_id": &database.organization_id,
        "project_id": &database.project_id,
        "database_id": &database.database_id,
    }
}

fn from_document(doc: &bson::Document) -> RepositoryResult<DatabaseMeta> {
    Ok(DatabaseMeta::new(
        doc.get_str("organization_id")
            .map_err(|_| RepositoryError::internal("Malformed database record"))?
            .to_string(),
        doc.get_str("project_id")
            .map_err(|_| RepositoryError::internal("Malformed database record"))?
            .to_string(),
        doc.get_str("database_id")
            .map_err(|_| RepositoryError::internal("Malformed database record"))?
            .to_string(),
    ))
}

pub async fn create_database(
    master: &Arc<dyn DatabaseProvider>,
    database: DatabaseMeta,
) -> RepositoryResult<DatabaseMeta> {
    let collection = master.collection(COLLECTION);
    let existing = collection
        .count_documents(doc! {
            "project_id": &database.project_id,
            "database_id": &database.database_id,
        })
        .await?;
    if existing > 0 {
        return Err(RepositoryError::already_exists(format!(
            "Database already exists: {}",
            database.database_id
        )));
    }
    collection.insert_one(to_document(&database)).await?;
    debug!("Created database {}", database.database_id);
    Ok(database)
}

pub async fn get_database(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
) -> RepositoryResult<DatabaseMeta> {
    let collection = master.collection(COLLECTION);
    let found = collection
        .find_one(
            doc! { "project_id": project_id, "database_id": database_id },
            Default::default(),
        )
        .await?;
    match found {
        Some(doc) => from_document(&doc),
        None => Err(RepositoryError::not_found(format!(
            "Database not found: {database_id}"
        ))),
    }
}

pub async fn delete_database(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
) -> RepositoryResult<()> {
    let collections = master.collection(super::collections::COLLECTION);
    let remaining = collections
        .count_documents(doc! { "project_id": project_id, "database_id": database_id })
        .await?;
    if remaining > 0 {
        return Err(RepositoryError::failed_precondition(format!(
            "Database {database_id} still has collections"
        )));
    }

    let collection = master.collection(COLLECTION);
    let outcome = collection
        .delete_one(doc! { "project_id": project_id, "database_id": database_id })
        .await?;
    if outcome.deleted == 0 {
        return Err(RepositoryError::not_found(format!(
            "Database not found: {database_id}"
        )));
    }
    Ok(())
}

pub async fn list_databases(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
) -> RepositoryResult<Vec<DatabaseMeta>> {
    let collection = master.collection(COLLECTION);
    let docs = collection
        .find(doc! { "project_id": project_id }, Default::default())
        .await?;
    docs.iter().map(from_document).collect()
}
