use super::models::Organization;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::DatabaseProvider;
use bson::doc;
use std::sync::Arc;
use tracing::*;

const COLLECTION: &str = "organizations";

pub(super) fn to_document(org: &Organization) -> bson::Document {
    doc! {
        "_id": &org.organization_id,
        "organization_id": &org.organization_id,
        "display_name": &org.display_name,
    }
}

pub(super) fn from_document(doc: &bson::Document) -> RepositoryResult<Organization> {
    Ok(Organization::new(
        doc.get_str("organization_id")
            .map_err(|_| RepositoryError::internal("Malformed organization record"))?
            .to_string(),
        doc.get_str("display_name").unwrap_or_default().to_string(),
    ))
}

pub async fn create_organization(
    master: &Arc<dyn DatabaseProvider>,
    org: Organization,
) -> RepositoryResult<Organization> {
    let span = span!(Level::DEBUG, "Catalog Create Organization", organization_id = %org.organization_id);
    let _enter = span.enter();

    let collection = master.collection(COLLECTION);
    let existing = collection
        .count_documents(doc! { "organization_id": &org.organization_id })
        .await?;
    if existing > 0 {
        return Err(RepositoryError::already_exists(format!(
            "Organization already exists: {}",
            org.organization_id
        )));
    }

    collection.insert_one(to_document(&org)).await?;
    debug!("Created organization {}", org.organization_id);
    Ok(org)
}

pub async fn get_organization(
    master: &Arc<dyn DatabaseProvider>,
    organization_id: &str,
) -> RepositoryResult<Organization> {
    let collection = master.collection(COLLECTION);
    let found = collection
        .find_one(
            doc! { "organization_id": organization_id },
            Default::default(),
        )
        .await?;
    match found {
        Some(doc) => from_document(&doc),
        None => Err(RepositoryError::not_found(format!(
            "Organization not found: {organization_id}"
        ))),
    }
}

pub async fn update_organization(
    master: &Arc<dyn DatabaseProvider>,
    org: Organization,
) -> RepositoryResult<Organization> {
    let collection = master.collection(COLLECTION);
    let outcome = collection
        .update_one(
            doc! { "organization_id": &org.organization_id },
            doc! { "$set": { "display_name": &org.display_name } },
        )
        .await?;
    if outcome.matched == 0 {
        return Err(RepositoryError::not_found(format!(
            "Organization not found: {}",
            org.organization_id
        )));
    }
    Ok(org)
}

pub async fn delete_organization(
    master: &Arc<dyn DatabaseProvider>,
    organization_id: &str,
) -> RepositoryResult<()> {
    let projects = master.collection(super::projects::COLLECTION);
    let remaining = projects
        .count_documents(doc! { "organization_id": organization_id })
        .await?;
    if remaining > 0 {
        return Err(RepositoryError::failed_precondition(format!(
            "Organization {organization_id} still has projects"
        )));
    }

    let collection = master.collection(COLLECTION);
    let outcome = collection
        .delete_one(doc! { "organization_id": organization_id })
        .await?;
    if outcome.deleted == 0 {
        return Err(RepositoryError::not_found(format!(
            "Organization not found: {organization_id}"
        )));
    }
    debug!("Deleted organization {organization_id} metadata record");
    Ok(())
}

pub async fn list_organizations(
    master: &Arc<dyn DatabaseProvider>,
) -> RepositoryResult<Vec<Organization>> {
    let collection = master.collection(COLLECTION);
    let docs = collection.find(doc! {}, Default::default()).await?;
    docs.iter().map(from_document).collect()
}
