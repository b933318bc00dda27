use super::models::Project;
use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::DatabaseProvider;
use bson::doc;
use std::sync::Arc;
use tracing::*;

pub(crate) const COLLECTION: &str = "projects";

fn to_document(project: &Project) -> bson::Document {
    doc! {
        "_id": format!("{}/{}", project.organization_id, project.project_id),
        "organization_id": &project.organization_id,
        "project_id": &project.project_id,
        "display_name": &project.display_name,
    }
}

fn from_document(doc: &bson::Document) -> RepositoryResult<Project> {
    Ok(Project::new(
        doc.get_str("organization_id")
            .map_err(|_| RepositoryError::internal("Malformed project record"))?
            .to_string(),
        doc.get_str("project_id")
            .map_err(|_| RepositoryError::internal("Malformed project record"))?
            .to_string(),
        doc.get_str("display_name").unwrap_or_default().to_string(),
    ))
}

pub async fn create_project(
    master: &Arc<dyn DatabaseProvider>,
    project: Project,
) -> RepositoryResult<Project> {
    let collection = master.collection(COLLECTION);
    let existing = collection
        .count_documents(doc! {
            "organization_id": &project.organization_id,
            "project_id": &project.project_id,
        })
        .await?;
    if existing > 0 {
        return Err(RepositoryError::already_exists(format!(
            "Project already exists: {}",
            project.project_id
        )));
    }
    collection.insert_one(to_document(&project)).await?;
    debug!("Created project {}", project.project_id);
    Ok(project)
}

/// Filters by both `project_id` and the context-bound `organization_id`; a
/// mismatch surfaces as `NotFound`, never as an authorization leak (spec §4.B).
pub async fn get_project(
    master: &Arc<dyn DatabaseProvider>,
    organization_id: &str,
    project_id: &str,
) -> RepositoryResult<Project> {
    let collection = master.collection(COLLECTION);
    let found = collection
        .find_one(
            doc! { "organization_id": organization_id, "project_id": project_id },
            Default::default(),
        )
        .await?;
    match found {
        Some(doc) => from_document(&doc),
        None => Err(RepositoryError::not_found(format!(
            "Project not found: {project_id}"
        ))),
    }
}

pub async fn update_project(
    master: &Arc<dyn DatabaseProvider>,
    project: Project,
) -> RepositoryResult<Project> {
    let collection = master.collection(COLLECTION);
    let outcome = collection
        .update_one(
            doc! {
                "organization_id": &project.organization_id,
                "project_id": &project.project_id,
            },
            doc! { "$set": { "display_name": &project.display_name } },
        )
        .await?;
    if outcome.matched == 0 {
        return Err(RepositoryError::not_found(format!(
            "Project not found: {}",
            project.project_id
        )));
    }
    Ok(project)
}

pub async fn delete_project(
    master: &Arc<dyn DatabaseProvider>,
    organization_id: &str,
    project_id: &str,
) -> RepositoryResult<()> {
    let databases = master.collection(super::databases::COLLECTION);
    let remaining = databases
        .count_documents(doc! { "organization_id": organization_id, "project_id": project_id })
        .await?;
    if remaining > 0 {
        return Err(RepositoryError::failed_precondition(format!(
            "Project {project_id} still has databases"
        )));
    }

    let collection = master.collection(COLLECTION);
    let outcome = collection
        .delete_one(doc! { "organization_id": organization_id, "project_id": project_id })
        .await?;
    if outcome.deleted == 0 {
        return Err(RepositoryError::not_found(format!(
            "Project not found: {project_id}"
        )));
    }
    Ok(())
}

pub async fn list_projects(
    master: &Arc<dyn DatabaseProvider>,
    organization_id: &str,
) -> RepositoryResult<Vec<Project>> {
    let collection = master.collection(COLLECTION);
    let docs = collection
        .find(
            doc! { "organization_id": organization_id },
            Default::default(),
        )
        .await?;
    docs.iter().map(from_document).collect()
}
