//! Tenant Catalog (spec component B).
//!
//! Organization/project/database/collection metadata lives in the master
//! catalog database; [`TenantCatalog`] is the polymorphic front door spec §9
//! describes — callers never reach for `mongodb`/`bson` directly, only the
//! [`crate::storage::DatabaseProvider`] capability interface.

pub(crate) mod collections;
mod databases;
mod organizations;
mod projects;

pub mod models;

pub use models::{CollectionMeta, DatabaseMeta, IndexField, IndexMeta, IndexState, Organization, Project, SortOrder};

use crate::config::RepositoryConfig;
use crate::errors::RepositoryResult;
use crate::storage::DatabaseProvider;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::*;

/// Builds a [`DatabaseProvider`] for an arbitrary database name, and tears
/// one down. Implemented by [`crate::storage::mongo::MongoDatabaseProvider`]'s
/// owning `Client` in production, and by an in-memory registry in tests —
/// this is the seam spec §9 calls out to avoid every collaborator needing
/// its own Mongo client.
#[async_trait]
pub trait DatabaseProviderFactory: Send + Sync {
    fn database(&self, name: &str) -> Arc<dyn DatabaseProvider>;

    /// Drops the named database outright (spec §4.B: organization deletion
    /// "tears both down atomically").
    async fn drop_database(&self, name: &str) -> RepositoryResult<()>;
}

pub struct TenantCatalog {
    master: Arc<dyn DatabaseProvider>,
    factory: Arc<dyn DatabaseProviderFactory>,
    config: RepositoryConfig,
}

impl TenantCatalog {
    pub fn new(
        master: Arc<dyn DatabaseProvider>,
        factory: Arc<dyn DatabaseProviderFactory>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            master,
            factory,
            config,
        }
    }

    /// Resolves the tenant database handle for an organization (spec §6:
    /// `tenant_{organizationID}_fs`).
    pub fn tenant_database(&self, organization_id: &str) -> Arc<dyn DatabaseProvider> {
        self.factory
            .database(&self.config.tenant_database_name(organization_id))
    }

    /// Creates the organization record and provisions its tenant database in
    /// one logical step (spec §4.B: "atomically with the metadata record").
    /// The tenant database itself is created lazily by the storage engine on
    /// first write, so provisioning here is limited to recording the intent;
    /// no physical side effect is needed up front.
    pub async fn create_organization(&self, org: Organization) -> RepositoryResult<Organization> {
        let span = span!(Level::DEBUG, "Catalog Create Organization");
        let _enter = span.enter();
        organizations::create_organization(&self.master, org).await
    }

    pub async fn get_organization(&self, organization_id: &str) -> RepositoryResult<Organization> {
        organizations::get_organization(&self.master, organization_id).await
    }

    pub async fn update_organization(&self, org: Organization) -> RepositoryResult<Organization> {
        organizations::update_organization(&self.master, org).await
    }

    /// Deletes the organization's metadata record and drops its tenant
    /// database (spec §4.B: "deletion tears both down atomically").
    pub async fn delete_organization(&self, organization_id: &str) -> RepositoryResult<()> {
        organizations::delete_organization(&self.master, organization_id).await?;
        self.factory
            .drop_database(&self.config.tenant_database_name(organization_id))
            .await
    }

    pub async fn list_organizations(&self) -> RepositoryResult<Vec<Organization>> {
        organizations::list_organizations(&self.master).await
    }

    pub async fn create_project(&self, project: Project) -> RepositoryResult<Project> {
        projects::create_project(&self.master, project).await
    }

    pub async fn get_project(
        &self,
        organization_id: &str,
        project_id: &str,
    ) -> RepositoryResult<Project> {
        projects::get_project(&self.master, organization_id, project_id).await
    }

    pub async fn update_project(&self, project: Project) -> RepositoryResult<Project> {
        projects::update_project(&self.master, project).await
    }

    pub async fn delete_project(
        &self,
        organization_id: &str,
        project_id: &str,
    ) -> RepositoryResult<()> {
        projects::delete_project(&self.master, organization_id, project_id).await
    }

    pub async fn list_projects(&self, organization_id: &str) -> RepositoryResult<Vec<Project>> {
        projects::list_projects(&self.master, organization_id).await
    }

    pub async fn create_database(&self, database: DatabaseMeta) -> RepositoryResult<DatabaseMeta> {
        databases::create_database(&self.master, database).await
    }

    pub async fn get_database(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> RepositoryResult<DatabaseMeta> {
        databases::get_database(&self.master, project_id, database_id).await
    }

    pub async fn delete_database(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> RepositoryResult<()> {
        databases::delete_database(&self.master, project_id, database_id).await
    }

    pub async fn list_databases(&self, project_id: &str) -> RepositoryResult<Vec<DatabaseMeta>> {
        databases::list_databases(&self.master, project_id).await
    }

    pub async fn create_collection(
        &self,
        meta: CollectionMeta,
    ) -> RepositoryResult<CollectionMeta> {
        collections::create_collection(&self.master, meta).await
    }

    pub async fn get_collection(
        &self,
        project_id: &str,
        database_id: &str,
        collection_id: &str,
    ) -> RepositoryResult<CollectionMeta> {
        collections::get_collection(&self.master, project_id, database_id, collection_id).await
    }

    pub async fn delete_collection(
        &self,
        project_id: &str,
        database_id: &str,
        collection_id: &str,
        document_count: i64,
    ) -> RepositoryResult<()> {
        collections::delete_collection(
            &self.master,
            project_id,
            database_id,
            collection_id,
            document_count,
        )
        .await
    }

    pub async fn list_collections(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> RepositoryResult<Vec<CollectionMeta>> {
        collections::list_collections(&self.master, project_id, database_id).await
    }

    /// `ListSubcollections` (spec §4.B): the distinct subcollection IDs
    /// directly under `parent_document_path`, computed by aggregating the
    /// tenant database's own document paths rather than master-catalog
    /// metadata, so a collection a caller has only ever written documents
    /// into (never explicitly registered via `create_collection`) is still
    /// found.
    pub async fn list_subcollections(
        &self,
        organization_id: &str,
        parent_document_path: &str,
    ) -> RepositoryResult<Vec<String>> {
        collections::list_subcollections(&self.tenant_database(organization_id), parent_document_path).await
    }
}
