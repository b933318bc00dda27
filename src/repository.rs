//! Repository Facade (spec component I): the single entry point that binds
//! the tenant catalog, query engine, write engine, security rules, and event
//! emission behind one contract. Each capability group is constructed with
//! only what it needs (the master `DatabaseProvider`, or a tenant one, plus
//! its own cache) rather than a reference back to this struct, so there is no
//! facade/group reference cycle (spec §9).

use crate::catalog::{DatabaseProviderFactory, TenantCatalog};
use crate::config::RepositoryConfig;
use crate::document::{Document, DocumentAddress};
use crate::errors::RepositoryResult;
use crate::events::EventPublisher;
use crate::query::{FieldTypeCache, Query, QueryCapabilities, QueryEngine};
use crate::rules::{AccessDecision, EvaluationContext, Op, RulesEngine, SecurityRule};
use crate::storage::DatabaseProvider;
use crate::value::{FieldPath, Value};
use crate::write::batch::{run_batch_write, WriteOperation};
use crate::write::transaction::{run_transaction, TransactionHandle};
use crate::write::{apply_field_transforms, create, delete, set, update, FieldTransform, Precondition, WriteResult};
use chrono::Utc;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub struct FirestoreRepository {
    catalog: TenantCatalog,
    rules: RulesEngine,
    query_engine: Arc<QueryEngine>,
    events: Arc<dyn EventPublisher>,
}

impl FirestoreRepository {
    pub fn new(
        config: RepositoryConfig,
        factory: Arc<dyn DatabaseProviderFactory>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let master = factory.database(&config.master_database_name);
        let catalog = TenantCatalog::new(master.clone(), factory, config.clone());
        let rules = RulesEngine::new(master, config.rules_cache_ttl);
        let query_engine = Arc::new(QueryEngine::new(FieldTypeCache::new(
            config.field_type_cache_capacity,
            config.field_type_cache_ttl,
        )));
        Self {
            catalog,
            rules,
            query_engine,
            events,
        }
    }

    /// Tenant/project/database/collection metadata (spec component B).
    pub fn catalog(&self) -> &TenantCatalog {
        &self.catalog
    }

    /// Security rules (spec component F).
    pub fn rules(&self) -> &RulesEngine {
        &self.rules
    }

    pub fn query_capabilities(&self) -> QueryCapabilities {
        self.query_engine.capabilities()
    }

    /// Evaluates access against the stored rules for `(project_id,
    /// database_id)` before a caller decides whether to proceed with the
    /// corresponding tenant operation (spec §4.F is invoked by the caller,
    /// not interleaved automatically into every write below, since the
    /// identity of the acting principal is the gateway's concern, not this
    /// crate's — spec §9).
    pub async fn evaluate_access(
        &self,
        op: Op,
        project_id: &str,
        database_id: &str,
        path: &str,
        ctx: EvaluationContext,
    ) -> AccessDecision {
        self.rules.evaluate_access(op, project_id, database_id, path, ctx).await
    }

    pub async fn save_rules(
        &self,
        project_id: &str,
        database_id: &str,
        rules: Vec<SecurityRule>,
    ) -> RepositoryResult<()> {
        self.rules.save_rules(project_id, database_id, rules).await
    }

    /// Binds a tenant's database for document operations (spec §6:
    /// `tenant_{organizationID}_fs`).
    pub fn tenant(&self, organization_id: &str) -> TenantSession {
        TenantSession {
            tenant_db: self.catalog.tenant_database(organization_id),
            query_engine: self.query_engine.clone(),
            events: self.events.clone(),
        }
    }
}

/// Document operations scoped to one tenant database (spec components D, C,
/// E's physical side, and G).
pub struct TenantSession {
    tenant_db: Arc<dyn DatabaseProvider>,
    query_engine: Arc<QueryEngine>,
    events: Arc<dyn EventPublisher>,
}

impl TenantSession {
    pub async fn create(
        &self,
        address: &DocumentAddress,
        fields: BTreeMap<String, Value>,
        precondition: &Precondition,
    ) -> RepositoryResult<Document> {
        let collection = self.tenant_db.collection(&address.collection_id);
        create::create(&collection, address, fields, precondition, Utc::now()).await
    }

    pub async fn update(
        &self,
        address: &DocumentAddress,
        data: BTreeMap<String, Value>,
        update_mask: Option<Vec<FieldPath>>,
        precondition: &Precondition,
    ) -> RepositoryResult<Document> {
        let collection = self.tenant_db.collection(&address.collection_id);
        update::update(&collection, address, data, update_mask, precondition, Utc::now()).await
    }

    pub async fn set(
        &self,
        address: &DocumentAddress,
        data: BTreeMap<String, Value>,
        merge: bool,
        precondition: &Precondition,
    ) -> RepositoryResult<Document> {
        let collection = self.tenant_db.collection(&address.collection_id);
        set::set(&collection, address, data, merge, precondition, Utc::now()).await
    }

    pub async fn delete(&self, address: &DocumentAddress, precondition: &Precondition) -> RepositoryResult<()> {
        let collection = self.tenant_db.collection(&address.collection_id);
        delete::delete(&collection, address, precondition).await
    }

    pub async fn apply_field_transforms(
        &self,
        address: &DocumentAddress,
        transforms: &[FieldTransform],
    ) -> RepositoryResult<Document> {
        let collection = self.tenant_db.collection(&address.collection_id);
        apply_field_transforms(&collection, address, transforms, Utc::now()).await
    }

    pub async fn query(&self, collection_path: &str, query: &Query) -> RepositoryResult<Vec<Document>> {
        self.query_engine.execute(&self.tenant_db, collection_path, query).await
    }

    pub async fn run_batch_write(&self, writes: Vec<WriteOperation>) -> RepositoryResult<Vec<WriteResult>> {
        run_batch_write(&self.tenant_db, &self.events, writes, Utc::now()).await
    }

    pub async fn run_transaction<F, Fut, T>(&self, body: F) -> RepositoryResult<T>
    where
        F: FnOnce(TransactionHandle) -> Fut,
        Fut: Future<Output = RepositoryResult<T>>,
    {
        run_transaction(&self.tenant_db, &self.query_engine, Utc::now(), body).await
    }

    pub fn database(&self) -> &Arc<dyn DatabaseProvider> {
        &self.tenant_db
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CollectionMeta, DatabaseMeta, Organization, Project};
    use crate::events::test_support::RecordingEventPublisher;
    use crate::storage::fake::FakeDatabaseProvider;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeFactory {
        databases: Mutex<HashMap<String, Arc<dyn DatabaseProvider>>>,
    }

    impl FakeFactory {
        fn new() -> Self {
            Self {
                databases: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DatabaseProviderFactory for FakeFactory {
        fn database(&self, name: &str) -> Arc<dyn DatabaseProvider> {
            let mut databases = self.databases.lock().unwrap();
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(FakeDatabaseProvider::new()))
                .clone()
        }

        async fn drop_database(&self, name: &str) -> RepositoryResult<()> {
            self.databases.lock().unwrap().remove(name);
            Ok(())
        }
    }

    fn repository() -> FirestoreRepository {
        let factory: Arc<dyn DatabaseProviderFactory> = Arc::new(FakeFactory::new());
        let events: Arc<dyn EventPublisher> = Arc::new(RecordingEventPublisher::default());
        FirestoreRepository::new(
            RepositoryConfig::new("mongodb://localhost".to_string()),
            factory,
            events,
        )
    }

    fn address() -> DocumentAddress {
        DocumentAddress::new(
            "acme".to_string(),
            "default".to_string(),
            "orders".to_string(),
            "o1".to_string(),
            "orders/o1".to_string(),
        )
    }

    #[tokio::test]
    async fn create_then_query_round_trips_through_the_facade() {
        let repo = repository();
        repo.catalog()
            .create_organization(Organization::new("acme".to_string(), "Acme".to_string()))
            .await
            .unwrap();
        repo.catalog()
            .create_project(Project::new(
                "acme".to_string(),
                "acme".to_string(),
                "Acme".to_string(),
            ))
            .await
            .unwrap();
        repo.catalog()
            .create_database(DatabaseMeta::new(
                "acme".to_string(),
                "acme".to_string(),
                "default".to_string(),
            ))
            .await
            .unwrap();
        repo.catalog()
            .create_collection(CollectionMeta::new(
                "acme".to_string(),
                "default".to_string(),
                "orders".to_string(),
                "orders".to_string(),
            ))
            .await
            .unwrap();

        let session = repo.tenant("acme");
        let mut fields = BTreeMap::new();
        fields.insert("status".to_string(), Value::String("open".to_string()));
        session
            .create(&address(), fields, &Precondition::none())
            .await
            .unwrap();

        let found = session
            .query("orders", &Query::new("orders".to_string()))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].document_id, "o1");
    }

    #[tokio::test]
    async fn access_denied_by_default_with_no_rules_saved() {
        let repo = repository();
        let decision = repo
            .evaluate_access(
                Op::Read,
                "acme",
                "default",
                "/orders/o1",
                EvaluationContext {
                    auth: None,
                    request_data: BTreeMap::new(),
                    resource_data: BTreeMap::new(),
                    variables: BTreeMap::new(),
                    timestamp_millis: 0,
                },
            )
            .await;
        assert!(!decision.allowed);
    }
}
