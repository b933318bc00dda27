//! End-to-end scenarios exercised through the public `FirestoreRepository`
//! facade, against the in-memory storage and event doubles (`test-util`
//! feature) rather than a live MongoDB instance.

use firestore_repository::catalog::{CollectionMeta, DatabaseMeta, DatabaseProviderFactory, Organization, Project};
use firestore_repository::config::RepositoryConfig;
use firestore_repository::document::DocumentAddress;
use firestore_repository::events::test_support::RecordingEventPublisher;
use firestore_repository::events::EventPublisher;
use firestore_repository::query::{CompareOp, Filter, FilterValue, Query};
use firestore_repository::repository::FirestoreRepository;
use firestore_repository::rules::{EvaluationContext, Op, SecurityRule};
use firestore_repository::storage::fake::FakeDatabaseProvider;
use firestore_repository::storage::DatabaseProvider;
use firestore_repository::value::{FieldPath, Value};
use firestore_repository::write::Precondition;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

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

    async fn drop_database(&self, name: &str) -> firestore_repository::errors::RepositoryResult<()> {
        self.databases.lock().unwrap().remove(name);
        Ok(())
    }
}

fn repository() -> (FirestoreRepository, Arc<RecordingEventPublisher>) {
    let factory: Arc<dyn DatabaseProviderFactory> = Arc::new(FakeFactory::new());
    let events = Arc::new(RecordingEventPublisher::default());
    let publisher: Arc<dyn EventPublisher> = events.clone();
    let repo = FirestoreRepository::new(
        RepositoryConfig::new("mongodb://localhost:27017".to_string()),
        factory,
        publisher,
    );
    (repo, events)
}

async fn provision(repo: &FirestoreRepository, organization_id: &str, collection_id: &str) {
    repo.catalog()
        .create_organization(Organization::new(
            organization_id.to_string(),
            organization_id.to_string(),
        ))
        .await
        .unwrap();
    repo.catalog()
        .create_project(Project::new(
            organization_id.to_string(),
            organization_id.to_string(),
            organization_id.to_string(),
        ))
        .await
        .unwrap();
    repo.catalog()
        .create_database(DatabaseMeta::new(
            organization_id.to_string(),
            organization_id.to_string(),
            "default".to_string(),
        ))
        .await
        .unwrap();
    repo.catalog()
        .create_collection(CollectionMeta::new(
            organization_id.to_string(),
            "default".to_string(),
            collection_id.to_string(),
            collection_id.to_string(),
        ))
        .await
        .unwrap();
}

fn address(collection_id: &str, document_id: &str) -> DocumentAddress {
    DocumentAddress::new(
        "acme".to_string(),
        "default".to_string(),
        collection_id.to_string(),
        document_id.to_string(),
        format!("{collection_id}/{document_id}"),
    )
}

// Scenario 1: typed array-contains filter.
#[tokio::test]
async fn array_contains_filter_returns_only_the_matching_document() {
    let (repo, _events) = repository();
    provision(&repo, "acme", "items").await;
    let session = repo.tenant("acme");

    for (document_id, tags) in [
        ("d1", vec!["a", "b"]),
        ("d2", vec!["b", "c"]),
    ] {
        let mut fields = BTreeMap::new();
        fields.insert(
            "tags".to_string(),
            Value::Array(tags.into_iter().map(|t| Value::String(t.to_string())).collect()),
        );
        session
            .create(&address("items", document_id), fields, &Precondition::none())
            .await
            .unwrap();
    }
    let mut category_only = BTreeMap::new();
    category_only.insert("category".to_string(), Value::String("x".to_string()));
    session
        .create(&address("items", "d3"), category_only, &Precondition::none())
        .await
        .unwrap();

    let query = Query::new("items".to_string()).with_filters(vec![Filter::Compare {
        field: FieldPath::parse("tags").unwrap(),
        op: CompareOp::ArrayContains,
        value: FilterValue::One(Value::String("a".to_string())),
    }]);
    let found = session.query("items", &query).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].document_id, "d1");
}

// Scenario 2: composite AND filter.
#[tokio::test]
async fn composite_and_filter_matches_only_the_intersection() {
    let (repo, _events) = repository();
    provision(&repo, "acme", "products").await;
    let session = repo.tenant("acme");

    let rows = [
        ("p1", "Electronics", true),
        ("p2", "Electronics", false),
        ("p3", "Books", true),
    ];
    for (document_id, category, available) in rows {
        let mut fields = BTreeMap::new();
        fields.insert("category".to_string(), Value::String(category.to_string()));
        fields.insert("available".to_string(), Value::Bool(available));
        session
            .create(&address("products", document_id), fields, &Precondition::none())
            .await
            .unwrap();
    }

    let query = Query::new("products".to_string()).with_filters(vec![
        Filter::Compare {
            field: FieldPath::parse("category").unwrap(),
            op: CompareOp::Equal,
            value: FilterValue::One(Value::String("Electronics".to_string())),
        },
        Filter::Compare {
            field: FieldPath::parse("available").unwrap(),
            op: CompareOp::Equal,
            value: FilterValue::One(Value::Bool(true)),
        },
    ]);
    let found = session.query("products", &query).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].document_id, "p1");
}

// Scenario 4: atomic batch, precondition failure rolls back the whole batch.
#[tokio::test]
async fn batch_with_failing_precondition_persists_nothing_and_names_the_failing_index() {
    use firestore_repository::write::batch::WriteOperation;

    let (repo, events) = repository();
    provision(&repo, "acme", "orders").await;
    let session = repo.tenant("acme");

    let writes = vec![
        WriteOperation::Create {
            address: address("orders", "a"),
            fields: BTreeMap::new(),
        },
        WriteOperation::Update {
            address: address("orders", "b"),
            data: BTreeMap::new(),
            update_mask: None,
            precondition: Precondition::exists(true),
        },
        WriteOperation::Delete {
            address: address("orders", "c"),
            precondition: Precondition::none(),
        },
    ];

    let err = session.run_batch_write(writes).await.unwrap_err();
    assert_eq!(err.details.op_index, Some(1));

    let remaining = session
        .query("orders", &Query::new("orders".to_string()))
        .await
        .unwrap();
    assert!(remaining.is_empty(), "batch must not persist document a");
    assert!(
        events.events.lock().unwrap().is_empty(),
        "batch must not emit any event when it fails"
    );
}

// Scenario 6: rule precedence (highest-priority triggering deny beats a
// lower-priority allow; no matching rule defaults to deny).
#[tokio::test]
async fn rule_precedence_prefers_highest_priority_deny_then_falls_back_to_default_deny() {
    let (repo, _events) = repository();
    repo.save_rules(
        "acme",
        "default",
        vec![
            SecurityRule::new("/users/{uid}".to_string(), 100)
                .with_allow(Op::Read, "auth.uid == variables.uid".to_string()),
            SecurityRule::new("/users/{uid}".to_string(), 200)
                .with_deny(Op::Read, "variables.uid == \"banned\"".to_string()),
        ],
    )
    .await
    .unwrap();

    let ctx = |uid: &str| EvaluationContext {
        auth: Some(BTreeMap::from([("uid".to_string(), uid.to_string())])),
        request_data: BTreeMap::new(),
        resource_data: BTreeMap::new(),
        variables: BTreeMap::new(),
        timestamp_millis: 0,
    };

    let denied = repo
        .evaluate_access(Op::Read, "acme", "default", "/users/banned", ctx("banned"))
        .await;
    assert!(!denied.allowed);

    let allowed = repo
        .evaluate_access(Op::Read, "acme", "default", "/users/u1", ctx("u1"))
        .await;
    assert!(allowed.allowed);

    let default_denied = repo
        .evaluate_access(Op::Read, "acme", "default", "/users/u2", ctx("u1"))
        .await;
    assert!(!default_denied.allowed);
}

// Container lifecycle: deleting a project with a live database is rejected.
#[tokio::test]
async fn deleting_a_project_with_a_live_database_fails() {
    let (repo, _events) = repository();
    provision(&repo, "acme", "orders").await;

    let err = repo.catalog().delete_project("acme", "acme").await.unwrap_err();
    assert_eq!(err.kind, firestore_repository::errors::ErrorKind::FailedPrecondition);
}

// Version monotonicity across an update.
#[tokio::test]
async fn successful_update_increments_version_and_advances_update_time() {
    let (repo, _events) = repository();
    provision(&repo, "acme", "orders").await;
    let session = repo.tenant("acme");

    let mut fields = BTreeMap::new();
    fields.insert("status".to_string(), Value::String("open".to_string()));
    let created = session
        .create(&address("orders", "o1"), fields, &Precondition::none())
        .await
        .unwrap();
    assert_eq!(created.version, 1);

    let mut patch = BTreeMap::new();
    patch.insert("status".to_string(), Value::String("closed".to_string()));
    let updated = session
        .update(&address("orders", "o1"), patch, None, &Precondition::none())
        .await
        .unwrap();

    assert_eq!(updated.version, created.version + 1);
    assert!(updated.update_time >= created.update_time);
}
