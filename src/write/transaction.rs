//! Transactions (spec §4.D, §5): a handle exposing Get/Create/Update/Set/
//! Delete/Query, committed or aborted around a caller-supplied body. No retry
//! loop for `Aborted` is implemented here — spec §5 leaves that to the
//! caller.

use super::precondition::Precondition;
use super::transforms::FieldTransform;
use super::{create, delete, set, update};
use crate::document::{Document, DocumentAddress};
use crate::errors::RepositoryResult;
use crate::query::{Query, QueryEngine};
use crate::storage::{DatabaseProvider, FindOptions, StorageSession};
use crate::value::{FieldPath, Value};
use bson::doc;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A synthetic transaction ID for logging — 16 random bytes, hex-encoded.
fn synthetic_transaction_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct TransactionHandle {
    tenant_db: Arc<dyn DatabaseProvider>,
    session: Arc<Mutex<Box<dyn StorageSession>>>,
    query_engine: Arc<QueryEngine>,
    id: String,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
}

impl TransactionHandle {
    fn new(
        tenant_db: Arc<dyn DatabaseProvider>,
        session: Arc<Mutex<Box<dyn StorageSession>>>,
        query_engine: Arc<QueryEngine>,
        now: DateTime<Utc>,
    ) -> Self {
        TransactionHandle {
            tenant_db,
            session,
            query_engine,
            id: synthetic_transaction_id(),
            started_at: now,
            now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn get(&self, address: &DocumentAddress) -> RepositoryResult<Option<Document>> {
        let collection = self.session.lock().await.collection(&address.collection_id);
        let stored = collection
            .find_one(doc! { "_id": &address.path }, FindOptions::default())
            .await?;
        stored.map(|raw| Document::from_storage_document(&raw)).transpose()
    }

    pub async fn create(
        &self,
        address: &DocumentAddress,
        fields: BTreeMap<String, Value>,
    ) -> RepositoryResult<Document> {
        let collection = self.session.lock().await.collection(&address.collection_id);
        create::create(&collection, address, fields, &Precondition::none(), self.now).await
    }

    pub async fn update(
        &self,
        address: &DocumentAddress,
        data: BTreeMap<String, Value>,
        update_mask: Option<Vec<FieldPath>>,
        precondition: &Precondition,
    ) -> RepositoryResult<Document> {
        let collection = self.session.lock().await.collection(&address.collection_id);
        update::update(&collection, address, data, update_mask, precondition, self.now).await
    }

    pub async fn set(
        &self,
        address: &DocumentAddress,
        data: BTreeMap<String, Value>,
        merge: bool,
        precondition: &Precondition,
    ) -> RepositoryResult<Document> {
        let collection = self.session.lock().await.collection(&address.collection_id);
        set::set(&collection, address, data, merge, precondition, self.now).await
    }

    pub async fn delete(&self, address: &DocumentAddress, precondition: &Precondition) -> RepositoryResult<()> {
        let collection = self.session.lock().await.collection(&address.collection_id);
        delete::delete(&collection, address, precondition).await
    }

    pub async fn query(&self, collection_path: &str, query: &Query) -> RepositoryResult<Vec<Document>> {
        self.query_engine.execute(&self.tenant_db, collection_path, query).await
    }
}

/// `RunTransaction` (spec §4.D): opens a session-scoped transaction, runs
/// `body` against a [`TransactionHandle`] whose writes are routed through
/// that same session (spec §5) — so a body with several writes that later
/// fails never leaves an earlier write persisted outside the aborted
/// transaction — then commits on success and aborts on error before
/// propagating it, never the reverse order.
pub async fn run_transaction<F, Fut, T>(
    tenant_db: &Arc<dyn DatabaseProvider>,
    query_engine: &Arc<QueryEngine>,
    now: DateTime<Utc>,
    body: F,
) -> RepositoryResult<T>
where
    F: FnOnce(TransactionHandle) -> Fut,
    Fut: Future<Output = RepositoryResult<T>>,
{
    let mut session = tenant_db.start_session().await?;
    session.start_transaction().await?;
    let session = Arc::new(Mutex::new(session));

    let handle = TransactionHandle::new(tenant_db.clone(), session.clone(), query_engine.clone(), now);
    match body(handle).await {
        Ok(value) => {
            session.lock().await.commit_transaction().await?;
            Ok(value)
        }
        Err(err) => {
            session.lock().await.abort_transaction().await?;
            Err(err)
        }
    }
}
