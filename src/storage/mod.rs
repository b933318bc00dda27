//! Storage-engine capability interfaces (spec §6, §9).
//!
//! Everything above this module is written against [`DatabaseProvider`] and
//! [`StorageCollection`], never against the `mongodb` crate directly — the
//! same "polymorphic storage backend" shape the teacher uses for its own
//! Google Firestore gRPC client, generalized here to a MongoDB-class engine.
//! A production [`MongoDatabaseProvider`] and an in-memory
//! [`fake::FakeDatabaseProvider`] (available under `cfg(test)` or the
//! `test-util` feature, for downstream integration tests) both implement the
//! same trait.

mod mongo;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use mongo::MongoDatabaseProvider;

use crate::errors::RepositoryResult;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<bson::Document>,
    pub limit: Option<i64>,
    pub skip: Option<u64>,
    pub projection: Option<bson::Document>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOutcome {
    pub matched: u64,
    pub modified: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

#[derive(Debug, Clone)]
pub struct IndexSpecification {
    pub name: String,
    pub keys: bson::Document,
}

/// One tenant database's collection, addressed the way spec §6 describes:
/// `countDocuments`, `insertOne`, `findOne`, `updateOne`, `replaceOne`,
/// `deleteOne`, `find`, `aggregate`, `findOneAndUpdate`, plus index
/// operations.
#[async_trait]
pub trait StorageCollection: Send + Sync {
    async fn count_documents(&self, filter: bson::Document) -> RepositoryResult<u64>;
    async fn insert_one(&self, doc: bson::Document) -> RepositoryResult<()>;
    async fn find_one(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>>;
    async fn update_one(
        &self,
        filter: bson::Document,
        update: bson::Document,
    ) -> RepositoryResult<UpdateOutcome>;
    async fn replace_one(
        &self,
        filter: bson::Document,
        doc: bson::Document,
    ) -> RepositoryResult<UpdateOutcome>;
    async fn delete_one(&self, filter: bson::Document) -> RepositoryResult<DeleteOutcome>;
    async fn find(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Vec<bson::Document>>;
    async fn aggregate(&self, pipeline: Vec<bson::Document>) -> RepositoryResult<Vec<bson::Document>>;
    async fn find_one_and_update(
        &self,
        filter: bson::Document,
        update: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>>;
    async fn create_index(&self, keys: bson::Document, name: &str) -> RepositoryResult<()>;
    async fn drop_index(&self, name: &str) -> RepositoryResult<()>;
    async fn list_index_specifications(&self) -> RepositoryResult<Vec<IndexSpecification>>;
}

/// A session-scoped transaction handle (spec §5). Every storage call made
/// while a transaction is open must be routed through the same session so the
/// driver attaches it to the transaction — `collection()` hands out a
/// collection handle bound to this session rather than a bare one, so callers
/// can never accidentally bypass it mid-transaction.
#[async_trait]
pub trait StorageSession: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn StorageCollection>;
    async fn start_transaction(&mut self) -> RepositoryResult<()>;
    async fn commit_transaction(&mut self) -> RepositoryResult<()>;
    async fn abort_transaction(&mut self) -> RepositoryResult<()>;
}

/// One tenant (or the master) database: collection lookup, collection-name
/// enumeration for collection-group discovery (spec §4.C), and session start.
#[async_trait]
pub trait DatabaseProvider: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn StorageCollection>;
    async fn list_collection_names(&self) -> RepositoryResult<Vec<String>>;
    async fn start_session(&self) -> RepositoryResult<Box<dyn StorageSession>>;
}
