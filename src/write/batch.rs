//! Batch writes (spec §4.D, §5): every operation is planned — validated and
//! computed against the document state as of the start of the batch — before
//! any of them touch storage. The first planning failure aborts with zero
//! side effects; only once every operation plans successfully does a session
//! open and every mutation apply through it, so a mid-apply storage fault
//! aborts the transaction instead of leaving earlier writes in place.

use super::precondition::Precondition;
use super::transforms::FieldTransform;
use super::{create, delete, plan_field_transforms, set, update, WriteResult};
use crate::document::{Document, DocumentAddress};
use crate::errors::RepositoryResult;
use crate::events::{Event, EventPublisher, EventType};
use crate::storage::{DatabaseProvider, StorageSession};
use crate::value::{FieldPath, Value};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::*;

#[derive(Debug, Clone)]
pub enum WriteOperation {
    Create {
        address: DocumentAddress,
        fields: BTreeMap<String, Value>,
    },
    Update {
        address: DocumentAddress,
        data: BTreeMap<String, Value>,
        update_mask: Option<Vec<FieldPath>>,
        precondition: Precondition,
    },
    Set {
        address: DocumentAddress,
        data: BTreeMap<String, Value>,
        merge: bool,
        precondition: Precondition,
    },
    Delete {
        address: DocumentAddress,
        precondition: Precondition,
    },
    Transform {
        address: DocumentAddress,
        transforms: Vec<FieldTransform>,
    },
}

/// The storage mutation a planned operation still owes, deferred until every
/// operation in the batch has planned successfully.
enum PlannedMutation {
    Insert { document: Document },
    Replace { document: Document },
    Delete { address: DocumentAddress },
}

/// `RunBatchWrite` (spec §4.D, §8): plans every operation against the
/// document state as of the start of the batch, aborting on the first
/// planning failure with no storage mutation yet performed; only once all
/// operations plan successfully does it open a session, apply the writes in
/// order, commit, and emit one event per operation.
pub async fn run_batch_write(
    tenant_db: &Arc<dyn DatabaseProvider>,
    events: &Arc<dyn EventPublisher>,
    writes: Vec<WriteOperation>,
    now: DateTime<Utc>,
) -> RepositoryResult<Vec<WriteResult>> {
    let mut mutations = Vec::with_capacity(writes.len());
    let mut pending_events = Vec::with_capacity(writes.len());

    for (index, write) in writes.into_iter().enumerate() {
        match plan_one(tenant_db, write, now).await {
            Ok((mutation, event)) => {
                mutations.push(mutation);
                pending_events.push(event);
            }
            Err(err) => {
                return Err(err.with_op_index(index));
            }
        }
    }

    let mut session = tenant_db.start_session().await?;
    session.start_transaction().await?;

    let mut results = Vec::with_capacity(mutations.len());
    for mutation in mutations {
        match apply_one(session.as_ref(), mutation, now).await {
            Ok(result) => results.push(result),
            Err(err) => {
                session.abort_transaction().await?;
                return Err(err);
            }
        }
    }

    session.commit_transaction().await?;

    for event in pending_events {
        crate::events::publish_best_effort(events.as_ref(), event).await;
    }

    debug!("Batch of {} operations committed", results.len());
    Ok(results)
}

async fn plan_one(
    tenant_db: &Arc<dyn DatabaseProvider>,
    write: WriteOperation,
    now: DateTime<Utc>,
) -> RepositoryResult<(PlannedMutation, Event)> {
    match write {
        WriteOperation::Create { address, fields } => {
            let collection = tenant_db.collection(&address.collection_id);
            let document = create::plan(&collection, &address, fields, &Precondition::none(), now).await?;
            let event = Event::new(
                EventType::DocumentCreated,
                document.project_id.clone(),
                document.database_id.clone(),
                document.path.clone(),
                document.fields.clone(),
                document.update_time,
            );
            Ok((PlannedMutation::Insert { document }, event))
        }
        WriteOperation::Update {
            address,
            data,
            update_mask,
            precondition,
        } => {
            let collection = tenant_db.collection(&address.collection_id);
            let document = update::plan(&collection, &address, data, update_mask, &precondition, now).await?;
            let event = Event::new(
                EventType::DocumentUpdated,
                document.project_id.clone(),
                document.database_id.clone(),
                document.path.clone(),
                document.fields.clone(),
                document.update_time,
            );
            Ok((PlannedMutation::Replace { document }, event))
        }
        WriteOperation::Set {
            address,
            data,
            merge,
            precondition,
        } => {
            let collection = tenant_db.collection(&address.collection_id);
            let document = set::plan(&collection, &address, data, merge, &precondition, now).await?;
            let event = Event::new(
                EventType::DocumentSet,
                document.project_id.clone(),
                document.database_id.clone(),
                document.path.clone(),
                document.fields.clone(),
                document.update_time,
            );
            Ok((PlannedMutation::Replace { document }, event))
        }
        WriteOperation::Delete { address, precondition } => {
            let collection = tenant_db.collection(&address.collection_id);
            delete::plan(&collection, &address, &precondition).await?;
            let event = Event::new(
                EventType::DocumentDeleted,
                address.project_id.clone(),
                address.database_id.clone(),
                address.path.clone(),
                BTreeMap::new(),
                now,
            );
            Ok((PlannedMutation::Delete { address }, event))
        }
        WriteOperation::Transform { address, transforms } => {
            let collection = tenant_db.collection(&address.collection_id);
            let document = plan_field_transforms(&collection, &address, &transforms, now).await?;
            let event = Event::new(
                EventType::DocumentUpdated,
                document.project_id.clone(),
                document.database_id.clone(),
                document.path.clone(),
                document.fields.clone(),
                document.update_time,
            );
            Ok((PlannedMutation::Replace { document }, event))
        }
    }
}

/// Applies a planned mutation through the batch's open session, so a
/// mid-apply storage fault aborts the same transaction the earlier
/// mutations' writes are attached to (spec §5) instead of leaving them
/// applied outside of it.
async fn apply_one(
    session: &dyn StorageSession,
    mutation: PlannedMutation,
    now: DateTime<Utc>,
) -> RepositoryResult<WriteResult> {
    match mutation {
        PlannedMutation::Insert { document } => {
            session
                .collection(&document.collection_id)
                .insert_one(document.to_storage_document())
                .await?;
            Ok(WriteResult { update_time: document.update_time })
        }
        PlannedMutation::Replace { document } => {
            session
                .collection(&document.collection_id)
                .replace_one(
                    bson::doc! { "_id": &document.path },
                    document.to_storage_document(),
                )
                .await?;
            Ok(WriteResult { update_time: document.update_time })
        }
        PlannedMutation::Delete { address } => {
            session
                .collection(&address.collection_id)
                .delete_one(bson::doc! { "_id": &address.path })
                .await?;
            Ok(WriteResult { update_time: now })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::test_support::RecordingEventPublisher;
    use crate::storage::fake::FakeDatabaseProvider;
    use crate::storage::{DeleteOutcome, FindOptions, IndexSpecification, StorageCollection, UpdateOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A [`DatabaseProvider`] that fails the Nth `insert_one` call across its
    /// whole lifetime, used to prove a mid-apply storage fault rolls back
    /// every earlier write in the same batch rather than leaving them
    /// persisted outside the aborted transaction.
    struct FaultyProvider {
        inner: FakeDatabaseProvider,
        calls: Arc<AtomicUsize>,
        fail_at: usize,
    }

    struct FaultyCollection {
        inner: Arc<dyn StorageCollection>,
        calls: Arc<AtomicUsize>,
        fail_at: usize,
    }

    #[async_trait]
    impl StorageCollection for FaultyCollection {
        async fn count_documents(&self, filter: bson::Document) -> RepositoryResult<u64> {
            self.inner.count_documents(filter).await
        }

        async fn insert_one(&self, doc: bson::Document) -> RepositoryResult<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_at {
                return Err(crate::errors::RepositoryError::internal("simulated storage fault"));
            }
            self.inner.insert_one(doc).await
        }

        async fn find_one(
            &self,
            filter: bson::Document,
            opts: FindOptions,
        ) -> RepositoryResult<Option<bson::Document>> {
            self.inner.find_one(filter, opts).await
        }

        async fn update_one(
            &self,
            filter: bson::Document,
            update: bson::Document,
        ) -> RepositoryResult<UpdateOutcome> {
            self.inner.update_one(filter, update).await
        }

        async fn replace_one(
            &self,
            filter: bson::Document,
            doc: bson::Document,
        ) -> RepositoryResult<UpdateOutcome> {
            self.inner.replace_one(filter, doc).await
        }

        async fn delete_one(&self, filter: bson::Document) -> RepositoryResult<DeleteOutcome> {
            self.inner.delete_one(filter).await
        }

        async fn find(
            &self,
            filter: bson::Document,
            opts: FindOptions,
        ) -> RepositoryResult<Vec<bson::Document>> {
            self.inner.find(filter, opts).await
        }

        async fn aggregate(&self, pipeline: Vec<bson::Document>) -> RepositoryResult<Vec<bson::Document>> {
            self.inner.aggregate(pipeline).await
        }

        async fn find_one_and_update(
            &self,
            filter: bson::Document,
            update: bson::Document,
            opts: FindOptions,
        ) -> RepositoryResult<Option<bson::Document>> {
            self.inner.find_one_and_update(filter, update, opts).await
        }

        async fn create_index(&self, keys: bson::Document, name: &str) -> RepositoryResult<()> {
            self.inner.create_index(keys, name).await
        }

        async fn drop_index(&self, name: &str) -> RepositoryResult<()> {
            self.inner.drop_index(name).await
        }

        async fn list_index_specifications(&self) -> RepositoryResult<Vec<IndexSpecification>> {
            self.inner.list_index_specifications().await
        }
    }

    struct FaultySession {
        inner: Box<dyn StorageSession>,
        calls: Arc<AtomicUsize>,
        fail_at: usize,
    }

    #[async_trait]
    impl StorageSession for FaultySession {
        fn collection(&self, name: &str) -> Arc<dyn StorageCollection> {
            Arc::new(FaultyCollection {
                inner: self.inner.collection(name),
                calls: self.calls.clone(),
                fail_at: self.fail_at,
            })
        }

        async fn start_transaction(&mut self) -> RepositoryResult<()> {
            self.inner.start_transaction().await
        }

        async fn commit_transaction(&mut self) -> RepositoryResult<()> {
            self.inner.commit_transaction().await
        }

        async fn abort_transaction(&mut self) -> RepositoryResult<()> {
            self.inner.abort_transaction().await
        }
    }

    #[async_trait]
    impl DatabaseProvider for FaultyProvider {
        fn collection(&self, name: &str) -> Arc<dyn StorageCollection> {
            Arc::new(FaultyCollection {
                inner: self.inner.collection(name),
                calls: self.calls.clone(),
                fail_at: self.fail_at,
            })
        }

        async fn list_collection_names(&self) -> RepositoryResult<Vec<String>> {
            self.inner.list_collection_names().await
        }

        async fn start_session(&self) -> RepositoryResult<Box<dyn StorageSession>> {
            Ok(Box::new(FaultySession {
                inner: self.inner.start_session().await?,
                calls: self.calls.clone(),
                fail_at: self.fail_at,
            }))
        }
    }

    fn address(collection: &str, document_id: &str) -> DocumentAddress {
        DocumentAddress::new(
            "p".to_string(),
            "d".to_string(),
            collection.to_string(),
            document_id.to_string(),
            format!("{collection}/{document_id}"),
        )
    }

    #[tokio::test]
    async fn all_operations_commit_and_emit_one_event_each() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let events: Arc<dyn EventPublisher> = Arc::new(RecordingEventPublisher::default());

        create::create(
            &tenant_db.collection("orders"),
            &address("orders", "b"),
            BTreeMap::new(),
            &Precondition::none(),
            Utc::now(),
        )
        .await
        .unwrap();

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
                address: address("orders", "b"),
                precondition: Precondition::none(),
            },
        ];

        let results = run_batch_write(&tenant_db, &events, writes, Utc::now()).await.unwrap();
        assert_eq!(results.len(), 3);

        let recorded = events.clone();
        let _ = recorded;
    }

    #[tokio::test]
    async fn first_failure_aborts_and_reports_op_index() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let events: Arc<dyn EventPublisher> = Arc::new(RecordingEventPublisher::default());

        let writes = vec![
            WriteOperation::Create {
                address: address("orders", "a"),
                fields: BTreeMap::new(),
            },
            WriteOperation::Update {
                address: address("orders", "missing"),
                data: BTreeMap::new(),
                update_mask: None,
                precondition: Precondition::exists(true),
            },
            WriteOperation::Delete {
                address: address("orders", "c"),
                precondition: Precondition::none(),
            },
        ];

        let err = run_batch_write(&tenant_db, &events, writes, Utc::now())
            .await
            .unwrap_err();
        assert_eq!(err.details.op_index, Some(1));

        let collection = tenant_db.collection("orders");
        let count = collection
            .count_documents(bson::doc! {})
            .await
            .unwrap();
        assert_eq!(count, 0, "a planning failure must leave no operation's write applied");
    }

    #[tokio::test]
    async fn mid_apply_storage_fault_leaves_no_earlier_write_persisted() {
        let tenant_db: Arc<dyn DatabaseProvider> = Arc::new(FaultyProvider {
            inner: FakeDatabaseProvider::new(),
            calls: Arc::new(AtomicUsize::new(0)),
            fail_at: 2,
        });
        let events: Arc<dyn EventPublisher> = Arc::new(RecordingEventPublisher::default());

        let writes = vec![
            WriteOperation::Create {
                address: address("orders", "a"),
                fields: BTreeMap::new(),
            },
            WriteOperation::Create {
                address: address("orders", "b"),
                fields: BTreeMap::new(),
            },
        ];

        run_batch_write(&tenant_db, &events, writes, Utc::now())
            .await
            .unwrap_err();

        let collection = tenant_db.collection("orders");
        let count = collection.count_documents(bson::doc! {}).await.unwrap();
        assert_eq!(
            count, 0,
            "a mid-apply storage fault must roll back every write already applied in this batch"
        );
    }
}
