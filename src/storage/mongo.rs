use super::{
    DatabaseProvider, DeleteOutcome, FindOptions, IndexSpecification, StorageCollection,
    StorageSession, UpdateOutcome,
};
use crate::errors::RepositoryResult;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions, FindOptions as MongoFindOptions};
use mongodb::{Client, ClientSession, Collection, Database, IndexModel};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Production [`DatabaseProvider`] backed by the official async `mongodb`
/// driver, one per tenant database (or the master catalog database).
#[derive(Clone)]
pub struct MongoDatabaseProvider {
    client: Client,
    database: Database,
}

impl MongoDatabaseProvider {
    pub fn new(client: Client, database_name: &str) -> Self {
        let database = client.database(database_name);
        Self { client, database }
    }
}

#[async_trait]
impl DatabaseProvider for MongoDatabaseProvider {
    fn collection(&self, name: &str) -> Arc<dyn StorageCollection> {
        Arc::new(MongoStorageCollection {
            inner: self.database.collection::<bson::Document>(name),
        })
    }

    async fn list_collection_names(&self) -> RepositoryResult<Vec<String>> {
        Ok(self.database.list_collection_names(None).await?)
    }

    async fn start_session(&self) -> RepositoryResult<Box<dyn StorageSession>> {
        let session = self.client.start_session(None).await?;
        Ok(Box::new(MongoStorageSession {
            session: Arc::new(Mutex::new(session)),
            database: self.database.clone(),
        }))
    }
}

struct MongoStorageCollection {
    inner: mongodb::Collection<bson::Document>,
}

#[async_trait]
impl StorageCollection for MongoStorageCollection {
    async fn count_documents(&self, filter: bson::Document) -> RepositoryResult<u64> {
        Ok(self.inner.count_documents(filter, None).await?)
    }

    async fn insert_one(&self, doc: bson::Document) -> RepositoryResult<()> {
        self.inner.insert_one(doc, None).await?;
        Ok(())
    }

    async fn find_one(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>> {
        let mut options = FindOneOptions::default();
        options.sort = opts.sort;
        options.projection = opts.projection;
        options.skip = opts.skip;
        Ok(self.inner.find_one(filter, options).await?)
    }

    async fn update_one(
        &self,
        filter: bson::Document,
        update: bson::Document,
    ) -> RepositoryResult<UpdateOutcome> {
        let result = self.inner.update_one(filter, update, None).await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn replace_one(
        &self,
        filter: bson::Document,
        doc: bson::Document,
    ) -> RepositoryResult<UpdateOutcome> {
        let result = self.inner.replace_one(filter, doc, None).await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_one(&self, filter: bson::Document) -> RepositoryResult<DeleteOutcome> {
        let result = self.inner.delete_one(filter, None).await?;
        Ok(DeleteOutcome {
            deleted: result.deleted_count,
        })
    }

    async fn find(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Vec<bson::Document>> {
        let mut options = MongoFindOptions::default();
        options.sort = opts.sort;
        options.limit = opts.limit;
        options.skip = opts.skip;
        options.projection = opts.projection;
        let cursor = self.inner.find(filter, options).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn aggregate(&self, pipeline: Vec<bson::Document>) -> RepositoryResult<Vec<bson::Document>> {
        let cursor = self.inner.aggregate(pipeline, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn find_one_and_update(
        &self,
        filter: bson::Document,
        update: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.sort = opts.sort;
        options.projection = opts.projection;
        Ok(self.inner.find_one_and_update(filter, update, options).await?)
    }

    async fn create_index(&self, keys: bson::Document, name: &str) -> RepositoryResult<()> {
        let model = IndexModel::builder()
            .keys(keys)
            .options(
                mongodb::options::IndexOptions::builder()
                    .name(name.to_string())
                    .build(),
            )
            .build();
        self.inner.create_index(model, None).await?;
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> RepositoryResult<()> {
        self.inner.drop_index(name, None).await?;
        Ok(())
    }

    async fn list_index_specifications(&self) -> RepositoryResult<Vec<IndexSpecification>> {
        let mut cursor = self.inner.list_indexes(None).await?;
        let mut specs = Vec::new();
        while let Some(model) = cursor.try_next().await? {
            let name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();
            specs.push(IndexSpecification {
                name,
                keys: model.keys,
            });
        }
        Ok(specs)
    }
}

struct MongoStorageSession {
    session: Arc<Mutex<ClientSession>>,
    database: Database,
}

#[async_trait]
impl StorageSession for MongoStorageSession {
    fn collection(&self, name: &str) -> Arc<dyn StorageCollection> {
        Arc::new(MongoSessionCollection {
            inner: self.database.collection::<bson::Document>(name),
            session: self.session.clone(),
        })
    }

    async fn start_transaction(&mut self) -> RepositoryResult<()> {
        self.session.lock().await.start_transaction(None).await?;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> RepositoryResult<()> {
        self.session.lock().await.commit_transaction().await?;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> RepositoryResult<()> {
        self.session.lock().await.abort_transaction().await?;
        Ok(())
    }
}

/// A [`StorageCollection`] bound to an open [`ClientSession`]: every call
/// attaches the session via the driver's `*_with_session` family so writes
/// made through it land inside the caller's transaction instead of running as
/// their own implicit one.
struct MongoSessionCollection {
    inner: Collection<bson::Document>,
    session: Arc<Mutex<ClientSession>>,
}

#[async_trait]
impl StorageCollection for MongoSessionCollection {
    async fn count_documents(&self, filter: bson::Document) -> RepositoryResult<u64> {
        let mut session = self.session.lock().await;
        Ok(self
            .inner
            .count_documents_with_session(filter, None, &mut session)
            .await?)
    }

    async fn insert_one(&self, doc: bson::Document) -> RepositoryResult<()> {
        let mut session = self.session.lock().await;
        self.inner
            .insert_one_with_session(doc, None, &mut session)
            .await?;
        Ok(())
    }

    async fn find_one(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>> {
        let mut options = FindOneOptions::default();
        options.sort = opts.sort;
        options.projection = opts.projection;
        options.skip = opts.skip;
        let mut session = self.session.lock().await;
        Ok(self
            .inner
            .find_one_with_session(filter, options, &mut session)
            .await?)
    }

    async fn update_one(
        &self,
        filter: bson::Document,
        update: bson::Document,
    ) -> RepositoryResult<UpdateOutcome> {
        let mut session = self.session.lock().await;
        let result = self
            .inner
            .update_one_with_session(filter, update, None, &mut session)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn replace_one(
        &self,
        filter: bson::Document,
        doc: bson::Document,
    ) -> RepositoryResult<UpdateOutcome> {
        let mut session = self.session.lock().await;
        let result = self
            .inner
            .replace_one_with_session(filter, doc, None, &mut session)
            .await?;
        Ok(UpdateOutcome {
            matched: result.matched_count,
            modified: result.modified_count,
        })
    }

    async fn delete_one(&self, filter: bson::Document) -> RepositoryResult<DeleteOutcome> {
        let mut session = self.session.lock().await;
        let result = self
            .inner
            .delete_one_with_session(filter, None, &mut session)
            .await?;
        Ok(DeleteOutcome {
            deleted: result.deleted_count,
        })
    }

    async fn find(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Vec<bson::Document>> {
        let mut options = MongoFindOptions::default();
        options.sort = opts.sort;
        options.limit = opts.limit;
        options.skip = opts.skip;
        options.projection = opts.projection;
        let mut session = self.session.lock().await;
        let mut cursor = self
            .inner
            .find_with_session(filter, options, &mut session)
            .await?;
        let mut docs = Vec::new();
        while let Some(doc) = cursor.next(&mut session).await.transpose()? {
            docs.push(doc);
        }
        Ok(docs)
    }

    async fn aggregate(&self, pipeline: Vec<bson::Document>) -> RepositoryResult<Vec<bson::Document>> {
        let mut session = self.session.lock().await;
        let mut cursor = self
            .inner
            .aggregate_with_session(pipeline, None, &mut session)
            .await?;
        let mut docs = Vec::new();
        while let Some(doc) = cursor.next(&mut session).await.transpose()? {
            docs.push(doc);
        }
        Ok(docs)
    }

    async fn find_one_and_update(
        &self,
        filter: bson::Document,
        update: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>> {
        let mut options = FindOneAndUpdateOptions::default();
        options.sort = opts.sort;
        options.projection = opts.projection;
        let mut session = self.session.lock().await;
        Ok(self
            .inner
            .find_one_and_update_with_session(filter, update, options, &mut session)
            .await?)
    }

    async fn create_index(&self, keys: bson::Document, name: &str) -> RepositoryResult<()> {
        let model = IndexModel::builder()
            .keys(keys)
            .options(
                mongodb::options::IndexOptions::builder()
                    .name(name.to_string())
                    .build(),
            )
            .build();
        self.inner.create_index(model, None).await?;
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> RepositoryResult<()> {
        self.inner.drop_index(name, None).await?;
        Ok(())
    }

    async fn list_index_specifications(&self) -> RepositoryResult<Vec<IndexSpecification>> {
        let mut cursor = self.inner.list_indexes(None).await?;
        let mut specs = Vec::new();
        while let Some(model) = cursor.try_next().await? {
            let name = model
                .options
                .as_ref()
                .and_then(|o| o.name.clone())
                .unwrap_or_default();
            specs.push(IndexSpecification {
                name,
                keys: model.keys,
            });
        }
        Ok(specs)
    }
}
