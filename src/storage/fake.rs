//! In-memory [`DatabaseProvider`] used by the crate's own test suite, playing
//! the same role the teacher's `fluent_api::tests::mockdb` module plays for
//! its gRPC client: a fast, dependency-free double that exercises the same
//! trait boundary production code runs against.

use super::{
    DatabaseProvider, DeleteOutcome, FindOptions, IndexSpecification, StorageCollection,
    StorageSession, UpdateOutcome,
};
use crate::errors::RepositoryResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared between a provider and the sessions it hands out, so a write made
/// through a session-bound collection lands on the exact same backing store
/// as the provider's own `collection()` — the collection-name registry is
/// the one piece of state both sides of a transaction must agree on.
type CollectionRegistry = Arc<Mutex<HashMap<String, Arc<FakeCollection>>>>;

fn get_or_create(registry: &CollectionRegistry, name: &str) -> Arc<FakeCollection> {
    registry
        .lock()
        .unwrap()
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(FakeCollection::default()))
        .clone()
}

#[derive(Default)]
pub struct FakeDatabaseProvider {
    collections: CollectionRegistry,
}

impl FakeDatabaseProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatabaseProvider for FakeDatabaseProvider {
    fn collection(&self, name: &str) -> Arc<dyn StorageCollection> {
        get_or_create(&self.collections, name)
    }

    async fn list_collection_names(&self) -> RepositoryResult<Vec<String>> {
        Ok(self.collections.lock().unwrap().keys().cloned().collect())
    }

    async fn start_session(&self) -> RepositoryResult<Box<dyn StorageSession>> {
        Ok(Box::new(FakeSession {
            registry: self.collections.clone(),
            snapshot: Mutex::new(None),
        }))
    }
}

/// A single collection's documents, held in insertion order and scanned
/// linearly — deliberately unoptimized, since this exists for correctness
/// tests, not for exercising query planning.
#[derive(Default)]
struct FakeCollection {
    docs: Mutex<Vec<bson::Document>>,
    indexes: Mutex<Vec<IndexSpecification>>,
}

fn matches(doc: &bson::Document, filter: &bson::Document) -> bool {
    for (key, expected) in filter.iter() {
        if key == "$and" {
            let clauses = expected.as_array().unwrap();
            if !clauses
                .iter()
                .all(|c| matches(doc, c.as_document().unwrap()))
            {
                return false;
            }
            continue;
        }
        if key == "$or" {
            let clauses = expected.as_array().unwrap();
            if !clauses
                .iter()
                .any(|c| matches(doc, c.as_document().unwrap()))
            {
                return false;
            }
            continue;
        }
        let actual = lookup_dotted(doc, key);
        if !field_matches(actual.as_ref(), expected) {
            return false;
        }
    }
    true
}

fn lookup_dotted(doc: &bson::Document, dotted: &str) -> Option<bson::Bson> {
    let mut current = bson::Bson::Document(doc.clone());
    for segment in dotted.split('.') {
        current = match current {
            bson::Bson::Document(d) => d.get(segment).cloned()?,
            _ => return None,
        };
    }
    Some(current)
}

fn field_matches(actual: Option<&bson::Bson>, expected: &bson::Bson) -> bool {
    match expected {
        bson::Bson::Document(ops) if ops.keys().all(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| match op.as_str() {
                "$eq" => actual == Some(operand),
                "$ne" => actual != Some(operand),
                "$exists" => {
                    let wants = operand.as_bool().unwrap_or(true);
                    actual.is_some() == wants
                }
                "$in" => operand
                    .as_array()
                    .map(|arr| actual.map(|a| arr.contains(a)).unwrap_or(false))
                    .unwrap_or(false),
                "$nin" => operand
                    .as_array()
                    .map(|arr| !actual.map(|a| arr.contains(a)).unwrap_or(false))
                    .unwrap_or(true),
                "$gt" => compare(actual, operand) == Some(std::cmp::Ordering::Greater),
                "$gte" => matches!(
                    compare(actual, operand),
                    Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                ),
                "$lt" => compare(actual, operand) == Some(std::cmp::Ordering::Less),
                "$lte" => matches!(
                    compare(actual, operand),
                    Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                ),
                "$elemMatch" => actual
                    .and_then(|a| a.as_array())
                    .map(|arr| arr.iter().any(|el| field_matches(Some(el), operand)))
                    .unwrap_or(false),
                "$regex" => match (actual, operand.as_str()) {
                    (Some(bson::Bson::String(s)), Some(pattern)) => regex_prefix_match(s, pattern),
                    _ => false,
                },
                _ => false,
            })
        }
        other => actual == Some(other),
    }
}

/// Minimal `^literal` prefix matcher, sufficient for the anchored prefix
/// patterns this crate emits (subcollection discovery); not a general regex
/// engine.
fn regex_prefix_match(value: &str, pattern: &str) -> bool {
    match pattern.strip_prefix('^') {
        Some(literal) => {
            let mut unescaped = String::with_capacity(literal.len());
            let mut chars = literal.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        unescaped.push(next);
                    }
                } else {
                    unescaped.push(c);
                }
            }
            value.starts_with(&unescaped)
        }
        None => value.contains(pattern),
    }
}

fn compare(actual: Option<&bson::Bson>, expected: &bson::Bson) -> Option<std::cmp::Ordering> {
    let actual = actual?;
    match (actual, expected) {
        (bson::Bson::Int64(a), bson::Bson::Int64(b)) => a.partial_cmp(b),
        (bson::Bson::Int32(a), bson::Bson::Int32(b)) => a.partial_cmp(b),
        (bson::Bson::Double(a), bson::Bson::Double(b)) => a.partial_cmp(b),
        (bson::Bson::String(a), bson::Bson::String(b)) => a.partial_cmp(b),
        (bson::Bson::DateTime(a), bson::Bson::DateTime(b)) => a.partial_cmp(b),
        _ => None,
    }
}

fn apply_sort(docs: &mut [bson::Document], sort: &bson::Document) {
    docs.sort_by(|a, b| {
        for (key, direction) in sort.iter() {
            let dir = direction.as_i32().unwrap_or(1);
            let ord = compare(lookup_dotted(a, key).as_ref(), &lookup_dotted(b, key).unwrap_or(bson::Bson::Null))
                .unwrap_or(std::cmp::Ordering::Equal);
            let ord = if dir < 0 { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

#[async_trait]
impl StorageCollection for FakeCollection {
    async fn count_documents(&self, filter: bson::Document) -> RepositoryResult<u64> {
        let docs = self.docs.lock().unwrap();
        Ok(docs.iter().filter(|d| matches(d, &filter)).count() as u64)
    }

    async fn insert_one(&self, doc: bson::Document) -> RepositoryResult<()> {
        self.docs.lock().unwrap().push(doc);
        Ok(())
    }

    async fn find_one(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>> {
        let matching = self.find(filter, opts).await?;
        Ok(matching.into_iter().next())
    }

    async fn update_one(
        &self,
        filter: bson::Document,
        update: bson::Document,
    ) -> RepositoryResult<UpdateOutcome> {
        let mut docs = self.docs.lock().unwrap();
        for doc in docs.iter_mut() {
            if matches(doc, &filter) {
                apply_update(doc, &update);
                return Ok(UpdateOutcome {
                    matched: 1,
                    modified: 1,
                });
            }
        }
        Ok(UpdateOutcome::default())
    }

    async fn replace_one(
        &self,
        filter: bson::Document,
        doc: bson::Document,
    ) -> RepositoryResult<UpdateOutcome> {
        let mut docs = self.docs.lock().unwrap();
        for existing in docs.iter_mut() {
            if matches(existing, &filter) {
                *existing = doc;
                return Ok(UpdateOutcome {
                    matched: 1,
                    modified: 1,
                });
            }
        }
        Ok(UpdateOutcome::default())
    }

    async fn delete_one(&self, filter: bson::Document) -> RepositoryResult<DeleteOutcome> {
        let mut docs = self.docs.lock().unwrap();
        if let Some(pos) = docs.iter().position(|d| matches(d, &filter)) {
            docs.remove(pos);
            return Ok(DeleteOutcome { deleted: 1 });
        }
        Ok(DeleteOutcome::default())
    }

    async fn find(
        &self,
        filter: bson::Document,
        opts: FindOptions,
    ) -> RepositoryResult<Vec<bson::Document>> {
        let docs = self.docs.lock().unwrap();
        let mut matching: Vec<bson::Document> =
            docs.iter().filter(|d| matches(d, &filter)).cloned().collect();
        if let Some(sort) = &opts.sort {
            apply_sort(&mut matching, sort);
        }
        if let Some(skip) = opts.skip {
            matching = matching.into_iter().skip(skip as usize).collect();
        }
        if let Some(limit) = opts.limit {
            matching.truncate(limit.max(0) as usize);
        }
        Ok(matching)
    }

    /// Interprets only the `$match`/`$project` stages this crate ever
    /// builds — not a general aggregation engine, same spirit as the rest
    /// of this double.
    async fn aggregate(&self, pipeline: Vec<bson::Document>) -> RepositoryResult<Vec<bson::Document>> {
        let mut docs: Vec<bson::Document> = self.docs.lock().unwrap().clone();
        for stage in &pipeline {
            if let Ok(filter) = stage.get_document("$match") {
                docs.retain(|d| matches(d, filter));
            } else if let Ok(projection) = stage.get_document("$project") {
                for doc in docs.iter_mut() {
                    let keys: Vec<String> = doc.keys().cloned().collect();
                    for key in keys {
                        if key == "_id" {
                            continue;
                        }
                        let keep = projection
                            .get(&key)
                            .map(|included| included.as_i32().unwrap_or(0) != 0 || included.as_bool().unwrap_or(false))
                            .unwrap_or(false);
                        if !keep {
                            doc.remove(&key);
                        }
                    }
                }
            }
        }
        Ok(docs)
    }

    async fn find_one_and_update(
        &self,
        filter: bson::Document,
        update: bson::Document,
        _opts: FindOptions,
    ) -> RepositoryResult<Option<bson::Document>> {
        let mut docs = self.docs.lock().unwrap();
        for doc in docs.iter_mut() {
            if matches(doc, &filter) {
                let before = doc.clone();
                apply_update(doc, &update);
                return Ok(Some(before));
            }
        }
        Ok(None)
    }

    async fn create_index(&self, keys: bson::Document, name: &str) -> RepositoryResult<()> {
        self.indexes.lock().unwrap().push(IndexSpecification {
            name: name.to_string(),
            keys,
        });
        Ok(())
    }

    async fn drop_index(&self, name: &str) -> RepositoryResult<()> {
        self.indexes.lock().unwrap().retain(|i| i.name != name);
        Ok(())
    }

    async fn list_index_specifications(&self) -> RepositoryResult<Vec<IndexSpecification>> {
        Ok(self.indexes.lock().unwrap().clone())
    }
}

fn apply_update(doc: &mut bson::Document, update: &bson::Document) {
    if let Some(set) = update.get_document("$set").ok() {
        for (k, v) in set.iter() {
            set_dotted(doc, k, v.clone());
        }
    }
    if let Some(unset) = update.get_document("$unset").ok() {
        for (k, _) in unset.iter() {
            unset_dotted(doc, k);
        }
    }
    if let Some(inc) = update.get_document("$inc").ok() {
        for (k, v) in inc.iter() {
            let current = lookup_dotted(doc, k).unwrap_or(bson::Bson::Int64(0));
            let incremented = match (current, v) {
                (bson::Bson::Int64(a), bson::Bson::Int64(b)) => bson::Bson::Int64(a + b),
                (bson::Bson::Double(a), bson::Bson::Double(b)) => bson::Bson::Double(a + b),
                (bson::Bson::Int64(a), bson::Bson::Double(b)) => bson::Bson::Double(a as f64 + b),
                _ => v.clone(),
            };
            set_dotted(doc, k, incremented);
        }
    }
}

fn set_dotted(doc: &mut bson::Document, dotted: &str, value: bson::Bson) {
    let segments: Vec<&str> = dotted.split('.').collect();
    set_dotted_inner(doc, &segments, value);
}

fn set_dotted_inner(doc: &mut bson::Document, segments: &[&str], value: bson::Bson) {
    if segments.len() == 1 {
        doc.insert(segments[0], value);
        return;
    }
    let head = segments[0];
    let entry = doc
        .entry(head.to_string())
        .or_insert_with(|| bson::Bson::Document(bson::Document::new()));
    if !matches!(entry, bson::Bson::Document(_)) {
        *entry = bson::Bson::Document(bson::Document::new());
    }
    if let bson::Bson::Document(nested) = entry {
        set_dotted_inner(nested, &segments[1..], value);
    }
}

fn unset_dotted(doc: &mut bson::Document, dotted: &str) {
    let segments: Vec<&str> = dotted.split('.').collect();
    unset_dotted_inner(doc, &segments);
}

fn unset_dotted_inner(doc: &mut bson::Document, segments: &[&str]) {
    if segments.len() == 1 {
        doc.remove(segments[0]);
        return;
    }
    if let Some(bson::Bson::Document(nested)) = doc.get_mut(segments[0]) {
        unset_dotted_inner(nested, &segments[1..]);
    }
}

/// Mirrors a real MongoDB session's transaction semantics closely enough for
/// tests: starting a transaction snapshots every collection's documents, and
/// aborting restores them, so a mid-transaction failure leaves no trace —
/// including in collections first written into during the transaction.
struct FakeSession {
    registry: CollectionRegistry,
    snapshot: Mutex<Option<HashMap<String, Vec<bson::Document>>>>,
}

#[async_trait]
impl StorageSession for FakeSession {
    fn collection(&self, name: &str) -> Arc<dyn StorageCollection> {
        get_or_create(&self.registry, name)
    }

    async fn start_transaction(&mut self) -> RepositoryResult<()> {
        let snapshot = self
            .registry
            .lock()
            .unwrap()
            .iter()
            .map(|(name, collection)| (name.clone(), collection.docs.lock().unwrap().clone()))
            .collect();
        *self.snapshot.lock().unwrap() = Some(snapshot);
        Ok(())
    }

    async fn commit_transaction(&mut self) -> RepositoryResult<()> {
        *self.snapshot.lock().unwrap() = None;
        Ok(())
    }

    async fn abort_transaction(&mut self) -> RepositoryResult<()> {
        if let Some(snapshot) = self.snapshot.lock().unwrap().take() {
            for (name, collection) in self.registry.lock().unwrap().iter() {
                let restored = snapshot.get(name).cloned().unwrap_or_default();
                *collection.docs.lock().unwrap() = restored;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let provider = FakeDatabaseProvider::new();
        let collection = provider.collection("products");
        collection
            .insert_one(bson::doc! { "name": "Widget", "price": 10i64 })
            .await
            .unwrap();
        let found = collection
            .find(bson::doc! { "name": "Widget" }, FindOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn update_one_applies_set_and_inc() {
        let provider = FakeDatabaseProvider::new();
        let collection = provider.collection("counters");
        collection
            .insert_one(bson::doc! { "_id": "a", "count": 1i64 })
            .await
            .unwrap();
        let outcome = collection
            .update_one(
                bson::doc! { "_id": "a" },
                bson::doc! { "$inc": { "count": 2i64 } },
            )
            .await
            .unwrap();
        assert_eq!(outcome.modified, 1);
        let doc = collection
            .find_one(bson::doc! { "_id": "a" }, FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.get_i64("count").unwrap(), 3);
    }

    #[tokio::test]
    async fn delete_one_reports_zero_when_nothing_matches() {
        let provider = FakeDatabaseProvider::new();
        let collection = provider.collection("empty");
        let outcome = collection
            .delete_one(bson::doc! { "_id": "missing" })
            .await
            .unwrap();
        assert_eq!(outcome.deleted, 0);
    }

    #[tokio::test]
    async fn aborting_a_session_rolls_back_writes_made_through_it() {
        let provider = FakeDatabaseProvider::new();
        provider
            .collection("orders")
            .insert_one(bson::doc! { "_id": "a" })
            .await
            .unwrap();

        let mut session = provider.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session
            .collection("orders")
            .insert_one(bson::doc! { "_id": "b" })
            .await
            .unwrap();
        session.abort_transaction().await.unwrap();

        let count = provider.collection("orders").count_documents(bson::doc! {}).await.unwrap();
        assert_eq!(count, 1, "abort must undo writes made through the session, keeping pre-transaction state");
    }

    #[tokio::test]
    async fn committing_a_session_keeps_writes_made_through_it() {
        let provider = FakeDatabaseProvider::new();
        let mut session = provider.start_session().await.unwrap();
        session.start_transaction().await.unwrap();
        session
            .collection("orders")
            .insert_one(bson::doc! { "_id": "a" })
            .await
            .unwrap();
        session.commit_transaction().await.unwrap();

        let count = provider.collection("orders").count_documents(bson::doc! {}).await.unwrap();
        assert_eq!(count, 1);
    }
}
