//! Field-type inference cache (spec §4.C, §5): resolves the storage type of a
//! field path that carries no explicit comparison value (order-by keys, and
//! the cursor predicates built against them), following the four-step
//! priority order spec §4.C lists. Process-wide, read-mostly, guarded by
//! `moka`'s internal concurrency rather than a hand-rolled `RwLock`, matching
//! spec §5's "process-wide, read-mostly" shared-state description.

use crate::errors::RepositoryResult;
use crate::storage::StorageCollection;
use crate::value::ValueType;
use bson::doc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    collection_path: String,
    field: String,
}

#[derive(Clone)]
pub struct FieldTypeCache {
    cache: Cache<CacheKey, ValueType>,
}

impl FieldTypeCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Resolves the stored type of `field` within `collection_path`, trying,
    /// in order: the cache, the supplied peer hint (a type already fixed by a
    /// sibling filter in the same query), then a one-document sample read
    /// against `collection`, finally falling back to `String`.
    pub async fn resolve_field_type(
        &self,
        collection: &Arc<dyn StorageCollection>,
        collection_path: &str,
        field: &str,
        peer_hint: Option<ValueType>,
    ) -> RepositoryResult<ValueType> {
        let key = CacheKey {
            collection_path: collection_path.to_string(),
            field: field.to_string(),
        };

        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        if let Some(hint) = peer_hint {
            self.cache.insert(key, hint).await;
            return Ok(hint);
        }

        let sampled = self.sample_field_type(collection, field).await?;
        let resolved = sampled.unwrap_or(ValueType::String);
        if sampled.is_none() {
            debug!(
                "No sample document carried field {field} in {collection_path}; defaulting to String"
            );
        }
        self.cache.insert(key, resolved).await;
        Ok(resolved)
    }

    async fn sample_field_type(
        &self,
        collection: &Arc<dyn StorageCollection>,
        field: &str,
    ) -> RepositoryResult<Option<ValueType>> {
        let storage_field = format!("fields.{field}");
        let sample = collection
            .find_one(
                doc! { storage_field.clone(): { "$exists": true } },
                Default::default(),
            )
            .await?;
        Ok(sample.and_then(|doc| {
            let field_doc = doc.get_document("fields").ok()?.get_document(field).ok()?;
            let tag = field_doc.keys().next()?;
            tag_to_value_type(tag)
        }))
    }

    pub async fn invalidate(&self, collection_path: &str, field: &str) {
        self.cache
            .invalidate(&CacheKey {
                collection_path: collection_path.to_string(),
                field: field.to_string(),
            })
            .await;
    }

    pub async fn clear(&self) {
        self.cache.invalidate_all();
    }
}

fn tag_to_value_type(tag: &str) -> Option<ValueType> {
    Some(match tag {
        "nullValue" => ValueType::Null,
        "booleanValue" => ValueType::Bool,
        "integerValue" => ValueType::Int64,
        "doubleValue" => ValueType::Double,
        "stringValue" => ValueType::String,
        "bytesValue" => ValueType::Bytes,
        "timestampValue" => ValueType::Timestamp,
        "referenceValue" => ValueType::Reference,
        "geoPointValue" => ValueType::GeoPoint,
        "arrayValue" => ValueType::Array,
        "mapValue" => ValueType::Map,
        _ => return None,
    })
}
