//! Query Translation Engine (spec component C).

pub mod collection_group;
pub mod cursor;
pub mod models;
pub mod translate;
pub mod type_inference_cache;

pub use models::{
    CompareOp, CompositeOp, Direction, Filter, FilterValue, Order, Query, QueryCapabilities,
};
pub use type_inference_cache::FieldTypeCache;

use crate::document::Document;
use crate::errors::RepositoryResult;
use crate::storage::{DatabaseProvider, FindOptions};
use crate::value::ValueType;
use std::sync::Arc;
use tracing::*;

pub struct QueryEngine {
    field_types: FieldTypeCache,
}

impl QueryEngine {
    pub fn new(field_types: FieldTypeCache) -> Self {
        Self { field_types }
    }

    pub fn capabilities(&self) -> QueryCapabilities {
        QueryCapabilities::default()
    }

    pub async fn execute(
        &self,
        tenant_db: &Arc<dyn DatabaseProvider>,
        collection_path: &str,
        query: &Query,
    ) -> RepositoryResult<Vec<Document>> {
        translate::validate_filters(&query.filters, query.orders.len())?;

        let span = span!(
            Level::DEBUG,
            "Query Execute",
            collection = collection_path,
            all_descendants = query.all_descendants,
        );
        let _enter = span.enter();

        let collection_names = if query.all_descendants {
            let all = tenant_db.list_collection_names().await?;
            collection_group::matching_collection_names(&all, &query.collection_id)
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        } else {
            vec![collection_path.to_string()]
        };

        let per_collection_limit = if query.all_descendants {
            query.limit
        } else {
            query.limit
        };

        let mut all_documents = Vec::new();
        for name in &collection_names {
            let collection = tenant_db.collection(name);

            let mut field_types = Vec::with_capacity(query.orders.len());
            for order in &query.orders {
                let ty = self
                    .field_types
                    .resolve_field_type(&collection, name, &order.field.raw(), None)
                    .await?;
                field_types.push(ty);
            }

            let mut predicates: Vec<bson::Document> =
                vec![translate::translate_filter(&Filter::Composite {
                    op: CompositeOp::And,
                    filters: query.filters.clone(),
                })];
            predicates.extend(cursor::build_cursor_predicates(
                &query.orders,
                &field_types,
                &query.start_at,
                &query.start_after,
                &query.end_at,
                &query.end_before,
            ));
            let filter = merge_and(predicates);

            let sort = build_sort(&query.orders, &field_types);
            let options = FindOptions {
                sort,
                limit: per_collection_limit,
                skip: query.offset,
                projection: None,
            };

            let docs = collection.find(filter, options).await?;
            for doc in docs {
                all_documents.push(Document::from_storage_document(&doc)?);
            }
        }

        if query.all_descendants {
            if let Some(limit) = query.limit {
                all_documents.truncate(limit.max(0) as usize);
            }
        }

        if query.limit_to_last {
            all_documents.reverse();
            if let Some(limit) = query.limit {
                all_documents.truncate(limit.max(0) as usize);
            }
        }

        if !query.select_fields.is_empty() {
            for document in &mut all_documents {
                document
                    .fields
                    .retain(|name, _| query.select_fields.contains(name));
            }
        }

        debug!(
            "Query over {} returned {} documents",
            collection_path,
            all_documents.len()
        );

        Ok(all_documents)
    }
}

/// Merges multiple filter documents into a single flat `$and` array rather
/// than nesting (spec §4.C: "never nested" when combining filters with
/// cursor predicates).
fn merge_and(predicates: Vec<bson::Document>) -> bson::Document {
    let non_empty: Vec<bson::Document> = predicates.into_iter().filter(|d| !d.is_empty()).collect();
    if non_empty.is_empty() {
        return bson::Document::new();
    }
    if non_empty.len() == 1 {
        return non_empty.into_iter().next().unwrap();
    }
    let mut out = bson::Document::new();
    out.insert(
        "$and",
        non_empty.into_iter().map(bson::Bson::Document).collect::<Vec<_>>(),
    );
    out
}

fn build_sort(orders: &[Order], field_types: &[ValueType]) -> Option<bson::Document> {
    if orders.is_empty() {
        return None;
    }
    let mut sort = bson::Document::new();
    for (order, &field_type) in orders.iter().zip(field_types.iter()) {
        let path = crate::value::resolve_storage_path(&order.field, field_type);
        let direction = match order.direction {
            Direction::Ascending => 1,
            Direction::Descending => -1,
        };
        sort.insert(path, direction);
    }
    Some(sort)
}
