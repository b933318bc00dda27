//! Compiled-rule cache (spec §4.F): mirrors
//! [`crate::query::type_inference_cache::FieldTypeCache`]'s shape — a
//! process-wide, read-mostly `moka` cache keyed by `(project, database)`,
//! fronting a storage read and a compile pass on miss.

use super::expr;
use super::models::{Op, SecurityRule};
use moka::future::Cache;
use rhai::{Engine, AST};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::*;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct CacheKey {
    project_id: String,
    database_id: String,
}

/// A rule whose allow/deny expressions have already been parsed. Rules with
/// an expression that failed to compile are dropped from this set entirely
/// (spec §4.F: "compile errors cause the rule to be skipped, logged not
/// fatal") rather than partially compiled.
#[derive(Clone)]
pub struct CompiledRule {
    pub match_pattern: String,
    pub priority: i64,
    pub allow: BTreeMap<Op, AST>,
    pub deny: BTreeMap<Op, AST>,
}

#[derive(Clone)]
pub struct RulesCache {
    engine: Arc<Engine>,
    cache: Cache<CacheKey, Arc<Vec<CompiledRule>>>,
}

impl RulesCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            engine: Arc::new(expr::engine()),
            cache: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub async fn get_or_compile<F, Fut>(
        &self,
        project_id: &str,
        database_id: &str,
        load: F,
    ) -> crate::errors::RepositoryResult<Arc<Vec<CompiledRule>>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::errors::RepositoryResult<Vec<SecurityRule>>>,
    {
        let key = CacheKey {
            project_id: project_id.to_string(),
            database_id: database_id.to_string(),
        };
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let rules = load().await?;
        let compiled = Arc::new(self.compile_all(rules));
        self.cache.insert(key, compiled.clone()).await;
        Ok(compiled)
    }

    fn compile_all(&self, rules: Vec<SecurityRule>) -> Vec<CompiledRule> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            match self.compile_rule(&rule) {
                Ok(c) => compiled.push(c),
                Err(reason) => {
                    warn!(
                        "Skipping rule {} (priority {}): {reason}",
                        rule.match_pattern, rule.priority
                    );
                }
            }
        }
        compiled
    }

    fn compile_rule(&self, rule: &SecurityRule) -> Result<CompiledRule, String> {
        let mut allow = BTreeMap::new();
        for (op, source) in &rule.allow {
            allow.insert(*op, expr::compile(&self.engine, source)?);
        }
        let mut deny = BTreeMap::new();
        for (op, source) in &rule.deny {
            deny.insert(*op, expr::compile(&self.engine, source)?);
        }
        Ok(CompiledRule {
            match_pattern: rule.match_pattern.clone(),
            priority: rule.priority,
            allow,
            deny,
        })
    }

    pub async fn invalidate(&self, project_id: &str, database_id: &str) {
        self.cache
            .invalidate(&CacheKey {
                project_id: project_id.to_string(),
                database_id: database_id.to_string(),
            })
            .await;
    }

    pub async fn clear_all(&self) {
        self.cache.invalidate_all();
    }
}
