//! Security Rules Engine (spec component F, spec §4.F): per-`(project,
//! database)` access-control rules, stored in the master catalog and
//! evaluated through [`RulesCache`]'s compiled, cached form.

pub mod cache;
pub mod expr;
pub mod models;
pub mod pattern;

pub use expr::EvaluationContext;
pub use models::{AccessDecision, Op, SecurityRule};

use crate::errors::{RepositoryError, RepositoryResult};
use crate::storage::DatabaseProvider;
use bson::{doc, Bson};
use cache::RulesCache;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::*;

const COLLECTION: &str = "security_rules";

pub struct RulesEngine {
    master: Arc<dyn DatabaseProvider>,
    cache: RulesCache,
}

impl RulesEngine {
    pub fn new(master: Arc<dyn DatabaseProvider>, cache_ttl: Duration) -> Self {
        Self {
            master,
            cache: RulesCache::new(cache_ttl),
        }
    }

    /// `SaveRules` (spec §4.F): validates the whole set, replaces whatever was
    /// previously stored for `(project_id, database_id)`, and invalidates the
    /// compiled-rule cache entry so the next evaluation recompiles.
    pub async fn save_rules(
        &self,
        project_id: &str,
        database_id: &str,
        rules: Vec<SecurityRule>,
    ) -> RepositoryResult<()> {
        validate_rule_set(&rules)?;

        let collection = self.master.collection(COLLECTION);
        let existing = collection
            .find(
                doc! { "project_id": project_id, "database_id": database_id },
                Default::default(),
            )
            .await?;
        for doc in &existing {
            if let Ok(id) = doc.get_str("_id") {
                collection.delete_one(doc! { "_id": id }).await?;
            }
        }
        for rule in &rules {
            collection
                .insert_one(rule_to_document(project_id, database_id, rule))
                .await?;
        }

        self.cache.invalidate(project_id, database_id).await;
        debug!("Saved {} rules for {project_id}/{database_id}", rules.len());
        Ok(())
    }

    /// `LoadRules` (spec §4.F): reads the stored rule set, uncompiled, for
    /// inspection/editing callers (not the evaluation path, which goes
    /// through the cache).
    pub async fn load_rules(
        &self,
        project_id: &str,
        database_id: &str,
    ) -> RepositoryResult<Vec<SecurityRule>> {
        let collection = self.master.collection(COLLECTION);
        let docs = collection
            .find(
                doc! { "project_id": project_id, "database_id": database_id },
                Default::default(),
            )
            .await?;
        docs.iter().map(document_to_rule).collect()
    }

    /// `EvaluateAccess` (spec §4.F): default-denies on an invalid context, on
    /// no matching rule, and on no matching rule granting `op` once deny
    /// checks have cleared.
    pub async fn evaluate_access(
        &self,
        op: Op,
        project_id: &str,
        database_id: &str,
        path: &str,
        ctx: EvaluationContext,
    ) -> AccessDecision {
        let started = Instant::now();

        if project_id.is_empty() || database_id.is_empty() {
            return AccessDecision::invalid_context("missing project or database in context");
        }

        let master = self.master.clone();
        let load_project_id = project_id.to_string();
        let load_database_id = database_id.to_string();
        let compiled = match self
            .cache
            .get_or_compile(project_id, database_id, move || {
                let master = master.clone();
                let project_id = load_project_id.clone();
                let database_id = load_database_id.clone();
                async move { load_rules_from_storage(&master, &project_id, &database_id).await }
            })
            .await
        {
            Ok(rules) => rules,
            Err(err) => {
                return AccessDecision::invalid_context(format!("failed to load rules: {err}"));
            }
        };

        if compiled.is_empty() {
            let elapsed = elapsed_ms(started);
            return AccessDecision::default_deny("no matching rule found", elapsed);
        }

        let mut matching: Vec<(&cache::CompiledRule, BTreeMap<String, String>)> = compiled
            .iter()
            .filter_map(|rule| pattern::match_path(&rule.match_pattern, path).map(|vars| (rule, vars)))
            .collect();
        matching.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));

        if matching.is_empty() {
            let elapsed = elapsed_ms(started);
            return AccessDecision::default_deny("no matching rule found", elapsed);
        }

        for (rule, vars) in &matching {
            if let Some(ast) = rule.deny.get(&op) {
                let mut rule_ctx = ctx.clone();
                rule_ctx.variables = vars.clone();
                if expr::evaluate(self.cache.engine(), ast, &rule_ctx).unwrap_or(false) {
                    let elapsed = elapsed_ms(started);
                    return AccessDecision::denied_by_rule(rule.match_pattern.clone(), elapsed);
                }
            }
        }

        for (rule, vars) in &matching {
            if let Some(ast) = rule.allow.get(&op) {
                let mut rule_ctx = ctx.clone();
                rule_ctx.variables = vars.clone();
                if expr::evaluate(self.cache.engine(), ast, &rule_ctx).unwrap_or(false) {
                    let elapsed = elapsed_ms(started);
                    return AccessDecision::allowed_by_rule(rule.match_pattern.clone(), elapsed);
                }
            }
        }

        let elapsed = elapsed_ms(started);
        AccessDecision::default_deny("no matching rule found", elapsed)
    }

    pub async fn clear_cache(&self, project_id: &str, database_id: &str) {
        self.cache.invalidate(project_id, database_id).await;
    }

    pub async fn clear_all_cache(&self) {
        self.cache.clear_all().await;
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

async fn load_rules_from_storage(
    master: &Arc<dyn DatabaseProvider>,
    project_id: &str,
    database_id: &str,
) -> RepositoryResult<Vec<SecurityRule>> {
    let collection = master.collection(COLLECTION);
    let docs = collection
        .find(
            doc! { "project_id": project_id, "database_id": database_id },
            Default::default(),
        )
        .await?;
    docs.iter().map(document_to_rule).collect()
}

/// Validates the rule set as a whole (spec §4.F): priorities unique, and
/// each rule individually valid.
fn validate_rule_set(rules: &[SecurityRule]) -> RepositoryResult<()> {
    let mut seen_priorities = BTreeSet::new();
    for rule in rules {
        validate_rule(rule)?;
        if !seen_priorities.insert(rule.priority) {
            return Err(RepositoryError::invalid_argument(format!(
                "Duplicate rule priority: {}",
                rule.priority
            )));
        }
    }
    Ok(())
}

fn validate_rule(rule: &SecurityRule) -> RepositoryResult<()> {
    pattern::validate_match_pattern(&rule.match_pattern)
        .map_err(RepositoryError::invalid_argument)?;
    if rule.allow.is_empty() && rule.deny.is_empty() {
        return Err(RepositoryError::invalid_argument(format!(
            "Rule {} has no allow or deny conditions",
            rule.match_pattern
        )));
    }
    for expr in rule.allow.values().chain(rule.deny.values()) {
        if expr.trim().is_empty() {
            return Err(RepositoryError::invalid_argument(format!(
                "Rule {} has an empty condition expression",
                rule.match_pattern
            )));
        }
    }
    Ok(())
}

fn rule_to_document(project_id: &str, database_id: &str, rule: &SecurityRule) -> bson::Document {
    doc! {
        "_id": format!("{project_id}/{database_id}/{}", rule.priority),
        "project_id": project_id,
        "database_id": database_id,
        "match_pattern": &rule.match_pattern,
        "priority": rule.priority,
        "allow": ops_to_document(&rule.allow),
        "deny": ops_to_document(&rule.deny),
    }
}

fn ops_to_document(ops: &BTreeMap<Op, String>) -> bson::Document {
    let mut out = bson::Document::new();
    for (op, expr) in ops {
        out.insert(op.as_str(), expr.clone());
    }
    out
}

fn document_to_rule(doc: &bson::Document) -> RepositoryResult<SecurityRule> {
    let err = || RepositoryError::internal("Malformed security rule record");
    let match_pattern = doc.get_str("match_pattern").map_err(|_| err())?.to_string();
    let priority = doc.get_i64("priority").map_err(|_| err())?;
    let allow = document_to_ops(doc.get_document("allow").map_err(|_| err())?)?;
    let deny = document_to_ops(doc.get_document("deny").map_err(|_| err())?)?;
    Ok(SecurityRule {
        match_pattern,
        priority,
        allow,
        deny,
    })
}

fn document_to_ops(doc: &bson::Document) -> RepositoryResult<BTreeMap<Op, String>> {
    let err = || RepositoryError::internal("Malformed rule condition map");
    let mut out = BTreeMap::new();
    for (key, value) in doc {
        let op = Op::parse(key).ok_or_else(err)?;
        let expr = match value {
            Bson::String(s) => s.clone(),
            _ => return Err(err()),
        };
        out.insert(op, expr);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::fake::FakeDatabaseProvider;

    fn context() -> EvaluationContext {
        let mut auth = BTreeMap::new();
        auth.insert("uid".to_string(), "u1".to_string());
        let mut resource_data = BTreeMap::new();
        resource_data.insert(
            "ownerId".to_string(),
            crate::value::Value::String("u1".to_string()),
        );
        EvaluationContext {
            auth: Some(auth),
            request_data: BTreeMap::new(),
            resource_data,
            variables: BTreeMap::new(),
            timestamp_millis: 0,
        }
    }

    fn engine(master: Arc<dyn DatabaseProvider>) -> RulesEngine {
        RulesEngine::new(master, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn save_rejects_duplicate_priority() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        let rules = vec![
            SecurityRule::new("/orders/{id}".to_string(), 1).with_allow(Op::Read, "true"),
            SecurityRule::new("/invoices/{id}".to_string(), 1).with_allow(Op::Read, "true"),
        ];
        let err = engine.save_rules("p", "d", rules).await.unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn save_rejects_match_pattern_without_leading_slash() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        let rules = vec![SecurityRule::new("orders/{id}".to_string(), 1).with_allow(Op::Read, "true")];
        let err = engine.save_rules("p", "d", rules).await.unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn owner_matching_rule_allows_read() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        let rules = vec![SecurityRule::new("/orders/{id}".to_string(), 1)
            .with_allow(Op::Read, "auth.uid == resource.data.ownerId")];
        engine.save_rules("p", "d", rules).await.unwrap();

        let decision = engine
            .evaluate_access(Op::Read, "p", "d", "/orders/o1", context())
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.allowed_by.as_deref(), Some("/orders/{id}"));
    }

    #[tokio::test]
    async fn higher_priority_deny_wins_over_lower_priority_allow() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        let rules = vec![
            SecurityRule::new("/orders/{id}".to_string(), 1).with_allow(Op::Read, "true"),
            SecurityRule::new("/orders/{id}".to_string(), 2).with_deny(Op::Read, "true"),
        ];
        engine.save_rules("p", "d", rules).await.unwrap();

        let decision = engine
            .evaluate_access(Op::Read, "p", "d", "/orders/o1", context())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.denied_by.as_deref(), Some("/orders/{id}"));
    }

    #[tokio::test]
    async fn no_matching_rule_defaults_to_deny() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        engine
            .save_rules(
                "p",
                "d",
                vec![SecurityRule::new("/invoices/{id}".to_string(), 1).with_allow(Op::Read, "true")],
            )
            .await
            .unwrap();

        let decision = engine
            .evaluate_access(Op::Read, "p", "d", "/orders/o1", context())
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no matching rule found");
    }

    #[tokio::test]
    async fn missing_project_or_database_denies_with_reason() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        let decision = engine
            .evaluate_access(Op::Read, "", "d", "/orders/o1", context())
            .await;
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn clear_cache_forces_reevaluation_against_updated_rules() {
        let master: Arc<dyn DatabaseProvider> = Arc::new(FakeDatabaseProvider::new());
        let engine = engine(master);
        engine
            .save_rules(
                "p",
                "d",
                vec![SecurityRule::new("/orders/{id}".to_string(), 1).with_allow(Op::Read, "true")],
            )
            .await
            .unwrap();
        engine
            .evaluate_access(Op::Read, "p", "d", "/orders/o1", context())
            .await;

        // save_rules already invalidates internally; clear_cache covers the
        // case where rules were edited by a path other than save_rules.
        engine.clear_cache("p", "d").await;
        let decision = engine
            .evaluate_access(Op::Read, "p", "d", "/orders/o1", context())
            .await;
        assert!(decision.allowed);
    }
}
