//! Security rules data model (spec §4.F).

use std::collections::BTreeMap;

/// The operation a rule's `allow`/`deny` clause is keyed by. Firestore's own
/// rules language collapses `get`+`list` into `read` and `create`+`update`+
/// `delete` into `write`; both the granular and collapsed spellings are kept
/// here since the evaluator looks a requested op up directly with no
/// expansion — a rule author has to write `read` if that's the op callers
/// will request, just as a rule author has to write `get` if that's the one.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Op {
    Get,
    List,
    Read,
    Create,
    Update,
    Delete,
    Write,
}

impl Op {
    pub fn parse(raw: &str) -> Option<Op> {
        Some(match raw {
            "get" => Op::Get,
            "list" => Op::List,
            "read" => Op::Read,
            "create" => Op::Create,
            "update" => Op::Update,
            "delete" => Op::Delete,
            "write" => Op::Write,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Get => "get",
            Op::List => "list",
            Op::Read => "read",
            Op::Create => "create",
            Op::Update => "update",
            Op::Delete => "delete",
            Op::Write => "write",
        }
    }
}

/// One `(match, priority, allow, deny)` rule (spec §4.F). `allow`/`deny` map
/// an [`Op`] to the rhai boolean expression guarding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRule {
    pub match_pattern: String,
    pub priority: i64,
    pub allow: BTreeMap<Op, String>,
    pub deny: BTreeMap<Op, String>,
}

impl SecurityRule {
    pub fn new(match_pattern: String, priority: i64) -> Self {
        Self {
            match_pattern,
            priority,
            allow: BTreeMap::new(),
            deny: BTreeMap::new(),
        }
    }

    pub fn with_allow(mut self, op: Op, expr: impl Into<String>) -> Self {
        self.allow.insert(op, expr.into());
        self
    }

    pub fn with_deny(mut self, op: Op, expr: impl Into<String>) -> Self {
        self.deny.insert(op, expr.into());
        self
    }
}

/// The result of [`super::RulesEngine::evaluate_access`] (spec §4.F).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub allowed_by: Option<String>,
    pub denied_by: Option<String>,
    pub reason: String,
    pub rule_match: Option<String>,
    pub evaluation_time_ms: u64,
}

impl AccessDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            allowed_by: None,
            denied_by: None,
            reason: reason.into(),
            rule_match: None,
            evaluation_time_ms: 0,
        }
    }

    pub(crate) fn denied_by_rule(match_pattern: String, elapsed_ms: u64) -> Self {
        Self {
            allowed: false,
            allowed_by: None,
            denied_by: Some(match_pattern.clone()),
            reason: "denied by matching rule".to_string(),
            rule_match: Some(match_pattern),
            evaluation_time_ms: elapsed_ms,
        }
    }

    pub(crate) fn allowed_by_rule(match_pattern: String, elapsed_ms: u64) -> Self {
        Self {
            allowed: true,
            allowed_by: Some(match_pattern.clone()),
            denied_by: None,
            reason: "allowed by matching rule".to_string(),
            rule_match: Some(match_pattern),
            evaluation_time_ms: elapsed_ms,
        }
    }

    pub(crate) fn default_deny(reason: impl Into<String>, elapsed_ms: u64) -> Self {
        let mut decision = Self::deny(reason);
        decision.evaluation_time_ms = elapsed_ms;
        decision
    }

    pub(crate) fn invalid_context(reason: impl Into<String>) -> Self {
        Self::deny(reason)
    }
}
