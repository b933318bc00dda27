//! Rule-expression evaluation (spec §4.F): condition expressions are
//! compiled and run with `rhai`, the embedded scripting engine spec §9's
//! design notes call for. Each expression sees four bound variables: `auth`
//! (the caller's claims, or unit if unauthenticated), `variables` (the path
//! variables a rule's `match` pattern captured), `request` (with a `data`
//! field for the incoming write), `resource` (with a `data` field for the
//! document as currently stored), and `timestamp` (epoch milliseconds).

use crate::value::Value;
use rhai::{Dynamic, Engine, Map as RhaiMap, Scope, AST};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct EvaluationContext {
    pub auth: Option<BTreeMap<String, String>>,
    pub request_data: BTreeMap<String, Value>,
    pub resource_data: BTreeMap<String, Value>,
    pub variables: BTreeMap<String, String>,
    pub timestamp_millis: i64,
}

pub fn engine() -> Engine {
    Engine::new()
}

/// Compiles `source` as a boolean rhai expression. Compile failures are the
/// caller's signal to skip the owning rule rather than fail evaluation.
pub fn compile(engine: &Engine, source: &str) -> Result<AST, String> {
    engine
        .compile_expression(source)
        .map_err(|err| err.to_string())
}

/// Evaluates a compiled expression against a context, defaulting to `false`
/// if the expression doesn't resolve to a boolean.
pub fn evaluate(engine: &Engine, ast: &AST, ctx: &EvaluationContext) -> Result<bool, String> {
    let mut scope = build_scope(ctx);
    engine
        .eval_ast_with_scope::<bool>(&mut scope, ast)
        .map_err(|err| err.to_string())
}

fn build_scope(ctx: &EvaluationContext) -> Scope<'static> {
    let mut scope = Scope::new();

    let auth_dynamic = match &ctx.auth {
        Some(claims) => Dynamic::from(string_map_to_rhai(claims)),
        None => Dynamic::UNIT,
    };
    scope.push("auth", auth_dynamic);

    scope.push("variables", Dynamic::from(string_map_to_rhai(&ctx.variables)));

    let mut request = RhaiMap::new();
    request.insert("data".into(), Dynamic::from(fields_to_rhai(&ctx.request_data)));
    scope.push("request", Dynamic::from(request));

    let mut resource = RhaiMap::new();
    resource.insert("data".into(), Dynamic::from(fields_to_rhai(&ctx.resource_data)));
    scope.push("resource", Dynamic::from(resource));

    scope.push("timestamp", ctx.timestamp_millis);

    scope
}

fn string_map_to_rhai(map: &BTreeMap<String, String>) -> RhaiMap {
    let mut out = RhaiMap::new();
    for (k, v) in map {
        out.insert(k.into(), Dynamic::from(v.clone()));
    }
    out
}

fn fields_to_rhai(fields: &BTreeMap<String, Value>) -> RhaiMap {
    let mut out = RhaiMap::new();
    for (k, v) in fields {
        out.insert(k.into(), value_to_dynamic(v));
    }
    out
}

fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Int64(i) => Dynamic::from(*i),
        Value::Double(d) => Dynamic::from(*d),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Bytes(_) => Dynamic::UNIT,
        Value::Timestamp(t) => Dynamic::from(t.timestamp_millis()),
        Value::Reference(r) => Dynamic::from(r.clone()),
        Value::GeoPoint(g) => {
            let mut map = RhaiMap::new();
            map.insert("latitude".into(), Dynamic::from(g.latitude));
            map.insert("longitude".into(), Dynamic::from(g.longitude));
            Dynamic::from(map)
        }
        Value::Array(values) => {
            Dynamic::from(values.iter().map(value_to_dynamic).collect::<Vec<_>>())
        }
        Value::Map(fields) => Dynamic::from(fields_to_rhai(fields)),
    }
}
