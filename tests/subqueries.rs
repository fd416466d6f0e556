use crate::common::engine;
use crate::common::engine_with_subqueries;
use serde_json::json;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::FieldValue;

const ECHO_SDL: &str = r#"
    type Query {
        outer(x: String): String @resolver
        inner(v: String): String @resolver
    }
"#;

fn echo_registry() -> ResolverRegistry {
    ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "outer",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                // The subquery must not inherit $x from the outer operation.
                let selections =
                    ctx.selections_for("Query", "inner(v: $x)", JsonMap::new())?;
                let inner = ctx.query(selections).await?;
                let seen = inner
                    .get_str("inner")?
                    .unwrap_or("<absent>")
                    .to_owned();
                Ok(FieldValue::value(seen))
            }),
        )
        .field_resolver(
            "Query",
            "inner",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                match ctx.argument("v") {
                    Some(JsonValue::String(v)) => Ok(FieldValue::value(format!("saw:{v}"))),
                    _ => Ok(FieldValue::value("saw:null")),
                }
            }),
        )
        .build()
}

/// The outer operation's variables are not visible to subqueries unless
/// passed explicitly.
#[tokio::test]
async fn subquery_variables_are_isolated() {
    let engine = engine_with_subqueries(ECHO_SDL, echo_registry());
    let result = engine
        .execute(
            ExecutionInput::new("query($x: String) { outer(x: $x) }")
                .variable("x", "sekrit"),
            &SchemaId::Full,
        )
        .await;
    assert_eq!(result.to_json(), json!({"data": {"outer": "saw:null"}}));
}

#[tokio::test]
async fn explicitly_passed_variables_reach_the_subquery() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "outer",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                let mut variables = JsonMap::new();
                variables.insert("x".to_owned(), JsonValue::String("handed".to_owned()));
                let selections = ctx.selections_for("Query", "inner(v: $x)", variables)?;
                let inner = ctx.query(selections).await?;
                Ok(FieldValue::value(
                    inner.get_str("inner")?.unwrap_or_default().to_owned(),
                ))
            }),
        )
        .field_resolver(
            "Query",
            "inner",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                match ctx.argument("v") {
                    Some(JsonValue::String(v)) => Ok(FieldValue::value(format!("saw:{v}"))),
                    _ => Ok(FieldValue::value("saw:null")),
                }
            }),
        )
        .build();
    let engine = engine_with_subqueries(ECHO_SDL, registry);
    let result = engine
        .execute(ExecutionInput::new("{ outer }"), &SchemaId::Full)
        .await;
    assert_eq!(result.to_json(), json!({"data": {"outer": "saw:handed"}}));
}

/// Subqueries share the request's memoized results: a field the operation
/// already resolved is not recomputed for the subquery.
#[tokio::test]
async fn subqueries_deduplicate_against_the_operation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted_calls = calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "counted",
            ResolverRegistration::default(),
            resolver_fn(move |_ctx| {
                let calls = counted_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(FieldValue::value(7))
                }
            }),
        )
        .field_resolver(
            "Query",
            "viaSubquery",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                let selections = ctx.selections_for("Query", "counted", JsonMap::new())?;
                let view = ctx.query(selections).await?;
                Ok(FieldValue::value(view.get_i64("counted")?.unwrap_or_default()))
            }),
        )
        .build();
    let engine = engine_with_subqueries(
        "type Query { counted: Int @resolver, viaSubquery: Int @resolver }",
        registry,
    );

    let result = engine
        .execute(
            ExecutionInput::new("{ counted viaSubquery }"),
            &SchemaId::Full,
        )
        .await;
    assert_eq!(
        result.to_json(),
        json!({"data": {"counted": 7, "viaSubquery": 7}}),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Without the enabling flag, the re-entry surface is closed.
#[tokio::test]
async fn subqueries_require_the_flag() {
    let engine = engine(ECHO_SDL, echo_registry());
    let result = engine
        .execute(ExecutionInput::new("{ outer }"), &SchemaId::Full)
        .await;
    let json = result.to_json();
    assert_eq!(json["data"], json!({"outer": null}));
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["outer"]));
}
