use crate::common::engine;
use serde_json::json;
use serde_json::Value as JsonValue;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use viaduct_engine::registry::batch_resolver_fn;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::FieldValue;
use viaduct_engine::ViaductError;

/// One engine-result key, one resolver invocation: aliases with identical
/// arguments share the computation.
#[tokio::test]
async fn identical_selections_deduplicate() {
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
                    Ok(FieldValue::value(11))
                }
            }),
        )
        .build();
    let engine = engine("type Query { counted: Int @resolver }", registry);

    let result = engine
        .execute(
            ExecutionInput::new("{ first: counted second: counted }"),
            &SchemaId::Full,
        )
        .await;

    assert_eq!(
        result.to_json(),
        json!({"data": {"first": 11, "second": 11}}),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Distinct arguments are distinct keys: no false sharing.
#[tokio::test]
async fn distinct_arguments_do_not_share() {
    let calls = Arc::new(AtomicUsize::new(0));
    let echo_calls = calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "echo",
            ResolverRegistration::default(),
            resolver_fn(move |ctx| {
                let calls = echo_calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(FieldValue::value(
                        ctx.argument("v").cloned().unwrap_or(JsonValue::Null),
                    ))
                }
            }),
        )
        .build();
    let engine = engine("type Query { echo(v: Int): Int @resolver }", registry);

    let result = engine
        .execute(
            ExecutionInput::new("{ a: echo(v: 1) b: echo(v: 2) c: echo(v: 1) }"),
            &SchemaId::Full,
        )
        .await;

    assert_eq!(
        result.to_json(),
        json!({"data": {"a": 1, "b": 2, "c": 1}}),
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

const RSS_SDL: &str = r#"
    type Query {
        item: Item @resolver
    }

    type Item {
        id: ID!
        name: String
        declared: String @resolver
        undeclared: String @resolver
    }
"#;

fn rss_registry() -> ResolverRegistry {
    ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "item",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async {
                Ok(FieldValue::value(json!({"id": "i1", "name": "widget"})))
            }),
        )
        .field_resolver(
            "Item",
            "declared",
            ResolverRegistration::default().with_object_rss("fragment _ on Item { id name }"),
            resolver_fn(|ctx| async move {
                let id = ctx.object_value().get_str("id")?.unwrap_or_default();
                let name = ctx.object_value().get_str("name")?.unwrap_or_default();
                Ok(FieldValue::value(format!("{id}/{name}")))
            }),
        )
        .field_resolver(
            "Item",
            "undeclared",
            ResolverRegistration::default().with_object_rss("id"),
            resolver_fn(|ctx| async move {
                // `name` is not part of this resolver's required selections.
                let name = ctx.object_value().get_str("name")?;
                Ok(FieldValue::value(name.unwrap_or_default()))
            }),
        )
        .build()
}

/// Fields declared in the object RSS are readable; anything else raises
/// the unrequested-selection programmer error.
#[tokio::test]
async fn rss_completeness() {
    let engine = engine(RSS_SDL, rss_registry());

    let result = engine
        .execute(
            ExecutionInput::new("{ item { declared undeclared } }"),
            &SchemaId::Full,
        )
        .await;
    let json = result.to_json();

    assert_eq!(json["data"]["item"]["declared"], json!("i1/widget"));
    assert_eq!(json["data"]["item"]["undeclared"], JsonValue::Null);
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["item", "undeclared"]));
    assert!(errors[0]["message"].as_str().unwrap().contains("declared"));
}

const FAILING_SDL: &str = r#"
    type Query {
        alpha: String @resolver
        beta: String @resolver
    }
"#;

fn failing_registry() -> ResolverRegistry {
    ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "alpha",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async {
                Err::<FieldValue, _>(ViaductError::internal("alpha broke"))
            }),
        )
        .field_resolver(
            "Query",
            "beta",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async {
                Err::<FieldValue, _>(ViaductError::internal("beta broke"))
            }),
        )
        .build()
}

/// Errors are emitted sorted by (path, message), independently of the
/// selection order, and stably across runs.
#[tokio::test]
async fn errors_sort_by_path_then_message() {
    let engine = engine(FAILING_SDL, failing_registry());

    let mut runs = Vec::new();
    for _ in 0..2 {
        let result = engine
            .execute(ExecutionInput::new("{ beta alpha }"), &SchemaId::Full)
            .await;
        runs.push(result.to_json());
    }

    for json in &runs {
        let paths: Vec<&JsonValue> = json["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|error| &error["path"])
            .collect();
        assert_eq!(paths, vec![&json!(["alpha"]), &json!(["beta"])]);
        // The response map itself keeps the textual selection order.
        let keys: Vec<&String> = json["data"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["beta", "alpha"]);
    }
    assert_eq!(runs[0], runs[1]);
}

/// A batch resolver that breaks the positional contract fails every
/// context in the batch.
#[tokio::test]
async fn batch_contract_violation_fails_the_batch() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "items",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async {
                Ok(FieldValue::value(json!([{"id": "1"}, {"id": "2"}])))
            }),
        )
        .field_resolver(
            "Item",
            "value",
            ResolverRegistration::default().batched(),
            batch_resolver_fn(|_ctxs| async {
                // Wrong length on purpose.
                Ok(vec![FieldValue::value(1)])
            }),
        )
        .build();
    let engine = engine(
        r#"
        type Query { items: [Item] @resolver }
        type Item { id: ID!, value: Int @resolver }
        "#,
        registry,
    );

    let result = engine
        .execute(
            ExecutionInput::new("{ items { value } }"),
            &SchemaId::Full,
        )
        .await;
    let json = result.to_json();

    assert_eq!(
        json["data"]["items"],
        json!([{"value": null}, {"value": null}]),
    );
    let errors = json["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 2);
    for error in errors {
        assert!(error["message"].as_str().unwrap().contains("contract"));
    }
}

/// A field's object RSS and query RSS resolve as one tick: a batched field
/// required by both fragments is delivered in a single batch call.
#[tokio::test]
async fn object_and_query_rss_share_one_tick() {
    let batch_calls = Arc::new(AtomicUsize::new(0));
    let calls = batch_calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "left",
            ResolverRegistration::default()
                .with_object_rss("b(v: 1)")
                .with_query_rss("fragment _ on Query { b(v: 2) }"),
            resolver_fn(|ctx| async move {
                let from_object = ctx.object_value().get_i64("b")?.unwrap_or_default();
                let from_query = ctx.query_value().get_i64("b")?.unwrap_or_default();
                Ok(FieldValue::value(format!("{from_object}/{from_query}")))
            }),
        )
        .field_resolver(
            "Query",
            "b",
            ResolverRegistration::default().batched(),
            batch_resolver_fn(move |ctxs| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ctxs
                        .iter()
                        .map(|ctx| {
                            FieldValue::value(
                                ctx.argument("v").cloned().unwrap_or(JsonValue::Null),
                            )
                        })
                        .collect())
                }
            }),
        )
        .build();
    let engine = engine(
        "type Query { left: String @resolver, b(v: Int): Int @resolver }",
        registry,
    );

    let result = engine
        .execute(ExecutionInput::new("{ left }"), &SchemaId::Full)
        .await;

    assert_eq!(result.to_json(), json!({"data": {"left": "1/2"}}));
    assert_eq!(batch_calls.load(Ordering::SeqCst), 1);
}

/// Plans are content-addressed and shared across executions.
#[tokio::test]
async fn plans_are_cached_by_fingerprint() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "counted",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value(1)) }),
        )
        .build();
    let engine = engine("type Query { counted: Int @resolver }", registry);

    let first = engine
        .plan_operation("{ counted }", None, &SchemaId::Full)
        .unwrap();
    let second = engine
        .plan_operation("{ counted }", None, &SchemaId::Full)
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.fingerprint(), second.fingerprint());

    let different = engine
        .plan_operation("{ other: counted }", None, &SchemaId::Full)
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &different));
}

/// Cancelling before execution fails the request's cells with the
/// cancellation kind instead of running resolvers.
#[tokio::test]
async fn cancellation_short_circuits_execution() {
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
                    Ok(FieldValue::value(1))
                }
            }),
        )
        .build();
    let engine = engine("type Query { counted: Int @resolver }", registry);

    let input = ExecutionInput::new("{ counted }");
    input.cancellation.cancel();
    let result = engine.execute(input, &SchemaId::Full).await;
    let json = result.to_json();

    assert_eq!(json["data"], json!({"counted": null}));
    assert!(!json["errors"].as_array().unwrap().is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
