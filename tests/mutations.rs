use crate::common::engine;
use crate::common::engine_with_subqueries;
use serde_json::json;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use parking_lot::Mutex;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::FieldValue;

const MUTATION_SDL: &str = r#"
    type Query {
        ping: String
    }

    type Mutation {
        first: String @resolver
        second: String @resolver
    }
"#;

/// Top-level mutation fields are serialized: the first completes before the
/// second starts, even when the first suspends.
#[tokio::test]
async fn mutation_fields_run_serially() {
    let spans: Arc<Mutex<Vec<(String, Instant)>>> = Arc::new(Mutex::new(Vec::new()));
    let first_spans = spans.clone();
    let second_spans = spans.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Mutation",
            "first",
            ResolverRegistration::default(),
            resolver_fn(move |_ctx| {
                let spans = first_spans.clone();
                async move {
                    spans.lock().push(("first:start".to_owned(), Instant::now()));
                    tokio::time::sleep(Duration::from_millis(25)).await;
                    spans.lock().push(("first:end".to_owned(), Instant::now()));
                    Ok(FieldValue::value("one"))
                }
            }),
        )
        .field_resolver(
            "Mutation",
            "second",
            ResolverRegistration::default(),
            resolver_fn(move |_ctx| {
                let spans = second_spans.clone();
                async move {
                    spans.lock().push(("second:start".to_owned(), Instant::now()));
                    Ok(FieldValue::value("two"))
                }
            }),
        )
        .build();
    let engine = engine(MUTATION_SDL, registry);

    let result = engine
        .execute(
            ExecutionInput::new("mutation { first second }"),
            &SchemaId::Full,
        )
        .await;

    assert_eq!(
        result.to_json(),
        json!({"data": {"first": "one", "second": "two"}}),
    );
    let spans = spans.lock();
    let order: Vec<&str> = spans.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(order, vec!["first:start", "first:end", "second:start"]);
    let end_of_first = spans[1].1;
    let start_of_second = spans[2].1;
    assert!(end_of_first <= start_of_second);
}

const TRI_SDL: &str = r#"
    type Query {
        ping: String
    }

    type Mutation {
        tri(n: Int!): Int @resolver
    }
"#;

/// A mutation resolver recursing through submutations: tri(4) computes
/// 4 + 3 + 2 + 1 by re-entering the engine against the same request.
#[tokio::test]
async fn recursive_submutation() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Mutation",
            "tri",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                let n = ctx
                    .argument("n")
                    .and_then(JsonValue::as_i64)
                    .unwrap_or_default();
                if n <= 1 {
                    return Ok(FieldValue::value(1));
                }
                let selections =
                    ctx.selections_for("Mutation", &format!("tri(n: {})", n - 1), JsonMap::new())?;
                let inner = ctx.mutation(selections).await?;
                let inner = inner.get_i64("tri")?.unwrap_or_default();
                Ok(FieldValue::value(n + inner))
            }),
        )
        .build();
    let engine = engine_with_subqueries(TRI_SDL, registry);

    let result = engine
        .execute(ExecutionInput::new("mutation { tri(n: 4) }"), &SchemaId::Full)
        .await;
    assert_eq!(result.to_json(), json!({"data": {"tri": 10}}));

    let base_case = engine
        .execute(ExecutionInput::new("mutation { tri(n: 1) }"), &SchemaId::Full)
        .await;
    assert_eq!(base_case.to_json(), json!({"data": {"tri": 1}}));
}

const NESTED_SDL: &str = r#"
    type Query {
        ping: String
    }

    type Mutation {
        createUser: User @resolver
        touch: Int @resolver
    }

    type User {
        id: ID!
        posts: [String] @resolver
    }
"#;

/// Only resolvers of mutation root fields may submutate: a resolver nested
/// under a mutation's result is denied even though it runs inside a
/// mutation operation.
#[tokio::test]
async fn nested_resolvers_cannot_submutate() {
    let touch_calls = Arc::new(AtomicUsize::new(0));
    let calls = touch_calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Mutation",
            "createUser",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value(json!({"id": "u1"}))) }),
        )
        .field_resolver(
            "Mutation",
            "touch",
            ResolverRegistration::default(),
            resolver_fn(move |_ctx| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(FieldValue::value(1))
                }
            }),
        )
        .field_resolver(
            "User",
            "posts",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                let selections = ctx.selections_for("Mutation", "touch", JsonMap::new())?;
                ctx.mutation(selections).await?;
                Ok(FieldValue::value(json!(["unexpected"])))
            }),
        )
        .build();
    let engine = engine_with_subqueries(NESTED_SDL, registry);

    let result = engine
        .execute(
            ExecutionInput::new("mutation { createUser { id posts } }"),
            &SchemaId::Full,
        )
        .await;
    let json = result.to_json();

    assert_eq!(json["data"]["createUser"]["id"], json!("u1"));
    assert_eq!(json["data"]["createUser"]["posts"], JsonValue::Null);
    let errors = json["errors"].as_array().expect("denial is reported");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["createUser", "posts"]));
    assert!(errors[0]["message"]
        .as_str()
        .unwrap()
        .contains("mutation root fields"));
    assert_eq!(touch_calls.load(Ordering::SeqCst), 0);
}
