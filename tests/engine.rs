use crate::common::engine;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use viaduct_engine::execution::instrumentation::FieldInfo;
use viaduct_engine::execution::instrumentation::Instrumentation;
use viaduct_engine::execution::instrumentation::OperationInfo;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::registry::VariableSource;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::FieldValue;
use viaduct_engine::ViaductEngine;

/// The driver honors `schema { query: ... }` declarations throughout.
#[tokio::test]
async fn custom_root_type_names() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "QueryRoot",
            "hello",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value("hi")) }),
        )
        .build();
    let engine = engine(
        r#"
        schema {
            query: QueryRoot
        }

        type QueryRoot {
            hello: String @resolver
        }
        "#,
        registry,
    );

    let result = engine
        .execute(ExecutionInput::new("{ hello }"), &SchemaId::Full)
        .await;
    assert_eq!(result.to_json(), json!({"data": {"hello": "hi"}}));
}

#[derive(Default)]
struct RecordingInstrumentation {
    events: Mutex<Vec<String>>,
}

impl Instrumentation for RecordingInstrumentation {
    fn operation_begin(&self, operation: &OperationInfo) {
        self.events
            .lock()
            .push(format!("operation_begin:{}", operation.operation_id));
    }

    fn operation_end(&self, _operation: &OperationInfo, error_count: usize) {
        self.events
            .lock()
            .push(format!("operation_end:{error_count}"));
    }

    fn field_fetch_begin(&self, field: &FieldInfo<'_>) {
        self.events
            .lock()
            .push(format!("fetch:{}.{}", field.type_name, field.field_name));
    }
}

/// Instrumentations are chained and observe the operation and field phases.
#[tokio::test]
async fn instrumentation_hooks_fire_in_order() {
    let first = Arc::new(RecordingInstrumentation::default());
    let second = Arc::new(RecordingInstrumentation::default());
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "greeting",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value("hello")) }),
        )
        .build();
    let engine = ViaductEngine::builder()
        .schema_sdl("type Query { greeting: String @resolver }")
        .registry(registry)
        .instrumentation(first.clone())
        .instrumentation(second.clone())
        .build()
        .expect("engine builds");

    let input = ExecutionInput::new("{ greeting }").operation_id("op-1");
    engine.execute(input, &SchemaId::Full).await;

    for recording in [&first, &second] {
        let events = recording.events.lock();
        assert_eq!(events.first().map(String::as_str), Some("operation_begin:op-1"));
        assert!(events.contains(&"fetch:Query.greeting".to_owned()));
        assert_eq!(events.last().map(String::as_str), Some("operation_end:0"));
    }
}

/// Resolver fragments are validated when the engine is assembled, not at
/// request time.
#[test]
fn invalid_required_selections_fail_engine_build() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "greeting",
            ResolverRegistration::default().with_object_rss("noSuchField"),
            resolver_fn(|_ctx| async { Ok(FieldValue::value("hello")) }),
        )
        .build();
    let error = ViaductEngine::builder()
        .schema_sdl("type Query { greeting: String @resolver }")
        .registry(registry)
        .build()
        .err()
        .expect("build should fail");
    assert!(error.to_string().contains("noSuchField"));
}

/// Variable declarations with list-traversing paths are rejected at build.
#[test]
fn list_traversal_in_variable_path_fails_engine_build() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "tags",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value(json!(["a"]))) }),
        )
        .field_resolver(
            "Query",
            "dependent",
            ResolverRegistration::default()
                .with_variable("t", VariableSource::from_query_field("tags")),
            resolver_fn(|_ctx| async { Ok(FieldValue::value("x")) }),
        )
        .build();
    let error = ViaductEngine::builder()
        .schema_sdl("type Query { tags: [String] @resolver, dependent: String @resolver }")
        .registry(registry)
        .build()
        .err()
        .expect("build should fail");
    assert!(error.to_string().contains("traverses a list"));
}
