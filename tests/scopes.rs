use crate::common::engine;
use serde_json::json;
use serde_json::Value as JsonValue;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::FieldValue;
use viaduct_engine::ViaductEngine;

const SDL: &str = r#"
    type Query {
        user: User @resolver
    }

    type User @scope(to: ["public", "internal"]) {
        id: ID!
        name: String @scope(to: ["public", "internal"])
        email: String @scope(to: ["internal"])
    }
"#;

fn scoped_engine() -> ViaductEngine {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "user",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async {
                Ok(FieldValue::value(json!({
                    "id": "u1",
                    "name": "Kai",
                    "email": "kai@example.com",
                })))
            }),
        )
        .build();
    engine(SDL, registry)
}

/// Selecting a field outside the request's scopes is a validation failure
/// against the filtered schema; the same query succeeds under a scope that
/// exposes the field.
#[tokio::test]
async fn scope_filtering_gates_field_selection() {
    let engine = scoped_engine();
    let query = "{ user { email } }";

    let public = engine
        .execute(
            ExecutionInput::new(query),
            &SchemaId::scoped("public", ["public"]),
        )
        .await;
    let public_json = public.to_json();
    assert_eq!(public_json["data"], JsonValue::Null);
    assert!(
        !public_json["errors"].as_array().unwrap().is_empty(),
        "expected a validation error under the public scope",
    );

    let internal = engine
        .execute(
            ExecutionInput::new(query),
            &SchemaId::scoped("internal", ["internal"]),
        )
        .await;
    assert_eq!(
        internal.to_json(),
        json!({"data": {"user": {"email": "kai@example.com"}}}),
    );
}

#[tokio::test]
async fn in_scope_fields_resolve_under_the_narrow_view() {
    let engine = scoped_engine();
    let result = engine
        .execute(
            ExecutionInput::new("{ user { id name } }"),
            &SchemaId::scoped("public", ["public"]),
        )
        .await;
    assert_eq!(
        result.to_json(),
        json!({"data": {"user": {"id": "u1", "name": "Kai"}}}),
    );
}

#[tokio::test]
async fn schema_id_none_fails_every_request() {
    let engine = scoped_engine();
    let result = engine
        .execute(ExecutionInput::new("{ user { id } }"), &SchemaId::None)
        .await;
    let json = result.to_json();
    assert_eq!(json["data"], JsonValue::Null);
    assert!(!json["errors"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn empty_scope_sets_are_rejected() {
    let engine = scoped_engine();
    let result = engine
        .execute(
            ExecutionInput::new("{ user { id } }"),
            &SchemaId::scoped("empty", Vec::<String>::new()),
        )
        .await;
    let json = result.to_json();
    assert_eq!(json["data"], JsonValue::Null);
    assert!(!json["errors"].as_array().unwrap().is_empty());
}
