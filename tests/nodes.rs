use crate::common::engine;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use viaduct_engine::registry::node_resolver_fn;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::FieldValue;
use viaduct_engine::ViaductError;

const SDL: &str = r#"
    type Query {
        currentUser: User @resolver
    }

    type User {
        id: ID!
        name: String
        bio: String
    }
"#;

/// A resolver can answer with a node reference carrying only the id; the
/// engine resolves the node's remaining fields through the type's node
/// resolver, once per node.
#[tokio::test]
async fn node_references_resolve_downstream() {
    let node_calls = Arc::new(AtomicUsize::new(0));
    let calls = node_calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "currentUser",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                let id = ctx.global_id_for("User", "42")?;
                ctx.node_for(&id)
            }),
        )
        .node_resolver(
            "User",
            node_resolver_fn(move |ctx| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let id = ctx
                        .node_id()
                        .ok_or_else(|| ViaductError::internal("node resolver without node id"))?;
                    assert_eq!(id.type_name, "User");
                    assert_eq!(id.internal_id, "42");
                    Ok(FieldValue::value(json!({
                        "name": "Robin",
                        "bio": "bridges between services",
                    })))
                }
            }),
        )
        .build();
    let engine = engine(SDL, registry);

    let result = engine
        .execute(
            ExecutionInput::new("{ currentUser { id name bio } }"),
            &SchemaId::Full,
        )
        .await;
    let json = result.to_json();

    // The id comes from the reference itself; the other fields come from
    // one node resolver invocation.
    assert_eq!(json["data"]["currentUser"]["name"], json!("Robin"));
    assert_eq!(
        json["data"]["currentUser"]["bio"],
        json!("bridges between services"),
    );
    assert!(json["data"]["currentUser"]["id"]
        .as_str()
        .unwrap()
        .contains("User"));
    assert_eq!(node_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn global_ids_require_the_node_marker() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "currentUser",
            ResolverRegistration::default(),
            resolver_fn(|ctx| async move {
                // Query has no `id: ID!` field, so it cannot carry a global id.
                match ctx.global_id_for("Query", "q") {
                    Ok(_) => Ok(FieldValue::value("unexpectedly allowed")),
                    Err(_) => Ok(FieldValue::Value(json!(null))),
                }
            }),
        )
        .build();
    let engine = engine(SDL, registry);

    let result = engine
        .execute(ExecutionInput::new("{ currentUser { name } }"), &SchemaId::Full)
        .await;
    assert_eq!(result.to_json(), json!({"data": {"currentUser": null}}));
}
