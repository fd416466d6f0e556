use crate::common::engine;
use serde_json::json;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use viaduct_engine::registry::checker_fn;
use viaduct_engine::registry::resolver_fn;
use viaduct_engine::registry::CheckerRegistration;
use viaduct_engine::registry::ResolverRegistration;
use viaduct_engine::registry::ResolverRegistry;
use viaduct_engine::response::ExecutionInput;
use viaduct_engine::schema::SchemaId;
use viaduct_engine::CheckerResult;
use viaduct_engine::FieldValue;
use viaduct_engine::PolicyError;

const DENIED_SDL: &str = "type Query { canNotAccessField: String @resolver }";

/// A denying field checker short-circuits the field to null before the
/// resolver ever runs.
#[tokio::test]
async fn denied_field_short_circuits_without_invoking_the_resolver() {
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let calls = resolver_calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "canNotAccessField",
            ResolverRegistration::default(),
            resolver_fn(move |_ctx| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(FieldValue::value("secret"))
                }
            }),
        )
        .field_checker(
            "Query",
            "canNotAccessField",
            CheckerRegistration::default(),
            checker_fn(|_ctx| async { CheckerResult::deny("access denied") }),
        )
        .build();
    let engine = engine(DENIED_SDL, registry);

    let result = engine
        .execute(ExecutionInput::new("{ canNotAccessField }"), &SchemaId::Full)
        .await;
    let json = result.to_json();

    assert_eq!(json["data"], json!({"canNotAccessField": null}));
    let errors = json["errors"].as_array().expect("denial is reported");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["canNotAccessField"]));
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 0);
}

/// A resolver-facing denial short-circuits the field even when a more
/// specific advisory failure is reported alongside it.
#[tokio::test]
async fn specific_advisory_failure_does_not_mask_a_denial() {
    let resolver_calls = Arc::new(AtomicUsize::new(0));
    let calls = resolver_calls.clone();
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "canNotAccessField",
            ResolverRegistration::default(),
            resolver_fn(move |_ctx| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(FieldValue::value("secret"))
                }
            }),
        )
        .field_checker(
            "Query",
            "canNotAccessField",
            CheckerRegistration::default(),
            checker_fn(|_ctx| async { CheckerResult::deny("hard deny") }),
        )
        .field_checker(
            "Query",
            "canNotAccessField",
            CheckerRegistration::default(),
            checker_fn(|_ctx| async {
                CheckerResult::Error(
                    PolicyError::new("loud advisory")
                        .for_resolver(false)
                        .with_specificity(5),
                )
            }),
        )
        .build();
    let engine = engine(DENIED_SDL, registry);

    let result = engine
        .execute(ExecutionInput::new("{ canNotAccessField }"), &SchemaId::Full)
        .await;
    let json = result.to_json();

    assert_eq!(json["data"], json!({"canNotAccessField": null}));
    let errors = json["errors"].as_array().expect("denial is reported");
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["message"].as_str().unwrap().contains("hard deny"));
    assert_eq!(resolver_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn advisory_checker_failures_let_the_resolver_run() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "openField",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value("ok")) }),
        )
        .field_checker(
            "Query",
            "openField",
            CheckerRegistration::default(),
            checker_fn(|_ctx| async {
                CheckerResult::Error(PolicyError::new("advisory only").for_resolver(false))
            }),
        )
        .build();
    let engine = engine("type Query { openField: String @resolver }", registry);

    let result = engine
        .execute(ExecutionInput::new("{ openField }"), &SchemaId::Full)
        .await;

    assert_eq!(result.to_json(), json!({"data": {"openField": "ok"}}));
}

const TYPE_CHECK_SDL: &str = r#"
    type Query {
        report: Report @resolver
    }

    type Report {
        title: String
    }
"#;

/// A type checker on the resolved value renders the producing field null
/// with a single error.
#[tokio::test]
async fn failing_type_checker_nulls_the_field() {
    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "report",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value(json!({"title": "q3"}))) }),
        )
        .type_checker(
            "Report",
            CheckerRegistration::default(),
            checker_fn(|_ctx| async { CheckerResult::deny("reports are restricted") }),
        )
        .build();
    let engine = engine(TYPE_CHECK_SDL, registry);

    let result = engine
        .execute(
            ExecutionInput::new("{ report { title } }"),
            &SchemaId::Full,
        )
        .await;
    let json = result.to_json();

    assert_eq!(json["data"], json!({"report": null}));
    let errors = json["errors"].as_array().expect("denial is reported");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["report"]));
    assert!(errors[0]["message"]
        .as_str()
        .unwrap()
        .contains("reports are restricted"));
}

#[tokio::test]
async fn checks_can_be_disabled_globally() {
    use viaduct_engine::flags::Flag;
    use viaduct_engine::flags::StaticFlagManager;

    let registry = ResolverRegistry::builder()
        .field_resolver(
            "Query",
            "canNotAccessField",
            ResolverRegistration::default(),
            resolver_fn(|_ctx| async { Ok(FieldValue::value("secret")) }),
        )
        .field_checker(
            "Query",
            "canNotAccessField",
            CheckerRegistration::default(),
            checker_fn(|_ctx| async { CheckerResult::deny("access denied") }),
        )
        .build();
    let engine = viaduct_engine::ViaductEngine::builder()
        .schema_sdl(DENIED_SDL)
        .registry(registry)
        .flag_manager(Arc::new(
            StaticFlagManager::new().disable(Flag::ExecuteAccessChecks),
        ))
        .build()
        .expect("engine builds");

    let result = engine
        .execute(ExecutionInput::new("{ canNotAccessField }"), &SchemaId::Full)
        .await;
    assert_eq!(
        result.to_json(),
        json!({"data": {"canNotAccessField": "secret"}}),
    );
}
