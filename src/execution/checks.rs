use crate::execution::context::SelectionView;
use async_trait::async_trait;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::sync::Arc;

/// Whether a checker gates a field fetch or a resolved type value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum CheckKind {
    #[strum(to_string = "field")]
    Field,
    #[strum(to_string = "type")]
    Type,
}

/// What a policy checker sees: the gated field's arguments, its own
/// materialized required selections, and the embedder's request context.
pub struct CheckerContext {
    pub(crate) arguments: JsonMap<String, JsonValue>,
    pub(crate) object_view: SelectionView,
    pub(crate) query_view: SelectionView,
    pub(crate) request_context: Option<Arc<dyn Any + Send + Sync>>,
    pub(crate) kind: CheckKind,
}

impl CheckerContext {
    pub fn arguments(&self) -> &JsonMap<String, JsonValue> {
        &self.arguments
    }

    pub fn object_value(&self) -> &SelectionView {
        &self.object_view
    }

    pub fn query_value(&self) -> &SelectionView {
        &self.query_view
    }

    pub fn request_context(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.request_context.as_ref()
    }

    pub fn kind(&self) -> CheckKind {
        self.kind
    }
}

/// A policy failure, with the policy governing how it is applied.
#[derive(Debug, Clone)]
pub struct PolicyError {
    message: String,
    error_for_resolver: bool,
    /// Combination weight: when several checkers fail, the most specific
    /// error wins. Ties keep the earliest.
    specificity: u32,
}

impl PolicyError {
    pub fn new(message: impl Into<String>) -> Self {
        PolicyError {
            message: message.into(),
            error_for_resolver: true,
            specificity: 0,
        }
    }

    /// When false, the failure is recorded but does not short-circuit the
    /// resolver.
    pub fn for_resolver(mut self, error_for_resolver: bool) -> Self {
        self.error_for_resolver = error_for_resolver;
        self
    }

    pub fn with_specificity(mut self, specificity: u32) -> Self {
        self.specificity = specificity;
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_error_for_resolver(&self) -> bool {
        self.error_for_resolver
    }

    /// Monoidal composition of two failures: prefer the more specific.
    pub fn combine(self, other: PolicyError) -> PolicyError {
        if other.specificity > self.specificity {
            other
        } else {
            self
        }
    }
}

/// The outcome of one checker run.
pub enum CheckerResult {
    Success,
    Error(PolicyError),
}

impl CheckerResult {
    pub fn deny(message: impl Into<String>) -> Self {
        CheckerResult::Error(PolicyError::new(message))
    }
}

/// A policy checker attached to a field or type. Instances are constructed
/// per invocation; the checker's declared selections are materialized before
/// it runs.
#[async_trait]
pub trait PolicyChecker: Send + Sync {
    async fn check(&self, ctx: CheckerContext) -> CheckerResult;
}

/// Folds checker failures into the single governing error, if any.
pub(crate) fn combine_errors(errors: Vec<PolicyError>) -> Option<PolicyError> {
    let mut errors = errors.into_iter();
    let first = errors.next()?;
    Some(errors.fold(first, PolicyError::combine))
}

/// Splits checker failures into the resolver-facing denial that governs the
/// field and the combined advisory-only failure. Any resolver-facing error
/// short-circuits the field; `combine` only arbitrates within each
/// partition, so an advisory failure can never mask a denial however
/// specific it is.
pub(crate) fn partition_errors(
    errors: Vec<PolicyError>,
) -> (Option<PolicyError>, Option<PolicyError>) {
    let (blocking, advisory): (Vec<PolicyError>, Vec<PolicyError>) = errors
        .into_iter()
        .partition(PolicyError::is_error_for_resolver);
    (combine_errors(blocking), combine_errors(advisory))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_prefers_the_most_specific_error() {
        let combined = combine_errors(vec![
            PolicyError::new("broad").with_specificity(1),
            PolicyError::new("narrow").with_specificity(5),
            PolicyError::new("middling").with_specificity(3),
        ])
        .unwrap();
        assert_eq!(combined.message(), "narrow");
    }

    #[test]
    fn combine_keeps_the_earliest_on_ties() {
        let combined = combine_errors(vec![
            PolicyError::new("first"),
            PolicyError::new("second"),
        ])
        .unwrap();
        assert_eq!(combined.message(), "first");
    }

    #[test]
    fn no_errors_combine_to_none() {
        assert!(combine_errors(Vec::new()).is_none());
    }

    #[test]
    fn advisory_errors_never_mask_a_denial() {
        let (blocking, advisory) = partition_errors(vec![
            PolicyError::new("hard deny"),
            PolicyError::new("loud advisory")
                .for_resolver(false)
                .with_specificity(5),
        ]);
        assert_eq!(blocking.unwrap().message(), "hard deny");
        assert_eq!(advisory.unwrap().message(), "loud advisory");
    }
}
