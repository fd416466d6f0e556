use apollo_compiler::validation::DiagnosticList;
use apollo_compiler::validation::WithErrors;
use itertools::Itertools;
use serde::Serialize;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Write;

/// One engine failure. Each variant is a distinct failure kind with enough
/// context to build a user-facing GraphQL error from it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SingleViaductError {
    #[error("{message}")]
    SchemaValidation { message: String },
    #[error("invalid operation: {message}")]
    OperationValidation { message: String },
    #[error("invalid resolver fragment: {message}")]
    InvalidFragment { message: String },
    #[error("unknown field \"{field_name}\" on type \"{type_name}\"")]
    UnknownField {
        type_name: String,
        field_name: String,
    },
    #[error("variable \"${variable}\" is bound to \"{path}\" of type \"{actual}\", but is used as \"{expected}\"")]
    IncompatibleVariableType {
        variable: String,
        path: String,
        actual: String,
        expected: String,
    },
    #[error("variable \"${variable}\" path \"{path}\" traverses a list at \"{segment}\"")]
    ListTraversalInVariablePath {
        variable: String,
        path: String,
        segment: String,
    },
    #[error("variable \"${variable}\" path \"{path}\" may be null, but the variable is used in a non-null position")]
    NullabilityMismatch { variable: String, path: String },
    #[error("selection \"{field_name}\" was not declared in the required selection set of \"{type_name}\"")]
    UnrequestedSelection {
        type_name: String,
        field_name: String,
    },
    #[error("resolver for \"{coordinate}\" failed: {message}")]
    ResolverError { coordinate: String, message: String },
    #[error("could not construct resolver for \"{coordinate}\": {message}")]
    ResolverConstructionError { coordinate: String, message: String },
    #[error("batch resolver for \"{coordinate}\" broke its contract: {message}")]
    BatchResolverContractError { coordinate: String, message: String },
    #[error("access denied for \"{coordinate}\": {message}")]
    PolicyDenied { coordinate: String, message: String },
    #[error("subquery execution failed: {message}")]
    SubqueryExecution { message: String },
    #[error("operation was cancelled")]
    Cancelled,
    #[error("{message}")]
    Internal { message: String },
}

impl SingleViaductError {
    /// A stable machine-readable code for the failure kind, surfaced in error
    /// extensions.
    pub fn code(&self) -> &'static str {
        match self {
            SingleViaductError::SchemaValidation { .. } => "SCHEMA_VALIDATION",
            SingleViaductError::OperationValidation { .. } => "OPERATION_VALIDATION",
            SingleViaductError::InvalidFragment { .. } => "INVALID_FRAGMENT",
            SingleViaductError::UnknownField { .. } => "UNKNOWN_FIELD",
            SingleViaductError::IncompatibleVariableType { .. } => "INCOMPATIBLE_VARIABLE_TYPE",
            SingleViaductError::ListTraversalInVariablePath { .. } => {
                "LIST_TRAVERSAL_IN_VARIABLE_PATH"
            }
            SingleViaductError::NullabilityMismatch { .. } => "NULLABILITY_MISMATCH",
            SingleViaductError::UnrequestedSelection { .. } => "UNREQUESTED_SELECTION",
            SingleViaductError::ResolverError { .. } => "RESOLVER_ERROR",
            SingleViaductError::ResolverConstructionError { .. } => "RESOLVER_CONSTRUCTION_ERROR",
            SingleViaductError::BatchResolverContractError { .. } => "BATCH_RESOLVER_CONTRACT",
            SingleViaductError::PolicyDenied { .. } => "POLICY_DENIED",
            SingleViaductError::SubqueryExecution { .. } => "SUBQUERY_EXECUTION",
            SingleViaductError::Cancelled => "CANCELLED",
            SingleViaductError::Internal { .. } => "INTERNAL",
        }
    }

    /// Plan-building failures surface as a single top-level error with null
    /// data; everything else attaches to the field that produced it.
    pub fn is_plan_build(&self) -> bool {
        matches!(
            self,
            SingleViaductError::OperationValidation { .. }
                | SingleViaductError::InvalidFragment { .. }
                | SingleViaductError::UnknownField { .. }
                | SingleViaductError::IncompatibleVariableType { .. }
                | SingleViaductError::ListTraversalInVariablePath { .. }
                | SingleViaductError::NullabilityMismatch { .. }
        )
    }
}

/// Failures in viaduct may either be a single failure or multiple failures
/// grouped together, so functions return this enum and delegate to the
/// members.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ViaductError {
    #[error(transparent)]
    Single(#[from] SingleViaductError),
    #[error(transparent)]
    Multiple(MultipleViaductErrors),
}

impl ViaductError {
    pub fn internal(message: impl Into<String>) -> Self {
        SingleViaductError::Internal {
            message: message.into(),
        }
        .into()
    }

    pub fn schema_validation(message: impl Into<String>) -> Self {
        SingleViaductError::SchemaValidation {
            message: message.into(),
        }
        .into()
    }

    /// The first (or only) underlying failure. Every `ViaductError` carries
    /// at least one.
    pub fn primary(&self) -> &SingleViaductError {
        match self {
            ViaductError::Single(error) => error,
            ViaductError::Multiple(errors) => &errors.errors[0],
        }
    }

    pub fn errors(&self) -> &[SingleViaductError] {
        match self {
            ViaductError::Single(error) => std::slice::from_ref(error),
            ViaductError::Multiple(errors) => &errors.errors,
        }
    }

    pub fn from_errors(mut errors: Vec<SingleViaductError>) -> Self {
        if errors.len() == 1 {
            ViaductError::Single(errors.pop().expect("len checked"))
        } else {
            ViaductError::Multiple(MultipleViaductErrors { errors })
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct MultipleViaductErrors {
    errors: Vec<SingleViaductError>,
}

impl Display for MultipleViaductErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "The following errors occurred:")?;
        for error in &self.errors {
            write!(f, "\n\n  - ")?;
            for c in error.to_string().chars() {
                if c == '\n' {
                    write!(f, "\n    ")?;
                } else {
                    f.write_char(c)?;
                }
            }
        }
        Ok(())
    }
}

impl From<DiagnosticList> for ViaductError {
    fn from(diagnostics: DiagnosticList) -> Self {
        SingleViaductError::SchemaValidation {
            message: diagnostics.to_string(),
        }
        .into()
    }
}

impl<T> From<WithErrors<T>> for ViaductError {
    fn from(with_errors: WithErrors<T>) -> Self {
        with_errors.errors.into()
    }
}

/// One segment of a response path: an object key or a list index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

pub type ResponsePath = Vec<PathSegment>;

/// Line/column pair in the operation document, 1-indexed per the GraphQL
/// response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct ErrorLocation {
    pub line: usize,
    pub column: usize,
}

/// An error as it appears in the `errors` list of an execution result.
#[derive(Debug, Clone, Serialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub path: ResponsePath,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<ErrorLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonMap<String, JsonValue>>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        GraphQLError {
            message: message.into(),
            path: Vec::new(),
            locations: Vec::new(),
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: ResponsePath) -> Self {
        self.path = path;
        self
    }

    pub fn with_location(mut self, location: Option<ErrorLocation>) -> Self {
        self.locations = location.into_iter().collect();
        self
    }

    pub fn with_code(mut self, code: &str) -> Self {
        let extensions = self.extensions.get_or_insert_with(JsonMap::new);
        extensions.insert("code".to_owned(), JsonValue::String(code.to_owned()));
        self
    }
}

/// Sorts by (path, message), the order the `errors` list is emitted in.
pub fn sort_errors(errors: Vec<GraphQLError>) -> Vec<GraphQLError> {
    errors
        .into_iter()
        .sorted_by(|a, b| {
            a.path
                .cmp(&b.path)
                .then_with(|| a.message.cmp(&b.message))
        })
        .collect()
}

/// Converts engine failures attributed to a field into GraphQL errors.
///
/// The embedder can replace the default to attach extensions or rewrite
/// messages; returning an empty list falls back to the default mapping.
pub trait ResolverErrorBuilder: Send + Sync {
    fn build(
        &self,
        error: &ViaductError,
        path: &ResponsePath,
        location: Option<ErrorLocation>,
    ) -> Vec<GraphQLError>;
}

/// Default mapping: message copied from the failure, path and location from
/// the planned field, kind code in extensions.
pub struct DefaultResolverErrorBuilder;

impl ResolverErrorBuilder for DefaultResolverErrorBuilder {
    fn build(
        &self,
        error: &ViaductError,
        path: &ResponsePath,
        location: Option<ErrorLocation>,
    ) -> Vec<GraphQLError> {
        error
            .errors()
            .iter()
            .map(|single| {
                GraphQLError::new(single.to_string())
                    .with_path(path.clone())
                    .with_location(location)
                    .with_code(single.code())
            })
            .collect()
    }
}

/// Receives failures the engine swallowed into the response, with the field
/// coordinate they were attributed to. Process-wide and thread-safe.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ViaductError, coordinate: Option<&str>);
}

/// Default reporter: logs at warn level.
pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report(&self, error: &ViaductError, coordinate: Option<&str>) {
        match coordinate {
            Some(coordinate) => log::warn!("resolver failure at {coordinate}: {error}"),
            None => log::warn!("execution failure: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_errors_render_indented() {
        let error = ViaductError::from_errors(vec![
            SingleViaductError::Internal {
                message: "first".to_owned(),
            },
            SingleViaductError::Cancelled,
        ]);
        insta::assert_snapshot!(error.to_string(), @r###"
        The following errors occurred:

          - first

          - operation was cancelled
        "###);
    }

    #[test]
    fn errors_sort_by_path_then_message() {
        let errors = vec![
            GraphQLError::new("b").with_path(vec![PathSegment::Field("a".into())]),
            GraphQLError::new("a").with_path(vec![PathSegment::Field("a".into())]),
            GraphQLError::new("z").with_path(vec![]),
        ];
        let sorted = sort_errors(errors);
        let rendered: Vec<String> = sorted
            .iter()
            .map(|e| format!("{:?} {}", e.path, e.message))
            .collect();
        assert_eq!(rendered, vec!["[] z", "[Field(\"a\")] a", "[Field(\"a\")] b"]);
    }
}
