use crate::error::sort_errors;
use crate::error::GraphQLError;
use crate::error::ViaductError;
use crate::execution::CancellationToken;
use serde::Serialize;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

/// Everything needed to execute one operation.
///
/// `operation_id` identifies the operation text (for caching and
/// observability) and defaults to a hash of the text; `execution_id`
/// identifies this execution and defaults to a fresh UUID. Both are
/// required non-blank.
pub struct ExecutionInput {
    pub operation_text: String,
    pub operation_name: Option<String>,
    pub operation_id: String,
    pub variables: JsonMap<String, JsonValue>,
    pub execution_id: String,
    pub request_context: Option<Arc<dyn Any + Send + Sync>>,
    pub cancellation: CancellationToken,
}

impl ExecutionInput {
    pub fn new(operation_text: impl Into<String>) -> Self {
        let operation_text = operation_text.into();
        let mut hasher = DefaultHasher::new();
        operation_text.hash(&mut hasher);
        ExecutionInput {
            operation_id: format!("{:016x}", hasher.finish()),
            operation_text,
            operation_name: None,
            variables: JsonMap::new(),
            execution_id: uuid::Uuid::new_v4().to_string(),
            request_context: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = id.into();
        self
    }

    pub fn execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = id.into();
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn variables(mut self, variables: JsonMap<String, JsonValue>) -> Self {
        self.variables = variables;
        self
    }

    pub fn request_context(mut self, context: Arc<dyn Any + Send + Sync>) -> Self {
        self.request_context = Some(context);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ViaductError> {
        if self.operation_id.trim().is_empty() {
            return Err(ViaductError::internal("operation_id must not be blank"));
        }
        if self.execution_id.trim().is_empty() {
            return Err(ViaductError::internal("execution_id must not be blank"));
        }
        Ok(())
    }
}

/// A spec-compliant execution result: `data`, plus `errors` sorted by
/// (path, message).
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<JsonMap<String, JsonValue>>,
}

impl ExecutionResult {
    pub(crate) fn from_parts(data: Option<JsonValue>, errors: Vec<GraphQLError>) -> Self {
        ExecutionResult {
            data,
            errors: sort_errors(errors),
            extensions: None,
        }
    }

    /// A request that failed before any field executed: null data, one
    /// error per underlying failure.
    pub(crate) fn from_request_failure(error: &ViaductError) -> Self {
        let errors = error
            .errors()
            .iter()
            .map(|single| GraphQLError::new(single.to_string()).with_code(single.code()))
            .collect();
        ExecutionResult {
            data: None,
            errors: sort_errors(errors),
            extensions: None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
