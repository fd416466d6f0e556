use crate::error::ResponsePath;
use crate::execution::checks::CheckKind;
use crate::plan::OperationKind;
use std::sync::Arc;

/// Identity of one executing operation, shared by every instrumentation
/// hook of that operation.
#[derive(Debug, Clone)]
pub struct OperationInfo {
    pub operation_id: String,
    pub execution_id: String,
    pub kind: OperationKind,
}

/// One field dispatch, as seen by instrumentation hooks.
pub struct FieldInfo<'a> {
    pub type_name: &'a str,
    pub field_name: &'a str,
    pub path: &'a ResponsePath,
}

/// Observability hooks around the engine's execution phases. All methods
/// default to no-ops; implementations observe but must not change the
/// execution contract.
pub trait Instrumentation: Send + Sync {
    fn operation_begin(&self, _operation: &OperationInfo) {}
    fn operation_end(&self, _operation: &OperationInfo, _error_count: usize) {}
    fn plan_begin(&self, _operation: &OperationInfo) {}
    fn plan_end(&self, _operation: &OperationInfo, _succeeded: bool) {}
    fn field_fetch_begin(&self, _field: &FieldInfo<'_>) {}
    fn field_fetch_end(&self, _field: &FieldInfo<'_>, _errored: bool) {}
    fn field_completion_begin(&self, _field: &FieldInfo<'_>) {}
    fn field_completion_end(&self, _field: &FieldInfo<'_>) {}
    fn access_check_begin(&self, _field: &FieldInfo<'_>, _kind: CheckKind) {}
    fn access_check_end(&self, _field: &FieldInfo<'_>, _kind: CheckKind, _denied: bool) {}
}

/// Composes a list of instrumentations into one; hooks run in registration
/// order.
#[derive(Default)]
pub struct ChainedInstrumentation {
    chain: Vec<Arc<dyn Instrumentation>>,
}

impl ChainedInstrumentation {
    pub fn new(chain: Vec<Arc<dyn Instrumentation>>) -> Self {
        ChainedInstrumentation { chain }
    }
}

impl Instrumentation for ChainedInstrumentation {
    fn operation_begin(&self, operation: &OperationInfo) {
        for instrumentation in &self.chain {
            instrumentation.operation_begin(operation);
        }
    }

    fn operation_end(&self, operation: &OperationInfo, error_count: usize) {
        for instrumentation in &self.chain {
            instrumentation.operation_end(operation, error_count);
        }
    }

    fn plan_begin(&self, operation: &OperationInfo) {
        for instrumentation in &self.chain {
            instrumentation.plan_begin(operation);
        }
    }

    fn plan_end(&self, operation: &OperationInfo, succeeded: bool) {
        for instrumentation in &self.chain {
            instrumentation.plan_end(operation, succeeded);
        }
    }

    fn field_fetch_begin(&self, field: &FieldInfo<'_>) {
        for instrumentation in &self.chain {
            instrumentation.field_fetch_begin(field);
        }
    }

    fn field_fetch_end(&self, field: &FieldInfo<'_>, errored: bool) {
        for instrumentation in &self.chain {
            instrumentation.field_fetch_end(field, errored);
        }
    }

    fn field_completion_begin(&self, field: &FieldInfo<'_>) {
        for instrumentation in &self.chain {
            instrumentation.field_completion_begin(field);
        }
    }

    fn field_completion_end(&self, field: &FieldInfo<'_>) {
        for instrumentation in &self.chain {
            instrumentation.field_completion_end(field);
        }
    }

    fn access_check_begin(&self, field: &FieldInfo<'_>, kind: CheckKind) {
        for instrumentation in &self.chain {
            instrumentation.access_check_begin(field, kind);
        }
    }

    fn access_check_end(&self, field: &FieldInfo<'_>, kind: CheckKind, denied: bool) {
        for instrumentation in &self.chain {
            instrumentation.access_check_end(field, kind, denied);
        }
    }
}
