use crate::error::ErrorLocation;
use crate::registry::CheckerEntry;
use crate::registry::FieldCoordinate;
use crate::registry::FieldEntry;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::Name;
use apollo_compiler::Node;
use std::sync::Arc;

pub mod planner;
pub(crate) mod rss;

pub use planner::Planner;
pub use planner::PlannerConfig;

/// The operation kinds the execution core supports. Subscriptions are
/// handled outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum OperationKind {
    #[strum(to_string = "query")]
    Query,
    #[strum(to_string = "mutation")]
    Mutation,
}

impl OperationKind {
    pub(crate) fn from_operation_type(operation_type: OperationType) -> Option<Self> {
        match operation_type {
            OperationType::Query => Some(OperationKind::Query),
            OperationType::Mutation => Some(OperationKind::Mutation),
            OperationType::Subscription => None,
        }
    }

    pub(crate) fn operation_type(self) -> OperationType {
        match self {
            OperationKind::Query => OperationType::Query,
            OperationKind::Mutation => OperationType::Mutation,
        }
    }
}

/// An immutable, cacheable description of the work one operation requires.
/// Plans carry no per-request data; variables are bound at dispatch time.
pub struct ExecutionPlan {
    pub(crate) kind: OperationKind,
    pub(crate) root_type: Name,
    pub(crate) fields: Vec<Arc<PlannedField>>,
    pub(crate) fingerprint: u64,
}

impl ExecutionPlan {
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn root_type(&self) -> &Name {
        &self.root_type
    }

    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn fields(&self) -> &[Arc<PlannedField>] {
        &self.fields
    }
}

/// One field occurrence in a plan: where it was selected, its schema
/// definition, the dispatcher that resolves it (absent for trivial fields
/// read from the parent object), and its own sub-selections.
pub struct PlannedField {
    pub(crate) response_key: String,
    pub(crate) field_name: Name,
    /// The type the selection was made on; doubles as the runtime guard for
    /// selections nested under type conditions.
    pub(crate) parent_type: Name,
    /// Absent only for the `__typename` meta field.
    pub(crate) definition: Option<Node<ast::FieldDefinition>>,
    pub(crate) arguments: Vec<Node<ast::Argument>>,
    pub(crate) resolver: Option<Arc<ResolverPlan>>,
    pub(crate) selections: Vec<Arc<PlannedField>>,
    pub(crate) location: Option<ErrorLocation>,
}

impl PlannedField {
    pub fn response_key(&self) -> &str {
        &self.response_key
    }

    pub fn field_name(&self) -> &Name {
        &self.field_name
    }

    pub fn parent_type(&self) -> &Name {
        &self.parent_type
    }

    pub fn has_resolver(&self) -> bool {
        self.resolver.is_some()
    }

    pub fn is_batched(&self) -> bool {
        self.resolver
            .as_ref()
            .map(|plan| plan.entry.registration.batched)
            .unwrap_or(false)
    }

    pub fn selections(&self) -> &[Arc<PlannedField>] {
        &self.selections
    }

    pub(crate) fn is_typename(&self) -> bool {
        self.definition.is_none()
    }

    pub(crate) fn ty(&self) -> Option<&ast::Type> {
        self.definition.as_ref().map(|definition| &definition.ty)
    }

    pub(crate) fn coordinate(&self) -> FieldCoordinate {
        FieldCoordinate::new(self.parent_type.as_str(), self.field_name.as_str())
    }
}

/// The dispatcher reference attached to a resolver-backed planned field.
pub(crate) struct ResolverPlan {
    pub entry: Arc<FieldEntry>,
    pub dependencies: SelectionDependencies,
}

/// A checker dispatcher with its planned selection dependencies.
pub(crate) struct CheckerPlan {
    pub entry: Arc<CheckerEntry>,
    pub dependencies: SelectionDependencies,
}

/// The planned form of an RSS pair plus variable bindings, shared by
/// resolvers and checkers.
#[derive(Default)]
pub(crate) struct SelectionDependencies {
    pub object_rss: Option<PlannedRss>,
    pub query_rss: Option<PlannedRss>,
    pub variables: Vec<PlannedVariable>,
}

/// A parsed, validated required selection set anchored at a type.
pub(crate) struct PlannedRss {
    pub anchor: Name,
    pub fields: Vec<Arc<PlannedField>>,
}

/// A variable binding with its planned source.
pub(crate) struct PlannedVariable {
    pub name: String,
    pub source: PlannedVariableSource,
}

pub(crate) enum PlannedVariableSource {
    /// Dot-path into the resolved field's coerced arguments.
    Argument(Vec<String>),
    /// Chain of planned fields walked from the parent object.
    ObjectPath(Vec<Arc<PlannedField>>),
    /// Chain of planned fields walked from the query root.
    QueryPath(Vec<Arc<PlannedField>>),
}
