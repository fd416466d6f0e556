use crate::error::SingleViaductError;
use crate::error::ResponsePath;
use crate::error::ViaductError;
use crate::execution::driver;
use crate::execution::driver::RequestState;
use crate::execution::value::FieldValue;
use crate::execution::value::NodeReference;
use crate::execution::CancellationToken;
use crate::global_id::GlobalId;
use crate::plan::OperationKind;
use crate::plan::PlannedField;
use apollo_compiler::schema::Name;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::sync::Arc;

/// A read-only view over materialized selection data. Only the selections
/// the owning fragment declared are present; reading anything else is a
/// programmer error surfaced as [`SingleViaductError::UnrequestedSelection`].
#[derive(Debug, Clone)]
pub struct SelectionView {
    type_name: String,
    fields: JsonMap<String, JsonValue>,
}

impl SelectionView {
    pub(crate) fn new(type_name: impl Into<String>, fields: JsonMap<String, JsonValue>) -> Self {
        SelectionView {
            type_name: type_name.into(),
            fields,
        }
    }

    pub(crate) fn empty(type_name: impl Into<String>) -> Self {
        Self::new(type_name, JsonMap::new())
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The declared selection's value. Declared-but-null selections return
    /// `Null`; undeclared selections fail.
    pub fn get(&self, field: &str) -> Result<&JsonValue, ViaductError> {
        self.fields.get(field).ok_or_else(|| {
            SingleViaductError::UnrequestedSelection {
                type_name: self.type_name.clone(),
                field_name: field.to_owned(),
            }
            .into()
        })
    }

    pub fn get_str(&self, field: &str) -> Result<Option<&str>, ViaductError> {
        Ok(self.get(field)?.as_str())
    }

    pub fn get_i64(&self, field: &str) -> Result<Option<i64>, ViaductError> {
        Ok(self.get(field)?.as_i64())
    }

    pub fn get_f64(&self, field: &str) -> Result<Option<f64>, ViaductError> {
        Ok(self.get(field)?.as_f64())
    }

    pub fn get_bool(&self, field: &str) -> Result<Option<bool>, ViaductError> {
        Ok(self.get(field)?.as_bool())
    }

    /// A nested object selection as its own view.
    pub fn get_view(&self, field: &str) -> Result<Option<SelectionView>, ViaductError> {
        match self.get(field)? {
            JsonValue::Null => Ok(None),
            JsonValue::Object(map) => {
                let type_name = map
                    .get("__typename")
                    .and_then(JsonValue::as_str)
                    .unwrap_or("")
                    .to_owned();
                Ok(Some(SelectionView::new(type_name, map.clone())))
            }
            other => Err(ViaductError::internal(format!(
                "selection \"{field}\" of \"{}\" is not an object: {other}",
                self.type_name,
            ))),
        }
    }

    pub fn as_map(&self) -> &JsonMap<String, JsonValue> {
        &self.fields
    }
}

/// A planned, root-anchored selection set produced by
/// [`ResolverContext::selections_for`], ready to execute through
/// [`ResolverContext::query`] or [`ResolverContext::mutation`].
pub struct RawSelectionSet {
    pub(crate) kind: OperationKind,
    pub(crate) fields: Vec<Arc<PlannedField>>,
    pub(crate) variables: JsonMap<String, JsonValue>,
}

pub(crate) struct CtxInner {
    pub request: Arc<RequestState>,
    pub arguments: JsonMap<String, JsonValue>,
    pub object_view: SelectionView,
    pub query_view: SelectionView,
    pub selections: Vec<Arc<PlannedField>>,
    pub path: ResponsePath,
    pub coordinate: String,
    /// The type the resolved field lives on; submutation access is granted
    /// only when this is the mutation root.
    pub parent_type: Name,
    pub node_id: Option<GlobalId>,
}

/// Everything a resolver sees for one invocation.
#[derive(Clone)]
pub struct ResolverContext {
    pub(crate) inner: Arc<CtxInner>,
}

impl ResolverContext {
    pub fn arguments(&self) -> &JsonMap<String, JsonValue> {
        &self.inner.arguments
    }

    pub fn argument(&self, name: &str) -> Option<&JsonValue> {
        self.inner.arguments.get(name)
    }

    /// The parent object, restricted to the resolver's object RSS.
    pub fn object_value(&self) -> &SelectionView {
        &self.inner.object_view
    }

    /// The query root, restricted to the resolver's query RSS.
    pub fn query_value(&self) -> &SelectionView {
        &self.inner.query_view
    }

    /// The caller's selection set under the resolved field.
    pub fn selections(&self) -> &[Arc<PlannedField>] {
        &self.inner.selections
    }

    pub fn request_context(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.inner.request.request_context.as_ref()
    }

    /// The response path of the field being resolved.
    pub fn path(&self) -> &ResponsePath {
        &self.inner.path
    }

    /// The node identity, when this invocation resolves a node reference.
    pub fn node_id(&self) -> Option<&GlobalId> {
        self.inner.node_id.as_ref()
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.inner.request.cancellation.clone()
    }

    /// Serializes a global id for the given node type.
    pub fn global_id_for(
        &self,
        type_name: &str,
        internal_id: &str,
    ) -> Result<String, ViaductError> {
        if !self.inner.request.schema.is_node_type(type_name) {
            return Err(ViaductError::internal(format!(
                "type \"{type_name}\" does not have an `id: ID!` field and cannot carry a global id",
            )));
        }
        Ok(self
            .inner
            .request
            .engine
            .global_id_codec
            .encode(&GlobalId::new(type_name, internal_id)))
    }

    /// Builds a node reference from a serialized global id. The reference
    /// carries only the id; the engine resolves the node's other fields
    /// downstream.
    pub fn node_for(&self, encoded: &str) -> Result<FieldValue, ViaductError> {
        let id = self.inner.request.engine.global_id_codec.decode(encoded)?;
        if !self.inner.request.schema.is_node_type(&id.type_name) {
            return Err(ViaductError::internal(format!(
                "global id references \"{}\", which is not a node type",
                id.type_name,
            )));
        }
        Ok(FieldValue::Node(NodeReference::new(id)))
    }

    /// Parses and plans a selection set against the request's query or
    /// mutation root. The outer operation's variables are not inherited;
    /// pass everything the selections need explicitly.
    pub fn selections_for(
        &self,
        root_type: &str,
        fragment: &str,
        variables: JsonMap<String, JsonValue>,
    ) -> Result<RawSelectionSet, ViaductError> {
        let request = &self.inner.request;
        let kind = if root_type == request.schema.query_root().as_str() {
            OperationKind::Query
        } else if request
            .schema
            .mutation_root()
            .is_some_and(|name| name.as_str() == root_type)
        {
            OperationKind::Mutation
        } else {
            return Err(SingleViaductError::SubqueryExecution {
                message: format!(
                    "\"{root_type}\" is not the schema's query or mutation root type",
                ),
            }
            .into());
        };
        let anchor = match kind {
            OperationKind::Query => request.schema.query_root().clone(),
            OperationKind::Mutation => request
                .schema
                .mutation_root()
                .expect("checked above")
                .clone(),
        };
        let fields =
            request
                .engine
                .planner
                .plan_root_fragment(&request.schema, &anchor, fragment)?;
        Ok(RawSelectionSet {
            kind,
            fields,
            variables,
        })
    }

    /// Executes a query selection set against the same engine and request,
    /// sharing the request's memoized results.
    pub async fn query(&self, selections: RawSelectionSet) -> Result<SelectionView, ViaductError> {
        if selections.kind != OperationKind::Query {
            return Err(SingleViaductError::SubqueryExecution {
                message: "these selections execute against the mutation root; use `mutation`"
                    .to_owned(),
            }
            .into());
        }
        driver::execute_raw(&self.inner.request, selections).await
    }

    /// Executes a mutation selection set within the caller's mutation slot.
    /// Only available to resolvers of mutation root fields; a resolver
    /// nested under a mutation's result does not get the capability.
    pub async fn mutation(
        &self,
        selections: RawSelectionSet,
    ) -> Result<SelectionView, ViaductError> {
        if selections.kind != OperationKind::Mutation {
            return Err(SingleViaductError::SubqueryExecution {
                message: "these selections execute against the query root; use `query`".to_owned(),
            }
            .into());
        }
        let is_mutation_field = self
            .inner
            .request
            .schema
            .mutation_root()
            .is_some_and(|root| *root == self.inner.parent_type);
        if !is_mutation_field {
            return Err(SingleViaductError::SubqueryExecution {
                message: "submutations are only available to resolvers of mutation root fields"
                    .to_owned(),
            }
            .into());
        }
        driver::execute_raw(&self.inner.request, selections).await
    }

    /// The `Type.field` coordinate this invocation resolves.
    pub fn coordinate(&self) -> &str {
        &self.inner.coordinate
    }
}
