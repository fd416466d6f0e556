use crate::error::SingleViaductError;
use crate::error::ViaductError;
use apollo_compiler::ast;
use apollo_compiler::ast::OperationType;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Name;
use apollo_compiler::validation::Valid;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use indexmap::IndexSet;

pub(crate) mod directives;
pub mod filter;
pub mod scope;

use directives::directive_required_string_argument;
use directives::BUILTIN_DIRECTIVE_DEFINITIONS;
use directives::ID_OF_DIRECTIVE;
use directives::ID_OF_TYPE_ARGUMENT;
use directives::RESOLVER_DIRECTIVE;
use scope::ScopeMetadata;

/// Identifies the schema view a request executes against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaId {
    /// The unfiltered central schema.
    Full,
    /// No schema; every lookup fails. Used to hard-disable a surface.
    None,
    /// A named scope set; only elements visible under one of the scope ids
    /// are exposed.
    Scoped {
        id: String,
        scopes: IndexSet<String>,
    },
}

impl SchemaId {
    pub fn scoped(
        id: impl Into<String>,
        scopes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        SchemaId::Scoped {
            id: id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Stable key for caching derived schema views.
    pub(crate) fn cache_key(&self) -> String {
        match self {
            SchemaId::Full => "full".to_owned(),
            SchemaId::None => "none".to_owned(),
            SchemaId::Scoped { id, scopes } => {
                let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                format!("scoped:{id}:{}", sorted.join(","))
            }
        }
    }
}

/// The central schema plus the metadata the engine derives from it: scope
/// sets per element, the interface-implementers index, and root type names.
/// Immutable after construction and shared by reference.
pub struct ViaductSchema {
    schema: Valid<Schema>,
    scopes: ScopeMetadata,
    implementers: IndexMap<Name, IndexSet<Name>>,
    query_root: Name,
    mutation_root: Option<Name>,
}

impl ViaductSchema {
    /// Parses and validates an SDL document, contributing the engine's
    /// built-in directive definitions when the document does not define them.
    pub fn parse(sdl: &str) -> Result<Self, ViaductError> {
        let mut prelude = String::new();
        for (marker, definition) in BUILTIN_DIRECTIVE_DEFINITIONS {
            if !sdl.contains(marker) {
                prelude.push_str(definition);
            }
        }
        let document = format!("{prelude}{sdl}");
        let schema = Schema::parse_and_validate(document, "schema.graphql")?;
        Self::from_schema(schema)
    }

    pub fn from_schema(schema: Valid<Schema>) -> Result<Self, ViaductError> {
        let scopes = ScopeMetadata::build(&schema)?;
        let implementers = build_implementers(&schema);
        let query_root = schema
            .root_operation(OperationType::Query)
            .cloned()
            .ok_or_else(|| {
                ViaductError::schema_validation("schema does not declare a query root type")
            })?;
        let mutation_root = schema.root_operation(OperationType::Mutation).cloned();
        let built = ViaductSchema {
            schema,
            scopes,
            implementers,
            query_root,
            mutation_root,
        };
        built.validate_scoped_interfaces()?;
        Ok(built)
    }

    pub fn schema(&self) -> &Valid<Schema> {
        &self.schema
    }

    pub fn scopes(&self) -> &ScopeMetadata {
        &self.scopes
    }

    pub fn query_root(&self) -> &Name {
        &self.query_root
    }

    pub fn mutation_root(&self) -> Option<&Name> {
        self.mutation_root.as_ref()
    }

    pub fn root_type(&self, operation_type: OperationType) -> Option<&Name> {
        match operation_type {
            OperationType::Query => Some(&self.query_root),
            OperationType::Mutation => self.mutation_root.as_ref(),
            OperationType::Subscription => None,
        }
    }

    pub fn get_type(&self, name: &str) -> Option<&ExtendedType> {
        self.schema.types.get(name)
    }

    /// Concrete object types implementing the given interface.
    pub fn implementers(&self, interface: &str) -> IndexSet<Name> {
        self.implementers
            .get(interface)
            .cloned()
            .unwrap_or_default()
    }

    pub fn union_members(&self, union_name: &str) -> Result<IndexSet<Name>, ViaductError> {
        match self.schema.types.get(union_name) {
            Some(ExtendedType::Union(union_)) => Ok(union_
                .members
                .iter()
                .map(|member| member.name.clone())
                .collect()),
            _ => Err(ViaductError::internal(format!(
                "type \"{union_name}\" is not a union"
            ))),
        }
    }

    /// The concrete object types a value of the given composite type may
    /// have at runtime.
    pub fn possible_runtime_types(&self, type_name: &str) -> Result<IndexSet<Name>, ViaductError> {
        match self.schema.types.get(type_name) {
            Some(ExtendedType::Object(_)) => {
                let (name, _) = self
                    .schema
                    .types
                    .get_key_value(type_name)
                    .expect("presence checked above");
                Ok(IndexSet::from([name.clone()]))
            }
            Some(ExtendedType::Interface(_)) => Ok(self.implementers(type_name)),
            Some(ExtendedType::Union(_)) => self.union_members(type_name),
            Some(_) => Err(ViaductError::internal(format!(
                "type \"{type_name}\" is not a composite type"
            ))),
            None => Err(ViaductError::internal(format!(
                "type \"{type_name}\" is not defined"
            ))),
        }
    }

    /// True when `concrete` satisfies a type condition on `condition`:
    /// either the same type, an implemented interface, or a union it
    /// belongs to.
    pub fn satisfies_type_condition(&self, concrete: &str, condition: &str) -> bool {
        if concrete == condition {
            return true;
        }
        self.possible_runtime_types(condition)
            .map(|types| types.iter().any(|name| name == concrete))
            .unwrap_or(false)
    }

    pub fn field_definition(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&Component<ast::FieldDefinition>> {
        match self.schema.types.get(type_name)? {
            ExtendedType::Object(object) => object.fields.get(field_name),
            ExtendedType::Interface(interface) => interface.fields.get(field_name),
            _ => None,
        }
    }

    pub fn is_leaf_type(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Scalar(_)) | Some(ExtendedType::Enum(_))
        )
    }

    pub fn is_object_type(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Object(_))
        )
    }

    pub fn is_composite_type(&self, type_name: &str) -> bool {
        matches!(
            self.schema.types.get(type_name),
            Some(ExtendedType::Object(_))
                | Some(ExtendedType::Interface(_))
                | Some(ExtendedType::Union(_))
        )
    }

    /// Whether the field is backed by a resolver (declares `@resolver`).
    pub fn field_has_resolver(&self, type_name: &str, field_name: &str) -> bool {
        self.field_definition(type_name, field_name)
            .map(|field| field.directives.has(RESOLVER_DIRECTIVE))
            .unwrap_or(false)
    }

    /// The target type of an `@idOf(type:)` application on the field, if any.
    pub fn id_of_target(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Result<Option<String>, ViaductError> {
        match self
            .field_definition(type_name, field_name)
            .and_then(|field| field.directives.get(ID_OF_DIRECTIVE))
        {
            Some(application) => {
                let target = directive_required_string_argument(application, ID_OF_TYPE_ARGUMENT)?;
                if !self.is_node_type(&target) {
                    return Err(SingleViaductError::SchemaValidation {
                        message: format!(
                            "@idOf on \"{type_name}.{field_name}\" references \"{target}\", which does not have an `id: ID!` field.",
                        ),
                    }
                    .into());
                }
                Ok(Some(target))
            }
            None => Ok(None),
        }
    }

    /// A type can be referenced by global id only if it carries the `Node`
    /// marker: a non-null `id: ID!` field.
    pub fn is_node_type(&self, type_name: &str) -> bool {
        self.field_definition(type_name, "id")
            .map(|field| field.ty.is_non_null() && field.ty.inner_named_type() == "ID")
            .unwrap_or(false)
    }

    /// Interface fields must not be visible at scopes where an implementing
    /// object omits them.
    fn validate_scoped_interfaces(&self) -> Result<(), ViaductError> {
        for (interface_name, implementers) in &self.implementers {
            let Some(ExtendedType::Interface(interface)) =
                self.schema.types.get(interface_name.as_str())
            else {
                continue;
            };
            for object_name in implementers {
                for field_name in interface.fields.keys() {
                    let interface_scopes = self
                        .scopes
                        .field_scopes(interface_name.as_str(), field_name.as_str());
                    let object_scopes = self
                        .scopes
                        .field_scopes(object_name.as_str(), field_name.as_str());
                    if !interface_scopes.is_within(object_scopes) {
                        return Err(SingleViaductError::SchemaValidation {
                            message: format!(
                                "Object \"{object_name}\" implements \"{interface_name}\" but field \"{field_name}\" is missing at some of the interface's scopes.",
                            ),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(())
    }
}

fn build_implementers(schema: &Schema) -> IndexMap<Name, IndexSet<Name>> {
    let mut implementers: IndexMap<Name, IndexSet<Name>> = IndexMap::new();
    for (type_name, ty) in &schema.types {
        if let ExtendedType::Object(object) = ty {
            for interface in &object.implements_interfaces {
                implementers
                    .entry(interface.name.clone())
                    .or_default()
                    .insert(type_name.clone());
            }
        }
    }
    implementers
}
