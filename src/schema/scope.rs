use crate::error::SingleViaductError;
use crate::error::ViaductError;
use crate::schema::directives::directive_required_string_list_argument;
use crate::schema::directives::SCOPE_DIRECTIVE;
use crate::schema::directives::SCOPE_TO_ARGUMENT;
use apollo_compiler::ast;
use apollo_compiler::schema::Component;
use apollo_compiler::schema::ComponentOrigin;
use apollo_compiler::schema::Directive;
use apollo_compiler::schema::DirectiveList;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::ExtensionId;
use apollo_compiler::schema::Name;
use apollo_compiler::Schema;
use indexmap::IndexMap;
use indexmap::IndexSet;
use lazy_static::lazy_static;

pub const WILDCARD_SCOPE: &str = "*";

lazy_static! {
    static ref WILDCARD_SCOPES: ScopeSet = ScopeSet::wildcard();
}

/// A finite set of scope identifiers declared on a schema element. The
/// wildcard `*` matches any requested scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeSet {
    scopes: IndexSet<String>,
}

impl ScopeSet {
    pub fn new(scopes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScopeSet {
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn wildcard() -> Self {
        ScopeSet::new([WILDCARD_SCOPE])
    }

    pub fn has_wildcard(&self) -> bool {
        self.scopes.contains(WILDCARD_SCOPE)
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.iter().map(String::as_str)
    }

    /// True when the element is visible to a requester holding `active`.
    pub fn matches(&self, active: &IndexSet<String>) -> bool {
        self.has_wildcard() || active.iter().any(|scope| self.scopes.contains(scope))
    }

    /// Subset check used to validate extension scopes against the base
    /// declaration. A wildcard base admits everything.
    pub fn is_within(&self, base: &ScopeSet) -> bool {
        base.has_wildcard() || self.scopes.iter().all(|scope| base.scopes.contains(scope))
    }

    fn union_with(&mut self, other: ScopeSet) {
        self.scopes.extend(other.scopes);
    }
}

/// Scope sets declared by one `@scope` application.
fn scopes_of_application(application: &Directive) -> Result<ScopeSet, ViaductError> {
    Ok(ScopeSet::new(directive_required_string_list_argument(
        application,
        SCOPE_TO_ARGUMENT,
    )?))
}

fn origin_extension(origin: &ComponentOrigin) -> Option<&ExtensionId> {
    origin.extension_id()
}

/// The `@scope` declarations on one type, split by where they were written:
/// the base definition or a specific extension.
struct TypeScopeDeclarations {
    /// Union of definition-origin applications; wildcard when none.
    base: ScopeSet,
    by_extension: Vec<(ExtensionId, ScopeSet)>,
}

impl TypeScopeDeclarations {
    fn collect(type_name: &Name, directives: &DirectiveList) -> Result<Self, ViaductError> {
        let mut base: Option<ScopeSet> = None;
        let mut by_extension: Vec<(ExtensionId, ScopeSet)> = Vec::new();
        for application in directives.get_all(SCOPE_DIRECTIVE) {
            let scopes = scopes_of_application(application)?;
            match origin_extension(&application.origin) {
                None => match &mut base {
                    Some(existing) => existing.union_with(scopes),
                    None => base = Some(scopes),
                },
                Some(extension) => {
                    match by_extension.iter_mut().find(|(id, _)| id == extension) {
                        Some((_, existing)) => existing.union_with(scopes),
                        None => by_extension.push((extension.clone(), scopes)),
                    }
                }
            }
        }
        let base = base.unwrap_or_else(ScopeSet::wildcard);
        for (_, scopes) in &by_extension {
            if !scopes.is_within(&base) {
                return Err(SingleViaductError::SchemaValidation {
                    message: format!(
                        "Scopes on an extension of type \"{type_name}\" are not a subset of the scopes declared on the base type.",
                    ),
                }
                .into());
            }
        }
        Ok(TypeScopeDeclarations { base, by_extension })
    }

    /// The scope set governing a member (field or enum value) whose component
    /// origin is `origin`: the declaring extension's scopes when it has any,
    /// else the base set.
    fn for_member_origin(&self, origin: &ComponentOrigin) -> ScopeSet {
        if let Some(extension) = origin_extension(origin) {
            if let Some((_, scopes)) = self.by_extension.iter().find(|(id, _)| id == extension) {
                return scopes.clone();
            }
        }
        self.base.clone()
    }
}

/// Effective scope sets for every type, field, and enum value in a schema,
/// derived once at construction.
#[derive(Debug, Clone, Default)]
pub struct ScopeMetadata {
    types: IndexMap<Name, ScopeSet>,
    fields: IndexMap<Name, IndexMap<Name, ScopeSet>>,
    enum_values: IndexMap<Name, IndexMap<Name, ScopeSet>>,
}

impl ScopeMetadata {
    pub(crate) fn build(schema: &Schema) -> Result<Self, ViaductError> {
        let mut metadata = ScopeMetadata::default();
        for (type_name, ty) in &schema.types {
            if ty.is_built_in() {
                metadata
                    .types
                    .insert(type_name.clone(), ScopeSet::wildcard());
                continue;
            }
            let declarations = TypeScopeDeclarations::collect(type_name, ty.directives())?;
            metadata
                .types
                .insert(type_name.clone(), declarations.base.clone());

            match ty {
                ExtendedType::Object(object) => {
                    let fields = metadata.fields.entry(type_name.clone()).or_default();
                    for (field_name, field) in &object.fields {
                        fields.insert(
                            field_name.clone(),
                            field_scopes(type_name, field, &declarations)?,
                        );
                    }
                }
                ExtendedType::Interface(interface) => {
                    let fields = metadata.fields.entry(type_name.clone()).or_default();
                    for (field_name, field) in &interface.fields {
                        fields.insert(
                            field_name.clone(),
                            field_scopes(type_name, field, &declarations)?,
                        );
                    }
                }
                ExtendedType::Enum(enum_) => {
                    let values = metadata.enum_values.entry(type_name.clone()).or_default();
                    for (value_name, value) in &enum_.values {
                        let scopes = match value.directives.get(SCOPE_DIRECTIVE) {
                            Some(application) => scopes_of_application(application)?,
                            None => declarations.for_member_origin(&value.origin),
                        };
                        values.insert(value_name.clone(), scopes);
                    }
                }
                _ => {}
            }
        }
        Ok(metadata)
    }

    pub fn type_scopes(&self, type_name: &str) -> &ScopeSet {
        self.types.get(type_name).unwrap_or(&WILDCARD_SCOPES)
    }

    pub fn field_scopes(&self, type_name: &str, field_name: &str) -> &ScopeSet {
        self.fields
            .get(type_name)
            .and_then(|fields| fields.get(field_name))
            .unwrap_or(&WILDCARD_SCOPES)
    }

    pub fn enum_value_scopes(&self, type_name: &str, value_name: &str) -> &ScopeSet {
        self.enum_values
            .get(type_name)
            .and_then(|values| values.get(value_name))
            .unwrap_or(&WILDCARD_SCOPES)
    }

    pub fn type_in_scope(&self, type_name: &str, active: &IndexSet<String>) -> bool {
        self.type_scopes(type_name).matches(active)
    }

    pub fn field_in_scope(
        &self,
        type_name: &str,
        field_name: &str,
        active: &IndexSet<String>,
    ) -> bool {
        self.field_scopes(type_name, field_name).matches(active)
    }
}

/// Field precedence: a field-level `@scope` wins, else the declaring
/// extension's scopes, else the base type's.
fn field_scopes(
    type_name: &Name,
    field: &Component<ast::FieldDefinition>,
    declarations: &TypeScopeDeclarations,
) -> Result<ScopeSet, ViaductError> {
    let scopes = match field.directives.get(SCOPE_DIRECTIVE) {
        Some(application) => scopes_of_application(application)?,
        None => declarations.for_member_origin(&field.origin),
    };
    if !scopes.is_within(&declarations.base) {
        return Err(SingleViaductError::SchemaValidation {
            message: format!(
                "Scopes on field \"{type_name}.{}\" are not a subset of the scopes declared on the base type.",
                field.name,
            ),
        }
        .into());
    }
    Ok(scopes)
}
