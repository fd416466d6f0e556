//! Parsing and validation of resolver-declared required selection sets.
//!
//! A resolver (or checker) declares its data dependencies as fragment
//! strings plus a variable list. Parsing is cached in the planned form:
//! dependencies are planned once at engine build and shared by every plan
//! that dispatches the resolver.

use crate::error::SingleViaductError;
use crate::error::ViaductError;
use crate::plan::planner::plan_selections;
use crate::plan::planner::ResolverPlanSource;
use crate::plan::planner::SelectionsRef;
use crate::plan::PlannedField;
use crate::plan::PlannedRss;
use crate::plan::PlannedVariable;
use crate::plan::PlannedVariableSource;
use crate::plan::SelectionDependencies;
use crate::registry::VariableDeclaration;
use crate::registry::VariableSource;
use crate::schema::ViaductSchema;
use apollo_compiler::ast;
use apollo_compiler::ast::Value;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Name;
use apollo_compiler::Node;
use std::ops::Deref;
use std::sync::Arc;

/// A parsed fragment declaration. Keeps the backing document alive so the
/// selections can be walked by reference.
pub(crate) struct ParsedFragment {
    document: ast::Document,
    pub condition: Name,
}

impl ParsedFragment {
    pub(crate) fn selections(&self) -> &[ast::Selection] {
        for definition in &self.document.definitions {
            if let ast::Definition::FragmentDefinition(fragment) = definition {
                return &fragment.selection_set;
            }
        }
        &[]
    }
}

/// Parses a declared fragment string. A string not starting with the
/// `fragment` keyword is shorthand for a selection on the anchor type:
/// `"name"` means `fragment _ on <Anchor> { name }`.
pub(crate) fn parse_fragment(anchor: &Name, text: &str) -> Result<ParsedFragment, ViaductError> {
    let trimmed = text.trim();
    let source = if trimmed.starts_with("fragment") {
        trimmed.to_owned()
    } else {
        format!("fragment _ on {anchor} {{ {trimmed} }}")
    };
    let document = ast::Document::parse(source, "fragment.graphql").map_err(|with_errors| {
        ViaductError::from(SingleViaductError::InvalidFragment {
            message: with_errors.errors.to_string(),
        })
    })?;
    let condition = document.definitions.iter().find_map(|definition| {
        if let ast::Definition::FragmentDefinition(fragment) = definition {
            Some(fragment.type_condition.clone())
        } else {
            None
        }
    });
    let condition = condition.ok_or_else(|| {
        ViaductError::from(SingleViaductError::InvalidFragment {
            message: format!("expected a fragment definition in \"{trimmed}\""),
        })
    })?;
    Ok(ParsedFragment {
        document,
        condition,
    })
}

/// Plans the dependency block shared by resolvers and checkers: both RSS
/// fragments and every declared variable binding.
pub(crate) fn plan_dependencies(
    schema: &ViaductSchema,
    anchor: &Name,
    object_rss: Option<&str>,
    query_rss: Option<&str>,
    variables: &[VariableDeclaration],
    target: Option<&ast::FieldDefinition>,
    source: &mut dyn ResolverPlanSource,
) -> Result<SelectionDependencies, ViaductError> {
    let object_rss = match object_rss {
        Some(text) => Some(plan_rss(schema, anchor, text, source)?),
        None => None,
    };
    let query_rss = match query_rss {
        Some(text) => Some(plan_rss(schema, schema.query_root(), text, source)?),
        None => None,
    };

    let mut declared: Vec<DeclaredVariable> = Vec::new();
    for declaration in variables {
        let planned = match &declaration.source {
            VariableSource::FromArgument(path) => {
                let target = target.ok_or_else(|| {
                    ViaductError::from(SingleViaductError::InvalidFragment {
                        message: format!(
                            "variable \"${}\" uses fromArgument, which is not available here",
                            declaration.name,
                        ),
                    })
                })?;
                let terminal = walk_argument_path(schema, target, path, &declaration.name)?;
                DeclaredVariable {
                    name: declaration.name.clone(),
                    source: PlannedVariableSource::Argument(path.clone()),
                    terminal,
                }
            }
            VariableSource::FromObjectField(path) => {
                let (fields, terminal) =
                    plan_variable_path(schema, anchor, path, &declaration.name, source)?;
                DeclaredVariable {
                    name: declaration.name.clone(),
                    source: PlannedVariableSource::ObjectPath(fields),
                    terminal,
                }
            }
            VariableSource::FromQueryField(path) => {
                let (fields, terminal) = plan_variable_path(
                    schema,
                    schema.query_root(),
                    path,
                    &declaration.name,
                    source,
                )?;
                DeclaredVariable {
                    name: declaration.name.clone(),
                    source: PlannedVariableSource::QueryPath(fields),
                    terminal,
                }
            }
        };
        declared.push(planned);
    }

    let mut usages = Vec::new();
    if let Some(rss) = &object_rss {
        collect_variable_usages(schema, &rss.fields, &mut usages);
    }
    if let Some(rss) = &query_rss {
        collect_variable_usages(schema, &rss.fields, &mut usages);
    }
    for (variable, expected) in &usages {
        let Some(declaration) = declared.iter().find(|d| &d.name == variable) else {
            return Err(SingleViaductError::InvalidFragment {
                message: format!("variable \"${variable}\" is used but not declared"),
            }
            .into());
        };
        let expected_name = expected.inner_named_type();
        if expected_name != declaration.terminal.type_name.as_str() {
            return Err(SingleViaductError::IncompatibleVariableType {
                variable: variable.clone(),
                path: declaration.terminal.path.clone(),
                actual: declaration.terminal.type_name.clone(),
                expected: expected_name.to_string(),
            }
            .into());
        }
        if expected.is_non_null() && declaration.terminal.nullable {
            return Err(SingleViaductError::NullabilityMismatch {
                variable: variable.clone(),
                path: declaration.terminal.path.clone(),
            }
            .into());
        }
    }

    Ok(SelectionDependencies {
        object_rss,
        query_rss,
        variables: declared
            .into_iter()
            .map(|d| PlannedVariable {
                name: d.name,
                source: d.source,
            })
            .collect(),
    })
}

fn plan_rss(
    schema: &ViaductSchema,
    anchor: &Name,
    text: &str,
    source: &mut dyn ResolverPlanSource,
) -> Result<PlannedRss, ViaductError> {
    let fragment = parse_fragment(anchor, text)?;
    if fragment.condition != *anchor
        && !schema.satisfies_type_condition(anchor.as_str(), fragment.condition.as_str())
    {
        return Err(SingleViaductError::InvalidFragment {
            message: format!(
                "fragment is anchored on \"{}\" but is required by a field of \"{anchor}\"",
                fragment.condition,
            ),
        }
        .into());
    }
    let fields = plan_selections(
        schema,
        None,
        anchor,
        SelectionsRef::Ast(fragment.selections()),
        source,
        None,
    )?;
    Ok(PlannedRss {
        anchor: anchor.clone(),
        fields,
    })
}

struct DeclaredVariable {
    name: String,
    source: PlannedVariableSource,
    terminal: PathTerminal,
}

struct PathTerminal {
    type_name: String,
    nullable: bool,
    path: String,
}

fn type_contains_list(ty: &ast::Type) -> bool {
    matches!(ty, ast::Type::List(_) | ast::Type::NonNullList(_))
}

/// Statically walks a `fromArgument` dot-path: the first segment names an
/// argument of the resolved field, later segments descend into input object
/// fields. The walk rejects list traversal and non-leaf terminals and
/// tracks nullability.
fn walk_argument_path(
    schema: &ViaductSchema,
    target: &ast::FieldDefinition,
    path: &[String],
    variable: &str,
) -> Result<PathTerminal, ViaductError> {
    let joined = path.join(".");
    let Some(first) = path.first() else {
        return Err(SingleViaductError::InvalidFragment {
            message: format!("variable \"${variable}\" has an empty fromArgument path"),
        }
        .into());
    };
    let Some(argument) = target.arguments.iter().find(|a| a.name == first.as_str()) else {
        return Err(SingleViaductError::UnknownField {
            type_name: format!("{}(..)", target.name),
            field_name: first.clone(),
        }
        .into());
    };
    let mut current: ast::Type = argument.ty.deref().clone();
    let mut nullable = !current.is_non_null();
    for segment in &path[1..] {
        if type_contains_list(&current) {
            return Err(SingleViaductError::ListTraversalInVariablePath {
                variable: variable.to_owned(),
                path: joined,
                segment: segment.clone(),
            }
            .into());
        }
        let type_name = current.inner_named_type();
        let Some(ExtendedType::InputObject(input_object)) = schema.get_type(type_name.as_str())
        else {
            return Err(SingleViaductError::IncompatibleVariableType {
                variable: variable.to_owned(),
                path: joined,
                actual: type_name.to_string(),
                expected: "an input object to descend into".to_owned(),
            }
            .into());
        };
        let Some(field) = input_object.fields.get(segment.as_str()) else {
            return Err(SingleViaductError::UnknownField {
                type_name: type_name.to_string(),
                field_name: segment.clone(),
            }
            .into());
        };
        current = field.ty.deref().clone();
        nullable |= !current.is_non_null();
    }
    if type_contains_list(&current) {
        return Err(SingleViaductError::ListTraversalInVariablePath {
            variable: variable.to_owned(),
            path: joined.clone(),
            segment: path.last().cloned().unwrap_or_default(),
        }
        .into());
    }
    let terminal_name = current.inner_named_type();
    if !schema.is_leaf_type(terminal_name.as_str()) && !is_built_in_scalar(terminal_name.as_str()) {
        return Err(SingleViaductError::IncompatibleVariableType {
            variable: variable.to_owned(),
            path: joined,
            actual: terminal_name.to_string(),
            expected: "a scalar or enum".to_owned(),
        }
        .into());
    }
    Ok(PathTerminal {
        type_name: terminal_name.to_string(),
        nullable,
        path: joined,
    })
}

/// Plans a `fromObjectField`/`fromQueryField` path as a chain of planned
/// fields, one per segment, resolved stepwise at dispatch.
fn plan_variable_path(
    schema: &ViaductSchema,
    anchor: &Name,
    path: &[String],
    variable: &str,
    source: &mut dyn ResolverPlanSource,
) -> Result<(Vec<Arc<PlannedField>>, PathTerminal), ViaductError> {
    let joined = path.join(".");
    if path.is_empty() {
        return Err(SingleViaductError::InvalidFragment {
            message: format!("variable \"${variable}\" has an empty source path"),
        }
        .into());
    }
    let mut fields = Vec::new();
    let mut current_type = anchor.clone();
    let mut nullable = false;
    for (index, segment) in path.iter().enumerate() {
        let Some(definition) = schema.field_definition(current_type.as_str(), segment) else {
            return Err(SingleViaductError::UnknownField {
                type_name: current_type.to_string(),
                field_name: segment.clone(),
            }
            .into());
        };
        let ty = definition.ty.clone();
        if type_contains_list(&ty) {
            return Err(SingleViaductError::ListTraversalInVariablePath {
                variable: variable.to_owned(),
                path: joined,
                segment: segment.clone(),
            }
            .into());
        }
        nullable |= !ty.is_non_null();
        let resolver = if schema.field_has_resolver(current_type.as_str(), segment) {
            let coordinate =
                crate::registry::FieldCoordinate::new(current_type.as_str(), segment.as_str());
            source.resolver_plan(schema, &coordinate)?
        } else {
            None
        };
        let field_name = Name::new(segment.as_str())
            .map_err(|_| ViaductError::internal(format!("invalid field name \"{segment}\"")))?;
        fields.push(Arc::new(PlannedField {
            response_key: segment.clone(),
            field_name,
            parent_type: current_type.clone(),
            definition: Some(component_node(definition)),
            arguments: Vec::new(),
            resolver,
            selections: Vec::new(),
            location: None,
        }));
        let inner = ty.inner_named_type().clone();
        let is_last = index + 1 == path.len();
        if is_last {
            if !schema.is_leaf_type(inner.as_str()) && !is_built_in_scalar(inner.as_str()) {
                return Err(SingleViaductError::IncompatibleVariableType {
                    variable: variable.to_owned(),
                    path: joined,
                    actual: inner.to_string(),
                    expected: "a scalar or enum".to_owned(),
                }
                .into());
            }
        } else if !schema.is_composite_type(inner.as_str()) {
            return Err(SingleViaductError::IncompatibleVariableType {
                variable: variable.to_owned(),
                path: joined,
                actual: inner.to_string(),
                expected: "an object to descend into".to_owned(),
            }
            .into());
        }
        current_type = inner;
    }
    let terminal = PathTerminal {
        type_name: current_type.to_string(),
        nullable,
        path: joined,
    };
    Ok((fields, terminal))
}

fn is_built_in_scalar(name: &str) -> bool {
    matches!(name, "Int" | "Float" | "String" | "Boolean" | "ID")
}

/// Collects `$variable` usages in argument positions across a planned
/// selection tree, with the argument-declared type expected at each usage.
fn collect_variable_usages(
    schema: &ViaductSchema,
    fields: &[Arc<PlannedField>],
    out: &mut Vec<(String, ast::Type)>,
) {
    for field in fields {
        if let Some(definition) = &field.definition {
            for argument in &field.arguments {
                if let Some(argument_definition) = definition
                    .arguments
                    .iter()
                    .find(|a| a.name == argument.name)
                {
                    collect_value_usages(schema, &argument.value, &argument_definition.ty, out);
                }
            }
        }
        collect_variable_usages(schema, &field.selections, out);
    }
}

fn collect_value_usages(
    schema: &ViaductSchema,
    value: &Value,
    ty: &ast::Type,
    out: &mut Vec<(String, ast::Type)>,
) {
    match value {
        Value::Variable(name) => out.push((name.as_str().to_owned(), ty.clone())),
        Value::List(values) => {
            let item = if ty.is_list() { ty.item_type() } else { ty };
            for value in values {
                collect_value_usages(schema, value, item, out);
            }
        }
        Value::Object(fields) => {
            let Some(ExtendedType::InputObject(input_object)) =
                schema.get_type(ty.inner_named_type().as_str())
            else {
                return;
            };
            for (name, value) in fields {
                if let Some(field) = input_object.fields.get(name.as_str()) {
                    collect_value_usages(schema, value, &field.ty, out);
                }
            }
        }
        _ => {}
    }
}

fn component_node(
    component: &apollo_compiler::schema::Component<ast::FieldDefinition>,
) -> Node<ast::FieldDefinition> {
    component.node.clone()
}
