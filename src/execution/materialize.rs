//! Turns the memoized result graph into response data.
//!
//! Snapshot assembly applies the GraphQL partial-failure rules: a failed or
//! null non-null field propagates null to the nearest nullable ancestor,
//! and every failure is attached to the `errors` list with its path.
//! View materialization (for RSS typed views) is stricter: any failure in
//! the declared selections fails the dependent resolver instead.

use crate::error::GraphQLError;
use crate::error::PathSegment;
use crate::error::ResolverErrorBuilder;
use crate::error::ResponsePath;
use crate::error::ViaductError;
use crate::execution::engine_result::CellKey;
use crate::execution::engine_result::EngineValue;
use crate::execution::engine_result::FieldFailure;
use crate::execution::engine_result::ObjectEngineResult;
use crate::execution::value::argument_fingerprint;
use crate::execution::value::coerce_arguments;
use crate::plan::PlannedField;
use crate::schema::ViaductSchema;
use apollo_compiler::ast;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Signals that a null must propagate to the nearest nullable ancestor.
struct Bubble;

pub(crate) struct Snapshot<'a> {
    schema: &'a ViaductSchema,
    variables: &'a JsonMap<String, JsonValue>,
    error_builder: &'a dyn ResolverErrorBuilder,
    errors: Vec<GraphQLError>,
}

impl<'a> Snapshot<'a> {
    pub(crate) fn new(
        schema: &'a ViaductSchema,
        variables: &'a JsonMap<String, JsonValue>,
        error_builder: &'a dyn ResolverErrorBuilder,
    ) -> Self {
        Snapshot {
            schema,
            variables,
            error_builder,
            errors: Vec::new(),
        }
    }

    /// Assembles the response tree for the given root selections. Returns
    /// `None` for `data` when a non-null root selection bubbled.
    pub(crate) fn assemble(
        mut self,
        oer: &Arc<ObjectEngineResult>,
        fields: &[Arc<PlannedField>],
    ) -> (Option<JsonMap<String, JsonValue>>, Vec<GraphQLError>) {
        match self.object_value(oer, fields, &Vec::new()) {
            Ok(map) => (Some(map), self.errors),
            Err(Bubble) => (None, self.errors),
        }
    }

    fn object_value(
        &mut self,
        oer: &Arc<ObjectEngineResult>,
        fields: &[Arc<PlannedField>],
        path: &ResponsePath,
    ) -> Result<JsonMap<String, JsonValue>, Bubble> {
        let mut map = JsonMap::new();
        for field in fields {
            if !self
                .schema
                .satisfies_type_condition(oer.type_name().as_str(), field.parent_type.as_str())
            {
                continue;
            }
            if field.is_typename() {
                map.insert(
                    field.response_key.clone(),
                    JsonValue::String(oer.type_name().to_string()),
                );
                continue;
            }
            let mut field_path = path.clone();
            field_path.push(PathSegment::Field(field.response_key.clone()));

            let outcome = match resolved_outcome(oer, field, self.variables, &field_path) {
                Ok(outcome) => outcome,
                Err(failure) => Err(failure),
            };
            let non_null = field.ty().map(ast::Type::is_non_null).unwrap_or(false);
            match outcome {
                Err(failure) => {
                    self.push_failure(&failure);
                    if non_null {
                        return Err(Bubble);
                    }
                    map.insert(field.response_key.clone(), JsonValue::Null);
                }
                Ok(value) => {
                    let ty = field.ty().expect("non-typename fields carry a definition");
                    match self.complete_value(field, ty, value, &field_path) {
                        Ok(value) => {
                            map.insert(field.response_key.clone(), value);
                        }
                        Err(Bubble) => {
                            if non_null {
                                return Err(Bubble);
                            }
                            map.insert(field.response_key.clone(), JsonValue::Null);
                        }
                    }
                }
            }
        }
        Ok(map)
    }

    fn complete_value(
        &mut self,
        field: &Arc<PlannedField>,
        ty: &ast::Type,
        value: EngineValue,
        path: &ResponsePath,
    ) -> Result<JsonValue, Bubble> {
        match value {
            EngineValue::Null => self.null_slot(field, ty, path),
            EngineValue::Leaf(value) => {
                if value.is_null() {
                    self.null_slot(field, ty, path)
                } else {
                    Ok(value)
                }
            }
            EngineValue::List(items) => {
                if !ty.is_list() {
                    self.push_internal(
                        format!(
                            "resolver for \"{}\" returned a list for non-list type \"{ty}\"",
                            field.coordinate(),
                        ),
                        path,
                    );
                    return self.null_slot(field, ty, path);
                }
                let item_ty = ty.item_type();
                let mut out = Vec::with_capacity(items.len());
                for (index, item) in items.into_iter().enumerate() {
                    let mut item_path = path.clone();
                    item_path.push(PathSegment::Index(index));
                    match self.complete_value(field, item_ty, item, &item_path) {
                        Ok(value) => out.push(value),
                        // A bubbling item nulls the whole list.
                        Err(Bubble) => return self.null_slot(field, ty, path),
                    }
                }
                Ok(JsonValue::Array(out))
            }
            EngineValue::Object(child) => {
                match self.object_value(&child, &field.selections, path) {
                    Ok(map) => Ok(JsonValue::Object(map)),
                    Err(Bubble) => self.null_slot(field, ty, path),
                }
            }
        }
    }

    /// A slot that must hold null: fine for nullable types, a bubbled error
    /// otherwise.
    fn null_slot(
        &mut self,
        field: &Arc<PlannedField>,
        ty: &ast::Type,
        path: &ResponsePath,
    ) -> Result<JsonValue, Bubble> {
        if ty.is_non_null() {
            self.errors.push(
                GraphQLError::new(format!(
                    "Cannot return null for non-nullable field {}.",
                    field.coordinate(),
                ))
                .with_path(path.clone())
                .with_location(field.location),
            );
            Err(Bubble)
        } else {
            Ok(JsonValue::Null)
        }
    }

    fn push_failure(&mut self, failure: &FieldFailure) {
        let mut built =
            self.error_builder
                .build(&failure.error, &failure.path, failure.location);
        if built.is_empty() {
            built = crate::error::DefaultResolverErrorBuilder.build(
                &failure.error,
                &failure.path,
                failure.location,
            );
        }
        self.errors.extend(built);
    }

    fn push_internal(&mut self, message: String, path: &ResponsePath) {
        let failure = FieldFailure::new(ViaductError::internal(message), path.clone(), None);
        self.push_failure(&failure);
    }
}

/// Looks up a field's settled outcome, recomputing its memoization key from
/// the plan and the operation variables.
fn resolved_outcome(
    oer: &Arc<ObjectEngineResult>,
    field: &Arc<PlannedField>,
    variables: &JsonMap<String, JsonValue>,
    path: &ResponsePath,
) -> Result<Result<EngineValue, FieldFailure>, FieldFailure> {
    let definition = field
        .definition
        .as_ref()
        .expect("non-typename fields carry a definition");
    let arguments = coerce_arguments(definition, &field.arguments, variables)
        .map_err(|error| FieldFailure::new(error, path.clone(), field.location))?;
    let key = CellKey::new(field.field_name.clone(), argument_fingerprint(&arguments));
    match oer.peek(&key) {
        Some(outcome) => Ok(outcome),
        None => Err(FieldFailure::new(
            ViaductError::internal(format!(
                "field \"{}\" was selected but never resolved",
                field.coordinate(),
            )),
            path.clone(),
            field.location,
        )),
    }
}

/// Materializes the declared selections of an RSS (or subquery) as plain
/// JSON. Unlike snapshot assembly, any failure aborts materialization: the
/// dependent resolver cannot run on partial inputs.
pub(crate) fn materialize_view(
    schema: &ViaductSchema,
    oer: &Arc<ObjectEngineResult>,
    fields: &[Arc<PlannedField>],
    variables: &JsonMap<String, JsonValue>,
    path: &ResponsePath,
) -> Result<JsonMap<String, JsonValue>, FieldFailure> {
    let mut map = JsonMap::new();
    for field in fields {
        if !schema.satisfies_type_condition(oer.type_name().as_str(), field.parent_type.as_str())
        {
            continue;
        }
        if field.is_typename() {
            map.insert(
                field.response_key.clone(),
                JsonValue::String(oer.type_name().to_string()),
            );
            continue;
        }
        let mut field_path = path.clone();
        field_path.push(PathSegment::Field(field.response_key.clone()));
        let outcome = resolved_outcome(oer, field, variables, &field_path)??;
        let value = view_value(schema, field, outcome, variables, &field_path)?;
        map.insert(field.response_key.clone(), value);
    }
    Ok(map)
}

fn view_value(
    schema: &ViaductSchema,
    field: &Arc<PlannedField>,
    value: EngineValue,
    variables: &JsonMap<String, JsonValue>,
    path: &ResponsePath,
) -> Result<JsonValue, FieldFailure> {
    Ok(match value {
        EngineValue::Null => JsonValue::Null,
        EngineValue::Leaf(value) => value,
        EngineValue::List(items) => JsonValue::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let mut item_path = path.clone();
                    item_path.push(PathSegment::Index(index));
                    view_value(schema, field, item, variables, &item_path)
                })
                .collect::<Result<_, _>>()?,
        ),
        EngineValue::Object(child) => JsonValue::Object(materialize_view(
            schema,
            &child,
            &field.selections,
            variables,
            path,
        )?),
    })
}
