use crate::error::ViaductError;
use crate::global_id::GlobalId;
use apollo_compiler::ast;
use apollo_compiler::ast::Value;
use apollo_compiler::Node;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::fmt::Write;

/// The outcome a resolver produces for one field: a materialized value, a
/// node reference carrying only an id, or an error. Batched resolvers return
/// one of these per input context so a batch can partially fail.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Value(JsonValue),
    Node(NodeReference),
    Error(ViaductError),
}

impl FieldValue {
    pub fn value(value: impl Into<JsonValue>) -> Self {
        FieldValue::Value(value.into())
    }

    pub fn null() -> Self {
        FieldValue::Value(JsonValue::Null)
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        FieldValue::Value(value)
    }
}

/// A reference to a node by identity. The producing resolver can read the
/// id; every other field of the node is resolved downstream by the engine
/// through the type's node resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReference {
    id: GlobalId,
}

impl NodeReference {
    pub fn new(id: GlobalId) -> Self {
        NodeReference { id }
    }

    pub fn global_id(&self) -> &GlobalId {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.id.type_name
    }
}

/// Coerces a literal argument value to JSON, substituting variables from the
/// given map. Absent variables coerce to null; validation has already
/// established that the usage sites tolerate it.
pub(crate) fn ast_value_to_json(
    value: &Value,
    variables: &JsonMap<String, JsonValue>,
) -> Result<JsonValue, ViaductError> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Enum(name) => JsonValue::String(name.as_str().to_owned()),
        Value::Variable(name) => variables
            .get(name.as_str())
            .cloned()
            .unwrap_or(JsonValue::Null),
        Value::String(value) => JsonValue::String(value.as_str().to_owned()),
        Value::Boolean(value) => JsonValue::Bool(*value),
        Value::Int(value) => match value.try_to_i32() {
            Ok(value) => JsonValue::from(i64::from(value)),
            Err(_) => JsonValue::from(value.try_to_f64().map_err(|_| {
                ViaductError::internal("integer literal does not fit a supported numeric type")
            })?),
        },
        Value::Float(value) => JsonValue::from(
            value
                .try_to_f64()
                .map_err(|_| ViaductError::internal("float literal overflows f64"))?,
        ),
        Value::List(values) => JsonValue::Array(
            values
                .iter()
                .map(|value| ast_value_to_json(value, variables))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(fields) => {
            let mut map = JsonMap::new();
            for (name, value) in fields {
                map.insert(
                    name.as_str().to_owned(),
                    ast_value_to_json(value, variables)?,
                );
            }
            JsonValue::Object(map)
        }
    })
}

/// Coerces the provided arguments of a field against its definition:
/// variables are substituted, omitted arguments take their declared default.
/// Arguments that are absent and have no default are left out of the map.
pub(crate) fn coerce_arguments(
    definition: &ast::FieldDefinition,
    provided: &[Node<ast::Argument>],
    variables: &JsonMap<String, JsonValue>,
) -> Result<JsonMap<String, JsonValue>, ViaductError> {
    let mut coerced = JsonMap::new();
    let empty = JsonMap::new();
    for argument_definition in &definition.arguments {
        let name = argument_definition.name.as_str();
        match provided.iter().find(|a| a.name == name) {
            Some(argument) => {
                coerced.insert(
                    name.to_owned(),
                    ast_value_to_json(&argument.value, variables)?,
                );
            }
            None => {
                if let Some(default_value) = &argument_definition.default_value {
                    coerced.insert(name.to_owned(), ast_value_to_json(default_value, &empty)?);
                }
            }
        }
    }
    Ok(coerced)
}

/// Canonical fingerprint of a coerced argument map: object keys sorted
/// recursively, scalars in their JSON form. Two invocations with the same
/// fingerprint on the same engine-result node share one computation.
pub(crate) fn argument_fingerprint(arguments: &JsonMap<String, JsonValue>) -> String {
    if arguments.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    write_canonical_map(arguments, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => write_canonical_map(map, out),
        JsonValue::Array(values) => {
            out.push('[');
            for (index, value) in values.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(value, out);
            }
            out.push(']');
        }
        other => {
            // Null, booleans, numbers, and strings already have one JSON
            // spelling each.
            let _ = write!(out, "{other}");
        }
    }
}

fn write_canonical_map(map: &JsonMap<String, JsonValue>, out: &mut String) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort_unstable();
    out.push('{');
    for (index, key) in keys.into_iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        let _ = write!(out, "{key}:");
        write_canonical(&map[key], out);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: JsonValue) -> JsonMap<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn fingerprint_sorts_input_object_keys() {
        let a = map(json!({"filter": {"b": 1, "a": 2}}));
        let b = map(json!({"filter": {"a": 2, "b": 1}}));
        assert_eq!(argument_fingerprint(&a), argument_fingerprint(&b));
    }

    #[test]
    fn fingerprint_distinguishes_values() {
        let a = map(json!({"n": 4}));
        let b = map(json!({"n": 3}));
        assert_ne!(argument_fingerprint(&a), argument_fingerprint(&b));
    }

    #[test]
    fn no_arguments_fingerprint_is_empty() {
        assert_eq!(argument_fingerprint(&JsonMap::new()), "");
    }
}
