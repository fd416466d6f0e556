use crate::error::SingleViaductError;
use crate::error::ViaductError;
use apollo_compiler::ast::Directive;
use apollo_compiler::ast::Value;
use std::ops::Deref;

pub(crate) const RESOLVER_DIRECTIVE: &str = "resolver";
pub(crate) const SCOPE_DIRECTIVE: &str = "scope";
pub(crate) const SCOPE_TO_ARGUMENT: &str = "to";
pub(crate) const ID_OF_DIRECTIVE: &str = "idOf";
pub(crate) const ID_OF_TYPE_ARGUMENT: &str = "type";

/// Directive definitions the engine contributes when the schema document does
/// not define them itself.
pub(crate) const BUILTIN_DIRECTIVE_DEFINITIONS: &[(&str, &str)] = &[
    (
        "directive @resolver",
        "directive @resolver on FIELD_DEFINITION\n",
    ),
    (
        "directive @scope",
        "directive @scope(to: [String!]!) repeatable on OBJECT | INTERFACE | UNION | ENUM | SCALAR | INPUT_OBJECT | FIELD_DEFINITION | ENUM_VALUE\n",
    ),
    (
        "directive @idOf",
        "directive @idOf(type: String!) on FIELD_DEFINITION\n",
    ),
];

pub(crate) fn directive_required_string_argument(
    application: &Directive,
    name: &str,
) -> Result<String, ViaductError> {
    match application.arguments.iter().find(|a| a.name == name) {
        Some(a) => match a.value.deref() {
            Value::String(value) => Ok(value.as_str().to_owned()),
            _ => Err(SingleViaductError::SchemaValidation {
                message: format!(
                    "Argument \"{}\" of directive \"@{}\" must be a string.",
                    name, application.name
                ),
            }
            .into()),
        },
        None => Err(SingleViaductError::SchemaValidation {
            message: format!(
                "Required argument \"{}\" of directive \"@{}\" was not present.",
                name, application.name
            ),
        }
        .into()),
    }
}

pub(crate) fn directive_required_string_list_argument(
    application: &Directive,
    name: &str,
) -> Result<Vec<String>, ViaductError> {
    let invalid = || {
        ViaductError::from(SingleViaductError::SchemaValidation {
            message: format!(
                "Argument \"{}\" of directive \"@{}\" must be a list of strings.",
                name, application.name
            ),
        })
    };
    match application.arguments.iter().find(|a| a.name == name) {
        Some(a) => match a.value.deref() {
            Value::List(values) => values
                .iter()
                .map(|value| match value.deref() {
                    Value::String(value) => Ok(value.as_str().to_owned()),
                    _ => Err(invalid()),
                })
                .collect(),
            // A single string coerces to a one-element list.
            Value::String(value) => Ok(vec![value.as_str().to_owned()]),
            _ => Err(invalid()),
        },
        None => Err(SingleViaductError::SchemaValidation {
            message: format!(
                "Required argument \"{}\" of directive \"@{}\" was not present.",
                name, application.name
            ),
        }
        .into()),
    }
}
