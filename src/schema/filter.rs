//! Derives scope-filtered schema views.
//!
//! Filtering removes out-of-scope fields, enum values, and
//! interface-implementation edges, removes out-of-scope types, then prunes
//! object types whose field set became empty. Pruning repeats to fixpoint:
//! removing a type invalidates fields referencing it, whose removal can
//! empty further types.

use crate::error::ViaductError;
use crate::schema::ViaductSchema;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::Schema;
use indexmap::IndexSet;

/// Produces the read-only schema view visible under `active`. Deterministic:
/// the same input set yields an identical schema structure.
pub fn filter_schema(
    base: &ViaductSchema,
    active: &IndexSet<String>,
) -> Result<ViaductSchema, ViaductError> {
    if active.is_empty() {
        return Err(ViaductError::schema_validation(
            "a scoped schema requires at least one scope id",
        ));
    }

    let mut schema: Schema = base.schema().clone().into_inner();
    let scopes = base.scopes();

    // First pass: drop out-of-scope types wholesale, and out-of-scope
    // members from the types that stay.
    let removed: Vec<String> = schema
        .types
        .keys()
        .filter(|name| !name_is_built_in(&schema, name))
        .filter(|name| !scopes.type_in_scope(name.as_str(), active))
        .map(|name| name.to_string())
        .collect();
    for name in &removed {
        schema.types.shift_remove(name.as_str());
    }

    for (type_name, ty) in schema.types.iter_mut() {
        match ty {
            ExtendedType::Object(object) => {
                let object = object.make_mut();
                object
                    .fields
                    .retain(|field_name, _| {
                        scopes.field_in_scope(type_name.as_str(), field_name.as_str(), active)
                    });
            }
            ExtendedType::Interface(interface) => {
                let interface = interface.make_mut();
                interface
                    .fields
                    .retain(|field_name, _| {
                        scopes.field_in_scope(type_name.as_str(), field_name.as_str(), active)
                    });
            }
            ExtendedType::Enum(enum_) => {
                let enum_ = enum_.make_mut();
                enum_.values.retain(|value_name, _| {
                    scopes.enum_value_scopes(type_name.as_str(), value_name.as_str()).matches(active)
                });
            }
            _ => {}
        }
    }

    // Fixpoint: remove dangling references left by earlier removals, then
    // types that became empty, until the schema stops changing.
    loop {
        let mut changed = false;

        let present: IndexSet<String> = schema.types.keys().map(|name| name.to_string()).collect();
        let type_exists = |name: &str| {
            present.contains(name)
                || matches!(name, "Int" | "Float" | "String" | "Boolean" | "ID")
                || name.starts_with("__")
        };

        for ty in schema.types.values_mut() {
            match ty {
                ExtendedType::Object(object) => {
                    let object = object.make_mut();
                    let before = object.fields.len() + object.implements_interfaces.len();
                    object.fields.retain(|_, field| {
                        type_exists(field.ty.inner_named_type().as_str())
                            && field
                                .arguments
                                .iter()
                                .all(|arg| type_exists(arg.ty.inner_named_type().as_str()))
                    });
                    object
                        .implements_interfaces
                        .retain(|interface| present.contains(interface.name.as_str()));
                    changed |=
                        before != object.fields.len() + object.implements_interfaces.len();
                }
                ExtendedType::Interface(interface) => {
                    let interface = interface.make_mut();
                    let before =
                        interface.fields.len() + interface.implements_interfaces.len();
                    interface.fields.retain(|_, field| {
                        type_exists(field.ty.inner_named_type().as_str())
                            && field
                                .arguments
                                .iter()
                                .all(|arg| type_exists(arg.ty.inner_named_type().as_str()))
                    });
                    interface
                        .implements_interfaces
                        .retain(|parent| present.contains(parent.name.as_str()));
                    changed |=
                        before != interface.fields.len() + interface.implements_interfaces.len();
                }
                ExtendedType::Union(union_) => {
                    let union_ = union_.make_mut();
                    let before = union_.members.len();
                    union_
                        .members
                        .retain(|member| present.contains(member.name.as_str()));
                    changed |= before != union_.members.len();
                }
                ExtendedType::InputObject(input_object) => {
                    let input_object = input_object.make_mut();
                    let before = input_object.fields.len();
                    input_object
                        .fields
                        .retain(|_, field| type_exists(field.ty.inner_named_type().as_str()));
                    changed |= before != input_object.fields.len();
                }
                _ => {}
            }
        }

        let empty: Vec<String> = schema
            .types
            .iter()
            .filter_map(|(name, ty)| {
                let is_empty = match ty {
                    ExtendedType::Object(object) => object.fields.is_empty(),
                    ExtendedType::Interface(interface) => interface.fields.is_empty(),
                    ExtendedType::Union(union_) => union_.members.is_empty(),
                    ExtendedType::Enum(enum_) => enum_.values.is_empty(),
                    ExtendedType::InputObject(input_object) => input_object.fields.is_empty(),
                    ExtendedType::Scalar(_) => false,
                };
                is_empty.then(|| name.to_string())
            })
            .collect();
        for name in &empty {
            schema.types.shift_remove(name.as_str());
            changed = true;
        }

        if !changed {
            break;
        }
    }

    let query_root = base.query_root();
    if !schema.types.contains_key(query_root.as_str()) {
        return Err(ViaductError::schema_validation(format!(
            "scope filtering removed the query root type \"{query_root}\"",
        )));
    }
    if let Some(mutation_root) = base.mutation_root() {
        if !schema.types.contains_key(mutation_root.as_str()) {
            schema.schema_definition.make_mut().mutation = None;
        }
    }

    let schema = schema.validate()?;
    ViaductSchema::from_schema(schema)
}

fn name_is_built_in(schema: &Schema, name: &str) -> bool {
    schema
        .types
        .get(name)
        .map(|ty| ty.is_built_in())
        .unwrap_or_else(|| {
            matches!(name, "Int" | "Float" | "String" | "Boolean" | "ID")
                || name.starts_with("__")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SDL: &str = r#"
        type Query {
            user: User @resolver
            audit: Audit @resolver @scope(to: ["internal"])
        }

        type User @scope(to: ["public", "internal"]) {
            id: ID!
            name: String
            email: String @scope(to: ["internal"])
        }

        type Audit @scope(to: ["internal"]) {
            entries: [String]
        }
    "#;

    fn active(scopes: &[&str]) -> IndexSet<String> {
        scopes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn public_view_hides_internal_elements() {
        let base = ViaductSchema::parse(SDL).unwrap();
        let filtered = filter_schema(&base, &active(&["public"])).unwrap();
        assert!(filtered.get_type("User").is_some());
        assert!(filtered.get_type("Audit").is_none());
        assert!(filtered.field_definition("User", "name").is_some());
        assert!(filtered.field_definition("User", "email").is_none());
        // Query.audit dangles once Audit is gone.
        assert!(filtered.field_definition("Query", "audit").is_none());
    }

    #[test]
    fn internal_view_keeps_everything() {
        let base = ViaductSchema::parse(SDL).unwrap();
        let filtered = filter_schema(&base, &active(&["internal"])).unwrap();
        assert!(filtered.field_definition("User", "email").is_some());
        assert!(filtered.get_type("Audit").is_some());
    }

    #[test]
    fn empty_scope_set_is_rejected() {
        let base = ViaductSchema::parse(SDL).unwrap();
        assert!(filter_schema(&base, &IndexSet::new()).is_err());
    }

    #[test]
    fn filtering_is_idempotent() {
        let base = ViaductSchema::parse(SDL).unwrap();
        let once = filter_schema(&base, &active(&["public"])).unwrap();
        let twice = filter_schema(&once, &active(&["public"])).unwrap();
        assert_eq!(
            once.schema().to_string(),
            twice.schema().to_string(),
        );
    }

    #[test]
    fn scope_monotonicity() {
        let base = ViaductSchema::parse(SDL).unwrap();
        let narrow = filter_schema(&base, &active(&["public"])).unwrap();
        let wide = filter_schema(&base, &active(&["public", "internal"])).unwrap();
        for (name, ty) in &narrow.schema().types {
            assert!(
                wide.get_type(name).is_some(),
                "type {name} visible under the narrow view but not the wide one",
            );
            if let ExtendedType::Object(object) = ty {
                for field in object.fields.keys() {
                    assert!(
                        wide.field_definition(name.as_str(), field.as_str()).is_some(),
                        "field {name}.{field} visible under the narrow view but not the wide one",
                    );
                }
            }
        }
    }
}
