use crate::error::ErrorLocation;
use crate::error::SingleViaductError;
use crate::error::ViaductError;
use crate::plan::rss;
use crate::plan::CheckerPlan;
use crate::plan::ExecutionPlan;
use crate::plan::OperationKind;
use crate::plan::PlannedField;
use crate::plan::ResolverPlan;
use crate::registry::FieldCoordinate;
use crate::registry::ResolverRegistry;
use crate::schema::ViaductSchema;
use apollo_compiler::ast;
use apollo_compiler::executable;
use apollo_compiler::schema::ExtendedType;
use apollo_compiler::schema::Name;
use apollo_compiler::ExecutableDocument;
use apollo_compiler::Node;
use indexmap::IndexMap;
use indexmap::IndexSet;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

/// Planner settings.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Upper bound on cached execution plans. The cache is keyed by a
    /// fingerprint of (operation text, operation name, schema id); when the
    /// bound is reached the oldest entry is evicted. Plans are immutable and
    /// shared, so a generous bound costs only memory.
    pub plan_cache_capacity: usize,

    /// Plan `@resolver` fields with no registered implementation as trivial
    /// fields instead of failing. Meant for tooling that inspects schemas
    /// and plan shapes without the embedder's dispatch table; execution
    /// against such plans reads nulls for those fields.
    pub allow_unregistered_resolvers: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            plan_cache_capacity: 1024,
            allow_unregistered_resolvers: false,
        }
    }
}

/// Supplies resolver plans to the selection walk. During engine build this
/// recursively constructs plans (resolver fragments may select other
/// resolver-backed fields); afterwards, lookups hit the prebuilt table.
pub(crate) trait ResolverPlanSource {
    fn resolver_plan(
        &mut self,
        schema: &ViaductSchema,
        coordinate: &FieldCoordinate,
    ) -> Result<Option<Arc<ResolverPlan>>, ViaductError>;
}

pub(crate) struct PrebuiltPlans<'a> {
    pub plans: &'a IndexMap<FieldCoordinate, Arc<ResolverPlan>>,
    pub allow_missing: bool,
}

impl ResolverPlanSource for PrebuiltPlans<'_> {
    fn resolver_plan(
        &mut self,
        _schema: &ViaductSchema,
        coordinate: &FieldCoordinate,
    ) -> Result<Option<Arc<ResolverPlan>>, ViaductError> {
        match self.plans.get(coordinate) {
            Some(plan) => Ok(Some(plan.clone())),
            None if self.allow_missing => Ok(None),
            None => Err(ViaductError::internal(format!(
                "no resolver plan for \"{coordinate}\""
            ))),
        }
    }
}

/// Build-time plan source with memoization and cycle detection.
struct DependencyPlanner<'a> {
    schema: &'a ViaductSchema,
    registry: &'a ResolverRegistry,
    built: IndexMap<FieldCoordinate, Arc<ResolverPlan>>,
    in_progress: IndexSet<FieldCoordinate>,
}

impl ResolverPlanSource for DependencyPlanner<'_> {
    fn resolver_plan(
        &mut self,
        _schema: &ViaductSchema,
        coordinate: &FieldCoordinate,
    ) -> Result<Option<Arc<ResolverPlan>>, ViaductError> {
        if let Some(plan) = self.built.get(coordinate) {
            return Ok(Some(plan.clone()));
        }
        if !self.in_progress.insert(coordinate.clone()) {
            return Err(SingleViaductError::InvalidFragment {
                message: format!(
                    "required selection sets form a cycle through \"{coordinate}\""
                ),
            }
            .into());
        }
        let result = self.build(coordinate);
        self.in_progress.swap_remove(coordinate);
        let plan = result?;
        self.built.insert(coordinate.clone(), plan.clone());
        Ok(Some(plan))
    }
}

impl DependencyPlanner<'_> {
    fn build(&mut self, coordinate: &FieldCoordinate) -> Result<Arc<ResolverPlan>, ViaductError> {
        let schema = self.schema;
        let entry = self.registry.field(coordinate).cloned().ok_or_else(|| {
            ViaductError::schema_validation(format!(
                "field \"{coordinate}\" declares @resolver but no resolver is registered for it",
            ))
        })?;
        let definition = schema
            .field_definition(&coordinate.type_name, &coordinate.field_name)
            .ok_or_else(|| {
                ViaductError::schema_validation(format!(
                    "a resolver is registered for \"{coordinate}\", which is not in the schema",
                ))
            })?
            .node
            .clone();
        let anchor = Name::new(coordinate.type_name.as_str()).map_err(|_| {
            ViaductError::internal(format!("invalid type name \"{}\"", coordinate.type_name))
        })?;
        let dependencies = rss::plan_dependencies(
            schema,
            &anchor,
            entry.registration.object_rss.as_deref(),
            entry.registration.query_rss.as_deref(),
            &entry.registration.variables,
            Some(&definition),
            self,
        )?;
        Ok(Arc::new(ResolverPlan {
            entry,
            dependencies,
        }))
    }
}

/// Builds and caches execution plans, and owns the prebuilt resolver and
/// checker dependency plans.
pub struct Planner {
    resolver_plans: IndexMap<FieldCoordinate, Arc<ResolverPlan>>,
    field_checker_plans: IndexMap<FieldCoordinate, Vec<Arc<CheckerPlan>>>,
    type_checker_plans: IndexMap<String, Vec<Arc<CheckerPlan>>>,
    cache: RwLock<IndexMap<u64, Arc<ExecutionPlan>>>,
    config: PlannerConfig,
}

impl Planner {
    pub(crate) fn new(
        full_schema: &ViaductSchema,
        registry: &ResolverRegistry,
        config: PlannerConfig,
    ) -> Result<Self, ViaductError> {
        // Every @resolver field needs an implementation before any request
        // can plan against it (tooling mode opts out).
        for (type_name, ty) in &full_schema.schema().types {
            if config.allow_unregistered_resolvers {
                break;
            }
            let fields = match ty {
                ExtendedType::Object(object) => &object.fields,
                ExtendedType::Interface(interface) => &interface.fields,
                _ => continue,
            };
            for field_name in fields.keys() {
                if full_schema.field_has_resolver(type_name.as_str(), field_name.as_str()) {
                    let coordinate =
                        FieldCoordinate::new(type_name.as_str(), field_name.as_str());
                    if registry.field(&coordinate).is_none() {
                        return Err(ViaductError::schema_validation(format!(
                            "field \"{coordinate}\" declares @resolver but no resolver is registered for it",
                        )));
                    }
                }
            }
        }

        let mut builder = DependencyPlanner {
            schema: full_schema,
            registry,
            built: IndexMap::new(),
            in_progress: IndexSet::new(),
        };
        let coordinates: Vec<FieldCoordinate> = registry.fields.keys().cloned().collect();
        for coordinate in &coordinates {
            let _ = builder.resolver_plan(full_schema, coordinate)?;
        }
        let resolver_plans = builder.built;

        let mut prebuilt = PrebuiltPlans {
            plans: &resolver_plans,
            allow_missing: false,
        };
        let mut field_checker_plans: IndexMap<FieldCoordinate, Vec<Arc<CheckerPlan>>> =
            IndexMap::new();
        for (coordinate, entries) in &registry.field_checkers {
            let definition = full_schema
                .field_definition(&coordinate.type_name, &coordinate.field_name)
                .ok_or_else(|| {
                    ViaductError::schema_validation(format!(
                        "a checker is registered for \"{coordinate}\", which is not in the schema",
                    ))
                })?
                .node
                .clone();
            let anchor = Name::new(coordinate.type_name.as_str()).map_err(|_| {
                ViaductError::internal(format!("invalid type name \"{}\"", coordinate.type_name))
            })?;
            let mut plans = Vec::new();
            for entry in entries {
                plans.push(Arc::new(CheckerPlan {
                    entry: entry.clone(),
                    dependencies: rss::plan_dependencies(
                        full_schema,
                        &anchor,
                        entry.registration.object_rss.as_deref(),
                        entry.registration.query_rss.as_deref(),
                        &entry.registration.variables,
                        Some(&definition),
                        &mut prebuilt,
                    )?,
                }));
            }
            field_checker_plans.insert(coordinate.clone(), plans);
        }

        let mut type_checker_plans: IndexMap<String, Vec<Arc<CheckerPlan>>> = IndexMap::new();
        for (type_name, entries) in &registry.type_checkers {
            let anchor = Name::new(type_name.as_str()).map_err(|_| {
                ViaductError::internal(format!("invalid type name \"{type_name}\""))
            })?;
            if full_schema.get_type(type_name).is_none() {
                return Err(ViaductError::schema_validation(format!(
                    "a type checker is registered for \"{type_name}\", which is not in the schema",
                )));
            }
            let mut plans = Vec::new();
            for entry in entries {
                plans.push(Arc::new(CheckerPlan {
                    entry: entry.clone(),
                    dependencies: rss::plan_dependencies(
                        full_schema,
                        &anchor,
                        entry.registration.object_rss.as_deref(),
                        entry.registration.query_rss.as_deref(),
                        &entry.registration.variables,
                        None,
                        &mut prebuilt,
                    )?,
                }));
            }
            type_checker_plans.insert(type_name.clone(), plans);
        }

        Ok(Planner {
            resolver_plans,
            field_checker_plans,
            type_checker_plans,
            cache: RwLock::new(IndexMap::new()),
            config,
        })
    }

    pub(crate) fn field_checkers(&self, coordinate: &FieldCoordinate) -> &[Arc<CheckerPlan>] {
        self.field_checker_plans
            .get(coordinate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn type_checkers(&self, type_name: &str) -> &[Arc<CheckerPlan>] {
        self.type_checker_plans
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Builds the plan for an operation, consulting the content-addressed
    /// cache unless the caller disabled it.
    pub(crate) fn plan_operation(
        &self,
        schema: &ViaductSchema,
        schema_key: &str,
        text: &str,
        operation_name: Option<&str>,
        cache_enabled: bool,
    ) -> Result<Arc<ExecutionPlan>, ViaductError> {
        let fingerprint = plan_fingerprint(text, operation_name, schema_key);
        if cache_enabled {
            if let Some(plan) = self.cache.read().get(&fingerprint) {
                log::trace!("plan cache hit for fingerprint {fingerprint:x}");
                return Ok(plan.clone());
            }
        }

        let document =
            ExecutableDocument::parse_and_validate(schema.schema(), text, "operation.graphql")
                .map_err(|with_errors| {
                    ViaductError::from(SingleViaductError::OperationValidation {
                        message: with_errors.errors.to_string(),
                    })
                })?;
        let operation = document.get_operation(operation_name).map_err(|_| {
            ViaductError::from(SingleViaductError::OperationValidation {
                message: match operation_name {
                    Some(name) => format!("operation \"{name}\" is not in the document"),
                    None => "the document does not have a single anonymous operation".to_owned(),
                },
            })
        })?;
        let kind = OperationKind::from_operation_type(operation.operation_type).ok_or_else(
            || {
                ViaductError::from(SingleViaductError::OperationValidation {
                    message: "subscriptions are not executed by this engine".to_owned(),
                })
            },
        )?;
        let root_type = schema.root_type(kind.operation_type()).cloned().ok_or_else(|| {
            ViaductError::from(SingleViaductError::OperationValidation {
                message: format!("the schema does not support {kind} operations"),
            })
        })?;

        let line_index = LineIndex::new(text);
        let mut source = PrebuiltPlans {
            plans: &self.resolver_plans,
            allow_missing: self.config.allow_unregistered_resolvers,
        };
        let fields = plan_selections(
            schema,
            Some(&document),
            &root_type,
            SelectionsRef::Exec(&operation.selection_set),
            &mut source,
            Some(&line_index),
        )?;
        let plan = Arc::new(ExecutionPlan {
            kind,
            root_type,
            fields,
            fingerprint,
        });

        if cache_enabled {
            let mut cache = self.cache.write();
            while cache.len() >= self.config.plan_cache_capacity {
                cache.shift_remove_index(0);
            }
            cache.insert(fingerprint, plan.clone());
        }
        Ok(plan)
    }

    /// Plans a root-anchored fragment for re-entrant execution
    /// (`selections_for`). Not cached: these are constructed by resolvers
    /// with inlined arguments and rarely repeat verbatim.
    pub(crate) fn plan_root_fragment(
        &self,
        schema: &ViaductSchema,
        anchor: &Name,
        fragment: &str,
    ) -> Result<Vec<Arc<PlannedField>>, ViaductError> {
        let parsed = rss::parse_fragment(anchor, fragment)?;
        if parsed.condition != *anchor {
            return Err(SingleViaductError::SubqueryExecution {
                message: format!(
                    "selection set is anchored on \"{}\" but executes against \"{anchor}\"",
                    parsed.condition,
                ),
            }
            .into());
        }
        let mut source = PrebuiltPlans {
            plans: &self.resolver_plans,
            allow_missing: self.config.allow_unregistered_resolvers,
        };
        plan_selections(
            schema,
            None,
            anchor,
            SelectionsRef::Ast(parsed.selections()),
            &mut source,
            None,
        )
    }
}

fn plan_fingerprint(text: &str, operation_name: Option<&str>, schema_key: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    operation_name.hash(&mut hasher);
    schema_key.hash(&mut hasher);
    hasher.finish()
}

/// Byte-offset to 1-indexed line/column mapping for one source text.
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in text.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        LineIndex { line_starts }
    }

    pub(crate) fn location(&self, offset: usize) -> ErrorLocation {
        let line = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index - 1,
        };
        ErrorLocation {
            line: line + 1,
            column: offset - self.line_starts[line] + 1,
        }
    }
}

/// Selections from either an ast fragment (resolver-declared) or a
/// validated executable document (operations).
pub(crate) enum SelectionsRef<'a> {
    Ast(&'a [ast::Selection]),
    Exec(&'a executable::SelectionSet),
}

impl SelectionsRef<'_> {
    fn is_empty(&self) -> bool {
        match self {
            SelectionsRef::Ast(selections) => selections.is_empty(),
            SelectionsRef::Exec(set) => set.selections.is_empty(),
        }
    }
}

struct DraftField {
    response_key: String,
    field_name: Name,
    parent_type: Name,
    definition: Option<Node<ast::FieldDefinition>>,
    arguments: Vec<Node<ast::Argument>>,
    resolver: Option<Arc<ResolverPlan>>,
    location: Option<ErrorLocation>,
    selections: Vec<DraftField>,
}

/// Recursively expands a selection set into planned fields: fragment
/// spreads and inline fragments are flattened, duplicate response keys are
/// merged, and each resolver-backed field gets its dispatcher reference.
pub(crate) fn plan_selections(
    schema: &ViaductSchema,
    document: Option<&ExecutableDocument>,
    parent_type: &Name,
    selections: SelectionsRef<'_>,
    source: &mut dyn ResolverPlanSource,
    line_index: Option<&LineIndex>,
) -> Result<Vec<Arc<PlannedField>>, ViaductError> {
    let mut drafts = Vec::new();
    collect_drafts(
        schema,
        document,
        parent_type,
        selections,
        source,
        line_index,
        &mut drafts,
    )?;
    Ok(freeze_drafts(drafts))
}

fn collect_drafts(
    schema: &ViaductSchema,
    document: Option<&ExecutableDocument>,
    parent_type: &Name,
    selections: SelectionsRef<'_>,
    source: &mut dyn ResolverPlanSource,
    line_index: Option<&LineIndex>,
    out: &mut Vec<DraftField>,
) -> Result<(), ViaductError> {
    match selections {
        SelectionsRef::Ast(items) => {
            for selection in items {
                match selection {
                    ast::Selection::Field(field) => {
                        let location = line_index.and_then(|index| {
                            field.location().map(|l| index.location(l.offset()))
                        });
                        out.push(draft_field(
                            schema,
                            document,
                            parent_type,
                            &field.name,
                            field.alias.as_ref(),
                            &field.arguments,
                            SelectionsRef::Ast(&field.selection_set),
                            source,
                            line_index,
                            location,
                        )?);
                    }
                    ast::Selection::InlineFragment(fragment) => {
                        let condition = fragment
                            .type_condition
                            .clone()
                            .unwrap_or_else(|| parent_type.clone());
                        collect_drafts(
                            schema,
                            document,
                            &condition,
                            SelectionsRef::Ast(&fragment.selection_set),
                            source,
                            line_index,
                            out,
                        )?;
                    }
                    ast::Selection::FragmentSpread(spread) => {
                        return Err(SingleViaductError::InvalidFragment {
                            message: format!(
                                "named fragment spread \"...{}\" is not supported in resolver fragments",
                                spread.fragment_name,
                            ),
                        }
                        .into());
                    }
                }
            }
        }
        SelectionsRef::Exec(set) => {
            for selection in &set.selections {
                match selection {
                    executable::Selection::Field(field) => {
                        let location = line_index.and_then(|index| {
                            field.location().map(|l| index.location(l.offset()))
                        });
                        out.push(draft_field(
                            schema,
                            document,
                            parent_type,
                            &field.name,
                            field.alias.as_ref(),
                            &field.arguments,
                            SelectionsRef::Exec(&field.selection_set),
                            source,
                            line_index,
                            location,
                        )?);
                    }
                    executable::Selection::InlineFragment(fragment) => {
                        let condition = fragment
                            .type_condition
                            .clone()
                            .unwrap_or_else(|| parent_type.clone());
                        collect_drafts(
                            schema,
                            document,
                            &condition,
                            SelectionsRef::Exec(&fragment.selection_set),
                            source,
                            line_index,
                            out,
                        )?;
                    }
                    executable::Selection::FragmentSpread(spread) => {
                        let document = document.ok_or_else(|| {
                            ViaductError::internal(
                                "fragment spread outside of an executable document",
                            )
                        })?;
                        let fragment = document
                            .fragments
                            .get(&spread.fragment_name)
                            .ok_or_else(|| {
                                ViaductError::from(SingleViaductError::OperationValidation {
                                    message: format!(
                                        "fragment \"{}\" is not defined",
                                        spread.fragment_name,
                                    ),
                                })
                            })?;
                        let condition = fragment.selection_set.ty.clone();
                        collect_drafts(
                            schema,
                            Some(document),
                            &condition,
                            SelectionsRef::Exec(&fragment.selection_set),
                            source,
                            line_index,
                            out,
                        )?;
                    }
                }
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn draft_field(
    schema: &ViaductSchema,
    document: Option<&ExecutableDocument>,
    parent_type: &Name,
    name: &Name,
    alias: Option<&Name>,
    arguments: &[Node<ast::Argument>],
    sub_selections: SelectionsRef<'_>,
    source: &mut dyn ResolverPlanSource,
    line_index: Option<&LineIndex>,
    location: Option<ErrorLocation>,
) -> Result<DraftField, ViaductError> {
    let response_key = alias.unwrap_or(name).as_str().to_owned();

    if name.as_str() == "__typename" {
        return Ok(DraftField {
            response_key,
            field_name: name.clone(),
            parent_type: parent_type.clone(),
            definition: None,
            arguments: Vec::new(),
            resolver: None,
            location,
            selections: Vec::new(),
        });
    }

    let Some(definition) = schema.field_definition(parent_type.as_str(), name.as_str()) else {
        return Err(SingleViaductError::UnknownField {
            type_name: parent_type.to_string(),
            field_name: name.to_string(),
        }
        .into());
    };
    let definition = definition.node.clone();

    let resolver = if schema.field_has_resolver(parent_type.as_str(), name.as_str()) {
        let coordinate = FieldCoordinate::new(parent_type.as_str(), name.as_str());
        source.resolver_plan(schema, &coordinate)?
    } else {
        None
    };

    let inner_type = definition.ty.inner_named_type().clone();
    let mut selections = Vec::new();
    if schema.is_composite_type(inner_type.as_str()) {
        collect_drafts(
            schema,
            document,
            &inner_type,
            sub_selections,
            source,
            line_index,
            &mut selections,
        )?;
    } else if !sub_selections.is_empty() {
        return Err(SingleViaductError::InvalidFragment {
            message: format!(
                "field \"{parent_type}.{name}\" of leaf type \"{inner_type}\" cannot have sub-selections",
            ),
        }
        .into());
    }

    Ok(DraftField {
        response_key,
        field_name: name.clone(),
        parent_type: parent_type.clone(),
        definition: Some(definition),
        arguments: arguments.to_vec(),
        resolver,
        location,
        selections,
    })
}

fn freeze_drafts(drafts: Vec<DraftField>) -> Vec<Arc<PlannedField>> {
    let mut merged: Vec<DraftField> = Vec::new();
    for draft in drafts {
        match merged.iter_mut().find(|existing| {
            existing.response_key == draft.response_key
                && existing.parent_type == draft.parent_type
        }) {
            Some(existing) => existing.selections.extend(draft.selections),
            None => merged.push(draft),
        }
    }
    merged
        .into_iter()
        .map(|draft| {
            Arc::new(PlannedField {
                response_key: draft.response_key,
                field_name: draft.field_name,
                parent_type: draft.parent_type,
                definition: draft.definition,
                arguments: draft.arguments,
                resolver: draft.resolver,
                selections: freeze_drafts(draft.selections),
                location: draft.location,
            })
        })
        .collect()
}
