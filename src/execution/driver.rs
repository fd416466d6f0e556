//! The execution driver: walks plans frontier by frontier, dispatches
//! resolvers, and owns the scheduling tick protocol.
//!
//! A frontier is the set of sibling fields produced by one expansion step
//! (one parent object's sub-selections, or every element of a resolved
//! list together). Each frontier is one scheduling tick: batched resolver
//! contexts enqueued by its members coalesce into a single `batch_resolve`
//! call, flushed when the last potential enqueuer of the tick has either
//! enqueued or short-circuited. Required selection sets are resolved before
//! their dependent resolver is enqueued, so RSS work forms an earlier tick
//! within the same operation; a field's object and query fragments resolve
//! together as one such tick. Re-entrant subqueries run their own frontier
//! cascade and therefore open a new tick frame.

use crate::error::SingleViaductError;
use crate::error::PathSegment;
use crate::error::ResponsePath;
use crate::error::ViaductError;
use crate::execution::batching::BatchCoalescer;
use crate::execution::checks::partition_errors;
use crate::execution::checks::CheckKind;
use crate::execution::checks::CheckerContext;
use crate::execution::checks::CheckerResult;
use crate::execution::checks::PolicyError;
use crate::execution::context::CtxInner;
use crate::execution::context::RawSelectionSet;
use crate::execution::context::ResolverContext;
use crate::execution::context::SelectionView;
use crate::execution::engine_result::CellClaim;
use crate::execution::engine_result::CellKey;
use crate::execution::engine_result::EngineValue;
use crate::execution::engine_result::FieldFailure;
use crate::execution::engine_result::FieldOutcome;
use crate::execution::engine_result::ObjectEngineResult;
use crate::execution::instrumentation::FieldInfo;
use crate::execution::instrumentation::Instrumentation;
use crate::execution::instrumentation::OperationInfo;
use crate::execution::materialize::materialize_view;
use crate::execution::materialize::Snapshot;
use crate::execution::value::argument_fingerprint;
use crate::execution::value::coerce_arguments;
use crate::execution::value::FieldValue;
use crate::execution::CancellationToken;
use crate::flags::Flag;
use crate::plan::CheckerPlan;
use crate::plan::OperationKind;
use crate::plan::PlannedField;
use crate::plan::PlannedVariableSource;
use crate::plan::ResolverPlan;
use crate::plan::SelectionDependencies;
use crate::registry::ResolverInstance;
use crate::response::ExecutionInput;
use crate::response::ExecutionResult;
use crate::schema::SchemaId;
use crate::schema::ViaductSchema;
use crate::EngineInner;
use apollo_compiler::schema::Name;
use futures::future::join_all;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::sync::Arc;

/// Per-request execution state, shared by every task of the request and by
/// re-entrant subqueries.
pub(crate) struct RequestState {
    pub engine: Arc<EngineInner>,
    pub schema: Arc<ViaductSchema>,
    pub query_oer: Arc<ObjectEngineResult>,
    pub mutation_oer: Option<Arc<ObjectEngineResult>>,
    pub request_context: Option<Arc<dyn Any + Send + Sync>>,
    pub cancellation: CancellationToken,
    pub operation: OperationInfo,
    coalescers: Mutex<IndexMap<String, Arc<BatchCoalescer>>>,
}

impl RequestState {
    fn coalescer_for(&self, plan: &ResolverPlan) -> Arc<BatchCoalescer> {
        let coordinate = plan.entry.coordinate.to_string();
        let mut coalescers = self.coalescers.lock();
        coalescers
            .entry(coordinate)
            .or_insert_with(|| BatchCoalescer::new(plan.entry.clone()))
            .clone()
    }

    fn flag(&self, flag: Flag) -> bool {
        self.engine.flags.is_enabled(flag)
    }
}

/// One field to resolve on one object node, with the variables in scope for
/// its argument literals.
pub(crate) struct FrontierEntry {
    pub oer: Arc<ObjectEngineResult>,
    pub field: Arc<PlannedField>,
    /// Full response path of the field, including its own response key.
    pub path: ResponsePath,
    pub variables: Arc<JsonMap<String, JsonValue>>,
}

/// Top-level execution of one operation.
pub(crate) async fn execute(
    engine: Arc<EngineInner>,
    input: ExecutionInput,
    schema_id: &SchemaId,
) -> ExecutionResult {
    let operation = OperationInfo {
        operation_id: input.operation_id.clone(),
        execution_id: input.execution_id.clone(),
        // Patched below once the plan settles the kind; begin/end hooks see
        // the same info object either way.
        kind: OperationKind::Query,
    };
    engine.instrumentation.operation_begin(&operation);
    let result = match execute_inner(&engine, input, schema_id, &operation).await {
        Ok(result) => result,
        Err(error) => {
            engine.error_reporter.report(&error, None);
            ExecutionResult::from_request_failure(&error)
        }
    };
    engine
        .instrumentation
        .operation_end(&operation, result.errors.len());
    result
}

async fn execute_inner(
    engine: &Arc<EngineInner>,
    input: ExecutionInput,
    schema_id: &SchemaId,
    operation: &OperationInfo,
) -> Result<ExecutionResult, ViaductError> {
    input.validate()?;
    let schema = engine.schema_view(schema_id)?;
    let schema_key = schema_id.cache_key();

    engine.instrumentation.plan_begin(operation);
    let cache_enabled = !engine.flags.is_enabled(Flag::DisableQueryPlanCache);
    let plan = engine.planner.plan_operation(
        &schema,
        &schema_key,
        &input.operation_text,
        input.operation_name.as_deref(),
        cache_enabled,
    );
    engine.instrumentation.plan_end(operation, plan.is_ok());
    let plan = plan?;

    let query_oer = ObjectEngineResult::new(schema.query_root().clone());
    let mutation_oer = match plan.kind() {
        OperationKind::Mutation => Some(ObjectEngineResult::new(plan.root_type().clone())),
        OperationKind::Query => None,
    };
    let root_oer = match plan.kind() {
        OperationKind::Query => query_oer.clone(),
        OperationKind::Mutation => mutation_oer.clone().expect("created above"),
    };

    let request = Arc::new(RequestState {
        engine: engine.clone(),
        schema: schema.clone(),
        query_oer,
        mutation_oer,
        request_context: input.request_context.clone(),
        cancellation: input.cancellation.clone(),
        operation: OperationInfo {
            kind: plan.kind(),
            ..operation.clone()
        },
        coalescers: Mutex::new(IndexMap::new()),
    });

    let variables = Arc::new(input.variables);
    match plan.kind() {
        OperationKind::Query => {
            let entries = root_entries(&root_oer, plan.fields(), &variables);
            resolve_frontier(&request, entries).await?;
        }
        OperationKind::Mutation => {
            // Top-level mutation fields are strictly serialized: the side
            // effects of field N settle before field N+1 starts.
            for field in plan.fields() {
                let entries = root_entries(&root_oer, std::slice::from_ref(field), &variables);
                resolve_frontier(&request, entries).await?;
            }
        }
    }

    if request.cancellation.is_cancelled() {
        // Anything still pending after a cancelled walk settles as Cancelled
        // so the snapshot never observes an open cell.
        request.query_oer.cancel_pending();
        if let Some(mutation_oer) = &request.mutation_oer {
            mutation_oer.cancel_pending();
        }
    }

    let snapshot = Snapshot::new(&schema, &variables, engine.error_builder.as_ref());
    let (data, errors) = snapshot.assemble(&root_oer, plan.fields());
    Ok(ExecutionResult::from_parts(
        data.map(JsonValue::Object),
        errors,
    ))
}

fn root_entries(
    oer: &Arc<ObjectEngineResult>,
    fields: &[Arc<PlannedField>],
    variables: &Arc<JsonMap<String, JsonValue>>,
) -> Vec<FrontierEntry> {
    fields
        .iter()
        .map(|field| FrontierEntry {
            oer: oer.clone(),
            field: field.clone(),
            path: vec![PathSegment::Field(field.response_key().to_owned())],
            variables: variables.clone(),
        })
        .collect()
}

/// Re-entrant execution of a root-anchored selection set from inside a
/// resolver (`ctx.query` / `ctx.mutation`). Shares the caller's memoized
/// results; opens its own tick frame.
pub(crate) async fn execute_raw(
    request: &Arc<RequestState>,
    raw: RawSelectionSet,
) -> Result<SelectionView, ViaductError> {
    if !request.flag(Flag::EnableSubqueryExecutionViaHandle) {
        return Err(SingleViaductError::SubqueryExecution {
            message: "subquery execution via the context handle is disabled".to_owned(),
        }
        .into());
    }
    let (oer, root_name) = match raw.kind {
        OperationKind::Query => (request.query_oer.clone(), request.schema.query_root().clone()),
        OperationKind::Mutation => {
            let oer = request.mutation_oer.clone().ok_or_else(|| {
                ViaductError::from(SingleViaductError::SubqueryExecution {
                    message: "the enclosing operation is not a mutation".to_owned(),
                })
            })?;
            (oer, request.schema.mutation_root().expect("mutation oer exists").clone())
        }
    };
    let variables = Arc::new(raw.variables);
    let entries = root_entries(&oer, &raw.fields, &variables);
    resolve_frontier(request, entries)
        .await
        .map_err(|error| wrap_subquery_error(error))?;
    let map = materialize_view(&request.schema, &oer, &raw.fields, &variables, &Vec::new())
        .map_err(|failure| wrap_subquery_error(failure.error.as_ref().clone()))?;
    Ok(SelectionView::new(root_name.as_str(), map))
}

fn wrap_subquery_error(error: ViaductError) -> ViaductError {
    match error.primary() {
        SingleViaductError::SubqueryExecution { .. } => error,
        _ => SingleViaductError::SubqueryExecution {
            message: error.to_string(),
        }
        .into(),
    }
}

/// Coordinates one scheduling tick: the last batched sibling to arrive
/// flushes every coalescer the tick touched.
struct Tick {
    state: Mutex<TickState>,
}

struct TickState {
    remaining: usize,
    targets: IndexMap<String, Arc<BatchCoalescer>>,
}

impl Tick {
    fn new(expected: usize) -> Arc<Self> {
        Arc::new(Tick {
            state: Mutex::new(TickState {
                remaining: expected,
                targets: IndexMap::new(),
            }),
        })
    }

    fn register(&self, coordinate: String, coalescer: Arc<BatchCoalescer>) {
        self.state.lock().targets.entry(coordinate).or_insert(coalescer);
    }

    /// Marks one expected enqueuer as done. The final arrival receives the
    /// coalescers to flush.
    fn arrive(&self) -> Vec<Arc<BatchCoalescer>> {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining == 0 {
            state.targets.drain(..).map(|(_, coalescer)| coalescer).collect()
        } else {
            Vec::new()
        }
    }
}

struct TickGate {
    tick: Arc<Tick>,
    counted: bool,
    passed: bool,
}

impl TickGate {
    fn new(tick: Arc<Tick>, counted: bool) -> Self {
        TickGate {
            tick,
            counted,
            passed: false,
        }
    }

    fn register(&self, coordinate: String, coalescer: Arc<BatchCoalescer>) {
        self.tick.register(coordinate, coalescer);
    }

    /// Declares this member's enqueue decision final; the last member
    /// flushes the tick.
    async fn pass(&mut self) {
        if !self.counted || self.passed {
            return;
        }
        self.passed = true;
        for coalescer in self.tick.arrive() {
            coalescer.flush().await;
        }
    }
}

/// Resolves a set of sibling fields as one tick, then recursively resolves
/// the frontier their values expose.
pub(crate) fn resolve_frontier<'a>(
    request: &'a Arc<RequestState>,
    entries: Vec<FrontierEntry>,
) -> BoxFuture<'a, Result<(), ViaductError>> {
    async move {
        if entries.is_empty() {
            return Ok(());
        }
        if request.cancellation.is_cancelled() {
            cancel_entries(&entries);
            return Ok(());
        }

        // Claim every cell up front so ownership (and the tick's expected
        // batch membership) is fixed before any work is awaited.
        enum ClaimedWork {
            Owner {
                entry: FrontierEntry,
                key: CellKey,
                arguments: JsonMap<String, JsonValue>,
            },
            Failed {
                entry: FrontierEntry,
                key: CellKey,
                failure: FieldFailure,
            },
            Waiter {
                entry: FrontierEntry,
                claim: CellClaim,
                key: CellKey,
            },
        }

        let mut work = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.field.is_typename() {
                // Materialization reads the type name straight off the node.
                continue;
            }
            match entry_cell(&entry) {
                Ok((arguments, key)) => match entry.oer.claim(&key) {
                    CellClaim::Started => work.push(ClaimedWork::Owner {
                        entry,
                        key,
                        arguments,
                    }),
                    claim => work.push(ClaimedWork::Waiter { entry, claim, key }),
                },
                Err(error) => {
                    let failure =
                        FieldFailure::new(error, entry.path.clone(), entry.field.location);
                    let key = CellKey::new(entry.field.field_name().clone(), String::new());
                    if matches!(entry.oer.claim(&key), CellClaim::Started) {
                        entry.oer.complete(&key, Err(failure.clone()));
                    }
                    work.push(ClaimedWork::Failed {
                        entry,
                        key,
                        failure,
                    });
                }
            }
        }

        let expected_batched = work
            .iter()
            .filter(|w| match w {
                ClaimedWork::Owner { entry, .. } => entry
                    .field
                    .resolver
                    .as_ref()
                    .map(|plan| plan.entry.registration.batched)
                    .unwrap_or(false),
                _ => false,
            })
            .count();
        let tick = Tick::new(expected_batched);

        let tasks: Vec<BoxFuture<'_, (FrontierEntry, FieldOutcome)>> = work
            .into_iter()
            .map(|item| match item {
                ClaimedWork::Owner {
                    entry,
                    key,
                    arguments,
                } => {
                    let counted = entry
                        .field
                        .resolver
                        .as_ref()
                        .map(|plan| plan.entry.registration.batched)
                        .unwrap_or(false);
                    let gate = TickGate::new(tick.clone(), counted);
                    run_owner(request, entry, key, arguments, gate).boxed()
                }
                ClaimedWork::Failed { entry, failure, .. } => {
                    async move { (entry, Err(failure)) }.boxed()
                }
                ClaimedWork::Waiter { entry, claim, key } => async move {
                    let outcome = match claim {
                        CellClaim::Ready(outcome) => outcome,
                        CellClaim::Wait(receiver) => receiver.await.unwrap_or_else(|_| {
                            Err(FieldFailure::cancelled(entry.path.clone()))
                        }),
                        CellClaim::Started => entry.oer.wait(&key, entry.path.clone()).await,
                    };
                    (entry, outcome)
                }
                .boxed(),
            })
            .collect();

        let settled = join_all(tasks).await;

        let mut children = Vec::new();
        for (entry, outcome) in &settled {
            if let Ok(value) = outcome {
                collect_child_entries(request, entry, value, &entry.path, &mut children);
            }
        }
        resolve_frontier(request, children).await
    }
    .boxed()
}

fn cancel_entries(entries: &[FrontierEntry]) {
    for entry in entries {
        if entry.field.is_typename() {
            continue;
        }
        if let Ok((_, key)) = entry_cell(entry) {
            if matches!(entry.oer.claim(&key), CellClaim::Started) {
                entry
                    .oer
                    .complete(&key, Err(FieldFailure::cancelled(entry.path.clone())));
            }
        }
    }
}

/// The coerced arguments and memoization key for one frontier entry.
fn entry_cell(
    entry: &FrontierEntry,
) -> Result<(JsonMap<String, JsonValue>, CellKey), ViaductError> {
    let definition = entry
        .field
        .definition
        .as_ref()
        .ok_or_else(|| ViaductError::internal("planned field is missing its definition"))?;
    let arguments = coerce_arguments(definition, &entry.field.arguments, &entry.variables)?;
    let key = CellKey::new(
        entry.field.field_name().clone(),
        argument_fingerprint(&arguments),
    );
    Ok((arguments, key))
}

fn collect_child_entries(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    value: &EngineValue,
    path: &ResponsePath,
    children: &mut Vec<FrontierEntry>,
) {
    match value {
        EngineValue::Object(child) => {
            for sub in &entry.field.selections {
                if sub.is_typename() {
                    continue;
                }
                if !request
                    .schema
                    .satisfies_type_condition(child.type_name().as_str(), sub.parent_type.as_str())
                {
                    continue;
                }
                let mut child_path = path.clone();
                child_path.push(PathSegment::Field(sub.response_key().to_owned()));
                children.push(FrontierEntry {
                    oer: child.clone(),
                    field: sub.clone(),
                    path: child_path,
                    variables: entry.variables.clone(),
                });
            }
        }
        EngineValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                let mut item_path = path.clone();
                item_path.push(PathSegment::Index(index));
                collect_child_entries(request, entry, item, &item_path, children);
            }
        }
        EngineValue::Null | EngineValue::Leaf(_) => {}
    }
}

async fn run_owner(
    request: &Arc<RequestState>,
    entry: FrontierEntry,
    key: CellKey,
    arguments: JsonMap<String, JsonValue>,
    mut gate: TickGate,
) -> (FrontierEntry, FieldOutcome) {
    let info = FieldInfo {
        type_name: entry.field.parent_type.as_str(),
        field_name: entry.field.field_name().as_str(),
        path: &entry.path,
    };
    request.engine.instrumentation.field_fetch_begin(&info);

    let outcome = match prepare_entry(request, &entry, &arguments).await {
        Prepared::Complete(outcome) => {
            gate.pass().await;
            outcome
        }
        Prepared::Trivial => {
            gate.pass().await;
            resolve_trivial(request, &entry).await
        }
        Prepared::Unary { ctx, plan } => {
            gate.pass().await;
            invoke_unary(request, &entry, &plan, ctx).await
        }
        Prepared::Batched { ctx, plan } => {
            let coalescer = request.coalescer_for(&plan);
            let receiver = coalescer.enqueue(ctx);
            if request.flag(Flag::KillswitchNonBlockingEnqueueFlush) {
                // Degraded mode: flush per enqueue instead of per tick.
                coalescer.flush().await;
            } else {
                gate.register(plan.entry.coordinate.to_string(), coalescer);
            }
            gate.pass().await;
            match receiver.await {
                Ok(value) => complete_field_value(request, &entry, value).await,
                Err(_) => Err(FieldFailure::cancelled(entry.path.clone())),
            }
        }
    };

    entry.oer.complete(&key, outcome.clone());
    let info = FieldInfo {
        type_name: entry.field.parent_type.as_str(),
        field_name: entry.field.field_name().as_str(),
        path: &entry.path,
    };
    request
        .engine
        .instrumentation
        .field_fetch_end(&info, outcome.is_err());
    if let Err(failure) = &outcome {
        request.engine.error_reporter.report(
            &failure.error,
            Some(&entry.field.coordinate().to_string()),
        );
    }
    (entry, outcome)
}

enum Prepared {
    Complete(FieldOutcome),
    Trivial,
    Unary {
        ctx: ResolverContext,
        plan: Arc<ResolverPlan>,
    },
    Batched {
        ctx: ResolverContext,
        plan: Arc<ResolverPlan>,
    },
}

/// Runs the field's policy checkers and resolves its required selection
/// sets, producing the dispatch decision.
async fn prepare_entry(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    arguments: &JsonMap<String, JsonValue>,
) -> Prepared {
    if request.flag(Flag::ExecuteAccessChecks) {
        let coordinate = entry.field.coordinate();
        let plans = request.engine.planner.field_checkers(&coordinate);
        let mut denials = Vec::new();
        for plan in plans {
            match run_checker(
                request,
                plan,
                CheckKind::Field,
                &entry.oer,
                arguments,
                &entry.path,
            )
            .await
            {
                Err(failure) => return Prepared::Complete(Err(failure)),
                Ok(Some(denial)) => denials.push(denial),
                Ok(None) => {}
            }
        }
        let (blocking, advisory) = partition_errors(denials);
        if let Some(advisory) = advisory {
            log::debug!(
                "advisory policy failure on {coordinate}: {}",
                advisory.message(),
            );
        }
        if let Some(denied) = blocking {
            return Prepared::Complete(Err(FieldFailure::new(
                SingleViaductError::PolicyDenied {
                    coordinate: coordinate.to_string(),
                    message: denied.message().to_owned(),
                }
                .into(),
                entry.path.clone(),
                entry.field.location,
            )));
        }
    }

    let Some(plan) = entry.field.resolver.clone() else {
        return Prepared::Trivial;
    };

    match resolve_dependencies(
        request,
        &plan.dependencies,
        &entry.oer,
        arguments,
        &entry.path,
    )
    .await
    {
        // Dependency failures are attributed to the dependent field.
        Err(failure) => Prepared::Complete(Err(FieldFailure {
            error: failure.error,
            path: entry.path.clone(),
            location: entry.field.location,
        })),
        Ok((object_view, query_view)) => {
            let ctx = ResolverContext {
                inner: Arc::new(CtxInner {
                    request: request.clone(),
                    arguments: arguments.clone(),
                    object_view,
                    query_view,
                    selections: entry.field.selections.clone(),
                    path: entry.path.clone(),
                    coordinate: plan.entry.coordinate.to_string(),
                    parent_type: entry.field.parent_type.clone(),
                    node_id: entry.oer.node_id().cloned(),
                }),
            };
            if plan.entry.registration.batched {
                Prepared::Batched { ctx, plan }
            } else {
                Prepared::Unary { ctx, plan }
            }
        }
    }
}

/// Resolves the dependency block of a resolver or checker: binds variables,
/// re-enters the driver for both RSS against the same memoized results, and
/// materializes the typed views.
async fn resolve_dependencies(
    request: &Arc<RequestState>,
    dependencies: &SelectionDependencies,
    object_oer: &Arc<ObjectEngineResult>,
    arguments: &JsonMap<String, JsonValue>,
    path: &ResponsePath,
) -> Result<(SelectionView, SelectionView), FieldFailure> {
    let mut variables = JsonMap::new();
    for variable in &dependencies.variables {
        let value = match &variable.source {
            PlannedVariableSource::Argument(segments) => {
                argument_path_value(arguments, segments)
            }
            PlannedVariableSource::ObjectPath(chain) => {
                resolve_path(request, object_oer, chain, path).await?
            }
            PlannedVariableSource::QueryPath(chain) => {
                resolve_path(request, &request.query_oer, chain, path).await?
            }
        };
        variables.insert(variable.name.clone(), value);
    }
    let variables = Arc::new(variables);

    // Both RSS resolve in parallel as one frontier, so they share a single
    // tick: a batched field required by the object fragment coalesces with
    // the same field required by the query fragment.
    let mut entries: Vec<FrontierEntry> = Vec::new();
    if let Some(rss) = &dependencies.object_rss {
        entries.extend(rss.fields.iter().map(|field| FrontierEntry {
            oer: object_oer.clone(),
            field: field.clone(),
            path: push_field(path, field.response_key()),
            variables: variables.clone(),
        }));
    }
    if let Some(rss) = &dependencies.query_rss {
        entries.extend(rss.fields.iter().map(|field| FrontierEntry {
            oer: request.query_oer.clone(),
            field: field.clone(),
            path: push_field(path, field.response_key()),
            variables: variables.clone(),
        }));
    }
    if !entries.is_empty() {
        resolve_frontier(request, entries)
            .await
            .map_err(|error| FieldFailure::new(error, path.clone(), None))?;
    }

    let object_view = match &dependencies.object_rss {
        Some(rss) => {
            let map =
                materialize_view(&request.schema, object_oer, &rss.fields, &variables, path)?;
            SelectionView::new(rss.anchor.as_str(), map)
        }
        None => SelectionView::empty(object_oer.type_name().as_str()),
    };

    let query_view = match &dependencies.query_rss {
        Some(rss) => {
            let map = materialize_view(
                &request.schema,
                &request.query_oer,
                &rss.fields,
                &variables,
                path,
            )?;
            SelectionView::new(rss.anchor.as_str(), map)
        }
        None => SelectionView::empty(request.schema.query_root().as_str()),
    };

    Ok((object_view, query_view))
}

fn push_field(path: &ResponsePath, key: &str) -> ResponsePath {
    let mut out = path.clone();
    out.push(PathSegment::Field(key.to_owned()));
    out
}

fn argument_path_value(
    arguments: &JsonMap<String, JsonValue>,
    segments: &[String],
) -> JsonValue {
    let mut current = match segments.first().and_then(|first| arguments.get(first)) {
        Some(value) => value,
        None => return JsonValue::Null,
    };
    for segment in &segments[1..] {
        match current {
            JsonValue::Object(map) => match map.get(segment) {
                Some(value) => current = value,
                None => return JsonValue::Null,
            },
            _ => return JsonValue::Null,
        }
    }
    current.clone()
}

/// Resolves a variable's object/query path stepwise: each segment is
/// resolved on the current node, descending into object values. A null
/// anywhere short-circuits to null.
async fn resolve_path(
    request: &Arc<RequestState>,
    start: &Arc<ObjectEngineResult>,
    chain: &[Arc<PlannedField>],
    base_path: &ResponsePath,
) -> Result<JsonValue, FieldFailure> {
    let empty_variables = Arc::new(JsonMap::new());
    let mut current = start.clone();
    for (index, segment) in chain.iter().enumerate() {
        let entry = FrontierEntry {
            oer: current.clone(),
            field: segment.clone(),
            path: push_field(base_path, segment.response_key()),
            variables: empty_variables.clone(),
        };
        let (_, key) = entry_cell(&entry)
            .map_err(|error| FieldFailure::new(error, base_path.clone(), None))?;
        let entry_path = entry.path.clone();
        resolve_frontier(request, vec![entry])
            .await
            .map_err(|error| FieldFailure::new(error, base_path.clone(), None))?;
        let outcome = current.peek(&key).ok_or_else(|| {
            FieldFailure::new(
                ViaductError::internal(format!(
                    "variable path segment \"{}\" was never resolved",
                    segment.response_key(),
                )),
                entry_path.clone(),
                None,
            )
        })?;
        let value = outcome?;
        let is_last = index + 1 == chain.len();
        match value {
            EngineValue::Null => return Ok(JsonValue::Null),
            EngineValue::Leaf(value) if is_last => return Ok(value),
            EngineValue::Object(child) if !is_last => current = child,
            _ => {
                return Err(FieldFailure::new(
                    ViaductError::internal(format!(
                        "variable path segment \"{}\" has an unexpected shape",
                        segment.response_key(),
                    )),
                    entry_path,
                    None,
                ));
            }
        }
    }
    Ok(JsonValue::Null)
}

/// Runs one checker, resolving its declared selections first.
async fn run_checker(
    request: &Arc<RequestState>,
    plan: &Arc<CheckerPlan>,
    kind: CheckKind,
    object_oer: &Arc<ObjectEngineResult>,
    arguments: &JsonMap<String, JsonValue>,
    path: &ResponsePath,
) -> Result<Option<PolicyError>, FieldFailure> {
    let info = FieldInfo {
        type_name: object_oer.type_name().as_str(),
        field_name: "",
        path,
    };
    request.engine.instrumentation.access_check_begin(&info, kind);

    let (object_view, query_view) =
        resolve_dependencies(request, &plan.dependencies, object_oer, arguments, path).await?;
    let checker = plan.entry.provider.provide().map_err(|error| {
        FieldFailure::new(
            ViaductError::internal(format!("could not construct policy checker: {error}")),
            path.clone(),
            None,
        )
    })?;
    let ctx = CheckerContext {
        arguments: arguments.clone(),
        object_view,
        query_view,
        request_context: request.request_context.clone(),
        kind,
    };
    let result = checker.check(ctx).await;
    let denial = match result {
        CheckerResult::Success => None,
        CheckerResult::Error(error) => Some(error),
    };
    request
        .engine
        .instrumentation
        .access_check_end(&info, kind, denial.is_some());
    Ok(denial)
}

/// A field with no dispatcher: its value comes from the parent object's
/// backing data, fetching the node's data through the type's node resolver
/// when the parent is a node reference.
async fn resolve_trivial(request: &Arc<RequestState>, entry: &FrontierEntry) -> FieldOutcome {
    let field_name = entry.field.field_name().as_str();
    let mut value = entry.oer.backing_value(field_name);
    if value.is_none() && entry.oer.node_id().is_some() {
        if let Some(node_entry) = request
            .engine
            .registry
            .node(entry.oer.type_name().as_str())
            .cloned()
        {
            let map = ensure_node_resolved(request, entry, &node_entry).await?;
            value = map.get(field_name).cloned();
        }
    }
    complete_field_value(
        request,
        entry,
        FieldValue::Value(value.unwrap_or(JsonValue::Null)),
    )
    .await
}

/// Invokes the node resolver for a node-reference object at most once per
/// node, memoized under a reserved cell.
async fn ensure_node_resolved(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    node_entry: &Arc<crate::registry::NodeEntry>,
) -> Result<JsonMap<String, JsonValue>, FieldFailure> {
    let key = CellKey::new(node_cell_name(), String::new());
    let outcome = match entry.oer.claim(&key) {
        CellClaim::Ready(outcome) => outcome,
        CellClaim::Wait(receiver) => receiver
            .await
            .unwrap_or_else(|_| Err(FieldFailure::cancelled(entry.path.clone()))),
        CellClaim::Started => {
            let outcome = invoke_node_resolver(request, entry, node_entry).await;
            entry.oer.complete(&key, outcome.clone());
            outcome
        }
    };
    match outcome? {
        EngineValue::Leaf(JsonValue::Object(map)) => Ok(map),
        _ => Err(FieldFailure::new(
            ViaductError::internal(format!(
                "node resolver for \"{}\" did not return an object",
                node_entry.type_name,
            )),
            entry.path.clone(),
            None,
        )),
    }
}

fn node_cell_name() -> Name {
    apollo_compiler::name!("__node")
}

async fn invoke_node_resolver(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    node_entry: &Arc<crate::registry::NodeEntry>,
) -> FieldOutcome {
    let resolver = node_entry.provider.provide().map_err(|error| {
        FieldFailure::new(
            SingleViaductError::ResolverConstructionError {
                coordinate: node_entry.type_name.clone(),
                message: error.to_string(),
            }
            .into(),
            entry.path.clone(),
            entry.field.location,
        )
    })?;
    let ctx = ResolverContext {
        inner: Arc::new(CtxInner {
            request: request.clone(),
            arguments: JsonMap::new(),
            object_view: SelectionView::empty(entry.oer.type_name().as_str()),
            query_view: SelectionView::empty(request.schema.query_root().as_str()),
            selections: entry.field.selections.clone(),
            path: entry.path.clone(),
            coordinate: node_entry.type_name.clone(),
            parent_type: entry.oer.type_name().clone(),
            node_id: entry.oer.node_id().cloned(),
        }),
    };
    match resolver.resolve_node(ctx).await {
        Ok(FieldValue::Value(JsonValue::Object(map))) => {
            Ok(EngineValue::Leaf(JsonValue::Object(map)))
        }
        Ok(_) => Err(FieldFailure::new(
            ViaductError::internal(format!(
                "node resolver for \"{}\" must return an object value",
                node_entry.type_name,
            )),
            entry.path.clone(),
            entry.field.location,
        )),
        Err(error) => Err(FieldFailure::new(
            SingleViaductError::ResolverError {
                coordinate: node_entry.type_name.clone(),
                message: error.to_string(),
            }
            .into(),
            entry.path.clone(),
            entry.field.location,
        )),
    }
}

async fn invoke_unary(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    plan: &Arc<ResolverPlan>,
    ctx: ResolverContext,
) -> FieldOutcome {
    let instance = match plan.entry.instantiate() {
        Ok(instance) => instance,
        Err(error) => {
            return Err(FieldFailure::new(
                error,
                entry.path.clone(),
                entry.field.location,
            ))
        }
    };
    let resolver = match instance {
        ResolverInstance::Unary(resolver) => resolver,
        ResolverInstance::Batched(_) => {
            return Err(FieldFailure::new(
                ViaductError::internal(format!(
                    "provider for \"{}\" returned a batched resolver for a unary field",
                    plan.entry.coordinate,
                )),
                entry.path.clone(),
                entry.field.location,
            ));
        }
    };
    match resolver.resolve(ctx).await {
        Ok(value) => complete_field_value(request, entry, value).await,
        Err(error) => Err(FieldFailure::new(
            SingleViaductError::ResolverError {
                coordinate: plan.entry.coordinate.to_string(),
                message: error.to_string(),
            }
            .into(),
            entry.path.clone(),
            entry.field.location,
        )),
    }
}

/// Converts a resolver's outcome into the engine's resolved form: nested
/// objects become memoized nodes, node references attach to their node
/// resolver, and type-level checkers gate every object value before it is
/// exposed downstream.
pub(crate) async fn complete_field_value(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    value: FieldValue,
) -> FieldOutcome {
    let info = FieldInfo {
        type_name: entry.field.parent_type.as_str(),
        field_name: entry.field.field_name().as_str(),
        path: &entry.path,
    };
    request.engine.instrumentation.field_completion_begin(&info);
    let result = complete_field_value_inner(request, entry, value).await;
    request.engine.instrumentation.field_completion_end(&info);
    result
}

async fn complete_field_value_inner(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    value: FieldValue,
) -> FieldOutcome {
    let mut created = Vec::new();
    let engine_value = match value {
        FieldValue::Error(error) => {
            return Err(FieldFailure::new(
                error,
                entry.path.clone(),
                entry.field.location,
            ))
        }
        FieldValue::Node(reference) => {
            let declared = entry
                .field
                .ty()
                .map(|ty| ty.inner_named_type().as_str().to_owned())
                .unwrap_or_default();
            if !request
                .schema
                .satisfies_type_condition(reference.type_name(), &declared)
            {
                return Err(FieldFailure::new(
                    ViaductError::internal(format!(
                        "node reference of type \"{}\" does not satisfy \"{declared}\"",
                        reference.type_name(),
                    )),
                    entry.path.clone(),
                    entry.field.location,
                ));
            }
            let type_name = match Name::new(reference.type_name()) {
                Ok(name) => name,
                Err(_) => {
                    return Err(FieldFailure::new(
                        ViaductError::internal("node reference has an invalid type name"),
                        entry.path.clone(),
                        entry.field.location,
                    ))
                }
            };
            let encoded = request
                .engine
                .global_id_codec
                .encode(reference.global_id());
            let oer =
                ObjectEngineResult::node(type_name, reference.global_id().clone(), encoded);
            created.push(oer.clone());
            EngineValue::Object(oer)
        }
        FieldValue::Value(json) => {
            let ty = match entry.field.ty() {
                Some(ty) => ty.clone(),
                None => {
                    return Err(FieldFailure::new(
                        ViaductError::internal("planned field is missing its type"),
                        entry.path.clone(),
                        entry.field.location,
                    ))
                }
            };
            match json_to_engine_value(request, entry, &ty, json, &mut created) {
                Ok(value) => value,
                Err(error) => {
                    return Err(FieldFailure::new(
                        error,
                        entry.path.clone(),
                        entry.field.location,
                    ))
                }
            }
        }
    };

    if request.flag(Flag::ExecuteAccessChecks) {
        for oer in &created {
            if let Some(denial) = run_type_checkers(request, entry, oer).await? {
                return Err(FieldFailure::new(
                    SingleViaductError::PolicyDenied {
                        coordinate: oer.type_name().to_string(),
                        message: denial.message().to_owned(),
                    }
                    .into(),
                    entry.path.clone(),
                    entry.field.location,
                ));
            }
        }
    }

    Ok(engine_value)
}

async fn run_type_checkers(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    oer: &Arc<ObjectEngineResult>,
) -> Result<Option<PolicyError>, FieldFailure> {
    let plans = request.engine.planner.type_checkers(oer.type_name().as_str());
    let mut denials = Vec::new();
    for plan in plans {
        if let Some(denial) = run_checker(
            request,
            plan,
            CheckKind::Type,
            oer,
            &JsonMap::new(),
            &entry.path,
        )
        .await?
        {
            denials.push(denial);
        }
    }
    let (blocking, advisory) = partition_errors(denials);
    if let Some(advisory) = advisory {
        log::debug!(
            "advisory policy failure on type \"{}\": {}",
            oer.type_name(),
            advisory.message(),
        );
    }
    Ok(blocking)
}

fn json_to_engine_value(
    request: &Arc<RequestState>,
    entry: &FrontierEntry,
    ty: &apollo_compiler::ast::Type,
    json: JsonValue,
    created: &mut Vec<Arc<ObjectEngineResult>>,
) -> Result<EngineValue, ViaductError> {
    if json.is_null() {
        return Ok(EngineValue::Null);
    }
    if ty.is_list() {
        let JsonValue::Array(items) = json else {
            return Err(ViaductError::internal(format!(
                "resolver for \"{}\" returned a non-list value for list type \"{ty}\"",
                entry.field.coordinate(),
            )));
        };
        let item_ty = ty.item_type();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(json_to_engine_value(request, entry, item_ty, item, created)?);
        }
        return Ok(EngineValue::List(out));
    }
    let inner = ty.inner_named_type();
    if !request.schema.is_composite_type(inner.as_str()) {
        return Ok(EngineValue::Leaf(json));
    }
    let JsonValue::Object(map) = json else {
        return Err(ViaductError::internal(format!(
            "resolver for \"{}\" returned a non-object value for type \"{inner}\"",
            entry.field.coordinate(),
        )));
    };
    let concrete = if request.schema.is_object_type(inner.as_str()) {
        inner.clone()
    } else {
        let type_name = map
            .get("__typename")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| {
                ViaductError::internal(format!(
                    "resolver for \"{}\" returned an abstract \"{inner}\" without __typename",
                    entry.field.coordinate(),
                ))
            })?;
        if !request
            .schema
            .satisfies_type_condition(type_name, inner.as_str())
        {
            return Err(ViaductError::internal(format!(
                "\"{type_name}\" is not a possible runtime type of \"{inner}\"",
            )));
        }
        Name::new(type_name)
            .map_err(|_| ViaductError::internal("invalid __typename in resolver value"))?
    };
    let oer = ObjectEngineResult::seeded(concrete, map);
    created.push(oer.clone());
    Ok(EngineValue::Object(oer))
}
