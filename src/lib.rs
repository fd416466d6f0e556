//! Viaduct execution core: a re-entrant GraphQL execution engine.
//!
//! The engine composes a central schema with an explicitly-registered
//! dispatch table of resolvers, and executes operations against
//! scope-filtered views of that schema. Resolvers declare the data they
//! need as required selection sets, may batch per scheduling tick, and can
//! re-enter the engine with subqueries and submutations that share the
//! request's memoized results. Policy checkers gate fields and types, and
//! results follow the GraphQL partial-failure rules.

pub mod error;
pub mod execution;
pub mod flags;
pub mod global_id;
pub mod plan;
pub mod registry;
pub mod response;
pub mod schema;

use crate::error::DefaultResolverErrorBuilder;
use crate::error::ErrorReporter;
use crate::error::LogErrorReporter;
use crate::error::ResolverErrorBuilder;
use crate::execution::driver;
use crate::execution::instrumentation::ChainedInstrumentation;
use crate::execution::instrumentation::Instrumentation;
use crate::flags::FlagManager;
use crate::global_id::GlobalIdCodec;
use crate::plan::Planner;
use crate::plan::PlannerConfig;
use crate::registry::ResolverRegistry;
use crate::response::ExecutionInput;
use crate::response::ExecutionResult;
use crate::schema::filter::filter_schema;
use crate::schema::SchemaId;
use crate::schema::ViaductSchema;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::sync::Arc;

pub use crate::error::GraphQLError;
pub use crate::error::SingleViaductError;
pub use crate::error::ViaductError;
pub use crate::execution::checks::CheckerResult;
pub use crate::execution::checks::PolicyChecker;
pub use crate::execution::checks::PolicyError;
pub use crate::execution::context::RawSelectionSet;
pub use crate::execution::context::ResolverContext;
pub use crate::execution::context::SelectionView;
pub use crate::execution::value::FieldValue;
pub use crate::execution::value::NodeReference;
pub use crate::execution::CancellationToken;
pub use crate::global_id::GlobalId;
pub use crate::registry::BatchFieldResolver;
pub use crate::registry::FieldCoordinate;
pub use crate::registry::FieldResolver;
pub use crate::registry::NodeResolver;

/// Engine-wide settings, one sub-config per subsystem.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub planner: PlannerConfig,
}

pub(crate) struct EngineInner {
    pub full_schema: Arc<ViaductSchema>,
    pub registry: ResolverRegistry,
    pub planner: Planner,
    pub flags: Arc<dyn FlagManager>,
    pub instrumentation: ChainedInstrumentation,
    pub error_reporter: Arc<dyn ErrorReporter>,
    pub error_builder: Arc<dyn ResolverErrorBuilder>,
    pub global_id_codec: Arc<dyn GlobalIdCodec>,
    schema_views: RwLock<IndexMap<String, Arc<ViaductSchema>>>,
}

impl EngineInner {
    /// The schema view for a request, derived on first use and cached per
    /// scope set.
    pub(crate) fn schema_view(&self, id: &SchemaId) -> Result<Arc<ViaductSchema>, ViaductError> {
        match id {
            SchemaId::Full => Ok(self.full_schema.clone()),
            SchemaId::None => Err(ViaductError::schema_validation(
                "requests against SchemaId::None cannot resolve any schema element",
            )),
            SchemaId::Scoped { scopes, .. } => {
                let key = id.cache_key();
                if let Some(view) = self.schema_views.read().get(&key) {
                    return Ok(view.clone());
                }
                let view = Arc::new(filter_schema(&self.full_schema, scopes)?);
                self.schema_views.write().insert(key, view.clone());
                Ok(view)
            }
        }
    }
}

/// The assembled execution engine: central schema, dispatch table, and
/// collaborators. Cheap to clone and share; execution state is
/// per-request.
#[derive(Clone)]
pub struct ViaductEngine {
    inner: Arc<EngineInner>,
}

impl ViaductEngine {
    pub fn builder() -> ViaductEngineBuilder {
        ViaductEngineBuilder::default()
    }

    /// Executes one operation against the identified schema view.
    pub async fn execute(&self, input: ExecutionInput, schema_id: &SchemaId) -> ExecutionResult {
        driver::execute(self.inner.clone(), input, schema_id).await
    }

    /// The scope-filtered view a requester would see, mainly for tooling.
    pub fn schema_view(&self, id: &SchemaId) -> Result<Arc<ViaductSchema>, ViaductError> {
        self.inner.schema_view(id)
    }

    pub fn full_schema(&self) -> &Arc<ViaductSchema> {
        &self.inner.full_schema
    }

    /// Builds (or fetches from cache) the plan for an operation, for
    /// inspection and tooling.
    pub fn plan_operation(
        &self,
        operation_text: &str,
        operation_name: Option<&str>,
        schema_id: &SchemaId,
    ) -> Result<Arc<plan::ExecutionPlan>, ViaductError> {
        let schema = self.inner.schema_view(schema_id)?;
        self.inner.planner.plan_operation(
            &schema,
            &schema_id.cache_key(),
            operation_text,
            operation_name,
            true,
        )
    }
}

#[derive(Default)]
pub struct ViaductEngineBuilder {
    sdl: Option<String>,
    registry: Option<ResolverRegistry>,
    flags: Option<Arc<dyn FlagManager>>,
    instrumentations: Vec<Arc<dyn Instrumentation>>,
    error_reporter: Option<Arc<dyn ErrorReporter>>,
    error_builder: Option<Arc<dyn ResolverErrorBuilder>>,
    global_id_codec: Option<Arc<dyn GlobalIdCodec>>,
    config: EngineConfig,
}

impl ViaductEngineBuilder {
    pub fn schema_sdl(mut self, sdl: impl Into<String>) -> Self {
        self.sdl = Some(sdl.into());
        self
    }

    pub fn registry(mut self, registry: ResolverRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn flag_manager(mut self, flags: Arc<dyn FlagManager>) -> Self {
        self.flags = Some(flags);
        self
    }

    pub fn instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentations.push(instrumentation);
        self
    }

    pub fn error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = Some(reporter);
        self
    }

    pub fn resolver_error_builder(mut self, builder: Arc<dyn ResolverErrorBuilder>) -> Self {
        self.error_builder = Some(builder);
        self
    }

    pub fn global_id_codec(mut self, codec: Arc<dyn GlobalIdCodec>) -> Self {
        self.global_id_codec = Some(codec);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the schema, pre-plans every registered resolver's and
    /// checker's required selections, and assembles the engine.
    pub fn build(self) -> Result<ViaductEngine, ViaductError> {
        let sdl = self
            .sdl
            .ok_or_else(|| ViaductError::internal("an engine requires a schema"))?;
        let full_schema = Arc::new(ViaductSchema::parse(&sdl)?);
        let registry = self
            .registry
            .unwrap_or_else(|| ResolverRegistry::builder().build());
        let planner = Planner::new(&full_schema, &registry, self.config.planner.clone())?;
        Ok(ViaductEngine {
            inner: Arc::new(EngineInner {
                full_schema,
                registry,
                planner,
                flags: self.flags.unwrap_or_else(crate::flags::default_flag_manager),
                instrumentation: ChainedInstrumentation::new(self.instrumentations),
                error_reporter: self
                    .error_reporter
                    .unwrap_or_else(|| Arc::new(LogErrorReporter)),
                error_builder: self
                    .error_builder
                    .unwrap_or_else(|| Arc::new(DefaultResolverErrorBuilder)),
                global_id_codec: self
                    .global_id_codec
                    .unwrap_or_else(crate::global_id::default_global_id_codec),
                schema_views: RwLock::new(IndexMap::new()),
            }),
        })
    }
}
