use crate::error::SingleViaductError;
use crate::error::ViaductError;
use crate::execution::checks::CheckerContext;
use crate::execution::checks::CheckerResult;
use crate::execution::checks::PolicyChecker;
use crate::execution::context::ResolverContext;
use crate::execution::value::FieldValue;
use async_trait::async_trait;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::future::Future;
use std::sync::Arc;

/// The registration marker for a field resolver: which type and field the
/// resolver serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldCoordinate {
    pub type_name: String,
    pub field_name: String,
}

impl FieldCoordinate {
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        FieldCoordinate {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl Display for FieldCoordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// A resolver for a single field. Instances are constructed fresh per
/// invocation by the registered provider.
#[async_trait]
pub trait FieldResolver: Send + Sync {
    async fn resolve(&self, ctx: ResolverContext) -> Result<FieldValue, ViaductError>;
}

/// A batching resolver: receives every context enqueued in one scheduling
/// tick and must return one value per context, in order.
#[async_trait]
pub trait BatchFieldResolver: Send + Sync {
    async fn batch_resolve(
        &self,
        ctxs: Vec<ResolverContext>,
    ) -> Result<Vec<FieldValue>, ViaductError>;
}

/// Resolves a node referenced by global id, returning the node's field
/// values as an object.
#[async_trait]
pub trait NodeResolver: Send + Sync {
    async fn resolve_node(&self, ctx: ResolverContext) -> Result<FieldValue, ViaductError>;
}

/// One freshly constructed resolver.
pub enum ResolverInstance {
    Unary(Box<dyn FieldResolver>),
    Batched(Box<dyn BatchFieldResolver>),
}

/// Constructs resolver instances. Supplied by the embedder's injection
/// layer; the engine calls it once per invocation.
pub trait ResolverProvider: Send + Sync {
    fn provide(&self) -> Result<ResolverInstance, ViaductError>;
}

impl<F> ResolverProvider for F
where
    F: Fn() -> Result<ResolverInstance, ViaductError> + Send + Sync,
{
    fn provide(&self) -> Result<ResolverInstance, ViaductError> {
        self()
    }
}

struct FnResolver<F>(F);

#[async_trait]
impl<F> FieldResolver for FnResolver<F>
where
    F: Fn(ResolverContext) -> BoxFuture<'static, Result<FieldValue, ViaductError>> + Send + Sync,
{
    async fn resolve(&self, ctx: ResolverContext) -> Result<FieldValue, ViaductError> {
        (self.0)(ctx).await
    }
}

struct FnBatchResolver<F>(F);

#[async_trait]
impl<F> BatchFieldResolver for FnBatchResolver<F>
where
    F: Fn(Vec<ResolverContext>) -> BoxFuture<'static, Result<Vec<FieldValue>, ViaductError>>
        + Send
        + Sync,
{
    async fn batch_resolve(
        &self,
        ctxs: Vec<ResolverContext>,
    ) -> Result<Vec<FieldValue>, ViaductError> {
        (self.0)(ctxs).await
    }
}

struct FnNodeResolver<F>(F);

#[async_trait]
impl<F> NodeResolver for FnNodeResolver<F>
where
    F: Fn(ResolverContext) -> BoxFuture<'static, Result<FieldValue, ViaductError>> + Send + Sync,
{
    async fn resolve_node(&self, ctx: ResolverContext) -> Result<FieldValue, ViaductError> {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as a unary resolver provider.
pub fn resolver_fn<F, Fut>(f: F) -> Arc<dyn ResolverProvider>
where
    F: Fn(ResolverContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<FieldValue, ViaductError>> + Send + 'static,
{
    Arc::new(move || {
        let f = f.clone();
        Ok(ResolverInstance::Unary(Box::new(FnResolver(
            move |ctx: ResolverContext| -> BoxFuture<'static, Result<FieldValue, ViaductError>> {
                Box::pin(f(ctx))
            },
        ))))
    })
}

/// Wraps an async closure as a batching resolver provider.
pub fn batch_resolver_fn<F, Fut>(f: F) -> Arc<dyn ResolverProvider>
where
    F: Fn(Vec<ResolverContext>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<FieldValue>, ViaductError>> + Send + 'static,
{
    Arc::new(move || {
        let f = f.clone();
        Ok(ResolverInstance::Batched(Box::new(FnBatchResolver(
            move |ctxs: Vec<ResolverContext>| -> BoxFuture<'static, Result<Vec<FieldValue>, ViaductError>> {
                Box::pin(f(ctxs))
            },
        ))))
    })
}

/// Constructs node resolver instances per invocation.
pub trait NodeResolverProvider: Send + Sync {
    fn provide(&self) -> Result<Box<dyn NodeResolver>, ViaductError>;
}

impl<F> NodeResolverProvider for F
where
    F: Fn() -> Result<Box<dyn NodeResolver>, ViaductError> + Send + Sync,
{
    fn provide(&self) -> Result<Box<dyn NodeResolver>, ViaductError> {
        self()
    }
}

/// Wraps an async closure as a node resolver provider.
pub fn node_resolver_fn<F, Fut>(f: F) -> Arc<dyn NodeResolverProvider>
where
    F: Fn(ResolverContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<FieldValue, ViaductError>> + Send + 'static,
{
    Arc::new(move || {
        let f = f.clone();
        Ok(Box::new(FnNodeResolver(
            move |ctx: ResolverContext| -> BoxFuture<'static, Result<FieldValue, ViaductError>> {
                Box::pin(f(ctx))
            },
        )) as Box<dyn NodeResolver>)
    })
}

/// Constructs policy checker instances per invocation.
pub trait CheckerProvider: Send + Sync {
    fn provide(&self) -> Result<Box<dyn PolicyChecker>, ViaductError>;
}

impl<F> CheckerProvider for F
where
    F: Fn() -> Result<Box<dyn PolicyChecker>, ViaductError> + Send + Sync,
{
    fn provide(&self) -> Result<Box<dyn PolicyChecker>, ViaductError> {
        self()
    }
}

struct FnChecker<F>(F);

#[async_trait]
impl<F> PolicyChecker for FnChecker<F>
where
    F: Fn(CheckerContext) -> BoxFuture<'static, CheckerResult> + Send + Sync,
{
    async fn check(&self, ctx: CheckerContext) -> CheckerResult {
        (self.0)(ctx).await
    }
}

/// Wraps an async closure as a checker provider.
pub fn checker_fn<F, Fut>(f: F) -> Arc<dyn CheckerProvider>
where
    F: Fn(CheckerContext) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = CheckerResult> + Send + 'static,
{
    Arc::new(move || {
        let f = f.clone();
        Ok(Box::new(FnChecker(
            move |ctx: CheckerContext| -> BoxFuture<'static, CheckerResult> {
                Box::pin(f(ctx))
            },
        )) as Box<dyn PolicyChecker>)
    })
}

/// Where a required-selection-set variable takes its value from. Paths are
/// dot-separated field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableSource {
    FromArgument(Vec<String>),
    FromObjectField(Vec<String>),
    FromQueryField(Vec<String>),
}

impl VariableSource {
    pub fn from_argument(path: &str) -> Self {
        VariableSource::FromArgument(split_path(path))
    }

    pub fn from_object_field(path: &str) -> Self {
        VariableSource::FromObjectField(split_path(path))
    }

    pub fn from_query_field(path: &str) -> Self {
        VariableSource::FromQueryField(split_path(path))
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').map(str::to_owned).collect()
}

/// A variable declared by a resolver or checker, with exactly one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableDeclaration {
    pub name: String,
    pub source: VariableSource,
}

impl VariableDeclaration {
    pub fn new(name: impl Into<String>, source: VariableSource) -> Self {
        VariableDeclaration {
            name: name.into(),
            source,
        }
    }
}

/// The metadata a resolver declares alongside its implementation: its
/// required selection sets and variable bindings, and whether it batches.
#[derive(Debug, Clone, Default)]
pub struct ResolverRegistration {
    /// `"fragment _ on T { ... }"`, or the `"fieldName"` shorthand.
    pub object_rss: Option<String>,
    /// `"fragment _ on Query { ... }"`.
    pub query_rss: Option<String>,
    pub variables: Vec<VariableDeclaration>,
    pub batched: bool,
}

impl ResolverRegistration {
    pub fn with_object_rss(mut self, fragment: impl Into<String>) -> Self {
        self.object_rss = Some(fragment.into());
        self
    }

    pub fn with_query_rss(mut self, fragment: impl Into<String>) -> Self {
        self.query_rss = Some(fragment.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, source: VariableSource) -> Self {
        self.variables.push(VariableDeclaration::new(name, source));
        self
    }

    pub fn batched(mut self) -> Self {
        self.batched = true;
        self
    }
}

/// Metadata declared by a checker: its own required selection sets and
/// variables.
#[derive(Debug, Clone, Default)]
pub struct CheckerRegistration {
    pub object_rss: Option<String>,
    pub query_rss: Option<String>,
    pub variables: Vec<VariableDeclaration>,
}

impl CheckerRegistration {
    pub fn with_object_rss(mut self, fragment: impl Into<String>) -> Self {
        self.object_rss = Some(fragment.into());
        self
    }

    pub fn with_query_rss(mut self, fragment: impl Into<String>) -> Self {
        self.query_rss = Some(fragment.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, source: VariableSource) -> Self {
        self.variables.push(VariableDeclaration::new(name, source));
        self
    }
}

pub(crate) struct FieldEntry {
    pub coordinate: FieldCoordinate,
    pub registration: ResolverRegistration,
    pub provider: Arc<dyn ResolverProvider>,
}

impl FieldEntry {
    /// Constructs one instance, checking that its shape matches the
    /// registration's batching declaration.
    pub(crate) fn instantiate(&self) -> Result<ResolverInstance, ViaductError> {
        let instance = self.provider.provide().map_err(|error| {
            ViaductError::from(SingleViaductError::ResolverConstructionError {
                coordinate: self.coordinate.to_string(),
                message: error.to_string(),
            })
        })?;
        let matches = match &instance {
            ResolverInstance::Unary(_) => !self.registration.batched,
            ResolverInstance::Batched(_) => self.registration.batched,
        };
        if !matches {
            return Err(SingleViaductError::ResolverConstructionError {
                coordinate: self.coordinate.to_string(),
                message: "provider shape does not match the registration's batching declaration"
                    .to_owned(),
            }
            .into());
        }
        Ok(instance)
    }
}

pub(crate) struct NodeEntry {
    pub type_name: String,
    pub provider: Arc<dyn NodeResolverProvider>,
}

pub(crate) struct CheckerEntry {
    pub registration: CheckerRegistration,
    pub provider: Arc<dyn CheckerProvider>,
}

/// The dispatch table: every resolver, node resolver, and checker the
/// engine can invoke, keyed by coordinate. Populated explicitly at startup.
#[derive(Default)]
pub struct ResolverRegistry {
    pub(crate) fields: IndexMap<FieldCoordinate, Arc<FieldEntry>>,
    pub(crate) nodes: IndexMap<String, Arc<NodeEntry>>,
    pub(crate) field_checkers: IndexMap<FieldCoordinate, Vec<Arc<CheckerEntry>>>,
    pub(crate) type_checkers: IndexMap<String, Vec<Arc<CheckerEntry>>>,
}

impl ResolverRegistry {
    pub fn builder() -> ResolverRegistryBuilder {
        ResolverRegistryBuilder {
            registry: ResolverRegistry::default(),
        }
    }

    pub(crate) fn field(&self, coordinate: &FieldCoordinate) -> Option<&Arc<FieldEntry>> {
        self.fields.get(coordinate)
    }

    pub(crate) fn node(&self, type_name: &str) -> Option<&Arc<NodeEntry>> {
        self.nodes.get(type_name)
    }

    pub(crate) fn checkers_for_field(&self, coordinate: &FieldCoordinate) -> &[Arc<CheckerEntry>] {
        self.field_checkers
            .get(coordinate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub(crate) fn checkers_for_type(&self, type_name: &str) -> &[Arc<CheckerEntry>] {
        self.type_checkers
            .get(type_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

pub struct ResolverRegistryBuilder {
    registry: ResolverRegistry,
}

impl ResolverRegistryBuilder {
    pub fn field_resolver(
        mut self,
        type_name: &str,
        field_name: &str,
        registration: ResolverRegistration,
        provider: Arc<dyn ResolverProvider>,
    ) -> Self {
        let coordinate = FieldCoordinate::new(type_name, field_name);
        self.registry.fields.insert(
            coordinate.clone(),
            Arc::new(FieldEntry {
                coordinate,
                registration,
                provider,
            }),
        );
        self
    }

    pub fn node_resolver(
        mut self,
        type_name: &str,
        provider: Arc<dyn NodeResolverProvider>,
    ) -> Self {
        self.registry.nodes.insert(
            type_name.to_owned(),
            Arc::new(NodeEntry {
                type_name: type_name.to_owned(),
                provider,
            }),
        );
        self
    }

    pub fn field_checker(
        mut self,
        type_name: &str,
        field_name: &str,
        registration: CheckerRegistration,
        provider: Arc<dyn CheckerProvider>,
    ) -> Self {
        self.registry
            .field_checkers
            .entry(FieldCoordinate::new(type_name, field_name))
            .or_default()
            .push(Arc::new(CheckerEntry {
                registration,
                provider,
            }));
        self
    }

    pub fn type_checker(
        mut self,
        type_name: &str,
        registration: CheckerRegistration,
        provider: Arc<dyn CheckerProvider>,
    ) -> Self {
        self.registry
            .type_checkers
            .entry(type_name.to_owned())
            .or_default()
            .push(Arc::new(CheckerEntry {
                registration,
                provider,
            }));
        self
    }

    pub fn build(self) -> ResolverRegistry {
        self.registry
    }
}
