//! Script runtime facade
//!
//! The two entry points the workflow engine uses:
//!
//! - [`ScriptRuntime::execute`]: value expressions, full variable loading
//! - [`ScriptRuntime::evaluate_condition`]: conditions, lazy variable loading
//!
//! One call moves through `checked out -> context populated -> variables bound ->
//! evaluated -> released`. Release happens when the pool guard drops, so it also
//! happens on evaluation errors and panics.

use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::context::{lock_context, ContextRegistry};
use super::error::{ScriptError, ScriptResult};
use super::loading::{bind_variables, VariableLoading};
use super::pool::{Constructor, InstancePool, PoolStats};
use crate::builtins::{default_catalog, BuiltinEnv, Catalog};
use crate::config::{Config, PoolConfig};
use crate::dispatch::{DispatchHooks, Dispatcher};
use crate::engine::{Interpreter, Val};

/// Caller-supplied variables for one call
pub type Variables = Map<String, JsonValue>;

type CatalogFn = Arc<dyn Fn(&BuiltinEnv) -> Catalog + Send + Sync>;
type ConstructHook = Arc<dyn Fn(&mut Interpreter) -> anyhow::Result<()> + Send + Sync>;

struct RuntimeInner {
    pool: InstancePool,
    registry: Arc<ContextRegistry>,
    dispatcher: Arc<Dispatcher>,
}

/// Concurrent script-execution engine; clones share one pool
#[derive(Clone)]
pub struct ScriptRuntime {
    inner: Arc<RuntimeInner>,
}

impl ScriptRuntime {
    /// Runtime with the default built-in catalog
    pub fn new(config: &Config) -> ScriptResult<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::default()
    }

    /// Evaluate an expression and export its value
    ///
    /// Every entry of `variables` is bound onto the instance.
    pub fn execute(&self, expr: &str, variables: &Variables) -> ScriptResult<JsonValue> {
        self.run(expr, variables, VariableLoading::Full)
            .map(|value| value.to_json())
    }

    /// Evaluate an expression as a condition using ECMAScript truthiness
    ///
    /// Only variables whose names appear in `expr` are bound.
    pub fn evaluate_condition(&self, expr: &str, variables: &Variables) -> ScriptResult<bool> {
        self.run(expr, variables, VariableLoading::Lazy)
            .map(|value| value.is_truthy())
    }

    /// [`execute`](Self::execute) on tokio's blocking pool
    pub async fn execute_async(
        &self,
        expr: impl Into<String>,
        variables: Variables,
    ) -> ScriptResult<JsonValue> {
        let runtime = self.clone();
        let expr = expr.into();
        tokio::task::spawn_blocking(move || runtime.execute(&expr, &variables))
            .await
            .map_err(|e| ScriptError::Join(e.to_string()))?
    }

    /// [`evaluate_condition`](Self::evaluate_condition) on tokio's blocking pool
    pub async fn evaluate_condition_async(
        &self,
        expr: impl Into<String>,
        variables: Variables,
    ) -> ScriptResult<bool> {
        let runtime = self.clone();
        let expr = expr.into();
        tokio::task::spawn_blocking(move || runtime.evaluate_condition(&expr, &variables))
            .await
            .map_err(|e| ScriptError::Join(e.to_string()))?
    }

    fn run(&self, expr: &str, variables: &Variables, strategy: VariableLoading) -> ScriptResult<Val> {
        let mut instance = self.inner.pool.get()?;

        // Context must be complete before evaluation starts
        lock_context(instance.context()).populate_from(variables);
        let bound = bind_variables(&mut instance, expr, variables, strategy);

        let result = instance.eval(expr);

        debug!(
            instance = %instance.id(),
            loading = ?strategy,
            bound,
            ok = result.is_ok(),
            "Evaluated script"
        );

        result.map_err(ScriptError::from)
    }

    /* ===================== Dispatch Hooks ===================== */

    /// Install the distributed-mode hooks, replacing any previous record
    pub fn register_dispatch_hooks(&self, hooks: DispatchHooks) {
        self.inner.dispatcher.register(hooks);
    }

    /// Remove the hooks; returns whether any were registered
    pub fn unregister_dispatch_hooks(&self) -> bool {
        self.inner.dispatcher.unregister()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    /* ===================== Introspection ===================== */

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.inner.registry
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn prewarm(&self, count: usize) -> ScriptResult<()> {
        self.inner.pool.prewarm(count)
    }
}

impl std::fmt::Debug for ScriptRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRuntime")
            .field("pool", &self.inner.pool.stats())
            .field("dispatch_hooks", &self.inner.dispatcher.is_registered())
            .finish()
    }
}

/* ===================== Builder ===================== */

/// Builder for a [`ScriptRuntime`]
pub struct RuntimeBuilder {
    pool: PoolConfig,
    send_timeout: Duration,
    max_in_flight: usize,
    catalog: Option<CatalogFn>,
    extra: Catalog,
    on_construct: Option<ConstructHook>,
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        let config = Config::default();
        Self {
            pool: config.pool,
            send_timeout: config.dispatch.send_timeout(),
            max_in_flight: config.dispatch.max_in_flight,
            catalog: None,
            extra: Catalog::new(),
            on_construct: None,
        }
    }
}

impl RuntimeBuilder {
    /// Take pool and dispatch settings from a loaded config
    pub fn config(mut self, config: &Config) -> Self {
        self.pool = config.pool.clone();
        self.send_timeout = config.dispatch.send_timeout();
        self.max_in_flight = config.dispatch.max_in_flight;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Replace the default catalog
    pub fn catalog<F>(mut self, catalog: F) -> Self
    where
        F: Fn(&BuiltinEnv) -> Catalog + Send + Sync + 'static,
    {
        self.catalog = Some(Arc::new(catalog));
        self
    }

    /// Add built-ins on top of the catalog
    pub fn builtins(mut self, extra: Catalog) -> Self {
        self.extra = self.extra.extend(extra);
        self
    }

    /// Run after the catalog is bound on each newly constructed instance
    pub fn on_construct<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Interpreter) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_construct = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> ScriptResult<ScriptRuntime> {
        let registry = Arc::new(ContextRegistry::new());
        let dispatcher = Arc::new(
            Dispatcher::new(self.send_timeout).with_max_in_flight(self.max_in_flight),
        );
        let env = BuiltinEnv {
            registry: registry.clone(),
            dispatcher: dispatcher.clone(),
        };

        let catalog = match &self.catalog {
            Some(build_catalog) => build_catalog(&env),
            None => default_catalog(&env),
        }
        .extend(self.extra);

        let on_construct = self.on_construct;
        let constructor: Constructor = Arc::new(move |interp: &mut Interpreter| {
            catalog.bind(interp)?;
            if let Some(hook) = &on_construct {
                hook(interp)?;
            }
            Ok(())
        });

        let pool = InstancePool::new(registry.clone(), constructor, &self.pool);
        if self.pool.prewarm > 0 {
            pool.prewarm(self.pool.prewarm)?;
        }

        Ok(ScriptRuntime {
            inner: Arc::new(RuntimeInner {
                pool,
                registry,
                dispatcher,
            }),
        })
    }
}
