//! Interpreter instance pool
//!
//! Instances are expensive to build (the whole built-in catalog is bound on
//! construction) and cheap to keep, so they are recycled. Checkout hands out a
//! [`PooledInstance`] guard that owns the instance exclusively; dropping the
//! guard returns it, which also covers early returns and panic unwinding.
//!
//! The idle set is bounded by `max_idle`: under a burst the pool grows as
//! needed, and instances returned while the idle set is full are dropped.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{debug, warn};

use super::context::{lock_context, ContextRegistry, ExecutionContext, SharedContext};
use super::error::{ScriptError, ScriptResult};
use crate::config::PoolConfig;
use crate::engine::Interpreter;

/// Callback that binds the built-in catalog onto a freshly created instance
pub type Constructor = Arc<dyn Fn(&mut Interpreter) -> anyhow::Result<()> + Send + Sync>;

/// An instance together with the context it carries for its whole life
struct Slot {
    interp: Interpreter,
    context: SharedContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Instances constructed since the pool was created
    pub created: usize,
    pub idle: usize,
    pub checked_out: usize,
}

pub struct InstancePool {
    idle: Mutex<Vec<Slot>>,
    registry: Arc<ContextRegistry>,
    constructor: Constructor,
    max_idle: usize,
    created: AtomicUsize,
    checked_out: AtomicUsize,
}

impl InstancePool {
    pub fn new(registry: Arc<ContextRegistry>, constructor: Constructor, config: &PoolConfig) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            registry,
            constructor,
            max_idle: config.max_idle,
            created: AtomicUsize::new(0),
            checked_out: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ContextRegistry> {
        &self.registry
    }

    /// Check out an instance with a blank context registered under its identity
    pub fn get(&self) -> ScriptResult<PooledInstance<'_>> {
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();

        let slot = match reused {
            Some(slot) => slot,
            None => self.construct()?,
        };

        {
            let mut context = lock_context(&slot.context);
            if !context.is_blank() {
                warn!(instance = %slot.interp.id(), "Checked out instance with stale context");
                context.reset();
            }
        }

        self.registry.insert(slot.interp.id(), slot.context.clone());
        self.checked_out.fetch_add(1, Ordering::Relaxed);

        Ok(PooledInstance {
            pool: self,
            slot: Some(slot),
        })
    }

    /// Build idle instances ahead of demand
    pub fn prewarm(&self, count: usize) -> ScriptResult<()> {
        let target = count.min(self.max_idle);
        let mut built = Vec::new();

        while self.idle_len() + built.len() < target {
            built.push(self.construct()?);
        }

        if !built.is_empty() {
            debug!(count = built.len(), "Prewarmed interpreter instances");
            self.idle
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(built);
        }

        Ok(())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            idle: self.idle_len(),
            checked_out: self.checked_out.load(Ordering::Relaxed),
        }
    }

    fn idle_len(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Create an instance and run the catalog callback on it exactly once
    fn construct(&self) -> ScriptResult<Slot> {
        let mut interp = Interpreter::new();

        if let Err(e) = (self.constructor)(&mut interp) {
            warn!(instance = %interp.id(), error = %e, "Discarding instance: construction failed");
            return Err(ScriptError::Construction(format!("{:#}", e)));
        }

        self.created.fetch_add(1, Ordering::Relaxed);
        debug!(
            instance = %interp.id(),
            natives = interp.native_count(),
            "Constructed interpreter instance"
        );

        Ok(Slot {
            interp,
            context: Arc::new(Mutex::new(ExecutionContext::new())),
        })
    }

    /// Return an instance: drop its registry entry, wipe per-call state, make it idle
    fn put(&self, mut slot: Slot) {
        let id = slot.interp.id();

        if self.registry.remove(id).is_none() {
            warn!(instance = %id, "Returned instance had no registry entry");
        }

        lock_context(&slot.context).reset();
        slot.interp.clear_bindings();
        self.checked_out.fetch_sub(1, Ordering::Relaxed);

        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(slot);
        } else {
            debug!(instance = %id, max_idle = self.max_idle, "Idle set full, dropping instance");
        }
    }
}

/// Exclusive checkout of one instance; returns it to the pool on drop
pub struct PooledInstance<'a> {
    pool: &'a InstancePool,
    slot: Option<Slot>,
}

impl PooledInstance<'_> {
    /// The context registered for this checkout
    pub fn context(&self) -> &SharedContext {
        match &self.slot {
            Some(slot) => &slot.context,
            None => unreachable!("slot is only taken in drop"),
        }
    }
}

impl Deref for PooledInstance<'_> {
    type Target = Interpreter;

    fn deref(&self) -> &Interpreter {
        match &self.slot {
            Some(slot) => &slot.interp,
            None => unreachable!("slot is only taken in drop"),
        }
    }
}

impl DerefMut for PooledInstance<'_> {
    fn deref_mut(&mut self) -> &mut Interpreter {
        match &mut self.slot {
            Some(slot) => &mut slot.interp,
            None => unreachable!("slot is only taken in drop"),
        }
    }
}

impl Drop for PooledInstance<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.put(slot);
        }
    }
}
