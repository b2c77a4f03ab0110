//! Built-in function catalog
//!
//! The catalog is the list of natives bound onto every interpreter instance when
//! the pool constructs it. Built-ins get only the instance and their arguments;
//! caller metadata comes from the [`ContextRegistry`] keyed by the instance id,
//! and remote-vs-local decisions from the [`Dispatcher`].
//!
//! Domain failures (missing argument, command failed, copy failed) are returned
//! as degraded values (`false`, `""`, `"error: ..."`) so workflow expressions can
//! branch on them. Only broken scripts raise evaluator errors.

pub mod context;
pub mod distributed;
pub mod general;

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::engine::{Interpreter, NativeFn, Val};
use crate::script::ContextRegistry;

/// Shared services built-ins capture when the catalog is assembled
#[derive(Debug, Clone)]
pub struct BuiltinEnv {
    pub registry: Arc<ContextRegistry>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Named natives and native-method objects to bind on each new instance
#[derive(Clone, Default)]
pub struct Catalog {
    functions: Vec<(String, NativeFn)>,
    objects: Vec<(String, Vec<(&'static str, NativeFn)>)>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Val]) -> crate::engine::EvalResult<Val> + Send + Sync + 'static,
    {
        self.functions.push((name.into(), Arc::new(f)));
        self
    }

    pub fn native(mut self, name: impl Into<String>, f: NativeFn) -> Self {
        self.functions.push((name.into(), f));
        self
    }

    pub fn object(mut self, name: impl Into<String>, methods: Vec<(&'static str, NativeFn)>) -> Self {
        self.objects.push((name.into(), methods));
        self
    }

    /// Append another catalog's entries
    pub fn extend(mut self, other: Catalog) -> Self {
        self.functions.extend(other.functions);
        self.objects.extend(other.objects);
        self
    }

    pub fn len(&self) -> usize {
        self.functions.len() + self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bind every entry onto an instance; duplicate names are rejected
    pub fn bind(&self, interp: &mut Interpreter) -> Result<()> {
        let mut seen = HashSet::new();

        for (name, f) in &self.functions {
            if !seen.insert(name.as_str()) {
                bail!("duplicate built-in '{}'", name);
            }
            interp.register_native(name.clone(), f.clone());
        }

        for (name, methods) in &self.objects {
            if !seen.insert(name.as_str()) {
                bail!("duplicate built-in '{}'", name);
            }
            interp.register_object(name.clone(), methods.clone());
        }

        Ok(())
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field(
                "functions",
                &self.functions.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .field(
                "objects",
                &self.objects.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Every built-in shipped with the crate
pub fn default_catalog(env: &BuiltinEnv) -> Catalog {
    Catalog::new()
        .extend(context::catalog(env))
        .extend(distributed::catalog(env))
        .extend(general::catalog())
}

/* ===================== Argument Helpers ===================== */

/// String argument, `None` when missing, `undefined` or `null`
pub(crate) fn arg_str(args: &[Val], idx: usize) -> Option<String> {
    match args.get(idx) {
        None | Some(Val::Undefined) | Some(Val::Null) => None,
        Some(v) => Some(v.to_display_string()),
    }
}

pub(crate) fn arg_or_empty(args: &[Val], idx: usize) -> String {
    arg_str(args, idx).unwrap_or_default()
}
