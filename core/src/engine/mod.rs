//! # Embedded expression engine
//!
//! A small ECMAScript-like evaluator. One [`Interpreter`] is a stateful,
//! identity-bearing instance with two scopes:
//!
//! 1. **Catalog scope**: natives and objects bound once via [`Interpreter::register`]
//!    and [`Interpreter::register_object`]. Survives every reuse.
//! 2. **Binding scope**: caller variables and script assignments. Shadows the
//!    catalog scope and is dropped by [`Interpreter::clear_bindings`].
//!
//! Natives receive only the instance they run inside and their arguments. Anything
//! else they need (caller metadata, dispatch hooks) is captured when the native
//! is built or looked up by [`Interpreter::id`].

pub mod ast;
pub mod errors;
mod eval;
pub mod parser;
pub mod values;


use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub use errors::{EvalError, EvalResult};
pub use values::Val;

/// Maximum nesting of `eval` calls made from natives on the same instance
const MAX_EVAL_DEPTH: usize = 32;

static NEXT_INSTANCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an interpreter instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u64);

impl InstanceId {
    fn next() -> Self {
        InstanceId(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vm-{}", self.0)
    }
}

/// Native function callable from scripts
pub type NativeFn = Arc<dyn Fn(&mut Interpreter, &[Val]) -> EvalResult<Val> + Send + Sync>;

/// One reusable evaluator instance
pub struct Interpreter {
    id: InstanceId,
    catalog: HashMap<String, Val>,
    bindings: HashMap<String, Val>,
    natives: HashMap<String, NativeFn>,
    depth: usize,
}

impl Interpreter {
    /// Create a blank instance with a fresh identity
    pub fn new() -> Self {
        Self {
            id: InstanceId::next(),
            catalog: HashMap::new(),
            bindings: HashMap::new(),
            natives: HashMap::new(),
            depth: 0,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /* ===================== Catalog Scope ===================== */

    /// Bind a native function as a global
    pub fn register<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut Interpreter, &[Val]) -> EvalResult<Val> + Send + Sync + 'static,
    {
        let name = name.into();
        self.natives.insert(name.clone(), Arc::new(f));
        self.catalog.insert(name.clone(), Val::Native(name));
    }

    /// Bind an already shared native function as a global
    pub fn register_native(&mut self, name: impl Into<String>, f: NativeFn) {
        let name = name.into();
        self.natives.insert(name.clone(), f);
        self.catalog.insert(name.clone(), Val::Native(name));
    }

    /// Bind an object whose members are natives, e.g. `Math.floor`
    pub fn register_object(&mut self, name: impl Into<String>, methods: Vec<(&str, NativeFn)>) {
        let name = name.into();
        let mut members = HashMap::new();
        for (method, f) in methods {
            let qualified = format!("{}.{}", name, method);
            self.natives.insert(qualified.clone(), f);
            members.insert(method.to_string(), Val::Native(qualified));
        }
        self.catalog.insert(name, Val::Obj(members));
    }

    /// Number of natives bound in the catalog scope
    pub fn native_count(&self) -> usize {
        self.natives.len()
    }

    /* ===================== Binding Scope ===================== */

    /// Bind a value in the binding scope
    pub fn set(&mut self, name: impl Into<String>, value: Val) {
        self.bindings.insert(name.into(), value);
    }

    /// Resolve a global, binding scope first
    pub fn get(&self, name: &str) -> Option<&Val> {
        self.bindings.get(name).or_else(|| self.catalog.get(name))
    }

    /// Resolve `name` in call position
    ///
    /// A binding that is not a function does not hide a catalog native of the
    /// same name, so `workspace()` still calls the built-in while a caller
    /// variable `workspace` is bound.
    pub fn resolve_callable(&self, name: &str) -> Option<&Val> {
        match self.bindings.get(name) {
            Some(value @ Val::Native(_)) => Some(value),
            Some(value) => match self.catalog.get(name) {
                Some(native @ Val::Native(_)) => Some(native),
                _ => Some(value),
            },
            None => self.catalog.get(name),
        }
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether `name` is bound in the binding scope (ignores the catalog)
    pub fn has_binding(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Drop every caller variable and script assignment, keeping the catalog
    pub fn clear_bindings(&mut self) {
        self.bindings.clear();
        self.depth = 0;
    }

    /* ===================== Evaluation ===================== */

    /// Parse and evaluate a script, returning the value of its last statement
    pub fn eval(&mut self, source: &str) -> EvalResult<Val> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(EvalError::Range(format!(
                "maximum eval depth of {} exceeded",
                MAX_EVAL_DEPTH
            )));
        }

        let program = parser::parse_program(source)?;

        self.depth += 1;
        let result = self.eval_program(&program);
        self.depth -= 1;

        result
    }

    /// Call a function value with arguments
    pub fn call(&mut self, callee: &Val, args: &[Val]) -> EvalResult<Val> {
        let Val::Native(name) = callee else {
            return Err(EvalError::type_error(format!(
                "{} is not a function",
                callee.to_display_string()
            )));
        };

        let f = self
            .natives
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::type_error(format!("{} is not a function", name)))?;

        f(self, args)
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("id", &self.id)
            .field("natives", &self.natives.len())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}
