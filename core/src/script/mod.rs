//! # Script execution core
//!
//! Pool of reusable interpreter instances, the per-call context each one
//! carries, variable loading strategies and the runtime facade on top.
//!
//! Invariants:
//! - An instance is owned by exactly one call between checkout and return.
//! - A context registry entry exists only while its instance is checked out.
//! - Nothing a call binds or records survives the instance's return.

pub mod context;
pub mod error;
pub mod loading;
pub mod pool;
pub mod runtime;

#[cfg(test)]
mod tests;

pub use context::{lock_context, ContextRegistry, ExecutionContext, SharedContext};
pub use error::{ScriptError, ScriptResult};
pub use loading::{bind_variables, referenced_identifiers, VariableLoading};
pub use pool::{Constructor, InstancePool, PoolStats, PooledInstance};
pub use runtime::{RuntimeBuilder, ScriptRuntime, Variables};
