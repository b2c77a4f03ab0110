//! Per-call execution context and the identity-keyed registry built-ins use to find it

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::engine::InstanceId;

/// Context shared between the pool (owner) and built-ins (readers/writers of runtime variables)
pub type SharedContext = Arc<Mutex<ExecutionContext>>;

/// Metadata about the call an instance is currently serving
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub workspace: String,
    pub run_id: String,
    pub workflow_name: String,
    pub workflow_kind: String,
    pub target: String,
    pub output_path: String,
    pub state_file: String,
    pub runtime_variables: HashMap<String, String>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return every field to its zero value
    pub fn reset(&mut self) {
        self.workspace.clear();
        self.run_id.clear();
        self.workflow_name.clear();
        self.workflow_kind.clear();
        self.target.clear();
        self.output_path.clear();
        self.state_file.clear();
        self.runtime_variables.clear();
    }

    pub fn is_blank(&self) -> bool {
        *self == ExecutionContext::default()
    }

    /// Best-effort extraction of recognised keys; everything else is ignored
    pub fn populate_from(&mut self, variables: &Map<String, JsonValue>) {
        let pick = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| variables.get(*key).and_then(scalar_to_string))
        };

        if let Some(value) = pick(&["workspace"]) {
            self.workspace = value;
        }
        if let Some(value) = pick(&["run_id", "runId"]) {
            self.run_id = value;
        }
        if let Some(value) = pick(&["workflow_name", "workflowName", "workflow"]) {
            self.workflow_name = value;
        }
        if let Some(value) = pick(&["workflow_kind", "workflowKind"]) {
            self.workflow_kind = value;
        }
        if let Some(value) = pick(&["target"]) {
            self.target = value;
        }
        if let Some(value) = pick(&["output_path", "outputPath"]) {
            self.output_path = value;
        }
        if let Some(value) = pick(&["state_file", "stateFile"]) {
            self.state_file = value;
        }

        let runtime = variables
            .get("runtime_variables")
            .or_else(|| variables.get("runtimeVariables"));
        if let Some(JsonValue::Object(entries)) = runtime {
            for (k, v) in entries {
                if let Some(value) = scalar_to_string(v) {
                    self.runtime_variables.insert(k.clone(), value);
                }
            }
        }
    }
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Lock a shared context, recovering the data if a previous holder panicked
pub fn lock_context(context: &SharedContext) -> MutexGuard<'_, ExecutionContext> {
    context.lock().unwrap_or_else(PoisonError::into_inner)
}

/* ===================== Registry ===================== */

/// Identity-keyed lookup from a checked-out instance to its context
///
/// An entry exists exactly while the instance is checked out of the pool.
#[derive(Debug, Default)]
pub struct ContextRegistry {
    entries: RwLock<HashMap<InstanceId, SharedContext>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: InstanceId, context: SharedContext) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, context);
    }

    pub fn remove(&self, id: InstanceId) -> Option<SharedContext> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Context of a checked-out instance; `None` is a normal state, not an error
    pub fn lookup(&self, id: InstanceId) -> Option<SharedContext> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Copy of the instance's context, blank when the instance is not checked out
    pub fn snapshot(&self, id: InstanceId) -> ExecutionContext {
        self.lookup(id)
            .map(|context| lock_context(&context).clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Interpreter;
    use serde_json::json;

    fn as_map(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => unreachable!("fixture must be an object"),
        }
    }

    #[test]
    fn test_populate_recognised_keys() {
        let vars = as_map(json!({
            "workspace": "ws",
            "runId": 42,
            "workflow": "deploy",
            "workflow_kind": "pipeline",
            "target": "web-1",
            "outputPath": "/tmp/out",
            "state_file": "/tmp/state.json",
            "runtime_variables": {"retries": 3, "nested": {"ignored": true}},
            "unrelated": "value",
        }));

        let mut ctx = ExecutionContext::new();
        ctx.populate_from(&vars);

        assert_eq!(ctx.workspace, "ws");
        assert_eq!(ctx.run_id, "42");
        assert_eq!(ctx.workflow_name, "deploy");
        assert_eq!(ctx.workflow_kind, "pipeline");
        assert_eq!(ctx.target, "web-1");
        assert_eq!(ctx.output_path, "/tmp/out");
        assert_eq!(ctx.state_file, "/tmp/state.json");
        assert_eq!(ctx.runtime_variables.get("retries").map(String::as_str), Some("3"));
        assert!(!ctx.runtime_variables.contains_key("nested"));
    }

    #[test]
    fn test_populate_ignores_non_scalar_values() {
        let vars = as_map(json!({"workspace": ["a", "b"], "target": null}));
        let mut ctx = ExecutionContext::new();
        ctx.populate_from(&vars);
        assert!(ctx.is_blank());
    }

    #[test]
    fn test_reset_clears_every_field() {
        let mut ctx = ExecutionContext {
            workspace: "ws".to_string(),
            run_id: "r".to_string(),
            workflow_name: "w".to_string(),
            workflow_kind: "k".to_string(),
            target: "t".to_string(),
            output_path: "o".to_string(),
            state_file: "s".to_string(),
            runtime_variables: HashMap::from([("a".to_string(), "b".to_string())]),
        };
        ctx.reset();
        assert!(ctx.is_blank());
    }

    #[test]
    fn test_registry_absent_behaves_as_blank() {
        let registry = ContextRegistry::new();
        let interp = Interpreter::new();

        assert!(registry.lookup(interp.id()).is_none());
        assert!(registry.snapshot(interp.id()).is_blank());
    }

    #[test]
    fn test_registry_insert_lookup_remove() {
        let registry = ContextRegistry::new();
        let interp = Interpreter::new();
        let ctx: SharedContext = Arc::new(Mutex::new(ExecutionContext::new()));
        lock_context(&ctx).workspace = "ws".to_string();

        registry.insert(interp.id(), ctx.clone());
        assert!(registry.contains(interp.id()));
        assert_eq!(registry.snapshot(interp.id()).workspace, "ws");

        let removed = registry.remove(interp.id()).expect("entry should exist");
        assert!(Arc::ptr_eq(&removed, &ctx));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_concurrent_insert_remove_lookup() {
        let registry = ContextRegistry::new();
        let writers: Vec<Interpreter> = (0..8).map(|_| Interpreter::new()).collect();

        std::thread::scope(|s| {
            for (n, interp) in writers.iter().enumerate() {
                let registry = &registry;
                s.spawn(move || {
                    let workspace = format!("ws-{}", n);
                    for _ in 0..200 {
                        let ctx: SharedContext = Arc::new(Mutex::new(ExecutionContext::new()));
                        lock_context(&ctx).workspace = workspace.clone();
                        registry.insert(interp.id(), ctx);

                        assert_eq!(registry.snapshot(interp.id()).workspace, workspace);
                        assert!(registry.remove(interp.id()).is_some());
                        assert!(registry.lookup(interp.id()).is_none());
                    }
                });
            }

            for _ in 0..2 {
                let registry = &registry;
                let writers = &writers;
                s.spawn(move || {
                    for _ in 0..200 {
                        for (n, interp) in writers.iter().enumerate() {
                            let seen = registry.snapshot(interp.id()).workspace;
                            assert!(seen.is_empty() || seen == format!("ws-{}", n), "saw {}", seen);
                        }
                    }
                });
            }
        });

        assert!(registry.is_empty());
    }
}
