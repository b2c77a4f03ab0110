//! Runtime tests: isolation, reuse hygiene, loading strategies and dispatch fallback

use super::*;
use crate::builtins::Catalog;
use crate::dispatch::{DispatchAction, DispatchHooks, DispatchRequest};
use crate::engine::{EvalError, Interpreter, Val};
use maplit::hashmap;
use serde_json::{json, Value as JsonValue};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;

fn vars(value: JsonValue) -> Variables {
    value.as_object().cloned().unwrap_or_default()
}

fn runtime() -> ScriptRuntime {
    ScriptRuntime::builder()
        .send_timeout(Duration::from_millis(200))
        .builtins(Catalog::new().function("has", |vm: &mut Interpreter, args: &[Val]| {
            let name = args.first().map(Val::to_display_string).unwrap_or_default();
            Ok(Val::Bool(vm.has_binding(&name)))
        }))
        .build()
        .unwrap()
}

/* ===================== Isolation ===================== */

#[test]
fn test_concurrent_calls_see_their_own_workspace() {
    let barrier = Arc::new(Barrier::new(2));
    let gate = barrier.clone();
    let runtime = ScriptRuntime::builder()
        .builtins(Catalog::new().function("rendezvous", move |_: &mut Interpreter, _: &[Val]| {
            gate.wait();
            Ok(Val::Undefined)
        }))
        .build()
        .unwrap();

    std::thread::scope(|s| {
        for workspace in ["a", "b"] {
            let runtime = &runtime;
            s.spawn(move || {
                for _ in 0..20 {
                    let result = runtime
                        .execute("rendezvous(); workspace()", &vars(json!({ "workspace": workspace })))
                        .unwrap();
                    assert_eq!(result, json!(workspace));
                }
            });
        }
    });

    // Both calls were in flight at once on every round
    let stats = runtime.pool_stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.checked_out, 0);
    assert!(runtime.registry().is_empty());
}

#[test]
fn test_reused_instance_has_blank_context() {
    let runtime = runtime();

    let first = runtime
        .execute(
            "set_var('x', 'kept?'); workspace()",
            &vars(json!({ "workspace": "/ws/a", "run_id": "r-1" })),
        )
        .unwrap();
    assert_eq!(first, json!("/ws/a"));

    let second = runtime
        .execute("workspace() + '|' + run_id() + '|' + get_var('x')", &Variables::new())
        .unwrap();
    assert_eq!(second, json!("||"));

    assert_eq!(runtime.pool_stats().created, 1);
}

#[test]
fn test_caller_bindings_do_not_survive_return() {
    let runtime = runtime();
    runtime.execute("secret + 1", &vars(json!({ "secret": 41 }))).unwrap();

    let err = runtime.execute("secret", &Variables::new()).unwrap_err();
    assert!(matches!(err, ScriptError::Evaluation(EvalError::Reference(ref name)) if name == "secret"));
}

#[test]
fn test_caller_variable_keeps_context_builtin_callable() {
    let runtime = runtime();

    let result = runtime
        .execute("workspace + '|' + workspace()", &vars(json!({ "workspace": "/ws/a" })))
        .unwrap();
    assert_eq!(result, json!("/ws/a|/ws/a"));

    assert!(runtime
        .evaluate_condition("target() == 'prod'", &vars(json!({ "target": "prod" })))
        .unwrap());
    assert_eq!(
        runtime.execute("len([1, 2]) + len", &vars(json!({ "len": 10 }))).unwrap(),
        json!(12)
    );
}

#[test]
fn test_adjacent_expressions_are_rejected() {
    let runtime = runtime();

    let err = runtime.evaluate_condition("x > 5 0 + 1", &vars(json!({ "x": 1 }))).unwrap_err();
    assert!(matches!(err, ScriptError::Evaluation(EvalError::Syntax(_))), "got {:?}", err);
    assert_eq!(runtime.pool_stats().checked_out, 0);
}

/* ===================== Variable Loading ===================== */

#[test]
fn test_condition_binds_only_referenced_variables() {
    let runtime = runtime();
    let variables = vars(json!({ "a": 1, "b": 2, "c": 3 }));

    assert!(runtime
        .evaluate_condition("a + 1 == 2 && !has('b') && !has('c')", &variables)
        .unwrap());
}

#[test]
fn test_execute_binds_every_variable() {
    let runtime = runtime();
    let variables = vars(json!({ "a": 1, "b": 2, "c": 3 }));

    let result = runtime.execute("[a + 1, has('b'), has('c')]", &variables).unwrap();
    assert_eq!(result, json!([2, true, true]));
}

#[test]
fn test_condition_truthiness() {
    let runtime = runtime();
    assert!(runtime
        .evaluate_condition("fileLength > 0", &vars(json!({ "fileLength": 10 })))
        .unwrap());
    assert!(!runtime
        .evaluate_condition("fileLength > 0", &vars(json!({ "fileLength": 0 })))
        .unwrap());
    assert!(!runtime.evaluate_condition("''", &Variables::new()).unwrap());
    assert!(runtime.evaluate_condition("'0'", &Variables::new()).unwrap());
    assert!(runtime.evaluate_condition("[]", &Variables::new()).unwrap());
}

/* ===================== Construction ===================== */

#[test]
fn test_constructor_runs_once_per_instance() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let counter = constructed.clone();
    let runtime = ScriptRuntime::builder()
        .on_construct(move |_: &mut Interpreter| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build()
        .unwrap();

    for i in 0..10 {
        let result = runtime.execute("n * 2", &vars(json!({ "n": i }))).unwrap();
        assert_eq!(result, json!(i * 2));
    }

    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.pool_stats().created, 1);
}

#[test]
fn test_construction_failure_surfaces_as_error() {
    let runtime = ScriptRuntime::builder()
        .on_construct(|_: &mut Interpreter| anyhow::bail!("catalog unavailable"))
        .build()
        .unwrap();

    let err = runtime.execute("1", &Variables::new()).unwrap_err();
    assert!(matches!(err, ScriptError::Construction(ref msg) if msg.contains("catalog unavailable")));
    assert_eq!(runtime.pool_stats().idle, 0);
}

#[test]
fn test_prewarm_from_pool_config() {
    let runtime = ScriptRuntime::builder()
        .pool(crate::config::PoolConfig {
            max_idle: 4,
            prewarm: 3,
        })
        .build()
        .unwrap();

    assert_eq!(runtime.pool_stats().idle, 3);
    runtime.execute("1", &Variables::new()).unwrap();
    assert_eq!(runtime.pool_stats().created, 3);
}

/* ===================== Errors and Release ===================== */

#[test]
fn test_syntax_error_releases_instance() {
    let runtime = runtime();

    let err = runtime.execute("1 +", &Variables::new()).unwrap_err();
    assert!(matches!(err, ScriptError::Evaluation(EvalError::Syntax(_))));

    let stats = runtime.pool_stats();
    assert_eq!(stats.checked_out, 0);
    assert_eq!(stats.idle, 1);
}

#[test]
fn test_abort_step_is_distinguished() {
    let runtime = runtime();

    let err = runtime
        .execute("abort_step('nothing to deploy')", &Variables::new())
        .unwrap_err();
    assert!(err.is_step_abort());
    assert!(matches!(err, ScriptError::StepAborted(ref reason) if reason == "nothing to deploy"));

    let err = runtime.execute("missing()", &Variables::new()).unwrap_err();
    assert!(!err.is_step_abort());
}

#[test]
fn test_panicking_builtin_still_releases_instance() {
    let runtime = ScriptRuntime::builder()
        .builtins(Catalog::new().function("boom", |_: &mut Interpreter, _: &[Val]| -> crate::engine::EvalResult<Val> {
            panic!("builtin exploded")
        }))
        .build()
        .unwrap();

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        runtime.execute("boom()", &vars(json!({ "workspace": "/ws" })))
    }));
    assert!(outcome.is_err());

    assert_eq!(runtime.pool_stats().checked_out, 0);
    assert!(runtime.registry().is_empty());
    assert_eq!(runtime.execute("1 + 1", &Variables::new()).unwrap(), json!(2));
}

/* ===================== Runtime Variables ===================== */

#[test]
fn test_set_var_round_trip_is_scoped_to_one_call() {
    let runtime = runtime();

    let value = runtime
        .execute("set_var('k', 'v'); get_var('k')", &Variables::new())
        .unwrap();
    assert_eq!(value, json!("v"));

    // Written through to the instance as well
    let value = runtime.execute("set_var('k', 'v'); k", &Variables::new()).unwrap();
    assert_eq!(value, json!("v"));

    let value = runtime.execute("get_var('k')", &Variables::new()).unwrap();
    assert_eq!(value, json!(""));
}

#[test]
fn test_runtime_variables_from_caller() {
    let runtime = runtime();
    let value = runtime
        .execute(
            "get_var('stage')",
            &vars(json!({ "runtime_variables": { "stage": "build" } })),
        )
        .unwrap();
    assert_eq!(value, json!("build"));
}

/* ===================== Dispatch Fallback ===================== */

#[test]
fn test_exec_runs_locally_without_hooks() {
    let runtime = runtime();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("local.txt");

    let out = runtime
        .execute(
            "exec('echo local > ' + path); exec('cat ' + path)",
            &vars(json!({ "path": path.to_string_lossy() })),
        )
        .unwrap();

    assert_eq!(out, json!("local"));
    assert!(path.exists());
}

#[test]
fn test_exec_falls_back_when_send_fails() {
    let runtime = runtime();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    runtime.register_dispatch_hooks(
        DispatchHooks::new(move |_: &DispatchRequest| {
            seen.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("transport down")
        })
        .with_should_use_remote(|| true),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fallback.txt");
    runtime
        .execute(
            "exec('echo fallback > ' + path)",
            &vars(json!({ "path": path.to_string_lossy() })),
        )
        .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap().trim(), "fallback");
}

#[test]
fn test_exec_accepted_remotely_skips_local_run() {
    let runtime = runtime();
    let requests: Arc<Mutex<Vec<DispatchRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = requests.clone();
    runtime.register_dispatch_hooks(DispatchHooks::new(move |request: &DispatchRequest| {
        sink.lock().unwrap().push(request.clone());
        Ok(())
    }));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remote.txt");
    let command = format!("echo remote > {}", path.display());

    let out = runtime
        .execute(
            "exec(cmd, 'master')",
            &vars(json!({ "cmd": command, "workspace": "/ws", "run_id": "r-9" })),
        )
        .unwrap();

    assert_eq!(out, json!(""));
    assert!(!path.exists());

    let requests = requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, DispatchAction::Shell);
    assert_eq!(requests[0].expression, command);
    assert_eq!(
        requests[0].params,
        hashmap! {
            "workspace".to_string() => "/ws".to_string(),
            "run_id".to_string() => "r-9".to_string(),
        }
    );
}

#[test]
fn test_unregistered_hooks_restore_local_execution() {
    let runtime = runtime();
    runtime.register_dispatch_hooks(DispatchHooks::new(|_: &DispatchRequest| Ok(())));
    assert_eq!(runtime.execute("remote_eval('1 + 1')", &Variables::new()).unwrap(), json!(true));

    assert!(runtime.unregister_dispatch_hooks());
    assert!(!runtime.unregister_dispatch_hooks());
    assert_eq!(runtime.execute("remote_eval('1 + 1')", &Variables::new()).unwrap(), json!(2));
}

/* ===================== Async Wrappers ===================== */

#[tokio::test]
async fn test_async_wrappers() {
    let runtime = runtime();

    let value = runtime
        .execute_async("a * 3", vars(json!({ "a": 4 })))
        .await
        .unwrap();
    assert_eq!(value, json!(12));

    let ok = runtime
        .evaluate_condition_async("target == 'prod'", vars(json!({ "target": "prod" })))
        .await
        .unwrap();
    assert!(ok);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_calls_run_concurrently() {
    let runtime = runtime();

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let runtime = runtime.clone();
            tokio::spawn(async move {
                runtime
                    .execute_async("workspace()", vars(json!({ "workspace": format!("ws-{}", i) })))
                    .await
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), json!(format!("ws-{}", i)));
    }
    assert_eq!(runtime.pool_stats().checked_out, 0);
}
