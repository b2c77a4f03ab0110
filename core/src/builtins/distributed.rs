//! Distributed built-ins: actions that may run on a remote peer
//!
//! Each one asks the [`Dispatcher`] first and falls back to local execution when
//! the request is not accepted. Remote acceptance is fire-and-forget.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{arg_or_empty, arg_str, BuiltinEnv, Catalog};
use crate::dispatch::{DispatchAction, DispatchPayload, Dispatcher, PeerRole};
use crate::engine::{EvalResult, Interpreter, Val};
use crate::script::{ContextRegistry, ExecutionContext};

/// Shared state for the distributed built-ins
#[derive(Clone)]
struct Remote {
    registry: Arc<ContextRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl Remote {
    /// Payload pre-filled from the calling instance's context
    fn payload(&self, vm: &Interpreter) -> (DispatchPayload, ExecutionContext) {
        let context = self.registry.snapshot(vm.id());
        let mut params = HashMap::new();
        if !context.workspace.is_empty() {
            params.insert("workspace".to_string(), context.workspace.clone());
        }
        if !context.run_id.is_empty() {
            params.insert("run_id".to_string(), context.run_id.clone());
        }

        let payload = DispatchPayload {
            expression: String::new(),
            workflow: context.workflow_name.clone(),
            target: context.target.clone(),
            params,
        };
        (payload, context)
    }
}

/// Optional `(role, scope)` arguments starting at `idx`
fn route(args: &[Val], idx: usize) -> (PeerRole, String) {
    let role = arg_str(args, idx)
        .map(|r| PeerRole::parse(&r))
        .unwrap_or(PeerRole::Worker);
    (role, arg_or_empty(args, idx + 1))
}

pub fn catalog(env: &BuiltinEnv) -> Catalog {
    let remote = Remote {
        registry: env.registry.clone(),
        dispatcher: env.dispatcher.clone(),
    };

    let r = remote.clone();
    let catalog = Catalog::new().function("exec", move |vm: &mut Interpreter, args: &[Val]| {
        exec(&r, vm, args)
    });

    let r = remote.clone();
    let catalog = catalog.function("remote_eval", move |vm: &mut Interpreter, args: &[Val]| {
        remote_eval(&r, vm, args)
    });

    let r = remote.clone();
    let catalog = catalog.function("run_workflow", move |vm: &mut Interpreter, args: &[Val]| {
        run_workflow(&r, vm, args)
    });

    let r = remote.clone();
    let catalog = catalog.function("push", move |vm: &mut Interpreter, args: &[Val]| {
        sync(&r, vm, args, DispatchAction::Push)
    });

    let r = remote;
    catalog.function("pull", move |vm: &mut Interpreter, args: &[Val]| {
        sync(&r, vm, args, DispatchAction::Pull)
    })
}

/* ===================== exec ===================== */

/// exec(command, role?, scope?) - run a shell command
///
/// Returns trimmed stdout when run locally, `""` when accepted remotely and
/// `"error: ..."` when the command cannot run or exits non-zero.
fn exec(remote: &Remote, vm: &mut Interpreter, args: &[Val]) -> EvalResult<Val> {
    let Some(command) = arg_str(args, 0).filter(|c| !c.trim().is_empty()) else {
        return Ok(Val::Str("error: exec requires a command".to_string()));
    };
    let (role, scope) = route(args, 1);
    let (mut payload, context) = remote.payload(vm);
    payload.expression = command.clone();

    if remote
        .dispatcher
        .try_send(DispatchAction::Shell, payload, role, &scope)
    {
        return Ok(Val::Str(String::new()));
    }

    Ok(Val::Str(run_local_command(&command, &context)))
}

fn run_local_command(command: &str, context: &ExecutionContext) -> String {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    if !context.workspace.is_empty() {
        cmd.env("CADENCE_WORKSPACE", &context.workspace);
    }
    if !context.run_id.is_empty() {
        cmd.env("CADENCE_RUN_ID", &context.run_id);
    }

    match cmd.output() {
        Ok(output) if output.status.success() => {
            String::from_utf8_lossy(&output.stdout).trim().to_string()
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            format!("error: {}: {}", output.status, stderr.trim())
        }
        Err(e) => {
            warn!(error = %e, "Failed to spawn local command");
            format!("error: {}", e)
        }
    }
}

/* ===================== remote_eval ===================== */

/// remote_eval(expression, role?, scope?) - `true` when accepted remotely,
/// otherwise the value of evaluating `expression` on this instance
fn remote_eval(remote: &Remote, vm: &mut Interpreter, args: &[Val]) -> EvalResult<Val> {
    let Some(expression) = arg_str(args, 0) else {
        return Ok(Val::Bool(false));
    };
    let (role, scope) = route(args, 1);
    let (mut payload, _) = remote.payload(vm);
    payload.expression = expression.clone();

    if remote
        .dispatcher
        .try_send(DispatchAction::Eval, payload, role, &scope)
    {
        return Ok(Val::Bool(true));
    }

    vm.eval(&expression)
}

/* ===================== run_workflow ===================== */

/// run_workflow(name, params?, role?, scope?) - `true` when accepted remotely
///
/// Scheduling a workflow in-process belongs to the workflow engine, so without
/// a remote peer this reports `false` for the caller to handle.
fn run_workflow(remote: &Remote, vm: &mut Interpreter, args: &[Val]) -> EvalResult<Val> {
    let Some(name) = arg_str(args, 0).filter(|n| !n.is_empty()) else {
        return Ok(Val::Bool(false));
    };
    let (role, scope) = route(args, 2);
    let (mut payload, _) = remote.payload(vm);
    payload.workflow = name.clone();

    if let Some(Val::Obj(params)) = args.get(1) {
        for (k, v) in params {
            payload.params.insert(k.clone(), v.to_display_string());
        }
    }

    let sent = remote
        .dispatcher
        .try_send(DispatchAction::Workflow, payload, role, &scope);
    if !sent {
        debug!(workflow = %name, "Workflow not dispatched remotely");
    }
    Ok(Val::Bool(sent))
}

/* ===================== push / pull ===================== */

/// push(peer, src, dst) / pull(peer, src, dst) - sync files with a peer
///
/// An unresolvable peer or a rejected send degrades to a local recursive copy.
fn sync(remote: &Remote, vm: &mut Interpreter, args: &[Val], action: DispatchAction) -> EvalResult<Val> {
    let peer = arg_or_empty(args, 0);
    let (Some(src), Some(dst)) = (arg_str(args, 1), arg_str(args, 2)) else {
        return Ok(Val::Bool(false));
    };

    if let Some(connection) = remote.dispatcher.resolve_peer(&peer) {
        let (mut payload, _) = remote.payload(vm);
        payload.params.extend([
            ("peer".to_string(), connection.name.clone()),
            ("address".to_string(), connection.address.clone()),
            ("port".to_string(), connection.port.to_string()),
            ("user".to_string(), connection.user.clone()),
            ("work_dir".to_string(), connection.work_dir.clone()),
            ("src".to_string(), src.clone()),
            ("dst".to_string(), dst.clone()),
        ]);

        if remote
            .dispatcher
            .try_send(action, payload, PeerRole::Worker, &connection.name)
        {
            return Ok(Val::Bool(true));
        }
    } else {
        debug!(%action, peer = %peer, "Peer not resolved, copying locally");
    }

    match copy_recursive(Path::new(&src), Path::new(&dst)) {
        Ok(()) => Ok(Val::Bool(true)),
        Err(e) => {
            warn!(%action, src = %src, dst = %dst, error = %e, "Local copy failed");
            Ok(Val::Bool(false))
        }
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst).map(|_| ())
    }
}
