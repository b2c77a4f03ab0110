//! Context built-ins: read caller metadata, runtime variables, step abort

use std::sync::Arc;

use super::{arg_or_empty, arg_str, BuiltinEnv, Catalog};
use crate::engine::{EvalError, Interpreter, Val};
use crate::script::{lock_context, ContextRegistry, ExecutionContext};

/// Built-ins returning one context field each, `""` when unset
const FIELDS: [&str; 7] = [
    "workspace",
    "run_id",
    "workflow_name",
    "workflow_kind",
    "target",
    "output_path",
    "state_file",
];

pub fn catalog(env: &BuiltinEnv) -> Catalog {
    let mut catalog = Catalog::new();

    for name in FIELDS {
        let registry = env.registry.clone();
        catalog = catalog.function(name, move |vm: &mut Interpreter, _: &[Val]| {
            Ok(Val::Str(read_field(&registry, vm, name)))
        });
    }

    let registry = env.registry.clone();
    catalog = catalog.function("set_var", move |vm: &mut Interpreter, args: &[Val]| {
        set_var(&registry, vm, args)
    });

    let registry = env.registry.clone();
    catalog = catalog.function("get_var", move |vm: &mut Interpreter, args: &[Val]| {
        get_var(&registry, vm, args)
    });

    catalog.function("abort_step", |_: &mut Interpreter, args: &[Val]| {
        Err(EvalError::StepAborted(arg_or_empty(args, 0)))
    })
}

fn read_field(registry: &Arc<ContextRegistry>, vm: &Interpreter, name: &str) -> String {
    let Some(context) = registry.lookup(vm.id()) else {
        return String::new();
    };
    let context = lock_context(&context);
    field_value(&context, name).to_string()
}

fn field_value<'a>(context: &'a ExecutionContext, name: &str) -> &'a str {
    match name {
        "workspace" => &context.workspace,
        "run_id" => &context.run_id,
        "workflow_name" => &context.workflow_name,
        "workflow_kind" => &context.workflow_kind,
        "target" => &context.target,
        "output_path" => &context.output_path,
        "state_file" => &context.state_file,
        _ => "",
    }
}

/// set_var(name, value) - store a runtime variable for the rest of this call
///
/// Writes through to the instance so the same script can read `name` directly.
fn set_var(registry: &Arc<ContextRegistry>, vm: &mut Interpreter, args: &[Val]) -> Result<Val, EvalError> {
    let Some(name) = arg_str(args, 0).filter(|n| !n.is_empty()) else {
        return Ok(Val::Bool(false));
    };
    let value = args.get(1).cloned().unwrap_or(Val::Undefined);

    if let Some(context) = registry.lookup(vm.id()) {
        lock_context(&context)
            .runtime_variables
            .insert(name.clone(), value.to_display_string());
    }
    vm.set(name, value);

    Ok(Val::Bool(true))
}

/// get_var(name) - runtime variable of this call, `""` when unset
fn get_var(registry: &Arc<ContextRegistry>, vm: &mut Interpreter, args: &[Val]) -> Result<Val, EvalError> {
    let Some(name) = arg_str(args, 0) else {
        return Ok(Val::Str(String::new()));
    };

    let value = registry
        .lookup(vm.id())
        .and_then(|context| lock_context(&context).runtime_variables.get(&name).cloned())
        .unwrap_or_default();

    Ok(Val::Str(value))
}
