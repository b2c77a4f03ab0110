//! General-purpose helpers and the `Math` object

use std::sync::Arc;

use super::{arg_or_empty, Catalog};
use crate::engine::{EvalError, EvalResult, Interpreter, NativeFn, Val};

pub fn catalog() -> Catalog {
    Catalog::new()
        .function("len", |_: &mut Interpreter, args: &[Val]| Ok(len(args)))
        .function("str", |_: &mut Interpreter, args: &[Val]| {
            Ok(Val::Str(arg_or_empty(args, 0)))
        })
        .function("num", |_: &mut Interpreter, args: &[Val]| {
            Ok(Val::Num(args.first().map(Val::to_number).unwrap_or(f64::NAN)))
        })
        .function("contains", |_: &mut Interpreter, args: &[Val]| Ok(contains(args)))
        .function("to_json", |_: &mut Interpreter, args: &[Val]| {
            let value = args.first().map(Val::to_json).unwrap_or_default();
            Ok(Val::Str(value.to_string()))
        })
        .function("from_json", |_: &mut Interpreter, args: &[Val]| {
            // Unparseable input is a domain failure, not a broken script
            Ok(serde_json::from_str::<serde_json::Value>(&arg_or_empty(args, 0))
                .map(|json| Val::from_json(&json))
                .unwrap_or(Val::Null))
        })
        .object("Math", math_methods())
}

/// len(x) - characters of a string, items of a list, keys of an object, else 0
fn len(args: &[Val]) -> Val {
    let n = match args.first() {
        Some(Val::Str(s)) => s.chars().count(),
        Some(Val::List(items)) => items.len(),
        Some(Val::Obj(map)) => map.len(),
        _ => 0,
    };
    Val::Num(n as f64)
}

/// contains(haystack, needle) - substring, list membership or object key
fn contains(args: &[Val]) -> Val {
    let needle = args.get(1).cloned().unwrap_or(Val::Undefined);
    let found = match args.first() {
        Some(Val::Str(s)) => s.contains(&needle.to_display_string()),
        Some(Val::List(items)) => items.contains(&needle),
        Some(Val::Obj(map)) => map.contains_key(&needle.to_display_string()),
        _ => false,
    };
    Val::Bool(found)
}

/* ===================== Math ===================== */

fn math_methods() -> Vec<(&'static str, NativeFn)> {
    vec![
        ("floor", unary_math("floor", f64::floor)),
        ("ceil", unary_math("ceil", f64::ceil)),
        ("abs", unary_math("abs", f64::abs)),
        ("round", unary_math("round", round_half_up)),
        ("min", fold_math(f64::INFINITY, f64::min)),
        ("max", fold_math(f64::NEG_INFINITY, f64::max)),
    ]
}

/// ECMAScript rounds halves toward +Infinity and keeps the sign of zero
fn round_half_up(n: f64) -> f64 {
    let r = n.round();
    if n - r == 0.5 {
        (r + 1.0).copysign(n)
    } else {
        r
    }
}

fn unary_math(name: &'static str, op: fn(f64) -> f64) -> NativeFn {
    Arc::new(move |_: &mut Interpreter, args: &[Val]| -> EvalResult<Val> {
        let [arg] = args else {
            return Err(EvalError::type_error(format!(
                "Math.{} expects 1 argument, got {}",
                name,
                args.len()
            )));
        };
        Ok(Val::Num(op(arg.to_number())))
    })
}

fn fold_math(init: f64, op: fn(f64, f64) -> f64) -> NativeFn {
    Arc::new(move |_: &mut Interpreter, args: &[Val]| -> EvalResult<Val> {
        let mut acc = init;
        for arg in args {
            let n = arg.to_number();
            if n.is_nan() {
                return Ok(Val::Num(f64::NAN));
            }
            acc = op(acc, n);
        }
        Ok(Val::Num(acc))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interp() -> Interpreter {
        let mut interp = Interpreter::new();
        catalog().bind(&mut interp).unwrap();
        interp
    }

    #[test]
    fn test_math_functions() {
        let mut vm = interp();
        assert_eq!(vm.eval("Math.floor(3.7)").unwrap(), Val::Num(3.0));
        assert_eq!(vm.eval("Math.floor(-3.2)").unwrap(), Val::Num(-4.0));
        assert_eq!(vm.eval("Math.ceil(3.2)").unwrap(), Val::Num(4.0));
        assert_eq!(vm.eval("Math.abs(-5)").unwrap(), Val::Num(5.0));
        assert_eq!(vm.eval("Math.round(2.5)").unwrap(), Val::Num(3.0));
        assert_eq!(vm.eval("Math.round(-2.5)").unwrap(), Val::Num(-2.0));
        assert_eq!(vm.eval("Math.max(1, 7, 3)").unwrap(), Val::Num(7.0));
        assert_eq!(vm.eval("Math.min()").unwrap(), Val::Num(f64::INFINITY));
    }

    #[test]
    fn test_math_round_edges() {
        let mut vm = interp();
        assert_eq!(vm.eval("Math.round(0.49999999999999994)").unwrap(), Val::Num(0.0));
        assert_eq!(vm.eval("Math.round(-1.5)").unwrap(), Val::Num(-1.0));
        assert_eq!(vm.eval("Math.round(-2.6)").unwrap(), Val::Num(-3.0));

        let Val::Num(n) = vm.eval("Math.round(-0.5)").unwrap() else {
            unreachable!("Math.round returns a number");
        };
        assert!(n == 0.0 && n.is_sign_negative());
        assert!(round_half_up(f64::NAN).is_nan());
    }

    #[test]
    fn test_math_wrong_arg_count() {
        let mut vm = interp();
        let err = vm.eval("Math.floor()").unwrap_err();
        assert!(matches!(err, EvalError::Type(ref msg) if msg.contains("expects 1 argument")));
    }

    #[test]
    fn test_len_and_contains() {
        let mut vm = interp();
        assert_eq!(vm.eval("len('héllo')").unwrap(), Val::Num(5.0));
        assert_eq!(vm.eval("len([1, 2])").unwrap(), Val::Num(2.0));
        assert_eq!(vm.eval("len(null)").unwrap(), Val::Num(0.0));
        assert_eq!(vm.eval("contains('deploy-prod', 'prod')").unwrap(), Val::Bool(true));
        assert_eq!(vm.eval("contains([1, 2], 3)").unwrap(), Val::Bool(false));
        assert_eq!(vm.eval("contains({a: 1}, 'a')").unwrap(), Val::Bool(true));
    }

    #[test]
    fn test_json_helpers() {
        let mut vm = interp();
        assert_eq!(vm.eval("to_json([1, 'a'])").unwrap(), Val::from(r#"[1,"a"]"#));
        assert_eq!(vm.eval(r#"from_json('{"n": 2}').n"#).unwrap(), Val::Num(2.0));
        assert_eq!(vm.eval("from_json('not json')").unwrap(), Val::Null);
    }

    #[test]
    fn test_conversions() {
        let mut vm = interp();
        assert_eq!(vm.eval("str(12) + 1").unwrap(), Val::from("121"));
        assert_eq!(vm.eval("num('3') + 1").unwrap(), Val::Num(4.0));
    }
}
