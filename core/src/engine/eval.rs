//! Expression evaluation
//!
//! Tree-walking evaluation of parsed programs against an interpreter's scopes.

use std::collections::HashMap;

use super::ast::{BinaryOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use super::errors::{EvalError, EvalResult};
use super::values::Val;
use super::Interpreter;

impl Interpreter {
    pub(super) fn eval_program(&mut self, program: &Program) -> EvalResult<Val> {
        let mut last = Val::Undefined;

        for stmt in &program.body {
            last = match stmt {
                Stmt::Declare { name, init } => {
                    let value = self.eval_expr(init)?;
                    self.set(name.clone(), value);
                    Val::Undefined
                }
                Stmt::Assign { name, expr } => {
                    let value = self.eval_expr(expr)?;
                    self.set(name.clone(), value.clone());
                    value
                }
                Stmt::Expr { expr } => self.eval_expr(expr)?,
            };
        }

        Ok(last)
    }

    /// Evaluate an expression to a value
    pub fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Val> {
        match expr {
            Expr::LitUndefined => Ok(Val::Undefined),

            Expr::LitNull => Ok(Val::Null),

            Expr::LitBool { v } => Ok(Val::Bool(*v)),

            Expr::LitNum { v } => Ok(Val::Num(*v)),

            Expr::LitStr { v } => Ok(Val::Str(v.clone())),

            Expr::Array { items } => {
                let values = items
                    .iter()
                    .map(|item| self.eval_expr(item))
                    .collect::<EvalResult<Vec<Val>>>()?;
                Ok(Val::List(values))
            }

            Expr::Object { props } => {
                let mut map = HashMap::new();
                for (key, value) in props {
                    let value = self.eval_expr(value)?;
                    map.insert(key.clone(), value);
                }
                Ok(Val::Obj(map))
            }

            Expr::Ident { name } => self
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::Reference(name.clone())),

            Expr::Member { object, property } => {
                let object = self.eval_expr(object)?;
                get_property(&object, property)
            }

            Expr::Index { object, index } => {
                let object = self.eval_expr(object)?;
                let index = self.eval_expr(index)?;
                get_index(&object, &index)
            }

            Expr::Call { callee, args } => self.eval_call(callee, args),

            Expr::Unary { op, operand } => self.eval_unary(*op, operand),

            Expr::Binary { op, left, right } => {
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                Ok(binary(*op, &left, &right))
            }

            Expr::Logical { op, left, right } => {
                let left = self.eval_expr(left)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.is_truthy(),
                    LogicalOp::Or => left.is_truthy(),
                    LogicalOp::Nullish => !left.is_nullish(),
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval_expr(right)
                }
            }

            Expr::Conditional {
                test,
                then_e,
                else_e,
            } => {
                if self.eval_expr(test)?.is_truthy() {
                    self.eval_expr(then_e)
                } else {
                    self.eval_expr(else_e)
                }
            }
        }
    }

    fn eval_call(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Val> {
        // Method calls on strings and lists are handled inline; everything
        // else must resolve to a native bound on this instance.
        let (function, receiver) = match callee {
            Expr::Member { object, property } => {
                let receiver = self.eval_expr(object)?;
                match receiver {
                    Val::Str(_) | Val::List(_) => (None, Some((receiver, property))),
                    _ => (Some(get_property(&receiver, property)?), None),
                }
            }
            Expr::Ident { name } => {
                let function = self
                    .resolve_callable(name)
                    .cloned()
                    .ok_or_else(|| EvalError::Reference(name.clone()))?;
                (Some(function), None)
            }
            _ => (Some(self.eval_expr(callee)?), None),
        };

        let args = args
            .iter()
            .map(|arg| self.eval_expr(arg))
            .collect::<EvalResult<Vec<Val>>>()?;

        match (function, receiver) {
            (_, Some((receiver, method))) => call_method(&receiver, method, &args),
            (Some(function), None) => match function {
                Val::Native(_) => self.call(&function, &args),
                _ => Err(EvalError::type_error(format!(
                    "{} is not a function",
                    describe_callee(callee)
                ))),
            },
            (None, None) => Err(EvalError::type_error("invalid call target")),
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, operand: &Expr) -> EvalResult<Val> {
        if op == UnaryOp::TypeOf {
            // typeof tolerates unbound identifiers
            if let Expr::Ident { name } = operand {
                if !self.has_global(name) {
                    return Ok(Val::Str("undefined".to_string()));
                }
            }
            let value = self.eval_expr(operand)?;
            return Ok(Val::Str(value.type_of().to_string()));
        }

        let value = self.eval_expr(operand)?;
        Ok(match op {
            UnaryOp::Not => Val::Bool(!value.is_truthy()),
            UnaryOp::Neg => Val::Num(-value.to_number()),
            UnaryOp::Plus => Val::Num(value.to_number()),
            UnaryOp::TypeOf => Val::Str(value.type_of().to_string()),
        })
    }
}

/* ===================== Property Access ===================== */

fn get_property(object: &Val, property: &str) -> EvalResult<Val> {
    match object {
        Val::Undefined | Val::Null => Err(EvalError::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            object.to_display_string(),
            property
        ))),
        Val::Obj(map) => Ok(map.get(property).cloned().unwrap_or(Val::Undefined)),
        Val::Str(s) if property == "length" => Ok(Val::Num(s.chars().count() as f64)),
        Val::List(items) if property == "length" => Ok(Val::Num(items.len() as f64)),
        _ => Ok(Val::Undefined),
    }
}

fn get_index(object: &Val, index: &Val) -> EvalResult<Val> {
    match (object, index) {
        (Val::List(items), Val::Num(n)) => Ok(as_index(*n)
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Val::Undefined)),
        (Val::Str(s), Val::Num(n)) => Ok(as_index(*n)
            .and_then(|i| s.chars().nth(i))
            .map(|c| Val::Str(c.to_string()))
            .unwrap_or(Val::Undefined)),
        _ => get_property(object, &index.to_display_string()),
    }
}

fn as_index(n: f64) -> Option<usize> {
    if n >= 0.0 && n.fract() == 0.0 {
        Some(n as usize)
    } else {
        None
    }
}

fn describe_callee(callee: &Expr) -> String {
    match callee {
        Expr::Ident { name } => name.clone(),
        Expr::Member { object, property } => format!("{}.{}", describe_callee(object), property),
        _ => "expression".to_string(),
    }
}

/* ===================== Operators ===================== */

fn binary(op: BinaryOp, left: &Val, right: &Val) -> Val {
    match op {
        BinaryOp::Add => {
            let concat = matches!(left, Val::Str(_) | Val::List(_) | Val::Obj(_))
                || matches!(right, Val::Str(_) | Val::List(_) | Val::Obj(_));
            if concat {
                Val::Str(left.to_display_string() + &right.to_display_string())
            } else {
                Val::Num(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Val::Num(left.to_number() - right.to_number()),
        BinaryOp::Mul => Val::Num(left.to_number() * right.to_number()),
        BinaryOp::Div => Val::Num(left.to_number() / right.to_number()),
        BinaryOp::Rem => Val::Num(left.to_number() % right.to_number()),
        BinaryOp::Eq => Val::Bool(loose_equals(left, right)),
        BinaryOp::NotEq => Val::Bool(!loose_equals(left, right)),
        BinaryOp::StrictEq => Val::Bool(strict_equals(left, right)),
        BinaryOp::StrictNotEq => Val::Bool(!strict_equals(left, right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            Val::Bool(compare(op, left, right))
        }
    }
}

/// `===`: same type and same value; lists and objects compare structurally
pub(crate) fn strict_equals(left: &Val, right: &Val) -> bool {
    match (left, right) {
        (Val::Num(a), Val::Num(b)) => a == b,
        _ => left == right,
    }
}

/// `==` with the usual primitive coercions
pub(crate) fn loose_equals(left: &Val, right: &Val) -> bool {
    match (left, right) {
        (a, b) if a.is_nullish() && b.is_nullish() => true,
        (a, b) if a.is_nullish() || b.is_nullish() => false,
        (Val::Num(_), Val::Str(_)) | (Val::Str(_), Val::Num(_)) => {
            left.to_number() == right.to_number()
        }
        (Val::Bool(_), _) => loose_equals(&Val::Num(left.to_number()), right),
        (_, Val::Bool(_)) => loose_equals(left, &Val::Num(right.to_number())),
        _ => strict_equals(left, right),
    }
}

fn compare(op: BinaryOp, left: &Val, right: &Val) -> bool {
    if let (Val::Str(a), Val::Str(b)) = (left, right) {
        return match op {
            BinaryOp::Lt => a < b,
            BinaryOp::Le => a <= b,
            BinaryOp::Gt => a > b,
            _ => a >= b,
        };
    }

    // NaN compares false in every direction
    let (a, b) = (left.to_number(), right.to_number());
    match op {
        BinaryOp::Lt => a < b,
        BinaryOp::Le => a <= b,
        BinaryOp::Gt => a > b,
        _ => a >= b,
    }
}

/* ===================== String & List Methods ===================== */

fn arg_string(args: &[Val], idx: usize) -> String {
    args.get(idx)
        .map(Val::to_display_string)
        .unwrap_or_else(|| "undefined".to_string())
}

fn call_method(receiver: &Val, method: &str, args: &[Val]) -> EvalResult<Val> {
    match (receiver, method) {
        (Val::Str(s), "includes") => Ok(Val::Bool(s.contains(&arg_string(args, 0)))),
        (Val::Str(s), "startsWith") => Ok(Val::Bool(s.starts_with(&arg_string(args, 0)))),
        (Val::Str(s), "endsWith") => Ok(Val::Bool(s.ends_with(&arg_string(args, 0)))),
        (Val::Str(s), "indexOf") => {
            let needle = arg_string(args, 0);
            Ok(Val::Num(
                s.find(&needle)
                    .map(|byte_idx| s[..byte_idx].chars().count() as f64)
                    .unwrap_or(-1.0),
            ))
        }
        (Val::Str(s), "trim") => Ok(Val::Str(s.trim().to_string())),
        (Val::Str(s), "toLowerCase") => Ok(Val::Str(s.to_lowercase())),
        (Val::Str(s), "toUpperCase") => Ok(Val::Str(s.to_uppercase())),
        (Val::Str(s), "replace") => {
            Ok(Val::Str(s.replacen(&arg_string(args, 0), &arg_string(args, 1), 1)))
        }
        (Val::Str(s), "split") => {
            let sep = arg_string(args, 0);
            let parts = if sep.is_empty() {
                s.chars().map(|c| Val::Str(c.to_string())).collect()
            } else {
                s.split(sep.as_str()).map(Val::from).collect()
            };
            Ok(Val::List(parts))
        }
        (Val::List(items), "includes") => {
            let needle = args.first().cloned().unwrap_or(Val::Undefined);
            Ok(Val::Bool(items.iter().any(|item| strict_equals(item, &needle))))
        }
        (Val::List(items), "indexOf") => {
            let needle = args.first().cloned().unwrap_or(Val::Undefined);
            Ok(Val::Num(
                items
                    .iter()
                    .position(|item| strict_equals(item, &needle))
                    .map(|i| i as f64)
                    .unwrap_or(-1.0),
            ))
        }
        (Val::List(items), "join") => {
            let sep = match args.first() {
                None | Some(Val::Undefined) => ",".to_string(),
                Some(sep) => sep.to_display_string(),
            };
            Ok(Val::Str(
                items
                    .iter()
                    .map(Val::to_display_string)
                    .collect::<Vec<_>>()
                    .join(&sep),
            ))
        }
        _ => Err(EvalError::type_error(format!(
            "{}.{} is not a function",
            receiver.type_of(),
            method
        ))),
    }
}
