//! Variable loading strategies
//!
//! - **Full**: bind every caller variable. Value expressions use this because some
//!   built-ins read caller variables indirectly, not only through the expression text.
//! - **Lazy**: bind only variables whose names appear in the expression text.
//!   Conditions use this; they run far more often against far larger maps.
//!
//! Lazy loading is a heuristic: the scan picks up every identifier-shaped token
//! outside string literals and comments, including property names after `.` and
//! object keys. That can over-bind, never under-bind a plain identifier reference.

use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

use crate::engine::{Interpreter, Val};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableLoading {
    Full,
    Lazy,
}

/// Bind caller variables onto an instance, returning how many were bound
pub fn bind_variables(
    interp: &mut Interpreter,
    expr: &str,
    variables: &Map<String, JsonValue>,
    strategy: VariableLoading,
) -> usize {
    match strategy {
        VariableLoading::Full => {
            for (name, value) in variables {
                interp.set(name.clone(), Val::from_json(value));
            }
            variables.len()
        }
        VariableLoading::Lazy => {
            let mut bound = 0;
            for name in referenced_identifiers(expr) {
                if let Some(value) = variables.get(name) {
                    interp.set(name, Val::from_json(value));
                    bound += 1;
                }
            }
            bound
        }
    }
}

/// Identifier-like tokens (`[A-Za-z_$][A-Za-z0-9_$]*`) in an expression
pub fn referenced_identifiers(expr: &str) -> HashSet<&str> {
    let bytes = expr.as_bytes();
    let mut found = HashSet::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'\'' | b'"' | b'`' => i = skip_string(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
            }
            _ if is_ident_start(b) => {
                let start = i;
                while i < bytes.len() && is_ident_char(bytes[i]) {
                    i += 1;
                }
                found.insert(&expr[start..i]);
            }
            // Skip numbers whole so `1e5` does not yield `e5`
            _ if b.is_ascii_digit() => {
                while i < bytes.len() && (is_ident_char(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    found
}

/// Index just past the closing quote of the string starting at `start`
fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => unreachable!("fixture must be an object"),
        }
    }

    #[test]
    fn test_scan_finds_identifiers() {
        let ids = referenced_identifiers("fileLength > 0 && $env.mode == 'prod'");
        assert!(ids.contains("fileLength"));
        assert!(ids.contains("$env"));
        assert!(ids.contains("mode"));
        assert!(!ids.contains("prod"));
    }

    #[test]
    fn test_scan_skips_strings_comments_and_numbers() {
        let ids = referenced_identifiers(r#"a + "b \" c" + 1e5 // d
            /* e */ + f"#);
        let expected: HashSet<&str> = ["a", "f"].into_iter().collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_lazy_binds_only_referenced() {
        let mut interp = Interpreter::new();
        let variables = vars(json!({"a": 1, "b": 2, "c": 3}));

        let bound = bind_variables(&mut interp, "a + 1", &variables, VariableLoading::Lazy);

        assert_eq!(bound, 1);
        assert!(interp.has_binding("a"));
        assert!(!interp.has_binding("b"));
        assert!(!interp.has_binding("c"));
    }

    #[test]
    fn test_full_binds_everything() {
        let mut interp = Interpreter::new();
        let variables = vars(json!({"a": 1, "b": 2, "c": 3}));

        let bound = bind_variables(&mut interp, "a + 1", &variables, VariableLoading::Full);

        assert_eq!(bound, 3);
        assert_eq!(interp.binding_count(), 3);
    }

    #[test]
    fn test_lazy_over_binds_property_names() {
        let mut interp = Interpreter::new();
        let variables = vars(json!({"obj": {"size": 1}, "size": 9}));

        let bound = bind_variables(&mut interp, "obj.size", &variables, VariableLoading::Lazy);

        assert_eq!(bound, 2);
        assert_eq!(interp.eval("obj.size").unwrap(), Val::Num(1.0));
    }
}
