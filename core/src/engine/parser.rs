//! PEST-based parser for the expression language
//!
//! Produces the AST evaluated by the interpreter

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use super::ast::{BinaryOp, Expr, LogicalOp, Program, Stmt, UnaryOp};

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "engine/grammar.pest"]
struct ScriptParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    PestError(String),
    BuildError(String),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        ParseError::PestError(err.to_string())
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::PestError(msg) => write!(f, "{}", msg),
            ParseError::BuildError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Public API ===================== */

/// Parse a script into a program
pub fn parse_program(source: &str) -> ParseResult<Program> {
    let mut pairs = ScriptParser::parse(Rule::program, source)?;
    let program = next_pair(&mut pairs, "program")?;

    let mut body = Vec::new();
    let mut prev_end = None;

    for pair in program.into_inner() {
        if pair.as_rule() == Rule::EOI {
            break;
        }

        let span = pair.as_span();
        if let Some(end) = prev_end {
            check_separator(source, end, span.start())?;
        }
        prev_end = Some(span.end());

        body.push(build_statement(pair)?);
    }

    Ok(Program { body })
}

/// Statements must be separated by `;` or a line break
///
/// The grammar skips whitespace (newlines included) between statements, so
/// `1 2` parses as two statements; the gap between them decides. A `;` inside
/// a comment does not count, a line break inside a block comment does.
fn check_separator(source: &str, prev_end: usize, next_start: usize) -> ParseResult<()> {
    let mut rest = &source[prev_end..next_start];
    let mut separated = false;

    while let Some(c) = rest.chars().next() {
        if let Some(body) = rest.strip_prefix("/*") {
            let end = body.find("*/").map_or(body.len(), |i| i + 2);
            separated |= body[..end].contains('\n');
            rest = &body[end..];
        } else if let Some(body) = rest.strip_prefix("//") {
            rest = &body[body.find('\n').unwrap_or(body.len())..];
        } else {
            separated |= c == ';' || c == '\n';
            rest = &rest[c.len_utf8()..];
        }
    }

    if separated {
        return Ok(());
    }

    let line = source[..next_start].matches('\n').count() + 1;
    Err(ParseError::BuildError(format!(
        "Unexpected token '{}' at line {}: expected ';' or a line break before a new statement",
        source[next_start..].chars().next().unwrap_or(' '),
        line
    )))
}

/* ===================== AST Builder ===================== */

fn next_pair<'a>(pairs: &mut Pairs<'a, Rule>, what: &str) -> ParseResult<Pair<'a, Rule>> {
    pairs
        .next()
        .ok_or_else(|| ParseError::BuildError(format!("Missing {}", what)))
}

fn build_statement(pair: Pair<Rule>) -> ParseResult<Stmt> {
    match pair.as_rule() {
        Rule::declaration => {
            // declaration = { decl_kw ~ identifier ~ "=" ~ expression }
            let mut inner = pair.into_inner();
            next_pair(&mut inner, "declaration keyword")?;
            let name = next_pair(&mut inner, "declared name")?.as_str().to_string();
            let init = build_expression(next_pair(&mut inner, "initializer")?)?;
            Ok(Stmt::Declare { name, init })
        }
        Rule::assignment => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, "assignment target")?.as_str().to_string();
            let expr = build_expression(next_pair(&mut inner, "assigned value")?)?;
            Ok(Stmt::Assign { name, expr })
        }
        Rule::expression => Ok(Stmt::Expr {
            expr: build_expression(pair)?,
        }),
        rule => Err(ParseError::BuildError(format!(
            "Unexpected statement rule: {:?}",
            rule
        ))),
    }
}

fn build_expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expression => {
            let mut inner = pair.into_inner();
            build_expression(next_pair(&mut inner, "expression")?)
        }
        Rule::conditional => {
            // conditional = { logical_or ~ ("?" ~ expression ~ ":" ~ expression)? }
            let mut inner = pair.into_inner();
            let test = build_expression(next_pair(&mut inner, "condition")?)?;
            match inner.next() {
                None => Ok(test),
                Some(then_pair) => {
                    let then_e = build_expression(then_pair)?;
                    let else_e = build_expression(next_pair(&mut inner, "else branch")?)?;
                    Ok(Expr::Conditional {
                        test: Box::new(test),
                        then_e: Box::new(then_e),
                        else_e: Box::new(else_e),
                    })
                }
            }
        }
        Rule::logical_or
        | Rule::logical_and
        | Rule::equality
        | Rule::relational
        | Rule::additive
        | Rule::multiplicative => build_operator_chain(pair),
        Rule::unary => build_unary(pair),
        Rule::postfix => build_postfix(pair),
        Rule::identifier => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
        }),
        Rule::number => {
            let num_str = pair.as_str();
            let value = num_str.parse::<f64>().map_err(|e| {
                ParseError::BuildError(format!("Failed to parse number '{}': {}", num_str, e))
            })?;
            Ok(Expr::LitNum { v: value })
        }
        Rule::boolean => Ok(Expr::LitBool {
            v: pair.as_str() == "true",
        }),
        Rule::null_lit => Ok(Expr::LitNull),
        Rule::undefined_lit => Ok(Expr::LitUndefined),
        Rule::string => Ok(Expr::LitStr {
            v: build_string(pair)?,
        }),
        Rule::array => {
            let items = pair
                .into_inner()
                .map(build_expression)
                .collect::<ParseResult<Vec<Expr>>>()?;
            Ok(Expr::Array { items })
        }
        Rule::object => {
            let props = pair
                .into_inner()
                .map(build_property)
                .collect::<ParseResult<Vec<(String, Expr)>>>()?;
            Ok(Expr::Object { props })
        }
        rule => Err(ParseError::BuildError(format!(
            "Unexpected expression rule: {:?}",
            rule
        ))),
    }
}

/// Fold `operand (op operand)*` left to right
fn build_operator_chain(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut expr = build_expression(next_pair(&mut inner, "operand")?)?;

    while let Some(op_pair) = inner.next() {
        let right = build_expression(next_pair(&mut inner, "right operand")?)?;
        let left = Box::new(expr);
        let right = Box::new(right);

        expr = match op_pair.as_str() {
            "||" => Expr::Logical { op: LogicalOp::Or, left, right },
            "&&" => Expr::Logical { op: LogicalOp::And, left, right },
            "??" => Expr::Logical { op: LogicalOp::Nullish, left, right },
            op => Expr::Binary {
                op: binary_op(op)?,
                left,
                right,
            },
        };
    }

    Ok(expr)
}

fn binary_op(op: &str) -> ParseResult<BinaryOp> {
    Ok(match op {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Rem,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::NotEq,
        "===" => BinaryOp::StrictEq,
        "!==" => BinaryOp::StrictNotEq,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        other => {
            return Err(ParseError::BuildError(format!(
                "Unknown operator '{}'",
                other
            )))
        }
    })
}

fn build_unary(pair: Pair<Rule>) -> ParseResult<Expr> {
    // unary = { op_unary* ~ postfix }
    let mut ops = Vec::new();
    let mut operand = None;

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::op_unary => ops.push(match inner.as_str() {
                "!" => UnaryOp::Not,
                "-" => UnaryOp::Neg,
                "+" => UnaryOp::Plus,
                _ => UnaryOp::TypeOf,
            }),
            _ => operand = Some(build_expression(inner)?),
        }
    }

    let mut expr =
        operand.ok_or_else(|| ParseError::BuildError("Unary operator without operand".into()))?;

    // Innermost operator applies first
    for op in ops.into_iter().rev() {
        expr = Expr::Unary {
            op,
            operand: Box::new(expr),
        };
    }

    Ok(expr)
}

fn build_postfix(pair: Pair<Rule>) -> ParseResult<Expr> {
    // postfix = { primary ~ (call_args | member | index)* }
    let mut inner = pair.into_inner();
    let mut expr = build_expression(next_pair(&mut inner, "primary expression")?)?;

    for suffix in inner {
        expr = match suffix.as_rule() {
            Rule::call_args => {
                let args = suffix
                    .into_inner()
                    .map(build_expression)
                    .collect::<ParseResult<Vec<Expr>>>()?;
                Expr::Call {
                    callee: Box::new(expr),
                    args,
                }
            }
            Rule::member => {
                let mut parts = suffix.into_inner();
                let property = next_pair(&mut parts, "property name")?.as_str().to_string();
                Expr::Member {
                    object: Box::new(expr),
                    property,
                }
            }
            Rule::index => {
                let mut parts = suffix.into_inner();
                let index = build_expression(next_pair(&mut parts, "index expression")?)?;
                Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                }
            }
            rule => {
                return Err(ParseError::BuildError(format!(
                    "Unexpected postfix rule: {:?}",
                    rule
                )))
            }
        };
    }

    Ok(expr)
}

fn build_property(pair: Pair<Rule>) -> ParseResult<(String, Expr)> {
    // property = { (identifier_name | string | number) ~ ":" ~ expression }
    let mut inner = pair.into_inner();
    let key_pair = next_pair(&mut inner, "property key")?;
    let key = match key_pair.as_rule() {
        Rule::string => build_string(key_pair)?,
        _ => key_pair.as_str().to_string(),
    };
    let value = build_expression(next_pair(&mut inner, "property value")?)?;
    Ok((key, value))
}

fn build_string(pair: Pair<Rule>) -> ParseResult<String> {
    // string = ${ "\"" ~ dq_inner ~ "\"" | "'" ~ sq_inner ~ "'" }
    let mut inner = pair.into_inner();
    let content = next_pair(&mut inner, "string content")?;
    unescape(content.as_str())
}

fn unescape(raw: &str) -> ParseResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| {
                        ParseError::BuildError(format!("Invalid unicode escape '\\u{}'", hex))
                    })?;
                out.push(code);
            }
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    Ok(out)
}
