//! Evaluates a hook's `when` clause: a small HCL boolean expression over a
//! prospective node's `inputs` (spec §4.2 step 6, §4.4 step b).
//!
//! Parsing is delegated to `hcl-rs`; this module is the "small walker" the
//! Design Notes call for (the same philosophy as [`crate::resolver`]) over
//! the parsed [`hcl::Expression`] tree. Per spec, a `when` clause that
//! fails to parse or evaluate is treated as a conservative match — callers
//! should call [`evaluate`] and fall back to `true` on `Err`, which is what
//! [`matches`] does.

use crate::value::Value;
use hcl::{BinaryOperator, Expression, Traversal, TraversalOperator, UnaryOperator};
use std::collections::HashMap;

/// Evaluate `when` against `inputs`. `Ok(true)`/`Ok(false)` on a clean
/// evaluation; `Err` if the expression didn't parse, referenced an unknown
/// variable, or used a construct this walker doesn't understand.
pub fn evaluate(when: &str, inputs: &HashMap<String, Value>) -> Result<bool, String> {
    let expr: Expression = when
        .parse()
        .map_err(|e| format!("invalid `when` expression: {e}"))?;
    match eval_expr(&expr, inputs)? {
        Value::Bool(b) => Ok(b),
        other => Err(format!("`when` did not evaluate to a boolean: {other:?}")),
    }
}

/// `true` if `when` is absent/empty (the catch-all), or evaluates to
/// `true`, or fails to evaluate at all (conservative match per spec).
pub fn matches(when: Option<&str>, inputs: &HashMap<String, Value>) -> bool {
    match when {
        None => true,
        Some(w) if w.trim().is_empty() => true,
        Some(w) => evaluate(w, inputs).unwrap_or(true),
    }
}

fn eval_expr(expr: &Expression, inputs: &HashMap<String, Value>) -> Result<Value, String> {
    match expr {
        Expression::Null => Ok(Value::Null),
        Expression::Bool(b) => Ok(Value::Bool(*b)),
        Expression::Number(n) => Ok(Value::Number(n.as_f64().unwrap_or(0.0))),
        Expression::String(s) => Ok(Value::String(s.clone())),
        Expression::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|i| eval_expr(i, inputs))
                .collect::<Result<_, _>>()?,
        )),
        Expression::Parenthesis(inner) => eval_expr(inner, inputs),
        Expression::Variable(v) => inputs
            .get(v.as_str())
            .cloned()
            .ok_or_else(|| format!("undefined variable `{v}`")),
        Expression::Traversal(t) => eval_traversal(t, inputs),
        Expression::Operation(op) => eval_operation(op, inputs),
        Expression::FuncCall(call) => eval_func_call(&call.name, &call.args, inputs),
        other => Err(format!("unsupported `when` construct: {other:?}")),
    }
}

fn eval_traversal(t: &Traversal, inputs: &HashMap<String, Value>) -> Result<Value, String> {
    let mut current = eval_expr(&t.expr, inputs)?;
    for op in &t.operators {
        current = match op {
            TraversalOperator::GetAttr(ident) => match current {
                Value::Map(ref m) => m
                    .get(ident.as_str())
                    .cloned()
                    .ok_or_else(|| format!("no attribute `{ident}`"))?,
                _ => return Err(format!("cannot get attribute `{ident}` on non-map value")),
            },
            TraversalOperator::Index(idx_expr) => {
                let idx = eval_expr(idx_expr, inputs)?;
                index_value(&current, &idx)?
            }
            TraversalOperator::LegacyIndex(i) => {
                index_value(&current, &Value::Number(*i as f64))?
            }
            _ => return Err("unsupported traversal operator".to_string()),
        };
    }
    Ok(current)
}

fn index_value(value: &Value, idx: &Value) -> Result<Value, String> {
    match (value, idx) {
        (Value::List(items), Value::Number(n)) => items
            .get(*n as usize)
            .cloned()
            .ok_or_else(|| "index out of bounds".to_string()),
        (Value::Map(m), Value::String(s)) => {
            m.get(s).cloned().ok_or_else(|| format!("no key `{s}`"))
        }
        _ => Err("unsupported index operation".to_string()),
    }
}

fn eval_operation(op: &hcl::Operation, inputs: &HashMap<String, Value>) -> Result<Value, String> {
    match op {
        hcl::Operation::Unary(u) => {
            let v = eval_expr(&u.expr, inputs)?;
            match u.operator {
                UnaryOperator::Not => Ok(Value::Bool(!truthy(&v))),
                UnaryOperator::Neg => match v {
                    Value::Number(n) => Ok(Value::Number(-n)),
                    _ => Err("cannot negate a non-number".to_string()),
                },
            }
        }
        hcl::Operation::Binary(b) => {
            // Short-circuit And/Or before evaluating the rhs.
            if b.operator == BinaryOperator::And {
                let lhs = eval_expr(&b.lhs, inputs)?;
                if !truthy(&lhs) {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(truthy(&eval_expr(&b.rhs, inputs)?)));
            }
            if b.operator == BinaryOperator::Or {
                let lhs = eval_expr(&b.lhs, inputs)?;
                if truthy(&lhs) {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(truthy(&eval_expr(&b.rhs, inputs)?)));
            }

            let lhs = eval_expr(&b.lhs, inputs)?;
            let rhs = eval_expr(&b.rhs, inputs)?;
            match b.operator {
                BinaryOperator::Eq => Ok(Value::Bool(values_eq(&lhs, &rhs))),
                BinaryOperator::NotEq => Ok(Value::Bool(!values_eq(&lhs, &rhs))),
                BinaryOperator::Less
                | BinaryOperator::LessEq
                | BinaryOperator::Greater
                | BinaryOperator::GreaterEq => compare_numbers(b.operator, &lhs, &rhs),
                BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Mul | BinaryOperator::Div
                | BinaryOperator::Mod => arithmetic(b.operator, &lhs, &rhs),
                _ => Err("unsupported binary operator".to_string()),
            }
        }
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => *n != 0.0,
        Value::List(l) => !l.is_empty(),
        Value::Map(m) => !m.is_empty(),
    }
}

fn values_eq(a: &Value, b: &Value) -> bool {
    a == b
}

fn compare_numbers(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value, String> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Err("comparison requires numbers".to_string());
    };
    Ok(Value::Bool(match op {
        BinaryOperator::Less => x < y,
        BinaryOperator::LessEq => x <= y,
        BinaryOperator::Greater => x > y,
        BinaryOperator::GreaterEq => x >= y,
        _ => unreachable!(),
    }))
}

fn arithmetic(op: BinaryOperator, a: &Value, b: &Value) -> Result<Value, String> {
    let (Value::Number(x), Value::Number(y)) = (a, b) else {
        return Err("arithmetic requires numbers".to_string());
    };
    Ok(Value::Number(match op {
        BinaryOperator::Plus => x + y,
        BinaryOperator::Minus => x - y,
        BinaryOperator::Mul => x * y,
        BinaryOperator::Div => x / y,
        BinaryOperator::Mod => x % y,
        _ => unreachable!(),
    }))
}

/// The small function surface hook `when` clauses use in practice
/// (spec S1/S2: `split(":", type)[0] == "postgres"`).
fn eval_func_call(
    name: &str,
    args: &[Expression],
    inputs: &HashMap<String, Value>,
) -> Result<Value, String> {
    let args: Vec<Value> = args
        .iter()
        .map(|a| eval_expr(a, inputs))
        .collect::<Result<_, _>>()?;
    match name {
        "split" => {
            let [Value::String(sep), Value::String(s)] = &args[..] else {
                return Err("split(separator, string) expects two strings".to_string());
            };
            Ok(Value::List(
                s.split(sep.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        "contains" => {
            let [Value::List(items), needle] = &args[..] else {
                return Err("contains(list, value) expects a list and a value".to_string());
            };
            Ok(Value::Bool(items.contains(needle)))
        }
        "lower" => {
            let [Value::String(s)] = &args[..] else {
                return Err("lower(string) expects one string".to_string());
            };
            Ok(Value::String(s.to_lowercase()))
        }
        other => Err(format!("unknown function `{other}`")),
    }
}
