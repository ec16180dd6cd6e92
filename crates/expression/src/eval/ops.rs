//! Operators and built-in functions over values.
//!
//! Arithmetic propagates `null`: any `null` operand yields `null`. Integer
//! arithmetic is checked and falls back to floating point on overflow.

use std::cmp::Ordering;

use serde_json::{Value, json};

use crate::ast::{BinaryOp, Builtin, UnaryOp};
use crate::error::{ExpressionError, ExpressionResult};
use crate::value::{self, compare, is_empty, is_truthy, number_as_f64, value_type_name};

fn operand_error(expected: &str, left: &Value, right: &Value) -> ExpressionError {
    ExpressionError::type_error(
        expected,
        format!(
            "{} and {}",
            value_type_name(left),
            value_type_name(right)
        ),
    )
}

/// Apply a unary operator.
pub(crate) fn unary(op: UnaryOp, operand: &Value) -> ExpressionResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!is_truthy(operand))),
        UnaryOp::Negate => match operand {
            Value::Null => Ok(Value::Null),
            Value::Number(n) => {
                if let Some(i) = n.as_i64().and_then(i64::checked_neg) {
                    Ok(Value::from(i))
                } else {
                    Ok(json!(-number_as_f64(n).unwrap_or(0.0)))
                }
            }
            other => Err(ExpressionError::type_error("number", value_type_name(other))),
        },
    }
}

/// Apply a non-short-circuit binary operator.
pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> ExpressionResult<Value> {
    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Subtract => arithmetic(left, right, i64::checked_sub, |l, r| l - r),
        BinaryOp::Multiply => arithmetic(left, right, i64::checked_mul, |l, r| l * r),
        BinaryOp::Divide => divide(left, right),
        BinaryOp::Modulo => modulo(left, right),
        BinaryOp::Equal => Ok(Value::Bool(equals(left, right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!equals(left, right))),
        BinaryOp::LessThan => ordering(left, right, Ordering::is_lt),
        BinaryOp::GreaterThan => ordering(left, right, Ordering::is_gt),
        BinaryOp::LessEqual => ordering(left, right, Ordering::is_le),
        BinaryOp::GreaterEqual => ordering(left, right, Ordering::is_ge),
        BinaryOp::And => Ok(Value::Bool(is_truthy(left) && is_truthy(right))),
        BinaryOp::Or => Ok(Value::Bool(is_truthy(left) || is_truthy(right))),
    }
}

/// Numbers compare by value (`1 == 1.0`); everything else structurally.
fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => compare(left, right) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value, test: fn(Ordering) -> bool) -> ExpressionResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Bool(false));
    }
    compare(left, right)
        .map(|ord| Value::Bool(test(ord)))
        .ok_or_else(|| operand_error("comparable values", left, right))
}

fn add(left: &Value, right: &Value) -> ExpressionResult<Value> {
    match (left, right) {
        (Value::String(l), Value::String(r)) => {
            let mut result = String::with_capacity(l.len() + r.len());
            result.push_str(l);
            result.push_str(r);
            Ok(Value::String(result))
        }
        (Value::Number(_) | Value::Null, Value::Number(_) | Value::Null) => {
            arithmetic(left, right, i64::checked_add, |l, r| l + r)
        }
        _ => Err(operand_error("number or string", left, right)),
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> ExpressionResult<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Number(l), Value::Number(r)) => {
            if let (Some(li), Some(ri)) = (l.as_i64(), r.as_i64()) {
                // overflow falls back to float
                Ok(int_op(li, ri).map_or_else(
                    || json!(float_op(li as f64, ri as f64)),
                    Value::from,
                ))
            } else {
                let lf = number_as_f64(l).unwrap_or(0.0);
                let rf = number_as_f64(r).unwrap_or(0.0);
                Ok(json!(float_op(lf, rf)))
            }
        }
        _ => Err(operand_error("number", left, right)),
    }
}

fn divide(left: &Value, right: &Value) -> ExpressionResult<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Number(l), Value::Number(r)) => {
            let lf = number_as_f64(l).unwrap_or(0.0);
            let rf = number_as_f64(r).unwrap_or(0.0);
            if rf == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            let quotient = lf / rf;
            // exact integer quotients stay integers
            if l.is_i64() && r.is_i64() && quotient.fract() == 0.0 {
                Ok(Value::from(quotient as i64))
            } else {
                Ok(json!(quotient))
            }
        }
        _ => Err(operand_error("number", left, right)),
    }
}

fn modulo(left: &Value, right: &Value) -> ExpressionResult<Value> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Number(l), Value::Number(r)) => {
            if let (Some(li), Some(ri)) = (l.as_i64(), r.as_i64()) {
                if ri == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                Ok(Value::from(li % ri))
            } else {
                let lf = number_as_f64(l).unwrap_or(0.0);
                let rf = number_as_f64(r).unwrap_or(0.0);
                if rf == 0.0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                Ok(json!(lf % rf))
            }
        }
        _ => Err(operand_error("number", left, right)),
    }
}

fn items<'v>(function: Builtin, value: &'v Value) -> ExpressionResult<&'v [Value]> {
    match value {
        Value::Null => Ok(&[]),
        Value::Array(items) => Ok(items),
        other => Err(ExpressionError::type_error(
            format!("array argument to {}", function.name()),
            value_type_name(other),
        )),
    }
}

fn single(function: Builtin, args: &[Value]) -> ExpressionResult<&Value> {
    match args {
        [arg] => Ok(arg),
        _ => Err(ExpressionError::eval_error(format!(
            "{} expects 1 argument, got {}",
            function.name(),
            args.len()
        ))),
    }
}

/// Call a built-in function.
pub(crate) fn builtin(function: Builtin, args: &[Value]) -> ExpressionResult<Value> {
    match function {
        Builtin::Len => match single(function, args)? {
            Value::Null => Ok(Value::from(0)),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            other => Err(ExpressionError::type_error(
                "array or string",
                value_type_name(other),
            )),
        },
        Builtin::Sum => {
            let mut total = Value::from(0);
            for item in items(function, single(function, args)?)? {
                if !item.is_null() {
                    total = add(&total, item)?;
                }
            }
            Ok(total)
        }
        Builtin::Count => {
            let count = items(function, single(function, args)?)?
                .iter()
                .filter(|item| !item.is_null())
                .count();
            Ok(Value::from(count))
        }
        Builtin::Any => Ok(Value::Bool(
            items(function, single(function, args)?)?
                .iter()
                .any(is_truthy),
        )),
        Builtin::All => Ok(Value::Bool(
            items(function, single(function, args)?)?
                .iter()
                .all(is_truthy),
        )),
        Builtin::IsNull => Ok(Value::Bool(single(function, args)?.is_null())),
        Builtin::IsEmpty => Ok(Value::Bool(is_empty(single(function, args)?))),
        Builtin::Coalesce => Ok(args
            .iter()
            .find(|arg| !arg.is_null())
            .cloned()
            .unwrap_or(Value::Null)),
        Builtin::Concat => Ok(Value::String(args.iter().map(value::to_text).collect())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BinaryOp::Add, json!(3), json!(4), json!(7))]
    #[case(BinaryOp::Add, json!(1.5), json!(1), json!(2.5))]
    #[case(BinaryOp::Add, json!("a"), json!("b"), json!("ab"))]
    #[case(BinaryOp::Add, Value::Null, json!(1), Value::Null)]
    #[case(BinaryOp::Subtract, json!(10), json!(4), json!(6))]
    #[case(BinaryOp::Multiply, json!(6), json!(7), json!(42))]
    #[case(BinaryOp::Divide, json!(10), json!(4), json!(2.5))]
    #[case(BinaryOp::Divide, json!(10), json!(5), json!(2))]
    #[case(BinaryOp::Modulo, json!(10), json!(4), json!(2))]
    #[case(BinaryOp::Equal, json!(1), json!(1.0), json!(true))]
    #[case(BinaryOp::LessThan, json!(1), json!(2), json!(true))]
    #[case(BinaryOp::LessThan, Value::Null, json!(2), json!(false))]
    #[case(BinaryOp::GreaterEqual, json!("b"), json!("a"), json!(true))]
    fn test_binary(
        #[case] op: BinaryOp,
        #[case] left: Value,
        #[case] right: Value,
        #[case] expected: Value,
    ) {
        assert_eq!(binary(op, &left, &right).unwrap(), expected);
    }

    #[test]
    fn test_overflow_falls_back_to_float() {
        let result = binary(BinaryOp::Add, &json!(i64::MAX), &json!(1)).unwrap();
        assert!(result.is_f64());
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(
            binary(BinaryOp::Divide, &json!(1), &json!(0)).unwrap_err(),
            ExpressionError::DivisionByZero
        );
        assert_eq!(
            binary(BinaryOp::Modulo, &json!(1), &json!(0)).unwrap_err(),
            ExpressionError::DivisionByZero
        );
    }

    #[test]
    fn test_type_errors() {
        let err = binary(BinaryOp::Subtract, &json!("a"), &json!(1)).unwrap_err();
        assert_eq!(err.code(), "EXPR:TYPE");
        let err = binary(BinaryOp::LessThan, &json!("a"), &json!(1)).unwrap_err();
        assert_eq!(err.code(), "EXPR:TYPE");
    }

    #[rstest]
    #[case(Builtin::Len, vec![json!([1, 2, 3])], json!(3))]
    #[case(Builtin::Len, vec![Value::Null], json!(0))]
    #[case(Builtin::Len, vec![json!("héllo")], json!(5))]
    #[case(Builtin::Sum, vec![json!([1, 2, null, 4])], json!(7))]
    #[case(Builtin::Count, vec![json!([1, null, 3])], json!(2))]
    #[case(Builtin::Any, vec![json!([false, 0, true])], json!(true))]
    #[case(Builtin::All, vec![json!([true, 1])], json!(true))]
    #[case(Builtin::All, vec![json!([])], json!(true))]
    #[case(Builtin::IsNull, vec![Value::Null], json!(true))]
    #[case(Builtin::IsEmpty, vec![json!("")], json!(true))]
    #[case(Builtin::Coalesce, vec![Value::Null, json!(2), json!(3)], json!(2))]
    #[case(Builtin::Concat, vec![json!("n="), json!(3), Value::Null], json!("n=3"))]
    fn test_builtins(#[case] function: Builtin, #[case] args: Vec<Value>, #[case] expected: Value) {
        assert_eq!(builtin(function, &args).unwrap(), expected);
    }

    #[test]
    fn test_unary() {
        assert_eq!(unary(UnaryOp::Negate, &json!(3)).unwrap(), json!(-3));
        assert_eq!(unary(UnaryOp::Negate, &Value::Null).unwrap(), Value::Null);
        assert_eq!(unary(UnaryOp::Not, &json!(0)).unwrap(), json!(true));
    }
}
