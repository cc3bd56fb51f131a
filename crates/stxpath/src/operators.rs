//! Binary operators and the coercions they apply.

use crate::ast::BinaryOperator;
use crate::error::ExprError;
use crate::eval::Context;
use crate::value::{Value, parse_number};
use std::rc::Rc;

/// Converts a value for arithmetic. Strict contexts refuse strings that are not numbers.
pub(crate) fn number(value: &Value, ctx: &dyn Context) -> Result<f64, ExprError> {
    let n = value.to_number();
    if n.is_nan() && ctx.strict() {
        if let Value::String(s) = value {
            if parse_number(s).is_nan() {
                return Err(ExprError::Type(format!(
                    "cannot use '{}' as a number",
                    s
                )));
            }
        }
    }
    Ok(n)
}

pub(crate) fn binary(
    op: BinaryOperator,
    left: Value,
    right: Value,
    ctx: &dyn Context,
) -> Result<Value, ExprError> {
    use BinaryOperator::*;
    match op {
        Plus | Minus | Multiply | Divide | Modulo => {
            let l = number(&left, ctx)?;
            let r = number(&right, ctx)?;
            let n = match op {
                Plus => l + r,
                Minus => l - r,
                Multiply => l * r,
                Divide => l / r,
                _ => l % r,
            };
            Ok(Value::Number(n))
        }
        Equals | NotEquals | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            Ok(Value::Boolean(compare(op, &left, &right)))
        }
        Union => match (left, right) {
            (Value::NodeSet(mut l), Value::NodeSet(r)) => {
                for node in r {
                    if !l.iter().any(|n| Rc::ptr_eq(n, &node)) {
                        l.push(node);
                    }
                }
                Ok(Value::NodeSet(l))
            }
            (l, r) => Err(ExprError::Type(format!(
                "'|' needs two node-sets, got {} and {}",
                l.type_name(),
                r.type_name()
            ))),
        },
        // compiled into jumps, never reach here
        And => Ok(Value::Boolean(left.to_bool() && right.to_bool())),
        Or => Ok(Value::Boolean(left.to_bool() || right.to_bool())),
    }
}

fn atoms(value: &Value) -> Vec<Value> {
    match value {
        Value::NodeSet(nodes) => nodes
            .iter()
            .map(|n| Value::String(n.string_value().to_string()))
            .collect(),
        other => vec![other.clone()],
    }
}

/// XPath 1.0 comparison: node-sets compare existentially, otherwise booleans,
/// then numbers, then strings take precedence for `=` and `!=`.
fn compare(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::NodeSet(_), Value::Boolean(b)) => {
            compare_atoms(op, &Value::Boolean(left.to_bool()), &Value::Boolean(*b))
        }
        (Value::Boolean(b), Value::NodeSet(_)) => {
            compare_atoms(op, &Value::Boolean(*b), &Value::Boolean(right.to_bool()))
        }
        _ => {
            let ls = atoms(left);
            let rs = atoms(right);
            ls.iter()
                .any(|l| rs.iter().any(|r| compare_atoms(op, l, r)))
        }
    }
}

fn compare_atoms(op: BinaryOperator, left: &Value, right: &Value) -> bool {
    use BinaryOperator::*;
    match op {
        Equals | NotEquals => {
            let equal = match (left, right) {
                (Value::Boolean(_), _) | (_, Value::Boolean(_)) => {
                    left.to_bool() == right.to_bool()
                }
                (Value::Number(_), _) | (_, Value::Number(_)) => {
                    left.to_number() == right.to_number()
                }
                _ => left.to_string() == right.to_string(),
            };
            if op == Equals { equal } else { !equal }
        }
        _ => {
            let l = left.to_number();
            let r = right.to_number();
            match op {
                LessThan => l < r,
                LessThanOrEqual => l <= r,
                GreaterThan => l > r,
                _ => l >= r,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::eval::tests::{ChainContext, eval};

    #[test]
    fn test_node_set_comparisons_are_existential() {
        let ctx = ChainContext::sample();
        assert!(eval("@* = 'book'", &ctx).unwrap().to_bool());
        assert!(eval("@* = 7", &ctx).unwrap().to_bool());
        assert!(!eval("@* = 'cd'", &ctx).unwrap().to_bool());
        assert!(!eval("@missing != 'x'", &ctx).unwrap().to_bool());
    }

    #[test]
    fn test_mixed_type_equality() {
        let ctx = ChainContext::sample();
        assert!(eval("1 = '1.0'", &ctx).unwrap().to_bool());
        assert!(eval("true() = 'x'", &ctx).unwrap().to_bool());
        assert!(eval("'a' != 'b'", &ctx).unwrap().to_bool());
        assert!(eval("2 >= 1.5", &ctx).unwrap().to_bool());
    }

    #[test]
    fn test_union_of_attribute_sets() {
        let ctx = ChainContext::sample();
        assert_eq!(eval("count(@id | @type)", &ctx).unwrap().to_number(), 2.0);
        assert!(eval("1 | @id", &ctx).is_err());
    }
}
