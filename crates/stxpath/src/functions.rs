//! Built-in implementations of the STXPath function library.

use crate::error::ExprError;
use crate::eval::Context;
use crate::value::{Node, Value};
use std::ops::RangeInclusive;
use std::rc::Rc;

/// Names of every built-in function.
pub const BUILTINS: &[&str] = &[
    "string",
    "number",
    "boolean",
    "not",
    "true",
    "false",
    "concat",
    "contains",
    "starts-with",
    "ends-with",
    "substring",
    "substring-before",
    "substring-after",
    "string-length",
    "normalize-space",
    "translate",
    "upper-case",
    "lower-case",
    "string-join",
    "count",
    "sum",
    "floor",
    "ceiling",
    "round",
    "name",
    "local-name",
    "namespace-uri",
    "position",
    "empty",
    "exists",
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(&name)
}

/// Dispatches a call. Built-ins win; anything else goes to the context's hook.
pub fn call(name: &str, args: Vec<Value>, ctx: &dyn Context) -> Result<Value, ExprError> {
    match name {
        "string" => func_string(args, ctx),
        "number" => {
            let value = optional_arg(name, args, ctx)?;
            Ok(Value::Number(value.to_number()))
        }
        "boolean" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Boolean(value.to_bool()))
        }
        "not" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Boolean(!value.to_bool()))
        }
        "true" => exact::<0>(name, args).map(|_| Value::Boolean(true)),
        "false" => exact::<0>(name, args).map(|_| Value::Boolean(false)),

        "concat" => {
            arity(name, &args, 2..=usize::MAX)?;
            Ok(Value::String(args.iter().map(|a| a.to_string()).collect()))
        }
        "contains" => string_predicate(name, args, |s, t| s.contains(t)),
        "starts-with" => string_predicate(name, args, |s, t| s.starts_with(t)),
        "ends-with" => string_predicate(name, args, |s, t| s.ends_with(t)),
        "substring-before" => {
            let [s, t] = exact::<2>(name, args)?;
            let (s, t) = (s.to_string(), t.to_string());
            Ok(Value::String(
                s.find(&t).map(|i| s[..i].to_string()).unwrap_or_default(),
            ))
        }
        "substring-after" => {
            let [s, t] = exact::<2>(name, args)?;
            let (s, t) = (s.to_string(), t.to_string());
            Ok(Value::String(
                s.find(&t)
                    .map(|i| s[i + t.len()..].to_string())
                    .unwrap_or_default(),
            ))
        }
        "substring" => func_substring(args),
        "string-length" => {
            let value = optional_arg(name, args, ctx)?;
            Ok(Value::Number(value.to_string().chars().count() as f64))
        }
        "normalize-space" => {
            let value = optional_arg(name, args, ctx)?;
            Ok(Value::String(
                value.to_string().split_whitespace().collect::<Vec<_>>().join(" "),
            ))
        }
        "translate" => func_translate(args),
        "upper-case" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::String(value.to_string().to_uppercase()))
        }
        "lower-case" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::String(value.to_string().to_lowercase()))
        }
        "string-join" => {
            let [items, separator] = exact::<2>(name, args)?;
            let parts: Vec<String> = items.items().iter().map(|i| i.to_string()).collect();
            Ok(Value::String(parts.join(&separator.to_string())))
        }

        "count" => func_count(args, ctx),
        "sum" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Number(
                value.items().iter().map(|i| i.to_number()).sum(),
            ))
        }
        "floor" => number_fn(name, args, f64::floor),
        "ceiling" => number_fn(name, args, f64::ceil),
        "round" => number_fn(name, args, |n| {
            if n.is_nan() || n.is_infinite() || n == 0.0 {
                n
            } else {
                // halves round towards positive infinity
                (n + 0.5).floor()
            }
        }),

        "name" => node_name(name, args, ctx, |n| {
            n.name.as_ref().map(|q| q.qualified()).unwrap_or_default()
        }),
        "local-name" => node_name(name, args, ctx, |n| {
            n.name.as_ref().map(|q| q.local_name.clone()).unwrap_or_default()
        }),
        "namespace-uri" => node_name(name, args, ctx, |n| {
            n.name
                .as_ref()
                .and_then(|q| q.namespace_uri.clone())
                .unwrap_or_default()
        }),
        "position" => exact::<0>(name, args).map(|_| Value::Number(ctx.position() as f64)),
        "empty" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Boolean(is_empty(&value, ctx)))
        }
        "exists" => {
            let [value] = exact::<1>(name, args)?;
            Ok(Value::Boolean(!is_empty(&value, ctx)))
        }

        _ => {
            log::trace!("Delegating {}() to the evaluation context", name);
            ctx.call(name, &args)
                .unwrap_or_else(|| Err(ExprError::UnknownFunction(name.to_string())))
        }
    }
}

fn arity(name: &str, args: &[Value], expected: RangeInclusive<usize>) -> Result<(), ExprError> {
    if expected.contains(&args.len()) {
        Ok(())
    } else if expected.start() == expected.end() {
        Err(ExprError::function(
            name,
            format!("expected {} argument(s), got {}", expected.start(), args.len()),
        ))
    } else {
        Err(ExprError::function(
            name,
            format!("expected at least {} argument(s), got {}", expected.start(), args.len()),
        ))
    }
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], ExprError> {
    arity(name, &args, N..=N)?;
    args.try_into()
        .map_err(|_| ExprError::function(name, "argument count mismatch"))
}

/// A single optional argument defaulting to the context node.
fn optional_arg(name: &str, mut args: Vec<Value>, ctx: &dyn Context) -> Result<Value, ExprError> {
    arity(name, &args, 0..=1)?;
    Ok(args
        .pop()
        .unwrap_or_else(|| Value::NodeSet(vec![ctx.node().clone()])))
}

fn func_string(args: Vec<Value>, ctx: &dyn Context) -> Result<Value, ExprError> {
    let value = optional_arg("string", args, ctx)?;
    Ok(Value::String(value.to_string()))
}

fn string_predicate(
    name: &str,
    args: Vec<Value>,
    test: impl Fn(&str, &str) -> bool,
) -> Result<Value, ExprError> {
    let [s, t] = exact::<2>(name, args)?;
    Ok(Value::Boolean(test(&s.to_string(), &t.to_string())))
}

fn number_fn(name: &str, args: Vec<Value>, f: impl Fn(f64) -> f64) -> Result<Value, ExprError> {
    let [value] = exact::<1>(name, args)?;
    Ok(Value::Number(f(value.to_number())))
}

fn func_substring(mut args: Vec<Value>) -> Result<Value, ExprError> {
    arity("substring", &args, 2..=3)?;
    let length = if args.len() == 3 {
        Some(args.remove(2).to_number())
    } else {
        None
    };
    let start = args.remove(1).to_number();
    let s = args.remove(0).to_string();

    // XPath rounding rules for start and length
    let first = (start + 0.5).floor();
    let last = length.map(|l| first + (l + 0.5).floor()).unwrap_or(f64::INFINITY);

    let result = s
        .chars()
        .enumerate()
        .filter_map(|(i, c)| {
            let pos = (i + 1) as f64;
            (pos >= first && pos < last).then_some(c)
        })
        .collect();
    Ok(Value::String(result))
}

fn func_translate(args: Vec<Value>) -> Result<Value, ExprError> {
    let [source, from, to] = exact::<3>("translate", args)?;
    let from: Vec<char> = from.to_string().chars().collect();
    let to: Vec<char> = to.to_string().chars().collect();
    let result = source
        .to_string()
        .chars()
        .filter_map(|c| match from.iter().position(|&fc| fc == c) {
            Some(pos) => to.get(pos).copied(),
            None => Some(c),
        })
        .collect();
    Ok(Value::String(result))
}

fn func_count(args: Vec<Value>, ctx: &dyn Context) -> Result<Value, ExprError> {
    let [value] = exact::<1>("count", args)?;
    let n = match &value {
        Value::NodeSet(nodes) => nodes.len(),
        Value::Buffer(buffer) => ctx.buffer_size(buffer).ok_or_else(|| {
            ExprError::function("count", format!("no buffer '{}' in scope", buffer))
        })?,
        other => {
            return Err(ExprError::Type(format!(
                "count() needs a node-set, got a {}",
                other.type_name()
            )));
        }
    };
    Ok(Value::Number(n as f64))
}

fn is_empty(value: &Value, ctx: &dyn Context) -> bool {
    match value {
        Value::NodeSet(nodes) => nodes.is_empty(),
        Value::Buffer(buffer) => ctx.buffer_size(buffer).unwrap_or(0) == 0,
        _ => false,
    }
}

fn node_name(
    name: &str,
    args: Vec<Value>,
    ctx: &dyn Context,
    get: impl Fn(&Rc<Node>) -> String,
) -> Result<Value, ExprError> {
    let value = optional_arg(name, args, ctx)?;
    match value {
        Value::NodeSet(nodes) => Ok(Value::String(nodes.first().map(get).unwrap_or_default())),
        other => Err(ExprError::Type(format!(
            "{}() needs a node-set, got a {}",
            name,
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use crate::error::ExprError;
    use crate::eval::tests::{ChainContext, eval};

    fn string(text: &str) -> String {
        eval(text, &ChainContext::sample()).unwrap().to_string()
    }

    #[test]
    fn test_string_functions() {
        assert_eq!(string("concat('a', 1, true())"), "a1true");
        assert_eq!(string("substring('12345', 1.5, 2.6)"), "234");
        assert_eq!(string("substring-after('key=value', '=')"), "value");
        assert_eq!(string("normalize-space('  a   b ')"), "a b");
        assert_eq!(string("translate('bar', 'abc', 'ABC')"), "BAr");
        assert_eq!(string("upper-case(@type)"), "BOOK");
        assert_eq!(string("string-join(@*, ',')"), "7,book");
    }

    #[test]
    fn test_node_functions_default_to_context() {
        assert_eq!(string("name()"), "item");
        assert_eq!(string("position()"), "3");
        assert_eq!(string("local-name(@*)"), "id");
        assert_eq!(string("string-length()"), "0");
    }

    #[test]
    fn test_numeric_functions() {
        assert_eq!(string("round(2.5)"), "3");
        assert_eq!(string("round(-2.5)"), "-2");
        assert_eq!(string("floor(-1.5)"), "-2");
        assert_eq!(string("sum(@id)"), "7");
    }

    #[test]
    fn test_arity_and_unknown_functions() {
        let ctx = ChainContext::sample();
        assert!(matches!(
            eval("contains('a')", &ctx),
            Err(ExprError::Function { .. })
        ));
        assert_eq!(
            eval("nope()", &ctx).unwrap_err(),
            ExprError::UnknownFunction("nope".into())
        );
        assert!(matches!(eval("count('a')", &ctx), Err(ExprError::Type(_))));
    }
}
