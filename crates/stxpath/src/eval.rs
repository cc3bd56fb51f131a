//! The value stack evaluator.

use crate::ast::Axis;
use crate::compile::{Expr, Op, PathCode, PathOrigin, StepCode};
use crate::error::ExprError;
use crate::value::{Node, Value};
use crate::{functions, operators};
use std::rc::Rc;
use strix_types::NodeKind;

/// What an expression can see while it runs.
///
/// A stream processor only knows the current node and its ancestors, so the
/// context exposes the ancestor chain by depth instead of a navigable tree.
pub trait Context {
    /// The context node.
    fn node(&self) -> &Rc<Node>;

    /// The node at `depth` on the current ancestor chain (0 is the document node).
    fn node_at(&self, depth: usize) -> Option<Rc<Node>>;

    fn position(&self) -> usize {
        self.node().position
    }

    fn variable(&self, name: &str) -> Option<Value>;

    /// Hook for functions the host adds on top of the built-in library.
    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, ExprError>> {
        let _ = (name, args);
        None
    }

    /// Number of top-level nodes in a named buffer, `None` if no such buffer is in scope.
    fn buffer_size(&self, name: &str) -> Option<usize> {
        let _ = name;
        None
    }

    /// Strict contexts report type errors instead of coercing to NaN.
    fn strict(&self) -> bool {
        false
    }
}

/// A context that shifts the focus to another node and forwards everything else.
pub struct FocusContext<'a> {
    inner: &'a dyn Context,
    node: Rc<Node>,
}

impl<'a> FocusContext<'a> {
    pub fn new(inner: &'a dyn Context, node: Rc<Node>) -> Self {
        Self { inner, node }
    }
}

impl Context for FocusContext<'_> {
    fn node(&self) -> &Rc<Node> {
        &self.node
    }

    fn node_at(&self, depth: usize) -> Option<Rc<Node>> {
        self.inner.node_at(depth)
    }

    fn variable(&self, name: &str) -> Option<Value> {
        self.inner.variable(name)
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, ExprError>> {
        self.inner.call(name, args)
    }

    fn buffer_size(&self, name: &str) -> Option<usize> {
        self.inner.buffer_size(name)
    }

    fn strict(&self) -> bool {
        self.inner.strict()
    }
}

/// The operand stack shared by every evaluation of one execution.
#[derive(Debug, Default)]
pub struct ValueStack {
    values: Vec<Value>,
}

impl ValueStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    fn pop(&mut self) -> Result<Value, ExprError> {
        self.values
            .pop()
            .ok_or_else(|| ExprError::Type("value stack underflow".to_string()))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, ExprError> {
        if n > self.values.len() {
            return Err(ExprError::Type("value stack underflow".to_string()));
        }
        Ok(self.values.split_off(self.values.len() - n))
    }

    fn truncate(&mut self, len: usize) {
        self.values.truncate(len);
    }
}

/// Evaluates `expr` against `ctx`. The stack is left as it was found, also on error.
pub fn evaluate(
    expr: &Expr,
    ctx: &dyn Context,
    stack: &mut ValueStack,
) -> Result<Value, ExprError> {
    let base = stack.len();
    let result = run(&expr.code, ctx, stack);
    stack.truncate(base);
    result
}

fn run(code: &[Op], ctx: &dyn Context, stack: &mut ValueStack) -> Result<Value, ExprError> {
    let mut pc = 0;
    while pc < code.len() {
        match &code[pc] {
            Op::Literal(s) => stack.push(Value::String(s.clone())),
            Op::Number(n) => stack.push(Value::Number(*n)),
            Op::Variable(name) => {
                let value = ctx
                    .variable(name)
                    .ok_or_else(|| ExprError::UnknownVariable(name.clone()))?;
                stack.push(value);
            }
            Op::Call { name, argc } => {
                let args = stack.pop_n(*argc)?;
                stack.push(functions::call(name, args, ctx)?);
            }
            Op::Binary(op) => {
                let right = stack.pop()?;
                let left = stack.pop()?;
                stack.push(operators::binary(*op, left, right, ctx)?);
            }
            Op::Negate => {
                let value = stack.pop()?;
                stack.push(Value::Number(-operators::number(&value, ctx)?));
            }
            Op::AndThen(target) => {
                if !stack.pop()?.to_bool() {
                    stack.push(Value::Boolean(false));
                    pc = *target;
                    continue;
                }
            }
            Op::OrElse(target) => {
                if stack.pop()?.to_bool() {
                    stack.push(Value::Boolean(true));
                    pc = *target;
                    continue;
                }
            }
            Op::ToBoolean => {
                let value = stack.pop()?;
                stack.push(Value::Boolean(value.to_bool()));
            }
            Op::Path(path) => {
                let start = match path.origin {
                    PathOrigin::ContextNode => vec![ctx.node().clone()],
                    PathOrigin::Root => ctx.node_at(0).into_iter().collect(),
                    PathOrigin::Stack => match stack.pop()? {
                        Value::NodeSet(nodes) => nodes,
                        other => {
                            return Err(ExprError::Type(format!(
                                "a path cannot start from a {}",
                                other.type_name()
                            )));
                        }
                    },
                };
                let nodes = evaluate_path(path, start, ctx, stack)?;
                stack.push(Value::NodeSet(nodes));
            }
        }
        pc += 1;
    }
    stack.pop()
}

fn evaluate_path(
    path: &PathCode,
    start: Vec<Rc<Node>>,
    ctx: &dyn Context,
    stack: &mut ValueStack,
) -> Result<Vec<Rc<Node>>, ExprError> {
    let mut current = start;
    for step in &path.steps {
        let mut next: Vec<Rc<Node>> = Vec::new();
        for node in &current {
            for candidate in axis_nodes(step.axis, node, ctx) {
                if !step.filter.accepts(&candidate, principal_kind(step.axis)) {
                    continue;
                }
                if !predicates_hold(step, &candidate, ctx, stack)? {
                    continue;
                }
                if !next.iter().any(|n| Rc::ptr_eq(n, &candidate)) {
                    next.push(candidate);
                }
            }
        }
        current = next;
    }
    Ok(current)
}

fn predicates_hold(
    step: &StepCode,
    candidate: &Rc<Node>,
    ctx: &dyn Context,
    stack: &mut ValueStack,
) -> Result<bool, ExprError> {
    for predicate in &step.predicates {
        let focus = FocusContext::new(ctx, candidate.clone());
        let base = stack.len();
        let result = run(predicate, &focus, stack);
        stack.truncate(base);
        let holds = match result? {
            Value::Number(n) => n == candidate.position as f64,
            other => other.to_bool(),
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}

fn principal_kind(axis: Axis) -> NodeKind {
    if axis == Axis::Attribute {
        NodeKind::Attribute
    } else {
        NodeKind::Element
    }
}

fn on_chain(node: &Rc<Node>, ctx: &dyn Context) -> bool {
    ctx.node_at(node.depth)
        .is_some_and(|n| Rc::ptr_eq(&n, node))
}

fn parent_of(node: &Rc<Node>, ctx: &dyn Context) -> Option<Rc<Node>> {
    match node.kind {
        NodeKind::Attribute => ctx.node_at(node.depth),
        NodeKind::Document => None,
        _ => ctx.node_at(node.depth.checked_sub(1)?),
    }
}

fn axis_nodes(axis: Axis, node: &Rc<Node>, ctx: &dyn Context) -> Vec<Rc<Node>> {
    match axis {
        Axis::SelfAxis => vec![node.clone()],
        Axis::Attribute => {
            if node.kind == NodeKind::Element {
                node.attribute_nodes()
            } else {
                Vec::new()
            }
        }
        Axis::Parent => parent_of(node, ctx).into_iter().collect(),
        Axis::Ancestor | Axis::AncestorOrSelf => {
            let mut result = Vec::new();
            if axis == Axis::AncestorOrSelf {
                result.push(node.clone());
            }
            let mut cursor = parent_of(node, ctx);
            while let Some(ancestor) = cursor {
                cursor = parent_of(&ancestor, ctx);
                result.push(ancestor);
            }
            result
        }
        Axis::Child | Axis::Descendant | Axis::DescendantOrSelf => {
            let mut result = Vec::new();
            if axis == Axis::DescendantOrSelf {
                result.push(node.clone());
            }
            // Only the ancestor chain is known, so a node's visible children are
            // the next chain entries below it.
            if !matches!(node.kind, NodeKind::Element | NodeKind::Document)
                || !on_chain(node, ctx)
            {
                return result;
            }
            let mut depth = node.depth + 1;
            while let Some(child) = ctx.node_at(depth) {
                if child.kind == NodeKind::Attribute || child.depth != depth {
                    break;
                }
                result.push(child);
                if axis == Axis::Child {
                    break;
                }
                depth += 1;
            }
            result
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::compile::Namespaces;
    use std::collections::HashMap;
    use strix_types::{Attribute, QName};

    /// A chain `/doc/item[@id='7']` with the item as context node.
    pub(crate) struct ChainContext {
        pub chain: Vec<Rc<Node>>,
        pub current: Rc<Node>,
        pub variables: HashMap<String, Value>,
        pub strict: bool,
    }

    impl ChainContext {
        pub fn sample() -> Self {
            let doc = Rc::new(Node::document());
            let root = Rc::new(Node::element(QName::new("doc"), vec![], 1, 1));
            let item = Rc::new(Node::element(
                QName::new("item"),
                vec![
                    Attribute::new(QName::new("id"), "7"),
                    Attribute::new(QName::new("type"), "book"),
                ],
                2,
                3,
            ));
            Self {
                chain: vec![doc, root, item.clone()],
                current: item,
                variables: HashMap::new(),
                strict: false,
            }
        }
    }

    impl Context for ChainContext {
        fn node(&self) -> &Rc<Node> {
            &self.current
        }
        fn node_at(&self, depth: usize) -> Option<Rc<Node>> {
            self.chain.get(depth).cloned()
        }
        fn variable(&self, name: &str) -> Option<Value> {
            self.variables.get(name).cloned()
        }
        fn strict(&self) -> bool {
            self.strict
        }
    }

    pub(crate) fn eval(text: &str, ctx: &ChainContext) -> Result<Value, ExprError> {
        let expr = Expr::parse(text, &Namespaces::new())?;
        let mut stack = ValueStack::new();
        let value = evaluate(&expr, ctx, &mut stack);
        assert!(stack.is_empty());
        value
    }

    #[test]
    fn test_attribute_and_parent_paths() {
        let ctx = ChainContext::sample();
        assert_eq!(eval("string(@id)", &ctx).unwrap().to_string(), "7");
        assert_eq!(eval("name(..)", &ctx).unwrap().to_string(), "doc");
        assert_eq!(eval("count(ancestor::*)", &ctx).unwrap().to_number(), 1.0);
        assert_eq!(eval("count(/doc/item)", &ctx).unwrap().to_number(), 1.0);
        assert_eq!(eval("count(//item)", &ctx).unwrap().to_number(), 1.0);
    }

    #[test]
    fn test_predicates_use_node_position() {
        let ctx = ChainContext::sample();
        assert!(eval("self::item[3]", &ctx).unwrap().to_bool());
        assert!(!eval("self::item[2]", &ctx).unwrap().to_bool());
        assert!(eval("self::item[@type = 'book']", &ctx).unwrap().to_bool());
    }

    #[test]
    fn test_short_circuit_skips_unknown_variable() {
        let ctx = ChainContext::sample();
        assert!(!eval("false() and $missing", &ctx).unwrap().to_bool());
        assert!(eval("true() or $missing", &ctx).unwrap().to_bool());
        assert_eq!(
            eval("true() and $missing", &ctx).unwrap_err(),
            ExprError::UnknownVariable("missing".into())
        );
    }

    #[test]
    fn test_variables_and_arithmetic() {
        let mut ctx = ChainContext::sample();
        ctx.variables.insert("n".into(), Value::Number(4.0));
        assert_eq!(eval("$n * 2 + 1", &ctx).unwrap().to_number(), 9.0);
        assert_eq!(eval("-$n mod 3", &ctx).unwrap().to_number(), -1.0);
        assert_eq!(eval("@id + $n", &ctx).unwrap().to_number(), 11.0);
    }

    #[test]
    fn test_non_numeric_arithmetic_coerces_or_fails_when_strict() {
        let mut ctx = ChainContext::sample();
        assert!(eval("'abc' + 1", &ctx).unwrap().to_number().is_nan());
        ctx.strict = true;
        assert!(matches!(eval("'abc' + 1", &ctx), Err(ExprError::Type(_))));
    }
}
