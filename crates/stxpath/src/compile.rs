//! Lowers an [`Expression`] tree into postfix code for the value stack evaluator.

use crate::ast::{Axis, BinaryOperator, Expression, NodeTest, NodeTypeTest, UnaryOperator};
use crate::error::ExprError;
use crate::parser::parse_expression;
use crate::value::Node;
use std::collections::HashMap;
use strix_types::{NodeKind, QName};

/// Prefix to namespace URI bindings in scope where an expression appears.
pub type Namespaces = HashMap<String, String>;

const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

pub(crate) fn resolve_prefix(prefix: &str, namespaces: &Namespaces) -> Result<String, ExprError> {
    if prefix == "xml" {
        return Ok(XML_NAMESPACE.to_string());
    }
    namespaces
        .get(prefix)
        .cloned()
        .ok_or_else(|| ExprError::UnknownPrefix(prefix.to_string()))
}

/// Resolves a lexical QName. Unprefixed names are in no namespace.
pub fn resolve_qname(lexical: &str, namespaces: &Namespaces) -> Result<QName, ExprError> {
    match lexical.split_once(':') {
        Some((prefix, local)) => Ok(QName::with_namespace(
            Some(prefix.to_string()),
            local,
            Some(resolve_prefix(prefix, namespaces)?),
        )),
        None => Ok(QName::new(lexical)),
    }
}

/// A node test with its names resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeFilter {
    AnyNode,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
    AnyName,
    Namespace(Option<String>),
    Name(QName),
}

impl NodeFilter {
    pub fn resolve(test: &NodeTest, namespaces: &Namespaces) -> Result<Self, ExprError> {
        Ok(match test {
            NodeTest::Wildcard => NodeFilter::AnyName,
            NodeTest::NamespaceWildcard(prefix) => {
                NodeFilter::Namespace(Some(resolve_prefix(prefix, namespaces)?))
            }
            NodeTest::Name(name) => NodeFilter::Name(resolve_qname(name, namespaces)?),
            NodeTest::NodeType(NodeTypeTest::Node) => NodeFilter::AnyNode,
            NodeTest::NodeType(NodeTypeTest::Text) => NodeFilter::Text,
            NodeTest::NodeType(NodeTypeTest::Comment) => NodeFilter::Comment,
            NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(target)) => {
                NodeFilter::ProcessingInstruction(target.clone())
            }
        })
    }

    /// Whether `node` passes the test. Name tests only select nodes of the
    /// axis' principal kind (elements, or attributes on the attribute axis).
    pub fn accepts(&self, node: &Node, principal: NodeKind) -> bool {
        match self {
            NodeFilter::AnyNode => true,
            NodeFilter::Text => node.kind == NodeKind::Text,
            NodeFilter::Comment => node.kind == NodeKind::Comment,
            NodeFilter::ProcessingInstruction(target) => {
                node.kind == NodeKind::ProcessingInstruction
                    && target.as_ref().is_none_or(|t| {
                        node.name.as_ref().is_some_and(|n| &n.local_name == t)
                    })
            }
            NodeFilter::AnyName => node.kind == principal,
            NodeFilter::Namespace(uri) => {
                node.kind == principal
                    && node.name.as_ref().is_some_and(|n| n.namespace_uri == *uri)
            }
            NodeFilter::Name(name) => node.kind == principal && node.name.as_ref() == Some(name),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Op {
    Literal(String),
    Number(f64),
    Variable(String),
    Call { name: String, argc: usize },
    Binary(BinaryOperator),
    Negate,
    /// `and`: a false top of stack becomes the result and control jumps to the target.
    AndThen(usize),
    /// `or`: a true top of stack becomes the result and control jumps to the target.
    OrElse(usize),
    ToBoolean,
    Path(Box<PathCode>),
}

#[derive(Debug, Clone)]
pub(crate) struct PathCode {
    pub origin: PathOrigin,
    pub steps: Vec<StepCode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PathOrigin {
    ContextNode,
    Root,
    /// The start expression's node-set, already on the stack.
    Stack,
}

#[derive(Debug, Clone)]
pub(crate) struct StepCode {
    pub axis: Axis,
    pub filter: NodeFilter,
    pub predicates: Vec<Vec<Op>>,
}

/// A compiled expression, ready to be evaluated any number of times.
#[derive(Debug, Clone)]
pub struct Expr {
    text: String,
    pub(crate) code: Vec<Op>,
    variables: Vec<String>,
    functions: Vec<String>,
}

impl Expr {
    pub fn parse(text: &str, namespaces: &Namespaces) -> Result<Self, ExprError> {
        let ast = parse_expression(text)?;
        Self::from_ast(&ast, text, namespaces)
    }

    pub fn from_ast(
        ast: &Expression,
        text: &str,
        namespaces: &Namespaces,
    ) -> Result<Self, ExprError> {
        let mut code = Vec::new();
        emit(ast, namespaces, &mut code)?;

        let mut variables = Vec::new();
        let mut functions = Vec::new();
        ast.walk(&mut |e| match e {
            Expression::Variable(name) if !variables.contains(name) => variables.push(name.clone()),
            Expression::FunctionCall { name, .. } if !functions.contains(name) => {
                functions.push(name.clone())
            }
            _ => {}
        });

        Ok(Self {
            text: text.to_string(),
            code,
            variables,
            functions,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Names of all variables the expression refers to.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Names of all functions the expression calls.
    pub fn functions(&self) -> &[String] {
        &self.functions
    }
}

fn emit(expr: &Expression, ns: &Namespaces, code: &mut Vec<Op>) -> Result<(), ExprError> {
    match expr {
        Expression::Literal(s) => code.push(Op::Literal(s.clone())),
        Expression::Number(n) => code.push(Op::Number(*n)),
        Expression::Variable(name) => code.push(Op::Variable(name.clone())),
        Expression::FunctionCall { name, args } => {
            for arg in args {
                emit(arg, ns, code)?;
            }
            code.push(Op::Call {
                name: name.clone(),
                argc: args.len(),
            });
        }
        Expression::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => {
            emit(expr, ns, code)?;
            code.push(Op::Negate);
        }
        Expression::BinaryOp { left, op, right } => match op {
            BinaryOperator::And | BinaryOperator::Or => {
                emit(left, ns, code)?;
                let jump = code.len();
                code.push(Op::ToBoolean);
                emit(right, ns, code)?;
                code.push(Op::ToBoolean);
                let target = code.len();
                code[jump] = if *op == BinaryOperator::And {
                    Op::AndThen(target)
                } else {
                    Op::OrElse(target)
                };
            }
            _ => {
                emit(left, ns, code)?;
                emit(right, ns, code)?;
                code.push(Op::Binary(*op));
            }
        },
        Expression::LocationPath(path) => {
            let origin = match &path.start_point {
                Some(start) => {
                    emit(start, ns, code)?;
                    PathOrigin::Stack
                }
                None if path.is_absolute => PathOrigin::Root,
                None => PathOrigin::ContextNode,
            };
            let steps = path
                .steps
                .iter()
                .map(|step| {
                    let predicates = step
                        .predicates
                        .iter()
                        .map(|p| {
                            let mut sub = Vec::new();
                            emit(p, ns, &mut sub)?;
                            Ok(sub)
                        })
                        .collect::<Result<Vec<_>, ExprError>>()?;
                    Ok(StepCode {
                        axis: step.axis,
                        filter: NodeFilter::resolve(&step.node_test, ns)?,
                        predicates,
                    })
                })
                .collect::<Result<Vec<_>, ExprError>>()?;
            code.push(Op::Path(Box::new(PathCode { origin, steps })));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_variables_and_functions() {
        let expr = Expr::parse("concat($a, string($b), $a)", &Namespaces::new()).unwrap();
        assert_eq!(expr.variables(), &["a".to_string(), "b".to_string()]);
        assert_eq!(expr.functions(), &["concat".to_string(), "string".to_string()]);
        assert_eq!(expr.text(), "concat($a, string($b), $a)");
    }

    #[test]
    fn test_unknown_prefix_is_rejected() {
        let err = Expr::parse("h:p", &Namespaces::new()).unwrap_err();
        assert_eq!(err, ExprError::UnknownPrefix("h".into()));
    }

    #[test]
    fn test_prefixed_name_resolves_to_namespace() {
        let mut ns = Namespaces::new();
        ns.insert("h".into(), "urn:h".into());
        let filter = NodeFilter::resolve(&NodeTest::Name("h:p".into()), &ns).unwrap();
        let node = Node::element(
            QName::with_namespace(Some("x".into()), "p", Some("urn:h".into())),
            vec![],
            1,
            1,
        );
        assert!(filter.accepts(&node, NodeKind::Element));
        assert!(!filter.accepts(&node, NodeKind::Attribute));
    }
}
