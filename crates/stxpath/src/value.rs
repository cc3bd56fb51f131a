//! Values produced by expression evaluation and the node snapshots they refer to.

use std::fmt;
use std::rc::Rc;
use strix_types::{Attribute, NodeKind, QName};

/// A snapshot of one node as seen by a stream processor.
///
/// Only the node itself and its attributes are known: an element's children are
/// still to come when it is matched. `depth` is the node's index on the ancestor
/// chain (the document node has depth 0); attribute nodes share the depth of
/// their owner element.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub name: Option<QName>,
    pub value: String,
    pub attributes: Vec<Attribute>,
    pub depth: usize,
    /// 1-based position among preceding siblings of the same kind and name.
    pub position: usize,
}

impl Node {
    pub fn document() -> Self {
        Self {
            kind: NodeKind::Document,
            name: None,
            value: String::new(),
            attributes: Vec::new(),
            depth: 0,
            position: 1,
        }
    }

    pub fn element(name: QName, attributes: Vec<Attribute>, depth: usize, position: usize) -> Self {
        Self {
            kind: NodeKind::Element,
            name: Some(name),
            value: String::new(),
            attributes,
            depth,
            position,
        }
    }

    pub fn text(value: impl Into<String>, depth: usize, position: usize) -> Self {
        Self::leaf(NodeKind::Text, None, value.into(), depth, position)
    }

    pub fn comment(value: impl Into<String>, depth: usize, position: usize) -> Self {
        Self::leaf(NodeKind::Comment, None, value.into(), depth, position)
    }

    pub fn processing_instruction(target: &str, data: &str, depth: usize, position: usize) -> Self {
        Self::leaf(
            NodeKind::ProcessingInstruction,
            Some(QName::new(target)),
            data.to_string(),
            depth,
            position,
        )
    }

    pub fn attribute(attribute: &Attribute, depth: usize, position: usize) -> Self {
        Self::leaf(
            NodeKind::Attribute,
            Some(attribute.name.clone()),
            attribute.value.clone(),
            depth,
            position,
        )
    }

    fn leaf(
        kind: NodeKind,
        name: Option<QName>,
        value: String,
        depth: usize,
        position: usize,
    ) -> Self {
        Self {
            kind,
            name,
            value,
            attributes: Vec::new(),
            depth,
            position,
        }
    }

    /// The attribute nodes of an element, in document order.
    pub fn attribute_nodes(&self) -> Vec<Rc<Node>> {
        self.attributes
            .iter()
            .enumerate()
            .map(|(i, a)| Rc::new(Node::attribute(a, self.depth, i + 1)))
            .collect()
    }

    pub fn attribute_value(&self, name: &QName) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| &a.name == name)
            .map(|a| a.value.as_str())
    }

    /// The string value: character content for leaves, empty for elements and the
    /// document, whose content has not been seen yet.
    pub fn string_value(&self) -> &str {
        match self.kind {
            NodeKind::Document | NodeKind::Element => "",
            _ => &self.value,
        }
    }

    /// Short human readable description used in diagnostics.
    pub fn describe(&self) -> String {
        match self.kind {
            NodeKind::Document => "document node".to_string(),
            NodeKind::Element => format!(
                "element '{}'",
                self.name.as_ref().map(|n| n.qualified()).unwrap_or_default()
            ),
            NodeKind::Attribute => format!(
                "attribute '{}'",
                self.name.as_ref().map(|n| n.qualified()).unwrap_or_default()
            ),
            NodeKind::Text => "text node".to_string(),
            NodeKind::Comment => "comment".to_string(),
            NodeKind::ProcessingInstruction => "processing instruction".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Number(f64),
    Boolean(bool),
    NodeSet(Vec<Rc<Node>>),
    /// A reference to a named buffer; resolved by the evaluation context.
    Buffer(String),
}

impl Value {
    pub fn empty() -> Self {
        Value::NodeSet(Vec::new())
    }

    pub fn to_bool(&self) -> bool {
        match self {
            Value::NodeSet(nodes) => !nodes.is_empty(),
            Value::String(s) => !s.is_empty(),
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Boolean(b) => *b,
            Value::Buffer(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::String(s) => parse_number(s),
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::NodeSet(nodes) => nodes
                .first()
                .map(|n| parse_number(n.string_value()))
                .unwrap_or(f64::NAN),
            Value::Buffer(_) => f64::NAN,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Boolean(_) => "boolean",
            Value::NodeSet(_) => "node-set",
            Value::Buffer(_) => "buffer",
        }
    }

    /// Items iterated by `stx:for-each-item`: the nodes of a node-set, or the value itself.
    pub fn items(&self) -> Vec<Value> {
        match self {
            Value::NodeSet(nodes) => nodes
                .iter()
                .map(|n| Value::NodeSet(vec![n.clone()]))
                .collect(),
            other => vec![other.clone()],
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::NodeSet(nodes) => {
                f.write_str(nodes.first().map(|n| n.string_value()).unwrap_or(""))
            }
            Value::String(s) => f.write_str(s),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Buffer(_) => Ok(()),
        }
    }
}

pub(crate) fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return f64::NAN;
    }
    // Rust accepts "inf" and "NaN"; XPath number syntax does not.
    if trimmed.chars().any(|c| c.is_alphabetic()) {
        return f64::NAN;
    }
    trimmed.parse().unwrap_or(f64::NAN)
}

/// Formats a number the way XPath converts numbers to strings.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_to_number_coercion() {
        assert_eq!(Value::from(" 42 ").to_number(), 42.0);
        assert!(Value::from("").to_number().is_nan());
        assert!(Value::from("inf").to_number().is_nan());
        assert!(Value::from("abc").to_number().is_nan());
    }

    #[test]
    fn test_element_string_value_is_empty() {
        let node = Node::element(QName::new("a"), vec![], 1, 1);
        assert_eq!(node.string_value(), "");
        assert_eq!(Node::text("hi", 2, 1).string_value(), "hi");
    }

    #[test]
    fn test_attribute_nodes_share_owner_depth() {
        let node = Node::element(
            QName::new("a"),
            vec![
                Attribute::new(QName::new("x"), "1"),
                Attribute::new(QName::new("y"), "2"),
            ],
            3,
            1,
        );
        let attrs = node.attribute_nodes();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].depth, 3);
        assert_eq!(attrs[1].position, 2);
        assert_eq!(attrs[1].string_value(), "2");
    }
}
