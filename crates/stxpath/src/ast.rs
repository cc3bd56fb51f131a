//! Abstract syntax tree for STXPath expressions.
//!
//! Names are kept in their lexical `prefix:local` form here; they are resolved
//! against namespace bindings when the tree is compiled.

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    LocationPath(LocationPath),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
}

impl Expression {
    /// Visits this expression and every sub-expression, predicates included.
    pub fn walk(&self, visit: &mut dyn FnMut(&Expression)) {
        visit(self);
        match self {
            Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => {}
            Expression::FunctionCall { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            Expression::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expression::UnaryOp { expr, .. } => expr.walk(visit),
            Expression::LocationPath(path) => {
                if let Some(start) = &path.start_point {
                    start.walk(visit);
                }
                for step in &path.steps {
                    step.predicates.iter().for_each(|p| p.walk(visit));
                }
            }
        }
    }

    pub fn is_location_path(&self) -> bool {
        matches!(self, Expression::LocationPath(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Union,
}

/// A location path such as `../@id`, `/doc/item` or `$nodes/@name`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// Starting expression for paths like `$var/@id`.
    pub start_point: Option<Box<Expression>>,
    /// True if the path starts from the document node. Meaningless with a start point.
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

/// Axes navigable in a stream: everything that points at the ancestor chain or
/// at attributes. Sibling and following axes do not exist in STXPath.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A qualified name test (`item`, `h:p`).
    Name(String),
    /// `*`
    Wildcard,
    /// `prefix:*`
    NamespaceWildcard(String),
    NodeType(NodeTypeTest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTypeTest {
    Text,
    Node,
    Comment,
    ProcessingInstruction(Option<String>),
}
