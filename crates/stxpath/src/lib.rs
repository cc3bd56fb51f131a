//! STXPath: the expression language of STX sheets.
//!
//! Expressions are parsed with `nom` into an [`Expression`] tree, resolved against
//! the namespace bindings in scope and lowered into postfix code ([`Expr`]). The
//! evaluator runs that code on a typed [`ValueStack`]; the only view of the input
//! it gets is the ancestor chain exposed through [`Context`].

pub mod ast;
pub mod compile;
pub mod error;
pub mod eval;
pub mod functions;
mod operators;
pub mod parser;
pub mod value;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step};
pub use compile::{Expr, Namespaces, NodeFilter};
pub use error::ExprError;
pub use eval::{Context, FocusContext, ValueStack, evaluate};
pub use parser::parse_expression;
pub use value::{Node, Value, format_number};
