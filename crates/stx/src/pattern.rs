//! Match patterns for `stx:template`, `stx:copy` and `stx:process-siblings`.
//!
//! A pattern is tested against a node together with its ancestor chain, which is
//! all a stream processor knows when the node arrives. Steps are matched from the
//! last one upwards, each consuming one ancestor (or any number of them after `//`).

use crate::error::StxError;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::multispace0;
use nom::combinator::{consumed, map, opt, value};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, pair};
use nom::{IResult, Parser};
use std::fmt;
use std::rc::Rc;
use strix_stxpath::parser as stxpath_parser;
use strix_stxpath::{Expr, ExprError, Expression, Namespaces, Node, NodeFilter, NodeTest};
use strix_types::NodeKind;

/// Decides whether a predicate holds for a candidate node.
pub trait PredicateEvaluator {
    fn holds(
        &mut self,
        predicate: &Expr,
        node: &Rc<Node>,
        ancestors: &[Rc<Node>],
    ) -> Result<bool, StxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatternAxis {
    Child,
    Attribute,
}

#[derive(Debug, Clone)]
struct PatternStep {
    axis: PatternAxis,
    filter: NodeFilter,
    predicates: Vec<Expr>,
    /// The step was preceded by `//`: any number of ancestors may be skipped.
    gap: bool,
}

#[derive(Debug, Clone)]
struct PathPattern {
    absolute: bool,
    steps: Vec<PatternStep>,
    text: String,
}

/// How specific a single-path pattern is. Drives the default priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specificity {
    /// `name`, `@name`, `processing-instruction('t')`
    Name,
    /// `prefix:*`
    NamespaceWildcard,
    /// `*`, `node()`, `text()` and the other kind tests
    KindTest,
    /// Anything with more than one step, a predicate or a leading `/`.
    Qualified,
}

impl Specificity {
    pub fn default_priority(self) -> f64 {
        match self {
            Specificity::Name => 0.0,
            Specificity::NamespaceWildcard => -0.25,
            Specificity::KindTest => -0.5,
            Specificity::Qualified => 0.5,
        }
    }
}

/// A compiled match pattern. Union patterns hold one path per alternative.
#[derive(Debug, Clone)]
pub struct Pattern {
    paths: Vec<PathPattern>,
    original_text: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original_text)
    }
}

impl Pattern {
    pub fn parse(text: &str, namespaces: &Namespaces) -> Result<Self, StxError> {
        let raw = match pattern_parser(text.trim()) {
            Ok(("", paths)) => paths,
            Ok((rem, _)) => {
                return Err(StxError::expr(
                    text,
                    ExprError::Parse(text.to_string(), format!("unexpected input at '{}'", rem)),
                ));
            }
            Err(e) => {
                return Err(StxError::expr(
                    text,
                    ExprError::Parse(text.to_string(), e.to_string()),
                ));
            }
        };

        let paths = raw
            .into_iter()
            .map(|path| path.resolve(namespaces))
            .collect::<Result<Vec<_>, ExprError>>()
            .map_err(|e| StxError::expr(text, e))?;

        Ok(Pattern {
            paths,
            original_text: text.trim().to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.original_text
    }

    /// Splits a union pattern into one pattern per alternative.
    pub fn alternatives(&self) -> Vec<Pattern> {
        self.paths
            .iter()
            .map(|path| Pattern {
                original_text: path.text.clone(),
                paths: vec![path.clone()],
            })
            .collect()
    }

    /// The least specific alternative decides.
    pub fn specificity(&self) -> Specificity {
        self.paths
            .iter()
            .map(PathPattern::specificity)
            .min_by(|a, b| a.default_priority().total_cmp(&b.default_priority()))
            .unwrap_or(Specificity::Qualified)
    }

    pub fn default_priority(&self) -> f64 {
        self.specificity().default_priority()
    }

    /// Tests `node`, whose ancestors (document node first) are `ancestors`.
    pub fn matches(
        &self,
        node: &Rc<Node>,
        ancestors: &[Rc<Node>],
        eval: &mut dyn PredicateEvaluator,
    ) -> Result<bool, StxError> {
        for path in &self.paths {
            if path.matches(node, ancestors, eval)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl PathPattern {
    fn specificity(&self) -> Specificity {
        let [step] = self.steps.as_slice() else {
            return Specificity::Qualified;
        };
        if self.absolute || step.gap || !step.predicates.is_empty() {
            return Specificity::Qualified;
        }
        match &step.filter {
            NodeFilter::Name(_) | NodeFilter::ProcessingInstruction(Some(_)) => Specificity::Name,
            NodeFilter::Namespace(_) => Specificity::NamespaceWildcard,
            _ => Specificity::KindTest,
        }
    }

    fn matches(
        &self,
        node: &Rc<Node>,
        ancestors: &[Rc<Node>],
        eval: &mut dyn PredicateEvaluator,
    ) -> Result<bool, StxError> {
        if self.steps.is_empty() {
            // "/"
            return Ok(self.absolute && node.kind == NodeKind::Document);
        }
        self.match_step(self.steps.len() - 1, node, ancestors, eval)
    }

    fn match_step(
        &self,
        index: usize,
        node: &Rc<Node>,
        ancestors: &[Rc<Node>],
        eval: &mut dyn PredicateEvaluator,
    ) -> Result<bool, StxError> {
        let step = &self.steps[index];
        if !step.accepts(node, ancestors, eval)? {
            return Ok(false);
        }

        if index == 0 {
            let rooted = !self.absolute
                || step.gap
                || (ancestors.len() == 1 && ancestors[0].kind == NodeKind::Document);
            return Ok(rooted);
        }

        if step.gap {
            for depth in (0..ancestors.len()).rev() {
                if self.match_step(index - 1, &ancestors[depth], &ancestors[..depth], eval)? {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        match ancestors.split_last() {
            Some((parent, rest)) => self.match_step(index - 1, parent, rest, eval),
            None => Ok(false),
        }
    }
}

impl PatternStep {
    fn accepts(
        &self,
        node: &Rc<Node>,
        ancestors: &[Rc<Node>],
        eval: &mut dyn PredicateEvaluator,
    ) -> Result<bool, StxError> {
        let principal = match self.axis {
            PatternAxis::Attribute => {
                if node.kind != NodeKind::Attribute {
                    return Ok(false);
                }
                NodeKind::Attribute
            }
            PatternAxis::Child => {
                if matches!(node.kind, NodeKind::Attribute | NodeKind::Document) {
                    return Ok(false);
                }
                NodeKind::Element
            }
        };
        if !self.filter.accepts(node, principal) {
            return Ok(false);
        }
        for predicate in &self.predicates {
            if !eval.holds(predicate, node, ancestors)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// --- Parser ---

struct RawStep {
    axis: PatternAxis,
    test: NodeTest,
    predicates: Vec<(String, Expression)>,
    gap: bool,
}

struct RawPath {
    absolute: bool,
    steps: Vec<RawStep>,
    text: String,
}

impl RawPath {
    fn resolve(self, namespaces: &Namespaces) -> Result<PathPattern, ExprError> {
        let steps = self
            .steps
            .into_iter()
            .map(|step| {
                let predicates = step
                    .predicates
                    .iter()
                    .map(|(text, ast)| Expr::from_ast(ast, text, namespaces))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PatternStep {
                    axis: step.axis,
                    filter: NodeFilter::resolve(&step.test, namespaces)?,
                    predicates,
                    gap: step.gap,
                })
            })
            .collect::<Result<Vec<_>, ExprError>>()?;
        Ok(PathPattern {
            absolute: self.absolute,
            steps,
            text: self.text,
        })
    }
}

fn predicate_text(consumed: &str) -> String {
    let trimmed = consumed.trim();
    let inner = trimmed.strip_prefix('[').unwrap_or(trimmed);
    inner.strip_suffix(']').unwrap_or(inner).trim().to_string()
}

fn step_parser(input: &str) -> IResult<&str, RawStep> {
    let (input, axis) = opt(alt((
        value(PatternAxis::Attribute, alt((tag("@"), tag("attribute::")))),
        value(PatternAxis::Child, tag("child::")),
    )))
    .parse(input)?;
    let (input, test) = stxpath_parser::node_test(input)?;
    let (input, predicates) = many0(map(consumed(stxpath_parser::predicate), |(text, ast)| {
        (predicate_text(text), ast)
    }))
    .parse(input)?;

    Ok((
        input,
        RawStep {
            axis: axis.unwrap_or(PatternAxis::Child),
            test,
            predicates,
            gap: false,
        },
    ))
}

fn separator(input: &str) -> IResult<&str, bool> {
    alt((value(true, tag("//")), value(false, tag("/")))).parse(input)
}

fn relative_steps(input: &str) -> IResult<&str, Vec<RawStep>> {
    let (input, first) = step_parser(input)?;
    let (input, rest) = many0(pair(separator, step_parser)).parse(input)?;
    let mut steps = vec![first];
    steps.extend(rest.into_iter().map(|(gap, mut step)| {
        step.gap = gap;
        step
    }));
    Ok((input, steps))
}

fn path_parser(input: &str) -> IResult<&str, RawPath> {
    let (rest, (text, (lead, steps))) =
        consumed(pair(opt(separator), opt(relative_steps))).parse(input)?;

    let mut steps = match (lead, steps) {
        (_, Some(steps)) => steps,
        // A bare "/" is the document node pattern; "//" alone is not a pattern.
        (Some(false), None) => Vec::new(),
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                input,
                nom::error::ErrorKind::Verify,
            )));
        }
    };
    if lead == Some(true) {
        if let Some(first) = steps.first_mut() {
            first.gap = true;
        }
    }

    Ok((
        rest,
        RawPath {
            absolute: lead.is_some(),
            steps,
            text: text.trim().to_string(),
        },
    ))
}

fn pattern_parser(input: &str) -> IResult<&str, Vec<RawPath>> {
    separated_list1(delimited(multispace0, tag("|"), multispace0), path_parser).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_stxpath::{Context, Value, ValueStack, evaluate};
    use strix_types::{Attribute, QName};

    /// Evaluates predicates against the chain the pattern walks.
    struct ChainEval;

    struct PatternContext<'a> {
        node: &'a Rc<Node>,
        ancestors: &'a [Rc<Node>],
    }

    impl Context for PatternContext<'_> {
        fn node(&self) -> &Rc<Node> {
            self.node
        }
        fn node_at(&self, depth: usize) -> Option<Rc<Node>> {
            if depth == self.node.depth && self.node.kind != NodeKind::Attribute {
                Some(self.node.clone())
            } else {
                self.ancestors.get(depth).cloned()
            }
        }
        fn variable(&self, _name: &str) -> Option<Value> {
            None
        }
    }

    impl PredicateEvaluator for ChainEval {
        fn holds(
            &mut self,
            predicate: &Expr,
            node: &Rc<Node>,
            ancestors: &[Rc<Node>],
        ) -> Result<bool, StxError> {
            let ctx = PatternContext { node, ancestors };
            let value = evaluate(predicate, &ctx, &mut ValueStack::new())
                .map_err(|e| StxError::expr(predicate.text(), e))?;
            Ok(match value {
                Value::Number(n) => n == node.position as f64,
                other => other.to_bool(),
            })
        }
    }

    fn chain() -> Vec<Rc<Node>> {
        vec![
            Rc::new(Node::document()),
            Rc::new(Node::element(QName::new("doc"), vec![], 1, 1)),
            Rc::new(Node::element(
                QName::new("section"),
                vec![Attribute::new(QName::new("id"), "s1")],
                2,
                2,
            )),
        ]
    }

    fn element(name: &str, depth: usize, position: usize) -> Rc<Node> {
        Rc::new(Node::element(QName::new(name), vec![], depth, position))
    }

    fn matches(pattern: &str, node: &Rc<Node>, ancestors: &[Rc<Node>]) -> bool {
        Pattern::parse(pattern, &Namespaces::new())
            .unwrap()
            .matches(node, ancestors, &mut ChainEval)
            .unwrap()
    }

    #[test]
    fn test_pattern_parsing() {
        let ns = Namespaces::new();
        for text in [
            "foo", "foo/bar", "/", "/*", "//para", "a//b", "foo|bar", "text()", "@id", "foo/*/@id",
            "p[2]", "node()",
        ] {
            assert!(Pattern::parse(text, &ns).is_ok(), "{}", text);
        }
        assert!(Pattern::parse("//", &ns).is_err());
        assert!(Pattern::parse("a/", &ns).is_err());
        assert!(Pattern::parse("undeclared:x", &ns).is_err());
    }

    #[test]
    fn test_step_matching_walks_ancestors() {
        let ancestors = chain();
        let para = element("para", 3, 1);
        assert!(matches("para", &para, &ancestors));
        assert!(matches("section/para", &para, &ancestors));
        assert!(matches("/doc/section/para", &para, &ancestors));
        assert!(matches("doc//para", &para, &ancestors));
        assert!(matches("//para", &para, &ancestors));
        assert!(!matches("/section/para", &para, &ancestors));
        assert!(!matches("doc/para", &para, &ancestors));
    }

    #[test]
    fn test_document_and_kind_patterns() {
        let doc = Rc::new(Node::document());
        assert!(matches("/", &doc, &[]));
        assert!(!matches("node()", &doc, &[]));

        let ancestors = chain();
        let text = Rc::new(Node::text("hi", 3, 1));
        assert!(matches("text()", &text, &ancestors));
        assert!(matches("section/text()", &text, &ancestors));
        assert!(!matches("*", &text, &ancestors));
        assert!(matches("node()", &text, &ancestors));
    }

    #[test]
    fn test_attribute_patterns() {
        let ancestors = chain();
        let id = ancestors[2].attribute_nodes().remove(0);
        assert!(matches("@id", &id, &ancestors));
        assert!(matches("section/@*", &id, &ancestors));
        assert!(!matches("id", &id, &ancestors));
        assert!(!matches("@id", &ancestors[2], &ancestors[..2]));
    }

    #[test]
    fn test_predicates_see_position_and_attributes() {
        let ancestors = chain();
        let para = element("para", 3, 2);
        assert!(matches("para[2]", &para, &ancestors));
        assert!(!matches("para[1]", &para, &ancestors));
        assert!(matches("section[@id='s1']/para", &para, &ancestors));
        assert!(!matches("section[@id='s2']/para", &para, &ancestors));
    }

    #[test]
    fn test_default_priorities() {
        let ns: Namespaces = [("p".to_string(), "urn:p".to_string())].into_iter().collect();
        let priority = |text: &str| Pattern::parse(text, &ns).unwrap().default_priority();
        assert_eq!(priority("para"), 0.0);
        assert_eq!(priority("@id"), 0.0);
        assert_eq!(priority("p:*"), -0.25);
        assert_eq!(priority("*"), -0.5);
        assert_eq!(priority("text()"), -0.5);
        assert_eq!(priority("a/b"), 0.5);
        assert_eq!(priority("para[1]"), 0.5);
        assert_eq!(priority("/"), 0.5);
    }

    #[test]
    fn test_union_alternatives_keep_their_text() {
        let pattern = Pattern::parse("a | b/c", &Namespaces::new()).unwrap();
        let alternatives = pattern.alternatives();
        assert_eq!(alternatives.len(), 2);
        assert_eq!(alternatives[0].text(), "a");
        assert_eq!(alternatives[1].text(), "b/c");
        assert_eq!(alternatives[1].default_priority(), 0.5);
    }
}
