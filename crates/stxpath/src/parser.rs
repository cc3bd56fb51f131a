//! A `nom`-based parser for STXPath expressions.

use super::ast::*;
use crate::error::ExprError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

pub fn parse_expression(input: &str) -> Result<Expression, ExprError> {
    match expression(input.trim()) {
        Ok(("", expr)) => Ok(expr),
        Ok((rem, _)) => Err(ExprError::Parse(
            input.to_string(),
            format!("unexpected input at '{}'", rem),
        )),
        Err(e) => Err(ExprError::Parse(input.to_string(), e.to_string())),
    }
}

// --- Combinators & Helpers ---

pub(crate) fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// An operator word such as `and` or `div` that is not the prefix of a longer name.
fn keyword<'a>(
    word: &'static str,
) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag(word), not(peek(satisfy(is_name_char))))
}

fn build_binary_expr_parser<'a, F, G>(
    sub_expr_parser: F,
    op_parser: G,
) -> impl FnMut(&'a str) -> IResult<&'a str, Expression>
where
    F: Parser<&'a str, Output = Expression, Error = nom::error::Error<&'a str>> + Clone,
    G: Parser<&'a str, Output = BinaryOperator, Error = nom::error::Error<&'a str>> + Clone,
{
    move |input: &str| {
        let (input, mut left) = sub_expr_parser.clone().parse(input)?;
        let (input, remainder) =
            many0(pair(ws(op_parser.clone()), sub_expr_parser.clone())).parse(input)?;

        for (op, right) in remainder {
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok((input, left))
    }
}

// --- Expression Parsers (in order of precedence) ---

fn expression(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::Or, keyword("or")).parse(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::And, keyword("and")).parse(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Equals, tag("=")),
        value(BinaryOperator::NotEquals, tag("!=")),
    ))
    .parse(input)
}

fn relational_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::LessThanOrEqual, tag("<=")),
        value(BinaryOperator::GreaterThanOrEqual, tag(">=")),
        value(BinaryOperator::LessThan, tag("<")),
        value(BinaryOperator::GreaterThan, tag(">")),
    ))
    .parse(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Plus, char('+')),
        value(BinaryOperator::Minus, char('-')),
    ))
    .parse(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Multiply, char('*')),
        value(BinaryOperator::Divide, keyword("div")),
        value(BinaryOperator::Modulo, keyword("mod")),
    ))
    .parse(input)
}

fn union_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::Union, char('|')).parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(and_expr, or_op)(input)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(equality_expr, and_op)(input)
}

fn equality_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(relational_expr, equality_op)(input)
}

fn relational_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(additive_expr, relational_op)(input)
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(multiplicative_expr, additive_op)(input)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(unary_expr, multiplicative_op)(input)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    let (i, neg_op) = opt(ws(char('-'))).parse(input)?;
    if neg_op.is_some() {
        let (i, expr) = unary_expr(i)?;
        return Ok((
            i,
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
            },
        ));
    }
    union_expr(i)
}

fn union_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(path_expr, union_op)(input)
}

/// Resolves the ambiguity between location paths and primary expressions that may
/// be followed by further steps (`$var/@id`).
fn path_expr(input: &str) -> IResult<&str, Expression> {
    // Primary expressions go first so `position()` is not read as a step named `position`.
    let (i, start_expr) =
        ws(alt((primary_expr, map(location_path, Expression::LocationPath)))).parse(input)?;

    let (i, remainder_steps) = many0(pair(alt((tag("//"), tag("/"))), step)).parse(i)?;

    if remainder_steps.is_empty() {
        return Ok((i, start_expr));
    }

    let (start_point, is_absolute, mut steps) = match start_expr {
        Expression::LocationPath(lp) => (lp.start_point, lp.is_absolute, lp.steps),
        other => (Some(Box::new(other)), false, vec![]),
    };
    append_steps(&mut steps, remainder_steps);

    Ok((
        i,
        Expression::LocationPath(LocationPath {
            start_point,
            is_absolute,
            steps,
        }),
    ))
}

fn append_steps(steps: &mut Vec<Step>, remainder: Vec<(&str, Step)>) {
    for (sep, next_step) in remainder {
        if sep == "//" {
            steps.push(descendant_or_self());
        }
        steps.push(next_step);
    }
}

fn descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        node_test: NodeTest::NodeType(NodeTypeTest::Node),
        predicates: vec![],
    }
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    alt((
        variable_reference,
        map(number_literal, Expression::Number),
        map(string_literal, Expression::Literal),
        function_call,
        delimited(ws(char('(')), expression, ws(char(')'))),
    ))
    .parse(input)
}

// --- Literal Parsers ---

fn number_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)
}

pub fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

fn variable_reference(input: &str) -> IResult<&str, Expression> {
    map(preceded(char('$'), q_name), Expression::Variable).parse(input)
}

// --- Name and NodeTest Parsers ---

pub fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(take_while1(is_name_start), take_while(is_name_char))).parse(input)
}

pub fn q_name(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(nc_name, opt(pair(char(':'), nc_name)))),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

fn pi_test(input: &str) -> IResult<&str, NodeTest> {
    map(
        preceded(
            tag("processing-instruction"),
            delimited(ws(char('(')), opt(ws(string_literal)), ws(char(')'))),
        ),
        |target| NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(target)),
    )
    .parse(input)
}

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        pi_test,
        map(
            terminated(
                alt((tag("text"), tag("cdata"), tag("node"), tag("comment"))),
                pair(ws(char('(')), ws(char(')'))),
            ),
            |node_type: &str| match node_type {
                "comment" => NodeTest::NodeType(NodeTypeTest::Comment),
                "node" => NodeTest::NodeType(NodeTypeTest::Node),
                // cdata() sections arrive as ordinary character data
                _ => NodeTest::NodeType(NodeTypeTest::Text),
            },
        ),
    ))
    .parse(input)
}

pub fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        value(NodeTest::Wildcard, char('*')),
        node_type_test,
        map(terminated(nc_name, tag(":*")), |prefix| {
            NodeTest::NamespaceWildcard(prefix.to_string())
        }),
        map(q_name, NodeTest::Name),
    ))
    .parse(input)
}

// --- Path Parsers ---

fn axis(input: &str) -> IResult<&str, Axis> {
    terminated(
        alt((
            value(Axis::AncestorOrSelf, tag("ancestor-or-self")),
            value(Axis::Ancestor, tag("ancestor")),
            value(Axis::Attribute, tag("attribute")),
            value(Axis::Child, tag("child")),
            value(Axis::DescendantOrSelf, tag("descendant-or-self")),
            value(Axis::Descendant, tag("descendant")),
            value(Axis::Parent, tag("parent")),
            value(Axis::SelfAxis, tag("self")),
        )),
        tag("::"),
    )
    .parse(input)
}

pub fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), expression, ws(char(']'))).parse(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    let (i, (axis, node_test)) = alt((
        value(
            (Axis::Parent, NodeTest::NodeType(NodeTypeTest::Node)),
            tag(".."),
        ),
        value(
            (Axis::SelfAxis, NodeTest::NodeType(NodeTypeTest::Node)),
            char('.'),
        ),
        map(preceded(char('@'), node_test), |nt| (Axis::Attribute, nt)),
        map(pair(opt(axis), node_test), |(ax, nt)| {
            (ax.unwrap_or(Axis::Child), nt)
        }),
    ))
    .parse(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((
        i,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (i, (is_absolute, mut steps)) = if let Ok((rem, _)) =
        tag::<_, _, nom::error::Error<&str>>("//")(input)
    {
        let (rem, first) = step(rem)?;
        (rem, (true, vec![descendant_or_self(), first]))
    } else if let Ok((rem, _)) = tag::<_, _, nom::error::Error<&str>>("/")(input) {
        match step(rem) {
            Ok((rem, first)) => (rem, (true, vec![first])),
            // the path "/" on its own
            Err(_) => (rem, (true, vec![])),
        }
    } else {
        let (rem, first) = step(input)?;
        (rem, (false, vec![first]))
    };

    let (i, remainder) = many0(pair(alt((tag("//"), tag("/"))), step)).parse(i)?;
    append_steps(&mut steps, remainder);

    Ok((
        i,
        LocationPath {
            start_point: None,
            is_absolute,
            steps,
        },
    ))
}

// --- Function Call Parser ---

fn function_call(input: &str) -> IResult<&str, Expression> {
    // A QName only names a function when '(' follows.
    let (i, name) = q_name(input)?;
    let (i, _) = peek(ws(char('('))).parse(i)?;

    if matches!(
        name.as_str(),
        "text" | "node" | "comment" | "cdata" | "processing-instruction"
    ) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let (i, _) = multispace0(i)?;
    let (i, args) = delimited(
        char('('),
        separated_list0(ws(char(',')), expression),
        ws(char(')')),
    )
    .parse(i)?;

    Ok((i, Expression::FunctionCall { name, args }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(expr: Expression) -> LocationPath {
        match expr {
            Expression::LocationPath(lp) => lp,
            other => panic!("expected a location path, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_path() {
        let lp = path(parse_expression("doc/item").unwrap());
        assert!(!lp.is_absolute);
        assert_eq!(lp.steps.len(), 2);
        assert_eq!(lp.steps[1].node_test, NodeTest::Name("item".into()));
    }

    #[test]
    fn test_parse_parent_and_attribute() {
        let lp = path(parse_expression("../@id").unwrap());
        assert_eq!(lp.steps[0].axis, Axis::Parent);
        assert_eq!(lp.steps[1].axis, Axis::Attribute);
        assert_eq!(lp.steps[1].node_test, NodeTest::Name("id".into()));
    }

    #[test]
    fn test_parse_unary_minus() {
        let result = parse_expression("10 - -5").unwrap();
        if let Expression::BinaryOp { left, op, right } = result {
            assert_eq!(op, BinaryOperator::Minus);
            assert_eq!(*left, Expression::Number(10.0));
            assert_eq!(
                *right,
                Expression::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(Expression::Number(5.0))
                }
            );
        } else {
            panic!("expected binary op");
        }
    }

    #[test]
    fn test_keywords_are_not_name_prefixes() {
        let lp = path(parse_expression("order").unwrap());
        assert_eq!(lp.steps[0].node_test, NodeTest::Name("order".into()));

        let lp = path(parse_expression("info").unwrap());
        assert_eq!(lp.steps[0].node_test, NodeTest::Name("info".into()));
    }

    #[test]
    fn test_parse_function_with_variable_path() {
        let result = parse_expression("count($items/@id) > 2").unwrap();
        if let Expression::BinaryOp { left, op, .. } = result {
            assert_eq!(op, BinaryOperator::GreaterThan);
            assert!(matches!(*left, Expression::FunctionCall { ref name, .. } if name == "count"));
        } else {
            panic!("expected comparison");
        }
    }

    #[test]
    fn test_parse_namespace_wildcard_and_pi() {
        assert_eq!(
            node_test("h:*").unwrap().1,
            NodeTest::NamespaceWildcard("h".into())
        );
        assert_eq!(
            node_test("processing-instruction('xml-stylesheet')").unwrap().1,
            NodeTest::NodeType(NodeTypeTest::ProcessingInstruction(Some(
                "xml-stylesheet".into()
            )))
        );
    }

    #[test]
    fn test_parse_predicates_and_precedence() {
        let lp = path(parse_expression("item[@type = 'a' and position() = 2]").unwrap());
        assert_eq!(lp.steps[0].predicates.len(), 1);
        assert!(matches!(
            lp.steps[0].predicates[0],
            Expression::BinaryOp {
                op: BinaryOperator::And,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_error_reports_remainder() {
        let err = parse_expression("1 +").unwrap_err();
        assert!(matches!(err, ExprError::Parse(..)));
    }
}
