//! Template selection.
//!
//! Candidates come precomputed per group, ordered by priority and then by group
//! distance. The first matching candidate wins unless another candidate of the
//! same rank also matches, which is an ambiguity error.

use crate::ast::{GroupId, TemplateId};
use crate::error::StxError;
use crate::executor::{Focus, Runtime};
use crate::pattern::PredicateEvaluator;
use std::rc::Rc;
use strix_stxpath::{Expr, Node, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Selection {
    pub template: TemplateId,
    /// Group whose candidate list was searched.
    pub group: GroupId,
    /// Index in that list, the starting point for a next match.
    pub rank: usize,
}

/// Evaluates pattern predicates with the candidate node in focus.
pub(crate) struct RuntimeEval<'r, 'h> {
    rt: &'r mut Runtime<'h>,
    group: GroupId,
}

impl<'r, 'h> RuntimeEval<'r, 'h> {
    pub fn new(rt: &'r mut Runtime<'h>, group: GroupId) -> Self {
        RuntimeEval { rt, group }
    }
}

impl PredicateEvaluator for RuntimeEval<'_, '_> {
    fn holds(
        &mut self,
        predicate: &Expr,
        node: &Rc<Node>,
        ancestors: &[Rc<Node>],
    ) -> Result<bool, StxError> {
        let focus = Focus {
            chain: ancestors,
            node,
        };
        let value = self.rt.evaluate(predicate, focus, &[], self.group)?;
        Ok(match value {
            Value::Number(n) => n == node.position as f64,
            other => other.to_bool(),
        })
    }
}

fn path_step(node: &Node) -> Option<String> {
    let name = node.name.as_ref()?.qualified();
    Some(if node.position > 1 {
        format!("{}[{}]", name, node.position)
    } else {
        name
    })
}

fn node_path(node: &Node, ancestors: &[Rc<Node>]) -> String {
    let mut steps: Vec<String> = ancestors.iter().filter_map(|n| path_step(n)).collect();
    steps.extend(path_step(node));
    format!("/{}", steps.join("/"))
}

/// Finds the template for `node` among the candidates of `group`. With `after`,
/// only candidates ranked below that index are considered.
pub(crate) fn select(
    rt: &mut Runtime<'_>,
    group: GroupId,
    node: &Rc<Node>,
    ancestors: &[Rc<Node>],
    after: Option<usize>,
) -> Result<Option<Selection>, StxError> {
    let sheet = rt.sheet.clone();
    let candidates = sheet.candidates(group);
    let start = after.map_or(0, |rank| rank + 1);
    let mut eval = RuntimeEval::new(rt, group);

    for (rank, candidate) in candidates.iter().enumerate().skip(start) {
        let template = sheet.template(candidate.template);
        if !template.pattern.matches(node, ancestors, &mut eval)? {
            continue;
        }

        for rival in candidates[rank + 1..]
            .iter()
            .take_while(|c| c.same_rank(candidate))
        {
            let other = sheet.template(rival.template);
            // alternatives of one union pattern are a single rule
            if other.origin == template.origin {
                continue;
            }
            if other.pattern.matches(node, ancestors, &mut eval)? {
                return Err(StxError::AmbiguousMatch {
                    node: format!("{} at {}", node.describe(), node_path(node, ancestors)),
                    first: template.pattern.text().to_string(),
                    first_location: template.location,
                    second: other.pattern.text().to_string(),
                    second_location: other.location,
                });
            }
        }

        log::debug!(
            "Selected '{}' (priority {}) for {}",
            template.pattern,
            candidate.priority,
            node.describe()
        );
        return Ok(Some(Selection {
            template: candidate.template,
            group,
            rank,
        }));
    }
    Ok(None)
}
