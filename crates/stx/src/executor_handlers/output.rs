use crate::context::ContextStack;
use crate::error::StxError;
use crate::executor::{Activation, Flow, Runtime};
use crate::pattern::Pattern;
use crate::program::Op;
use crate::selector::RuntimeEval;
use std::rc::Rc;
use strix_stxpath::{Node, Value};
use strix_types::{Attribute, NodeKind};

pub(crate) fn handle_output(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    focus: &Rc<Node>,
    act: &mut Activation,
    op: &Op,
) -> Result<Flow, StxError> {
    match op {
        Op::Text(text) => rt.emitter.characters(text)?,
        Op::ValueOf { select, separator } => {
            let value = rt.eval(stack, focus, act, select)?;
            let text = match (separator, &value) {
                (Some(separator), Value::NodeSet(nodes)) => {
                    let separator = rt.eval_avt(stack, focus, act, separator)?;
                    nodes
                        .iter()
                        .map(|n| n.string_value())
                        .collect::<Vec<_>>()
                        .join(&separator)
                }
                _ => value.to_string(),
            };
            rt.emitter.characters(&text)?;
        }
        Op::StartLiteral { name, attributes } => {
            let mut values = Vec::with_capacity(attributes.len());
            for (attr_name, avt) in attributes {
                let value = rt.eval_avt(stack, focus, act, avt)?;
                values.push(Attribute::new(attr_name.clone(), value));
            }
            rt.emitter.start_element(name.clone(), values)?;
        }
        Op::StartComputed(name) => {
            let name = rt.computed_name(stack, focus, act, name, false)?;
            rt.emitter.start_element(name, Vec::new())?;
        }
        Op::EndElement(None) => rt.emitter.end_element(None)?,
        Op::EndElement(Some(name)) => {
            let name = rt.computed_name(stack, focus, act, name, false)?;
            rt.emitter.end_element(Some(&name))?;
        }
        Op::Attribute { name, source } => {
            let value = rt.bind_value(stack, focus, act, source)?.to_string();
            let name = rt.computed_name(stack, focus, act, name, true)?;
            rt.emitter.attribute(name, value)?;
        }
        Op::BeginCapture => rt.emitter.begin_capture(),
        Op::Comment(source) => {
            let text = rt.bind_value(stack, focus, act, source)?.to_string();
            rt.emitter.comment(&text)?;
        }
        Op::ProcessingInstruction { target, source } => {
            let data = rt.bind_value(stack, focus, act, source)?.to_string();
            let target = rt.eval_avt(stack, focus, act, target)?;
            rt.emitter.processing_instruction(target.trim(), &data)?;
        }
        Op::CopyStart { attributes } => {
            let started = copy_node(rt, stack, focus, act, attributes.as_ref())?;
            act.copies.push(started);
        }
        Op::CopyEnd => {
            if act.copies.pop().unwrap_or(false) {
                rt.emitter.end_element(None)?;
            }
        }
        Op::Message(source) => {
            let text = rt.bind_value(stack, focus, act, source)?.to_string();
            rt.message(&text);
        }
        other => {
            return Err(StxError::execution(
                stack.path(),
                format!("unexpected output op {:?}", other),
            ));
        }
    }
    Ok(Flow::Next)
}

/// Shallow copy of the focus node. Returns whether an element was started.
fn copy_node(
    rt: &mut Runtime<'_>,
    stack: &ContextStack,
    focus: &Rc<Node>,
    act: &Activation,
    attributes: Option<&Pattern>,
) -> Result<bool, StxError> {
    match focus.kind {
        NodeKind::Document => Ok(false),
        NodeKind::Element => {
            let name = focus.name.clone().ok_or_else(|| {
                StxError::execution(stack.path(), "element without a name")
            })?;
            let copied = match attributes {
                Some(pattern) => copied_attributes(rt, stack, focus, act, pattern)?,
                None => Vec::new(),
            };
            rt.emitter.start_element(name, copied)?;
            Ok(true)
        }
        NodeKind::Attribute => {
            if let Some(name) = &focus.name {
                rt.emitter.attribute(name.clone(), focus.value.clone())?;
            }
            Ok(false)
        }
        NodeKind::Text => {
            rt.emitter.characters(&focus.value)?;
            Ok(false)
        }
        NodeKind::Comment => {
            rt.emitter.comment(&focus.value)?;
            Ok(false)
        }
        NodeKind::ProcessingInstruction => {
            let target = focus
                .name
                .as_ref()
                .map(|n| n.local_name.clone())
                .unwrap_or_default();
            rt.emitter.processing_instruction(&target, &focus.value)?;
            Ok(false)
        }
    }
}

fn copied_attributes(
    rt: &mut Runtime<'_>,
    stack: &ContextStack,
    element: &Rc<Node>,
    act: &Activation,
    pattern: &Pattern,
) -> Result<Vec<Attribute>, StxError> {
    let chain = stack.chain();
    let mut ancestors = chain[..element.depth.min(chain.len())].to_vec();
    ancestors.push(element.clone());

    let mut eval = RuntimeEval::new(rt, act.group);
    let mut copied = Vec::new();
    for attribute in element.attribute_nodes() {
        if pattern.matches(&attribute, &ancestors, &mut eval)? {
            if let Some(name) = &attribute.name {
                copied.push(Attribute::new(name.clone(), attribute.value.clone()));
            }
        }
    }
    Ok(copied)
}
