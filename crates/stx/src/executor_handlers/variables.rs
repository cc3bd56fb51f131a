use crate::buffer::BufferHandle;
use crate::context::ContextStack;
use crate::error::StxError;
use crate::executor::{Activation, Flow, Runtime, Scope};
use crate::program::{BindKind, BindSource, Op};
use std::rc::Rc;
use strix_stxpath::{Node, Value};

pub(crate) fn handle_variables(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    focus: &Rc<Node>,
    act: &mut Activation,
    op: &Op,
) -> Result<Flow, StxError> {
    match op {
        Op::PushScope => act.scopes.push(Scope::default()),
        Op::PopScope => {
            act.scopes.pop();
        }
        Op::Bind { kind, name, source } => match kind {
            BindKind::Variable => {
                let value = rt.bind_value(stack, focus, act, source)?;
                act.scope_mut().vars.insert(name.clone(), value);
            }
            BindKind::Param { required } => {
                let value = handle_param(rt, stack, focus, act, name, source, *required)?;
                act.scope_mut().vars.insert(name.clone(), value);
            }
            BindKind::Assign => {
                let value = rt.bind_value(stack, focus, act, source)?;
                handle_assign(rt, stack, act, name, value)?;
            }
        },
        Op::DeclareBuffer(name) => {
            log::trace!("Declaring buffer '{}' at {}", name, stack.path());
            act.scope_mut()
                .buffers
                .insert(name.clone(), BufferHandle::transient());
        }
        Op::BeginRedirect { name, clear } => {
            let target = rt.lookup_buffer(stack, act, name)?;
            rt.emitter.begin_redirect(name, target, *clear)?;
        }
        Op::EndRedirect => rt.emitter.end_redirect()?,
        other => {
            return Err(StxError::execution(
                stack.path(),
                format!("unexpected variable op {:?}", other),
            ));
        }
    }
    Ok(Flow::Next)
}

/// A passed value wins over the declared default. Captured default content is
/// discarded in that case.
fn handle_param(
    rt: &mut Runtime<'_>,
    stack: &ContextStack,
    focus: &Rc<Node>,
    act: &Activation,
    name: &str,
    source: &BindSource,
    required: bool,
) -> Result<Value, StxError> {
    match act.params.get(name).cloned() {
        Some(value) => {
            if matches!(source, BindSource::Captured) {
                rt.emitter.end_capture()?;
            }
            Ok(value)
        }
        None if required => Err(StxError::execution(
            stack.path(),
            format!("required parameter '{}' was not passed", name),
        )),
        None => rt.bind_value(stack, focus, act, source),
    }
}

/// Updates the nearest binding: local scopes first, then group variables.
fn handle_assign(
    rt: &mut Runtime<'_>,
    stack: &ContextStack,
    act: &mut Activation,
    name: &str,
    value: Value,
) -> Result<(), StxError> {
    if let Some(slot) = act
        .scopes
        .iter_mut()
        .rev()
        .find_map(|s| s.vars.get_mut(name))
    {
        *slot = value;
        return Ok(());
    }
    let sheet = rt.sheet.clone();
    for group in sheet.group_chain(act.group) {
        if let Some(slot) = rt.globals.get_mut(group).and_then(|vars| vars.get_mut(name)) {
            *slot = value;
            return Ok(());
        }
    }
    Err(StxError::execution(
        stack.path(),
        format!("cannot assign undeclared variable '{}'", name),
    ))
}
