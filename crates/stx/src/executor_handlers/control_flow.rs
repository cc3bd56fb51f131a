use crate::context::ContextStack;
use crate::error::StxError;
use crate::executor::{Activation, Code, Flow, LoopState, Runtime, Scope};
use crate::program::Op;
use std::rc::Rc;
use strix_stxpath::Node;

pub(crate) fn handle_control_flow(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    focus: &Rc<Node>,
    act: &mut Activation,
    op: &Op,
) -> Result<Flow, StxError> {
    match op {
        Op::Jump(target) => act.pc = *target,
        Op::JumpUnless { test, target } => {
            if !rt.eval(stack, focus, act, test)?.to_bool() {
                act.pc = *target;
            }
        }
        Op::ForEachInit(select) => {
            let items = rt.eval(stack, focus, act, select)?.items();
            act.loops.push(LoopState { items, next: 0 });
        }
        Op::ForEachNext { name, exit } => handle_for_each_next(stack, act, name, *exit)?,
        Op::Call { procedure, params } => {
            let values = rt.params(stack, focus, act, params)?;
            let group = rt.sheet.procedure(*procedure).group;
            log::trace!(
                "Calling procedure '{}' at {}",
                rt.sheet.procedure(*procedure).name,
                stack.path()
            );
            return Ok(Flow::Call(Activation::new(
                Code::Procedure(*procedure),
                group,
                Rc::new(values),
            )));
        }
        other => {
            return Err(StxError::execution(
                stack.path(),
                format!("unexpected control flow op {:?}", other),
            ));
        }
    }
    Ok(Flow::Next)
}

fn handle_for_each_next(
    stack: &ContextStack,
    act: &mut Activation,
    name: &str,
    exit: usize,
) -> Result<(), StxError> {
    let state = act
        .loops
        .last_mut()
        .ok_or_else(|| StxError::execution(stack.path(), "loop step outside of a loop"))?;
    match state.items.get(state.next).cloned() {
        Some(item) => {
            state.next += 1;
            let mut scope = Scope::default();
            scope.vars.insert(name.to_string(), item);
            act.scopes.push(scope);
        }
        None => {
            act.loops.pop();
            act.pc = exit;
        }
    }
    Ok(())
}
