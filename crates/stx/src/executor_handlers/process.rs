use crate::ast::{FilterSpec, GroupId, ProcessCall, ProcessKind};
use crate::context::ContextStack;
use crate::error::StxError;
use crate::executor::{Activation, Directive, Flow, Params, Runtime};
use crate::filter;
use crate::source;
use crate::traversal;
use std::rc::Rc;
use strix_stxpath::Node;
use strix_traits::{FilterHandler, FilterRequest, ResourceError};
use strix_types::StxEvent;

pub(crate) fn handle_process(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    focus: &Rc<Node>,
    act: &mut Activation,
    call: &ProcessCall,
    group: Option<GroupId>,
) -> Result<Flow, StxError> {
    let params = rt.params(stack, focus, act, &call.params)?;
    let group_or_current = group.unwrap_or(act.group);
    log::debug!(
        "stx:{} for {} at {}",
        call.kind.element_name(),
        focus.describe(),
        stack.path()
    );

    match &call.kind {
        ProcessKind::Children => {
            let filter = match &call.filter {
                Some(spec) => Some(open_filter(rt, stack, focus, act, call, spec, &params)?),
                None => None,
            };
            Ok(Flow::Suspend(Directive::Children {
                params,
                filter,
                group: group_or_current,
            }))
        }
        ProcessKind::SelfNode => Ok(Flow::Suspend(Directive::SelfNode { params, group })),
        ProcessKind::Siblings { while_, until } => Ok(Flow::Suspend(Directive::Siblings {
            params,
            while_: while_.clone(),
            until: until.clone(),
            group: group_or_current,
        })),
        ProcessKind::Attributes => {
            traversal::process_attributes(rt, stack, focus, group_or_current, params)?;
            Ok(Flow::Next)
        }
        ProcessKind::Buffer { name } => {
            let events = rt.lookup_buffer(stack, act, name)?.snapshot(name)?;
            feed(rt, stack, focus, act, call, &events, group_or_current, params)?;
            Ok(Flow::Next)
        }
        ProcessKind::Doc { href, base } => {
            let href = rt.eval_avt(stack, focus, act, href)?;
            let base = match base {
                Some(base) => Some(rt.eval_avt(stack, focus, act, base)?),
                None => rt.sheet.base_uri().map(str::to_string),
            };
            let resources = rt
                .caps
                .resources
                .clone()
                .ok_or_else(|| ResourceError::NoProvider(href.clone()))?;
            let location = resources.resolve(base.as_deref(), href.trim());
            log::debug!("Loading '{}' for stx:process-doc", location);
            let text = resources.load(&location)?;
            let events = source::read_events(&text, rt.config.strip_whitespace)?;
            feed(rt, stack, focus, act, call, &events, group_or_current, params)?;
            Ok(Flow::Next)
        }
    }
}

/// Sends recorded events either to a filter or back through the matcher.
#[allow(clippy::too_many_arguments)]
fn feed(
    rt: &mut Runtime<'_>,
    stack: &ContextStack,
    focus: &Rc<Node>,
    act: &Activation,
    call: &ProcessCall,
    events: &[StxEvent],
    group: GroupId,
    params: Params,
) -> Result<(), StxError> {
    match &call.filter {
        Some(spec) => {
            let mut handler = open_filter(rt, stack, focus, act, call, spec, &params)?;
            let mut output = rt.emitter.splice();
            for event in events {
                if !matches!(event, StxEvent::StartDocument | StxEvent::EndDocument) {
                    handler.event(event, &mut output)?;
                }
            }
            handler.finish(&mut output)?;
            Ok(())
        }
        None => traversal::replay(rt, events, group, params),
    }
}

#[allow(clippy::too_many_arguments)]
fn open_filter(
    rt: &mut Runtime<'_>,
    stack: &ContextStack,
    focus: &Rc<Node>,
    act: &Activation,
    call: &ProcessCall,
    spec: &FilterSpec,
    params: &Params,
) -> Result<Box<dyn FilterHandler>, StxError> {
    let uri = rt.eval_avt(stack, focus, act, &spec.method)?;
    let src = match &spec.src {
        Some(src) => Some(rt.eval_avt(stack, focus, act, src)?),
        None => None,
    };
    let request = FilterRequest {
        uri: uri.trim().to_string(),
        src,
        params: call
            .params
            .iter()
            .filter_map(|p| params.get(&p.name).map(|v| (p.name.clone(), v.to_string())))
            .collect(),
    };
    log::debug!("Opening filter '{}' at {}", request.uri, stack.path());
    filter::open(rt, &request)
}
