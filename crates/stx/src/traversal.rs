//! The streaming state machine.
//!
//! Each input event is turned into a node snapshot, checked for eligibility
//! against the state of its parent frame and handed to the selector. Templates
//! that stop at a `process-*` directive are parked on the context stack and
//! resumed when the stream reaches the point they asked for:
//!
//! - `process-children`: at the end of the node.
//! - `process-self`: when the next-match template has completed.
//! - `process-siblings`: when the sibling run ends, at the latest with the parent.
//!
//! The same machinery runs over recorded events for buffer and document replay,
//! on a fresh stack whose root is a pseudo document node.

use crate::ast::{GroupId, PassThrough, Sheet};
use crate::context::{ContextStack, Frame, ProcessFlags, SiblingRequest};
use crate::error::StxError;
use crate::executor::{Activation, Code, Continuation, Directive, Outcome, Params, Runtime, run};
use crate::selector::{RuntimeEval, Selection, select};
use crate::util::is_whitespace;
use std::rc::Rc;
use strix_stxpath::Node;
use strix_types::{Attribute, NodeKind, QName, StxEvent};

/// Where the node a directive came from stands in the stream.
#[derive(Clone, Copy)]
enum Phase<'a> {
    /// Start of an element or the document; its frame is on top of the stack.
    Open,
    /// A text, comment or processing instruction node, which gets no frame.
    Leaf,
    /// The node has ended. Sibling requests go to frame `parent`.
    Closed { parent: Option<usize> },
    /// An attribute node; `ancestors` ends with its owner element.
    Attribute { ancestors: &'a [Rc<Node>] },
}

fn malformed(message: &str) -> StxError {
    StxError::execution("input", message)
}

pub(crate) struct Traversal {
    stack: ContextStack,
    /// Character data not yet turned into a text node.
    text: String,
}

impl Traversal {
    pub fn new() -> Self {
        Traversal {
            stack: ContextStack::new(),
            text: String::new(),
        }
    }

    /// A traversal over replayed events, matched in `group`.
    fn fragment(group: GroupId, params: Rc<Params>) -> Self {
        let mut frame = Frame::new(Rc::new(Node::document()), group);
        frame.flags |= ProcessFlags::PROCESSING;
        frame.request_children(group, params);
        let mut stack = ContextStack::new();
        stack.push(frame);
        Traversal {
            stack,
            text: String::new(),
        }
    }

    pub fn start_document(&mut self, rt: &mut Runtime<'_>) -> Result<(), StxError> {
        self.stack = ContextStack::new();
        self.text.clear();

        let node = Rc::new(Node::document());
        rt.initialize(&node)?;
        rt.emitter.start_document()?;

        let mut frame = Frame::new(node.clone(), Sheet::ROOT_GROUP);
        frame.flags |= ProcessFlags::PROCESSING;
        self.stack.push(frame);

        let params = Rc::new(Params::new());
        match select(rt, Sheet::ROOT_GROUP, &node, &[], None)? {
            Some(selection) => {
                let outcome = start_template(rt, &mut self.stack, node, selection, params)?;
                drive(rt, &mut self.stack, outcome, Phase::Open, Vec::new())
            }
            None => {
                pass_through(rt, &mut self.stack, &node, Sheet::ROOT_GROUP, params, true)?;
                Ok(())
            }
        }
    }

    pub fn end_document(&mut self, rt: &mut Runtime<'_>) -> Result<(), StxError> {
        self.flush_text(rt)?;
        while !self.stack.is_empty() {
            close_top(rt, &mut self.stack)?;
        }
        rt.emitter.end_document()
    }

    fn end_fragment(&mut self, rt: &mut Runtime<'_>) -> Result<(), StxError> {
        self.flush_text(rt)?;
        while !self.stack.is_empty() {
            close_top(rt, &mut self.stack)?;
        }
        Ok(())
    }

    pub fn start_element(
        &mut self,
        rt: &mut Runtime<'_>,
        name: &QName,
        attributes: &[Attribute],
    ) -> Result<(), StxError> {
        self.flush_text(rt)?;
        let depth = self.stack.len();
        let group = self.stack.child_group();

        if self.forward(rt, || StxEvent::start_element(name.clone(), attributes.to_vec()))? {
            let placeholder = Node::element(name.clone(), Vec::new(), depth, 1);
            self.stack.push(Frame::new(Rc::new(placeholder), group));
            return Ok(());
        }

        let position = self
            .stack
            .top_mut()
            .ok_or_else(|| malformed("element outside of the document"))?
            .counters
            .next(NodeKind::Element, Some(name));
        let node = Rc::new(Node::element(name.clone(), attributes.to_vec(), depth, position));
        log::trace!("start {} at depth {}", node.describe(), depth);

        let admitted = admit(rt, &mut self.stack, &node)?;
        let mut frame = Frame::new(node.clone(), group);
        let Some((group, params)) = admitted else {
            self.stack.push(frame);
            return Ok(());
        };
        frame.flags |= ProcessFlags::PROCESSING;
        self.stack.push(frame);

        match select(rt, group, &node, &self.stack.chain()[..depth], None)? {
            Some(selection) => {
                let outcome = start_template(rt, &mut self.stack, node, selection, params)?;
                drive(rt, &mut self.stack, outcome, Phase::Open, Vec::new())
            }
            None => {
                pass_through(rt, &mut self.stack, &node, group, params, true)?;
                Ok(())
            }
        }
    }

    pub fn end_element(&mut self, rt: &mut Runtime<'_>, name: &QName) -> Result<(), StxError> {
        self.flush_text(rt)?;
        let top = self
            .stack
            .len()
            .checked_sub(1)
            .ok_or_else(|| malformed("end of an element that was never started"))?;
        if self.stack.delegate_index().is_some_and(|index| top > index) {
            self.forward(rt, || StxEvent::end_element(name.clone()))?;
            self.stack.pop();
            return Ok(());
        }
        log::trace!("end element '{}' at depth {}", name, top);
        close_top(rt, &mut self.stack)
    }

    pub fn characters(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub fn comment(&mut self, rt: &mut Runtime<'_>, text: &str) -> Result<(), StxError> {
        self.flush_text(rt)?;
        self.leaf(rt, StxEvent::Comment(text.to_string()))
    }

    pub fn processing_instruction(
        &mut self,
        rt: &mut Runtime<'_>,
        target: &str,
        data: &str,
    ) -> Result<(), StxError> {
        self.flush_text(rt)?;
        self.leaf(
            rt,
            StxEvent::ProcessingInstruction {
                target: target.to_string(),
                data: data.to_string(),
            },
        )
    }

    fn flush_text(&mut self, rt: &mut Runtime<'_>) -> Result<(), StxError> {
        if self.text.is_empty() {
            return Ok(());
        }
        let text = std::mem::take(&mut self.text);
        if (rt.config.strip_whitespace || rt.sheet.strip_space()) && is_whitespace(&text) {
            return Ok(());
        }
        self.leaf(rt, StxEvent::Characters(text))
    }

    /// Hands an event to the filter that owns the current subtree, if there is one.
    fn forward(
        &mut self,
        rt: &mut Runtime<'_>,
        event: impl FnOnce() -> StxEvent,
    ) -> Result<bool, StxError> {
        let Some(index) = self.stack.delegate_index() else {
            return Ok(false);
        };
        if let Some(filter) = self.stack.get_mut(index).and_then(|f| f.delegate.as_mut()) {
            filter.event(&event(), &mut rt.emitter.splice())?;
        }
        Ok(true)
    }

    fn leaf(&mut self, rt: &mut Runtime<'_>, event: StxEvent) -> Result<(), StxError> {
        if self.forward(rt, || event.clone())? {
            return Ok(());
        }
        let depth = self.stack.len();
        let frame = self
            .stack
            .top_mut()
            .ok_or_else(|| malformed("content outside of the document"))?;
        let node = match event {
            StxEvent::Characters(text) => {
                let position = frame.counters.next(NodeKind::Text, None);
                Node::text(text, depth, position)
            }
            StxEvent::Comment(text) => {
                let position = frame.counters.next(NodeKind::Comment, None);
                Node::comment(text, depth, position)
            }
            StxEvent::ProcessingInstruction { target, data } => {
                let name = QName::new(target.as_str());
                let position = frame
                    .counters
                    .next(NodeKind::ProcessingInstruction, Some(&name));
                Node::processing_instruction(&target, &data, depth, position)
            }
            _ => return Ok(()),
        };
        let node = Rc::new(node);

        let Some((group, params)) = admit(rt, &mut self.stack, &node)? else {
            return Ok(());
        };
        match select(rt, group, &node, self.stack.chain(), None)? {
            Some(selection) => {
                let outcome = start_template(rt, &mut self.stack, node, selection, params)?;
                drive(rt, &mut self.stack, outcome, Phase::Leaf, Vec::new())
            }
            None => {
                pass_through(rt, &mut self.stack, &node, group, params, false)?;
                Ok(())
            }
        }
    }
}

fn start_template(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    node: Rc<Node>,
    selection: Selection,
    params: Rc<Params>,
) -> Result<Outcome, StxError> {
    let group = rt.sheet.template(selection.template).group;
    let cont = Continuation {
        activations: vec![Activation::new(
            Code::Template(selection.template),
            group,
            params,
        )],
        focus: node,
        selected_in: selection.group,
        rank: selection.rank,
    };
    run(rt, stack, cont)
}

/// Decides whether a new child of the top frame is matched, and with which group
/// and parameters. Sibling runs the node ends are resumed first.
fn admit(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    node: &Rc<Node>,
) -> Result<Option<(GroupId, Rc<Params>)>, StxError> {
    loop {
        let Some(index) = stack.len().checked_sub(1) else {
            return Ok(None);
        };
        let Some(request) = stack.top().and_then(|f| f.siblings.last()) else {
            break;
        };
        let whitespace = node.kind == NodeKind::Text && is_whitespace(&node.value);
        if whitespace || sibling_continues(rt, stack.chain(), node, request)? {
            return Ok(Some((request.group, request.params.clone())));
        }

        let Some(request) = stack.top_mut().and_then(|frame| {
            let request = frame.siblings.pop();
            if frame.siblings.is_empty() {
                frame.flags.remove(ProcessFlags::SIBLINGS);
            }
            request
        }) else {
            break;
        };
        log::debug!("Sibling run ended before {}", node.describe());
        let outcome = run(rt, stack, request.cont)?;
        drive(
            rt,
            stack,
            outcome,
            Phase::Closed {
                parent: Some(index),
            },
            request.waiters,
        )?;
    }

    Ok(stack
        .top()
        .filter(|frame| frame.flags.contains(ProcessFlags::CHILDREN))
        .map(|frame| (frame.child_group, frame.child_params.clone())))
}

fn sibling_continues(
    rt: &mut Runtime<'_>,
    ancestors: &[Rc<Node>],
    node: &Rc<Node>,
    request: &SiblingRequest,
) -> Result<bool, StxError> {
    let mut eval = RuntimeEval::new(rt, request.group);
    if let Some(until) = &request.until {
        if until.matches(node, ancestors, &mut eval)? {
            return Ok(false);
        }
    }
    if let Some(while_) = &request.while_ {
        if !while_.matches(node, ancestors, &mut eval)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ends the top frame. Sibling runs of its children finish first, then a
/// delegated filter and a copied start tag, then the templates waiting for the
/// node's end.
fn close_top(rt: &mut Runtime<'_>, stack: &mut ContextStack) -> Result<(), StxError> {
    let Some(index) = stack.len().checked_sub(1) else {
        return Ok(());
    };

    while let Some(request) = stack.top_mut().and_then(|f| f.siblings.pop()) {
        let outcome = run(rt, stack, request.cont)?;
        drive(
            rt,
            stack,
            outcome,
            Phase::Closed {
                parent: Some(index),
            },
            request.waiters,
        )?;
    }

    if stack.delegate_index() == Some(index) {
        if let Some(mut filter) = stack.take_delegate(index) {
            filter.finish(&mut rt.emitter.splice())?;
        }
    }

    // a copied start tag belongs to pass-through, inside anything still waiting
    let copied = match stack.top_mut() {
        Some(frame) if frame.copied => {
            frame.copied = false;
            Some(frame.node.name.clone())
        }
        _ => None,
    };
    if let Some(name) = copied {
        rt.emitter.end_element(name.as_ref())?;
    }

    let mut waiting = stack
        .top_mut()
        .map(|f| std::mem::take(&mut f.pending))
        .unwrap_or_default();
    if let Some(cont) = waiting.pop() {
        let outcome = run(rt, stack, cont)?;
        drive(
            rt,
            stack,
            outcome,
            Phase::Closed {
                parent: index.checked_sub(1),
            },
            waiting,
        )?;
    }

    stack.pop();
    Ok(())
}

/// Carries out the directives of a template until it completes or is parked.
/// `waiters` are templates that asked for `process-self` and resume, innermost
/// last, once the template they wait for has completed.
fn drive(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    mut outcome: Outcome,
    phase: Phase<'_>,
    mut waiters: Vec<Continuation>,
) -> Result<(), StxError> {
    loop {
        let (directive, cont) = match outcome {
            Outcome::Completed => match waiters.pop() {
                Some(cont) => {
                    outcome = run(rt, stack, cont)?;
                    continue;
                }
                None => return Ok(()),
            },
            Outcome::Suspended(directive, cont) => (directive, cont),
        };

        outcome = match directive {
            Directive::Children {
                params,
                filter,
                group,
            } => {
                if let Phase::Open = phase {
                    log::debug!("Waiting for the children of {}", cont.focus.describe());
                    let frame = stack
                        .top_mut()
                        .ok_or_else(|| malformed("no open node to process children of"))?;
                    frame.pending.append(&mut waiters);
                    frame.pending.push(cont);
                    match filter {
                        Some(filter) => stack.delegate_top(filter),
                        None => frame.request_children(group, Rc::new(params)),
                    }
                    return Ok(());
                }
                // nothing left below this node
                if let Some(mut filter) = filter {
                    filter.finish(&mut rt.emitter.splice())?;
                }
                run(rt, stack, cont)?
            }
            Directive::SelfNode { params, group } => {
                let node = cont.focus.clone();
                let ancestors = match phase {
                    Phase::Attribute { ancestors } => ancestors.to_vec(),
                    _ => {
                        let chain = stack.chain();
                        chain[..node.depth.min(chain.len())].to_vec()
                    }
                };
                if let Phase::Open = phase {
                    if let Some(frame) = stack.top_mut() {
                        frame.flags |= ProcessFlags::SELF;
                    }
                }
                let selection = match group {
                    Some(group) => select(rt, group, &node, &ancestors, None)?,
                    None => select(rt, cont.selected_in, &node, &ancestors, Some(cont.rank))?,
                };
                let params = Rc::new(params);
                match selection {
                    Some(selection) => {
                        waiters.push(cont);
                        start_template(rt, stack, node, selection, params)?
                    }
                    None => {
                        let group = group.unwrap_or(cont.selected_in);
                        let opened = matches!(phase, Phase::Open);
                        if pass_through(rt, stack, &node, group, params, opened)? {
                            if let Some(frame) = stack.top_mut() {
                                frame.pending.append(&mut waiters);
                                frame.pending.push(cont);
                            }
                            return Ok(());
                        }
                        run(rt, stack, cont)?
                    }
                }
            }
            Directive::Siblings {
                params,
                while_,
                until,
                group,
            } => {
                let parent = match phase {
                    Phase::Open => stack.len().checked_sub(2),
                    Phase::Leaf => stack.len().checked_sub(1),
                    Phase::Closed { parent } => parent,
                    Phase::Attribute { .. } => None,
                };
                match parent.and_then(|index| stack.get_mut(index)) {
                    Some(frame) => {
                        log::debug!("{} waits for its following siblings", cont.focus.describe());
                        frame.flags |= ProcessFlags::SIBLINGS;
                        frame.siblings.push(SiblingRequest {
                            cont,
                            waiters,
                            while_,
                            until,
                            group,
                            params: Rc::new(params),
                        });
                        return Ok(());
                    }
                    None => run(rt, stack, cont)?,
                }
            }
        };
    }
}

/// Applies the pass-through policy of `group` to a node no template took.
/// Returns whether the children of the node were requested.
fn pass_through(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    node: &Rc<Node>,
    group: GroupId,
    params: Rc<Params>,
    opened: bool,
) -> Result<bool, StxError> {
    let policy = rt.sheet.group(group).pass_through;
    match node.kind {
        NodeKind::Document if opened => {
            if let Some(frame) = stack.top_mut() {
                frame.request_children(group, params);
            }
            Ok(true)
        }
        NodeKind::Element if opened && policy != PassThrough::None => {
            if policy == PassThrough::All {
                let name = node
                    .name
                    .clone()
                    .ok_or_else(|| malformed("element without a name"))?;
                rt.emitter.start_element(name, node.attributes.clone())?;
            }
            if let Some(frame) = stack.top_mut() {
                frame.copied = policy == PassThrough::All;
                frame.request_children(group, params);
            }
            Ok(true)
        }
        NodeKind::Text if policy != PassThrough::None => {
            rt.emitter.characters(&node.value)?;
            Ok(false)
        }
        NodeKind::Comment if policy == PassThrough::All => {
            rt.emitter.comment(&node.value)?;
            Ok(false)
        }
        NodeKind::ProcessingInstruction if policy == PassThrough::All => {
            let target = node
                .name
                .as_ref()
                .map(|n| n.local_name.as_str())
                .unwrap_or_default();
            rt.emitter.processing_instruction(target, &node.value)?;
            Ok(false)
        }
        NodeKind::Attribute if policy == PassThrough::All && rt.emitter.has_open_start_tag() => {
            if let Some(name) = &node.name {
                rt.emitter.attribute(name.clone(), node.value.clone())?;
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

/// Matches every attribute of `owner` in `group`, before anything else of the
/// element is processed.
pub(crate) fn process_attributes(
    rt: &mut Runtime<'_>,
    stack: &mut ContextStack,
    owner: &Rc<Node>,
    group: GroupId,
    params: Params,
) -> Result<(), StxError> {
    if owner.kind != NodeKind::Element {
        return Ok(());
    }
    if let Some(frame) = stack.top_mut() {
        if Rc::ptr_eq(&frame.node, owner) {
            frame.flags |= ProcessFlags::ATTRIBUTES;
        }
    }
    let chain = stack.chain();
    let mut ancestors = chain[..owner.depth.min(chain.len())].to_vec();
    ancestors.push(owner.clone());

    let params = Rc::new(params);
    for attribute in owner.attribute_nodes() {
        match select(rt, group, &attribute, &ancestors, None)? {
            Some(selection) => {
                let outcome = start_template(rt, stack, attribute, selection, params.clone())?;
                drive(
                    rt,
                    stack,
                    outcome,
                    Phase::Attribute {
                        ancestors: &ancestors,
                    },
                    Vec::new(),
                )?;
            }
            None => {
                pass_through(rt, stack, &attribute, group, params.clone(), false)?;
            }
        }
    }
    Ok(())
}

/// Runs recorded events through the matcher as a document fragment.
pub(crate) fn replay(
    rt: &mut Runtime<'_>,
    events: &[StxEvent],
    group: GroupId,
    params: Params,
) -> Result<(), StxError> {
    let limit = rt.config.max_replay_depth;
    if rt.replay_depth >= limit {
        return Err(StxError::ReplayDepth(limit));
    }
    rt.replay_depth += 1;
    log::debug!("Replaying {} event(s) in group {}", events.len(), group);
    let result = replay_events(rt, events, group, params);
    rt.replay_depth -= 1;
    result
}

fn replay_events(
    rt: &mut Runtime<'_>,
    events: &[StxEvent],
    group: GroupId,
    params: Params,
) -> Result<(), StxError> {
    let mut traversal = Traversal::fragment(group, Rc::new(params));
    for event in events {
        match event {
            StxEvent::StartDocument | StxEvent::EndDocument => {}
            StxEvent::StartElement { name, attributes } => {
                traversal.start_element(rt, name, attributes)?
            }
            StxEvent::EndElement { name } => traversal.end_element(rt, name)?,
            StxEvent::Characters(text) => traversal.characters(text),
            StxEvent::Comment(text) => traversal.comment(rt, text)?,
            StxEvent::ProcessingInstruction { target, data } => {
                traversal.processing_instruction(rt, target, data)?
            }
        }
    }
    traversal.end_fragment(rt)
}
