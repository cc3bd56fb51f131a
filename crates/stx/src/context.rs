//! The context stack: one frame per open ancestor of the current node.
//!
//! A frame records how its node is being processed. Its flags say what was
//! requested for it, `pending` holds the templates waiting for the node's end,
//! and `siblings` holds `process-siblings` requests made by its children.

use crate::ast::{GroupId, Sheet};
use crate::executor::{Continuation, Params};
use crate::pattern::Pattern;
use bitflags::bitflags;
use std::collections::HashMap;
use std::rc::Rc;
use strix_stxpath::Node;
use strix_traits::FilterHandler;
use strix_types::{NodeKind, QName};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProcessFlags: u8 {
        /// A template matched the node, or pass-through descended into it.
        const PROCESSING = 1;
        /// Children are eligible for matching.
        const CHILDREN = 1 << 1;
        /// `process-self` is in progress for the node.
        const SELF = 1 << 2;
        /// A child asked for its following siblings.
        const SIBLINGS = 1 << 3;
        /// Attribute templates are running for the node.
        const ATTRIBUTES = 1 << 4;
    }
}

pub(crate) struct SiblingRequest {
    pub cont: Continuation,
    /// Templates in `process-self` that wait for `cont` to complete.
    pub waiters: Vec<Continuation>,
    pub while_: Option<Pattern>,
    pub until: Option<Pattern>,
    pub group: GroupId,
    pub params: Rc<Params>,
}

/// Running 1-based positions of children, per kind and name.
#[derive(Debug, Default)]
pub(crate) struct PositionCounters {
    counts: HashMap<(NodeKind, Option<QName>), usize>,
}

impl PositionCounters {
    pub fn next(&mut self, kind: NodeKind, name: Option<&QName>) -> usize {
        let count = self.counts.entry((kind, name.cloned())).or_insert(0);
        *count += 1;
        *count
    }
}

pub(crate) struct Frame {
    pub node: Rc<Node>,
    pub flags: ProcessFlags,
    /// Templates resumed at the node's end. The last one waits for the children;
    /// the ones below it wait for it in turn.
    pub pending: Vec<Continuation>,
    pub siblings: Vec<SiblingRequest>,
    pub counters: PositionCounters,
    /// Group and parameters children are matched with.
    pub child_group: GroupId,
    pub child_params: Rc<Params>,
    /// Pass-through copied the start tag; the end tag is owed.
    pub copied: bool,
    /// A filter that receives the whole subtree instead of the matcher.
    pub delegate: Option<Box<dyn FilterHandler>>,
}

impl Frame {
    pub fn new(node: Rc<Node>, group: GroupId) -> Self {
        Frame {
            node,
            flags: ProcessFlags::empty(),
            pending: Vec::new(),
            siblings: Vec::new(),
            counters: PositionCounters::default(),
            child_group: group,
            child_params: Rc::new(Params::new()),
            copied: false,
            delegate: None,
        }
    }

    pub fn request_children(&mut self, group: GroupId, params: Rc<Params>) {
        self.flags |= ProcessFlags::CHILDREN;
        self.child_group = group;
        self.child_params = params;
    }
}

/// The frames of all open nodes, document node first, plus the node chain that
/// expressions see.
pub(crate) struct ContextStack {
    frames: Vec<Frame>,
    chain: Vec<Rc<Node>>,
    /// Index of the frame whose filter receives all events below it.
    delegate_at: Option<usize>,
}

impl ContextStack {
    pub fn new() -> Self {
        ContextStack {
            frames: Vec::new(),
            chain: Vec::new(),
            delegate_at: None,
        }
    }

    pub fn push(&mut self, frame: Frame) {
        self.chain.push(frame.node.clone());
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.chain.pop();
        let frame = self.frames.pop();
        if self.delegate_at.is_some_and(|i| i >= self.frames.len()) {
            self.delegate_at = None;
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Frame> {
        self.frames.get_mut(index)
    }

    /// Nodes of all open frames, document node first.
    pub fn chain(&self) -> &[Rc<Node>] {
        &self.chain
    }

    /// Starts routing the subtree of the top frame to its filter.
    pub fn delegate_top(&mut self, filter: Box<dyn FilterHandler>) {
        if let Some(frame) = self.frames.last_mut() {
            frame.delegate = Some(filter);
            self.delegate_at = Some(self.frames.len() - 1);
        }
    }

    pub fn delegate_index(&self) -> Option<usize> {
        self.delegate_at
    }

    /// Takes the filter of the frame at `index` out of the stack.
    pub fn take_delegate(&mut self, index: usize) -> Option<Box<dyn FilterHandler>> {
        if self.delegate_at == Some(index) {
            self.delegate_at = None;
        }
        self.frames.get_mut(index).and_then(|f| f.delegate.take())
    }

    /// A readable location such as `/doc/item[2]` for diagnostics.
    pub fn path(&self) -> String {
        let steps: Vec<String> = self
            .chain
            .iter()
            .skip(1)
            .map(|n| {
                let name = n.name.as_ref().map(|q| q.qualified()).unwrap_or_default();
                if n.position > 1 {
                    format!("{}[{}]", name, n.position)
                } else {
                    name
                }
            })
            .collect();
        format!("/{}", steps.join("/"))
    }

    /// Group that children of the top frame are matched in.
    pub fn child_group(&self) -> GroupId {
        self.top().map(|f| f.child_group).unwrap_or(Sheet::ROOT_GROUP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str, depth: usize, position: usize) -> Rc<Node> {
        Rc::new(Node::element(QName::new(name), vec![], depth, position))
    }

    #[test]
    fn test_positions_count_per_kind_and_name() {
        let mut counters = PositionCounters::default();
        let a = QName::new("a");
        assert_eq!(counters.next(NodeKind::Element, Some(&a)), 1);
        assert_eq!(counters.next(NodeKind::Text, None), 1);
        assert_eq!(counters.next(NodeKind::Element, Some(&QName::new("b"))), 1);
        assert_eq!(counters.next(NodeKind::Element, Some(&a)), 2);
    }

    #[test]
    fn test_stack_mirrors_chain_and_path() {
        let mut stack = ContextStack::new();
        stack.push(Frame::new(Rc::new(Node::document()), 0));
        stack.push(Frame::new(element("doc", 1, 1), 0));
        stack.push(Frame::new(element("item", 2, 2), 0));
        assert_eq!(stack.chain().len(), 3);
        assert_eq!(stack.path(), "/doc/item[2]");
        stack.pop();
        assert_eq!(stack.path(), "/doc");
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_flags_compose() {
        let mut frame = Frame::new(element("a", 1, 1), 0);
        frame.flags |= ProcessFlags::PROCESSING;
        frame.request_children(3, Rc::new(Params::new()));
        assert!(frame.flags.contains(ProcessFlags::PROCESSING | ProcessFlags::CHILDREN));
        assert_eq!(frame.child_group, 3);
        assert!(!frame.flags.contains(ProcessFlags::SIBLINGS));
    }
}
