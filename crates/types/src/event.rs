use crate::name::{Attribute, QName};
use serde::{Deserialize, Serialize};

/// The kinds of node an STX processor distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

impl NodeKind {
    /// Leaf kinds never get a context frame of their own.
    pub fn is_leaf(self) -> bool {
        matches!(
            self,
            NodeKind::Text | NodeKind::Comment | NodeKind::ProcessingInstruction
        )
    }
}

/// One parse event, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StxEvent {
    StartDocument,
    EndDocument,
    StartElement {
        name: QName,
        attributes: Vec<Attribute>,
    },
    EndElement {
        name: QName,
    },
    Characters(String),
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl StxEvent {
    pub fn start_element(name: QName, attributes: Vec<Attribute>) -> Self {
        StxEvent::StartElement { name, attributes }
    }

    pub fn end_element(name: QName) -> Self {
        StxEvent::EndElement { name }
    }

    pub fn text(content: impl Into<String>) -> Self {
        StxEvent::Characters(content.into())
    }

    /// The node kind this event opens, if it opens one.
    pub fn node_kind(&self) -> Option<NodeKind> {
        match self {
            StxEvent::StartDocument => Some(NodeKind::Document),
            StxEvent::StartElement { .. } => Some(NodeKind::Element),
            StxEvent::Characters(_) => Some(NodeKind::Text),
            StxEvent::Comment(_) => Some(NodeKind::Comment),
            StxEvent::ProcessingInstruction { .. } => Some(NodeKind::ProcessingInstruction),
            StxEvent::EndDocument | StxEvent::EndElement { .. } => None,
        }
    }
}
