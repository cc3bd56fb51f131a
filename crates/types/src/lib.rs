//! Event model for the strix streaming transformation engine.
//!
//! Every producer and consumer of document content speaks in terms of
//! [`StxEvent`]s delivered through the [`EventHandler`] callback trait. Names are
//! always namespace-resolved [`QName`]s by the time they reach a handler.

pub mod event;
pub mod handler;
pub mod name;

pub use event::{NodeKind, StxEvent};
pub use handler::{EventError, EventHandler, EventRecorder};
pub use name::{Attribute, QName};
