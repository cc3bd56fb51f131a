//! Strix: a streaming STX transformation engine.
//!
//! This crate re-exports the workspace crates behind one name:
//!
//! - [`types`]: the event model shared by sources, transformers and sinks
//! - [`traits`]: host collaborators (filters, message sinks, resource providers)
//! - [`stxpath`]: the expression language
//! - [`stx`]: the sheet compiler and the transformation engine
//! - [`executor`]: batch execution over many documents
//!
//! ```ignore
//! let processor = strix::Processor::compile(sheet)?;
//! let output = processor.transform_str("<doc/>")?;
//! ```

pub use strix_executor as executor;
pub use strix_stx as stx;
pub use strix_stxpath as stxpath;
pub use strix_traits as traits;
pub use strix_types as types;

pub use strix_executor::{Executor, ExecutorImpl, SyncExecutor, transform_all};
#[cfg(feature = "rayon-executor")]
pub use strix_executor::RayonExecutor;
pub use strix_stx::{
    Capabilities, Location, Pipeline, Processor, ProcessorConfig, STX_NAMESPACE, Sheet, StxError,
    Transformer, XmlWriter, compile, compile_with_base,
};
pub use strix_traits::{
    CollectingMessageSink, FilterError, FilterHandler, FilterRegistry, FilterRequest,
    FilterResolver, InMemoryResourceProvider, MessageSink, ResourceError, ResourceProvider,
};
pub use strix_types::{
    Attribute, EventError, EventHandler, EventRecorder, NodeKind, QName, StxEvent,
};
