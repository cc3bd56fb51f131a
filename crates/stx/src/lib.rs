//! A streaming STX transformation engine.
//!
//! A sheet is compiled once into an immutable [`Sheet`] and run by a
//! [`Processor`] over a forward-only stream of parse events. Nothing of the
//! input is kept beyond the open ancestors of the current node, so output is
//! decided and written while the input is still being read.

pub mod ast;
pub mod buffer;
pub mod compiler;
pub mod config;
pub mod error;
pub mod parser;
pub mod pattern;
pub mod pipeline;
pub mod processor;
pub mod program;
pub mod source;
pub mod util;
pub mod writer;

mod compiler_handlers;
mod context;
mod executor;
mod executor_handlers;
mod filter;
mod output;
mod selector;
mod traversal;

pub use ast::{STX_NAMESPACE, Sheet};
pub use buffer::{Buffer, BufferScope};
pub use compiler::{compile, compile_with_base};
pub use config::{Capabilities, ProcessorConfig};
pub use error::{Location, StxError};
pub use pipeline::Pipeline;
pub use processor::{Processor, Transformer};
pub use writer::XmlWriter;
