pub mod filter;
pub mod message;
pub mod resource;

pub use filter::{
    FilterError, FilterFactory, FilterHandler, FilterRegistry, FilterRequest, FilterResolver,
};
pub use message::{CollectingMessageSink, LogMessageSink, MessageSink};
pub use resource::{InMemoryResourceProvider, ResourceError, ResourceProvider, SharedDocument};
