//! External filters: processors a sheet hands a sub-stream to.
//!
//! A sheet names a filter by capability URI (`filter-method`). The engine asks
//! the host's [`FilterResolver`] for a handler first and falls back to its own
//! built-in filters when the host declines.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use strix_types::{EventError, EventHandler, StxEvent};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Filter '{uri}' failed: {message}")]
    Failed { uri: String, message: String },

    #[error("Filter '{uri}' rejected the request: {message}")]
    InvalidRequest { uri: String, message: String },

    #[error(transparent)]
    Event(#[from] EventError),
}

impl FilterError {
    pub fn failed(uri: &str, message: impl Into<String>) -> Self {
        FilterError::Failed {
            uri: uri.to_string(),
            message: message.into(),
        }
    }
}

/// Everything a resolver needs to build a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterRequest {
    /// The capability URI from `filter-method`.
    pub uri: String,
    /// The resolved `filter-src` value, if any.
    pub src: Option<String>,
    /// `with-param` values, converted to strings, in declaration order.
    pub params: Vec<(String, String)>,
}

impl FilterRequest {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A live filter instance.
///
/// It receives the sub-stream one event at a time (the document start and end
/// events are not forwarded) and writes whatever it produces to `output`, which
/// splices it into the caller's current output.
pub trait FilterHandler {
    fn event(&mut self, event: &StxEvent, output: &mut dyn EventHandler) -> Result<(), FilterError>;

    /// Called once after the last event of the sub-stream.
    fn finish(&mut self, output: &mut dyn EventHandler) -> Result<(), FilterError>;
}

pub trait FilterResolver: Send + Sync {
    /// Returns `Ok(None)` when this resolver does not handle the URI.
    fn resolve(
        &self,
        request: &FilterRequest,
    ) -> Result<Option<Box<dyn FilterHandler>>, FilterError>;

    /// Cheap availability check backing `filter-available()`.
    fn available(&self, uri: &str) -> bool;
}

pub type FilterFactory =
    Arc<dyn Fn(&FilterRequest) -> Result<Box<dyn FilterHandler>, FilterError> + Send + Sync>;

/// A resolver backed by a table of factory closures keyed by capability URI.
#[derive(Clone, Default)]
pub struct FilterRegistry {
    factories: HashMap<String, FilterFactory>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, uri: impl Into<String>, factory: F)
    where
        F: Fn(&FilterRequest) -> Result<Box<dyn FilterHandler>, FilterError>
            + Send
            + Sync
            + 'static,
    {
        let uri = uri.into();
        log::debug!("Registering filter '{}'", uri);
        self.factories.insert(uri, Arc::new(factory));
    }

    pub fn with<F>(mut self, uri: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&FilterRequest) -> Result<Box<dyn FilterHandler>, FilterError>
            + Send
            + Sync
            + 'static,
    {
        self.register(uri, factory);
        self
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("uris", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilterResolver for FilterRegistry {
    fn resolve(
        &self,
        request: &FilterRequest,
    ) -> Result<Option<Box<dyn FilterHandler>>, FilterError> {
        match self.factories.get(&request.uri) {
            Some(factory) => factory(request).map(Some),
            None => Ok(None),
        }
    }

    fn available(&self, uri: &str) -> bool {
        self.factories.contains_key(uri)
    }
}
