use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strix_traits::{FilterResolver, MessageSink, ResourceProvider};

/// Settings for running a compiled sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Values for top-level `stx:param` declarations, by name.
    pub params: HashMap<String, String>,

    /// Report expression type errors instead of coercing to NaN.
    pub strict: bool,

    /// Drop whitespace-only text from the input before matching.
    pub strip_whitespace: bool,

    /// How deeply `stx:process-buffer` and `stx:process-doc` may nest.
    ///
    /// A buffer replay that processes a buffer again recurses; this bounds it.
    /// Defaults to `32`.
    pub max_replay_depth: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            params: HashMap::new(),
            strict: false,
            strip_whitespace: false,
            max_replay_depth: 32,
        }
    }
}

impl ProcessorConfig {
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// The optional collaborators a host provides. Fixed when a processor is built.
#[derive(Clone, Default)]
pub struct Capabilities {
    /// Consulted first for every `filter-method`.
    pub resolver: Option<Arc<dyn FilterResolver>>,
    /// Receives `stx:message` output. Without one, messages go to the `log` facade.
    pub messages: Option<Arc<dyn MessageSink>>,
    /// Loads documents for `stx:process-doc` and sheets for `filter-src`.
    pub resources: Option<Arc<dyn ResourceProvider>>,
    /// Set to abort running transformations at the next input event.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn FilterResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_messages(mut self, messages: Arc<dyn MessageSink>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("resolver", &self.resolver.is_some())
            .field("messages", &self.messages.is_some())
            .field("resources", &self.resources.as_ref().map(|r| r.name()))
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_partial_json() {
        let config: ProcessorConfig =
            serde_json::from_str(r#"{ "params": { "title": "Report" }, "strict": true }"#).unwrap();
        assert_eq!(config.params.get("title").map(String::as_str), Some("Report"));
        assert!(config.strict);
        assert!(!config.strip_whitespace);
        assert_eq!(config.max_replay_depth, 32);
    }

    #[test]
    fn test_cancel_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let caps = Capabilities::new().with_cancel(flag.clone());
        assert!(!caps.is_cancelled());
        flag.store(true, Ordering::Relaxed);
        assert!(caps.is_cancelled());
        assert!(!Capabilities::default().is_cancelled());
    }
}
