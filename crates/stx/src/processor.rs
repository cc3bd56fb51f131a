//! The entry points for running a compiled sheet.
//!
//! A [`Processor`] is cheap to clone and can be shared between threads. Each
//! transformation gets its own [`Transformer`], which is an [`EventHandler`]:
//! it can sit behind any event source and in front of any sink.

use crate::ast::Sheet;
use crate::compiler;
use crate::config::{Capabilities, ProcessorConfig};
use crate::error::StxError;
use crate::executor::Runtime;
use crate::output::Emitter;
use crate::source;
use crate::traversal::Traversal;
use crate::writer::XmlWriter;
use std::sync::Arc;
use strix_types::{Attribute, EventError, EventHandler, QName, StxEvent};

#[derive(Debug, Clone)]
pub struct Processor {
    sheet: Arc<Sheet>,
    config: Arc<ProcessorConfig>,
    capabilities: Capabilities,
}

impl Processor {
    pub fn new(sheet: impl Into<Arc<Sheet>>) -> Self {
        Processor {
            sheet: sheet.into(),
            config: Arc::new(ProcessorConfig::default()),
            capabilities: Capabilities::default(),
        }
    }

    /// Compiles `source` and wraps the result.
    pub fn compile(source: &str) -> Result<Self, StxError> {
        Ok(Self::new(compiler::compile(source)?))
    }

    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        for name in config.params.keys() {
            if !self.sheet.params().iter().any(|p| &p.name == name) {
                log::warn!("Parameter '{}' is not declared by the sheet and will be ignored", name);
            }
        }
        self.config = Arc::new(config);
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !self.sheet.params().iter().any(|p| p.name == name) {
            log::warn!("Parameter '{}' is not declared by the sheet and will be ignored", name);
        }
        Arc::make_mut(&mut self.config).params.insert(name, value.into());
        self
    }

    pub fn sheet(&self) -> &Arc<Sheet> {
        &self.sheet
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Starts a transformation whose output goes to `downstream`.
    pub fn transformer<'h>(&self, downstream: impl EventHandler + 'h) -> Transformer<'h> {
        let emitter = Emitter::new(Box::new(downstream));
        Transformer {
            runtime: Runtime::new(
                self.sheet.clone(),
                self.config.clone(),
                self.capabilities.clone(),
                emitter,
            ),
            traversal: Traversal::new(),
        }
    }

    /// Parses `xml`, transforms it and sends the result to `handler`.
    pub fn transform_to(&self, xml: &str, handler: &mut dyn EventHandler) -> Result<(), StxError> {
        let mut transformer = self.transformer(handler);
        source::parse(xml, &mut transformer, false)
    }

    /// Transforms `xml` and serializes the result.
    pub fn transform_str(&self, xml: &str) -> Result<String, StxError> {
        let mut writer = XmlWriter::new();
        self.transform_to(xml, &mut writer)?;
        Ok(writer.into_string())
    }

    /// Transforms recorded events as one document. Document boundaries in
    /// `events` are ignored; the transformation supplies its own.
    pub fn transform_events(
        &self,
        events: &[StxEvent],
        handler: &mut dyn EventHandler,
    ) -> Result<(), StxError> {
        let mut transformer = self.transformer(handler);
        transformer.start_document()?;
        for event in events {
            if !matches!(event, StxEvent::StartDocument | StxEvent::EndDocument) {
                transformer.event(event)?;
            }
        }
        transformer.end_document()?;
        Ok(())
    }
}

/// One running transformation.
///
/// Engine errors are returned as [`EventError::Transform`]; converting back
/// with `StxError::from` recovers them.
pub struct Transformer<'h> {
    runtime: Runtime<'h>,
    traversal: Traversal,
}

impl Transformer<'_> {
    fn check_cancelled(&self) -> Result<(), StxError> {
        if self.runtime.caps.is_cancelled() {
            log::debug!("Transformation cancelled");
            return Err(StxError::Cancelled);
        }
        Ok(())
    }
}

impl EventHandler for Transformer<'_> {
    fn start_document(&mut self) -> Result<(), EventError> {
        self.check_cancelled()?;
        Ok(self.traversal.start_document(&mut self.runtime)?)
    }

    fn end_document(&mut self) -> Result<(), EventError> {
        self.check_cancelled()?;
        Ok(self.traversal.end_document(&mut self.runtime)?)
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError> {
        self.check_cancelled()?;
        Ok(self
            .traversal
            .start_element(&mut self.runtime, name, attributes)?)
    }

    fn end_element(&mut self, name: &QName) -> Result<(), EventError> {
        self.check_cancelled()?;
        Ok(self.traversal.end_element(&mut self.runtime, name)?)
    }

    fn characters(&mut self, text: &str) -> Result<(), EventError> {
        self.check_cancelled()?;
        self.traversal.characters(text);
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), EventError> {
        self.check_cancelled()?;
        Ok(self.traversal.comment(&mut self.runtime, text)?)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError> {
        self.check_cancelled()?;
        Ok(self
            .traversal
            .processing_instruction(&mut self.runtime, target, data)?)
    }
}
