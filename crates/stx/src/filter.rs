//! Resolution of `filter-method` URIs.
//!
//! The host resolver is asked first. When it declines, the STX namespace URI
//! runs another sheet, named by `filter-src`, over the sub-stream.

use crate::ast::STX_NAMESPACE;
use crate::compiler::compile_with_base;
use crate::config::{Capabilities, ProcessorConfig};
use crate::error::StxError;
use crate::executor::Runtime;
use crate::processor::Processor;
use strix_traits::{FilterError, FilterHandler, FilterRequest, ResourceError};
use strix_types::{EventError, EventHandler, StxEvent};

/// Backs `filter-available()`.
pub(crate) fn available(caps: &Capabilities, uri: &str) -> bool {
    uri == STX_NAMESPACE || caps.resolver.as_ref().is_some_and(|r| r.available(uri))
}

pub(crate) fn open(
    rt: &Runtime<'_>,
    request: &FilterRequest,
) -> Result<Box<dyn FilterHandler>, StxError> {
    if let Some(resolver) = &rt.caps.resolver {
        if let Some(handler) = resolver.resolve(request)? {
            return Ok(handler);
        }
    }
    if request.uri == STX_NAMESPACE {
        return Ok(Box::new(SheetFilter::open(rt, request)?));
    }
    Err(StxError::UnresolvedFilter {
        uri: request.uri.clone(),
    })
}

/// `filter-src` is either `url('...')` or a plain location.
fn source_location(src: &str) -> &str {
    let src = src.trim();
    src.strip_prefix("url(")
        .and_then(|rest| rest.strip_suffix(')'))
        .map(|inner| inner.trim().trim_matches(|c| c == '\'' || c == '"'))
        .unwrap_or(src)
}

/// Runs a nested sheet over the events handed to it. The sub-stream is
/// collected and transformed as one document when it ends.
struct SheetFilter {
    processor: Processor,
    events: Vec<StxEvent>,
}

impl SheetFilter {
    fn open(rt: &Runtime<'_>, request: &FilterRequest) -> Result<Self, StxError> {
        let src = request.src.as_deref().ok_or_else(|| {
            StxError::Filter(FilterError::InvalidRequest {
                uri: request.uri.clone(),
                message: "an STX filter needs filter-src".to_string(),
            })
        })?;
        let resources = rt
            .caps
            .resources
            .clone()
            .ok_or_else(|| ResourceError::NoProvider(src.to_string()))?;
        let location = resources.resolve(rt.sheet.base_uri(), source_location(src));
        log::debug!("Compiling filter sheet '{}'", location);
        let text = resources.load(&location)?;
        let sheet = compile_with_base(&text, Some(location.as_str()))?;

        let config = ProcessorConfig {
            params: request.params.iter().cloned().collect(),
            ..(*rt.config).clone()
        };
        let processor = Processor::new(sheet)
            .with_capabilities(rt.caps.clone())
            .with_config(config);
        Ok(SheetFilter {
            processor,
            events: Vec::new(),
        })
    }
}

impl FilterHandler for SheetFilter {
    fn event(
        &mut self,
        event: &StxEvent,
        _output: &mut dyn EventHandler,
    ) -> Result<(), FilterError> {
        self.events.push(event.clone());
        Ok(())
    }

    fn finish(&mut self, output: &mut dyn EventHandler) -> Result<(), FilterError> {
        let events = std::mem::take(&mut self.events);
        self.processor
            .transform_events(&events, output)
            .map_err(|e| FilterError::Event(EventError::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_location_forms() {
        assert_eq!(source_location("url('inner.stx')"), "inner.stx");
        assert_eq!(source_location(" url(\"a/b.stx\") "), "a/b.stx");
        assert_eq!(source_location("plain.stx"), "plain.stx");
    }

    #[test]
    fn test_stx_namespace_is_always_available() {
        let caps = Capabilities::new();
        assert!(available(&caps, STX_NAMESPACE));
        assert!(!available(&caps, "urn:x-unknown"));
    }
}
