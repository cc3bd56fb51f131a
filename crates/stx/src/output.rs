//! The result side of a transformation.
//!
//! Start tags are held back until the first non-attribute output so that
//! `stx:attribute` can still add to them. Output goes to the innermost active
//! target: a text capture, a buffer redirect, or the downstream handler. Buffer
//! redirects are staged and committed in one step when they end.
//!
//! A document without any output produces no events at all downstream, not even
//! its start and end.

use crate::buffer::BufferHandle;
use crate::error::StxError;
use strix_types::{Attribute, EventError, EventHandler, QName, StxEvent};

struct PendingStart {
    name: QName,
    attributes: Vec<Attribute>,
}

struct Redirect {
    name: String,
    target: BufferHandle,
    staged: Vec<StxEvent>,
    clear: bool,
}

pub(crate) struct Emitter<'h> {
    downstream: Box<dyn EventHandler + 'h>,
    pending: Option<PendingStart>,
    /// Open elements per target; index 0 is the downstream handler.
    open: Vec<Vec<QName>>,
    redirects: Vec<Redirect>,
    captures: Vec<String>,
    /// The downstream document is opened with the first event that reaches it.
    document: DocumentState,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DocumentState {
    Idle,
    Pending,
    Open,
}

fn output_error(message: impl Into<String>) -> StxError {
    StxError::execution("output", message)
}

impl<'h> Emitter<'h> {
    pub fn new(downstream: Box<dyn EventHandler + 'h>) -> Self {
        Emitter {
            downstream,
            pending: None,
            open: vec![Vec::new()],
            redirects: Vec::new(),
            captures: Vec::new(),
            document: DocumentState::Idle,
        }
    }

    fn write(&mut self, event: StxEvent) -> Result<(), StxError> {
        match self.redirects.last_mut() {
            Some(redirect) => {
                redirect.staged.push(event);
                Ok(())
            }
            None => {
                if self.document == DocumentState::Pending {
                    self.downstream.start_document()?;
                    self.document = DocumentState::Open;
                }
                Ok(self.downstream.event(&event)?)
            }
        }
    }

    fn flush_pending(&mut self) -> Result<(), StxError> {
        match self.pending.take() {
            Some(start) => self.write(StxEvent::StartElement {
                name: start.name,
                attributes: start.attributes,
            }),
            None => Ok(()),
        }
    }

    fn refuse_in_capture(&self, what: &str) -> Result<(), StxError> {
        if self.captures.is_empty() {
            Ok(())
        } else {
            Err(output_error(format!("{} not allowed in text content", what)))
        }
    }

    pub fn start_document(&mut self) -> Result<(), StxError> {
        self.document = DocumentState::Pending;
        Ok(())
    }

    pub fn end_document(&mut self) -> Result<(), StxError> {
        self.flush_pending()?;
        if let Some(name) = self.open.first().and_then(|o| o.last()) {
            return Err(output_error(format!(
                "element '{}' is still open at the end of the document",
                name
            )));
        }
        let opened = self.document == DocumentState::Open;
        self.document = DocumentState::Idle;
        if opened {
            self.downstream.end_document()?;
        }
        Ok(())
    }

    pub fn start_element(
        &mut self,
        name: QName,
        attributes: Vec<Attribute>,
    ) -> Result<(), StxError> {
        self.refuse_in_capture("elements are")?;
        self.flush_pending()?;
        if let Some(open) = self.open.last_mut() {
            open.push(name.clone());
        }
        self.pending = Some(PendingStart { name, attributes });
        Ok(())
    }

    /// Adds an attribute to the start tag still being written. A later value for
    /// the same name replaces the earlier one.
    pub fn attribute(&mut self, name: QName, value: String) -> Result<(), StxError> {
        self.refuse_in_capture("attributes are")?;
        let start = self.pending.as_mut().ok_or_else(|| {
            output_error(format!(
                "attribute '{}' must be written directly after a start tag",
                name
            ))
        })?;
        match start.attributes.iter_mut().find(|a| a.name == name) {
            Some(existing) => existing.value = value,
            None => start.attributes.push(Attribute::new(name, value)),
        }
        Ok(())
    }

    pub fn has_open_start_tag(&self) -> bool {
        self.pending.is_some() && self.captures.is_empty()
    }

    /// Closes the innermost open element of the current target, checking its
    /// name when one is given.
    pub fn end_element(&mut self, expected: Option<&QName>) -> Result<(), StxError> {
        self.refuse_in_capture("elements are")?;
        self.flush_pending()?;
        let open = self
            .open
            .last_mut()
            .filter(|o| !o.is_empty())
            .ok_or_else(|| output_error("end of an element that was never started"))?;
        if let (Some(expected), Some(name)) = (expected, open.last()) {
            if expected != name {
                return Err(output_error(format!(
                    "cannot end element '{}' while '{}' is open",
                    expected, name
                )));
            }
        }
        let name = open
            .pop()
            .ok_or_else(|| output_error("end of an element that was never started"))?;
        self.write(StxEvent::EndElement { name })
    }

    pub fn characters(&mut self, text: &str) -> Result<(), StxError> {
        if let Some(capture) = self.captures.last_mut() {
            capture.push_str(text);
            return Ok(());
        }
        if text.is_empty() {
            return Ok(());
        }
        self.flush_pending()?;
        self.write(StxEvent::Characters(text.to_string()))
    }

    /// Comments and processing instructions have no text value; captures drop them.
    pub fn comment(&mut self, text: &str) -> Result<(), StxError> {
        if !self.captures.is_empty() {
            return Ok(());
        }
        self.flush_pending()?;
        self.write(StxEvent::Comment(text.to_string()))
    }

    pub fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), StxError> {
        if !self.captures.is_empty() {
            return Ok(());
        }
        self.flush_pending()?;
        self.write(StxEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        })
    }

    pub fn begin_capture(&mut self) {
        self.captures.push(String::new());
    }

    pub fn end_capture(&mut self) -> Result<String, StxError> {
        self.captures
            .pop()
            .ok_or_else(|| output_error("no text capture is active"))
    }

    pub fn begin_redirect(
        &mut self,
        name: &str,
        target: BufferHandle,
        clear: bool,
    ) -> Result<(), StxError> {
        self.refuse_in_capture("buffers are")?;
        self.flush_pending()?;
        log::trace!("Redirecting output into buffer '{}'", name);
        self.redirects.push(Redirect {
            name: name.to_string(),
            target,
            staged: Vec::new(),
            clear,
        });
        self.open.push(Vec::new());
        Ok(())
    }

    pub fn end_redirect(&mut self) -> Result<(), StxError> {
        self.flush_pending()?;
        let redirect = self
            .redirects
            .pop()
            .ok_or_else(|| output_error("no buffer redirect is active"))?;
        if let Some(open) = self.open.pop() {
            if let Some(name) = open.last() {
                return Err(output_error(format!(
                    "element '{}' is still open at the end of buffer '{}'",
                    name, redirect.name
                )));
            }
        }
        log::trace!(
            "Committing {} event(s) to buffer '{}'",
            redirect.staged.len(),
            redirect.name
        );
        redirect
            .target
            .commit(&redirect.name, redirect.staged, redirect.clear)
    }

    /// An event handler that writes into the current target, for filter output.
    pub fn splice(&mut self) -> Splice<'_, 'h> {
        Splice { emitter: self }
    }
}

/// Forwards filter output into an [`Emitter`], dropping document boundaries.
pub(crate) struct Splice<'a, 'h> {
    emitter: &'a mut Emitter<'h>,
}

impl EventHandler for Splice<'_, '_> {
    fn start_document(&mut self) -> Result<(), EventError> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), EventError> {
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError> {
        Ok(self.emitter.start_element(name.clone(), attributes.to_vec())?)
    }

    fn end_element(&mut self, name: &QName) -> Result<(), EventError> {
        Ok(self.emitter.end_element(Some(name))?)
    }

    fn characters(&mut self, text: &str) -> Result<(), EventError> {
        Ok(self.emitter.characters(text)?)
    }

    fn comment(&mut self, text: &str) -> Result<(), EventError> {
        Ok(self.emitter.comment(text)?)
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError> {
        Ok(self.emitter.processing_instruction(target, data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_types::EventRecorder;

    fn q(name: &str) -> QName {
        QName::new(name)
    }

    #[test]
    fn test_attributes_join_the_pending_start_tag() {
        let mut recorder = EventRecorder::new();
        {
            let mut emitter = Emitter::new(Box::new(&mut recorder));
            emitter.start_element(q("a"), vec![]).unwrap();
            emitter.attribute(q("x"), "1".into()).unwrap();
            emitter.attribute(q("x"), "2".into()).unwrap();
            emitter.characters("t").unwrap();
            assert!(emitter.attribute(q("y"), "late".into()).is_err());
            emitter.end_element(None).unwrap();
        }
        assert_eq!(
            recorder.events()[0],
            StxEvent::start_element(q("a"), vec![Attribute::new(q("x"), "2")])
        );
        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn test_mismatched_end_is_rejected() {
        let mut recorder = EventRecorder::new();
        let mut emitter = Emitter::new(Box::new(&mut recorder));
        emitter.start_element(q("a"), vec![]).unwrap();
        assert!(emitter.end_element(Some(&q("b"))).is_err());
        assert!(emitter.end_element(Some(&q("a"))).is_ok());
        assert!(emitter.end_element(None).is_err());
    }

    #[test]
    fn test_redirect_stages_until_commit() {
        let mut recorder = EventRecorder::new();
        let buffer = BufferHandle::transient();
        {
            let mut emitter = Emitter::new(Box::new(&mut recorder));
            emitter.begin_redirect("b", buffer.clone(), false).unwrap();
            emitter.start_element(q("kept"), vec![]).unwrap();
            emitter.end_element(None).unwrap();
            assert_eq!(buffer.size("b").unwrap(), 0);
            emitter.end_redirect().unwrap();
            emitter.characters("after").unwrap();
        }
        assert_eq!(buffer.size("b").unwrap(), 1);
        assert_eq!(recorder.text(), "after");
        assert_eq!(recorder.events().len(), 1);
    }

    #[test]
    fn test_capture_collects_text_only() {
        let mut recorder = EventRecorder::new();
        let mut emitter = Emitter::new(Box::new(&mut recorder));
        emitter.begin_capture();
        emitter.characters("a").unwrap();
        emitter.comment("dropped").unwrap();
        emitter.characters("b").unwrap();
        assert!(emitter.start_element(q("x"), vec![]).is_err());
        assert_eq!(emitter.end_capture().unwrap(), "ab");
    }

    #[test]
    fn test_unclosed_element_fails_the_document() {
        let mut recorder = EventRecorder::new();
        let mut emitter = Emitter::new(Box::new(&mut recorder));
        emitter.start_document().unwrap();
        emitter.start_element(q("a"), vec![]).unwrap();
        assert!(emitter.end_document().is_err());
    }

    #[test]
    fn test_document_opens_with_first_output() {
        let mut recorder = EventRecorder::new();
        {
            let mut emitter = Emitter::new(Box::new(&mut recorder));
            emitter.start_document().unwrap();
            emitter.end_document().unwrap();
        }
        assert!(recorder.events().is_empty());

        let mut recorder = EventRecorder::new();
        {
            let mut emitter = Emitter::new(Box::new(&mut recorder));
            emitter.start_document().unwrap();
            emitter.characters("x").unwrap();
            emitter.end_document().unwrap();
        }
        assert_eq!(
            recorder.events(),
            &[StxEvent::StartDocument, StxEvent::text("x"), StxEvent::EndDocument]
        );
    }
}
