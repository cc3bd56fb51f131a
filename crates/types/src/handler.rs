use crate::event::StxEvent;
use crate::name::{Attribute, QName};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Output sink error: {0}")]
    Sink(String),

    #[error("Malformed event stream: {0}")]
    Malformed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A downstream transformation failed; the boxed error is the original one.
    #[error(transparent)]
    Transform(Box<dyn std::error::Error + Send + Sync>),
}

impl EventError {
    pub fn sink(msg: impl Into<String>) -> Self {
        EventError::Sink(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        EventError::Malformed(msg.into())
    }
}

/// Receives a document as a sequence of parse events.
///
/// Sources drive it, transformers implement it, serializers terminate it.
/// Handlers compose: a transformer's downstream is just another handler.
pub trait EventHandler {
    fn start_document(&mut self) -> Result<(), EventError>;
    fn end_document(&mut self) -> Result<(), EventError>;

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError>;
    fn end_element(&mut self, name: &QName) -> Result<(), EventError>;

    fn characters(&mut self, text: &str) -> Result<(), EventError>;
    fn comment(&mut self, text: &str) -> Result<(), EventError>;
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError>;

    /// Dispatches a recorded event to the matching callback.
    fn event(&mut self, event: &StxEvent) -> Result<(), EventError> {
        match event {
            StxEvent::StartDocument => self.start_document(),
            StxEvent::EndDocument => self.end_document(),
            StxEvent::StartElement { name, attributes } => self.start_element(name, attributes),
            StxEvent::EndElement { name } => self.end_element(name),
            StxEvent::Characters(text) => self.characters(text),
            StxEvent::Comment(text) => self.comment(text),
            StxEvent::ProcessingInstruction { target, data } => {
                self.processing_instruction(target, data)
            }
        }
    }
}

impl<H: EventHandler + ?Sized> EventHandler for &mut H {
    fn start_document(&mut self) -> Result<(), EventError> {
        (**self).start_document()
    }
    fn end_document(&mut self) -> Result<(), EventError> {
        (**self).end_document()
    }
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError> {
        (**self).start_element(name, attributes)
    }
    fn end_element(&mut self, name: &QName) -> Result<(), EventError> {
        (**self).end_element(name)
    }
    fn characters(&mut self, text: &str) -> Result<(), EventError> {
        (**self).characters(text)
    }
    fn comment(&mut self, text: &str) -> Result<(), EventError> {
        (**self).comment(text)
    }
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError> {
        (**self).processing_instruction(target, data)
    }
}

impl<H: EventHandler + ?Sized> EventHandler for Box<H> {
    fn start_document(&mut self) -> Result<(), EventError> {
        (**self).start_document()
    }
    fn end_document(&mut self) -> Result<(), EventError> {
        (**self).end_document()
    }
    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError> {
        (**self).start_element(name, attributes)
    }
    fn end_element(&mut self, name: &QName) -> Result<(), EventError> {
        (**self).end_element(name)
    }
    fn characters(&mut self, text: &str) -> Result<(), EventError> {
        (**self).characters(text)
    }
    fn comment(&mut self, text: &str) -> Result<(), EventError> {
        (**self).comment(text)
    }
    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError> {
        (**self).processing_instruction(target, data)
    }
}

/// A handler that keeps every event it receives.
///
/// Adjacent character events are merged so recordings compare independently of
/// how a producer chunked its text.
#[derive(Debug, Default, Clone)]
pub struct EventRecorder {
    events: Vec<StxEvent>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[StxEvent] {
        &self.events
    }

    pub fn into_events(self) -> Vec<StxEvent> {
        self.events
    }

    /// Concatenated character content of the recording.
    pub fn text(&self) -> String {
        self.events
            .iter()
            .filter_map(|e| match e {
                StxEvent::Characters(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for EventRecorder {
    fn start_document(&mut self) -> Result<(), EventError> {
        self.events.push(StxEvent::StartDocument);
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), EventError> {
        self.events.push(StxEvent::EndDocument);
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError> {
        self.events
            .push(StxEvent::start_element(name.clone(), attributes.to_vec()));
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<(), EventError> {
        self.events.push(StxEvent::end_element(name.clone()));
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), EventError> {
        if text.is_empty() {
            return Ok(());
        }
        if let Some(StxEvent::Characters(last)) = self.events.last_mut() {
            last.push_str(text);
        } else {
            self.events.push(StxEvent::text(text));
        }
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), EventError> {
        self.events.push(StxEvent::Comment(text.to_string()));
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError> {
        self.events.push(StxEvent::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_merges_adjacent_text() {
        let mut recorder = EventRecorder::new();
        recorder.start_element(&QName::new("p"), &[]).unwrap();
        recorder.characters("a").unwrap();
        recorder.characters("").unwrap();
        recorder.characters("b").unwrap();
        recorder.end_element(&QName::new("p")).unwrap();

        assert_eq!(recorder.events().len(), 3);
        assert_eq!(recorder.text(), "ab");
    }

    #[test]
    fn test_dispatch_through_boxed_handler() {
        let mut recorder = EventRecorder::new();
        {
            let mut boxed: Box<dyn EventHandler + '_> = Box::new(&mut recorder);
            boxed.event(&StxEvent::StartDocument).unwrap();
            boxed
                .event(&StxEvent::ProcessingInstruction {
                    target: "pi".into(),
                    data: "x".into(),
                })
                .unwrap();
            boxed.event(&StxEvent::EndDocument).unwrap();
        }
        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn test_recording_serializes_as_json() {
        let mut recorder = EventRecorder::new();
        recorder
            .start_element(
                &QName::new("item"),
                &[Attribute::new(QName::new("id"), "7")],
            )
            .unwrap();
        let json = serde_json::to_string(recorder.events()).unwrap();
        assert!(json.contains("\"local_name\":\"item\""));
        let back: Vec<StxEvent> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, recorder.into_events());
    }
}
