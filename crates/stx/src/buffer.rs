//! Named event buffers.
//!
//! A buffer records output events and can be replayed as input later. Template
//! level buffers are transient and owned by one activation. Group level buffers
//! are persistent: they belong to the shared sheet, so every access goes through
//! a mutex, and their contents survive from one document to the next.
//!
//! Contents are copy-on-write. A replay takes a snapshot, so appending to a
//! buffer while it is being replayed never disturbs the replay.

use crate::error::StxError;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use strix_types::StxEvent;

#[derive(Debug, Clone, Default)]
pub struct Buffer {
    events: Arc<Vec<StxEvent>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<StxEvent>) -> Self {
        Buffer {
            events: Arc::new(events),
        }
    }

    /// Adjacent character data is merged, so a run of text is one node however
    /// many instructions produced it.
    pub fn append(&mut self, events: impl IntoIterator<Item = StxEvent>) {
        let stored = Arc::make_mut(&mut self.events);
        for event in events {
            match (stored.last_mut(), event) {
                (Some(StxEvent::Characters(last)), StxEvent::Characters(text)) => {
                    last.push_str(&text)
                }
                (_, event) => stored.push(event),
            }
        }
    }

    pub fn clear(&mut self) {
        self.events = Arc::new(Vec::new());
    }

    /// The current contents. Later appends do not show up in the snapshot.
    pub fn snapshot(&self) -> Arc<Vec<StxEvent>> {
        self.events.clone()
    }

    pub fn events(&self) -> &[StxEvent] {
        &self.events
    }

    /// Number of top-level nodes recorded.
    pub fn len(&self) -> usize {
        let mut depth = 0usize;
        let mut count = 0;
        for event in self.events.iter() {
            match event {
                StxEvent::StartElement { .. } => {
                    if depth == 0 {
                        count += 1;
                    }
                    depth += 1;
                }
                StxEvent::EndElement { .. } => depth = depth.saturating_sub(1),
                StxEvent::Characters(_)
                | StxEvent::Comment(_)
                | StxEvent::ProcessingInstruction { .. }
                    if depth == 0 =>
                {
                    count += 1
                }
                _ => {}
            }
        }
        count
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A group buffer shared by all transformations of one sheet.
pub type SharedBuffer = Arc<Mutex<Buffer>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferScope {
    Transient,
    Persistent,
}

/// A buffer as seen by a running transformation.
#[derive(Debug, Clone)]
pub enum BufferHandle {
    Transient(Rc<RefCell<Buffer>>),
    Persistent(SharedBuffer),
}

impl BufferHandle {
    pub fn transient() -> Self {
        BufferHandle::Transient(Rc::new(RefCell::new(Buffer::new())))
    }

    pub fn scope(&self) -> BufferScope {
        match self {
            BufferHandle::Transient(_) => BufferScope::Transient,
            BufferHandle::Persistent(_) => BufferScope::Persistent,
        }
    }

    pub fn snapshot(&self, name: &str) -> Result<Arc<Vec<StxEvent>>, StxError> {
        match self {
            BufferHandle::Transient(buffer) => Ok(buffer.borrow().snapshot()),
            BufferHandle::Persistent(shared) => shared
                .lock()
                .map(|b| b.snapshot())
                .map_err(|_| poisoned(name)),
        }
    }

    /// Appends staged events in one step; `clear` empties the buffer first.
    pub fn commit(&self, name: &str, events: Vec<StxEvent>, clear: bool) -> Result<(), StxError> {
        let apply = |buffer: &mut Buffer| {
            if clear {
                buffer.clear();
            }
            buffer.append(events);
        };
        match self {
            BufferHandle::Transient(buffer) => {
                apply(&mut buffer.borrow_mut());
                Ok(())
            }
            BufferHandle::Persistent(shared) => {
                let mut buffer = shared.lock().map_err(|_| poisoned(name))?;
                apply(&mut buffer);
                Ok(())
            }
        }
    }

    pub fn size(&self, name: &str) -> Result<usize, StxError> {
        match self {
            BufferHandle::Transient(buffer) => Ok(buffer.borrow().len()),
            BufferHandle::Persistent(shared) => {
                shared.lock().map(|b| b.len()).map_err(|_| poisoned(name))
            }
        }
    }
}

fn poisoned(name: &str) -> StxError {
    StxError::execution(
        format!("buffer '{}'", name),
        "buffer lock poisoned by a failed transformation",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use strix_types::QName;

    fn element(name: &str) -> Vec<StxEvent> {
        vec![
            StxEvent::start_element(QName::new(name), vec![]),
            StxEvent::text("x"),
            StxEvent::end_element(QName::new(name)),
        ]
    }

    #[test]
    fn test_counts_top_level_nodes() {
        let mut buffer = Buffer::new();
        buffer.append(element("a"));
        buffer.append([StxEvent::text("tail")]);
        buffer.append(element("b"));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_adjacent_text_is_one_node() {
        let mut buffer = Buffer::new();
        buffer.append([StxEvent::text("a"), StxEvent::text("b")]);
        buffer.append([StxEvent::text("c")]);
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.events(), &[StxEvent::text("abc")]);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_appends() {
        let handle = BufferHandle::transient();
        handle.commit("b", element("a"), false).unwrap();
        let snapshot = handle.snapshot("b").unwrap();
        handle.commit("b", element("c"), false).unwrap();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(handle.size("b").unwrap(), 2);
    }

    #[test]
    fn test_clear_on_commit() {
        let shared: SharedBuffer = Arc::new(Mutex::new(Buffer::with_events(element("old"))));
        let handle = BufferHandle::Persistent(shared.clone());
        handle.commit("b", element("new"), true).unwrap();
        assert_eq!(handle.scope(), BufferScope::Persistent);
        let events = shared.lock().unwrap().snapshot();
        assert_eq!(events[0], StxEvent::start_element(QName::new("new"), vec![]));
        assert_eq!(events.len(), 3);
    }
}
