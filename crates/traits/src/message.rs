use std::sync::Mutex;

/// Destination of `stx:message` output. Never the primary result stream.
pub trait MessageSink: Send + Sync {
    fn message(&self, text: &str);
}

/// Routes messages to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMessageSink;

impl MessageSink for LogMessageSink {
    fn message(&self, text: &str) {
        log::info!(target: "strix::message", "{}", text);
    }
}

/// Keeps every message, for hosts that want to inspect them afterwards.
#[derive(Debug, Default)]
pub struct CollectingMessageSink {
    messages: Mutex<Vec<String>>,
}

impl CollectingMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the messages seen so far. Empty if the lock is poisoned.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl MessageSink for CollectingMessageSink {
    fn message(&self, text: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(text.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingMessageSink::new();
        sink.message("first");
        sink.message("second");
        assert_eq!(sink.messages(), vec!["first", "second"]);
    }
}
