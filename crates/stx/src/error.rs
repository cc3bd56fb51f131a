use strix_stxpath::ExprError;
use strix_traits::{FilterError, ResourceError};
use strix_types::EventError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

impl From<(usize, usize)> for Location {
    fn from((line, col): (usize, usize)) -> Self {
        Location { line, col }
    }
}

impl Location {
    /// Converts a byte offset into `source` to a 1-based line and column.
    pub fn from_offset(source: &str, pos: usize) -> Self {
        let prefix = &source[..pos.min(source.len())];
        let line = prefix.matches('\n').count() + 1;
        let col = prefix.rfind('\n').map_or(pos + 1, |nl| pos - nl);
        Location { line, col }
    }
}

#[derive(Error, Debug)]
pub enum StxError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Expression error in '{expr}': {source}")]
    Expr {
        expr: String,
        #[source]
        source: ExprError,
    },

    #[error("Sheet error at {location}: {message}")]
    Compile { message: String, location: Location },

    #[error(
        "Ambiguous match for {node}: '{first}' ({first_location}) and '{second}' ({second_location}) have the same precedence"
    )]
    AmbiguousMatch {
        node: String,
        first: String,
        first_location: Location,
        second: String,
        second_location: Location,
    },

    #[error("No buffer named '{name}' is in scope at {path}")]
    UnknownBuffer { name: String, path: String },

    #[error("No filter is available for '{uri}'")]
    UnresolvedFilter { uri: String },

    #[error("Execution error at {path}: {message}")]
    Execution { path: String, message: String },

    #[error("Buffer replay nested deeper than {0} levels")]
    ReplayDepth(usize),

    #[error("Transformation cancelled")]
    Cancelled,

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("Event sink error: {0}")]
    Event(EventError),

    #[error("UTF-8 string error: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

impl StxError {
    pub fn compile(message: impl Into<String>, location: Location) -> Self {
        StxError::Compile {
            message: message.into(),
            location,
        }
    }

    pub fn execution(path: impl Into<String>, message: impl Into<String>) -> Self {
        StxError::Execution {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn expr(expr: &str, source: ExprError) -> Self {
        StxError::Expr {
            expr: expr.to_string(),
            source,
        }
    }
}

impl From<quick_xml::events::attributes::AttrError> for StxError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        StxError::Xml(quick_xml::Error::InvalidAttr(e))
    }
}

impl From<quick_xml::escape::EscapeError> for StxError {
    fn from(e: quick_xml::escape::EscapeError) -> Self {
        StxError::Xml(quick_xml::Error::Escape(e))
    }
}

/// Unwraps engine errors that travelled through a chain of event handlers.
impl From<EventError> for StxError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::Transform(inner) => match inner.downcast::<StxError>() {
                Ok(stx) => *stx,
                Err(other) => StxError::Event(EventError::Transform(other)),
            },
            other => StxError::Event(other),
        }
    }
}

impl From<StxError> for EventError {
    fn from(e: StxError) -> Self {
        match e {
            StxError::Event(inner) => inner,
            other => EventError::Transform(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_from_offset() {
        let source = "<a>\n  <b/>\n</a>";
        assert_eq!(Location::from_offset(source, 0), Location { line: 1, col: 1 });
        assert_eq!(Location::from_offset(source, 6), Location { line: 2, col: 3 });
    }

    #[test]
    fn test_engine_error_survives_handler_chain() {
        let original = StxError::UnknownBuffer {
            name: "b".into(),
            path: "/doc".into(),
        };
        let tunnelled: EventError = original.into();
        match StxError::from(tunnelled) {
            StxError::UnknownBuffer { name, .. } => assert_eq!(name, "b"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sink_errors_stay_sink_errors() {
        let err: StxError = EventError::sink("disk full").into();
        assert!(matches!(err, StxError::Event(EventError::Sink(_))));
        let back: EventError = err.into();
        assert!(matches!(back, EventError::Sink(_)));
    }
}
