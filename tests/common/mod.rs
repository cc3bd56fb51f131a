#![allow(dead_code)]

use strix::{EventRecorder, Processor, StxError, StxEvent};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Wraps template declarations in an `stx:transform` element.
pub fn sheet(body: &str) -> String {
    sheet_with(r#"version="1.0""#, body)
}

/// Like [`sheet`], with extra attributes on `stx:transform`.
pub fn sheet_with(attributes: &str, body: &str) -> String {
    format!(
        r#"<stx:transform xmlns:stx="http://stx.sourceforge.net/2002/ns" {}>{}</stx:transform>"#,
        attributes, body
    )
}

/// Compiles `sheet_source`, transforms `input` and serializes the result.
pub fn transform(sheet_source: &str, input: &str) -> Result<String, StxError> {
    init_logging();
    Processor::compile(sheet_source)?.transform_str(input)
}

/// Transforms into an event recorder. The recorder is returned even when the
/// transformation fails, with whatever reached it.
pub fn record(processor: &Processor, input: &str) -> (Vec<StxEvent>, Result<(), StxError>) {
    init_logging();
    let mut recorder = EventRecorder::new();
    let result = processor.transform_to(input, &mut recorder);
    (recorder.into_events(), result)
}

/// Local names of the started elements, in output order.
pub fn element_names(events: &[StxEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            StxEvent::StartElement { name, .. } => Some(name.local_name.clone()),
            _ => None,
        })
        .collect()
}
