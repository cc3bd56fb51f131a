//! Turns XML text into input events.
//!
//! Names are namespace-resolved before they reach a handler, and namespace
//! declarations are not reported as attributes. Adjacent character data is
//! delivered as one `characters` call.

use crate::error::StxError;
use crate::util::{
    NamespaceScopes, get_owned_attributes, is_namespace_declaration, is_whitespace, raw_name,
    resolve_reference,
};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};
use std::str::from_utf8;
use strix_types::{Attribute, EventHandler, EventRecorder, QName, StxEvent};

/// Streams the document in `xml` into `handler`, start and end of document included.
pub fn parse(
    xml: &str,
    handler: &mut dyn EventHandler,
    strip_whitespace: bool,
) -> Result<(), StxError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut scopes = NamespaceScopes::new();
    let mut text = String::new();

    handler.start_document()?;
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                flush_text(&mut text, handler, strip_whitespace)?;
                let (name, attributes) = open_element(&e, &mut scopes)?;
                handler.start_element(&name, &attributes)?;
            }
            Event::Empty(e) => {
                flush_text(&mut text, handler, strip_whitespace)?;
                let (name, attributes) = open_element(&e, &mut scopes)?;
                handler.start_element(&name, &attributes)?;
                handler.end_element(&name)?;
                scopes.pop();
            }
            Event::End(e) => {
                flush_text(&mut text, handler, strip_whitespace)?;
                let name = scopes
                    .element_name(&raw_name(e.name().as_ref())?)
                    .map_err(|e| StxError::execution("input", e.to_string()))?;
                handler.end_element(&name)?;
                scopes.pop();
            }
            Event::Text(e) => text.push_str(&unescape(from_utf8(e.as_ref())?)?),
            Event::CData(e) => text.push_str(from_utf8(e.as_ref())?),
            Event::GeneralRef(r) => text.push_str(&resolve_reference(&r)?),
            Event::Comment(e) => {
                flush_text(&mut text, handler, strip_whitespace)?;
                handler.comment(from_utf8(e.as_ref())?)?;
            }
            Event::PI(e) => {
                flush_text(&mut text, handler, strip_whitespace)?;
                let target = from_utf8(e.target())?;
                let data = from_utf8(e.content())?.trim_start();
                handler.processing_instruction(target, data)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    flush_text(&mut text, handler, strip_whitespace)?;
    handler.end_document()?;
    Ok(())
}

/// Reads a whole document into memory, for `stx:process-doc`.
pub fn read_events(xml: &str, strip_whitespace: bool) -> Result<Vec<StxEvent>, StxError> {
    let mut recorder = EventRecorder::new();
    parse(xml, &mut recorder, strip_whitespace)?;
    Ok(recorder.into_events())
}

fn open_element(
    e: &BytesStart,
    scopes: &mut NamespaceScopes,
) -> Result<(QName, Vec<Attribute>), StxError> {
    let raw = get_owned_attributes(e)?;
    scopes.push(&raw);
    let unresolved = |e: strix_stxpath::ExprError| StxError::execution("input", e.to_string());
    let name = scopes
        .element_name(&raw_name(e.name().as_ref())?)
        .map_err(unresolved)?;
    let mut attributes = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        if is_namespace_declaration(&key) {
            continue;
        }
        let attr_name = scopes.attribute_name(&key).map_err(unresolved)?;
        attributes.push(Attribute::new(attr_name, value));
    }
    Ok((name, attributes))
}

fn flush_text(
    text: &mut String,
    handler: &mut dyn EventHandler,
    strip_whitespace: bool,
) -> Result<(), StxError> {
    if text.is_empty() {
        return Ok(());
    }
    let content = std::mem::take(text);
    if strip_whitespace && is_whitespace(&content) {
        return Ok(());
    }
    handler.characters(&content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_resolved() {
        let events = read_events(
            r#"<d:doc xmlns:d="urn:d" xmlns="urn:default"><item d:id="1" plain="2"/></d:doc>"#,
            false,
        )
        .unwrap();
        match &events[1] {
            StxEvent::StartElement { name, attributes } => {
                assert_eq!(name.namespace(), Some("urn:d"));
                assert_eq!(name.local_name, "doc");
                assert!(attributes.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        match &events[2] {
            StxEvent::StartElement { name, attributes } => {
                assert_eq!(name.namespace(), Some("urn:default"));
                assert_eq!(attributes[0].name.namespace(), Some("urn:d"));
                assert_eq!(attributes[1].name.namespace(), None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_text_is_merged_and_optionally_stripped() {
        let xml = "<a>x &lt; <![CDATA[y]]>\n  <b/>\n</a>";
        let kept = read_events(xml, false).unwrap();
        assert_eq!(kept[2], StxEvent::text("x < y\n  "));
        assert_eq!(kept.len(), 8);

        let stripped = read_events(xml, true).unwrap();
        assert_eq!(stripped.len(), 7);
    }

    #[test]
    fn test_comments_and_processing_instructions() {
        let events = read_events("<a><!--note--><?render fast please?></a>", false).unwrap();
        assert_eq!(events[2], StxEvent::Comment("note".into()));
        assert_eq!(
            events[3],
            StxEvent::ProcessingInstruction {
                target: "render".into(),
                data: "fast please".into()
            }
        );
    }

    #[test]
    fn test_unbound_prefix_fails() {
        assert!(read_events("<p:a/>", false).is_err());
    }
}
