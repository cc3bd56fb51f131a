//! A "dumb" XML driver that reads STX markup and notifies a builder of events.

use crate::compiler::SheetBuilder;
use crate::error::StxError;
use crate::util::{get_owned_attributes, raw_name, resolve_reference};
use quick_xml::Reader;
use quick_xml::events::Event as XmlEvent;
use quick_xml::escape::unescape;
use std::str::from_utf8;

/// Drives the parsing process, calling builder methods for each significant XML
/// event. Adjacent character data (text, CDATA sections and references) reaches
/// the builder as one string.
pub fn parse_sheet_content(source: &str, builder: &mut impl SheetBuilder) -> Result<(), StxError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut text = String::new();

    loop {
        let pos = reader.buffer_position() as usize;
        match reader.read_event_into(&mut buf)? {
            XmlEvent::Start(e) => {
                flush_text(&mut text, builder)?;
                let attributes = get_owned_attributes(&e)?;
                builder.start_element(&raw_name(e.name().as_ref())?, attributes, pos, source)?;
            }
            XmlEvent::Empty(e) => {
                flush_text(&mut text, builder)?;
                let attributes = get_owned_attributes(&e)?;
                builder.empty_element(&raw_name(e.name().as_ref())?, attributes, pos, source)?;
            }
            XmlEvent::End(e) => {
                flush_text(&mut text, builder)?;
                builder.end_element(&raw_name(e.name().as_ref())?, pos, source)?;
            }
            XmlEvent::Text(e) => text.push_str(&unescape(from_utf8(e.as_ref())?)?),
            XmlEvent::CData(e) => text.push_str(from_utf8(e.as_ref())?),
            XmlEvent::GeneralRef(r) => text.push_str(&resolve_reference(&r)?),
            XmlEvent::Eof => break,
            _ => (),
        }
        buf.clear();
    }
    flush_text(&mut text, builder)
}

fn flush_text(text: &mut String, builder: &mut impl SheetBuilder) -> Result<(), StxError> {
    if text.is_empty() {
        return Ok(());
    }
    builder.text(std::mem::take(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::OwnedAttributes;

    #[derive(Default)]
    struct Trace(Vec<String>);

    impl SheetBuilder for Trace {
        fn start_element(
            &mut self,
            raw_name: &str,
            attrs: OwnedAttributes,
            _pos: usize,
            _source: &str,
        ) -> Result<(), StxError> {
            self.0.push(format!("<{} {}>", raw_name, attrs.len()));
            Ok(())
        }

        fn end_element(
            &mut self,
            raw_name: &str,
            _pos: usize,
            _source: &str,
        ) -> Result<(), StxError> {
            self.0.push(format!("</{}>", raw_name));
            Ok(())
        }

        fn text(&mut self, text: String) -> Result<(), StxError> {
            self.0.push(text);
            Ok(())
        }
    }

    #[test]
    fn test_driver_merges_text_and_expands_empty_elements() {
        let mut trace = Trace::default();
        parse_sheet_content(r#"<a x="1">one &amp; <![CDATA[<two>]]><b/></a>"#, &mut trace).unwrap();
        assert_eq!(trace.0, vec!["<a 1>", "one & <two>", "<b 0>", "</b>", "</a>"]);
    }

    #[test]
    fn test_malformed_markup_is_an_error() {
        let mut trace = Trace::default();
        assert!(parse_sheet_content("<a><b></a>", &mut trace).is_err());
    }
}
