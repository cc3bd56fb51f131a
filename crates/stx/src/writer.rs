//! Serializes output events as XML text.

use quick_xml::escape::{escape, partial_escape};
use std::collections::HashMap;
use strix_types::{Attribute, EventError, EventHandler, QName};

/// An [`EventHandler`] that writes XML into a string.
///
/// Namespace declarations are added where a name's namespace is not yet bound
/// to its prefix. Elements without content are written as empty-element tags.
#[derive(Debug, Default)]
pub struct XmlWriter {
    out: String,
    /// The last start tag has not been closed with `>` yet.
    open_tag: bool,
    /// Prefix bindings introduced by each open element.
    scopes: Vec<HashMap<String, String>>,
    generated: usize,
}

impl XmlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn into_string(self) -> String {
        self.out
    }

    fn close_open_tag(&mut self) {
        if self.open_tag {
            self.out.push('>');
            self.open_tag = false;
        }
    }

    fn bound(&self, prefix: &str) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(prefix))
            .map(String::as_str)
    }

    /// Binds `prefix` to `uri` on the element being written, unless that binding
    /// is already in scope.
    fn declare(&mut self, prefix: &str, uri: &str) {
        if self.bound(prefix).unwrap_or("") == uri {
            return;
        }
        if prefix.is_empty() {
            self.out.push_str(" xmlns=\"");
        } else {
            self.out.push_str(" xmlns:");
            self.out.push_str(prefix);
            self.out.push_str("=\"");
        }
        self.out.push_str(&escape(uri));
        self.out.push('"');
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(prefix.to_string(), uri.to_string());
        }
    }

    /// Attributes in a namespace need a prefix; one is made up when missing.
    fn attribute_prefix(&mut self, name: &QName) -> Option<String> {
        let uri = name.namespace()?;
        if let Some(prefix) = name.prefix.as_deref().filter(|p| !p.is_empty()) {
            return Some(prefix.to_string());
        }
        let existing = self
            .scopes
            .iter()
            .rev()
            .flat_map(|s| s.iter())
            .find(|(prefix, bound)| !prefix.is_empty() && bound.as_str() == uri)
            .map(|(prefix, _)| prefix.clone());
        Some(existing.unwrap_or_else(|| {
            self.generated += 1;
            format!("ns{}", self.generated)
        }))
    }
}

fn lexical(prefix: Option<&str>, local: &str) -> String {
    match prefix.filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}:{}", prefix, local),
        None => local.to_string(),
    }
}

impl EventHandler for XmlWriter {
    fn start_document(&mut self) -> Result<(), EventError> {
        Ok(())
    }

    fn end_document(&mut self) -> Result<(), EventError> {
        self.close_open_tag();
        Ok(())
    }

    fn start_element(&mut self, name: &QName, attributes: &[Attribute]) -> Result<(), EventError> {
        self.close_open_tag();
        let element_prefix = name.prefix.clone().unwrap_or_default();
        self.out.push('<');
        self.out
            .push_str(&lexical(Some(&element_prefix), &name.local_name));
        self.scopes.push(HashMap::new());
        self.declare(&element_prefix, name.namespace().unwrap_or(""));

        for attribute in attributes {
            let prefix = self.attribute_prefix(&attribute.name);
            if let (Some(prefix), Some(uri)) = (&prefix, attribute.name.namespace()) {
                self.declare(prefix, uri);
            }
            self.out.push(' ');
            self.out
                .push_str(&lexical(prefix.as_deref(), &attribute.name.local_name));
            self.out.push_str("=\"");
            self.out.push_str(&escape(attribute.value.as_str()));
            self.out.push('"');
        }
        self.open_tag = true;
        Ok(())
    }

    fn end_element(&mut self, name: &QName) -> Result<(), EventError> {
        if self.scopes.pop().is_none() {
            return Err(EventError::malformed(format!(
                "end of element '{}' without a start",
                name
            )));
        }
        if self.open_tag {
            self.out.push_str("/>");
            self.open_tag = false;
        } else {
            self.out.push_str("</");
            self.out
                .push_str(&lexical(name.prefix.as_deref(), &name.local_name));
            self.out.push('>');
        }
        Ok(())
    }

    fn characters(&mut self, text: &str) -> Result<(), EventError> {
        self.close_open_tag();
        self.out.push_str(&partial_escape(text));
        Ok(())
    }

    fn comment(&mut self, text: &str) -> Result<(), EventError> {
        self.close_open_tag();
        self.out.push_str("<!--");
        self.out.push_str(text);
        self.out.push_str("-->");
        Ok(())
    }

    fn processing_instruction(&mut self, target: &str, data: &str) -> Result<(), EventError> {
        self.close_open_tag();
        self.out.push_str("<?");
        self.out.push_str(target);
        if !data.is_empty() {
            self.out.push(' ');
            self.out.push_str(data);
        }
        self.out.push_str("?>");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(events: impl FnOnce(&mut XmlWriter) -> Result<(), EventError>) -> String {
        let mut writer = XmlWriter::new();
        events(&mut writer).unwrap();
        writer.into_string()
    }

    #[test]
    fn test_empty_elements_collapse() {
        let out = write(|w| {
            w.start_element(&QName::new("a"), &[Attribute::new(QName::new("x"), "1 & \"2\"")])?;
            w.start_element(&QName::new("b"), &[])?;
            w.end_element(&QName::new("b"))?;
            w.characters("<t>")?;
            w.end_element(&QName::new("a"))
        });
        assert_eq!(out, r#"<a x="1 &amp; &quot;2&quot;"><b/>&lt;t&gt;</a>"#);
    }

    #[test]
    fn test_namespaces_are_declared_once() {
        let outer = QName::with_namespace(Some("h".into()), "p", Some("urn:h".into()));
        let inner = QName::with_namespace(Some("h".into()), "b", Some("urn:h".into()));
        let plain = QName::new("c");
        let out = write(|w| {
            w.start_element(&outer, &[])?;
            w.start_element(&inner, &[])?;
            w.end_element(&inner)?;
            w.start_element(&plain, &[])?;
            w.end_element(&plain)?;
            w.end_element(&outer)
        });
        assert_eq!(out, r#"<h:p xmlns:h="urn:h"><h:b/><c/></h:p>"#);
    }

    #[test]
    fn test_default_namespace_is_undeclared_for_plain_children() {
        let outer = QName::with_namespace(None, "doc", Some("urn:d".into()));
        let plain = QName::new("item");
        let out = write(|w| {
            w.start_element(&outer, &[])?;
            w.start_element(&plain, &[])?;
            w.end_element(&plain)?;
            w.end_element(&outer)
        });
        assert_eq!(out, r#"<doc xmlns="urn:d"><item xmlns=""/></doc>"#);
    }

    #[test]
    fn test_comment_and_pi() {
        let out = write(|w| {
            w.comment(" c ")?;
            w.processing_instruction("t", "")?;
            w.processing_instruction("u", "v")
        });
        assert_eq!(out, "<!-- c --><?t?><?u v?>");
    }
}
