//! Helpers shared by the sheet parser and the document source.

use crate::error::StxError;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesRef, BytesStart};
use std::str::from_utf8;
use std::sync::Arc;
use strix_stxpath::compile::resolve_qname;
use strix_stxpath::{ExprError, Namespaces};
use strix_types::QName;

/// Attributes as written in the source: raw qualified name and unescaped value.
pub type OwnedAttributes = Vec<(String, String)>;

pub(crate) fn get_owned_attributes(e: &BytesStart) -> Result<OwnedAttributes, StxError> {
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = from_utf8(attr.key.as_ref())?.to_string();
        let value = unescape(from_utf8(&attr.value)?)?.into_owned();
        attributes.push((key, value));
    }
    Ok(attributes)
}

pub(crate) fn raw_name(name: &[u8]) -> Result<String, StxError> {
    Ok(from_utf8(name)?.to_string())
}

/// Expands a general entity or character reference reported between text events.
pub(crate) fn resolve_reference(r: &BytesRef) -> Result<String, StxError> {
    let name = from_utf8(r)?;
    Ok(unescape(&format!("&{};", name))?.into_owned())
}

pub(crate) fn is_namespace_declaration(raw: &str) -> bool {
    raw == "xmlns" || raw.starts_with("xmlns:")
}

/// In-scope namespace bindings while walking a document. The default namespace
/// is bound to the empty prefix.
#[derive(Debug, Clone)]
pub(crate) struct NamespaceScopes {
    scopes: Vec<Arc<Namespaces>>,
}

impl Default for NamespaceScopes {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceScopes {
    pub fn new() -> Self {
        Self {
            scopes: vec![Arc::new(Namespaces::new())],
        }
    }

    /// Opens the scope of an element carrying `attributes`.
    pub fn push(&mut self, attributes: &OwnedAttributes) -> Arc<Namespaces> {
        let declarations: Vec<_> = attributes
            .iter()
            .filter(|(key, _)| is_namespace_declaration(key))
            .collect();
        let scope = if declarations.is_empty() {
            self.current().clone()
        } else {
            let mut namespaces = (**self.current()).clone();
            for (key, uri) in declarations {
                let prefix = key.strip_prefix("xmlns:").unwrap_or("");
                namespaces.insert(prefix.to_string(), uri.clone());
            }
            Arc::new(namespaces)
        };
        self.scopes.push(scope.clone());
        scope
    }

    pub fn pop(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }

    pub fn current(&self) -> &Arc<Namespaces> {
        // the root scope is never popped
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn element_name(&self, raw: &str) -> Result<QName, ExprError> {
        element_name(raw, self.current())
    }

    pub fn attribute_name(&self, raw: &str) -> Result<QName, ExprError> {
        resolve_qname(raw, self.current())
    }
}

/// Resolves an element name; unprefixed names take the default namespace.
pub(crate) fn element_name(raw: &str, namespaces: &Namespaces) -> Result<QName, ExprError> {
    if raw.contains(':') {
        resolve_qname(raw, namespaces)
    } else {
        Ok(QName::with_namespace(None, raw, namespaces.get("").cloned()))
    }
}

pub(crate) fn is_whitespace(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii_whitespace())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> OwnedAttributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_scopes_nest_and_shadow() {
        let mut scopes = NamespaceScopes::new();
        scopes.push(&attrs(&[("xmlns", "urn:d"), ("xmlns:p", "urn:p")]));
        assert_eq!(
            scopes.element_name("a").unwrap().namespace(),
            Some("urn:d")
        );
        assert_eq!(
            scopes.attribute_name("a").unwrap().namespace(),
            None
        );

        scopes.push(&attrs(&[("xmlns:p", "urn:inner")]));
        assert_eq!(
            scopes.element_name("p:x").unwrap().namespace(),
            Some("urn:inner")
        );
        scopes.pop();
        assert_eq!(
            scopes.element_name("p:x").unwrap().namespace(),
            Some("urn:p")
        );
    }

    #[test]
    fn test_undeclared_prefix_is_an_error() {
        let scopes = NamespaceScopes::new();
        assert!(scopes.element_name("q:x").is_err());
    }

    #[test]
    fn test_empty_default_namespace_undeclares() {
        let mut scopes = NamespaceScopes::new();
        scopes.push(&attrs(&[("xmlns", "urn:d")]));
        scopes.push(&attrs(&[("xmlns", "")]));
        assert_eq!(scopes.element_name("a").unwrap().namespace(), None);
    }
}
