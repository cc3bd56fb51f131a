use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// A namespace-resolved name.
///
/// Two names are equal when their namespace URI and local name are equal; the
/// prefix is carried along for serialization only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QName {
    pub prefix: Option<String>,
    pub local_name: String,
    pub namespace_uri: Option<String>,
}

impl QName {
    pub fn new(local_name: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local_name: local_name.into(),
            namespace_uri: None,
        }
    }

    pub fn with_namespace(
        prefix: Option<String>,
        local_name: impl Into<String>,
        namespace_uri: Option<String>,
    ) -> Self {
        Self {
            prefix,
            // An empty namespace URI is the same as no namespace.
            namespace_uri: namespace_uri.filter(|uri| !uri.is_empty()),
            local_name: local_name.into(),
        }
    }

    /// The lexical `prefix:local` form.
    pub fn qualified(&self) -> String {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => format!("{}:{}", prefix, self.local_name),
            _ => self.local_name.clone(),
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace_uri.as_deref()
    }

    pub fn is(&self, namespace_uri: Option<&str>, local_name: &str) -> bool {
        self.local_name == local_name && self.namespace() == namespace_uri
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.local_name == other.local_name && self.namespace_uri == other.namespace_uri
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_name.hash(state);
        self.namespace_uri.hash(state);
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qname_simple() {
        let qname = QName::new("element");
        assert_eq!(qname.local_name, "element");
        assert!(qname.prefix.is_none());
        assert!(qname.namespace_uri.is_none());
        assert_eq!(qname.qualified(), "element");
    }

    #[test]
    fn test_equality_ignores_prefix() {
        let a = QName::with_namespace(Some("a".into()), "item", Some("urn:x".into()));
        let b = QName::with_namespace(Some("b".into()), "item", Some("urn:x".into()));
        assert_eq!(a, b);
        assert_eq!(a.qualified(), "a:item");
        assert_ne!(a, QName::new("item"));
    }

    #[test]
    fn test_empty_namespace_is_no_namespace() {
        let name = QName::with_namespace(None, "x", Some(String::new()));
        assert_eq!(name, QName::new("x"));
        assert!(name.is(None, "x"));
    }
}
