//! Loading of documents referenced from a sheet (`stx:process-doc`, `filter-src`).
//!
//! The engine never touches the filesystem itself; hosts decide where an href
//! points by installing a [`ResourceProvider`].

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ResourceError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Failed to load document '{href}': {message}")]
    LoadFailed { href: String, message: String },

    #[error("No document provider configured, cannot load '{0}'")]
    NoProvider(String),
}

impl ResourceError {
    fn poisoned(href: &str) -> Self {
        ResourceError::LoadFailed {
            href: href.to_string(),
            message: "document store lock poisoned".to_string(),
        }
    }
}

/// Document text shared between concurrent executions.
pub type SharedDocument = Arc<str>;

pub trait ResourceProvider: Send + Sync + Debug {
    /// Loads the document an href points to.
    fn load(&self, href: &str) -> Result<SharedDocument, ResourceError>;

    fn exists(&self, href: &str) -> bool;

    /// Resolves `href` against the base URI of the referencing document.
    /// The default keeps absolute hrefs and joins relative ones onto the base's directory.
    fn resolve(&self, base: Option<&str>, href: &str) -> String {
        match base {
            Some(base) if !href.contains(':') && !href.starts_with('/') => {
                match base.rfind('/') {
                    Some(i) => format!("{}{}", &base[..=i], href),
                    None => href.to_string(),
                }
            }
            _ => href.to_string(),
        }
    }

    fn name(&self) -> &'static str;
}

/// Documents registered up front, keyed by href.
#[derive(Debug, Default)]
pub struct InMemoryResourceProvider {
    documents: RwLock<HashMap<String, SharedDocument>>,
}

impl InMemoryResourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &self,
        href: impl Into<String>,
        text: impl Into<SharedDocument>,
    ) -> Result<(), ResourceError> {
        let href = href.into();
        let mut documents = self
            .documents
            .write()
            .map_err(|_| ResourceError::poisoned(&href))?;
        documents.insert(href, text.into());
        Ok(())
    }

    pub fn with(
        self,
        href: impl Into<String>,
        text: impl Into<SharedDocument>,
    ) -> Result<Self, ResourceError> {
        self.add(href, text)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResourceProvider for InMemoryResourceProvider {
    fn load(&self, href: &str) -> Result<SharedDocument, ResourceError> {
        let documents = self
            .documents
            .read()
            .map_err(|_| ResourceError::poisoned(href))?;
        documents
            .get(href)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(href.to_string()))
    }

    fn exists(&self, href: &str) -> bool {
        self.documents
            .read()
            .map(|d| d.contains_key(href))
            .unwrap_or(false)
    }

    fn name(&self) -> &'static str {
        "InMemoryResourceProvider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_load() {
        let provider = InMemoryResourceProvider::new()
            .with("data/a.xml", "<a/>")
            .unwrap();
        assert_eq!(&*provider.load("data/a.xml").unwrap(), "<a/>");
        assert!(provider.exists("data/a.xml"));
        assert_eq!(provider.len(), 1);
    }

    #[test]
    fn test_missing_document() {
        let provider = InMemoryResourceProvider::new();
        assert!(matches!(
            provider.load("nope.xml"),
            Err(ResourceError::NotFound(_))
        ));
        assert!(provider.is_empty());
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let provider = InMemoryResourceProvider::new();
        provider.add("a.xml", "<old/>").unwrap();
        provider.add("a.xml", "<new/>").unwrap();
        assert_eq!(&*provider.load("a.xml").unwrap(), "<new/>");
    }

    #[test]
    fn test_relative_resolution() {
        let provider = InMemoryResourceProvider::new();
        assert_eq!(provider.resolve(Some("sheets/main.stx"), "lib.stx"), "sheets/lib.stx");
        assert_eq!(provider.resolve(Some("main.stx"), "lib.stx"), "lib.stx");
        assert_eq!(provider.resolve(Some("sheets/main.stx"), "/abs.xml"), "/abs.xml");
        assert_eq!(provider.resolve(None, "x.xml"), "x.xml");
    }

    #[test]
    fn test_error_display_names_href() {
        let err = ResourceError::NoProvider("doc.xml".into());
        assert!(err.to_string().contains("doc.xml"));
    }
}
