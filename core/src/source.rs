//! Content source seam: resolves chapter indices and resource paths to raw bytes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::SourceError;

/// Read access to a document container.
///
/// Implementations are not assumed to be safe for concurrent use; the pipeline hands a source
/// to one loader at a time behind a mutex.
pub trait ContentSource: Send {
    fn chapter_count(&self) -> u32;

    /// Chapter markup as stored in the document.
    fn get_chapter_markup(&mut self, chapter_index: u32) -> Result<Vec<u8>, SourceError>;

    /// Raw bytes of a resource referenced from chapter `relative_to`. `path` is the output of
    /// [`ContentSource::resolve_path`] for that chapter.
    fn get_resource(&mut self, path: &str, relative_to: u32) -> Result<Vec<u8>, SourceError>;

    /// Canonical form of a reference, used as the resource cache key so that the same asset
    /// reached from different chapters is cached once.
    fn resolve_path(&self, path: &str, _relative_to: u32) -> String {
        path.to_string()
    }
}

pub type SharedSource = Arc<Mutex<Box<dyn ContentSource>>>;

pub fn shared(source: impl ContentSource + 'static) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Source backed by in-memory chapters and a flat resource map.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    chapters: Vec<String>,
    resources: HashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chapter(mut self, markup: impl Into<String>) -> Self {
        self.chapters.push(markup.into());
        self
    }

    pub fn with_resource(mut self, path: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.resources.insert(path.into(), bytes);
        self
    }
}

impl ContentSource for MemorySource {
    fn chapter_count(&self) -> u32 {
        self.chapters.len() as u32
    }

    fn get_chapter_markup(&mut self, chapter_index: u32) -> Result<Vec<u8>, SourceError> {
        self.chapters
            .get(chapter_index as usize)
            .map(|markup| markup.as_bytes().to_vec())
            .ok_or_else(|| SourceError::NotFound(format!("chapter {chapter_index}")))
    }

    fn get_resource(&mut self, path: &str, _relative_to: u32) -> Result<Vec<u8>, SourceError> {
        self.resources.get(path).cloned().ok_or_else(|| SourceError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_reports_missing_items() {
        let mut source =
            MemorySource::new().with_chapter("<p>one</p>").with_resource("a.png", vec![1]);
        assert_eq!(source.chapter_count(), 1);
        assert_eq!(source.get_chapter_markup(0).unwrap(), b"<p>one</p>");
        assert!(matches!(source.get_chapter_markup(1), Err(SourceError::NotFound(_))));
        assert_eq!(source.get_resource("a.png", 0).unwrap(), vec![1]);
        assert!(matches!(source.get_resource("b.png", 0), Err(SourceError::NotFound(_))));
    }
}
