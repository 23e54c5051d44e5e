//! Shared data structures exchanged between the caches, the loader, and the consumer.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

const DOCUMENT_ID_HEX_LEN: usize = 16;

/// Stable identifier for an opened document, derived from its source location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hash a source location (path, URL) into a short, filesystem-safe identifier.
    pub fn from_location(location: impl AsRef<str>) -> Self {
        let hash = blake3::hash(location.as_ref().as_bytes());
        let hex = hash.to_hex();
        Self(hex.as_str()[..DOCUMENT_ID_HEX_LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Key for the raw and rendered chapter caches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChapterKey {
    pub document_id: DocumentId,
    pub chapter_index: u32,
}

impl ChapterKey {
    pub fn new(document_id: DocumentId, chapter_index: u32) -> Self {
        Self { document_id, chapter_index }
    }
}

/// Key for the resource cache; shared by every chapter of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub document_id: DocumentId,
    pub resource_path: String,
}

impl ResourceKey {
    pub fn new(document_id: DocumentId, resource_path: impl Into<String>) -> Self {
        Self { document_id, resource_path: resource_path.into() }
    }
}

/// Anything stored in a [`crate::cache::BoundedCache`] reports an approximate heap footprint.
pub trait SizeEstimate {
    fn estimated_bytes(&self) -> usize;
}

impl<T: SizeEstimate + ?Sized> SizeEstimate for Arc<T> {
    fn estimated_bytes(&self) -> usize {
        (**self).estimated_bytes()
    }
}

impl SizeEstimate for Vec<u8> {
    fn estimated_bytes(&self) -> usize {
        self.len()
    }
}

impl SizeEstimate for String {
    fn estimated_bytes(&self) -> usize {
        self.len()
    }
}

/// Chapter markup exactly as the content source returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChapter {
    pub chapter_index: u32,
    pub markup: String,
}

impl SizeEstimate for RawChapter {
    fn estimated_bytes(&self) -> usize {
        self.markup.len()
    }
}

/// Markup with every embedded resource inlined. The only form handed to the rendering sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChapter {
    pub document_id: DocumentId,
    pub chapter_index: u32,
    pub markup: String,
    /// Number of resource references that were inlined.
    pub resource_count: usize,
}

impl SizeEstimate for RenderedChapter {
    fn estimated_bytes(&self) -> usize {
        self.markup.len()
    }
}

/// Decoded and possibly downscaled resource payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceBytes {
    pub mime: String,
    pub bytes: Vec<u8>,
    /// True when the bytes are the untouched source payload.
    pub original: bool,
}

impl SizeEstimate for ResourceBytes {
    fn estimated_bytes(&self) -> usize {
        self.bytes.len() + self.mime.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn fits_within(self, bound: ImageDimensions) -> bool {
        self.width <= bound.width && self.height <= bound.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    Continuous,
    #[default]
    Paginated,
}

/// Where the reader is in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub document_id: DocumentId,
    pub chapter_index: u32,
    pub page_index: u32,
    pub offset: u32,
    pub mode: ReadingMode,
}

impl ReadingPosition {
    pub fn start_of(document_id: DocumentId) -> Self {
        Self {
            document_id,
            chapter_index: 0,
            page_index: 0,
            offset: 0,
            mode: ReadingMode::default(),
        }
    }
}

/// Token distinguishing the current request from ones superseded by later navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationToken(u64);

impl GenerationToken {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// A single chapter request issued by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    pub chapter_index: u32,
    pub generation: GenerationToken,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_is_stable_per_location() {
        let a = DocumentId::from_location("/books/moby-dick.epub");
        let b = DocumentId::from_location("/books/moby-dick.epub");
        let c = DocumentId::from_location("/books/walden.epub");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), DOCUMENT_ID_HEX_LEN);
        assert!(a.as_str().chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn dimensions_fit_is_inclusive() {
        let bound = ImageDimensions::new(1920, 1080);
        assert!(ImageDimensions::new(1920, 1080).fits_within(bound));
        assert!(!ImageDimensions::new(1921, 1080).fits_within(bound));
        assert!(!ImageDimensions::new(10, 1081).fits_within(bound));
    }

    #[test]
    fn arc_delegates_size_estimate() {
        let chapter = Arc::new(RawChapter { chapter_index: 0, markup: "abcd".into() });
        assert_eq!(chapter.estimated_bytes(), 4);
    }
}
