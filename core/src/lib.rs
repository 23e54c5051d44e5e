//! Content pipeline for a document reader: bounded caches, cancellable chapter loading,
//! image downscaling, virtual pagination and memory monitoring.

#![deny(missing_debug_implementations)]

pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod fs;
pub mod log;
pub mod memory;
pub mod paginate;
pub mod pipeline;
pub mod source;
pub mod stats;
pub mod store;
pub mod types;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

pub use cache::{BoundedCache, CacheStats, CacheStatsSnapshot, ChapterCaches};
pub use config::{CacheLimits, ImageLimits, PipelineConfig, ResizeAnchor};
pub use error::{ContentError, ProcessingError, SourceError};
pub use memory::{MemoryEvent, MemoryMonitor};
pub use paginate::{PageBreaks, PaginationEngine, PaginationError};
pub use pipeline::{
    CancellationToken, ContentLoader, ContentReady, ImageProcessor, LoadCoordinator, LoadFailure,
    LoadOutcome,
};
pub use source::{ContentSource, MemorySource, SharedSource};
pub use types::{
    ChapterKey, DocumentId, GenerationToken, ImageDimensions, LoadRequest, RawChapter,
    ReadingMode, ReadingPosition, RenderedChapter, ResourceBytes, ResourceKey, SizeEstimate,
};

/// Returns the version of the core crate for telemetry and debugging.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
