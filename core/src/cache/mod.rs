//! Bounded cache tiers shared by the loader and the consumer.

pub mod bounded;

use std::sync::Arc;

use serde::Serialize;

pub use bounded::{BoundedCache, CacheStats};

use crate::config::PipelineConfig;
use crate::types::{ChapterKey, RawChapter, RenderedChapter, ResourceBytes, ResourceKey};

pub type RenderedCache = BoundedCache<ChapterKey, Arc<RenderedChapter>>;
pub type RawCache = BoundedCache<ChapterKey, Arc<RawChapter>>;
pub type ResourceCache = BoundedCache<ResourceKey, Arc<ResourceBytes>>;

/// Diagnostic snapshot across the three tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub raw: CacheStats,
    pub rendered: CacheStats,
    pub resource: CacheStats,
}

/// The rendered, raw, and resource caches, independently configured.
#[derive(Debug)]
pub struct ChapterCaches {
    pub rendered: RenderedCache,
    pub raw: RawCache,
    pub resource: ResourceCache,
}

impl ChapterCaches {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            rendered: BoundedCache::new("rendered", config.rendered_cache),
            raw: BoundedCache::new("raw", config.raw_cache),
            resource: BoundedCache::new("resource", config.resource_cache),
        }
    }

    pub fn clear(&self) {
        self.rendered.clear();
        self.raw.clear();
        self.resource.clear();
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            raw: self.raw.stats(),
            rendered: self.rendered.stats(),
            resource: self.resource.stats(),
        }
    }
}
