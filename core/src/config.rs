//! Tunables for the cache tiers, image limits, and coordinator behaviour.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::types::ImageDimensions;

const MIB: usize = 1024 * 1024;

/// Item-count and optional byte budget for a single cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheLimits {
    pub max_items: usize,
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

impl CacheLimits {
    pub const fn items(max_items: usize) -> Self {
        Self { max_items, max_bytes: None }
    }

    pub const fn with_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

/// Bounds handed to the image processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageLimits {
    pub default_max: ImageDimensions,
    pub aggressive_max: ImageDimensions,
    /// Source payloads above this size are bounded by `aggressive_max`.
    pub aggressive_threshold_bytes: usize,
}

impl Default for ImageLimits {
    fn default() -> Self {
        Self {
            default_max: ImageDimensions::new(1920, 1080),
            aggressive_max: ImageDimensions::new(1280, 720),
            aggressive_threshold_bytes: 10 * MIB,
        }
    }
}

/// How the current page is carried across a viewport resize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeAnchor {
    /// Keep the page's position as a fraction of the page count.
    #[default]
    Fraction,
    /// Keep the content offset at the top of the page.
    Offset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rendered_cache: CacheLimits,
    pub raw_cache: CacheLimits,
    pub resource_cache: CacheLimits,
    pub images: ImageLimits,
    /// Upper bound on how long a superseded load is given to observe cancellation.
    pub cancel_wait_ms: u64,
    /// Resident-memory threshold watched after each load. `None` disables the monitor.
    pub memory_limit_bytes: Option<u64>,
    pub resize_anchor: ResizeAnchor,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            rendered_cache: CacheLimits::items(10).with_bytes(64 * MIB),
            raw_cache: CacheLimits::items(32).with_bytes(32 * MIB),
            resource_cache: CacheLimits::items(256).with_bytes(128 * MIB),
            images: ImageLimits::default(),
            cancel_wait_ms: 100,
            memory_limit_bytes: None,
            resize_anchor: ResizeAnchor::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(input: &str) -> crate::Result<Self> {
        serde_json::from_str(input).context("parsing pipeline configuration")
    }

    /// Read a JSON configuration file; absent fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline configuration at {}", path.display()))?;
        Self::from_json_str(&text)
    }

    pub fn cancel_wait(&self) -> Duration {
        Duration::from_millis(self.cancel_wait_ms)
    }
}
