//! Downscaling of embedded resources before they are inlined.

use tracing::trace;

use crate::codec;
use crate::config::ImageLimits;
use crate::error::ProcessingError;
use crate::pipeline::resize::{ResizeFilter, fit_within, resize_rgba};
use crate::types::ImageDimensions;

const VECTOR_MIME_TYPES: &[&str] = &["image/svg+xml", "image/svg"];

/// Decodes resources, shrinks the ones that exceed the display bounds, and re-encodes them in
/// their original format.
#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    limits: ImageLimits,
    filter: ResizeFilter,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new(ImageLimits::default())
    }
}

impl ImageProcessor {
    pub fn new(limits: ImageLimits) -> Self {
        Self { limits, filter: ResizeFilter::default() }
    }

    pub fn with_filter(mut self, filter: ResizeFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Return `bytes` scaled to fit `max_w` × `max_h`.
    ///
    /// Images already inside the bound come back byte-identical without a full decode.
    pub fn process(
        &self,
        bytes: &[u8],
        max_w: u32,
        max_h: u32,
    ) -> Result<Vec<u8>, ProcessingError> {
        let bound = ImageDimensions::new(max_w, max_h);
        let header = codec::read_header(bytes)?;
        if header.dimensions.fits_within(bound) {
            return Ok(bytes.to_vec());
        }

        let decoded = codec::decode_rgba(bytes)?;
        // Orientation may have swapped the axes since the header was read.
        if decoded.dimensions.fits_within(bound) {
            return codec::encode(&decoded, header.format);
        }

        let target = fit_within(decoded.dimensions, bound);
        trace!(
            target: "pipeline::processor",
            from = ?decoded.dimensions,
            to = ?target,
            format = ?header.format,
            "downscaling resource"
        );
        let resized = resize_rgba(&decoded, target, self.filter)?;
        codec::encode(&resized, header.format)
    }

    /// Vector images are used as-is.
    pub fn should_skip(&self, mime_type: &str) -> bool {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        VECTOR_MIME_TYPES.iter().any(|vector| vector.eq_ignore_ascii_case(essence))
    }

    /// Bound for a payload of `byte_size`; abnormally large sources get the tighter bound.
    pub fn aggressive_limits(&self, byte_size: usize) -> (u32, u32) {
        let bound = if byte_size > self.limits.aggressive_threshold_bytes {
            self.limits.aggressive_max
        } else {
            self.limits.default_max
        };
        (bound.width, bound.height)
    }
}
