//! Resampling built on top of `fast_image_resize`.

use fast_image_resize as fir;

use crate::codec::DecodedImage;
use crate::error::ProcessingError;
use crate::types::ImageDimensions;

/// Filtering kernels supported by the resizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeFilter {
    /// Fastest option, mostly useful for tests or diagnostic paths.
    Nearest,
    Bilinear,
    /// Catmull-Rom bicubic interpolation.
    CatmullRom,
    /// High quality default for downscaling.
    #[default]
    Lanczos3,
}

impl From<ResizeFilter> for fir::ResizeAlg {
    fn from(value: ResizeFilter) -> Self {
        use fir::FilterType;
        match value {
            ResizeFilter::Nearest => fir::ResizeAlg::Nearest,
            ResizeFilter::Bilinear => fir::ResizeAlg::Convolution(FilterType::Bilinear),
            ResizeFilter::CatmullRom => fir::ResizeAlg::Convolution(FilterType::CatmullRom),
            ResizeFilter::Lanczos3 => fir::ResizeAlg::Convolution(FilterType::Lanczos3),
        }
    }
}

/// Largest dimensions with the source aspect ratio that fit inside `bound`.
///
/// The scale factor is `min(bound.w / w, bound.h / h)`; each side is rounded and kept at
/// least one pixel. Sources already inside the bound are returned unchanged.
pub fn fit_within(source: ImageDimensions, bound: ImageDimensions) -> ImageDimensions {
    if source.fits_within(bound) || source.width == 0 || source.height == 0 {
        return source;
    }

    let scale = f64::min(
        bound.width as f64 / source.width as f64,
        bound.height as f64 / source.height as f64,
    );
    let width = ((source.width as f64 * scale).round() as u32).clamp(1, bound.width.max(1));
    let height = ((source.height as f64 * scale).round() as u32).clamp(1, bound.height.max(1));
    ImageDimensions { width, height }
}

/// Resize an RGBA8888 frame to `target`, premultiplying alpha during filtering.
pub fn resize_rgba(
    source: &DecodedImage,
    target: ImageDimensions,
    filter: ResizeFilter,
) -> Result<DecodedImage, ProcessingError> {
    let (src_width, src_height) = (source.width(), source.height());
    if src_width == 0 || src_height == 0 {
        return Err(ProcessingError::Resize("source image has zero dimensions".into()));
    }
    if target.width == 0 || target.height == 0 {
        return Err(ProcessingError::Resize("target dimensions must be non-zero".into()));
    }

    if src_width == target.width && src_height == target.height {
        return Ok(source.clone());
    }

    if source.pixels().len() < src_width as usize * src_height as usize * 4 {
        return Err(ProcessingError::Resize("source buffer is smaller than expected".into()));
    }

    let src_view =
        fir::images::ImageRef::new(src_width, src_height, source.pixels(), fir::PixelType::U8x4)
            .map_err(|err| ProcessingError::Resize(format!("preparing source image: {err}")))?;

    let mut dst_image = fir::images::Image::new(target.width, target.height, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new().resize_alg(filter.into()).use_alpha(true);

    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .map_err(|err| ProcessingError::Resize(err.to_string()))?;

    Ok(DecodedImage { dimensions: target, pixels: dst_image.into_vec() })
}
