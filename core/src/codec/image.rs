//! Image decoding and re-encoding primitives.

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder as _, ImageFormat, ImageReader, RgbaImage};
use moxcms::{CmsError, ColorProfile, Layout, TransformOptions};
use tracing::warn;

use crate::error::ProcessingError;
use crate::types::ImageDimensions;

type Result<T> = std::result::Result<T, ProcessingError>;

/// RGBA pixel buffer together with the container format it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub dimensions: ImageDimensions,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.dimensions.width
    }

    pub fn height(&self) -> u32 {
        self.dimensions.height
    }

    /// Straight-alpha RGBA8888, row-major from the top-left.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// Header-level information gathered without decoding pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub format: ImageFormat,
    pub dimensions: ImageDimensions,
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    if data.is_empty() {
        return Err(ProcessingError::Decode("empty image data".into()));
    }
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|err| ProcessingError::Decode(format!("guessing image format: {err}")))
}

/// Read the format and stored dimensions from the image header.
pub fn read_header(data: &[u8]) -> Result<ImageHeader> {
    let reader = reader(data)?;
    let format = reader
        .format()
        .ok_or_else(|| ProcessingError::Decode("unrecognised image format".into()))?;
    let (width, height) = reader
        .into_dimensions()
        .map_err(|err| ProcessingError::Decode(format!("reading {format:?} header: {err}")))?;
    Ok(ImageHeader { format, dimensions: ImageDimensions { width, height } })
}

/// Decode the primary frame into RGBA, applying EXIF orientation and converting any embedded
/// ICC profile to sRGB. The profile is not carried into re-encoded output, so the conversion
/// keeps colours stable once the image is written back out.
pub fn decode_rgba(data: &[u8]) -> Result<DecodedImage> {
    let mut decoder = reader(data)?
        .into_decoder()
        .map_err(|err| ProcessingError::Decode(format!("constructing decoder: {err}")))?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let icc_profile = decoder.icc_profile().unwrap_or(None);

    let mut image = DynamicImage::from_decoder(decoder)
        .map_err(|err| ProcessingError::Decode(err.to_string()))?;

    if orientation != Orientation::NoTransforms {
        image.apply_orientation(orientation);
    }

    let mut rgba = image.into_rgba8();

    if let Some(profile) = icc_profile {
        if let Err(err) = convert_to_srgb_in_place(&mut rgba, &profile) {
            warn!(target: "codec::image", "failed to convert ICC profile: {err}");
        }
    }

    let dimensions = ImageDimensions { width: rgba.width(), height: rgba.height() };
    Ok(DecodedImage { dimensions, pixels: rgba.into_raw() })
}

/// Encode RGBA pixels in `format`, dropping alpha where the format has none.
pub fn encode(image: &DecodedImage, format: ImageFormat) -> Result<Vec<u8>> {
    let rgba = RgbaImage::from_raw(image.width(), image.height(), image.pixels.clone())
        .ok_or_else(|| ProcessingError::Encode("pixel buffer does not match dimensions".into()))?;
    let dynamic = DynamicImage::ImageRgba8(rgba);
    let dynamic = if format_supports_alpha(format) {
        dynamic
    } else {
        DynamicImage::ImageRgb8(dynamic.into_rgb8())
    };

    let mut out = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut out, format)
        .map_err(|err| ProcessingError::Encode(format!("{format:?}: {err}")))?;
    Ok(out.into_inner())
}

fn format_supports_alpha(format: ImageFormat) -> bool {
    !matches!(format, ImageFormat::Jpeg)
}

fn convert_to_srgb_in_place(
    image: &mut RgbaImage,
    profile_bytes: &[u8],
) -> std::result::Result<(), String> {
    let src_profile = ColorProfile::new_from_slice(profile_bytes)
        .map_err(|err| format!("invalid ICC profile: {err}"))?;
    let dest_profile = ColorProfile::new_srgb();
    let (width, height) = image.dimensions();
    let raw = image.as_mut();

    match src_profile.create_transform_8bit(
        Layout::Rgba,
        &dest_profile,
        Layout::Rgba,
        TransformOptions::default(),
    ) {
        Ok(transform) => {
            let mut dst = vec![0u8; raw.len()];
            transform
                .transform(&raw[..], &mut dst)
                .map_err(|err| format!("icc transform failed: {err}"))?;
            raw.copy_from_slice(&dst);
            Ok(())
        }
        Err(CmsError::InvalidLayout) => {
            let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
            for px in raw.chunks_exact(4) {
                rgb.extend_from_slice(&px[..3]);
            }
            let mut dst_rgb = vec![0u8; rgb.len()];
            let transform = src_profile
                .create_transform_8bit(
                    Layout::Rgb,
                    &dest_profile,
                    Layout::Rgb,
                    TransformOptions::default(),
                )
                .map_err(|err| format!("icc transform setup failed: {err}"))?;
            transform
                .transform(&rgb, &mut dst_rgb)
                .map_err(|err| format!("icc transform failed: {err}"))?;
            for (rgba_px, rgb_px) in raw.chunks_exact_mut(4).zip(dst_rgb.chunks_exact(3)) {
                rgba_px[0..3].copy_from_slice(rgb_px);
            }
            Ok(())
        }
        Err(err) => Err(format!("icc transform setup failed: {err}")),
    }
}
