//! Image decoding and encoding helpers.

pub mod image;

pub use self::image::{DecodedImage, ImageHeader, decode_rgba, encode, read_header};
