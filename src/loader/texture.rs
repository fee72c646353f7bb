use std::path::Path;

use crate::error::TextureError;

/// A decoded image, always expanded to four channels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// Channel count of the file before the RGBA expansion.
    pub source_channels: u8,
    pub rgba8: Vec<u8>,
}

pub trait ImageDecoder {
    fn decode_rgba8(&self, path: &Path) -> Result<DecodedImage, TextureError>;
}

/// Decodes anything the `image` crate understands.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode_rgba8(&self, path: &Path) -> Result<DecodedImage, TextureError> {
        let image = image::open(path).map_err(|source| TextureError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        let source_channels = image.color().channel_count();
        let rgba = image.into_rgba8();

        Ok(DecodedImage {
            width: rgba.width(),
            height: rgba.height(),
            source_channels,
            rgba8: rgba.into_raw(),
        })
    }
}
