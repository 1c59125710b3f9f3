use crate::models::DecodedImage;
use camino::Utf8Path;
use image::{DynamicImage, ImageDecoder as _, ImageReader};
use thiserror::Error;

/// Errors that can occur while decoding a picture
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Turns a picture file into pixels.
///
/// This is the seam between the session cache and whatever does the actual
/// decoding, so tests can count decodes without touching real images.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, path: &Utf8Path) -> Result<DecodedImage, DecodeError>;
}

/// Decoder backed by the `image` crate.
///
/// The format is guessed from the content rather than the extension, and the
/// embedded EXIF orientation is applied so portrait shots come out upright.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoder;

impl StandardDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl ImageDecoder for StandardDecoder {
    fn decode(&self, path: &Utf8Path) -> Result<DecodedImage, DecodeError> {
        let image_err = |source| DecodeError::Image {
            path: path.to_string(),
            source,
        };

        let reader = ImageReader::open(path)
            .map_err(|source| DecodeError::Open {
                path: path.to_string(),
                source,
            })?
            .with_guessed_format()
            .map_err(|source| DecodeError::Open {
                path: path.to_string(),
                source,
            })?;

        let mut decoder = reader.into_decoder().map_err(image_err)?;
        let orientation = decoder.orientation().map_err(image_err)?;
        let mut image = DynamicImage::from_decoder(decoder).map_err(image_err)?;
        image.apply_orientation(orientation);

        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        tracing::debug!("Decoded {} ({}x{})", path, width, height);

        Ok(DecodedImage::new(width, height, rgba.into_raw()))
    }
}
