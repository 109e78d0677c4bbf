//! Decode, bound and re-encode an image into its two derivatives.

use std::io::Cursor;
use std::sync::Arc;

use depot_core::CompressionConfig;
use image::codecs::png::{CompressionType as PngCompression, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};

use crate::error::ProcessingError;

/// Shrink to fit inside `max_width` x `max_height`, keeping the aspect ratio.
/// Images already inside the bounds are returned untouched (never upscaled).
pub fn fit_within(img: DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_width && height <= max_height {
        return img;
    }
    img.resize(max_width, max_height, FilterType::Lanczos3)
}

#[derive(Debug, Clone)]
pub struct EncodedDerivatives {
    pub png: Vec<u8>,
    pub webp: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    quality: u8,
    max_width: u32,
    max_height: u32,
}

impl ImageTranscoder {
    pub fn new(config: &CompressionConfig) -> Self {
        Self {
            quality: config.quality.clamp(1, 100),
            max_width: config.max_width,
            max_height: config.max_height,
        }
    }

    pub fn decode(&self, data: &[u8]) -> Result<DynamicImage, ProcessingError> {
        let img =
            image::load_from_memory(data).map_err(|e| ProcessingError::Decode(e.to_string()))?;
        Ok(fit_within(img, self.max_width, self.max_height))
    }

    /// Lossless PNG at maximal compression with adaptive filtering.
    pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ProcessingError> {
        // The PNG encoder has no float color types.
        let converted;
        let img = match img {
            DynamicImage::ImageRgb32F(_) | DynamicImage::ImageRgba32F(_) => {
                converted = DynamicImage::ImageRgba8(img.to_rgba8());
                &converted
            }
            other => other,
        };

        let mut buffer = Vec::new();
        let encoder = PngEncoder::new_with_quality(
            Cursor::new(&mut buffer),
            PngCompression::Best,
            PngFilter::Adaptive,
        );
        img.write_with_encoder(encoder)
            .map_err(|e| ProcessingError::Encode {
                format: "png",
                message: e.to_string(),
            })?;
        Ok(buffer)
    }

    /// Lossy WebP at the configured quality.
    pub fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ProcessingError> {
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let encoder = webp::Encoder::from_rgba(&rgba, width, height);
        let encoded = encoder
            .encode_simple(false, f32::from(quality))
            .map_err(|e| ProcessingError::Encode {
                format: "webp",
                message: format!("{:?}", e),
            })?;
        Ok(encoded.to_vec())
    }

    /// Decode once, then encode both derivatives concurrently on the blocking pool.
    /// Either both succeed or the whole attempt fails.
    pub async fn transcode(&self, data: Vec<u8>) -> Result<EncodedDerivatives, ProcessingError> {
        let this = self.clone();
        let img = tokio::task::spawn_blocking(move || this.decode(&data)).await??;
        let img = Arc::new(img);

        let png_img = Arc::clone(&img);
        let png_task = tokio::task::spawn_blocking(move || Self::encode_png(&png_img));

        let quality = self.quality;
        let webp_task = tokio::task::spawn_blocking(move || Self::encode_webp(&img, quality));

        let (png, webp) = tokio::try_join!(png_task, webp_task)?;
        Ok(EncodedDerivatives {
            png: png?,
            webp: webp?,
        })
    }
}
