use crate::config::ImageFormat;
use crate::fetch::FetchError;
use crate::fingerprint::Operation;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder};
use std::io::Cursor;

const JPEG_QUALITY: u8 = 85;
const WEBP_QUALITY: f32 = 80.0;

/// Decodes raw image bytes, returning the image and its source format.
///
/// # Errors
/// Returns `FetchError::Transform` if the format cannot be detected from the
/// magic bytes, is not one we can re-encode, or the data is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<(DynamicImage, ImageFormat), FetchError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| FetchError::Transform(e.to_string()))?;

    let fmt = ImageFormat::from_image_format(guessed).ok_or_else(|| {
        FetchError::Transform(format!("unsupported source format: {:?}", guessed))
    })?;

    let img = image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| FetchError::Transform(e.to_string()))?;

    Ok((img, fmt))
}

/// Scales the image to cover `width`x`height` and crops the centre.
///
/// Output dimensions are exactly the requested ones. Lanczos3 is used for
/// resampling.
pub fn fill_image(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_to_fill(width, height, FilterType::Lanczos3)
}

/// Encodes the image in `fmt`.
///
/// - **JPEG**: RGB, quality 85
/// - **PNG**: RGBA, default compression
/// - **WebP**: lossy RGB via libwebp, quality 80
/// - **GIF**: RGBA single frame
pub fn encode_image(img: &DynamicImage, fmt: ImageFormat) -> Result<Vec<u8>, FetchError> {
    let mut out = Vec::new();

    match fmt {
        ImageFormat::jpeg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let enc = JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY);
            enc.write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(|e| FetchError::Transform(e.to_string()))?;
        }
        ImageFormat::webp => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let encoded = webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode(WEBP_QUALITY);
            out.extend_from_slice(&encoded);
        }
        ImageFormat::png | ImageFormat::gif => {
            let target = if fmt == ImageFormat::png {
                image::ImageFormat::Png
            } else {
                image::ImageFormat::Gif
            };
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut out), target)
                .map_err(|e| FetchError::Transform(e.to_string()))?;
        }
    }

    Ok(out)
}

/// Runs `operation` over raw source bytes.
///
/// When `format` is `None` the output keeps the source format.
pub fn apply(
    operation: Operation,
    bytes: &[u8],
    width: u32,
    height: u32,
    format: Option<ImageFormat>,
) -> Result<Vec<u8>, FetchError> {
    let (img, source_format) = decode_image(bytes)?;
    let out = match operation {
        Operation::Fill => fill_image(&img, width, height),
    };
    encode_image(&out, format.unwrap_or(source_format))
}
