use image::GenericImageView;
use previewer::config::ImageFormat;
use previewer::fetch::FetchError;
use previewer::fingerprint::Operation;
use previewer::transform::{apply, decode_image, encode_image, fill_image};

fn encoded(w: u32, h: u32, fmt: image::ImageFormat) -> Vec<u8> {
    let img = image::DynamicImage::new_rgb8(w, h);
    let mut out = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut out), fmt).unwrap();
    out
}

#[test]
fn fill_produces_exact_dimensions() {
    let img = image::DynamicImage::new_rgb8(800, 600);
    let wide = fill_image(&img, 500, 100);
    assert_eq!(wide.dimensions(), (500, 100));
    let tall = fill_image(&img, 100, 500);
    assert_eq!(tall.dimensions(), (100, 500));
    // Upscaling also lands on the exact box.
    let big = fill_image(&img, 1200, 1200);
    assert_eq!(big.dimensions(), (1200, 1200));
}

#[test]
fn apply_keeps_source_format_by_default() {
    let png = encoded(64, 48, image::ImageFormat::Png);
    let out = apply(Operation::Fill, &png, 32, 32, None).unwrap();
    assert_eq!(ImageFormat::from_bytes(&out), Some(ImageFormat::png));
    let (decoded, fmt) = decode_image(&out).unwrap();
    assert_eq!(fmt, ImageFormat::png);
    assert_eq!(decoded.dimensions(), (32, 32));
}

#[test]
fn apply_honours_explicit_format() {
    let png = encoded(64, 64, image::ImageFormat::Png);
    let out = apply(Operation::Fill, &png, 20, 10, Some(ImageFormat::jpeg)).unwrap();
    assert_eq!(ImageFormat::from_bytes(&out), Some(ImageFormat::jpeg));
    let (decoded, _) = decode_image(&out).unwrap();
    assert_eq!(decoded.dimensions(), (20, 10));
}

#[test]
fn encode_every_format() {
    let img = image::DynamicImage::new_rgba8(16, 16);
    for fmt in [ImageFormat::jpeg, ImageFormat::png, ImageFormat::webp, ImageFormat::gif] {
        let out = encode_image(&img, fmt).unwrap();
        assert_eq!(ImageFormat::from_bytes(&out), Some(fmt), "{}", fmt);
    }
}

#[test]
fn garbage_is_a_transform_error() {
    let err = decode_image(b"definitely not an image").unwrap_err();
    assert!(matches!(err, FetchError::Transform(_)));
    assert_eq!(ImageFormat::from_bytes(b"plain text"), None);
}
