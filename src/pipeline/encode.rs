//! Image codec helpers for the local pipeline: bytes → RGBA and RGBA → PNG.
//!
//! Output is always PNG so the transparency produced by background removal
//! survives.

use image::{ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// Decode any supported input format (PNG, JPEG, WebP) into RGBA8.
pub fn decode_rgba(bytes: &[u8]) -> Result<RgbaImage, image::ImageError> {
    let img = image::load_from_memory(bytes)?.to_rgba8();
    debug!("Decoded image → {}x{} px", img.width(), img.height());
    Ok(img)
}

/// Encode an RGBA image as PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!("Encoded image → {} bytes PNG", buf.len());
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let png = encode_png(&img).expect("encode should succeed");
        assert_eq!(&png[1..4], b"PNG");
        let back = decode_rgba(&png).expect("decode");
        assert_eq!(back.get_pixel(0, 0)[3], 0);
        assert_eq!(back.get_pixel(3, 3), &Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode_rgba(b"definitely not an image").is_err());
    }
}
