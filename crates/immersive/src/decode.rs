//! CPU-side preparation of artwork: decode, shrink, blur.

use image::imageops::{self, FilterType};

/// Longest edge, in pixels, of any texture the background uploads.
pub const MAX_TEXTURE_EDGE: u32 = 512;

const PLACEHOLDER_RGBA: [u8; 4] = [18, 18, 24, 255];

/// Tightly packed RGBA8 pixels ready for upload.
#[derive(Clone, PartialEq, Eq)]
pub struct TextureImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl TextureImage {
    /// 1×1 texture bound while no artwork is available.
    pub fn placeholder() -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: PLACEHOLDER_RGBA.to_vec(),
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

impl std::fmt::Debug for TextureImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Decodes `bytes`, shrinks the result to [`MAX_TEXTURE_EDGE`] and applies a
/// Gaussian blur of `blur_sigma` (no blur when zero).
pub fn prepare_artwork(bytes: &[u8], blur_sigma: f32) -> Result<TextureImage, image::ImageError> {
    let decoded = image::load_from_memory(bytes)?;
    let shrunk = if decoded.width().max(decoded.height()) > MAX_TEXTURE_EDGE {
        decoded.resize(MAX_TEXTURE_EDGE, MAX_TEXTURE_EDGE, FilterType::Triangle)
    } else {
        decoded
    };
    let rgba = shrunk.to_rgba8();
    let rgba = if blur_sigma > 0.0 {
        imageops::blur(&rgba, blur_sigma)
    } else {
        rgba
    };
    let (width, height) = rgba.dimensions();
    Ok(TextureImage {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::png_bytes;

    #[test]
    fn shrinks_long_edge_and_keeps_aspect() {
        let bytes = png_bytes(1024, 256, [200, 40, 40, 255]);
        let image = prepare_artwork(&bytes, 0.0).expect("decode");
        assert_eq!((image.width, image.height), (512, 128));
        assert_eq!(image.pixels.len(), image.byte_len());
    }

    #[test]
    fn small_images_are_not_upscaled() {
        let bytes = png_bytes(40, 30, [0, 0, 0, 255]);
        let image = prepare_artwork(&bytes, 2.0).expect("decode");
        assert_eq!((image.width, image.height), (40, 30));
    }

    #[test]
    fn blur_of_a_flat_colour_keeps_the_colour() {
        let bytes = png_bytes(16, 16, [90, 120, 150, 255]);
        let image = prepare_artwork(&bytes, 1.5).expect("decode");
        let centre = ((8 * 16 + 8) * 4) as usize;
        let pixel = &image.pixels[centre..centre + 4];
        for (actual, expected) in pixel.iter().zip([90u8, 120, 150, 255]) {
            assert!(actual.abs_diff(expected) <= 2, "{pixel:?}");
        }
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(prepare_artwork(b"definitely not an image", 0.0).is_err());
    }

    #[test]
    fn placeholder_is_one_opaque_pixel() {
        let placeholder = TextureImage::placeholder();
        assert_eq!(placeholder.byte_len(), 4);
        assert_eq!(placeholder.pixels[3], 255);
    }
}
