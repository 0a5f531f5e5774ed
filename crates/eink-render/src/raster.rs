//! Device-native raster packing.
//!
//! The display controller takes one 4-bit palette index per pixel, two
//! pixels per byte with the even-column pixel in the high nibble.

use image::RgbImage;

use crate::palette::{Palette, Rgb, WHITE};

/// Pack a quantized image into the display's raw frame format.
///
/// The input must already be quantized: every pixel one of the seven
/// displayable colors. An odd-width row is padded with white.
pub fn to_device_raster(image: &RgbImage) -> Vec<u8> {
    let (width, height) = image.dimensions();
    let row_bytes = ((width + 1) / 2) as usize;
    let mut buf = Vec::with_capacity(row_bytes * height as usize);

    for y in 0..height {
        let mut x = 0;
        while x < width {
            let hi = Palette::device_index(Rgb(image.get_pixel(x, y).0));
            let lo = if x + 1 < width {
                Palette::device_index(Rgb(image.get_pixel(x + 1, y).0))
            } else {
                Palette::device_index(WHITE)
            };
            buf.push((hi << 4) | lo);
            x += 2;
        }
    }

    buf
}
