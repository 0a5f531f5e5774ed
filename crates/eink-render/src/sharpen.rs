//! Pre-quantization edge enhancement.
//!
//! Map tiles lose thin line work (contours, paths, street casings) when
//! crushed to seven colors; sharpening first keeps them legible.

use image::RgbImage;

/// 3x3 edge-enhance kernel, already normalized (weights sum to 1).
const EDGE_ENHANCE_KERNEL: [f32; 9] = [
    -0.5, -0.5, -0.5, //
    -0.5, 5.0, -0.5, //
    -0.5, -0.5, -0.5,
];

/// Sharpen an RGB image with the edge-enhance kernel.
pub fn edge_enhance(image: &RgbImage) -> RgbImage {
    image::imageops::filter3x3(image, &EDGE_ENHANCE_KERNEL)
}
