//! Color quantization and raster conversion for a 7-color e-ink display.
//!
//! The display renders exactly seven colors; everything else is
//! approximated by nearest-palette matching with positional dithering.

pub mod palette;
pub mod raster;
pub mod sharpen;

pub use palette::{Palette, PaletteEntry, PatternKind, Rgb};
pub use raster::to_device_raster;
pub use sharpen::edge_enhance;
