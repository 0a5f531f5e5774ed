//! Slippy-map tile math and coverage enumeration.
//!
//! Tiles follow the standard XYZ scheme: at zoom `z` the world is a
//! `2^z x 2^z` grid with the origin at the north-west corner.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::BoundingBox;

/// Margin of extra tiles added on every side of a track's coverage,
/// so the rendered map extends past the track itself.
pub const COVERAGE_MARGIN: i32 = 10;

/// A tile coordinate (z/x/y).
///
/// `x`/`y` are signed: the coverage margin may step past the edge of
/// the tile grid and the upstream server is left to reject those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl TileCoord {
    pub fn new(z: u32, x: i32, y: i32) -> Self {
        Self { z, x, y }
    }

    /// File name used both in the shared tile cache and the job archive.
    pub fn file_name(&self) -> String {
        format!("{}_{}_{}.png", self.z, self.x, self.y)
    }
}

/// A tile plus its remote fetch URL and archive-local name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileRef {
    pub coord: TileCoord,
    pub url: String,
    pub name: String,
}

impl TileRef {
    /// Build a tile reference from a URL template containing `{z}`, `{x}`
    /// and `{y}` placeholders.
    pub fn from_template(coord: TileCoord, template: &str) -> Self {
        let url = template
            .replace("{z}", &coord.z.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string());
        Self {
            coord,
            url,
            name: coord.file_name(),
        }
    }
}

/// Convert a longitude to a tile column index.
pub fn lon_to_tile_x(lon: f64, zoom: u32) -> i32 {
    (((lon + 180.0) / 360.0) * 2f64.powi(zoom as i32)).floor() as i32
}

/// Convert a latitude to a tile row index (Web Mercator).
pub fn lat_to_tile_y(lat: f64, zoom: u32) -> i32 {
    let lat_rad = lat.to_radians();
    (((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / std::f64::consts::PI) / 2.0)
        * 2f64.powi(zoom as i32))
    .floor() as i32
}

/// Enumerate the tile coordinates covering `bbox` at `zoom`.
///
/// Both axes are normalized (reversed bounds are swapped) and expanded
/// by [`COVERAGE_MARGIN`] tiles on each side; the result is the full
/// cartesian product of the expanded rectangle, column-major in `x`.
/// Deduplication across zoom levels is the caller's responsibility.
pub fn tiles_for_region(bbox: &BoundingBox, zoom: u32) -> Vec<TileCoord> {
    let mut x0 = lon_to_tile_x(bbox.min_lon, zoom);
    let mut x1 = lon_to_tile_x(bbox.max_lon, zoom);
    let mut y0 = lat_to_tile_y(bbox.min_lat, zoom);
    let mut y1 = lat_to_tile_y(bbox.max_lat, zoom);

    if x0 > x1 {
        std::mem::swap(&mut x0, &mut x1);
    }
    if y0 > y1 {
        std::mem::swap(&mut y0, &mut y1);
    }

    x0 -= COVERAGE_MARGIN;
    x1 += COVERAGE_MARGIN;
    y0 -= COVERAGE_MARGIN;
    y1 += COVERAGE_MARGIN;

    let mut tiles = Vec::with_capacity(((x1 - x0) * (y1 - y0)).max(0) as usize);
    for x in x0..x1 {
        for y in y0..y1 {
            tiles.push(TileCoord::new(zoom, x, y));
        }
    }
    tiles
}

/// Drop duplicate tiles while preserving first-occurrence order.
///
/// Used when coverage is computed for several zoom levels whose tile
/// lists may overlap.
pub fn dedup_tiles(tiles: Vec<TileRef>) -> Vec<TileRef> {
    let mut seen = HashSet::with_capacity(tiles.len());
    tiles
        .into_iter()
        .filter(|t| seen.insert(t.coord))
        .collect()
}
