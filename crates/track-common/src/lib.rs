//! Common types and utilities shared across the navipack workspace.

pub mod bbox;
pub mod error;
pub mod tile;
pub mod track;

pub use bbox::BoundingBox;
pub use error::{BundleError, BundleResult};
pub use tile::{dedup_tiles, tiles_for_region, TileCoord, TileRef};
pub use track::{parse_gpx_waypoints, track_file_contents, Waypoint};
