//! Geographic bounding box for GPS tracks.

use serde::{Deserialize, Serialize};

use crate::track::Waypoint;

/// A geographic bounding box in degrees (WGS84 lon/lat).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Create a new bounding box from corner coordinates.
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Compute the bounding box of a waypoint sequence.
    ///
    /// Returns `None` for an empty track.
    pub fn from_waypoints(waypoints: &[Waypoint]) -> Option<Self> {
        let first = waypoints.first()?;
        let mut bbox = Self::new(first.lon, first.lat, first.lon, first.lat);

        for wp in &waypoints[1..] {
            if wp.lon < bbox.min_lon {
                bbox.min_lon = wp.lon;
            }
            if wp.lon > bbox.max_lon {
                bbox.max_lon = wp.lon;
            }
            if wp.lat < bbox.min_lat {
                bbox.min_lat = wp.lat;
            }
            if wp.lat > bbox.max_lat {
                bbox.max_lat = wp.lat;
            }
        }

        Some(bbox)
    }

    /// Width of the bounding box in degrees of longitude.
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    /// Height of the bounding box in degrees of latitude.
    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Check if a point is contained within this bbox.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.min_lon && lon <= self.max_lon && lat >= self.min_lat && lat <= self.max_lat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_waypoints() {
        let wps = vec![
            Waypoint::new(12.665907, 47.737665),
            Waypoint::new(12.670001, 47.735000),
            Waypoint::new(12.660000, 47.740000),
        ];

        let bbox = BoundingBox::from_waypoints(&wps).unwrap();
        assert_eq!(bbox.min_lon, 12.660000);
        assert_eq!(bbox.max_lon, 12.670001);
        assert_eq!(bbox.min_lat, 47.735000);
        assert_eq!(bbox.max_lat, 47.740000);
    }

    #[test]
    fn test_from_waypoints_empty() {
        assert!(BoundingBox::from_waypoints(&[]).is_none());
    }

    #[test]
    fn test_single_waypoint_degenerate_box() {
        let wps = vec![Waypoint::new(12.665907, 47.737665)];
        let bbox = BoundingBox::from_waypoints(&wps).unwrap();
        assert_eq!(bbox.width(), 0.0);
        assert_eq!(bbox.height(), 0.0);
        assert!(bbox.contains(12.665907, 47.737665));
    }
}
