//! GPS track model and GPX waypoint extraction.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::{BundleError, BundleResult};

/// One GPS fix. Ordering matters: the sequence defines the track's path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub lon: f64,
    pub lat: f64,
}

impl Waypoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Extract track points from a GPX document, in document order.
///
/// Only `<trkpt lat=".." lon="..">` elements are considered; route points
/// and standalone waypoints are not part of a track.
pub fn parse_gpx_waypoints(gpx: &[u8]) -> BundleResult<Vec<Waypoint>> {
    let text = std::str::from_utf8(gpx)
        .map_err(|e| BundleError::TrackParseError(format!("not valid UTF-8: {}", e)))?;

    let mut reader = Reader::from_str(text);
    let mut waypoints = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() != b"trkpt" {
                    continue;
                }

                let mut lat = None;
                let mut lon = None;
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| {
                        BundleError::TrackParseError(format!("bad attribute: {}", e))
                    })?;
                    let value = attr.unescape_value().map_err(|e| {
                        BundleError::TrackParseError(format!("bad attribute value: {}", e))
                    })?;
                    match attr.key.as_ref() {
                        b"lat" => lat = value.parse::<f64>().ok(),
                        b"lon" => lon = value.parse::<f64>().ok(),
                        _ => {}
                    }
                }

                match (lon, lat) {
                    (Some(lon), Some(lat)) => waypoints.push(Waypoint::new(lon, lat)),
                    _ => {
                        return Err(BundleError::TrackParseError(
                            "trkpt without numeric lat/lon".to_string(),
                        ))
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(BundleError::TrackParseError(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(waypoints)
}

/// Render the waypoint list as the plain-text `TRACK` file:
/// one `"<lon> <lat>"` line per waypoint, in track order.
pub fn track_file_contents(waypoints: &[Waypoint]) -> String {
    let mut out = String::with_capacity(waypoints.len() * 24);
    for wp in waypoints {
        out.push_str(&format!("{} {}\n", wp.lon, wp.lat));
    }
    out
}
