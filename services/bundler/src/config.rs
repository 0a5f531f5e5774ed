//! Runtime configuration for the bundler service.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the fetcher, runner and HTTP surface.
#[derive(Debug, Clone)]
pub struct BundlerConfig {
    /// Upstream tile URL template with `{z}`, `{x}`, `{y}` placeholders.
    pub tile_url_template: String,
    /// Zoom levels rendered per job; overlapping tiles are fetched once.
    pub zoom_levels: Vec<u32>,
    /// Per-job working directories live here (`<work_dir>/<job-id>/`).
    pub work_dir: PathBuf,
    /// Finished archives, served as static files.
    pub static_dir: PathBuf,
    /// Shared on-disk tile cache, keyed by tile coordinate.
    pub cache_dir: PathBuf,
    /// Tiles in flight at once per job.
    pub max_concurrent: usize,
    /// Per-tile HTTP request timeout.
    pub request_timeout: Duration,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            tile_url_template: "https://platinenmacher.tech/navi/tiles/{z}/{x}/{y}.png"
                .to_string(),
            zoom_levels: vec![16, 13],
            work_dir: PathBuf::from("./gpx"),
            static_dir: PathBuf::from("./static"),
            cache_dir: PathBuf::from("./tiles"),
            max_concurrent: 6,
            request_timeout: Duration::from_secs(300),
        }
    }
}

/// Parse a comma-separated zoom list like `"16,13"`.
pub fn parse_zoom_levels(s: &str) -> Result<Vec<u32>, String> {
    let zooms: Result<Vec<u32>, _> = s
        .split(',')
        .map(|p| p.trim().parse::<u32>())
        .collect();

    match zooms {
        Ok(z) if !z.is_empty() => Ok(z),
        Ok(_) => Err("at least one zoom level is required".to_string()),
        Err(e) => Err(format!("invalid zoom level list '{}': {}", s, e)),
    }
}
