//! Tile acquisition: on-disk cache, upstream fetch, and quantization.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use reqwest::Client;
use tokio::fs;
use tracing::{debug, warn};

use eink_render::{edge_enhance, to_device_raster, Palette, Rgb};
use track_common::{BundleError, BundleResult, TileRef};

/// A tile after edge enhancement and palette reduction.
pub struct QuantizedTile {
    pub tile: TileRef,
    pub image: RgbImage,
}

impl QuantizedTile {
    /// Encode as PNG for archive storage and interactive preview.
    pub fn to_png(&self) -> BundleResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .map_err(|e| BundleError::InternalError(format!("PNG encode failed: {}", e)))?;
        Ok(buf.into_inner())
    }

    /// Pack into the display's native frame format.
    pub fn to_device_raster(&self) -> Vec<u8> {
        to_device_raster(&self.image)
    }
}

/// Fetches single tiles, caching the raw upstream bytes on disk.
///
/// The cache is write-once: a tile file, once present, is treated as
/// valid and never revalidated against the server. It is shared across
/// jobs; concurrent writers for the same coordinate produce identical
/// bytes, so the race is benign.
pub struct TileFetcher {
    client: Client,
    cache_dir: PathBuf,
    palette: Arc<Palette>,
}

impl TileFetcher {
    pub fn new(
        cache_dir: PathBuf,
        palette: Arc<Palette>,
        request_timeout: Duration,
    ) -> BundleResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BundleError::InternalError(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache_dir,
            palette,
        })
    }

    /// Fetch one tile and reduce it to the device palette.
    pub async fn fetch(&self, tile: &TileRef) -> BundleResult<QuantizedTile> {
        let raw = self.raw_tile_bytes(tile).await?;

        let decoded = image::load_from_memory(&raw)
            .map_err(|e| BundleError::ImageDecodeError(format!("{}: {}", tile.url, e)))?
            .to_rgb8();

        let mut out = edge_enhance(&decoded);
        for (x, y, pixel) in out.enumerate_pixels_mut() {
            *pixel = image::Rgb(self.palette.quantize(Rgb(pixel.0), x, y).0);
        }

        Ok(QuantizedTile {
            tile: tile.clone(),
            image: out,
        })
    }

    /// Raw tile bytes, local-first.
    async fn raw_tile_bytes(&self, tile: &TileRef) -> BundleResult<Vec<u8>> {
        let cache_path = self.cache_dir.join(tile.coord.file_name());

        if cache_path.exists() {
            debug!(tile = %tile.name, "Tile cache hit");
            return Ok(fs::read(&cache_path).await?);
        }

        let response = self
            .client
            .get(&tile.url)
            .send()
            .await
            .map_err(|e| BundleError::UpstreamUnavailable {
                url: tile.url.clone(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(BundleError::UpstreamUnavailable {
                url: tile.url.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BundleError::UpstreamUnavailable {
                url: tile.url.clone(),
                reason: e.to_string(),
            })?
            .to_vec();

        // Cache write failures are not fatal; the tile just gets re-fetched.
        if let Err(e) = fs::write(&cache_path, &bytes).await {
            warn!(path = %cache_path.display(), error = %e, "Failed to write tile cache");
        }

        debug!(url = %tile.url, bytes = bytes.len(), "Tile fetched from upstream");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use track_common::TileCoord;

    #[test]
    fn test_quantized_tile_png_roundtrip() {
        let tile = TileRef::from_template(
            TileCoord::new(16, 1, 2),
            "https://tiles.example/{z}/{x}/{y}.png",
        );
        let quantized = QuantizedTile {
            tile,
            image: RgbImage::from_pixel(8, 8, image::Rgb([255, 0, 0])),
        };

        let png = quantized.to_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(3, 3), &image::Rgb([255, 0, 0]));
    }

    #[test]
    fn test_device_raster_size() {
        let tile = TileRef::from_template(
            TileCoord::new(16, 1, 2),
            "https://tiles.example/{z}/{x}/{y}.png",
        );
        let quantized = QuantizedTile {
            tile,
            image: RgbImage::from_pixel(64, 64, image::Rgb([255, 255, 255])),
        };
        assert_eq!(quantized.to_device_raster().len(), 64 * 64 / 2);
    }
}
