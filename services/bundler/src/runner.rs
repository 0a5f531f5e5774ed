//! Background job pipeline: concurrent tile acquisition and archival.

use std::path::Path;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::fs;
use tracing::{debug, error, info, instrument, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use job_store::{JobStatus, JobStore};
use track_common::{track_file_contents, BundleError, BundleResult, TileRef};

use crate::config::BundlerConfig;
use crate::fetch::TileFetcher;

/// Drives one job from `Prepared` to `Done` (or `Failed`).
///
/// Tile failures are absorbed: every tile is attempted exactly once and
/// counts toward progress either way, so a job with upstream gaps still
/// completes. Only archival failure is terminal.
///
/// Every ledger write carries the run generation read at the start, so
/// a run made stale by a resubmission under the same id degrades to a
/// no-op instead of corrupting the replacement record.
pub struct JobRunner {
    store: Arc<JobStore>,
    fetcher: Arc<TileFetcher>,
    config: Arc<BundlerConfig>,
}

impl JobRunner {
    pub fn new(store: Arc<JobStore>, fetcher: Arc<TileFetcher>, config: Arc<BundlerConfig>) -> Self {
        Self {
            store,
            fetcher,
            config,
        }
    }

    /// Launch the pipeline for a job on a background task.
    ///
    /// Fire-and-forget: the caller (the upload handler) returns
    /// immediately and clients observe progress via the status endpoint.
    pub fn spawn(self: &Arc<Self>, job_id: String) {
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run(&job_id).await {
                error!(job = %job_id, error = %e, "Job pipeline failed");
            }
        });
    }

    /// Execute the full pipeline for one job.
    #[instrument(skip(self), fields(job = %job_id))]
    pub async fn run(&self, job_id: &str) -> BundleResult<()> {
        let job = self.store.read(job_id).await?;
        let generation = job.generation;

        if !self
            .store
            .set_status(job_id, JobStatus::Running, generation)
            .await?
        {
            info!("Job superseded before start");
            return Ok(());
        }

        let job_dir = self.config.work_dir.join(job_id);
        let maps_dir = job_dir.join("MAPS");

        // Tiles left behind by an earlier run of this id must not leak
        // into the archive.
        if let Err(e) = fs::remove_dir_all(&job_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e.into());
            }
        }
        fs::create_dir_all(&maps_dir).await?;

        info!(tiles = job.tiles.len(), "Starting tile acquisition");

        stream::iter(job.tiles.into_iter())
            .map(|tile| {
                let maps_dir = maps_dir.clone();
                async move {
                    self.process_tile(job_id, generation, &maps_dir, tile).await;
                }
            })
            .buffer_unordered(self.config.max_concurrent)
            .collect::<Vec<()>>()
            .await;

        // Waypoint list, in track order
        fs::write(job_dir.join("TRACK"), track_file_contents(&job.waypoints)).await?;

        // A resubmission may have replaced the record while tiles were in
        // flight; a stale run must not overwrite the new run's archive.
        if self.store.read(job_id).await?.generation != generation {
            info!("Job superseded during tile acquisition");
            return Ok(());
        }

        // The archive must exist on disk before any reader can observe Done.
        let zip_path = self.config.static_dir.join(format!("{}.zip", job_id));
        let archive_result = {
            let job_dir = job_dir.clone();
            let zip_path = zip_path.clone();
            tokio::task::spawn_blocking(move || archive_job_dir(&job_dir, &zip_path))
                .await
                .map_err(|e| BundleError::InternalError(format!("archive task: {}", e)))?
        };

        if let Err(e) = archive_result {
            self.store
                .set_status(job_id, JobStatus::Failed, generation)
                .await?;
            return Err(e);
        }

        if self
            .store
            .set_status(job_id, JobStatus::Done, generation)
            .await?
        {
            info!(archive = %zip_path.display(), "Job complete");
        } else {
            info!("Job superseded after archival");
        }
        Ok(())
    }

    /// Fetch, quantize and store one tile; always advances the counter.
    async fn process_tile(&self, job_id: &str, generation: u64, maps_dir: &Path, tile: TileRef) {
        let result = self.fetcher.fetch(&tile).await.and_then(|q| q.to_png());
        match result {
            Ok(png) => {
                if let Err(e) = fs::write(maps_dir.join(&tile.name), png).await {
                    warn!(tile = %tile.name, error = %e, "Failed to store tile");
                }
            }
            Err(e) => {
                // Non-fatal: the bundle ships with a gap instead of failing.
                warn!(url = %tile.url, error = %e, "Tile skipped");
            }
        }

        match self.store.increment_done(job_id, generation).await {
            Ok(true) => {}
            Ok(false) => debug!(job = %job_id, "Progress write dropped, run superseded"),
            Err(e) => error!(job = %job_id, error = %e, "Failed to record tile progress"),
        }
    }
}

/// Zip a job working directory into a single downloadable bundle.
fn archive_job_dir(job_dir: &Path, zip_path: &Path) -> BundleResult<()> {
    let archive_err = |e: &dyn std::fmt::Display| BundleError::ArchiveFailure(e.to_string());

    let file = std::fs::File::create(zip_path).map_err(|e| archive_err(&e))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(job_dir) {
        let entry = entry.map_err(|e| archive_err(&e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let rel = entry
            .path()
            .strip_prefix(job_dir)
            .map_err(|e| archive_err(&e))?;
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        zip.start_file(name, options).map_err(|e| archive_err(&e))?;
        let mut src = std::fs::File::open(entry.path()).map_err(|e| archive_err(&e))?;
        std::io::copy(&mut src, &mut zip).map_err(|e| archive_err(&e))?;
    }

    zip.finish().map_err(|e| archive_err(&e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_archive_job_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let job_dir = tmp.path().join("job");
        std::fs::create_dir_all(job_dir.join("MAPS")).unwrap();
        std::fs::write(job_dir.join("TRACK"), "12.6 47.7\n").unwrap();
        std::fs::write(job_dir.join("MAPS").join("16_1_2.png"), b"png-bytes").unwrap();

        let zip_path = tmp.path().join("job.zip");
        archive_job_dir(&job_dir, &zip_path).unwrap();

        let mut archive =
            zip::ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"TRACK".to_string()));
        assert!(names.contains(&"MAPS/16_1_2.png".to_string()));
    }

    #[test]
    fn test_archive_missing_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let result = archive_job_dir(
            &tmp.path().join("does-not-exist"),
            &tmp.path().join("out.zip"),
        );
        assert!(matches!(result, Err(BundleError::ArchiveFailure(_))));
    }
}
