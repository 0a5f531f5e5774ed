//! End-to-end pipeline tests against a local in-process tile server.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Path,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use image::RgbImage;

use bundler::config::BundlerConfig;
use bundler::fetch::TileFetcher;
use bundler::runner::JobRunner;
use eink_render::Palette;
use job_store::{JobStatus, JobStore};
use track_common::{TileCoord, TileRef, Waypoint};

/// Tile column the test server always answers with HTTP 500.
const FAILING_X: i32 = 99;

fn red_png() -> Vec<u8> {
    let img = RgbImage::from_pixel(64, 64, image::Rgb([255, 0, 0]));
    let mut buf = std::io::Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageOutputFormat::Png).unwrap();
    buf.into_inner()
}

async fn tile_handler(Path((_z, x, _name)): Path<(u32, i32, String)>) -> Response {
    if x == FAILING_X {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream broken").into_response();
    }
    ([(header::CONTENT_TYPE, "image/png")], red_png()).into_response()
}

async fn slow_tile_handler(path: Path<(u32, i32, String)>) -> Response {
    tokio::time::sleep(Duration::from_millis(300)).await;
    tile_handler(path).await
}

/// Spawn a tile server on an ephemeral port, returning its URL template.
async fn spawn_tile_server() -> String {
    serve_tiles(Router::new().route("/tiles/:z/:x/:name", get(tile_handler))).await
}

/// Like [`spawn_tile_server`], but each tile takes 300 ms.
async fn spawn_slow_tile_server() -> String {
    serve_tiles(Router::new().route("/tiles/:z/:x/:name", get(slow_tile_handler))).await
}

async fn serve_tiles(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/tiles/{{z}}/{{x}}/{{y}}.png", addr)
}

struct Pipeline {
    store: Arc<JobStore>,
    runner: Arc<JobRunner>,
    config: Arc<BundlerConfig>,
    _tmp: tempfile::TempDir,
}

async fn pipeline(template: String) -> Pipeline {
    let tmp = tempfile::tempdir().unwrap();
    let config = Arc::new(BundlerConfig {
        tile_url_template: template,
        zoom_levels: vec![16],
        work_dir: tmp.path().join("gpx"),
        static_dir: tmp.path().join("static"),
        cache_dir: tmp.path().join("tiles"),
        max_concurrent: 6,
        request_timeout: Duration::from_secs(5),
    });

    for dir in [&config.work_dir, &config.static_dir, &config.cache_dir] {
        std::fs::create_dir_all(dir).unwrap();
    }

    let store = Arc::new(JobStore::open_memory().await.unwrap());
    let fetcher = Arc::new(
        TileFetcher::new(
            config.cache_dir.clone(),
            Arc::new(Palette::eink_map_tiles()),
            config.request_timeout,
        )
        .unwrap(),
    );
    let runner = Arc::new(JobRunner::new(store.clone(), fetcher, config.clone()));

    Pipeline {
        store,
        runner,
        config,
        _tmp: tmp,
    }
}

fn sample_waypoints() -> Vec<Waypoint> {
    vec![
        Waypoint::new(12.665907, 47.737665),
        Waypoint::new(12.666500, 47.738100),
        Waypoint::new(12.667200, 47.738900),
    ]
}

fn tiles(template: &str, xs: &[i32]) -> Vec<TileRef> {
    xs.iter()
        .map(|&x| TileRef::from_template(TileCoord::new(16, x, 23042), template))
        .collect()
}

#[tokio::test]
async fn test_job_completes_and_archives() {
    let template = spawn_tile_server().await;
    let p = pipeline(template.clone()).await;

    let wps = sample_waypoints();
    let tiles = tiles(&template, &[1, 2, 3, 4]);
    p.store.create("job-ok", &wps, &tiles).await.unwrap();

    p.runner.run("job-ok").await.unwrap();

    let job = p.store.read("job-ok").await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.files_done, job.files_total);
    assert_eq!(job.files_total, 4);

    // Archive contents: TRACK with the 3 waypoints in order, one image per tile
    let zip_path = p.config.static_dir.join("job-ok.zip");
    let mut archive = zip::ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();

    let mut track = String::new();
    archive
        .by_name("TRACK")
        .unwrap()
        .read_to_string(&mut track)
        .unwrap();
    let lines: Vec<&str> = track.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "12.665907 47.737665");
    assert_eq!(lines[2], "12.6672 47.7389");

    for x in [1, 2, 3, 4] {
        let name = format!("MAPS/16_{}_23042.png", x);
        let mut data = Vec::new();
        archive.by_name(&name).unwrap().read_to_end(&mut data).unwrap();

        // Solid red input quantizes to the palette's red, every pixel
        let img = image::load_from_memory(&data).unwrap().to_rgb8();
        for p in img.pixels() {
            assert_eq!(*p, image::Rgb([255, 0, 0]));
        }
    }
}

#[tokio::test]
async fn test_failing_tile_does_not_block_completion() {
    let template = spawn_tile_server().await;
    let p = pipeline(template.clone()).await;

    let tiles = tiles(&template, &[1, FAILING_X, 3]);
    p.store
        .create("job-gap", &sample_waypoints(), &tiles)
        .await
        .unwrap();

    p.runner.run("job-gap").await.unwrap();

    // Failed attempts still count toward progress
    let job = p.store.read("job-gap").await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.files_done, 3);
    assert_eq!(job.files_total, 3);

    // The bundle ships with a gap where the tile failed
    let zip_path = p.config.static_dir.join("job-gap.zip");
    let mut archive = zip::ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();
    assert!(archive.by_name("MAPS/16_1_23042.png").is_ok());
    assert!(archive
        .by_name(&format!("MAPS/16_{}_23042.png", FAILING_X))
        .is_err());
}

#[tokio::test]
async fn test_archive_exists_before_done_is_observable() {
    let template = spawn_tile_server().await;
    let p = pipeline(template.clone()).await;

    let tiles = tiles(&template, &[5, 6, 7, 8, 9, 10, 11, 12]);
    p.store
        .create("job-bg", &sample_waypoints(), &tiles)
        .await
        .unwrap();

    // Fire-and-forget, the way the upload handler launches it
    p.runner.spawn("job-bg".to_string());

    let zip_path = p.config.static_dir.join("job-bg.zip");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let job = p.store.read("job-bg").await.unwrap();
        if job.status == JobStatus::Done {
            // The instant Done becomes observable, the archive must exist
            assert!(zip_path.exists());
            assert_eq!(job.files_done, job.files_total);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job did not finish in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_resubmission_mid_run_discards_stale_runner_writes() {
    let template = spawn_slow_tile_server().await;
    let p = pipeline(template.clone()).await;

    p.store
        .create("job-resub", &sample_waypoints(), &tiles(&template, &[1, 2, 3]))
        .await
        .unwrap();
    p.runner.spawn("job-resub".to_string());

    // The same device uploads a new track while the first run is still
    // fetching tiles
    tokio::time::sleep(Duration::from_millis(150)).await;
    p.store
        .create(
            "job-resub",
            &sample_waypoints(),
            &tiles(&template, &[10, 11, 12, 13, 14, 15]),
        )
        .await
        .unwrap();

    // Let the superseded run drain completely
    tokio::time::sleep(Duration::from_secs(3)).await;

    // None of its progress or status writes may have landed on the
    // replacement record
    let job = p.store.read("job-resub").await.unwrap();
    assert_eq!(job.status, JobStatus::Prepared);
    assert_eq!(job.files_done, 0);
    assert_eq!(job.files_total, 6);

    // The replacement still runs to completion, and its archive holds
    // only its own tiles
    p.runner.run("job-resub").await.unwrap();
    let job = p.store.read("job-resub").await.unwrap();
    assert_eq!(job.status, JobStatus::Done);
    assert_eq!(job.files_done, 6);

    let zip_path = p.config.static_dir.join("job-resub.zip");
    let mut archive = zip::ZipArchive::new(std::fs::File::open(&zip_path).unwrap()).unwrap();
    assert!(archive.by_name("MAPS/16_10_23042.png").is_ok());
    assert!(archive.by_name("MAPS/16_1_23042.png").is_err());
}

#[tokio::test]
async fn test_tile_cache_is_shared_across_jobs() {
    let template = spawn_tile_server().await;
    let p = pipeline(template.clone()).await;

    let tiles_a = tiles(&template, &[42]);
    p.store
        .create("job-a", &sample_waypoints(), &tiles_a)
        .await
        .unwrap();
    p.runner.run("job-a").await.unwrap();

    let cached = p.config.cache_dir.join("16_42_23042.png");
    assert!(cached.exists());

    // Second job for the same tile works even if upstream disappears:
    // poison the template so a network fetch would fail
    let tiles_b = vec![TileRef {
        coord: TileCoord::new(16, 42, 23042),
        url: "http://127.0.0.1:1/unreachable.png".to_string(),
        name: "16_42_23042.png".to_string(),
    }];
    p.store
        .create("job-b", &sample_waypoints(), &tiles_b)
        .await
        .unwrap();
    p.runner.run("job-b").await.unwrap();

    let job = p.store.read("job-b").await.unwrap();
    assert_eq!(job.status, JobStatus::Done);

    let mut archive = zip::ZipArchive::new(
        std::fs::File::open(p.config.static_dir.join("job-b.zip")).unwrap(),
    )
    .unwrap();
    assert!(archive.by_name("MAPS/16_42_23042.png").is_ok());
}
