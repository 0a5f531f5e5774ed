//! GPX-to-offline-tile-bundle service.
//!
//! Accepts GPX track uploads, computes the map tile coverage around the
//! track, fetches and palette-reduces every tile for a 7-color e-ink
//! display, and packages the result as a downloadable archive. Tile
//! acquisition runs in the background; clients poll a status endpoint.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use eink_render::Palette;
use job_store::JobStore;

use bundler::config::{parse_zoom_levels, BundlerConfig};
use bundler::fetch::TileFetcher;
use bundler::runner::JobRunner;
use bundler::server::{run_server, AppState};

#[derive(Parser, Debug)]
#[command(name = "bundler")]
#[command(about = "GPX track to offline e-ink tile bundle converter")]
struct Args {
    /// Port for the HTTP API
    #[arg(long, env = "BUNDLER_PORT", default_value = "5000")]
    port: u16,

    /// Directory for the job state database
    #[arg(long, default_value = "./data")]
    state_dir: PathBuf,

    /// Directory for per-job working directories
    #[arg(long, default_value = "./gpx")]
    work_dir: PathBuf,

    /// Directory for finished archives (served under /static)
    #[arg(long, default_value = "./static")]
    static_dir: PathBuf,

    /// Directory for the shared tile cache
    #[arg(long, default_value = "./tiles")]
    cache_dir: PathBuf,

    /// Upstream tile URL template ({z}/{x}/{y} placeholders)
    #[arg(
        long,
        env = "TILE_URL_TEMPLATE",
        default_value = "https://platinenmacher.tech/navi/tiles/{z}/{x}/{y}.png"
    )]
    tile_url: String,

    /// Comma-separated zoom levels to bundle per job
    #[arg(long, default_value = "16,13")]
    zooms: String,

    /// Maximum concurrent tile fetches per job
    #[arg(long, default_value = "6")]
    max_concurrent: usize,

    /// Per-tile request timeout in seconds
    #[arg(long, default_value = "300")]
    tile_timeout_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting tile bundler");

    // Create directories
    tokio::fs::create_dir_all(&args.state_dir).await?;
    tokio::fs::create_dir_all(&args.work_dir).await?;
    tokio::fs::create_dir_all(&args.static_dir).await?;
    tokio::fs::create_dir_all(&args.cache_dir).await?;

    let zoom_levels = parse_zoom_levels(&args.zooms).map_err(anyhow::Error::msg)?;

    let config = Arc::new(BundlerConfig {
        tile_url_template: args.tile_url,
        zoom_levels,
        work_dir: args.work_dir,
        static_dir: args.static_dir,
        cache_dir: args.cache_dir,
        max_concurrent: args.max_concurrent,
        request_timeout: Duration::from_secs(args.tile_timeout_secs),
    });

    // Open the job ledger
    let store_path = args.state_dir.join("jobs.db");
    let store = Arc::new(JobStore::open(&store_path).await?);

    // One palette instance shared by every worker
    let palette = Arc::new(Palette::eink_map_tiles());
    let fetcher = Arc::new(TileFetcher::new(
        config.cache_dir.clone(),
        palette,
        config.request_timeout,
    )?);

    let runner = Arc::new(JobRunner::new(
        store.clone(),
        fetcher.clone(),
        config.clone(),
    ));

    let state = Arc::new(AppState {
        store,
        fetcher,
        runner,
        config,
    });

    run_server(state, args.port).await
}
