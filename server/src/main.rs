mod capture;
mod detector;
mod pipeline;
mod recorder;
mod routes;
mod storage;
mod stream;
#[cfg(test)]
mod testutil;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use capture::FfmpegCamera;
use motion_cam_common::config::Config;
use recorder::encoder::{check_ffmpeg_available, FfmpegClipWriter};
use routes::AppState;
use storage::MediaStore;
use tokio::sync::Mutex;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // An explicit path must load; the implicit one may be absent.
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load(&path).map_err(|e| (path, e)),
        None => {
            let path = Path::new("config.toml");
            Config::load_or_default(path).map_err(|e| (path.to_path_buf(), e))
        }
    };
    let config = match config {
        Ok(c) => c,
        Err((path, e)) => {
            eprintln!("Failed to load config from {}: {e}", path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        device = config.camera.device,
        width = config.camera.width,
        height = config.camera.height,
        fps = config.recording.fps,
        clip_secs = config.recording.duration_secs,
        min_changed_pixels = config
            .motion
            .pixel_threshold(config.camera.width, config.camera.height),
        "starting motion-cam"
    );

    check_ffmpeg_available(&config.camera.ffmpeg_path).await;

    let store = match MediaStore::open(&config.media, config.stream.jpeg_quality).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to prepare media directories");
            std::process::exit(1);
        }
    };
    info!(
        images_dir = store.images_dir().display().to_string(),
        videos_dir = store.videos_dir().display().to_string(),
        "media directories ready"
    );

    let state = Arc::new(AppState {
        camera: Arc::new(Mutex::new(FfmpegCamera::new(config.camera.clone()))),
        store: Arc::new(store),
        writer: Arc::new(FfmpegClipWriter::new(&config.camera, &config.recording)),
        config: config.clone(),
    });
    let app = routes::router(state);

    let addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    info!(addr, "motion-cam server listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }
}
