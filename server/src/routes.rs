use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;
use motion_cam_common::config::Config;
use motion_cam_common::mjpeg;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::capture::FrameSource;
use crate::pipeline::FramePipeline;
use crate::recorder::encoder::ClipWriter;
use crate::storage::MediaStore;

const INDEX_HTML: &str = include_str!("../templates/index.html");

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState<S, W> {
    pub camera: Arc<Mutex<S>>,
    pub store: Arc<MediaStore>,
    pub writer: Arc<W>,
    pub config: Config,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /: landing page embedding the live feed
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /video_feed: endless multipart JPEG stream
async fn video_feed<S, W>(State(state): State<Arc<AppState<S, W>>>) -> impl IntoResponse
where
    S: FrameSource + 'static,
    W: ClipWriter + 'static,
{
    info!("viewer connected to video feed");
    let pipeline = FramePipeline::new(
        Arc::clone(&state.camera),
        Arc::clone(&state.store),
        Arc::clone(&state.writer),
        &state.config,
    );

    (
        [
            (header::CONTENT_TYPE, mjpeg::CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(pipeline.into_stream()),
    )
}

pub fn router<S, W>(state: Arc<AppState<S, W>>) -> Router
where
    S: FrameSource + 'static,
    W: ClipWriter + 'static,
{
    Router::new()
        .route("/", get(index))
        .route("/video_feed", get(video_feed::<S, W>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MemoryClipWriter, MultipartDecoder, ScriptedSource};
    use axum::http::{Request, StatusCode};
    use futures_util::StreamExt;
    use motion_cam_common::config::MediaConfig;
    use tower::ServiceExt;

    async fn app(dir: &std::path::Path, values: &[u8]) -> Router {
        let mut config = Config::default();
        config.camera.width = 32;
        config.camera.height = 24;
        config.camera.retry_initial_ms = 1;
        config.media = MediaConfig {
            images_dir: dir.join("images").display().to_string(),
            videos_dir: dir.join("videos").display().to_string(),
        };
        let store = MediaStore::open(&config.media, config.stream.jpeg_quality)
            .await
            .unwrap();
        let state = Arc::new(AppState {
            camera: Arc::new(Mutex::new(ScriptedSource::from_values(32, 24, values))),
            store: Arc::new(store),
            writer: Arc::new(MemoryClipWriter::default()),
            config,
        });
        router(state)
    }

    #[tokio::test]
    async fn index_embeds_feed() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), &[])
            .await
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains(r#"src="/video_feed""#));
    }

    #[tokio::test]
    async fn video_feed_streams_jpeg_parts() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), &[40, 40, 40])
            .await
            .oneshot(Request::builder().uri("/video_feed").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = response.into_body().into_data_stream();
        let mut decoder = MultipartDecoder::new();
        let mut jpegs = Vec::new();
        while jpegs.len() < 2 {
            let chunk = body.next().await.unwrap().unwrap();
            jpegs.extend(decoder.push(&chunk));
        }

        for jpeg in jpegs {
            let decoded = image::load_from_memory(&jpeg).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 24));
        }
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path(), &[])
            .await
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
