use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Serialize;
use tower_http::services::ServeDir;
use tracing::warn;

use nestcam_transfer::{ProgressSnapshot, ReceiverProgress};

use crate::storage::{ImageEntry, ImageStore};
use crate::thumbs;

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ImageStore>,
    pub thumb_dir: PathBuf,
    pub progress: Arc<ReceiverProgress>,
}

// ── Response types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BatteryStatus {
    pub level: u8,
    pub logged_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub duplicates: u64,
    pub images_stored: u64,
    pub corrupt_images: u64,
    pub superseded: u64,
    pub timed_out: u64,
    pub oversized: u64,
    pub heartbeats: u64,
    pub sink_errors: u64,
    pub battery: Option<BatteryStatus>,
}

impl StatusResponse {
    fn new(s: ProgressSnapshot, battery: Option<BatteryStatus>) -> Self {
        Self {
            frames_received: s.frames_received,
            frames_rejected: s.frames_rejected,
            duplicates: s.duplicates,
            images_stored: s.images_stored,
            corrupt_images: s.corrupt_images,
            superseded: s.superseded,
            timed_out: s.timed_out,
            oversized: s.oversized,
            heartbeats: s.heartbeats,
            sink_errors: s.sink_errors,
            battery,
        }
    }
}

/// Gallery pages, JSON API and static image/thumbnail serving.
pub fn router(state: AppState) -> Router {
    let images = ServeDir::new(state.store.image_dir());
    let thumbs = ServeDir::new(&state.thumb_dir);

    Router::new()
        .route("/", get(gallery))
        .route("/api/images", get(list_images))
        .route("/api/status", get(status))
        .route("/health", get(health))
        .nest_service("/images", images)
        .nest_service("/thumbs", thumbs)
        .with_state(state)
}

// ── Handlers ────────────────────────────────────────────────────────────

/// GET / — thumbnail grid, newest first. Missing thumbnails are generated
/// before the page is rendered.
pub async fn gallery(State(state): State<AppState>) -> Result<Html<String>, StatusCode> {
    let image_dir = state.store.image_dir().to_path_buf();
    let thumb_dir = state.thumb_dir.clone();
    match tokio::task::spawn_blocking(move || thumbs::ensure_thumbnails(&image_dir, &thumb_dir)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Thumbnail pass failed: {:#}", e),
        Err(e) => warn!("Thumbnail task panicked: {}", e),
    }

    let images = state.store.list_images().await.map_err(|e| {
        warn!("Cannot list images: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Html(render_gallery(&images, state.progress.last_battery())))
}

/// GET /api/images
pub async fn list_images(
    State(state): State<AppState>,
) -> Result<Json<Vec<ImageEntry>>, StatusCode> {
    state.store.list_images().await.map(Json).map_err(|e| {
        warn!("Cannot list images: {:#}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// GET /api/status — receiver counters and the latest battery level.
///
/// The in-memory level wins; after a restart the last battery log line is
/// used until the node reports again.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.progress.snapshot();
    let logged = match state.store.last_battery().await {
        Ok(line) => line,
        Err(e) => {
            warn!("Cannot read battery log: {:#}", e);
            None
        }
    };

    let battery = match (snapshot.last_battery, logged) {
        (Some(level), logged) => Some(BatteryStatus {
            level,
            logged_at: logged.map(|(at, _)| at),
        }),
        (None, Some((at, level))) => Some(BatteryStatus {
            level,
            logged_at: Some(at),
        }),
        (None, None) => None,
    };
    Json(StatusResponse::new(snapshot, battery))
}

pub async fn health() -> &'static str {
    "ok"
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn render_gallery(images: &[ImageEntry], battery: Option<u8>) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n\
         <title>Nestcam</title>\n<style>\n\
         body { font-family: sans-serif; margin: 1em; }\n\
         .grid { display: flex; flex-wrap: wrap; gap: 8px; }\n\
         .grid figure { margin: 0; text-align: center; font-size: 0.8em; }\n\
         </style>\n</head>\n<body>\n<h1>Nestcam</h1>\n",
    );

    match battery {
        Some(level) => html.push_str(&format!("<p>Battery: {}%</p>\n", level)),
        None => html.push_str("<p>Battery: unknown</p>\n"),
    }

    if images.is_empty() {
        html.push_str("<p>No images yet.</p>\n");
    } else {
        html.push_str("<div class=\"grid\">\n");
        for image in images {
            let name = escape_html(&image.name);
            html.push_str(&format!(
                "<figure><a href=\"/images/{name}\"><img src=\"/thumbs/{name}\" \
                 width=\"250\" height=\"250\" alt=\"{name}\"></a>\
                 <figcaption>{}</figcaption></figure>\n",
                image.modified.format("%Y-%m-%d %H:%M:%S"),
            ));
        }
        html.push_str("</div>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Cursor;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use tower::ServiceExt;

    use super::*;

    fn jpeg() -> Vec<u8> {
        let img = RgbImage::from_fn(64, 48, |x, y| image::Rgb([x as u8, y as u8, 50]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        out.into_inner()
    }

    fn state(root: &std::path::Path) -> AppState {
        let store = ImageStore::new(root.join("images"), root.join("battery.csv")).unwrap();
        AppState {
            store: Arc::new(store),
            thumb_dir: root.join("thumbs"),
            progress: Arc::new(ReceiverProgress::new()),
        }
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = tempfile::tempdir().unwrap();
        let (status, body) = fetch(router(state(tmp.path())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn test_gallery_builds_thumbnails() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());
        fs::write(state.store.image_dir().join("20240517_063005.jpg"), jpeg()).unwrap();

        let (status, body) = fetch(router(state.clone()), "/").await;
        assert_eq!(status, StatusCode::OK);
        let page = String::from_utf8(body).unwrap();
        assert!(page.contains("/thumbs/20240517_063005.jpg"));
        assert!(page.contains("Battery: unknown"));
        assert!(state.thumb_dir.join("20240517_063005.jpg").exists());

        let (status, body) = fetch(router(state), "/thumbs/20240517_063005.jpg").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(&[0xFF, 0xD8]));
    }

    #[tokio::test]
    async fn test_image_listing_and_serving() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());
        let bytes = jpeg();
        fs::write(state.store.image_dir().join("20240517_070000.jpg"), &bytes).unwrap();

        let (status, body) = fetch(router(state.clone()), "/api/images").await;
        assert_eq!(status, StatusCode::OK);
        let listed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(listed[0]["name"], "20240517_070000.jpg");

        let (status, body) = fetch(router(state.clone()), "/images/20240517_070000.jpg").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, bytes);

        let (status, _) = fetch(router(state), "/images/..%2fbattery.csv").await;
        assert_ne!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_falls_back_to_battery_log() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path());
        fs::write(state.store.battery_log(), "2024-05-17T07:00:00,64\n").unwrap();

        let (status, body) = fetch(router(state), "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["battery"]["level"], 64);
        assert_eq!(json["battery"]["logged_at"], "2024-05-17T07:00:00");
        assert_eq!(json["images_stored"], 0);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<a href=\"x\">&'"), "&lt;a href=&quot;x&quot;&gt;&amp;&#39;");
    }
}
