//! Web server for the viewer windows
//!
//! Every viewer is a browser page: an MJPEG stream of its frames, a
//! WebSocket carrying pointer and key events back, and a right-click
//! context menu whose chosen entry is posted by label.

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, warn};

use crate::error::WarpError;
use crate::viewer::{MenuHost, Viewer, ViewerHub};
use crate::warp::{PointerEvent, WarpEffect};

/// Embedded static files for the web UI
#[derive(RustEmbed)]
#[folder = "static/"]
struct StaticAssets;

/// Shared application state
pub struct AppState {
    pub hub: Arc<ViewerHub>,
    /// Warp effect attached to each viewer, by viewer slug
    effects: RwLock<HashMap<String, Arc<WarpEffect>>>,
}

impl AppState {
    pub fn new(hub: Arc<ViewerHub>) -> Self {
        Self {
            hub,
            effects: RwLock::new(HashMap::new()),
        }
    }

    /// Expose `effect` through the state/mode/reset endpoints of `viewer`
    pub fn attach_effect(&self, viewer: &Viewer, effect: Arc<WarpEffect>) {
        self.effects
            .write()
            .insert(viewer.slug().to_string(), effect);
    }

    fn effect(&self, slug: &str) -> Result<Arc<WarpEffect>, WarpError> {
        self.effects
            .read()
            .get(slug)
            .cloned()
            .ok_or_else(|| WarpError::UnknownViewer(slug.to_string()))
    }
}

/// Messages sent by the viewer page over the event socket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ClientMessage {
    Pointer(PointerEvent),
    Key { key: String },
}

/// Map domain errors onto HTTP status codes
struct ApiError(WarpError);

impl From<WarpError> for ApiError {
    fn from(e: WarpError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            WarpError::UnknownViewer(_) => StatusCode::NOT_FOUND,
            WarpError::UnknownMode(_) | WarpError::UnknownMenuOption(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Static files and UI
        .route("/", get(index_handler))
        .route("/viewer/:name", get(viewer_page))
        .route("/static/*path", get(static_handler))
        // Viewer windows
        .route("/api/viewers", get(list_viewers))
        .route("/api/viewer/:name/frame", get(get_frame))
        .route("/api/viewer/:name/stream", get(frame_stream))
        .route("/api/viewer/:name/events", get(viewer_events))
        .route("/api/viewer/:name/menu", get(get_menu).post(select_menu))
        .route("/api/viewer/:name/close", post(close_viewer))
        // Attached warp effects
        .route("/api/viewer/:name/state", get(get_effect_state))
        .route("/api/viewer/:name/mode", post(set_effect_mode))
        .route("/api/viewer/:name/reset", post(reset_effect))
        // Application
        .route("/api/quit", post(quit))
        .route("/api/info", get(get_info))
        .layer(cors)
        .with_state(state)
}

/// Run the web server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

fn embedded_page(name: &str) -> Response {
    match StaticAssets::get(name) {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "Page not found").into_response(),
    }
}

/// Serve the viewer list
async fn index_handler() -> impl IntoResponse {
    embedded_page("index.html")
}

/// Serve a single viewer window
async fn viewer_page(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    state.hub.get(&name)?;
    Ok(embedded_page("viewer.html"))
}

/// Serve static files
async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    match StaticAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            (
                [(axum::http::header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

async fn list_viewers(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.hub.list())
}

/// Latest frame of a viewer (JPEG)
async fn get_frame(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let viewer = state.hub.get(&name)?;
    let Some(frame) = viewer.latest_frame() else {
        return Ok((StatusCode::SERVICE_UNAVAILABLE, "No frame available").into_response());
    };

    Ok((
        [(axum::http::header::CONTENT_TYPE, "image/jpeg")],
        frame.jpeg.clone(),
    )
        .into_response())
}

/// MJPEG stream of a viewer's frames
async fn frame_stream(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    use axum::body::Body;
    use tokio_stream::StreamExt;

    let viewer = state.hub.get(&name)?;
    let mut last_sequence = 0;

    let stream = tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
        std::time::Duration::from_millis(33),
    ))
    .filter_map(move |_| {
        let frame = viewer.latest_frame()?;
        if frame.sequence == last_sequence {
            return None;
        }
        last_sequence = frame.sequence;

        let mut part = Vec::with_capacity(frame.jpeg.len() + 96);
        part.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: ");
        part.extend_from_slice(frame.jpeg.len().to_string().as_bytes());
        part.extend_from_slice(b"\r\n\r\n");
        part.extend_from_slice(&frame.jpeg);
        part.extend_from_slice(b"\r\n");

        Some(Ok::<_, std::convert::Infallible>(part))
    });

    Ok((
        [(
            axum::http::header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )],
        Body::from_stream(stream),
    )
        .into_response())
}

/// Pointer and key events from a viewer page
async fn viewer_events(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let viewer = state.hub.get(&name)?;
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_event_socket(socket, viewer, hub)))
}

async fn handle_event_socket(mut socket: WebSocket, viewer: Arc<Viewer>, hub: Arc<ViewerHub>) {
    debug!("{}: event socket connected", viewer.name());

    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("{}: event socket error: {}", viewer.name(), e);
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Pointer(event)) => viewer.dispatch_pointer(event),
            Ok(ClientMessage::Key { key }) => handle_key(&hub, &key),
            Err(e) => warn!("{}: malformed event {:?}: {}", viewer.name(), text, e),
        }
    }

    debug!("{}: event socket closed", viewer.name());
}

fn handle_key(hub: &ViewerHub, key: &str) {
    if key.eq_ignore_ascii_case("q") {
        hub.request_quit();
    }
}

#[derive(Serialize)]
struct MenuResponse {
    options: Vec<&'static str>,
}

async fn get_menu(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MenuResponse>, ApiError> {
    let viewer = state.hub.get(&name)?;
    Ok(Json(MenuResponse {
        options: viewer.menu_options().iter().map(|o| o.label()).collect(),
    }))
}

#[derive(Deserialize)]
struct MenuSelection {
    option: String,
}

#[derive(Serialize)]
struct MenuSelected {
    selected: &'static str,
}

async fn select_menu(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<MenuSelection>,
) -> Result<Json<MenuSelected>, ApiError> {
    let viewer = state.hub.get(&name)?;
    let option = viewer.select_menu_option(&req.option)?;
    Ok(Json(MenuSelected {
        selected: option.label(),
    }))
}

async fn close_viewer(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.hub.get(&name)?.close();
    Ok(StatusCode::OK)
}

async fn get_effect_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.effect(&name)?.snapshot()))
}

#[derive(Deserialize)]
struct ModeRequest {
    mode: String,
}

async fn set_effect_mode(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<ModeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let effect = state.effect(&name)?;
    effect.set_mode_str(&req.mode)?;
    Ok(Json(effect.snapshot()))
}

async fn reset_effect(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let effect = state.effect(&name)?;
    effect.reset_points();
    Ok(Json(effect.snapshot()))
}

async fn quit(State(state): State<Arc<AppState>>) -> StatusCode {
    state.hub.request_quit();
    StatusCode::OK
}

/// System information response
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    viewers: usize,
    quit_requested: bool,
}

async fn get_info(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        viewers: state.hub.list().len(),
        quit_requested: state.hub.quit_requested(),
    })
}
