//! Mock provider server
//!
//! One axum app answering the GoAPI task endpoint, the fal.ai queue, the AI
//! Mastering API and plain audio downloads. Every job goes through one
//! "processing" answer before completing.

use ai_music_orchestrator::config::{ProviderEndpoint, ProvidersConfig};
use ai_music_orchestrator::mastering::MasteringService;
use ai_music_orchestrator::MusicRouter;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// ID3 header: sniffed as mp3.
pub const MP3_BYTES: &[u8] = b"ID3\x03\x00\x00\x00\x00\x00\x0afake mpeg audio frames";
/// RIFF/WAVE header: sniffed as wav.
pub const WAV_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt fake pcm data";

pub const GOAPI_KEY: &str = "goapi-test-key";
pub const FAL_KEY: &str = "fal-test-key";
pub const TASK_ID: &str = "task-123";
pub const FAL_REQUEST_ID: &str = "fal-req-1";
/// fal request id the mock reports as already finished on cancel.
pub const FAL_FINISHED_REQUEST_ID: &str = "fal-done";
pub const MASTERING_ID: u64 = 77;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub path: String,
    /// `X-API-Key` or `Authorization`, whichever was sent.
    pub credential: Option<String>,
    pub body: Option<Value>,
}

pub struct MockState {
    pub base_url: String,
    pub task_polls: AtomicUsize,
    pub fal_polls: AtomicUsize,
    pub mastering_polls: AtomicUsize,
    /// Point completed tasks at an audio URL that 404s.
    pub broken_audio: AtomicBool,
    pub requests: Mutex<Vec<RecordedRequest>>,
}

impl MockState {
    fn record(&self, method: &'static str, path: String, headers: &HeaderMap, body: Option<Value>) {
        let credential = ["x-api-key", "authorization"]
            .iter()
            .find_map(|name| headers.get(*name))
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            path,
            credential,
            body,
        });
    }
}

async fn submit_task(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("POST", "/api/v1/task".to_string(), &headers, Some(body));
    Json(json!({
        "code": 200,
        "data": {"task_id": TASK_ID, "status": "pending"},
        "message": "success"
    }))
}

async fn get_task(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    state.record("GET", format!("/api/v1/task/{}", id), &headers, None);
    if state.task_polls.fetch_add(1, Ordering::SeqCst) == 0 {
        return Json(json!({"code": 200, "data": {"task_id": id, "status": "processing"}}));
    }
    let audio = if state.broken_audio.load(Ordering::SeqCst) {
        "missing.mp3"
    } else {
        "song.mp3"
    };
    Json(json!({
        "code": 200,
        "data": {
            "task_id": id,
            "status": "completed",
            "output": {
                "songs": [{
                    "song_path": format!("{}/audio/{}", state.base_url, audio),
                    "image_path": format!("{}/audio/cover.png", state.base_url)
                }]
            }
        }
    }))
}

async fn submit_fal(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record(
        "POST",
        "/fal-ai/minimax-music/v1.5".to_string(),
        &headers,
        Some(body),
    );
    Json(json!({"request_id": FAL_REQUEST_ID, "status": "IN_QUEUE"}))
}

async fn fal_status(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(
        "GET",
        format!("/fal-ai/minimax-music/requests/{}/status", id),
        &headers,
        None,
    );
    if state.fal_polls.fetch_add(1, Ordering::SeqCst) == 0 {
        Json(json!({"status": "IN_PROGRESS"}))
    } else {
        Json(json!({"status": "COMPLETED"}))
    }
}

async fn fal_result(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    state.record(
        "GET",
        format!("/fal-ai/minimax-music/requests/{}", id),
        &headers,
        None,
    );
    Json(json!({"audio": {"url": format!("{}/audio/song.mp3", state.base_url)}}))
}

async fn fal_cancel(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    state.record(
        "PUT",
        format!("/fal-ai/minimax-music/requests/{}/cancel", id),
        &headers,
        None,
    );
    if id == FAL_FINISHED_REQUEST_ID {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "ALREADY_COMPLETED"})),
        )
            .into_response()
    } else {
        (
            StatusCode::ACCEPTED,
            Json(json!({"status": "CANCELLATION_REQUESTED"})),
        )
            .into_response()
    }
}

async fn submit_mastering(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<Value> {
    state.record("POST", "/masterings".to_string(), &headers, Some(body));
    Json(json!({"id": MASTERING_ID, "status": "waiting"}))
}

async fn get_mastering(
    State(state): State<Arc<MockState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    state.record("GET", format!("/masterings/{}", id), &headers, None);
    if state.mastering_polls.fetch_add(1, Ordering::SeqCst) == 0 {
        Json(json!({"id": MASTERING_ID, "status": "processing"}))
    } else {
        Json(json!({
            "id": MASTERING_ID,
            "status": "succeeded",
            "output_audio_url": format!("{}/audio/mastered.wav", state.base_url)
        }))
    }
}

async fn audio(Path(name): Path<String>) -> Response {
    match name.as_str() {
        "song.mp3" => MP3_BYTES.into_response(),
        "mastered.wav" => WAV_BYTES.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Mock provider server instance
///
/// When dropped, the server shuts down.
pub struct MockProviders {
    /// Base URL for all mocked APIs (e.g., "http://127.0.0.1:12345")
    pub base_url: String,
    pub state: Arc<MockState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl MockProviders {
    /// Spawns the mock on a random port (127.0.0.1:0).
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = Arc::new(MockState {
            base_url: base_url.clone(),
            task_polls: AtomicUsize::new(0),
            fal_polls: AtomicUsize::new(0),
            mastering_polls: AtomicUsize::new(0),
            broken_audio: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/v1/task", post(submit_task))
            .route("/api/v1/task/{id}", get(get_task))
            .route("/fal-ai/minimax-music/v1.5", post(submit_fal))
            .route("/fal-ai/minimax-music/requests/{id}", get(fal_result))
            .route("/fal-ai/minimax-music/requests/{id}/status", get(fal_status))
            .route("/fal-ai/minimax-music/requests/{id}/cancel", put(fal_cancel))
            .route("/masterings", post(submit_mastering))
            .route("/masterings/{id}", get(get_mastering))
            .route("/audio/{name}", get(audio))
            .with_state(state.clone());

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Mock server failed");
        });

        Self {
            base_url,
            state,
            _shutdown_tx: Some(shutdown_tx),
        }
    }

    /// GoAPI and fal configured with keys, AI Mastering without one, LANDR
    /// absent. Everything points at the mock.
    pub fn providers_config(&self) -> ProvidersConfig {
        let endpoint = |key: Option<&str>| ProviderEndpoint {
            api_key: key.map(str::to_string),
            base_url: Some(self.base_url.clone()),
        };
        ProvidersConfig {
            goapi: endpoint(Some(GOAPI_KEY)),
            fal: endpoint(Some(FAL_KEY)),
            ai_mastering: endpoint(None),
            request_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        }
    }

    pub fn router(&self) -> MusicRouter {
        MusicRouter::from_config(&self.providers_config()).expect("Failed to build router")
    }

    pub fn mastering(&self) -> MasteringService {
        MasteringService::from_config(&self.providers_config())
            .expect("Failed to build mastering service")
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_to(&self, prefix: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with(prefix))
            .collect()
    }
}

impl Drop for MockProviders {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
