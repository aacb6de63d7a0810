//! JSON HTTP API for document chat.
//!
//! Every handler is a thin adapter over the [`Orchestrator`]; sessions live
//! in the orchestrator, not in the server.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/health` | Health check (version and live session count) |
//! | `POST`   | `/sessions` | Create a session |
//! | `GET`    | `/sessions/{id}` | Session state, document, and transcript |
//! | `DELETE` | `/sessions/{id}` | End a session |
//! | `POST`   | `/sessions/{id}/upload?name=` | Upload a PDF, PNG or JPEG (raw body) |
//! | `GET`    | `/sessions/{id}/pages/{n}` | Rendered page `n` as PNG |
//! | `POST`   | `/sessions/{id}/ask` | Ask a question about the document |
//! | `POST`   | `/sessions/{id}/voice` | Ask a spoken question (WAV body) |
//! | `POST`   | `/transcribe` | Transcribe a WAV body |
//! | `POST`   | `/speak` | Synthesize speech, returns WAV |
//! | `POST`   | `/draw` | Generate an image URL from a prompt |
//! | `POST`   | `/assist` | Ungrounded assistant answer |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "busy", "message": "a document is already being processed for this session" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `busy` (409),
//! `not_ready` (409), `payload_too_large` (413), `unsupported_upload` (415),
//! `decode_error` (422), `content_policy` (422), `upstream_error` (502),
//! `unavailable` (503), `internal` (500).
//!
//! Upload and audio bodies are capped at `server.max_upload_bytes`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::orchestrator::{Answer, Components, Orchestrator, SpokenExchange, UploadSummary};
use crate::session::{SessionError, SessionSnapshot};
use crate::speech::wav;

type AppState = Arc<Orchestrator>;

/// Build the orchestrator from config and serve until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let components = Components::from_config(config).await?;
    let orchestrator = Arc::new(Orchestrator::new(config.clone(), components));

    match orchestrator.purge_orphaned_collections().await {
        Ok(0) => {}
        Ok(n) => tracing::info!(collections = n, "removed collections left by earlier sessions"),
        Err(e) => tracing::warn!(error = %e, "could not clean up leftover session collections"),
    }
    spawn_idle_sweeper(Arc::clone(&orchestrator), config.server.session_idle_secs);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "docchat server listening");
    println!("docchat server listening on http://{}", bind_addr);
    axum::serve(listener, router(orchestrator)).await?;

    Ok(())
}

/// End idle sessions every quarter of the idle limit (between 1s and 60s).
fn spawn_idle_sweeper(orchestrator: Arc<Orchestrator>, idle_secs: u64) {
    if idle_secs == 0 {
        return;
    }
    let max_idle = Duration::from_secs(idle_secs);
    let period = (max_idle / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            orchestrator.sweep_idle(max_idle).await;
        }
    });
}

/// The full route table, with permissive CORS and request tracing.
pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(orchestrator.config().server.max_upload_bytes);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_end_session),
        )
        .route("/sessions/{id}/upload", post(handle_upload).layer(body_limit))
        .route("/sessions/{id}/pages/{page}", get(handle_page))
        .route("/sessions/{id}/ask", post(handle_ask))
        .route("/sessions/{id}/voice", post(handle_voice).layer(body_limit))
        .route("/transcribe", post(handle_transcribe).layer(body_limit))
        .route("/speak", post(handle_speak))
        .route("/draw", post(handle_draw))
        .route("/assist", post(handle_assist))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(orchestrator)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: message.into(),
    }
}

/// Raw request bodies: an oversize body becomes `payload_too_large`.
fn raw_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, AppError> {
    body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                code: "payload_too_large",
                message: rejection.body_text(),
            }
        } else {
            bad_request(rejection.body_text())
        }
    })
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        let (status, code) = match &err {
            SessionError::Decode(_) => (StatusCode::UNPROCESSABLE_ENTITY, "decode_error"),
            SessionError::UnsupportedUpload => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_upload"),
            SessionError::Busy => (StatusCode::CONFLICT, "busy"),
            SessionError::NotReady(_) => (StatusCode::CONFLICT, "not_ready"),
            SessionError::ContentPolicy(_) => (StatusCode::UNPROCESSABLE_ENTITY, "content_policy"),
            SessionError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            SessionError::IngestionFailed(_) | SessionError::QueryFailed(_) => {
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            SessionError::UnknownSession(_) => (StatusCode::NOT_FOUND, "not_found"),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
}

async fn handle_health(State(orch): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: orch.session_count().await,
    })
}

// ============ Sessions ============

async fn handle_create_session(
    State(orch): State<AppState>,
) -> (StatusCode, Json<SessionSnapshot>) {
    let session = orch.create_session().await;
    (StatusCode::CREATED, Json(session.snapshot().await))
}

async fn handle_get_session(
    State(orch): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let session = orch.session(&id).await?;
    Ok(Json(session.snapshot().await))
}

async fn handle_end_session(
    State(orch): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    orch.end_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct UploadParams {
    name: Option<String>,
}

/// The upload runs on its own task so a client that disconnects mid-upload
/// cannot leave the session stuck in `Ingesting`.
async fn handle_upload(
    State(orch): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UploadParams>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<UploadSummary>, AppError> {
    let body = raw_body(body)?;
    if body.is_empty() {
        return Err(bad_request("upload body must not be empty"));
    }
    let session = orch.session(&id).await?;
    let name = params
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload".to_string());

    let task = tokio::spawn(async move { orch.upload(&session, &name, body.to_vec()).await });
    let summary = task
        .await
        .map_err(|e| internal(format!("upload task failed: {}", e)))??;
    Ok(Json(summary))
}

async fn handle_page(
    State(orch): State<AppState>,
    Path((id, page)): Path<(String, u32)>,
) -> Result<Response, AppError> {
    let session = orch.session(&id).await?;
    let png = session
        .page_image(page)
        .await
        .ok_or_else(|| not_found(format!("no rendered image for page {}", page)))?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

// ============ Questions ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

async fn handle_ask(
    State(orch): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<Answer>, AppError> {
    let session = orch.session(&id).await?;
    Ok(Json(orch.ask(&session, &req.question).await?))
}

async fn handle_voice(
    State(orch): State<AppState>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<SpokenExchange>, AppError> {
    let body = raw_body(body)?;
    let session = orch.session(&id).await?;
    let clip = wav::decode(&body).map_err(|e| bad_request(format!("invalid audio: {}", e)))?;
    Ok(Json(orch.ask_spoken(&session, &clip).await?))
}

// ============ Speech, images, assistant ============

#[derive(Serialize)]
struct TranscribeResponse {
    text: String,
}

async fn handle_transcribe(
    State(orch): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<TranscribeResponse>, AppError> {
    let body = raw_body(body)?;
    let clip = wav::decode(&body).map_err(|e| bad_request(format!("invalid audio: {}", e)))?;
    let text = orch.transcribe(&clip).await?;
    Ok(Json(TranscribeResponse { text }))
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
}

async fn handle_speak(
    State(orch): State<AppState>,
    Json(req): Json<SpeakRequest>,
) -> Result<Response, AppError> {
    if req.text.trim().is_empty() {
        return Err(bad_request("text must not be empty"));
    }
    let clip = orch.synthesize_speech(&req.text).await?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav::encode(&clip)).into_response())
}

#[derive(Deserialize)]
struct DrawRequest {
    prompt: String,
}

#[derive(Serialize)]
struct DrawResponse {
    url: String,
}

async fn handle_draw(
    State(orch): State<AppState>,
    Json(req): Json<DrawRequest>,
) -> Result<Json<DrawResponse>, AppError> {
    if req.prompt.trim().is_empty() {
        return Err(bad_request("prompt must not be empty"));
    }
    let url = orch.draw(&req.prompt).await?;
    Ok(Json(DrawResponse { url }))
}

#[derive(Serialize)]
struct AssistResponse {
    answer: String,
}

async fn handle_assist(
    State(orch): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AssistResponse>, AppError> {
    if req.question.trim().is_empty() {
        return Err(bad_request("question must not be empty"));
    }
    let answer = orch.assist(&req.question).await?;
    Ok(Json(AssistResponse { answer }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use docchat_core::store::memory::InMemoryIndex;
    use tower::ServiceExt;

    use crate::embedding::HashingEmbedder;
    use crate::extract::PdfExtractor;
    use crate::imagegen::DisabledGenerator;
    use crate::llm::DisabledModel;
    use crate::render::DisabledRenderer;
    use crate::speech::WavFileDevice;

    fn test_router() -> Router {
        test_router_with(Config::with_db("unused.sqlite"))
    }

    fn test_router_with(config: Config) -> Router {
        let dir = std::env::temp_dir();
        let components = Components {
            extractor: Arc::new(PdfExtractor),
            renderer: Arc::new(DisabledRenderer),
            embedder: Arc::new(HashingEmbedder::new(64)),
            index: Arc::new(InMemoryIndex::new()),
            model: Arc::new(DisabledModel),
            speech: None,
            audio: Arc::new(WavFileDevice::new(None, dir)),
            imagegen: Arc::new(DisabledGenerator),
        };
        let orch = Orchestrator::new(config, components);
        router(Arc::new(orch))
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_session(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(Request::post("/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = json_body(response).await;
        assert_eq!(json["state"], "empty");
        assert!(json["created_at"].is_string());
        json["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_router();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["sessions"], 0);
    }

    #[tokio::test]
    async fn test_unknown_session_is_404() {
        let app = test_router();
        let response = app
            .oneshot(Request::get("/sessions/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn test_empty_session_refuses_question() {
        let app = test_router();
        let id = create_session(&app).await;

        let response = app
            .clone()
            .oneshot(post_json(
                &format!("/sessions/{}/ask", id),
                serde_json::json!({ "question": "What is the capital of France?" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["refused"], true);
        assert!(json["sources"].as_array().unwrap().is_empty());

        let response = app
            .oneshot(Request::get(format!("/sessions/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json = json_body(response).await;
        assert_eq!(json["transcript"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_415() {
        let app = test_router();
        let id = create_session(&app).await;
        let response = app
            .oneshot(
                Request::post(format!("/sessions/{}/upload?name=notes.txt", id))
                    .body(Body::from("just some text"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "unsupported_upload");
    }

    #[tokio::test]
    async fn test_large_pdf_reaches_the_parser() {
        let app = test_router();
        let id = create_session(&app).await;
        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.resize(3 * 1024 * 1024, b' ');

        let response = app
            .oneshot(
                Request::post(format!("/sessions/{}/upload?name=big.pdf", id))
                    .body(Body::from(pdf))
                    .unwrap(),
            )
            .await
            .unwrap();
        // past the body limit and into extraction, which rejects the junk
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "decode_error");
    }

    #[tokio::test]
    async fn test_oversize_upload_is_json_413() {
        let mut config = Config::with_db("unused.sqlite");
        config.server.max_upload_bytes = 1024;
        let app = test_router_with(config);
        let id = create_session(&app).await;

        let mut pdf = b"%PDF-1.4\n".to_vec();
        pdf.resize(4096, b' ');
        let response = app
            .clone()
            .oneshot(
                Request::post(format!("/sessions/{}/upload?name=big.pdf", id))
                    .body(Body::from(pdf))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "payload_too_large");

        let response = app
            .clone()
            .oneshot(Request::get(format!("/sessions/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["state"], "empty");

        let response = app
            .oneshot(
                Request::post("/transcribe")
                    .body(Body::from(vec![0u8; 4096]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(json_body(response).await["error"]["code"], "payload_too_large");
    }

    #[tokio::test]
    async fn test_speak_without_speech_is_503() {
        let app = test_router();
        let response = app
            .oneshot(post_json("/speak", serde_json::json!({ "text": "hello" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let app = test_router();
        let id = create_session(&app).await;
        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/sessions/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(Request::get(format!("/sessions/{}", id)).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_transcribe_rejects_non_wav() {
        let app = test_router();
        let response = app
            .oneshot(
                Request::post("/transcribe")
                    .body(Body::from("not audio"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "bad_request");
    }

    #[test]
    fn test_error_mapping() {
        let err = AppError::from(SessionError::Busy);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, "busy");
        let err = AppError::from(SessionError::Decode("truncated".into()));
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code, "decode_error");
    }
}
