use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use focus_core::error::FocusError;
use focus_core::types::{Analysis, SessionRecord};
use serde_json::{json, Value};
use tracing::warn;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, body: Value) -> ApiError {
    (status, Json(body))
}

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ── Analyze ─────────────────────────────────────────────────────────────

pub fn analyze_routes() -> Router<AppState> {
    Router::new().route("/analyze", post(analyze))
}

async fn analyze(
    State(state): State<AppState>,
    payload: Result<Json<SessionRecord>, JsonRejection>,
) -> Result<Json<Analysis>, ApiError> {
    let Json(record) = payload.map_err(|e| {
        warn!("Rejected /analyze payload: {}", e);
        api_error(
            StatusCode::BAD_REQUEST,
            json!({"error": "invalid JSON payload"}),
        )
    })?;

    let analysis = state.analyzer.analyze(&record).await.map_err(|e| {
        warn!("Rejected /analyze session: {}", e);
        api_error(StatusCode::BAD_REQUEST, json!({"error": e.to_string()}))
    })?;
    Ok(Json(analysis))
}

// ── Upload ──────────────────────────────────────────────────────────────

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload))
}

struct ImageField {
    file_name: String,
    content_type: Option<String>,
    bytes: Bytes,
}

fn no_image() -> ApiError {
    api_error(StatusCode::BAD_REQUEST, json!({"error": "No image uploaded"}))
}

fn multipart_error(e: MultipartError) -> ApiError {
    warn!("Failed reading upload: {}", e);
    api_error(e.status(), json!({"error": "No image uploaded", "details": e.body_text()}))
}

/// Find the `image` field of the form.
async fn read_image_field(multipart: &mut Multipart) -> Result<Option<ImageField>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("image") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("image").to_string();
        let content_type = field.content_type().map(String::from);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok(Some(ImageField {
            file_name,
            content_type,
            bytes,
        }));
    }
    Ok(None)
}

async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ApiError> {
    let mut multipart = multipart.map_err(|_| no_image())?;
    let image = read_image_field(&mut multipart).await?.ok_or_else(no_image)?;

    let stored = state
        .image_store
        .save(&image.file_name, image.content_type.as_deref(), &image.bytes)
        .await
        .map_err(|e| {
            warn!("Failed to save upload: {}", e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "Failed to save image"}),
            )
        })?;

    let result = state.classifier.classify(&stored.local_path).await;
    state.image_store.discard(&stored).await;

    match result {
        Ok(ml_result) => {
            let mut body = json!({ "ml_result": ml_result });
            if let Some(url) = stored.object_url {
                body["image_url"] = Value::String(url);
            }
            Ok(Json(body))
        }
        Err(FocusError::ClassifierOutput { message, output }) => {
            warn!("Classifier output was not JSON: {}", message);
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Failed to parse ML result",
                    "details": message,
                    "output": output,
                }),
            ))
        }
        Err(e) => {
            warn!("Classifier failed: {}", e);
            let stderr = match &e {
                FocusError::Classifier { stderr, .. } => stderr.clone(),
                _ => String::new(),
            };
            Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "ML classification failed",
                    "details": e.to_string(),
                    "stderr": stderr,
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{build_router, AppState};
    use axum::body::{Body, Bytes};
    use axum::http::{HeaderMap, Request, StatusCode, Uri};
    use axum::Router;
    use focus_core::config::{AppConfig, ClassifierConfig, StorageBackend};
    use serde_json::{json, Value};
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "focuslens-test-boundary";
    const KEY_FIXTURE: &str = concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../focus-core/tests/fixtures/service_account.json"
    );

    /// A request seen by a fake upstream.
    #[derive(Debug, Clone)]
    struct Seen {
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    }

    type Log = Arc<Mutex<Vec<Seen>>>;

    /// Serve a fake upstream on an ephemeral port. `reply` maps the request
    /// path to a status and JSON body.
    async fn spawn_upstream(reply: fn(&str) -> (StatusCode, Value)) -> (String, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap, body: Bytes| {
            let seen = seen.clone();
            async move {
                let (status, value) = reply(uri.path());
                seen.lock().unwrap().push(Seen { uri, headers, body });
                (status, axum::Json(value))
            }
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), log)
    }

    /// An upstream that accepts connections and never answers.
    async fn spawn_stalled_upstream() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        format!("http://{}", addr)
    }

    fn generated(path: &str) -> (StatusCode, Value) {
        if path.ends_with("/token") {
            return (
                StatusCode::OK,
                json!({"access_token": "tok-1", "token_type": "Bearer", "expires_in": 3600}),
            );
        }
        (
            StatusCode::OK,
            json!({"candidates": [{"content": {"parts": [{"text": "You kept a strong focus."}]}}]}),
        )
    }

    fn upstream_error(_path: &str) -> (StatusCode, Value) {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"error": {"message": "overloaded"}}),
        )
    }

    fn storage_ok(path: &str) -> (StatusCode, Value) {
        if path.ends_with("/token") {
            return (StatusCode::OK, json!({"access_token": "tok-gcs"}));
        }
        (StatusCode::OK, json!({"name": "object"}))
    }

    /// Copy the fixture key with its token endpoint pointed at `base`.
    fn key_file(dir: &TempDir, base: &str) -> PathBuf {
        let mut key: Value =
            serde_json::from_str(&std::fs::read_to_string(KEY_FIXTURE).unwrap()).unwrap();
        key["token_uri"] = json!(format!("{}/token", base));
        let path = dir.path().join("sa.json");
        std::fs::write(&path, key.to_string()).unwrap();
        path
    }

    fn classifier_script(dir: &TempDir, body: &str) -> ClassifierConfig {
        let script = dir.path().join("classify.sh");
        std::fs::write(&script, body).unwrap();
        ClassifierConfig {
            python: "sh".into(),
            script,
            timeout_secs: 5,
            ..ClassifierConfig::default()
        }
    }

    fn base_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.upload_dir = dir.path().join("uploads");
        config.classifier = classifier_script(
            dir,
            "test -f \"$1\" || exit 9\necho '{\"status\": \"attentive\", \"confidence\": 0.91}'\n",
        );
        config
    }

    fn session_request() -> Request<Body> {
        let body = json!({
            "id": "s-1",
            "startTime": 0,
            "endTime": 180000,
            "logs": [
                {"timestamp": 0, "status": "attentive", "confidence": 0.9},
                {"timestamp": 60000, "status": "distracted", "confidence": 0.6},
                {"timestamp": 120000, "status": "attentive", "confidence": 0.9}
            ]
        });
        Request::builder()
            .method("POST")
            .uri("/analyze")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn upload_request(field: &str, bytes: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"frame.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(config: AppConfig, req: Request<Body>) -> (StatusCode, Value) {
        let app = build_router(AppState::new(config).unwrap());
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn uploads_left(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("uploads"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    // ── /analyze with a generation backend ──────────────────────────────

    #[tokio::test]
    async fn test_generation_timeout_falls_back() {
        let base = spawn_stalled_upstream().await;
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.summary.endpoint = format!("{}/v1beta", base);
        config.summary.api_key = Some("test-key".into());
        config.summary.timeout_secs = 1;

        let (status, body) = send(config, session_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["summary"],
            "Overall attention 66.7%, 1 distractions (avg 60.0 s)"
        );
    }

    #[tokio::test]
    async fn test_api_key_summary() {
        let (base, log) = spawn_upstream(generated).await;
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.summary.endpoint = format!("{}/v1beta", base);
        config.summary.model = "gemini-test".into();
        config.summary.api_key = Some("test-key".into());

        let (status, body) = send(config, session_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], "You kept a strong focus.");

        let seen = log.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].uri.path(), "/v1beta/models/gemini-test:generateContent");
        assert_eq!(seen[0].uri.query(), Some("key=test-key"));
        let payload: Value = serde_json::from_slice(&seen[0].body).unwrap();
        let prompt = payload["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("66.7%"));
        assert!(payload["generationConfig"]["maxOutputTokens"].is_number());
        assert_eq!(payload["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_service_account_summary() {
        let (base, log) = spawn_upstream(generated).await;
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.summary.endpoint = format!("{}/v1beta", base);
        config.summary.credentials_path = Some(key_file(&dir, &base));
        config.summary.api_key = Some("unused-key".into());

        let (status, body) = send(config, session_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"], "You kept a strong focus.");

        let seen = log.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].uri.path(), "/token");
        let form = String::from_utf8_lossy(&seen[0].body).to_string();
        assert!(form.contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"));
        assert!(form.contains("assertion="));
        assert_eq!(seen[1].headers["authorization"], "Bearer tok-1");
        assert!(seen[1].uri.query().is_none());
    }

    #[tokio::test]
    async fn test_upstream_failure_falls_back() {
        let (base, log) = spawn_upstream(upstream_error).await;
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.summary.endpoint = base;
        config.summary.api_key = Some("test-key".into());

        let (status, body) = send(config, session_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["summary"],
            "Overall attention 66.7%, 1 distractions (avg 60.0 s)"
        );
        // One attempt, no retries.
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.summary.credentials_path = Some(dir.path().join("missing.json"));

        let (status, body) = send(config, session_request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["summary"],
            "Overall attention 66.7%, 1 distractions (avg 60.0 s)"
        );
    }

    // ── /upload ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_upload_returns_classifier_result() {
        let dir = TempDir::new().unwrap();
        let config = base_config(&dir);

        let (status, body) = send(config, upload_request("image", b"fake-jpeg")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ml_result"]["status"], "attentive");
        assert!(body.get("image_url").is_none());
        assert_eq!(uploads_left(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_upload_without_image_field() {
        let dir = TempDir::new().unwrap();
        let (status, body) = send(base_config(&dir), upload_request("photo", b"x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image uploaded");
    }

    #[tokio::test]
    async fn test_upload_requires_multipart() {
        let dir = TempDir::new().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(base_config(&dir), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No image uploaded");
    }

    #[tokio::test]
    async fn test_upload_classifier_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.classifier = classifier_script(&dir, "echo 'model missing' >&2\nexit 1\n");

        let (status, body) = send(config, upload_request("image", b"fake-jpeg")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "ML classification failed");
        assert!(body["stderr"].as_str().unwrap().contains("model missing"));
        assert_eq!(uploads_left(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_upload_unparseable_classifier_output() {
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.classifier = classifier_script(&dir, "echo 'not json'\n");

        let (status, body) = send(config, upload_request("image", b"fake-jpeg")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to parse ML result");
        assert_eq!(body["output"], "not json\n");
    }

    #[tokio::test]
    async fn test_upload_save_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let mut config = base_config(&dir);
        config.storage.upload_dir = blocker.join("uploads");

        let (status, body) = send(config, upload_request("image", b"fake-jpeg")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to save image");
    }

    #[tokio::test]
    async fn test_upload_too_large() {
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.server.max_upload_bytes = 1024;

        let (status, _) = send(config, upload_request("image", &[0u8; 4096])).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_upload_to_bucket() {
        let (base, log) = spawn_upstream(storage_ok).await;
        let dir = TempDir::new().unwrap();
        let mut config = base_config(&dir);
        config.storage.backend = StorageBackend::Gcs;
        config.storage.bucket = Some("frames".into());
        config.storage.upload_endpoint = format!("{}/upload/storage/v1", base);
        config.summary.credentials_path = Some(key_file(&dir, &base));

        let (status, body) = send(config, upload_request("image", b"fake-jpeg")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ml_result"]["confidence"], 0.91);
        let url = body["image_url"].as_str().unwrap();
        assert!(url.starts_with("https://storage.googleapis.com/frames/"));
        assert!(url.ends_with("_frame.jpg"));

        let seen = log.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].uri.path(), "/upload/storage/v1/b/frames/o");
        assert_eq!(seen[1].headers["authorization"], "Bearer tok-gcs");
        assert_eq!(seen[1].headers["content-type"], "image/jpeg");
        assert_eq!(&seen[1].body[..], b"fake-jpeg");
        assert_eq!(uploads_left(dir.path()), 0);
    }
}
