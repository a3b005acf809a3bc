//! Router assembly: HTTP endpoints, WebSocket upgrade, uploaded and static files, CORS, and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    services::{ServeDir, ServeFile},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::state::AppState;

pub mod http;
pub mod ws;

/// Multipart framing on top of the largest allowed file.
const MULTIPART_SLACK: u64 = 1024 * 1024;

/// Build the application router with:
/// - WebSocket at `/ws/sessions/:id`
/// - REST-ish API under `/api/v1/...`
/// - Uploaded files under `/files`
/// - Static SPA with index fallback
/// - CORS (allow any origin/method/headers) and HTTP trace layer
pub fn build_router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.server.static_dir.clone();
    let static_service = ServeDir::new(&static_dir)
        .append_index_html_on_directories(true)
        .not_found_service(ServeFile::new(format!("{}/index.html", static_dir.trim_end_matches('/'))));
    let files_service = ServeDir::new(state.uploads.dir());

    let u = &state.config.uploads;
    let upload_limit = u.max_audio_bytes.max(u.max_image_bytes).max(u.max_transcript_bytes) + MULTIPART_SLACK;

    let api = Router::new()
        .route("/health", get(http::http_health))
        // Authoring
        .route("/tests", get(http::http_list_tests).post(http::http_create_test))
        .route(
            "/tests/:id",
            get(http::http_get_test).put(http::http_update_test).delete(http::http_delete_test),
        )
        .route("/tests/:id/detail", get(http::http_test_detail))
        .route(
            "/tests/:id/sections/:section_id",
            post(http::http_link_section).delete(http::http_unlink_section),
        )
        .route("/sections", get(http::http_list_sections).post(http::http_create_section))
        .route(
            "/sections/:id",
            get(http::http_get_section).put(http::http_update_section).delete(http::http_delete_section),
        )
        .route("/sections/:id/parts", get(http::http_section_parts))
        .route("/parts", post(http::http_create_part))
        .route(
            "/parts/:id",
            get(http::http_get_part).put(http::http_update_part).delete(http::http_delete_part),
        )
        .route("/parts/:id/questions", get(http::http_part_questions))
        .route("/questions", post(http::http_create_group))
        .route(
            "/questions/:id",
            get(http::http_get_group).put(http::http_update_group).delete(http::http_delete_group),
        )
        .route(
            "/uploads/:kind",
            post(http::http_upload).layer(DefaultBodyLimit::max(upload_limit as usize)),
        )
        // Runner
        .route("/sessions", post(http::http_start_session))
        .route("/sessions/:id", get(http::http_get_session))
        .route("/sessions/:id/events", post(http::http_session_event))
        .route("/sessions/:id/parts/:index", get(http::http_session_part))
        .route("/sessions/:id/highlights", post(http::http_add_highlight))
        .route("/sessions/:id/highlights/:hid", delete(http::http_remove_highlight))
        .route("/sessions/:id/settings", put(http::http_save_settings))
        .route("/sessions/:id/report", get(http::http_session_report))
        .route("/sessions/:id/writing/:part_id/assess", post(http::http_assess_writing));

    Router::new()
        .route("/ws/sessions/:id", get(ws::ws_upgrade))
        .nest("/api/v1", api)
        .nest_service("/files", files_service)
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        // Frontend fallback
        .fallback_service(static_service)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::seeds::seed_demo_content;

    async fn app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::for_tests(AppConfig::default()));
        seed_demo_content(&state.store).await.unwrap();
        (build_router(state.clone()), state)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let v = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap_or(Value::Null) };
        (status, v)
    }

    #[tokio::test]
    async fn health_ok() {
        let (app, _) = app().await;
        let (status, v) = call(&app, "GET", "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(v["ok"], true);
        assert_eq!(v["sessions"], 0);
        assert_eq!(v["submissions"], 0);
    }

    #[tokio::test]
    async fn authoring_crud_and_errors() {
        let (app, _) = app().await;
        let (status, test) = call(&app, "POST", "/api/v1/tests", Some(json!({ "title": "Mock 2", "mode": "mock" }))).await;
        assert_eq!(status, StatusCode::OK);
        let test_id = test["id"].as_str().unwrap().to_string();

        let (status, v) = call(&app, "POST", "/api/v1/tests", Some(json!({ "title": " " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("title"));

        let (_, list) = call(&app, "GET", "/api/v1/tests?mode=mock&page=1&page_size=5", None).await;
        assert_eq!(list["total_items"], 1);
        assert_eq!(list["items"][0]["title"], "Mock 2");

        let (status, section) =
            call(&app, "POST", "/api/v1/sections", Some(json!({ "modality": "reading", "title": "Reading" }))).await;
        assert_eq!(status, StatusCode::OK);
        let section_id = section["id"].as_str().unwrap().to_string();

        let link = format!("/api/v1/tests/{test_id}/sections/{section_id}");
        let (status, linked) = call(&app, "POST", &link, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(linked["test_id"], test_id.as_str());

        let (_, detail) = call(&app, "GET", &format!("/api/v1/tests/{test_id}/detail"), None).await;
        assert_eq!(detail["readings"].as_array().unwrap().len(), 1);

        let (status, _) = call(&app, "DELETE", &format!("/api/v1/tests/{test_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", &format!("/api/v1/sections/{section_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn runner_flow_over_http() {
        let (app, state) = app().await;
        let reading = state.store.list_sections(None, Some(crate::domain::Modality::Reading), false).await;
        let section_id = reading[0].id.clone();

        let (status, started) = call(&app, "POST", "/api/v1/sessions", Some(json!({ "section_id": section_id }))).await;
        assert_eq!(status, StatusCode::OK);
        let id = started["session"]["id"].as_str().unwrap().to_string();
        let events = format!("/api/v1/sessions/{id}/events");

        // answers before start are a state conflict
        let (status, _) = call(&app, "POST", &events, Some(json!({ "type": "answer", "number": 1, "value": "FALSE" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        call(&app, "POST", &events, Some(json!({ "type": "start" }))).await;
        let (status, _) = call(&app, "POST", &events, Some(json!({ "type": "answer", "number": 1, "value": "FALSE" }))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, jumped) = call(&app, "POST", &events, Some(json!({ "type": "jump_to", "number": 8 }))).await;
        assert_eq!(jumped["effects"][0]["type"], "scroll_to");
        assert_eq!(jumped["effects"][0]["anchor"], "question-8");
        assert_eq!(jumped["effects"][0]["offset_px"], -120);

        let (status, _) = call(&app, "GET", &format!("/api/v1/sessions/{id}/report"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, submitted) = call(&app, "POST", &events, Some(json!({ "type": "submit" }))).await;
        assert_eq!(submitted["session"]["phase"], "submitted");

        let (_, report) = call(&app, "GET", &format!("/api/v1/sessions/{id}/report"), None).await;
        assert_eq!(report["report"]["correct"], 1);
        assert_eq!(report["report"]["total"], 9);

        let (_, part) = call(&app, "GET", &format!("/api/v1/sessions/{id}/parts/0"), None).await;
        assert_eq!(part["reveal"], true);
        assert_eq!(part["groups"][0]["kind"], "group");

        let (status, _) = call(&app, "GET", "/api/v1/sessions/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn settings_and_highlights_over_http() {
        let (app, state) = app().await;
        let reading = state.store.list_sections(None, Some(crate::domain::Modality::Reading), false).await;
        let part_id = state.store.parts_for_section(&reading[0].id).await.unwrap()[0].id.clone();
        let (_, started) = call(&app, "POST", "/api/v1/sessions", Some(json!({ "section_id": reading[0].id }))).await;
        let id = started["session"]["id"].as_str().unwrap().to_string();

        let (status, s) = call(
            &app,
            "PUT",
            &format!("/api/v1/sessions/{id}/settings"),
            Some(json!({ "contrast": "high", "text_size": "extra_large" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(s["settings"]["contrast"], "high");

        let hl = format!("/api/v1/sessions/{id}/highlights");
        let (status, h) = call(&app, "POST", &hl, Some(json!({ "part_id": part_id, "text": "mites" }))).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "POST", &hl, Some(json!({ "part_id": part_id, "text": "mites" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let hid = h["id"].as_str().unwrap();
        let (status, _) = call(&app, "DELETE", &format!("{hl}/{hid}?part_id={part_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    fn multipart_request(uri: &str, declared: Option<u64>, filename: &str, data: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XBOUNDARY\r\nContent-Disposition: form-data; name=\"label\"\r\n\r\nPart 1\r\n");
        body.extend_from_slice(
            format!(
                "--XBOUNDARY\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: audio/mpeg\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n--XBOUNDARY--\r\n");
        let mut req = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "multipart/form-data; boundary=XBOUNDARY");
        if let Some(size) = declared {
            req = req.header("x-upload-size", size.to_string());
        }
        req.body(Body::from(body)).unwrap()
    }

    #[tokio::test]
    async fn multipart_upload_is_stored_and_served() {
        let dir = std::env::temp_dir().join(format!("ielts-router-upload-{}", uuid::Uuid::new_v4()));
        let mut config = AppConfig::default();
        config.uploads.dir = dir.to_string_lossy().into_owned();
        config.uploads.max_audio_bytes = 64;
        let app = build_router(Arc::new(AppState::for_tests(config)));

        let resp = app
            .clone()
            .oneshot(multipart_request("/api/v1/uploads/audio", Some(12), "part1.mp3", b"ID3fakeaudio"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let stored: Value = serde_json::from_slice(&to_bytes(resp.into_body(), usize::MAX).await.unwrap()).unwrap();
        assert_eq!(stored["kind"], "audio");
        assert_eq!(stored["original_name"], "part1.mp3");
        assert_eq!(stored["bytes"], 12);
        let url = stored["url"].as_str().unwrap().to_string();
        assert!(url.starts_with("/files/audio/") && url.ends_with(".mp3"), "{url}");

        let served = app.clone().oneshot(Request::get(url.as_str()).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(served.status(), StatusCode::OK);
        assert_eq!(&to_bytes(served.into_body(), usize::MAX).await.unwrap()[..], b"ID3fakeaudio");

        // declared size over the limit is refused before anything is written
        let resp = app
            .clone()
            .oneshot(multipart_request("/api/v1/uploads/audio", Some(1000), "big.mp3", b"tiny"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        // undeclared but too large while streaming
        let resp = app
            .clone()
            .oneshot(multipart_request("/api/v1/uploads/audio", None, "big.mp3", &[7u8; 100]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let resp = app
            .clone()
            .oneshot(multipart_request("/api/v1/uploads/audio", None, "notes.txt", b"text"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let kept = std::fs::read_dir(dir.join("audio")).unwrap().count();
        assert_eq!(kept, 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn unknown_upload_kind_is_rejected() {
        let (app, _) = app().await;
        let req = Request::builder()
            .method("POST")
            .uri("/api/v1/uploads/video")
            .header("content-type", "multipart/form-data; boundary=X")
            .body(Body::from("--X--\r\n"))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
