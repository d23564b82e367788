mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use tempfile::{tempdir, TempDir};
use tokio_test::assert_ok;
use tower::ServiceExt;

use common::*;
use ru_tts::server::{create_router, AppState};
use ru_tts::Settings;

const BOUNDARY: &str = "ru-tts-test-boundary";

enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, Vec<u8>),
}

fn multipart(parts: Vec<Part<'_>>) -> Body {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            Part::File(name, file_name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/wav\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(&data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    Body::from(body)
}

fn synthesize_request(parts: Vec<Part<'_>>) -> Request<Body> {
    Request::post("/api/synthesize")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(multipart(parts))
        .unwrap()
}

fn app(loader: Arc<FakeLoader>) -> (Router, TempDir) {
    let dir = tempdir().unwrap();
    let engine = Arc::new(engine_with(loader, dir.path()));
    (create_router(AppState::new(engine, &Settings::default())), dir)
}

async fn json(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_and_readiness() {
    let (app, _dir) = app(Arc::new(FakeLoader::new(ToneModel::default())));

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["status"], "ok");

    let response = app
        .clone()
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(response).await["state"], "uninitialized");

    let response = app
        .clone()
        .oneshot(Request::post("/api/warmup").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["state"], "ready");
}

#[tokio::test]
async fn synthesize_returns_wav_with_headers() {
    let loader = Arc::new(FakeLoader::new(ToneModel::default()));
    let (app, _dir) = app(loader.clone());

    let response = app
        .oneshot(synthesize_request(vec![
            Part::Text("text", "Привет."),
            Part::Text("ref_text", "Это эталон."),
            Part::File("ref_audio", "voice.wav", reference_wav(4.0)),
            Part::Text("config", r#"{"ode_steps": 8, "seed": 3}"#),
            Part::Text("timeout_ms", "60000"),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "audio/wav");
    assert_eq!(headers["x-chunk-count"], "1");
    let path = headers["x-output-path"].to_str().unwrap().to_string();
    assert!(path.ends_with(".wav"));
    let duration: u64 = headers["x-audio-duration-ms"].to_str().unwrap().parse().unwrap();
    assert!(duration > 1_000);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..4], b"RIFF");
    assert_eq!(body.to_vec(), std::fs::read(&path).unwrap());
    assert_eq!(loader.speech.calls.load(Ordering::SeqCst), 1);
}

fn app_with_references(loader: Arc<FakeLoader>) -> (Router, TempDir) {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("voices")).unwrap();
    let settings = Settings {
        reference_dir: Some(dir.path().join("voices")),
        ..Settings::default()
    };
    let engine = Arc::new(engine_with(loader, dir.path()));
    (create_router(AppState::new(engine, &settings)), dir)
}

fn path_request(path: &str) -> Request<Body> {
    synthesize_request(vec![
        Part::Text("text", "Добрый день."),
        Part::Text("ref_text", "Эталон."),
        Part::Text("ref_audio_path", path),
    ])
}

#[tokio::test]
async fn reference_can_be_given_as_a_path() {
    let (app, dir) = app_with_references(Arc::new(FakeLoader::new(ToneModel::default())));
    let reference = write_reference(&dir.path().join("voices"), 3.0);
    let name = reference.file_name().unwrap().to_str().unwrap().to_string();

    let response = app.clone().oneshot(path_request(&name)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(path_request(reference.to_str().unwrap())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn reference_paths_stay_inside_the_reference_dir() {
    let loader = Arc::new(FakeLoader::new(ToneModel::default()));
    let (app, dir) = app_with_references(loader.clone());
    let outside = write_reference(dir.path(), 3.0);
    let escape = format!("../{}", outside.file_name().unwrap().to_str().unwrap());

    for path in [outside.to_str().unwrap(), escape.as_str(), "/etc/passwd"] {
        let response = app.clone().oneshot(path_request(path)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", path);
        assert_eq!(json(response).await["error"]["category"], "input");
    }
    assert_eq!(loader.speech.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn reference_paths_are_disabled_by_default() {
    let (app, dir) = app(Arc::new(FakeLoader::new(ToneModel::default())));
    let reference = write_reference(dir.path(), 3.0);

    let response = app.oneshot(path_request(reference.to_str().unwrap())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert!(body["error"]["message"].as_str().unwrap().contains("ref_audio"));
}

#[tokio::test]
async fn input_errors_are_reported_as_json() {
    let loader = Arc::new(FakeLoader::new(ToneModel::default()));
    let (app, _dir) = app(loader.clone());

    let response = app
        .clone()
        .oneshot(synthesize_request(vec![
            Part::Text("text", "   "),
            Part::Text("ref_text", "Эталон."),
            Part::File("ref_audio", "voice.wav", reference_wav(4.0)),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json(response).await;
    assert_eq!(body["error"]["category"], "input");
    assert!(body["error"].get("chunk_index").is_none());

    let response = app
        .clone()
        .oneshot(synthesize_request(vec![
            Part::Text("text", "Привет."),
            Part::Text("ref_text", "Эталон."),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(synthesize_request(vec![
            Part::Text("text", "Привет."),
            Part::Text("ref_text", "Эталон."),
            Part::File("ref_audio", "voice.wav", reference_wav(4.0)),
            Part::Text("config", r#"{"unknown_option": 1}"#),
        ]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(loader.speech.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_load_failure_is_service_unavailable_with_hint() {
    let loader = Arc::new(FakeLoader::new(ToneModel::default()));
    loader.speech_fails.store(true, Ordering::SeqCst);
    let (app, _dir) = app(loader);

    let response = app
        .oneshot(synthesize_request(vec![
            Part::Text("text", "Привет."),
            Part::Text("ref_text", "Эталон."),
            Part::File("ref_audio", "voice.wav", reference_wav(4.0)),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json(response).await;
    assert_eq!(body["error"]["category"], "model_load");
    assert!(body["error"]["hint"].as_str().unwrap().contains("RU_TTS_CACHE_DIR"));
}

#[tokio::test]
async fn chunk_failure_carries_its_index() {
    let (app, _dir) = app(Arc::new(FakeLoader::new(ToneModel::failing_on(0))));

    let response = app
        .oneshot(synthesize_request(vec![
            Part::Text("text", "Привет."),
            Part::Text("ref_text", "Эталон."),
            Part::File("ref_audio", "voice.wav", reference_wav(4.0)),
        ]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(response).await;
    assert_eq!(body["error"]["category"], "synthesis");
    assert_eq!(body["error"]["chunk_index"], 0);
}

#[tokio::test]
async fn settings_build_a_working_state() {
    let settings = assert_ok!(serde_json::from_str::<Settings>(r#"{"default_timeout_ms": 1500}"#));
    let dir = tempdir().unwrap();
    let engine = Arc::new(engine_with(Arc::new(FakeLoader::new(ToneModel::default())), dir.path()));
    let state = AppState::new(engine, &settings);
    assert_eq!(state.default_timeout, Some(std::time::Duration::from_millis(1500)));
}
