//! HTTP-эндпоинты

use std::path::PathBuf;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use log::{error, info, warn};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use super::state::AppState;
use crate::config::SynthesisOverrides;
use crate::engine::SynthesisRequest;
use crate::error::EngineError;
use crate::voice::ReferenceAudio;

/// Предел размера тела запроса (эталонная запись)
const BODY_LIMIT: usize = 64 * 1024 * 1024;

pub const OUTPUT_PATH_HEADER: &str = "x-output-path";
pub const DURATION_HEADER: &str = "x-audio-duration-ms";
pub const CHUNK_COUNT_HEADER: &str = "x-chunk-count";

/// Создать роутер приложения
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/warmup", post(warm_up))
        .route("/api/synthesize", post(synthesize))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([
                    HeaderName::from_static(OUTPUT_PATH_HEADER),
                    HeaderName::from_static(DURATION_HEADER),
                    HeaderName::from_static(CHUNK_COUNT_HEADER),
                ]),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    category: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunk_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

/// Ошибка API поверх ошибки движка
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn input(message: impl Into<String>) -> Self {
        Self(EngineError::Input(message.into()))
    }

    /// HTTP-статус для категории ошибки
    pub fn status(&self) -> StatusCode {
        match self.0.category() {
            "input" => StatusCode::BAD_REQUEST,
            "model_load" | "out_of_memory" => StatusCode::SERVICE_UNAVAILABLE,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            "cancelled" => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        } else {
            warn!("Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            category: self.0.category(),
            message: self.0.to_string(),
            chunk_index: self.0.chunk_index(),
            hint: self.0.hint(),
        };
        (status, Json(serde_json::json!({ "error": body }))).into_response()
    }
}

/// Health check
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let engine_state = state.engine.state();
    let status = if state.engine.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "state": engine_state,
            "device": state.engine.defaults().device,
            "models_loaded": state.engine.registry().load_count(),
        })),
    )
}

/// Загрузить модели заранее
async fn warm_up(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state.engine.warm_up().await?;
    Ok(Json(serde_json::json!({ "state": state.engine.state() })))
}

#[derive(Default)]
struct SynthesizeForm {
    text: Option<String>,
    ref_text: Option<String>,
    ref_audio: Option<(Bytes, Option<String>)>,
    ref_audio_path: Option<PathBuf>,
    overrides: SynthesisOverrides,
    timeout_ms: Option<u64>,
}

async fn read_form(mut multipart: Multipart) -> Result<SynthesizeForm, ApiError> {
    let mut form = SynthesizeForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::input(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "ref_audio" => {
                let extension = field
                    .file_name()
                    .and_then(|name| name.rsplit_once('.'))
                    .map(|(_, ext)| ext.to_lowercase());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::input(format!("cannot read ref_audio: {}", e)))?;
                form.ref_audio = Some((data, extension));
            }
            _ => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::input(format!("cannot read field '{}': {}", name, e)))?;
                match name.as_str() {
                    "text" => form.text = Some(value),
                    "ref_text" => form.ref_text = Some(value),
                    "ref_audio_path" => form.ref_audio_path = Some(PathBuf::from(value.trim())),
                    "config" if !value.trim().is_empty() => {
                        form.overrides = serde_json::from_str(&value)
                            .map_err(|e| ApiError::input(format!("invalid config: {}", e)))?;
                    }
                    "timeout_ms" if !value.trim().is_empty() => {
                        let ms = value
                            .trim()
                            .parse()
                            .map_err(|e| ApiError::input(format!("invalid timeout_ms: {}", e)))?;
                        form.timeout_ms = Some(ms);
                    }
                    "config" | "timeout_ms" => {}
                    other => warn!("Ignoring unknown field '{}'", other),
                }
            }
        }
    }
    Ok(form)
}

/// Синтезировать речь
async fn synthesize(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;

    let text = form.text.ok_or_else(|| ApiError::input("field 'text' is required"))?;
    let ref_text = form
        .ref_text
        .ok_or_else(|| ApiError::input("field 'ref_text' is required"))?;
    let reference = match (form.ref_audio, form.ref_audio_path) {
        (Some((data, extension)), _) => ReferenceAudio::Bytes { data, extension },
        (None, Some(path)) => ReferenceAudio::Path(state.resolve_reference(&path)?),
        (None, None) => return Err(ApiError::input("either 'ref_audio' or 'ref_audio_path' is required")),
    };

    let mut request = SynthesisRequest::new(text, reference, ref_text).with_overrides(form.overrides);
    if let Some(timeout) = form.timeout_ms.map(Duration::from_millis).or(state.default_timeout) {
        request = request.with_timeout(timeout);
    }

    let output = state.engine.synthesize_speech(request).await?;
    let wav = tokio::fs::read(&output.path).await.map_err(EngineError::from)?;
    info!("Serving {} ({} bytes)", output.path.display(), wav.len());

    let mut response = (StatusCode::OK, [(header::CONTENT_TYPE, "audio/wav")], wav).into_response();
    let headers = response.headers_mut();
    let path = output.path.display().to_string();
    if let Ok(value) = HeaderValue::from_str(&path) {
        headers.insert(OUTPUT_PATH_HEADER, value);
    }
    headers.insert(DURATION_HEADER, HeaderValue::from(output.duration.as_millis() as u64));
    headers.insert(CHUNK_COUNT_HEADER, HeaderValue::from(output.chunk_count));
    Ok(response)
}
