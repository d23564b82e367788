//! Процесс инференса F5-TTS и модели ударений
//!
//! Модели работают в отдельном локальном процессе (по умолчанию
//! `python -m f5_worker`), с которым библиотека общается по HTTP:
//!
//! - `GET /health` - готовность процесса;
//! - `POST /v1/models` - загрузка модели, ответ `{model_id, sample_rate}`;
//! - `POST /v1/synthesize` - multipart: `ref_audio` (WAV) и `params` (JSON),
//!   ответ `audio/wav`;
//! - `POST /v1/accent` - `{model_id, model_size, text}` -> `{text}`.
//!
//! Код 507 означает нехватку памяти ускорителя. Вместо запуска процесса можно
//! подключиться к уже работающему через `RU_TTS_WORKER_URL`.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{multipart, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::runtime::Handle;
use tokio::sync::Mutex;

use super::cache::WeightCache;
use super::{AccentModel, GenerationParams, GenerationRequest, ModelLoader, SpeechModel};
use crate::audio::{decode_audio_bytes, encode_wav_bytes, AudioBuffer};
use crate::config::{AccentModelSize, Device};
use crate::error::{AnnotationError, ModelLoadError, SynthesisError};

/// Переменная окружения с адресом уже запущенного процесса
pub const WORKER_URL_ENV: &str = "RU_TTS_WORKER_URL";

/// Настройки процесса инференса
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Исполняемый файл
    pub command: String,
    /// Аргументы перед `--host/--port`
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    /// Адрес уже запущенного процесса; если задан, процесс не запускается
    pub url: Option<String>,
    /// Сколько ждать готовности процесса, с
    pub startup_timeout_secs: u64,
    /// Таймаут одного HTTP-запроса, с
    pub request_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            command: "python".to_string(),
            args: vec!["-m".to_string(), "f5_worker".to_string()],
            host: "127.0.0.1".to_string(),
            port: 7865,
            url: None,
            startup_timeout_secs: 120,
            request_timeout_secs: 600,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkerErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoadModelRequest<'a> {
    kind: &'a str,
    device: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vocab: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accent_model_size: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LoadModelResponse {
    model_id: String,
    #[serde(default)]
    sample_rate: Option<u32>,
}

#[derive(Debug, Serialize)]
struct SynthesizeParams<'a> {
    model_id: &'a str,
    ref_id: &'a str,
    #[serde(flatten)]
    params: &'a GenerationParams,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccentPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_size: Option<String>,
    text: String,
}

fn device_arg(device: Device) -> &'static str {
    match device {
        Device::Cpu => "cpu",
        Device::Accelerator => "cuda",
    }
}

/// Управляемый процесс инференса
pub struct InferenceWorker {
    config: WorkerConfig,
    base_url: String,
    external: bool,
    client: Client,
    child: Mutex<Option<Child>>,
}

impl InferenceWorker {
    pub fn new(mut config: WorkerConfig) -> Result<Self, ModelLoadError> {
        if config.url.is_none() {
            config.url = std::env::var(WORKER_URL_ENV).ok().filter(|u| !u.trim().is_empty());
        }
        let external = config.url.is_some();
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", config.host, config.port))
            .trim_end_matches('/')
            .to_string();

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelLoadError::Worker(format!("cannot create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            base_url,
            external,
            client,
            child: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn is_healthy(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Запустить процесс, если он ещё не работает, и дождаться готовности
    pub async fn ensure_running(&self) -> Result<(), ModelLoadError> {
        let mut guard = self.child.lock().await;

        if let Some(child) = guard.as_mut() {
            match child.try_wait() {
                Ok(None) => return Ok(()),
                Ok(Some(status)) => warn!("Inference worker exited with {}, restarting", status),
                Err(e) => warn!("Cannot query inference worker state: {}", e),
            }
            *guard = None;
        }

        if self.is_healthy().await {
            return Ok(());
        }
        if self.external {
            return Err(ModelLoadError::Worker(format!(
                "inference worker at {} is not responding",
                self.base_url
            )));
        }

        info!(
            "Starting inference worker: {} {}",
            self.config.command,
            self.config.args.join(" ")
        );
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .args(["--host", &self.config.host, "--port", &self.config.port.to_string()])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ModelLoadError::Worker(format!("failed to start '{}': {}", self.config.command, e))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!("worker: {}", line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("worker: {}", line);
                }
            });
        }

        let attempts = self.config.startup_timeout_secs * 2;
        for _ in 0..attempts.max(1) {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(ModelLoadError::Worker(format!(
                    "inference worker exited during startup with {}",
                    status
                )));
            }
            if self.is_healthy().await {
                info!("Inference worker is ready at {}", self.base_url);
                *guard = Some(child);
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        let _ = child.kill().await;
        Err(ModelLoadError::Worker(format!(
            "inference worker did not become ready within {} s",
            self.config.startup_timeout_secs
        )))
    }

    /// Остановить процесс, если он был запущен библиотекой
    pub async fn shutdown(&self) {
        let mut guard = self.child.lock().await;
        if let Some(child) = guard.as_mut() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop inference worker: {}", e);
            }
        }
        *guard = None;
    }

    async fn load_model(&self, request: &LoadModelRequest<'_>) -> Result<LoadModelResponse, ModelLoadError> {
        self.ensure_running().await?;

        let response = self
            .client
            .post(format!("{}/v1/models", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| ModelLoadError::Worker(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<LoadModelResponse>()
                .await
                .map_err(|e| ModelLoadError::Worker(format!("invalid load response: {}", e)));
        }

        let body = error_body(response).await;
        Err(match (status, body.code.as_deref()) {
            (StatusCode::INSUFFICIENT_STORAGE, _) | (_, Some("out_of_memory")) => {
                ModelLoadError::OutOfMemory(body.error)
            }
            (_, Some("device_unavailable")) => ModelLoadError::IncompatibleDevice(body.error),
            (_, Some("missing_weights")) => ModelLoadError::MissingWeights(body.error),
            _ => ModelLoadError::Worker(format!("{}: {}", status, body.error)),
        })
    }
}

async fn error_body(response: reqwest::Response) -> WorkerErrorBody {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(WorkerErrorBody {
        error: if text.is_empty() { status.to_string() } else { text },
        code: None,
    })
}

/// Загрузчик моделей через процесс инференса
pub struct WorkerLoader {
    worker: Arc<InferenceWorker>,
    weights: Arc<WeightCache>,
}

impl WorkerLoader {
    pub fn new(worker: Arc<InferenceWorker>, weights: Arc<WeightCache>) -> Self {
        Self { worker, weights }
    }
}

#[async_trait]
impl ModelLoader for WorkerLoader {
    async fn load_speech(&self, device: Device) -> Result<Arc<dyn SpeechModel>, ModelLoadError> {
        let weights = self.weights.ensure_speech_weights().await?;
        let loaded = self
            .worker
            .load_model(&LoadModelRequest {
                kind: "speech",
                device: device_arg(device),
                checkpoint: Some(weights.checkpoint.display().to_string()),
                vocab: Some(weights.vocab.display().to_string()),
                accent_model_size: None,
            })
            .await?;

        let sample_rate = loaded.sample_rate.unwrap_or(super::NATIVE_SAMPLE_RATE);
        debug!("Speech model {} ready ({} Hz)", loaded.model_id, sample_rate);
        Ok(Arc::new(WorkerSpeechModel {
            worker: self.worker.clone(),
            model_id: loaded.model_id,
            sample_rate,
            runtime: Handle::current(),
        }))
    }

    async fn load_accent(
        &self,
        size: AccentModelSize,
        device: Device,
    ) -> Result<Arc<dyn AccentModel>, ModelLoadError> {
        let loaded = self
            .worker
            .load_model(&LoadModelRequest {
                kind: "accent",
                device: device_arg(device),
                checkpoint: None,
                vocab: None,
                accent_model_size: Some(size.as_str()),
            })
            .await?;

        Ok(Arc::new(WorkerAccentModel {
            worker: self.worker.clone(),
            model_id: loaded.model_id,
            size,
            runtime: Handle::current(),
        }))
    }
}

/// Модель синтеза в процессе инференса
struct WorkerSpeechModel {
    worker: Arc<InferenceWorker>,
    model_id: String,
    sample_rate: u32,
    runtime: Handle,
}

impl WorkerSpeechModel {
    async fn request(&self, request: &GenerationRequest) -> Result<AudioBuffer, SynthesisError> {
        let wav = encode_wav_bytes(&request.profile.reference_audio)
            .map_err(|e| SynthesisError::InvalidProfile(e.to_string()))?;
        let params = serde_json::to_string(&SynthesizeParams {
            model_id: &self.model_id,
            ref_id: &request.profile.identity,
            params: &request.params,
        })
        .map_err(|e| SynthesisError::Backend(e.to_string()))?;

        let ref_part = multipart::Part::bytes(wav)
            .file_name("reference.wav")
            .mime_str("audio/wav")
            .map_err(|e| SynthesisError::Backend(e.to_string()))?;
        let form = multipart::Form::new()
            .part("ref_audio", ref_part)
            .text("params", params);

        let response = self
            .worker
            .client
            .post(format!("{}/v1/synthesize", self.worker.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| SynthesisError::Backend(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = error_body(response).await;
            return Err(match (status, body.code.as_deref()) {
                (StatusCode::INSUFFICIENT_STORAGE, _) | (_, Some("out_of_memory")) => {
                    SynthesisError::OutOfMemory(body.error)
                }
                (StatusCode::BAD_REQUEST, _) => SynthesisError::InvalidProfile(body.error),
                _ => SynthesisError::Backend(format!("{}: {}", status, body.error)),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Backend(e.to_string()))?;
        decode_audio_bytes(&bytes, Some("wav")).map_err(|e| SynthesisError::Backend(e.to_string()))
    }
}

impl SpeechModel for WorkerSpeechModel {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn generate(&self, request: &GenerationRequest) -> Result<AudioBuffer, SynthesisError> {
        self.runtime.block_on(self.request(request)).map_err(|e| {
            error!("Worker synthesis failed: {}", e);
            e
        })
    }
}

/// Модель ударений в процессе инференса
struct WorkerAccentModel {
    worker: Arc<InferenceWorker>,
    model_id: String,
    size: AccentModelSize,
    runtime: Handle,
}

impl WorkerAccentModel {
    async fn request(&self, text: &str) -> Result<String, AnnotationError> {
        let response = self
            .worker
            .client
            .post(format!("{}/v1/accent", self.worker.base_url))
            .json(&AccentPayload {
                model_id: Some(self.model_id.clone()),
                model_size: Some(self.size.as_str().to_string()),
                text: text.to_string(),
            })
            .send()
            .await
            .map_err(|e| AnnotationError::Model(e.to_string()))?;

        if !response.status().is_success() {
            let body = error_body(response).await;
            return Err(AnnotationError::Model(body.error));
        }

        response
            .json::<AccentPayload>()
            .await
            .map(|payload| payload.text)
            .map_err(|e| AnnotationError::Model(format!("invalid accent response: {}", e)))
    }
}

impl AccentModel for WorkerAccentModel {
    fn accentize(&self, text: &str) -> Result<String, AnnotationError> {
        self.runtime.block_on(self.request(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OdeMethod;
    use crate::model::{ModelKey, ModelRegistry};
    use crate::voice::VoiceProfile;
    use axum::extract::{Json, Multipart};
    use axum::http::{header, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::{get, post};
    use axum::Router;
    use tempfile::tempdir;

    async fn load(Json(body): Json<serde_json::Value>) -> impl IntoResponse {
        if body["device"] == "cuda" {
            return (
                StatusCode::INSUFFICIENT_STORAGE,
                Json(serde_json::json!({"error": "CUDA out of memory", "code": "out_of_memory"})),
            )
                .into_response();
        }
        let id = format!("{}-1", body["kind"].as_str().unwrap_or("model"));
        Json(serde_json::json!({"model_id": id, "sample_rate": 24000})).into_response()
    }

    async fn synthesize(mut multipart: Multipart) -> impl IntoResponse {
        let mut params = serde_json::Value::Null;
        let mut ref_len = 0;
        while let Ok(Some(field)) = multipart.next_field().await {
            let name = field.name().unwrap_or_default().to_string();
            let data = field.bytes().await.unwrap();
            match name.as_str() {
                "params" => params = serde_json::from_slice(&data).unwrap(),
                "ref_audio" => ref_len = data.len(),
                _ => {}
            }
        }
        if ref_len == 0 || params["model_id"] != "speech-1" || params["ode_method"] != "euler" {
            return StatusCode::BAD_REQUEST.into_response();
        }
        let wav = encode_wav_bytes(&AudioBuffer::new(vec![0.25; 2_400], 24_000)).unwrap();
        ([(header::CONTENT_TYPE, "audio/wav")], wav).into_response()
    }

    async fn accent(Json(payload): Json<AccentPayload>) -> Json<AccentPayload> {
        Json(AccentPayload {
            model_id: None,
            model_size: None,
            text: payload.text.replacen('и', "+и", 1),
        })
    }

    async fn serve_worker() -> String {
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/v1/models", post(load))
            .route("/v1/synthesize", post(synthesize))
            .route("/v1/accent", post(accent));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn loader_for(url: String) -> (WorkerLoader, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        for file in [super::super::cache::CHECKPOINT_FILE, super::super::cache::VOCAB_FILE] {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"x").unwrap();
        }
        let mut worker = InferenceWorker::new(WorkerConfig {
            url: Some(url),
            ..WorkerConfig::default()
        })
        .unwrap();
        worker.client = Client::builder().no_proxy().build().unwrap();
        let weights = WeightCache::new(dir.path()).offline();
        (WorkerLoader::new(Arc::new(worker), Arc::new(weights)), dir)
    }

    fn profile() -> Arc<VoiceProfile> {
        let audio = AudioBuffer::new((0..72_000).map(|i| (i as f32 * 0.01).sin() * 0.3).collect(), 24_000);
        Arc::new(
            VoiceProfile::from_buffer(audio, "эталон", "ref".into(), &Default::default()).unwrap(),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn speech_model_round_trip_through_worker() {
        let (loader, _dir) = loader_for(serve_worker().await).await;
        let registry = ModelRegistry::new(Arc::new(loader));
        let handle = registry.get(ModelKey::speech(Device::Cpu)).await.unwrap();
        let model = handle.speech().unwrap();
        assert_eq!(model.sample_rate(), 24_000);

        let request = GenerationRequest {
            params: GenerationParams {
                gen_text: "Прив+ет.".into(),
                ref_text: "эталон.".into(),
                ode_method: OdeMethod::Euler,
                ode_steps: 32,
                use_ema_weights: true,
                speed: 0.3,
                cfg_strength: 2.0,
                sway_sampling_coef: -1.0,
                target_rms: 0.1,
                seed: 7,
            },
            profile: profile(),
        };
        let audio = tokio::task::spawn_blocking(move || model.generate(&request))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(audio.len(), 2_400);
        assert_eq!(audio.sample_rate, 24_000);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn accent_model_through_worker() {
        let (loader, _dir) = loader_for(serve_worker().await).await;
        let model = loader.load_accent(AccentModelSize::Turbo, Device::Cpu).await.unwrap();
        let text = tokio::task::spawn_blocking(move || model.accentize("привет"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text, "пр+ивет");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn out_of_memory_on_load_is_classified() {
        let (loader, _dir) = loader_for(serve_worker().await).await;
        let err = loader.load_speech(Device::Accelerator).await.err().unwrap();
        assert!(matches!(err, ModelLoadError::OutOfMemory(_)));
        assert_eq!(err.hint(), "retry on CPU or reduce concurrency");
    }

    #[tokio::test]
    async fn unreachable_external_worker_is_a_load_error() {
        let (loader, _dir) = loader_for("http://127.0.0.1:9".to_string()).await;
        let err = loader.load_speech(Device::Cpu).await.err().unwrap();
        assert!(matches!(err, ModelLoadError::Worker(_)));
    }
}
