//! Модели: интерфейсы бэкендов, реестр загруженных моделей и их шлюзы
//!
//! Внутреннее устройство моделей скрыто за трейтами [`SpeechModel`] и
//! [`AccentModel`]. Вызовы моделей синхронные и выполняются в
//! `spawn_blocking`; каждый [`ModelHandle`] несёт шлюз, который допускает
//! только один вызов модели одновременно.

pub mod cache;
pub mod registry;
pub mod worker;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::AudioBuffer;
use crate::config::{AccentModelSize, Device, OdeMethod};
use crate::error::{AnnotationError, ModelLoadError, SynthesisError};
use crate::voice::VoiceProfile;

pub use registry::ModelRegistry;

/// Родная частота дискретизации русской модели F5-TTS
pub const NATIVE_SAMPLE_RATE: u32 = 24_000;

/// Вид модели
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    /// Модель синтеза речи
    Speech,
    /// Модель расстановки ударений
    Accent(AccentModelSize),
}

/// Ключ модели в реестре
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub kind: ModelKind,
    pub device: Device,
}

impl ModelKey {
    pub fn speech(device: Device) -> Self {
        Self {
            kind: ModelKind::Speech,
            device,
        }
    }

    pub fn accent(size: AccentModelSize, device: Device) -> Self {
        Self {
            kind: ModelKind::Accent(size),
            device,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ModelKind::Speech => write!(f, "speech@{}", self.device),
            ModelKind::Accent(size) => write!(f, "accent-{}@{}", size.as_str(), self.device),
        }
    }
}

/// Параметры генерации одного фрагмента
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Текст для синтеза (с ударениями, если они расставлены)
    pub gen_text: String,
    /// Транскрипция эталона
    pub ref_text: String,
    pub ode_method: OdeMethod,
    pub ode_steps: u32,
    pub use_ema_weights: bool,
    pub speed: f32,
    pub cfg_strength: f32,
    pub sway_sampling_coef: f32,
    pub target_rms: f32,
    pub seed: u64,
}

/// Запрос к модели синтеза
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub params: GenerationParams,
    /// Голосовой профиль для клонирования
    pub profile: Arc<VoiceProfile>,
}

/// Модель синтеза речи с клонированием голоса
pub trait SpeechModel: Send + Sync {
    /// Частота дискретизации выходного сигнала
    fn sample_rate(&self) -> u32;

    /// Сгенерировать аудио. Блокирующий вызов.
    fn generate(&self, request: &GenerationRequest) -> Result<AudioBuffer, SynthesisError>;
}

/// Модель расстановки ударений
pub trait AccentModel: Send + Sync {
    /// Вернуть текст со знаком `+` перед ударной гласной. Блокирующий вызов.
    fn accentize(&self, text: &str) -> Result<String, AnnotationError>;
}

/// Загрузчик моделей
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_speech(&self, device: Device) -> Result<Arc<dyn SpeechModel>, ModelLoadError>;

    async fn load_accent(
        &self,
        size: AccentModelSize,
        device: Device,
    ) -> Result<Arc<dyn AccentModel>, ModelLoadError>;
}

/// Загруженная модель
#[derive(Clone)]
pub enum LoadedModel {
    Speech(Arc<dyn SpeechModel>),
    Accent(Arc<dyn AccentModel>),
}

/// Причина прерывания ожидания шлюза или результата модели
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Timeout,
    Cancelled,
}

/// Срок и признак отмены запроса
#[derive(Debug, Clone, Default)]
pub struct InferenceContext {
    pub deadline: Option<Instant>,
    pub cancel: CancellationToken,
}

impl InferenceContext {
    pub fn new(deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Проверка на границе фрагментов
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Interrupted::Timeout),
            _ => Ok(()),
        }
    }

    /// Дождаться future в пределах срока и до отмены.
    ///
    /// Прерванный future сбрасывается, поэтому работу, которая должна
    /// завершиться независимо от запроса, передают сюда через `JoinHandle`.
    pub async fn bounded<F>(&self, future: F) -> Result<F::Output, Interrupted>
    where
        F: Future,
    {
        let wait = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, future)
                    .await
                    .map_err(|_| Interrupted::Timeout),
                None => Ok(future.await),
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            output = wait => output,
        }
    }
}

/// Ошибка исполнения под шлюзом
#[derive(Debug)]
pub enum GateError {
    Interrupted(Interrupted),
    /// Задача с вызовом модели аварийно завершилась
    Panicked(String),
}

impl From<Interrupted> for GateError {
    fn from(value: Interrupted) -> Self {
        GateError::Interrupted(value)
    }
}

/// Загруженная модель и её эксклюзивный шлюз
#[derive(Clone)]
pub struct ModelHandle {
    key: ModelKey,
    model: LoadedModel,
    gate: Arc<Mutex<()>>,
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("key", &self.key).finish()
    }
}

impl ModelHandle {
    pub fn new(key: ModelKey, model: LoadedModel) -> Self {
        Self {
            key,
            model,
            gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn key(&self) -> ModelKey {
        self.key
    }

    pub fn speech(&self) -> Option<Arc<dyn SpeechModel>> {
        match &self.model {
            LoadedModel::Speech(model) => Some(model.clone()),
            LoadedModel::Accent(_) => None,
        }
    }

    pub fn accent(&self) -> Option<Arc<dyn AccentModel>> {
        match &self.model {
            LoadedModel::Accent(model) => Some(model.clone()),
            LoadedModel::Speech(_) => None,
        }
    }

    /// Две копии указывают на одну и ту же загруженную модель
    pub fn same_as(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.gate, &other.gate)
    }

    /// Занят ли шлюз в данный момент
    pub fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Дождаться шлюза с учётом срока и отмены
    pub async fn acquire(&self, ctx: &InferenceContext) -> Result<OwnedMutexGuard<()>, Interrupted> {
        ctx.bounded(self.gate.clone().lock_owned()).await
    }

    /// Выполнить блокирующий вызов модели под шлюзом.
    ///
    /// Захваченный шлюз передаётся в блокирующую задачу и освобождается
    /// только после завершения вызова, даже если ожидающая сторона ушла по
    /// сроку или была отменена.
    pub async fn run_exclusive<T, F>(&self, ctx: &InferenceContext, job: F) -> Result<T, GateError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = self.acquire(ctx).await?;
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            job()
        });

        let joined = match ctx.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, task)
                .await
                .map_err(|_| GateError::Interrupted(Interrupted::Timeout))?,
            None => task.await,
        };
        joined.map_err(|e| GateError::Panicked(e.to_string()))
    }
}
