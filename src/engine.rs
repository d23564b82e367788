//! Движок синтеза речи
//!
//! Полный путь запроса: очистка текста, голосовой профиль, разбиение на
//! фрагменты, ёфикация и ударения, синтез фрагментов по порядку, склейка,
//! хвост, запись WAV. Модели загружаются через общий [`ModelRegistry`] при
//! первом обращении или заранее через [`SynthesisEngine::warm_up`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::audio::{assemble, finish_tail, resample, trim_silence, write_wav, AssemblerConfig, AudioBuffer};
use crate::config::{Device, SynthesisConfig, SynthesisOverrides};
use crate::error::{EngineError, Result};
use crate::model::{InferenceContext, Interrupted, ModelHandle, ModelKey, ModelRegistry};
use crate::synth::ChunkSynthesizer;
use crate::text::{
    detect_language, ensure_terminal_punctuation, normalize_text, segment, AccentAnnotator,
    Language, TextChunk, Yoficator,
};
use crate::voice::{ReferenceAudio, ReferenceLimits, VoiceProfile, VoiceProfileCache};

/// Каталог результатов по умолчанию
pub const DEFAULT_OUTPUT_DIR: &str = "audio_output";
/// Ёмкость кэша голосовых профилей по умолчанию
pub const DEFAULT_VOICE_CACHE_CAPACITY: usize = 16;

/// Состояние движка
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    /// Модели не загружены
    Uninitialized,
    /// Идёт загрузка моделей
    ModelsLoading,
    /// Модель синтеза для устройства по умолчанию загружена
    Ready,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::ModelsLoading => "models_loading",
            Self::Ready => "ready",
        };
        f.write_str(name)
    }
}

/// Запрос на синтез
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Текст для озвучивания
    pub text: String,
    /// Эталонная запись голоса
    pub reference: ReferenceAudio,
    /// Транскрипция эталонной записи
    pub reference_text: String,
    /// Переопределения параметров синтеза
    pub overrides: SynthesisOverrides,
    /// Срок выполнения
    pub deadline: Option<Instant>,
    /// Признак отмены
    pub cancel: CancellationToken,
}

impl SynthesisRequest {
    pub fn new(
        text: impl Into<String>,
        reference: ReferenceAudio,
        reference_text: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            reference,
            reference_text: reference_text.into(),
            overrides: SynthesisOverrides::default(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_overrides(mut self, overrides: SynthesisOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Ограничить время выполнения, считая от текущего момента
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Результат синтеза
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechOutput {
    /// Путь к записанному WAV
    pub path: PathBuf,
    /// Длительность записи
    pub duration: Duration,
    /// Число синтезированных фрагментов
    pub chunk_count: usize,
    /// Частота дискретизации результата
    pub sample_rate: u32,
}

/// Движок синтеза
pub struct SynthesisEngine {
    registry: Arc<ModelRegistry>,
    defaults: SynthesisConfig,
    output_dir: PathBuf,
    limits: ReferenceLimits,
    profiles: VoiceProfileCache,
    yoficator: Arc<Yoficator>,
    state: Mutex<EngineState>,
    warmup: tokio::sync::Mutex<()>,
}

impl SynthesisEngine {
    /// Создать движок. Параметры по умолчанию проверяются сразу.
    pub fn new(registry: Arc<ModelRegistry>, defaults: SynthesisConfig) -> Result<Self> {
        defaults.validate()?;
        let state = if registry.is_loaded(&ModelKey::speech(defaults.device)) {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        };

        Ok(Self {
            registry,
            defaults,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            limits: ReferenceLimits::default(),
            profiles: VoiceProfileCache::new(DEFAULT_VOICE_CACHE_CAPACITY),
            yoficator: Arc::new(Yoficator::without_dictionary()),
            state: Mutex::new(state),
            warmup: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_yoficator(mut self, yoficator: Yoficator) -> Self {
        self.yoficator = Arc::new(yoficator);
        self
    }

    pub fn with_voice_cache_capacity(mut self, capacity: usize) -> Self {
        self.profiles = VoiceProfileCache::new(capacity);
        self
    }

    pub fn with_reference_limits(mut self, limits: ReferenceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Текущее состояние. Загрузка, которую запрос перестал ждать, может
    /// завершиться позже, поэтому готовность сверяется с реестром.
    pub fn state(&self) -> EngineState {
        let mut state = self.state.lock();
        if *state != EngineState::Ready
            && self.registry.is_loaded(&ModelKey::speech(self.defaults.device))
        {
            *state = EngineState::Ready;
        }
        *state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    pub fn defaults(&self) -> &SynthesisConfig {
        &self.defaults
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Число профилей в кэше
    pub fn cached_profiles(&self) -> usize {
        self.profiles.len()
    }

    /// Загрузить модели, нужные конфигурации по умолчанию.
    ///
    /// Ошибка модели ударений не мешает готовности: разметка в этом случае
    /// пропускается.
    pub async fn warm_up(&self) -> Result<()> {
        let _guard = self.warmup.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        info!("Warming up models on {}", self.defaults.device);
        let ctx = InferenceContext::default();
        self.speech_synthesizer(self.defaults.device, &ctx).await?;
        self.accent_annotator(&self.defaults, &ctx).await?;
        info!("Engine is ready");
        Ok(())
    }

    /// Дождаться модели из реестра в пределах срока запроса.
    ///
    /// Загрузка идёт в отдельной задаче: запрос, ушедший по сроку или
    /// отмене, перестаёт ждать, а загрузка завершается для остальных.
    async fn load_model(&self, key: ModelKey, ctx: &InferenceContext) -> Result<ModelHandle> {
        let registry = self.registry.clone();
        let load = tokio::spawn(async move { registry.get(key).await });

        let joined = ctx.bounded(load).await.map_err(|reason| {
            info!("Stopped waiting for model {}: {:?}", key, reason);
            interrupted(reason)
        })?;
        let loaded = joined
            .map_err(|e| EngineError::Other(anyhow::anyhow!("model load task failed: {}", e)))?;
        Ok(loaded?)
    }

    /// Получить синтезатор для устройства, обновив состояние движка
    async fn speech_synthesizer(
        &self,
        device: Device,
        ctx: &InferenceContext,
    ) -> Result<ChunkSynthesizer> {
        let key = ModelKey::speech(device);
        let tracks_state = device == self.defaults.device;

        let prior = self.state();
        if tracks_state && !self.registry.is_loaded(&key) {
            self.set_state(EngineState::ModelsLoading);
        }

        match self.load_model(key, ctx).await {
            Ok(handle) => {
                if tracks_state {
                    self.set_state(EngineState::Ready);
                }
                Ok(ChunkSynthesizer::new(handle)?)
            }
            Err(e) => {
                if tracks_state {
                    let next = match &e {
                        EngineError::Timeout | EngineError::Cancelled => prior,
                        _ => EngineState::Uninitialized,
                    };
                    self.set_state(next);
                }
                Err(e)
            }
        }
    }

    fn set_state(&self, next: EngineState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!("Engine state {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Разметчик ударений. Ошибка загрузки модели только отключает разметку,
    /// истёкший срок или отмена прерывают запрос.
    async fn accent_annotator(
        &self,
        config: &SynthesisConfig,
        ctx: &InferenceContext,
    ) -> Result<Option<AccentAnnotator>> {
        if !config.enable_accent {
            return Ok(None);
        }
        let key = ModelKey::accent(config.accent_model_size, config.device);
        match self.load_model(key, ctx).await {
            Ok(handle) => match AccentAnnotator::new(handle) {
                Ok(annotator) => Ok(Some(annotator)),
                Err(e) => {
                    warn!("Skipping stress marks: {}", e);
                    Ok(None)
                }
            },
            Err(e @ (EngineError::Timeout | EngineError::Cancelled)) => Err(e),
            Err(e) => {
                warn!("Skipping stress marks, accent model failed to load: {}", e);
                Ok(None)
            }
        }
    }

    /// Построить голосовой профиль или взять его из кэша
    pub async fn voice_profile(
        &self,
        reference: &ReferenceAudio,
        reference_text: &str,
    ) -> Result<Arc<VoiceProfile>> {
        let (bytes, extension) = reference.read().await?;
        let identity = VoiceProfile::identity_of(&bytes, reference_text);
        if let Some(profile) = self.profiles.get(&identity) {
            debug!("Reusing voice profile {}", identity);
            return Ok(profile);
        }

        let limits = self.limits;
        let reference_text = reference_text.to_string();
        let profile = tokio::task::spawn_blocking(move || {
            VoiceProfile::from_bytes(&bytes, extension.as_deref(), &reference_text, &limits)
        })
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("voice profile task failed: {}", e)))??;

        info!(
            "Built voice profile {} ({:.2} s)",
            profile.identity,
            profile.reference_audio.duration_secs()
        );
        Ok(self.profiles.insert(profile))
    }

    /// Привести эталон профиля к частоте модели, если они различаются
    async fn profile_at_rate(
        &self,
        profile: Arc<VoiceProfile>,
        sample_rate: u32,
    ) -> Result<Arc<VoiceProfile>> {
        if profile.reference_audio.sample_rate == sample_rate {
            return Ok(profile);
        }
        info!(
            "Model runs at {} Hz, converting voice profile {} from {} Hz",
            sample_rate, profile.identity, profile.reference_audio.sample_rate
        );
        let converted = tokio::task::spawn_blocking(move || profile.at_rate(sample_rate))
            .await
            .map_err(|e| EngineError::Other(anyhow::anyhow!("voice profile task failed: {}", e)))??;
        Ok(self.profiles.replace(converted))
    }

    /// Подготовить текст фрагмента: ёфикация, ударения, конечная пунктуация
    async fn prepare_chunk(
        &self,
        chunk: &TextChunk,
        config: &SynthesisConfig,
        annotator: Option<&AccentAnnotator>,
        ctx: &InferenceContext,
    ) -> TextChunk {
        let russian = detect_language(&chunk.raw_text) == Language::Russian;
        let text = if config.enable_yoficator && russian {
            self.yoficator.yoficate(chunk.raw_text.trim())
        } else {
            chunk.raw_text.trim().to_string()
        };

        let annotated = match annotator {
            Some(annotator) if russian => match annotator.annotate(&text, ctx).await {
                Ok(annotated) => Some(ensure_terminal_punctuation(&annotated)),
                Err(e) => {
                    warn!(
                        "Chunk {}: stress marking failed, using plain text: {}",
                        chunk.sequence_index, e
                    );
                    None
                }
            },
            _ => None,
        };

        TextChunk {
            raw_text: ensure_terminal_punctuation(&text),
            separator: chunk.separator.clone(),
            annotated_text: annotated,
            sequence_index: chunk.sequence_index,
        }
    }

    /// Синтезировать речь и записать результат в WAV
    pub async fn synthesize_speech(&self, request: SynthesisRequest) -> Result<SpeechOutput> {
        let started = std::time::Instant::now();
        let config = self.defaults.with_overrides(&request.overrides)?;
        let ctx = InferenceContext::new(request.deadline, request.cancel);

        let text = normalize_text(&request.text);
        if text.is_empty() {
            return Err(EngineError::Input("text is empty".into()));
        }

        let profile = self
            .voice_profile(&request.reference, &request.reference_text)
            .await?;

        let chunks = segment(&text, config.max_chunk_chars);
        if chunks.is_empty() {
            return Err(EngineError::Input("text is empty".into()));
        }
        info!(
            "Synthesizing {} characters in {} chunk(s)",
            text.chars().count(),
            chunks.len()
        );

        check(&ctx)?;
        let synthesizer = self.speech_synthesizer(config.device, &ctx).await?;
        let profile = self.profile_at_rate(profile, synthesizer.sample_rate()).await?;
        let annotator = self.accent_annotator(&config, &ctx).await?;

        let seed = config.seed.unwrap_or_else(rand::random);
        info!("Using seed {}", seed);

        let mut buffers = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            check(&ctx)?;
            let prepared = self
                .prepare_chunk(chunk, &config, annotator.as_ref(), &ctx)
                .await;
            check(&ctx)?;

            let audio = synthesizer
                .synthesize(&prepared, &profile, &config, seed, &ctx)
                .await?;
            let audio = if config.remove_silence {
                blocking(move || Ok(trim_silence(audio))).await?
            } else {
                audio
            };
            debug!(
                "Chunk {}/{} done: {} ms",
                chunk.sequence_index + 1,
                chunks.len(),
                audio.duration_ms()
            );
            buffers.push(audio);
        }
        check(&ctx)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(output_file_name());
        let assembler = AssemblerConfig::from(&config);
        let output_rate = config.output_sample_rate;
        let (tail_fade, tail_silence) = (config.tail_fade_ms, config.tail_silence_ms);
        let write_path = path.clone();

        let audio = blocking(move || {
            let assembled = assemble(buffers, &assembler)?;
            let mut audio = finish_tail(assembled, tail_fade, tail_silence);
            if let Some(rate) = output_rate {
                audio = resample(&audio, rate)?;
            }
            write_wav(&audio, &write_path)?;
            Ok(audio)
        })
        .await?;

        let output = SpeechOutput {
            path,
            duration: Duration::from_millis(audio.duration_ms()),
            chunk_count: chunks.len(),
            sample_rate: audio.sample_rate,
        };
        info!(
            "Wrote {} ({:.2} s of audio, {} chunk(s)) in {:.1?}",
            output.path.display(),
            output.duration.as_secs_f32(),
            output.chunk_count,
            started.elapsed()
        );
        Ok(output)
    }
}

fn check(ctx: &InferenceContext) -> Result<()> {
    ctx.check().map_err(interrupted)
}

fn interrupted(reason: Interrupted) -> EngineError {
    match reason {
        Interrupted::Timeout => EngineError::Timeout,
        Interrupted::Cancelled => EngineError::Cancelled,
    }
}

async fn blocking<F>(job: F) -> Result<AudioBuffer>
where
    F: FnOnce() -> Result<AudioBuffer> + Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| EngineError::Other(anyhow::anyhow!("audio task failed: {}", e)))?
}

/// Имя файла результата: `russian_<unix-ms>_<uuid8>.wav`
fn output_file_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "russian_{}_{}.wav",
        chrono::Utc::now().timestamp_millis(),
        &id[..8]
    )
}
