//! Голосовой профиль: проверенная эталонная запись и её транскрипция
//!
//! Профиль неизменяем после создания и разделяется между запросами через
//! [`VoiceProfileCache`] по идентификатору (md5 от байтов записи и текста).

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::audio::{decode_audio_bytes, resample, AudioBuffer};
use crate::error::{EngineError, SynthesisError};
use crate::text::normalize::{ensure_terminal_punctuation, normalize_text};

/// Источник эталонной записи
#[derive(Debug, Clone)]
pub enum ReferenceAudio {
    /// Файл на диске
    Path(PathBuf),
    /// Содержимое файла; `extension` - подсказка формата
    Bytes { data: Bytes, extension: Option<String> },
}

impl ReferenceAudio {
    /// Прочитать байты записи
    pub async fn read(&self) -> Result<(Bytes, Option<String>), EngineError> {
        match self {
            Self::Path(path) => {
                let data = tokio::fs::read(path).await.map_err(|e| {
                    EngineError::Input(format!(
                        "cannot read reference audio {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let extension = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(str::to_lowercase);
                Ok((Bytes::from(data), extension))
            }
            Self::Bytes { data, extension } => Ok((data.clone(), extension.clone())),
        }
    }
}

/// Записи тише этого уровня считаются тишиной
const SILENCE_RMS: f32 = 1e-4;

/// Ограничения на эталонную запись
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceLimits {
    /// Минимальная длительность, с
    pub min_secs: f32,
    /// Максимальная длительность, с; более длинные записи обрезаются
    pub max_secs: f32,
    /// Частота, к которой приводится запись
    pub sample_rate: u32,
}

impl Default for ReferenceLimits {
    fn default() -> Self {
        Self {
            min_secs: 2.0,
            max_secs: 12.0,
            sample_rate: crate::model::NATIVE_SAMPLE_RATE,
        }
    }
}

/// Эталон голоса
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceProfile {
    /// Моно-запись на родной частоте модели
    pub reference_audio: AudioBuffer,
    /// Нормализованная транскрипция
    pub reference_text: String,
    /// Идентификатор профиля
    pub identity: String,
}

impl VoiceProfile {
    /// Идентификатор профиля по байтам записи и тексту транскрипции
    pub fn identity_of(audio_bytes: &[u8], reference_text: &str) -> String {
        let mut context = md5::Context::new();
        context.consume(audio_bytes);
        context.consume([0u8]);
        context.consume(normalize_text(reference_text).as_bytes());
        format!("{:x}", context.compute())
    }

    /// Построить профиль из байтов записи. Блокирующая операция (декодирование).
    pub fn from_bytes(
        audio_bytes: &[u8],
        extension: Option<&str>,
        reference_text: &str,
        limits: &ReferenceLimits,
    ) -> Result<Self, EngineError> {
        let text = normalize_text(reference_text);
        if text.is_empty() {
            return Err(EngineError::Input("reference text is empty".into()));
        }

        let decoded = decode_audio_bytes(audio_bytes, extension)
            .map_err(|e| EngineError::Input(format!("invalid reference audio: {}", e)))?;

        Self::from_buffer(
            decoded,
            &text,
            Self::identity_of(audio_bytes, reference_text),
            limits,
        )
    }

    /// Построить профиль из уже декодированной записи
    pub fn from_buffer(
        audio: AudioBuffer,
        reference_text: &str,
        identity: String,
        limits: &ReferenceLimits,
    ) -> Result<Self, EngineError> {
        let reference_text = ensure_terminal_punctuation(&normalize_text(reference_text));
        if reference_text.is_empty() {
            return Err(EngineError::Input("reference text is empty".into()));
        }

        let duration = audio.duration_secs();
        if duration < limits.min_secs {
            return Err(EngineError::Input(format!(
                "reference audio is {:.2} s, at least {:.1} s required",
                duration, limits.min_secs
            )));
        }
        if audio.rms() < SILENCE_RMS {
            return Err(EngineError::Input("reference audio is silent".into()));
        }

        let mut reference_audio = resample(&audio, limits.sample_rate)?;
        if duration > limits.max_secs {
            warn!(
                "Reference audio is {:.2} s, truncating to {:.1} s",
                duration, limits.max_secs
            );
            reference_audio.truncate_secs(limits.max_secs);
        }

        debug!(
            "Voice profile {}: {:.2} s, transcript '{}'",
            identity,
            reference_audio.duration_secs(),
            reference_text
        );

        Ok(Self {
            reference_audio,
            reference_text,
            identity,
        })
    }

    /// Тот же профиль с эталоном на другой частоте
    pub fn at_rate(&self, sample_rate: u32) -> Result<Self, EngineError> {
        Ok(Self {
            reference_audio: resample(&self.reference_audio, sample_rate)?,
            reference_text: self.reference_text.clone(),
            identity: self.identity.clone(),
        })
    }

    /// Проверка профиля перед вызовом модели
    pub fn validate(&self) -> Result<(), SynthesisError> {
        if self.reference_audio.sample_rate == 0 || self.reference_audio.is_empty() {
            return Err(SynthesisError::InvalidProfile("reference audio is empty".into()));
        }
        if self.reference_text.trim().is_empty() {
            return Err(SynthesisError::InvalidProfile("reference text is empty".into()));
        }
        if self.reference_audio.samples.iter().any(|s| !s.is_finite()) {
            return Err(SynthesisError::InvalidProfile(
                "reference audio contains non-finite samples".into(),
            ));
        }
        Ok(())
    }
}

/// Ограниченный кэш профилей по идентификатору (вытесняется самый давний)
pub struct VoiceProfileCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Arc<VoiceProfile>>,
    order: VecDeque<String>,
}

impl VoiceProfileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn get(&self, identity: &str) -> Option<Arc<VoiceProfile>> {
        let mut inner = self.inner.lock();
        let profile = inner.entries.get(identity).cloned()?;
        if let Some(pos) = inner.order.iter().position(|id| id == identity) {
            if let Some(id) = inner.order.remove(pos) {
                inner.order.push_back(id);
            }
        }
        Some(profile)
    }

    /// Сохранить профиль. При нулевой ёмкости профиль не кэшируется.
    pub fn insert(&self, profile: VoiceProfile) -> Arc<VoiceProfile> {
        let profile = Arc::new(profile);
        if self.capacity == 0 {
            return profile;
        }

        let mut inner = self.inner.lock();
        if let Some(existing) = inner.entries.get(&profile.identity) {
            return existing.clone();
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                    info!("Evicted voice profile {}", oldest);
                }
                None => break,
            }
        }
        inner.order.push_back(profile.identity.clone());
        inner
            .entries
            .insert(profile.identity.clone(), profile.clone());
        profile
    }

    /// Заменить профиль с тем же идентификатором или добавить новый
    pub fn replace(&self, profile: VoiceProfile) -> Arc<VoiceProfile> {
        {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.entries.get_mut(&profile.identity) {
                *entry = Arc::new(profile);
                return entry.clone();
            }
        }
        self.insert(profile)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
