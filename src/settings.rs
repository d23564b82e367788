//! Настройки процесса сервера
//!
//! Читаются из JSON-файла, указанного в `RU_TTS_CONFIG` (если задан), затем
//! поверх применяются переменные окружения `RU_TTS_*`. Отсутствующие поля
//! берутся из значений по умолчанию.

use std::path::{Path, PathBuf};

use log::{info, warn};
use path_clean::PathClean;
use serde::{Deserialize, Serialize};

use crate::config::SynthesisConfig;
use crate::engine::{DEFAULT_OUTPUT_DIR, DEFAULT_VOICE_CACHE_CAPACITY};
use crate::error::EngineError;
use crate::model::cache::{WeightCache, DEFAULT_ENDPOINT, DEFAULT_REPO};
use crate::model::worker::{WorkerConfig, WORKER_URL_ENV};
use crate::voice::ReferenceLimits;

/// Переменная окружения с путём к файлу настроек
pub const CONFIG_ENV: &str = "RU_TTS_CONFIG";

/// Настройки процесса
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Адрес HTTP-сервера
    pub host: String,
    /// Порт HTTP-сервера
    pub port: u16,
    /// Каталог результатов
    pub output_dir: PathBuf,
    /// Каталог весов моделей
    pub cache_dir: PathBuf,
    /// Не скачивать веса, использовать только локальный кэш
    pub offline: bool,
    /// Репозиторий весов в хабе
    pub weights_repo: String,
    /// Адрес хаба (или зеркала)
    pub hub_endpoint: String,
    /// Каталог, из которого разрешено брать эталоны по пути (`ref_audio_path`);
    /// `None` - только загрузка файла
    pub reference_dir: Option<PathBuf>,
    /// Минимальная длительность эталона, с
    pub reference_min_secs: f32,
    /// Максимальная длительность эталона, с
    pub reference_max_secs: f32,
    /// Процесс инференса
    pub worker: WorkerConfig,
    /// Ёмкость кэша голосовых профилей
    pub voice_cache_capacity: usize,
    /// Таймаут запроса по умолчанию, мс; `None` - без ограничения
    pub default_timeout_ms: Option<u64>,
    /// Словарь ёфикатора
    pub yo_dictionary: Option<PathBuf>,
    /// Загружать модели при старте
    pub warm_up_on_start: bool,
    /// Параметры синтеза по умолчанию
    pub synthesis: SynthesisConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7864,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            cache_dir: PathBuf::from("f5_tts_cache"),
            offline: false,
            weights_repo: DEFAULT_REPO.to_string(),
            hub_endpoint: DEFAULT_ENDPOINT.to_string(),
            reference_dir: None,
            reference_min_secs: 2.0,
            reference_max_secs: 12.0,
            worker: WorkerConfig::default(),
            voice_cache_capacity: DEFAULT_VOICE_CACHE_CAPACITY,
            default_timeout_ms: None,
            yo_dictionary: Some(PathBuf::from("yo.dat")),
            warm_up_on_start: false,
            synthesis: SynthesisConfig::default(),
        }
    }
}

impl Settings {
    /// Загрузить настройки из файла `RU_TTS_CONFIG` и окружения
    pub fn load() -> Result<Self, EngineError> {
        let mut settings = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings.clean_paths();
        settings.synthesis.validate()?;
        if !(settings.reference_min_secs > 0.0
            && settings.reference_min_secs <= settings.reference_max_secs)
        {
            return Err(EngineError::Input(format!(
                "reference duration limits {}..{} s are invalid",
                settings.reference_min_secs, settings.reference_max_secs
            )));
        }
        Ok(settings)
    }

    /// Прочитать настройки из JSON-файла
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Input(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        let settings = serde_json::from_str(&json).map_err(|e| {
            EngineError::Input(format!("invalid settings {}: {}", path.display(), e))
        })?;
        info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Применить переопределения из окружения
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| var(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(host) = get("RU_TTS_HOST") {
            self.host = host;
        }
        if let Some(port) = get("RU_TTS_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(e) => warn!("Ignoring RU_TTS_PORT '{}': {}", port, e),
            }
        }
        if let Some(dir) = get("RU_TTS_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("RU_TTS_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(offline) = get("RU_TTS_OFFLINE") {
            self.offline = matches!(offline.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(endpoint) = get("HF_ENDPOINT") {
            self.hub_endpoint = endpoint;
        }
        if let Some(dir) = get("RU_TTS_REFERENCE_DIR") {
            self.reference_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = get(WORKER_URL_ENV) {
            self.worker.url = Some(url);
        }
        if let Some(command) = get("RU_TTS_WORKER_COMMAND") {
            let mut parts = command.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                self.worker.command = program;
                self.worker.args = parts.collect();
            }
        }
        if let Some(timeout) = get("RU_TTS_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.default_timeout_ms = Some(ms).filter(|&ms: &u64| ms > 0),
                Err(e) => warn!("Ignoring RU_TTS_TIMEOUT_MS '{}': {}", timeout, e),
            }
        }
        if let Some(path) = get("RU_TTS_YO_DICTIONARY") {
            self.yo_dictionary = Some(PathBuf::from(path));
        }
        if let Some(device) = get(crate::config::DEVICE_ENV) {
            if !device.eq_ignore_ascii_case("auto") {
                match device.parse() {
                    Ok(device) => self.synthesis.device = device,
                    Err(e) => warn!("Ignoring {}: {}", crate::config::DEVICE_ENV, e),
                }
            }
        }
    }

    fn clean_paths(&mut self) {
        self.output_dir = self.output_dir.clean();
        self.cache_dir = self.cache_dir.clean();
        self.yo_dictionary = self.yo_dictionary.take().map(|p| p.clean());
        self.reference_dir = self.reference_dir.take().map(|p| p.clean());
    }

    /// Каталог весов по настройкам
    pub fn weight_cache(&self) -> WeightCache {
        let cache = WeightCache::new(&self.cache_dir)
            .with_repo(&self.weights_repo)
            .with_endpoint(&self.hub_endpoint);
        if self.offline {
            cache.offline()
        } else {
            cache
        }
    }

    /// Ограничения на эталонную запись
    pub fn reference_limits(&self) -> ReferenceLimits {
        ReferenceLimits {
            min_secs: self.reference_min_secs,
            max_secs: self.reference_max_secs,
            ..ReferenceLimits::default()
        }
    }

    /// Адрес для привязки сервера
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
