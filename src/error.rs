//! Модуль обработки ошибок библиотеки ru-tts
//!
//! Ошибки разделены по слоям: загрузка моделей, синтез отдельного фрагмента,
//! расстановка ударений, обработка аудио. Верхнеуровневая [`EngineError`]
//! объединяет их и определяет категорию ответа для HTTP-сервера.

use thiserror::Error;

/// Ошибки загрузки моделей
#[derive(Debug, Clone, Error)]
pub enum ModelLoadError {
    /// Не найдены файлы весов и их не удалось получить
    #[error("Model weights not found: {0}")]
    MissingWeights(String),

    /// Ошибка загрузки весов из хаба
    #[error("Weight download failed: {0}")]
    Download(String),

    /// Запрошенное устройство недоступно
    #[error("Incompatible device: {0}")]
    IncompatibleDevice(String),

    /// Нехватка памяти ускорителя при загрузке
    #[error("Out of accelerator memory while loading: {0}")]
    OutOfMemory(String),

    /// Ошибка процесса инференса
    #[error("Inference worker error: {0}")]
    Worker(String),
}

impl ModelLoadError {
    /// Подсказка для пользователя по устранению ошибки
    pub fn hint(&self) -> &'static str {
        match self {
            Self::MissingWeights(_) => {
                "check RU_TTS_CACHE_DIR or network access to the Hugging Face hub"
            }
            Self::Download(_) => "check network access and retry; partial files are discarded",
            Self::IncompatibleDevice(_) => "set RU_TTS_DEVICE=cpu",
            Self::OutOfMemory(_) => "retry on CPU or reduce concurrency",
            Self::Worker(_) => "check that the inference worker is installed and can start",
        }
    }
}

/// Ошибка расстановки ударений. Восстанавливается локально: используется исходный текст.
#[derive(Debug, Error)]
pub enum AnnotationError {
    /// Модель ударений не загружена
    #[error("Accent model unavailable: {0}")]
    Unavailable(#[from] ModelLoadError),

    /// Модель вернула ошибку
    #[error("Accent model failed: {0}")]
    Model(String),

    /// Модель вернула текст, не совпадающий с исходным
    #[error("Accent model changed the text: {0}")]
    Mismatch(String),
}

/// Ошибки синтеза одного фрагмента
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Пустой текст фрагмента
    #[error("Chunk text is empty")]
    EmptyText,

    /// Некорректный голосовой профиль
    #[error("Invalid voice profile: {0}")]
    InvalidProfile(String),

    /// Нехватка памяти ускорителя во время инференса
    #[error("Out of accelerator memory: {0}")]
    OutOfMemory(String),

    /// Ошибка бэкенда модели
    #[error("Model backend error: {0}")]
    Backend(String),
}

impl SynthesisError {
    /// Подсказка для пользователя по устранению ошибки
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::OutOfMemory(_) => Some("retry on CPU or reduce concurrency"),
            _ => None,
        }
    }
}

/// Ошибки обработки аудио
#[derive(Debug, Error)]
pub enum AudioError {
    /// Ошибка декодирования входного файла
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Ошибка кодирования WAV
    #[error("WAV encode error: {0}")]
    Encode(#[from] hound::Error),

    /// Ошибка ресемплинга
    #[error("Resample error: {0}")]
    Resample(String),

    /// Несовпадение частот дискретизации при склейке
    #[error("Sample rate mismatch: expected {expected} Hz, got {actual} Hz")]
    SampleRateMismatch { expected: u32, actual: u32 },

    /// Пустой набор буферов
    #[error("Nothing to assemble")]
    Empty,

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ошибки движка синтеза
#[derive(Debug, Error)]
pub enum EngineError {
    /// Некорректный ввод: пустой текст, неверная длительность или формат эталона
    #[error("Invalid input: {0}")]
    Input(String),

    /// Ошибка загрузки моделей
    #[error(transparent)]
    ModelLoad(#[from] ModelLoadError),

    /// Ошибка синтеза фрагмента
    #[error("Synthesis failed on chunk {chunk_index}: {source}")]
    Synthesis {
        chunk_index: usize,
        #[source]
        source: SynthesisError,
    },

    /// Превышен срок выполнения запроса
    #[error("Request deadline exceeded")]
    Timeout,

    /// Запрос отменён
    #[error("Request cancelled")]
    Cancelled,

    /// Ошибка обработки аудио
    #[error(transparent)]
    Audio(#[from] AudioError),

    /// Ошибка ввода-вывода
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Другая ошибка
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Категория ошибки для внешних интерфейсов
    pub fn category(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::ModelLoad(_) => "model_load",
            Self::Synthesis { source: SynthesisError::OutOfMemory(_), .. } => "out_of_memory",
            Self::Synthesis { .. } => "synthesis",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Audio(_) => "audio",
            Self::Io(_) | Self::Other(_) => "internal",
        }
    }

    /// Номер фрагмента, на котором произошла ошибка
    pub fn chunk_index(&self) -> Option<usize> {
        match self {
            Self::Synthesis { chunk_index, .. } => Some(*chunk_index),
            _ => None,
        }
    }

    /// Подсказка по устранению, если она есть
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ModelLoad(e) => Some(e.hint()),
            Self::Synthesis { source, .. } => source.hint(),
            _ => None,
        }
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Input(s.to_string())
    }
}

/// Тип Result для библиотеки ru-tts
pub type Result<T> = std::result::Result<T, EngineError>;
