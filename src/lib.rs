//! Основной файл библиотеки ru-tts
//!
//! Синтез русской речи с клонированием голоса по короткой эталонной записи.
//! Библиотека готовит текст (очистка, ёфикация, ударения, разбиение на
//! фрагменты), вызывает модель F5-TTS через процесс инференса, склеивает
//! фрагменты и пишет результат в WAV.

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod model;
pub mod server;
pub mod settings;
pub mod synth;
pub mod text;
pub mod voice;

pub use config::{AccentModelSize, Device, OdeMethod, SynthesisConfig, SynthesisOverrides};
pub use engine::{EngineState, SpeechOutput, SynthesisEngine, SynthesisRequest};
pub use error::{AnnotationError, AudioError, EngineError, ModelLoadError, Result, SynthesisError};
pub use model::{ModelKey, ModelLoader, ModelRegistry};
pub use settings::Settings;
pub use voice::{ReferenceAudio, VoiceProfile};
