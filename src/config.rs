//! Модуль конфигурации синтеза
//!
//! [`SynthesisConfig`] задаёт параметры одного вызова синтеза. Значения по
//! умолчанию фиксируются при создании движка, отдельный запрос может
//! переопределить их через [`SynthesisOverrides`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Переменная окружения с выбором устройства
pub const DEVICE_ENV: &str = "RU_TTS_DEVICE";

/// Размер модели расстановки ударений
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccentModelSize {
    /// Компактная модель
    Compact,
    /// Быстрая модель
    Turbo,
}

impl Default for AccentModelSize {
    fn default() -> Self {
        Self::Turbo
    }
}

impl AccentModelSize {
    /// Получить строковое представление размера
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Turbo => "turbo",
        }
    }
}

/// Метод численного решения ОДУ в модели flow matching
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OdeMethod {
    Euler,
    Midpoint,
    Rk4,
}

impl Default for OdeMethod {
    fn default() -> Self {
        Self::Euler
    }
}

impl OdeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Euler => "euler",
            Self::Midpoint => "midpoint",
            Self::Rk4 => "rk4",
        }
    }
}

/// Устройство для инференса
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Центральный процессор
    Cpu,
    /// Графический ускоритель
    Accelerator,
}

impl Default for Device {
    fn default() -> Self {
        detect_device()
    }
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Accelerator => "accelerator",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "accelerator" | "cuda" | "gpu" => Ok(Self::Accelerator),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

/// Определить устройство по переменной `RU_TTS_DEVICE` или по наличию драйвера NVIDIA
pub fn detect_device() -> Device {
    let requested = std::env::var(DEVICE_ENV).ok();
    let visible = std::env::var("CUDA_VISIBLE_DEVICES").ok();
    let has_driver = which::which("nvidia-smi").is_ok();
    resolve_device(requested.as_deref(), visible.as_deref(), has_driver)
}

fn resolve_device(requested: Option<&str>, visible: Option<&str>, has_driver: bool) -> Device {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        Some(value) if !value.eq_ignore_ascii_case("auto") => match value.parse() {
            Ok(device) => return device,
            Err(e) => log::warn!("{}: {}, falling back to auto detection", DEVICE_ENV, e),
        },
        _ => {}
    }

    let masked = matches!(visible.map(str::trim), Some("") | Some("-1"));
    if has_driver && !masked {
        Device::Accelerator
    } else {
        Device::Cpu
    }
}

/// Параметры одного вызова синтеза
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Расставлять ударения перед синтезом
    pub enable_accent: bool,
    /// Размер модели ударений
    pub accent_model_size: AccentModelSize,
    /// Восстанавливать букву «ё»
    pub enable_yoficator: bool,
    /// Метод решения ОДУ
    pub ode_method: OdeMethod,
    /// Число шагов ОДУ; `None` - подбирается по длине фрагмента
    pub ode_steps: Option<u32>,
    /// Использовать EMA-веса
    pub use_ema_weights: bool,
    /// Устройство инференса
    pub device: Device,
    /// Максимальная длина фрагмента в символах
    pub max_chunk_chars: usize,
    /// Скорость речи; `None` - подбирается по длине фрагмента
    pub speed: Option<f32>,
    /// Сила classifier-free guidance
    pub cfg_strength: f32,
    /// Коэффициент sway sampling
    pub sway_sampling_coef: f32,
    /// Целевой RMS эталона для модели
    pub target_rms: f32,
    /// Зерно генератора; `None` - случайное
    pub seed: Option<u64>,
    /// Длительность перекрёстного затухания между фрагментами, мс
    pub crossfade_ms: u32,
    /// Целевой пик после нормализации (0.0 - 1.0)
    pub target_peak: f32,
    /// Длительность затухания в конце, мс
    pub tail_fade_ms: u32,
    /// Тишина в конце записи, мс
    pub tail_silence_ms: u32,
    /// Обрезать тишину по краям фрагментов
    pub remove_silence: bool,
    /// Частота дискретизации результата; `None` - родная частота модели
    pub output_sample_rate: Option<u32>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enable_accent: true,
            accent_model_size: AccentModelSize::default(),
            enable_yoficator: true,
            ode_method: OdeMethod::default(),
            ode_steps: None,
            use_ema_weights: true,
            device: Device::default(),
            max_chunk_chars: 200,
            speed: None,
            cfg_strength: 2.0,
            sway_sampling_coef: -1.0,
            target_rms: 0.1,
            seed: None,
            crossfade_ms: 50,
            target_peak: 0.95,
            tail_fade_ms: 100,
            tail_silence_ms: 800,
            remove_silence: false,
            output_sample_rate: None,
        }
    }
}

impl SynthesisConfig {
    /// Проверить согласованность параметров
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ode_steps == Some(0) {
            return Err(EngineError::Input("ode_steps must be greater than zero".into()));
        }
        if self.max_chunk_chars == 0 {
            return Err(EngineError::Input("max_chunk_chars must be greater than zero".into()));
        }
        if let Some(speed) = self.speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(EngineError::Input(format!("speed must be positive, got {}", speed)));
            }
        }
        if !self.cfg_strength.is_finite() || !self.sway_sampling_coef.is_finite() {
            return Err(EngineError::Input("guidance parameters must be finite".into()));
        }
        if !(self.target_peak > 0.0 && self.target_peak <= 1.0) {
            return Err(EngineError::Input(format!(
                "target_peak must be in (0, 1], got {}",
                self.target_peak
            )));
        }
        if !(self.target_rms > 0.0 && self.target_rms <= 1.0) {
            return Err(EngineError::Input(format!(
                "target_rms must be in (0, 1], got {}",
                self.target_rms
            )));
        }
        if let Some(rate) = self.output_sample_rate {
            if !(8_000..=192_000).contains(&rate) {
                return Err(EngineError::Input(format!(
                    "output_sample_rate {} Hz is out of range",
                    rate
                )));
            }
        }
        Ok(())
    }

    /// Применить переопределения запроса и проверить результат
    pub fn with_overrides(&self, overrides: &SynthesisOverrides) -> Result<Self, EngineError> {
        let mut config = self.clone();
        overrides.apply_to(&mut config);
        config.validate()?;
        Ok(config)
    }
}

/// Переопределения параметров для отдельного запроса
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisOverrides {
    pub enable_accent: Option<bool>,
    pub accent_model_size: Option<AccentModelSize>,
    pub enable_yoficator: Option<bool>,
    pub ode_method: Option<OdeMethod>,
    pub ode_steps: Option<u32>,
    pub use_ema_weights: Option<bool>,
    pub device: Option<Device>,
    pub max_chunk_chars: Option<usize>,
    pub speed: Option<f32>,
    pub cfg_strength: Option<f32>,
    pub sway_sampling_coef: Option<f32>,
    pub target_rms: Option<f32>,
    pub seed: Option<u64>,
    pub crossfade_ms: Option<u32>,
    pub target_peak: Option<f32>,
    pub tail_fade_ms: Option<u32>,
    pub tail_silence_ms: Option<u32>,
    pub remove_silence: Option<bool>,
    pub output_sample_rate: Option<u32>,
}

impl SynthesisOverrides {
    fn apply_to(&self, config: &mut SynthesisConfig) {
        macro_rules! set {
            ($($field:ident),*) => {
                $(if let Some(value) = self.$field { config.$field = value; })*
            };
        }
        set!(
            enable_accent,
            accent_model_size,
            enable_yoficator,
            ode_method,
            use_ema_weights,
            device,
            max_chunk_chars,
            cfg_strength,
            sway_sampling_coef,
            target_rms,
            crossfade_ms,
            target_peak,
            tail_fade_ms,
            tail_silence_ms,
            remove_silence
        );
        if self.ode_steps.is_some() {
            config.ode_steps = self.ode_steps;
        }
        if self.speed.is_some() {
            config.speed = self.speed;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.output_sample_rate.is_some() {
            config.output_sample_rate = self.output_sample_rate;
        }
    }
}

/// Подобрать скорость речи по числу непробельных символов фрагмента
pub fn auto_speed(text: &str) -> f32 {
    let length = text.chars().filter(|c| !c.is_whitespace()).count();
    match length {
        0..=3 => 0.1,
        4..=8 => 0.3,
        9..=18 => 0.6,
        19..=35 => 0.8,
        36..=45 => 0.9,
        _ => 1.0,
    }
}

/// Подобрать число шагов ОДУ: длинным фрагментам меньше шагов
pub fn auto_ode_steps(text: &str) -> u32 {
    let length = text.chars().filter(|c| !c.is_whitespace()).count();
    if length > 120 {
        18
    } else {
        26
    }
}
