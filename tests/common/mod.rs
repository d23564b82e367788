#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dasp::{signal, Signal};
use parking_lot::Mutex;

use ru_tts::audio::{encode_wav_bytes, AudioBuffer};
use ru_tts::error::{AnnotationError, ModelLoadError, SynthesisError};
use ru_tts::model::{AccentModel, GenerationRequest, ModelLoader, SpeechModel};
use ru_tts::text::strip_accents;
use ru_tts::{AccentModelSize, Device, ModelRegistry, SynthesisConfig, SynthesisEngine};

pub const RATE: u32 = 24_000;

/// Эталонная запись: синус 220 Гц заданной длительности
pub fn reference_tone(secs: f32) -> AudioBuffer {
    let len = (secs * RATE as f32) as usize;
    let samples = signal::rate(RATE as f64)
        .const_hz(220.0)
        .sine()
        .take(len)
        .map(|s| (s * 0.4) as f32)
        .collect();
    AudioBuffer::new(samples, RATE)
}

pub fn reference_wav(secs: f32) -> Vec<u8> {
    encode_wav_bytes(&reference_tone(secs)).unwrap()
}

pub fn write_reference(dir: &Path, secs: f32) -> PathBuf {
    let path = dir.join(format!("reference_{}s.wav", secs));
    std::fs::write(&path, reference_wav(secs)).unwrap();
    path
}

/// Модель синтеза: тон, длина которого зависит от текста и скорости
#[derive(Default)]
pub struct ToneModel {
    pub calls: AtomicUsize,
    in_flight: AtomicBool,
    pub overlaps: AtomicUsize,
    pub texts: Mutex<Vec<String>>,
    pub fail_on_call: Option<usize>,
    pub delay: Duration,
    /// Частота модели; по умолчанию `RATE`
    pub native_rate: Option<u32>,
    /// Частоты эталонов, с которыми вызывалась модель
    pub reference_rates: Mutex<Vec<u32>>,
    /// Тишина до и после голоса в каждом фрагменте
    pub edge_silence: Duration,
}

impl ToneModel {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    pub fn at_rate(rate: u32) -> Self {
        Self {
            native_rate: Some(rate),
            ..Default::default()
        }
    }

    pub fn with_edge_silence(silence: Duration) -> Self {
        Self {
            edge_silence: silence,
            ..Default::default()
        }
    }

    pub fn failing_on(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Default::default()
        }
    }
}

impl SpeechModel for ToneModel {
    fn sample_rate(&self) -> u32 {
        self.native_rate.unwrap_or(RATE)
    }

    fn generate(&self, request: &GenerationRequest) -> Result<AudioBuffer, SynthesisError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let result = if self.fail_on_call == Some(call) {
            Err(SynthesisError::Backend("synthetic failure".into()))
        } else {
            let params = &request.params;
            let rate = self.sample_rate();
            self.texts.lock().push(params.gen_text.clone());
            self.reference_rates
                .lock()
                .push(request.profile.reference_audio.sample_rate);

            let chars = strip_accents(&params.gen_text).chars().count() as f32;
            let secs = chars * 0.06 / params.speed.max(0.1);
            let len = (secs * rate as f32) as usize;
            let freq = 180.0 + (params.seed % 100) as f32;
            let voice: Vec<f32> = if self.edge_silence.is_zero() {
                (0..len)
                    .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin() * 0.5)
                    .collect()
            } else {
                voiced(len, freq, rate)
            };

            let pad = vec![0.0; (self.edge_silence.as_secs_f32() * rate as f32) as usize];
            let mut samples = pad.clone();
            samples.extend(voice);
            samples.extend(pad);
            Ok(AudioBuffer::new(samples, rate))
        };

        self.in_flight.store(false, Ordering::SeqCst);
        result
    }
}

/// Гармонический сигнал с модуляцией по слогам, который детектор речи
/// принимает за голос
pub fn voiced(len: usize, fundamental: f32, rate: u32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / rate as f32;
            let tone: f32 = (1..=20)
                .map(|k| (2.0 * std::f32::consts::PI * fundamental * k as f32 * t).sin() / k as f32)
                .sum();
            let envelope = 0.6 + 0.4 * (2.0 * std::f32::consts::PI * 4.0 * t).sin();
            tone * envelope * 0.25
        })
        .collect()
}

/// Модель ударений: `+` перед первой гласной каждого слова
pub struct FirstVowelAccent;

impl AccentModel for FirstVowelAccent {
    fn accentize(&self, text: &str) -> Result<String, AnnotationError> {
        let mut out = String::new();
        let mut marked = false;
        for c in text.chars() {
            if !c.is_alphabetic() {
                marked = false;
            } else if !marked && "аеёиоуыэюяАЕЁИОУЫЭЮЯ".contains(c) {
                out.push('+');
                marked = true;
            }
            out.push(c);
        }
        Ok(out)
    }
}

/// Загрузчик, который считает загрузки и отдаёт заранее созданные модели
pub struct FakeLoader {
    pub speech: Arc<ToneModel>,
    pub speech_loads: AtomicUsize,
    pub accent_loads: AtomicUsize,
    pub accent_fails: bool,
    pub speech_fails: AtomicBool,
    pub load_delay: Duration,
}

impl FakeLoader {
    pub fn new(speech: ToneModel) -> Self {
        Self {
            speech: Arc::new(speech),
            speech_loads: AtomicUsize::new(0),
            accent_loads: AtomicUsize::new(0),
            accent_fails: false,
            speech_fails: AtomicBool::new(false),
            load_delay: Duration::from_millis(20),
        }
    }
}

#[async_trait]
impl ModelLoader for FakeLoader {
    async fn load_speech(&self, _device: Device) -> Result<Arc<dyn SpeechModel>, ModelLoadError> {
        self.speech_loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.load_delay).await;
        if self.speech_fails.load(Ordering::SeqCst) {
            return Err(ModelLoadError::MissingWeights("model_last_inference.safetensors".into()));
        }
        Ok(self.speech.clone())
    }

    async fn load_accent(
        &self,
        _size: AccentModelSize,
        _device: Device,
    ) -> Result<Arc<dyn AccentModel>, ModelLoadError> {
        self.accent_loads.fetch_add(1, Ordering::SeqCst);
        if self.accent_fails {
            return Err(ModelLoadError::Worker("accent model crashed".into()));
        }
        Ok(Arc::new(FirstVowelAccent))
    }
}

pub fn test_config() -> SynthesisConfig {
    SynthesisConfig {
        device: Device::Cpu,
        seed: Some(7),
        ..SynthesisConfig::default()
    }
}

pub fn engine_with(loader: Arc<FakeLoader>, output_dir: &Path) -> SynthesisEngine {
    let registry = Arc::new(ModelRegistry::new(loader));
    SynthesisEngine::new(registry, test_config())
        .unwrap()
        .with_output_dir(output_dir)
}

/// Прочитать WAV-файл в буфер
pub fn read_wav(path: &Path) -> AudioBuffer {
    let mut reader = hound::WavReader::open(path).unwrap();
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().map(Result::unwrap).collect(),
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.unwrap() as f32 / (1i64 << (spec.bits_per_sample - 1)) as f32)
            .collect(),
    };
    AudioBuffer::new(samples, spec.sample_rate)
}
