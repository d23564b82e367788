//! Синтез одного фрагмента текста

use std::sync::Arc;

use log::{debug, warn};

use crate::audio::{resample, AudioBuffer};
use crate::config::{auto_ode_steps, auto_speed, SynthesisConfig};
use crate::error::{EngineError, ModelLoadError, SynthesisError};
use crate::model::{
    GateError, GenerationParams, GenerationRequest, InferenceContext, Interrupted, ModelHandle,
    SpeechModel,
};
use crate::text::{strip_accents, TextChunk};
use crate::voice::VoiceProfile;

/// Синтезатор фрагментов поверх загруженной модели синтеза
#[derive(Clone)]
pub struct ChunkSynthesizer {
    handle: ModelHandle,
    model: Arc<dyn SpeechModel>,
}

impl ChunkSynthesizer {
    pub fn new(handle: ModelHandle) -> Result<Self, ModelLoadError> {
        let model = handle.speech().ok_or_else(|| {
            ModelLoadError::Worker(format!("model {} is not a speech model", handle.key()))
        })?;
        Ok(Self { handle, model })
    }

    /// Частота дискретизации модели
    pub fn sample_rate(&self) -> u32 {
        self.model.sample_rate()
    }

    /// Синтезировать фрагмент голосом профиля.
    ///
    /// Пустой текст и некорректный профиль отклоняются до обращения к модели.
    /// Результат приводится к частоте модели.
    pub async fn synthesize(
        &self,
        chunk: &TextChunk,
        profile: &Arc<VoiceProfile>,
        config: &SynthesisConfig,
        seed: u64,
        ctx: &InferenceContext,
    ) -> Result<AudioBuffer, EngineError> {
        let chunk_index = chunk.sequence_index;
        let fail = |source: SynthesisError| EngineError::Synthesis {
            chunk_index,
            source,
        };

        let text = chunk.synthesis_text().trim();
        if strip_accents(text).trim().is_empty() {
            return Err(fail(SynthesisError::EmptyText));
        }
        profile.validate().map_err(fail)?;

        let plain = strip_accents(text);
        let speed = config.speed.unwrap_or_else(|| auto_speed(&plain));
        let ode_steps = config.ode_steps.unwrap_or_else(|| auto_ode_steps(&plain));
        let request = GenerationRequest {
            params: GenerationParams {
                gen_text: text.to_string(),
                ref_text: profile.reference_text.clone(),
                ode_method: config.ode_method,
                ode_steps,
                use_ema_weights: config.use_ema_weights,
                speed,
                cfg_strength: config.cfg_strength,
                sway_sampling_coef: config.sway_sampling_coef,
                target_rms: config.target_rms,
                seed,
            },
            profile: profile.clone(),
        };

        debug!(
            "Chunk {}: '{}' (speed {:.2}, {} {} steps)",
            chunk_index,
            text,
            speed,
            config.ode_method.as_str(),
            ode_steps
        );

        let model = self.model.clone();
        let audio = self
            .handle
            .run_exclusive(ctx, move || model.generate(&request))
            .await
            .map_err(|e| match e {
                GateError::Interrupted(Interrupted::Timeout) => EngineError::Timeout,
                GateError::Interrupted(Interrupted::Cancelled) => EngineError::Cancelled,
                GateError::Panicked(msg) => fail(SynthesisError::Backend(msg)),
            })?
            .map_err(fail)?;

        if audio.is_empty() {
            return Err(fail(SynthesisError::Backend("model returned no audio".into())));
        }

        let target_rate = self.sample_rate();
        if audio.sample_rate != target_rate {
            warn!(
                "Chunk {} came back at {} Hz, resampling to {} Hz",
                chunk_index, audio.sample_rate, target_rate
            );
            return Ok(resample(&audio, target_rate)?);
        }
        Ok(audio)
    }
}
