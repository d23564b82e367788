//! Обрезка тишины по краям фрагмента с помощью WebRTC VAD
//!
//! Детектор работает на копии сигнала в 16 кГц; границы речи переносятся
//! обратно на исходную частоту.

use dasp::sample::Sample;
use log::{debug, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

use super::assembler::{apply_fade_in, apply_fade_out};
use super::buffer::{ms_to_samples, AudioBuffer};
use super::decode::resample;

const VAD_RATE: u32 = 16_000;
const FRAME_MS: u32 = 30;
/// Запас вокруг найденной речи
const MARGIN_MS: u32 = 60;
const EDGE_FADE_MS: u32 = 5;

/// Обрезать тишину в начале и в конце. Если речь не найдена, буфер не меняется.
pub fn trim_silence(buffer: AudioBuffer) -> AudioBuffer {
    match voiced_range(&buffer) {
        Some((start, end)) if start > 0 || end < buffer.len() => {
            debug!(
                "Trimming silence: keeping samples {}..{} of {}",
                start,
                end,
                buffer.len()
            );
            let mut samples = buffer.samples[start..end].to_vec();
            let fade = ms_to_samples(EDGE_FADE_MS, buffer.sample_rate);
            if start > 0 {
                apply_fade_in(&mut samples, fade);
            }
            if end < buffer.len() {
                apply_fade_out(&mut samples, fade);
            }
            AudioBuffer::new(samples, buffer.sample_rate)
        }
        _ => buffer,
    }
}

/// Диапазон семплов исходного буфера, содержащий речь, с запасом по краям
fn voiced_range(buffer: &AudioBuffer) -> Option<(usize, usize)> {
    if buffer.is_empty() || buffer.sample_rate == 0 {
        return None;
    }

    let probe = match resample(buffer, VAD_RATE) {
        Ok(probe) => probe,
        Err(e) => {
            warn!("VAD resample failed, keeping silence: {}", e);
            return None;
        }
    };

    let frame_len = ms_to_samples(FRAME_MS, VAD_RATE);
    let pcm: Vec<i16> = probe
        .samples
        .iter()
        .map(|s| s.clamp(-1.0, 1.0).to_sample::<i16>())
        .collect();

    let mut vad = Vad::new_with_rate_and_mode(SampleRate::Rate16kHz, VadMode::Quality);
    let mut first = None;
    let mut last = None;
    for (index, frame) in pcm.chunks_exact(frame_len).enumerate() {
        if vad.is_voice_segment(frame).unwrap_or(false) {
            first.get_or_insert(index);
            last = Some(index);
        }
    }

    let (first, last) = (first?, last?);
    let scale = buffer.sample_rate as f64 / VAD_RATE as f64;
    let margin = ms_to_samples(MARGIN_MS, buffer.sample_rate);

    let start = ((first * frame_len) as f64 * scale) as usize;
    let end = (((last + 1) * frame_len) as f64 * scale).ceil() as usize;
    let start = start.saturating_sub(margin);
    let end = (end + margin).min(buffer.len());

    (start < end).then_some((start, end))
}
