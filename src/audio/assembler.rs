//! Склейка синтезированных фрагментов
//!
//! Фрагменты соединяются с перекрёстным затуханием по приподнятому косинусу,
//! затем результат нормализуется по пику. [`finish_tail`] добавляет плавное
//! затухание и тишину в конце, чтобы окончание фразы не обрывалось.

use log::{debug, warn};
use rayon::prelude::*;

use super::buffer::{ms_to_samples, AudioBuffer};
use crate::config::SynthesisConfig;
use crate::error::AudioError;

/// Параметры склейки
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssemblerConfig {
    /// Длительность перекрёстного затухания, мс
    pub crossfade_ms: u32,
    /// Целевой пик после нормализации
    pub target_peak: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            crossfade_ms: 50,
            target_peak: 0.95,
        }
    }
}

impl From<&SynthesisConfig> for AssemblerConfig {
    fn from(config: &SynthesisConfig) -> Self {
        Self {
            crossfade_ms: config.crossfade_ms,
            target_peak: config.target_peak,
        }
    }
}

/// Склеить фрагменты в один буфер.
///
/// Длина результата равна сумме длин минус ширина перекрытия на каждой
/// границе. Ширина ограничена длиной более короткого из соседних фрагментов.
pub fn assemble(buffers: Vec<AudioBuffer>, config: &AssemblerConfig) -> Result<AudioBuffer, AudioError> {
    let mut iter = buffers.into_iter();
    let first = iter.next().ok_or(AudioError::Empty)?;
    let sample_rate = first.sample_rate;
    let window = ms_to_samples(config.crossfade_ms, sample_rate);

    let mut prev_len = first.len();
    let mut result = first.samples;
    let mut boundaries = 0usize;

    for buffer in iter {
        if buffer.sample_rate != sample_rate {
            return Err(AudioError::SampleRateMismatch {
                expected: sample_rate,
                actual: buffer.sample_rate,
            });
        }

        let overlap = window.min(prev_len).min(buffer.len());
        crossfade_into(&mut result, &buffer.samples, overlap);
        prev_len = buffer.len();
        boundaries += 1;
    }

    debug!(
        "Assembled {} fragments into {} samples (crossfade {} samples)",
        boundaries + 1,
        result.len(),
        window
    );

    let mut assembled = AudioBuffer::new(result, sample_rate);
    normalize_peak(&mut assembled.samples, config.target_peak);
    Ok(assembled)
}

/// Наложить `next` на хвост `result` с перекрытием `overlap` семплов
fn crossfade_into(result: &mut Vec<f32>, next: &[f32], overlap: usize) {
    let fade_start = result.len() - overlap;

    for j in 0..overlap {
        let fade_out =
            0.5 * (1.0 + ((std::f32::consts::PI * j as f32) / overlap as f32).cos());
        let fade_in = 1.0 - fade_out;
        result[fade_start + j] = result[fade_start + j] * fade_out + next[j] * fade_in;
    }

    result.extend_from_slice(&next[overlap..]);
}

/// Нормализовать по пику. Тишина не изменяется.
pub fn normalize_peak(samples: &mut [f32], target_peak: f32) {
    let peak = samples
        .par_iter()
        .map(|s| s.abs())
        .reduce(|| 0.0f32, f32::max);

    if peak <= f32::EPSILON {
        return;
    }

    let gain = target_peak / peak;
    samples.par_iter_mut().for_each(|s| *s *= gain);
}

/// Плавное нарастание громкости в начале
pub fn apply_fade_in(samples: &mut [f32], fade_samples: usize) {
    let fade = fade_samples.min(samples.len());
    for (i, sample) in samples.iter_mut().take(fade).enumerate() {
        *sample *= 0.5 * (1.0 - (std::f32::consts::PI * i as f32 / fade as f32).cos());
    }
}

/// Плавное затухание в конце
pub fn apply_fade_out(samples: &mut [f32], fade_samples: usize) {
    let fade = fade_samples.min(samples.len());
    let start = samples.len() - fade;
    for (i, sample) in samples[start..].iter_mut().enumerate() {
        *sample *= 0.5 * (1.0 + (std::f32::consts::PI * (i + 1) as f32 / fade as f32).cos());
    }
}

/// Затухание на последних `fade_out_ms` и тишина длиной `tail_silence_ms` после
pub fn finish_tail(mut buffer: AudioBuffer, fade_out_ms: u32, tail_silence_ms: u32) -> AudioBuffer {
    let fade = ms_to_samples(fade_out_ms, buffer.sample_rate);
    if fade > buffer.len() {
        warn!(
            "Tail fade of {} ms is longer than the audio ({} ms), fading the whole buffer",
            fade_out_ms,
            buffer.duration_ms()
        );
    }
    apply_fade_out(&mut buffer.samples, fade);

    let silence = ms_to_samples(tail_silence_ms, buffer.sample_rate);
    buffer.samples.resize(buffer.samples.len() + silence, 0.0);
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(value: f32, len: usize, rate: u32) -> AudioBuffer {
        AudioBuffer::new(vec![value; len], rate)
    }

    #[test]
    fn length_follows_crossfade_formula() {
        let rate = 24_000;
        let buffers = vec![
            constant(0.5, 24_000, rate),
            constant(0.5, 12_000, rate),
            constant(0.5, 36_000, rate),
        ];
        let config = AssemblerConfig::default();
        let window = ms_to_samples(config.crossfade_ms, rate);

        let out = assemble(buffers, &config).unwrap();
        assert_eq!(out.len(), 24_000 + 12_000 + 36_000 - 2 * window);
        assert_eq!(out.sample_rate, rate);
    }

    #[test]
    fn crossfade_of_equal_signals_is_flat() {
        let out = assemble(
            vec![constant(0.5, 4_800, 24_000), constant(0.5, 4_800, 24_000)],
            &AssemblerConfig {
                crossfade_ms: 50,
                target_peak: 0.5,
            },
        )
        .unwrap();
        assert!(out.samples.iter().all(|s| (s - 0.5).abs() < 1e-5));
    }

    #[test]
    fn crossfade_is_clamped_to_short_neighbour() {
        let out = assemble(
            vec![constant(0.2, 1_000, 24_000), constant(0.2, 100, 24_000)],
            &AssemblerConfig::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 1_000);
    }

    #[test]
    fn peak_is_normalized_and_silence_untouched() {
        let out = assemble(vec![constant(0.1, 100, 8_000)], &AssemblerConfig::default()).unwrap();
        assert!((out.peak() - 0.95).abs() < 1e-6);

        let silent = assemble(vec![constant(0.0, 100, 8_000)], &AssemblerConfig::default()).unwrap();
        assert_eq!(silent.peak(), 0.0);
    }

    #[test]
    fn rejects_mixed_rates_and_empty_input() {
        let err = assemble(
            vec![constant(0.1, 10, 24_000), constant(0.1, 10, 16_000)],
            &AssemblerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            AudioError::SampleRateMismatch {
                expected: 24_000,
                actual: 16_000
            }
        ));
        assert!(matches!(
            assemble(Vec::new(), &AssemblerConfig::default()),
            Err(AudioError::Empty)
        ));
    }

    #[test]
    fn tail_fades_to_zero_and_pads() {
        let out = finish_tail(constant(1.0, 24_000, 24_000), 100, 800);
        assert_eq!(out.len(), 24_000 + 19_200);
        assert!(out.samples[23_999].abs() < 1e-6);
        assert_eq!(out.samples[0], 1.0);
        assert!(out.samples[24_000..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn fades_are_monotonic() {
        let mut ramp = vec![1.0; 100];
        apply_fade_in(&mut ramp, 100);
        assert_eq!(ramp[0], 0.0);
        assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
    }
}
