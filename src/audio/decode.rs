//! # Декодирование и ресемплинг
//!
//! Эталонная запись может прийти файлом или байтами из multipart-запроса.
//! WAV читается через `hound` (все распространённые разрядности), остальные
//! форматы через `symphonia`. Многоканальный звук сводится в моно.
//!
//! Ресемплинг выполняется `rubato` (sinc-интерполяция) поблочно.

use std::io::Cursor;
use std::path::Path;

use hound::{SampleFormat, WavReader};
use log::{debug, warn};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::buffer::AudioBuffer;
use crate::error::AudioError;

const RESAMPLE_CHUNK: usize = 1024;

/// Декодировать аудиофайл в моно-буфер
pub fn decode_audio_file<P: AsRef<Path>>(file_path: P) -> Result<AudioBuffer, AudioError> {
    let file_path = file_path.as_ref();
    let bytes = std::fs::read(file_path)?;
    let extension = file_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase());
    decode_audio_bytes(&bytes, extension.as_deref())
}

/// Декодировать аудио из памяти. `extension` используется как подсказка формата.
pub fn decode_audio_bytes(bytes: &[u8], extension: Option<&str>) -> Result<AudioBuffer, AudioError> {
    if bytes.is_empty() {
        return Err(AudioError::Decode("empty audio data".into()));
    }

    let looks_like_wav = bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE";
    if looks_like_wav {
        match decode_wav(bytes) {
            Ok(buffer) => return Ok(buffer),
            // Например, WAV с кодеком, который hound не поддерживает
            Err(e) => debug!("hound could not read WAV ({}), trying symphonia", e),
        }
    }

    decode_with_symphonia(bytes, extension)
}

fn decode_wav(bytes: &[u8]) -> Result<AudioBuffer, AudioError> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(|e| AudioError::Decode(e.to_string()))?;
    let spec = reader.spec();

    let pcm_data: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|s| s as f32 / 128.0))
            .collect::<Result<Vec<f32>, _>>(),
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|s| s as f32 / 32_768.0))
            .collect::<Result<Vec<f32>, _>>(),
        (SampleFormat::Int, 24) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 8_388_608.0))
            .collect::<Result<Vec<f32>, _>>(),
        (SampleFormat::Int, 32) => reader
            .samples::<i32>()
            .map(|s| s.map(|s| s as f32 / 2_147_483_648.0))
            .collect::<Result<Vec<f32>, _>>(),
        (SampleFormat::Float, 32) => reader.samples::<f32>().collect::<Result<Vec<f32>, _>>(),
        (format, bits) => {
            return Err(AudioError::Decode(format!(
                "unsupported WAV format: {:?}, {} bits",
                format, bits
            )))
        }
    }
    .map_err(|e| AudioError::Decode(e.to_string()))?;

    Ok(AudioBuffer::new(
        downmix(&pcm_data, spec.channels as usize),
        spec.sample_rate,
    ))
}

fn decode_with_symphonia(bytes: &[u8], extension: Option<&str>) -> Result<AudioBuffer, AudioError> {
    let cursor = Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| AudioError::Decode(format!("unrecognized audio format: {}", e)))?;

    let mut format = probed.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::Decode("no audio track found".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(format!("unsupported codec: {}", e)))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate;
    let mut pcm_data = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupted audio packet: {}", e);
                continue;
            }
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        let channels = spec.channels.count();

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        pcm_data.extend(downmix(sample_buf.samples(), channels));
    }

    let sample_rate =
        sample_rate.ok_or_else(|| AudioError::Decode("unknown sample rate".into()))?;
    if pcm_data.is_empty() {
        return Err(AudioError::Decode("no audio samples decoded".into()));
    }

    Ok(AudioBuffer::new(pcm_data, sample_rate))
}

/// Свести чередующиеся каналы в моно
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Изменить частоту дискретизации буфера
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> Result<AudioBuffer, AudioError> {
    if buffer.sample_rate == target_rate || buffer.is_empty() {
        return Ok(AudioBuffer::new(buffer.samples.clone(), target_rate));
    }
    if buffer.sample_rate == 0 || target_rate == 0 {
        return Err(AudioError::Resample("sample rate must be positive".into()));
    }

    let ratio = target_rate as f64 / buffer.sample_rate as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let input = &buffer.samples;
    let delay = resampler.output_delay();
    let expected = (input.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut pos = 0;
    while pos + resampler.input_frames_next() <= input.len() {
        let frames = resampler.input_frames_next();
        let block = resampler
            .process(&[&input[pos..pos + frames]], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend_from_slice(&block[0]);
        pos += frames;
    }

    if pos < input.len() {
        let block = resampler
            .process_partial(Some(&[&input[pos..]][..]), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend_from_slice(&block[0]);
    }

    // Выталкиваем хвост, задержанный фильтром
    while output.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if block[0].is_empty() {
            break;
        }
        output.extend_from_slice(&block[0]);
    }

    output.drain(..delay.min(output.len()));
    output.resize(expected, 0.0);

    debug!(
        "Resampled {} samples {} Hz -> {} samples {} Hz",
        input.len(),
        buffer.sample_rate,
        output.len(),
        target_rate
    );
    Ok(AudioBuffer::new(output, target_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::encode_wav_bytes;
    use hound::{WavSpec, WavWriter};

    fn sine(freq: f32, secs: f32, rate: u32) -> Vec<f32> {
        (0..(secs * rate as f32) as usize)
            .map(|i| (i as f32 / rate as f32 * freq * 2.0 * std::f32::consts::PI).sin() * 0.5)
            .collect()
    }

    #[test]
    fn decodes_pcm16_wav_from_memory() {
        let original = AudioBuffer::new(sine(220.0, 0.5, 16_000), 16_000);
        let bytes = encode_wav_bytes(&original).unwrap();

        let decoded = decode_audio_bytes(&bytes, Some("wav")).unwrap();
        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.len(), original.len());
        let max_err = decoded
            .samples
            .iter()
            .zip(&original.samples)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3);
    }

    #[test]
    fn stereo_float_wav_is_downmixed() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let spec = WavSpec {
                channels: 2,
                sample_rate: 8_000,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            };
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..100 {
                writer.write_sample(0.5f32).unwrap();
                writer.write_sample(-0.1f32).unwrap();
            }
            writer.finalize().unwrap();
        }

        let decoded = decode_audio_bytes(cursor.get_ref(), None).unwrap();
        assert_eq!(decoded.len(), 100);
        assert!((decoded.samples[0] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_audio_bytes(b"definitely not audio", Some("mp3")),
            Err(AudioError::Decode(_))
        ));
        assert!(matches!(decode_audio_bytes(&[], None), Err(AudioError::Decode(_))));
    }

    #[test]
    fn resample_scales_length() {
        let input = AudioBuffer::new(sine(440.0, 1.0, 48_000), 48_000);
        let output = resample(&input, 24_000).unwrap();
        assert_eq!(output.sample_rate, 24_000);
        assert_eq!(output.len(), 24_000);
        // Амплитуда синуса сохраняется
        let peak = output.samples[2_000..22_000]
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 0.5).abs() < 0.05, "peak {}", peak);
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input = AudioBuffer::new(vec![0.1, 0.2, 0.3], 24_000);
        assert_eq!(resample(&input, 24_000).unwrap(), input);
    }
}
