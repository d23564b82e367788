//! Запись результата в 16-битный PCM WAV

use std::io::{BufWriter, Cursor};
use std::path::Path;

use dasp::sample::Sample;
use hound::{SampleFormat, WavSpec, WavWriter};
use log::info;

use super::buffer::AudioBuffer;
use crate::error::AudioError;

fn spec_for(sample_rate: u32) -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_pcm16(sample: f32) -> i16 {
    sample.clamp(-1.0, 1.0).to_sample::<i16>()
}

/// Закодировать буфер в WAV в памяти
pub fn encode_wav_bytes(buffer: &AudioBuffer) -> Result<Vec<u8>, AudioError> {
    let mut cursor = Cursor::new(Vec::with_capacity(44 + buffer.len() * 2));
    {
        let mut writer = WavWriter::new(&mut cursor, spec_for(buffer.sample_rate))?;
        for &sample in &buffer.samples {
            writer.write_sample(to_pcm16(sample))?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Записать буфер в WAV-файл, создавая родительские каталоги.
///
/// Файл пишется во временный файл рядом с целевым и переименовывается после
/// завершения записи, так что недописанный WAV никогда не появляется по
/// целевому пути.
pub fn write_wav<P: AsRef<Path>>(buffer: &AudioBuffer, output_path: P) -> Result<(), AudioError> {
    let output_path = output_path.as_ref();
    let parent = match output_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let temp = tempfile::Builder::new()
        .prefix(".ru-tts-")
        .suffix(".wav.part")
        .tempfile_in(parent)?;
    {
        let mut writer = WavWriter::new(BufWriter::new(temp.as_file()), spec_for(buffer.sample_rate))?;
        for &sample in &buffer.samples {
            writer.write_sample(to_pcm16(sample))?;
        }
        writer.finalize()?;
    }
    temp.persist(output_path).map_err(|e| AudioError::Io(e.error))?;

    info!(
        "Saved WAV file: {} ({} samples, {} Hz)",
        output_path.display(),
        buffer.len(),
        buffer.sample_rate
    );
    Ok(())
}
