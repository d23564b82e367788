//! Модуль обработки аудио
//!
//! Декодирование эталонных записей, ресемплинг, склейка фрагментов,
//! обрезка тишины и запись результата в WAV.

pub mod assembler;
pub mod buffer;
pub mod decode;
pub mod vad;
pub mod wav;

pub use assembler::{assemble, finish_tail, AssemblerConfig};
pub use buffer::AudioBuffer;
pub use decode::{decode_audio_bytes, decode_audio_file, resample};
pub use vad::trim_silence;
pub use wav::{encode_wav_bytes, write_wav};
