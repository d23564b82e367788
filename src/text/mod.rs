//! Обработка текста: очистка, разбиение на фрагменты, ёфикация, ударения

pub mod accent;
pub mod normalize;
pub mod segmenter;
pub mod yoficator;

pub use accent::{strip_accents, AccentAnnotator};
pub use normalize::{detect_language, ensure_terminal_punctuation, normalize_text, Language};
pub use segmenter::{segment, TextChunk};
pub use yoficator::Yoficator;
