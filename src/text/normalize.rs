//! Предварительная очистка текста перед синтезом

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref CYRILLIC: Regex = Regex::new(r"(?i)[а-яё]").expect("valid regex");
    static ref LATIN: Regex = Regex::new(r"(?i)[a-z]").expect("valid regex");
}

/// Максимальная длина серии одинаковых символов
const MAX_REPEAT: usize = 3;

/// Знаки, которыми должен заканчиваться фрагмент
const TERMINALS: &[char] = &['.', '!', '?', '…'];

/// Язык текста
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Russian,
    English,
}

/// Определить язык по соотношению кириллицы и латиницы.
///
/// При равенстве и при отсутствии букв выбирается русский.
pub fn detect_language(text: &str) -> Language {
    let cyrillic = CYRILLIC.find_iter(text).count();
    let latin = LATIN.find_iter(text).count();
    debug!("Language analysis: cyrillic={}, latin={}", cyrillic, latin);

    if latin > cyrillic {
        Language::English
    } else {
        Language::Russian
    }
}

/// Очистить текст: обрезать пробелы, отбросить текст только из знаков,
/// сократить длинные серии повторов до трёх, схлопнуть пробелы.
///
/// Пустая строка означает, что синтезировать нечего.
pub fn normalize_text(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() || is_only_symbols(trimmed) {
        if !trimmed.is_empty() {
            debug!("Text consists of symbols only, ignoring");
        }
        return String::new();
    }

    let collapsed = collapse_repeats(trimmed);
    collapsed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_only_symbols(text: &str) -> bool {
    !text.chars().any(char::is_alphanumeric)
}

/// Серии из 4 и более одинаковых символов сокращаются до 3
fn collapse_repeats(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut prev = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == prev {
            run += 1;
        } else {
            prev = Some(c);
            run = 1;
        }
        if run <= MAX_REPEAT {
            result.push(c);
        }
    }
    result
}

/// Гарантировать, что текст заканчивается знаком конца предложения
pub fn ensure_terminal_punctuation(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.is_empty() || trimmed.ends_with(TERMINALS) {
        trimmed.to_string()
    } else {
        format!("{}.", trimmed)
    }
}
