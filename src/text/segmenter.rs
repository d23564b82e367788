//! Разбиение текста на фрагменты для синтеза
//!
//! Сначала текст делится по границам предложений, слишком длинные
//! предложения - по знакам препинания внутри предложения, затем по пробелам.
//! Слова никогда не разрываются. Короткие соседние части жадно упаковываются
//! в один фрагмент до предела `max_chunk_chars` (считается в символах).
//!
//! Разбиение без потерь: `raw_text + separator` по всем фрагментам в порядке
//! следования в точности восстанавливает исходный текст.

use log::warn;
use serde::{Deserialize, Serialize};

/// Знаки конца предложения
const SENTENCE_BREAKS: &[char] = &['.', '!', '?', '…', ';'];
/// Знаки внутри предложения, после которых допустим разрыв
const CLAUSE_BREAKS: &[char] = &[',', ':', '—', '–'];
/// Закрывающие кавычки и скобки остаются с предыдущей частью
const CLOSERS: &[char] = &['"', '\'', '»', '”', '’', ')', ']', '}'];

/// Фрагмент текста для синтеза
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextChunk {
    /// Исходный текст фрагмента
    pub raw_text: String,
    /// Пробельные символы, следовавшие за фрагментом во входном тексте
    pub separator: String,
    /// Текст с ударениями, если разметка выполнялась
    pub annotated_text: Option<String>,
    /// Порядковый номер фрагмента
    pub sequence_index: usize,
}

impl TextChunk {
    /// Текст, который уходит в модель: размеченный, если есть, иначе исходный
    pub fn synthesis_text(&self) -> &str {
        self.annotated_text.as_deref().unwrap_or(&self.raw_text)
    }

    /// Число символов исходного текста
    pub fn char_len(&self) -> usize {
        self.raw_text.chars().count()
    }
}

#[derive(Debug, Clone)]
struct Piece {
    content: String,
    sep: String,
}

/// Разбить текст на фрагменты не длиннее `max_chunk_chars` символов.
///
/// Пустой или состоящий из пробелов текст даёт пустой вектор. Предел
/// превышается только словом длиннее `max_chunk_chars` (оно выдаётся
/// отдельным фрагментом) или первым словом вместе с начальными пробелами.
pub fn segment(text: &str, max_chunk_chars: usize) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let max_chunk_chars = max_chunk_chars.max(1);

    if text.chars().count() <= max_chunk_chars {
        return vec![TextChunk {
            raw_text: text.to_string(),
            separator: String::new(),
            annotated_text: None,
            sequence_index: 0,
        }];
    }

    let body = text.trim_start();
    let lead = &text[..text.len() - body.len()];

    let mut pieces = Vec::new();
    for sentence in split_after(body, SENTENCE_BREAKS) {
        if char_count(&sentence.content) <= max_chunk_chars {
            pieces.push(sentence);
            continue;
        }
        for clause in resplit(sentence, CLAUSE_BREAKS) {
            if char_count(&clause.content) <= max_chunk_chars {
                pieces.push(clause);
            } else {
                pieces.extend(resplit(clause, &[]));
            }
        }
    }

    // Начальные пробелы входят в предел первого фрагмента
    if !lead.is_empty() {
        if let Some(first) = pieces.first_mut() {
            first.content.insert_str(0, lead);
            if char_count(&first.content) > max_chunk_chars {
                let first = pieces.remove(0);
                pieces.splice(0..0, resplit(first, &[]));
            }
        }
    }

    pack(pieces, max_chunk_chars)
}

/// Разделить `piece` заново, сохранив его разделитель за последней частью
fn resplit(piece: Piece, breaks: &[char]) -> Vec<Piece> {
    let mut parts = split_after(&piece.content, breaks);
    if let Some(last) = parts.last_mut() {
        last.sep.push_str(&piece.sep);
    }
    parts
}

/// Разделить текст по пробелам, которым предшествует один из `breaks`
/// (с учётом закрывающих кавычек). Пустой `breaks` - разделение по любому пробелу.
fn split_after(text: &str, breaks: &[char]) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut content = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let at_break = breaks.is_empty() || ends_with_break(&content, breaks);
        if c.is_whitespace() && !content.trim().is_empty() && at_break {
            let mut sep = String::from(c);
            while let Some(&next) = chars.peek() {
                if !next.is_whitespace() {
                    break;
                }
                sep.push(next);
                chars.next();
            }
            pieces.push(Piece {
                content: std::mem::take(&mut content),
                sep,
            });
            continue;
        }
        content.push(c);
    }

    if !content.is_empty() {
        let trimmed_len = content.trim_end().len();
        let sep = content.split_off(trimmed_len);
        pieces.push(Piece { content, sep });
    }

    pieces
}

fn ends_with_break(content: &str, breaks: &[char]) -> bool {
    content
        .trim_end_matches(CLOSERS)
        .chars()
        .next_back()
        .map_or(false, |c| breaks.contains(&c))
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

/// Жадная упаковка частей в фрагменты
fn pack(pieces: Vec<Piece>, max_chunk_chars: usize) -> Vec<TextChunk> {
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut current: Option<(String, String, usize)> = None;

    for piece in pieces {
        let piece_len = char_count(&piece.content);
        if let Some((raw, sep, len)) = current.as_mut() {
            let joined = *len + char_count(sep) + piece_len;
            if joined <= max_chunk_chars {
                raw.push_str(sep);
                raw.push_str(&piece.content);
                *sep = piece.sep;
                *len = joined;
                continue;
            }
        }

        if let Some((raw, sep, _)) = current.take() {
            chunks.push(new_chunk(raw, sep, chunks.len()));
        }
        if piece_len > max_chunk_chars {
            warn!(
                "Word of {} chars exceeds the chunk limit of {} and is kept whole",
                piece_len, max_chunk_chars
            );
        }
        current = Some((piece.content, piece.sep, piece_len));
    }

    if let Some((raw, sep, _)) = current {
        chunks.push(new_chunk(raw, sep, chunks.len()));
    }
    chunks
}

fn new_chunk(raw_text: String, separator: String, sequence_index: usize) -> TextChunk {
    TextChunk {
        raw_text,
        separator,
        annotated_text: None,
        sequence_index,
    }
}
