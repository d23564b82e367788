//! Ёфикатор: восстановление буквы «ё»
//!
//! Словарь в формате `yo.dat`: строка `основа(окончание|окончание)` задаёт
//! набор слов с «ё». Строки со звёздочкой содержат спорные случаи и
//! пропускаются. Поверх словаря действуют несколько фиксированных правил для
//! частых однозначных слов, так что без словаря ёфикатор всё равно полезен.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use lazy_static::lazy_static;
use log::{info, warn};
use regex::Regex;

lazy_static! {
    static ref TOKEN: Regex = Regex::new(r"\w+|\W+").expect("valid regex");
}

/// Однозначные слова, которые ёфицируются без словаря
const FIXED_RULES: &[(&str, &str)] = &[
    ("еще", "ещё"),
    ("ее", "её"),
    ("осел", "осёл"),
    ("телка", "тёлка"),
    ("произнес", "произнёс"),
    ("елка", "ёлка"),
    ("черт", "чёрт"),
];

/// Ёфикатор со словарём
#[derive(Debug, Clone, Default)]
pub struct Yoficator {
    dictionary: HashMap<String, String>,
}

impl Yoficator {
    /// Ёфикатор только с фиксированными правилами
    pub fn without_dictionary() -> Self {
        Self::default()
    }

    /// Загрузить словарь из файла. Отсутствующий файл отключает только словарь.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match std::fs::File::open(path) {
            Ok(file) => {
                let yoficator = Self::from_reader(file);
                info!(
                    "Loaded yoficator dictionary {} ({} words)",
                    path.display(),
                    yoficator.len()
                );
                yoficator
            }
            Err(e) => {
                warn!(
                    "Yoficator dictionary {} not available ({}), using fixed rules only",
                    path.display(),
                    e
                );
                Self::without_dictionary()
            }
        }
    }

    /// Прочитать словарь в формате `yo.dat`
    pub fn from_reader<R: Read>(reader: R) -> Self {
        let mut dictionary = HashMap::new();
        for line in BufReader::new(reader).lines().map_while(Result::ok) {
            let line = line.trim();
            if line.is_empty() || line.contains('*') {
                continue;
            }

            let (base, suffixes) = match line.split_once('(') {
                Some((base, rest)) => (base, rest.trim_end_matches(')')),
                None => (line, ""),
            };

            for suffix in suffixes.split('|') {
                let value = format!("{}{}", base, suffix);
                dictionary.insert(value.replace('ё', "е"), value);
            }
        }
        Self { dictionary }
    }

    /// Число слов в словаре
    pub fn len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionary.is_empty()
    }

    /// Ёфицировать текст, сохраняя всё, кроме замены «е» на «ё»
    pub fn yoficate(&self, text: &str) -> String {
        TOKEN
            .find_iter(text)
            .map(|token| {
                let word = token.as_str();
                self.lookup(word).unwrap_or_else(|| word.to_string())
            })
            .collect()
    }

    fn lookup(&self, word: &str) -> Option<String> {
        if !word.contains(['е', 'Е']) {
            return None;
        }
        if let Some(value) = self.dictionary.get(word) {
            return Some(value.clone());
        }

        let lower = word.to_lowercase();
        let found = self
            .dictionary
            .get(&lower)
            .cloned()
            .or_else(|| {
                FIXED_RULES
                    .iter()
                    .find(|(plain, _)| *plain == lower)
                    .map(|(_, yo)| yo.to_string())
            })?;
        Some(match_case(word, &found))
    }
}

/// Перенести регистр исходного слова на ёфицированное
fn match_case(original: &str, replacement: &str) -> String {
    original
        .chars()
        .zip(replacement.chars())
        .map(|(o, r)| {
            if o.is_uppercase() {
                r.to_uppercase().next().unwrap_or(r)
            } else {
                r
            }
        })
        .collect()
}
