//! Расстановка ударений
//!
//! Ударение обозначается знаком `+` перед ударной гласной: `прив+ет`.
//! Перед вызовом модели существующие знаки удаляются, поэтому повторная
//! разметка уже размеченного текста безопасна и даёт тот же результат.

use std::sync::Arc;

use log::debug;

use super::normalize::{detect_language, Language};
use crate::error::AnnotationError;
use crate::model::{AccentModel, GateError, InferenceContext, Interrupted, ModelHandle};

/// Знак ударения
pub const STRESS_MARK: char = '+';

/// Удалить знаки ударения
pub fn strip_accents(text: &str) -> String {
    text.chars().filter(|&c| c != STRESS_MARK).collect()
}

/// Обёртка над моделью ударений
#[derive(Clone)]
pub struct AccentAnnotator {
    handle: ModelHandle,
    model: Arc<dyn AccentModel>,
}

impl AccentAnnotator {
    /// Создать из дескриптора модели ударений
    pub fn new(handle: ModelHandle) -> Result<Self, AnnotationError> {
        let model = handle.accent().ok_or_else(|| {
            AnnotationError::Model(format!("model {} is not an accent model", handle.key()))
        })?;
        Ok(Self { handle, model })
    }

    /// Расставить ударения. Текст не на русском возвращается без изменений.
    pub async fn annotate(&self, text: &str, ctx: &InferenceContext) -> Result<String, AnnotationError> {
        let plain = strip_accents(text);
        if plain.trim().is_empty() || detect_language(&plain) != Language::Russian {
            return Ok(plain);
        }

        let model = self.model.clone();
        let input = plain.clone();
        let annotated = self
            .handle
            .run_exclusive(ctx, move || model.accentize(&input))
            .await
            .map_err(|e| match e {
                GateError::Interrupted(Interrupted::Timeout) => {
                    AnnotationError::Model("deadline exceeded".into())
                }
                GateError::Interrupted(Interrupted::Cancelled) => {
                    AnnotationError::Model("cancelled".into())
                }
                GateError::Panicked(msg) => AnnotationError::Model(msg),
            })??;

        if !same_letters(&plain, &annotated) {
            return Err(AnnotationError::Mismatch(annotated));
        }

        debug!("Accented: '{}' -> '{}'", plain, annotated);
        Ok(annotated)
    }
}

/// Текст совпадает с точностью до знаков ударения, регистра и «ё»
fn same_letters(plain: &str, annotated: &str) -> bool {
    let fold = |s: &str| -> String {
        strip_accents(s)
            .to_lowercase()
            .chars()
            .map(|c| if c == 'ё' { 'е' } else { c })
            .collect()
    };
    fold(plain) == fold(annotated)
}
