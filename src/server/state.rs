//! Общее состояние обработчиков

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use path_clean::PathClean;

use crate::engine::SynthesisEngine;
use crate::error::EngineError;
use crate::settings::Settings;

/// Состояние приложения
#[derive(Clone)]
pub struct AppState {
    /// Движок синтеза
    pub engine: Arc<SynthesisEngine>,
    /// Таймаут запроса, если клиент не указал свой
    pub default_timeout: Option<Duration>,
    /// Каталог эталонов, доступных по пути
    pub reference_dir: Option<PathBuf>,
}

impl AppState {
    pub fn new(engine: Arc<SynthesisEngine>, settings: &Settings) -> Self {
        Self {
            engine,
            default_timeout: settings.default_timeout_ms.map(Duration::from_millis),
            reference_dir: settings.reference_dir.as_ref().map(|dir| dir.clean()),
        }
    }

    /// Путь эталона внутри каталога эталонов. Пути за его пределами и пути
    /// при не заданном каталоге отклоняются.
    pub fn resolve_reference(&self, path: &Path) -> Result<PathBuf, EngineError> {
        let dir = self.reference_dir.as_ref().ok_or_else(|| {
            EngineError::Input("'ref_audio_path' is disabled, upload 'ref_audio' instead".into())
        })?;

        let resolved = dir.join(path).clean();
        if !resolved.starts_with(dir) {
            return Err(EngineError::Input(format!(
                "reference path {} is outside the reference directory",
                path.display()
            )));
        }
        Ok(resolved)
    }
}
