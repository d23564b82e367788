//! Реестр моделей
//!
//! Модели загружаются лениво, не более одного раза на ключ за время жизни
//! процесса. Одновременные первые обращения к одному ключу ждут одну и ту же
//! загрузку и получают копии одного дескриптора. Неудачная загрузка оставляет
//! слот пустым, следующий вызов попробует снова.
//!
//! Общий для процесса экземпляр устанавливается один раз через
//! [`ModelRegistry::install_global`] и живёт до завершения процесса; явной
//! выгрузки нет.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use log::{error, info};
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use super::{LoadedModel, ModelHandle, ModelKey, ModelKind, ModelLoader};
use crate::error::ModelLoadError;

static GLOBAL: once_cell::sync::OnceCell<Arc<ModelRegistry>> = once_cell::sync::OnceCell::new();

/// Кэш загруженных моделей
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    slots: Mutex<HashMap<ModelKey, Arc<OnceCell<ModelHandle>>>>,
    loads: AtomicUsize,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    /// Установить общий экземпляр. Повторная установка возвращает уже установленный.
    pub fn install_global(registry: Arc<ModelRegistry>) -> Arc<ModelRegistry> {
        GLOBAL.get_or_init(|| registry).clone()
    }

    /// Получить дескриптор модели, загрузив её при первом обращении
    pub async fn get(&self, key: ModelKey) -> Result<ModelHandle, ModelLoadError> {
        let slot = self.slots.lock().entry(key).or_default().clone();

        let handle = slot
            .get_or_try_init(|| async {
                info!("Loading model {}", key);
                let started = Instant::now();

                let model = match key.kind {
                    ModelKind::Speech => LoadedModel::Speech(self.loader.load_speech(key.device).await?),
                    ModelKind::Accent(size) => {
                        LoadedModel::Accent(self.loader.load_accent(size, key.device).await?)
                    }
                };

                self.loads.fetch_add(1, Ordering::SeqCst);
                info!("Model {} loaded in {:.1?}", key, started.elapsed());
                Ok::<_, ModelLoadError>(ModelHandle::new(key, model))
            })
            .await
            .map_err(|e| {
                error!("Failed to load model {}: {}", key, e);
                e
            })?;

        Ok(handle.clone())
    }

    /// Загружена ли модель
    pub fn is_loaded(&self, key: &ModelKey) -> bool {
        self.slots
            .lock()
            .get(key)
            .map_or(false, |slot| slot.initialized())
    }

    /// Число завершённых загрузок
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}
