//! Локальный каталог весов моделей
//!
//! Веса ищутся сначала в каталоге кэша (плоский путь или вложенный снимок в
//! стиле Hugging Face), и только при их отсутствии однократно скачиваются из
//! хаба. Загрузка пишется во временный файл рядом с целевым и переименовывается
//! после успешного завершения.

use std::path::{Path, PathBuf};

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use walkdir::WalkDir;

use crate::error::ModelLoadError;

/// Репозиторий русской модели F5-TTS
pub const DEFAULT_REPO: &str = "Misha24-10/F5-TTS_RUSSIAN";
/// Контрольная точка модели внутри репозитория
pub const CHECKPOINT_FILE: &str = "F5TTS_v1_Base_v2/model_last_inference.safetensors";
/// Словарь токенов внутри репозитория
pub const VOCAB_FILE: &str = "F5TTS_v1_Base/vocab.txt";
/// Адрес хаба по умолчанию
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Пути к файлам весов модели синтеза
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechWeights {
    pub checkpoint: PathBuf,
    pub vocab: PathBuf,
}

/// Каталог весов с однократной загрузкой
pub struct WeightCache {
    root: PathBuf,
    repo: String,
    endpoint: String,
    allow_download: bool,
    client: reqwest::Client,
    download_lock: Mutex<()>,
}

impl WeightCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            repo: DEFAULT_REPO.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            allow_download: true,
            client: reqwest::Client::new(),
            download_lock: Mutex::new(()),
        }
    }

    /// Использовать другой адрес хаба (зеркало)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Использовать собственный HTTP-клиент
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = repo.into();
        self
    }

    /// Запретить загрузку: отсутствующие веса дают `MissingWeights`
    pub fn offline(mut self) -> Self {
        self.allow_download = false;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Разрешена ли загрузка отсутствующих весов
    pub fn allows_download(&self) -> bool {
        self.allow_download
    }

    /// Найти файл в кэше. Блокирующий обход каталога.
    pub fn locate(&self, repo_path: &str) -> Option<PathBuf> {
        locate_in(&self.root, repo_path)
    }

    /// Найти файл в кэше, не блокируя асинхронный поток
    async fn find_cached(&self, repo_path: &str) -> Result<Option<PathBuf>, ModelLoadError> {
        let root = self.root.clone();
        let repo_path = repo_path.to_string();
        tokio::task::spawn_blocking(move || locate_in(&root, &repo_path))
            .await
            .map_err(|e| ModelLoadError::MissingWeights(format!("cache scan failed: {}", e)))
    }

    /// Найти файл или скачать его
    pub async fn ensure(&self, repo_path: &str) -> Result<PathBuf, ModelLoadError> {
        if let Some(path) = self.find_cached(repo_path).await? {
            debug!("Found cached weights {}", path.display());
            return Ok(path);
        }

        if !self.allow_download {
            return Err(ModelLoadError::MissingWeights(format!(
                "{} not found in {}",
                repo_path,
                self.root.display()
            )));
        }

        let _lock = self.download_lock.lock().await;
        // Файл мог появиться, пока ждали блокировку
        if let Some(path) = self.find_cached(repo_path).await? {
            return Ok(path);
        }
        self.download(repo_path).await
    }

    /// Получить веса модели синтеза
    pub async fn ensure_speech_weights(&self) -> Result<SpeechWeights, ModelLoadError> {
        Ok(SpeechWeights {
            checkpoint: self.ensure(CHECKPOINT_FILE).await?,
            vocab: self.ensure(VOCAB_FILE).await?,
        })
    }

    async fn download(&self, repo_path: &str) -> Result<PathBuf, ModelLoadError> {
        let url = format!("{}/{}/resolve/main/{}", self.endpoint, self.repo, repo_path);
        let dest = self.root.join(repo_path);
        let parent = dest.parent().unwrap_or(&self.root).to_path_buf();
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|e| ModelLoadError::Download(format!("cannot create {}: {}", parent.display(), e)))?;

        let temp_path = parent.join(format!(
            ".{}.part-{}",
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("download"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        ));

        info!("Downloading {} -> {}", url, dest.display());
        match self.fetch_to(&url, &temp_path).await {
            Ok(size) => {
                tokio::fs::rename(&temp_path, &dest).await.map_err(|e| {
                    ModelLoadError::Download(format!("cannot move download into place: {}", e))
                })?;
                info!("Downloaded {} ({} bytes)", dest.display(), size);
                Ok(dest)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&temp_path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Failed to remove partial download {}: {}", temp_path.display(), rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch_to(&self, url: &str, temp_path: &Path) -> Result<u64, ModelLoadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ModelLoadError::Download(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ModelLoadError::Download(format!("{} returned {}", url, status)));
        }

        let mut file = tokio::fs::File::create(temp_path)
            .await
            .map_err(|e| ModelLoadError::Download(e.to_string()))?;
        let mut stream = response.bytes_stream();
        let mut size = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ModelLoadError::Download(e.to_string()))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| ModelLoadError::Download(e.to_string()))?;
            size += chunk.len() as u64;
        }
        file.flush()
            .await
            .map_err(|e| ModelLoadError::Download(e.to_string()))?;
        Ok(size)
    }
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or(false, |n| n.contains(".part-"))
}

/// Плоский путь `root/repo_path` или вложенный снимок с тем же окончанием
fn locate_in(root: &Path, repo_path: &str) -> Option<PathBuf> {
    let flat = root.join(repo_path);
    if flat.is_file() {
        return Some(flat);
    }

    if !root.is_dir() {
        return None;
    }

    WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() || entry.path_is_symlink())
        .map(|entry| entry.into_path())
        .find(|path| path.ends_with(repo_path) && !is_partial(path))
}
