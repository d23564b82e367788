//! Пример синтеза речи из командной строки
//!
//! Использование:
//!
//! ```text
//! cargo run --example synthesize_file -- <эталон.wav> "<текст эталона>" "<текст>"
//! ```
//!
//! Процесс инференса запускается автоматически (или берётся из
//! `RU_TTS_WORKER_URL`), веса ищутся в `RU_TTS_CACHE_DIR`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};

use ru_tts::logger::init_logger;
use ru_tts::model::worker::{InferenceWorker, WorkerLoader};
use ru_tts::text::Yoficator;
use ru_tts::{ModelRegistry, ReferenceAudio, Settings, SynthesisEngine, SynthesisRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [reference, reference_text, text] = args.as_slice() else {
        bail!("usage: synthesize_file <reference.wav> <reference text> <text>");
    };

    let settings = Settings::load().context("failed to load settings")?;
    let worker = Arc::new(InferenceWorker::new(settings.worker.clone())?);
    let loader = WorkerLoader::new(worker.clone(), Arc::new(settings.weight_cache()));
    let registry = Arc::new(ModelRegistry::new(Arc::new(loader)));

    let yoficator = settings
        .yo_dictionary
        .as_ref()
        .map(Yoficator::load)
        .unwrap_or_default();
    let engine = SynthesisEngine::new(registry, settings.synthesis.clone())?
        .with_output_dir(&settings.output_dir)
        .with_yoficator(yoficator)
        .with_reference_limits(settings.reference_limits());

    println!("Загрузка моделей...");
    engine.warm_up().await?;

    let request = SynthesisRequest::new(
        text.as_str(),
        ReferenceAudio::Path(PathBuf::from(reference)),
        reference_text.as_str(),
    )
    .with_timeout(Duration::from_secs(600));

    let output = engine.synthesize_speech(request).await?;
    println!(
        "Готово: {} ({:.2} с, фрагментов: {})",
        output.path.display(),
        output.duration.as_secs_f32(),
        output.chunk_count
    );

    worker.shutdown().await;
    Ok(())
}
