use std::sync::Arc;

use anyhow::Context;
use log::{error, info};

use ru_tts::logger::init_logger;
use ru_tts::model::worker::{InferenceWorker, WorkerLoader};
use ru_tts::server::{create_router, shutdown_signal, AppState};
use ru_tts::text::Yoficator;
use ru_tts::{ModelRegistry, Settings, SynthesisEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let settings = Settings::load().context("failed to load settings")?;
    info!(
        "Starting ru-tts server on {} (device {}, cache {})",
        settings.bind_address(),
        settings.synthesis.device,
        settings.cache_dir.display()
    );

    let weights = settings.weight_cache();
    if !weights.allows_download() {
        info!("Offline mode: weights are taken from {} only", weights.root().display());
    }
    let worker = Arc::new(InferenceWorker::new(settings.worker.clone())?);
    info!("Inference worker at {}", worker.base_url());
    let loader = WorkerLoader::new(worker.clone(), Arc::new(weights));
    let registry = ModelRegistry::install_global(Arc::new(ModelRegistry::new(Arc::new(loader))));

    let yoficator = match &settings.yo_dictionary {
        Some(path) => Yoficator::load(path),
        None => Yoficator::without_dictionary(),
    };
    let engine = SynthesisEngine::new(registry, settings.synthesis.clone())?
        .with_output_dir(&settings.output_dir)
        .with_yoficator(yoficator)
        .with_voice_cache_capacity(settings.voice_cache_capacity)
        .with_reference_limits(settings.reference_limits());
    info!("Writing results to {}", engine.output_dir().display());
    let engine = Arc::new(engine);

    if settings.warm_up_on_start {
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.warm_up().await {
                error!("Warm-up failed: {}", e);
            }
        });
    }

    let app = create_router(AppState::new(engine, &settings));
    let listener = tokio::net::TcpListener::bind(settings.bind_address())
        .await
        .with_context(|| format!("cannot bind {}", settings.bind_address()))?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    worker.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}
