mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use common::*;
use ru_tts::{ReferenceAudio, SynthesisRequest};

const TEXTS: [&str; 2] = [
    "Первый запрос. Он короткий, но состоит из двух предложений.",
    "Второй запрос звучит иначе! И тоже проходит через ту же модель.",
];

fn request(text: &str) -> SynthesisRequest {
    SynthesisRequest::new(
        text,
        ReferenceAudio::Bytes {
            data: reference_wav(3.0).into(),
            extension: Some("wav".into()),
        },
        "Эталонная запись.",
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_match_sequential_output() {
    let sequential_dir = tempdir().unwrap();
    let sequential = engine_with(
        Arc::new(FakeLoader::new(ToneModel::default())),
        sequential_dir.path(),
    );
    let mut expected = Vec::new();
    for text in TEXTS {
        let output = sequential.synthesize_speech(request(text)).await.unwrap();
        expected.push(read_wav(&output.path));
    }

    let concurrent_dir = tempdir().unwrap();
    let loader = Arc::new(FakeLoader::new(ToneModel::with_delay(Duration::from_millis(30))));
    let engine = Arc::new(engine_with(loader.clone(), concurrent_dir.path()));

    let tasks: Vec<_> = TEXTS
        .iter()
        .map(|text| {
            let engine = engine.clone();
            let request = request(text);
            tokio::spawn(async move { engine.synthesize_speech(request).await })
        })
        .collect();

    let mut actual = Vec::new();
    for task in tasks {
        let output = task.await.unwrap().unwrap();
        actual.push(read_wav(&output.path));
    }

    assert_eq!(actual, expected);
    assert_eq!(loader.speech.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(loader.speech_loads.load(Ordering::SeqCst), 1);
    assert!(loader.speech.calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_first_requests_load_the_model_once() {
    let dir = tempdir().unwrap();
    let loader = Arc::new(FakeLoader::new(ToneModel::default()));
    let engine = Arc::new(engine_with(loader.clone(), dir.path()));

    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let engine = engine.clone();
            let request = request(if i % 2 == 0 { "Чётный." } else { "Нечётный." });
            tokio::spawn(async move { engine.synthesize_speech(request).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(loader.speech_loads.load(Ordering::SeqCst), 1);
    assert_eq!(loader.accent_loads.load(Ordering::SeqCst), 1);
    assert_eq!(loader.speech.overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(engine.registry().load_count(), 2);
}
