//! Wake word backend selection tests
//!
//! Model assets are plain files in a scratch directory; only their presence
//! matters to selection.

use std::path::{Path, PathBuf};

use voice_frontend::Error;
use voice_frontend::voice::{
    BackendKind, BackendSlot, SegmentationEngine, SegmenterConfig, WakeWordBackends,
    WakeWordConfig,
};

mod common;

use common::{BrokenProvider, ScriptedInput, ScriptedProvider};

fn asset(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"model").unwrap();
    path
}

#[test]
fn test_primary_preferred() {
    let dir = tempfile::tempdir().unwrap();
    let primary = ScriptedProvider::new(Vec::new()).named("primary");
    let fallback = ScriptedProvider::new(Vec::new()).named("fallback");

    let backends = WakeWordBackends::new()
        .with_primary(BackendSlot::new(primary.clone()).with_model(Some(asset(dir.path(), "a"))))
        .with_fallback(BackendSlot::new(fallback.clone()).with_model(Some(asset(dir.path(), "b"))));

    let backend = backends.select().unwrap();
    assert_eq!(backend.kind(), BackendKind::Primary);
    assert_eq!(primary.inits(), 1);
    assert_eq!(fallback.inits(), 0);
}

#[test]
fn test_missing_primary_asset_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let primary = ScriptedProvider::new(Vec::new());
    let fallback = ScriptedProvider::new(Vec::new());

    let backends = WakeWordBackends::new()
        .with_primary(
            BackendSlot::new(primary.clone()).with_model(Some(dir.path().join("missing.onnx"))),
        )
        .with_fallback(
            BackendSlot::new(fallback.clone()).with_model(Some(asset(dir.path(), "hey.rpw"))),
        );

    let backend = backends.select().unwrap();
    assert_eq!(backend.kind(), BackendKind::Fallback);
    // Missing assets are caught before the provider is asked
    assert_eq!(primary.inits(), 0);
    assert_eq!(fallback.inits(), 1);
}

#[test]
fn test_missing_credential_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let primary = ScriptedProvider::new(Vec::new()).requiring_credential();
    let fallback = ScriptedProvider::new(Vec::new());

    let backends = WakeWordBackends::new()
        .with_primary(
            BackendSlot::new(primary.clone())
                .with_model(Some(asset(dir.path(), "a")))
                .with_credential(None),
        )
        .with_fallback(BackendSlot::new(fallback).with_model(Some(asset(dir.path(), "b"))));

    assert_eq!(backends.select().unwrap().kind(), BackendKind::Fallback);
    assert_eq!(primary.inits(), 0);
}

#[test]
fn test_credential_enables_primary() {
    let dir = tempfile::tempdir().unwrap();
    let primary = ScriptedProvider::new(Vec::new()).requiring_credential();

    let backends = WakeWordBackends::new().with_primary(
        BackendSlot::new(primary.clone())
            .with_model(Some(asset(dir.path(), "a")))
            .with_credential(Some("key-123".to_string())),
    );

    assert_eq!(backends.select().unwrap().kind(), BackendKind::Primary);
    assert_eq!(primary.inits(), 1);
}

#[test]
fn test_primary_init_failure_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let broken = BrokenProvider::default();

    let backends = WakeWordBackends::new()
        .with_primary(BackendSlot::new(broken.clone()).with_model(Some(asset(dir.path(), "a"))))
        .with_fallback(
            BackendSlot::new(ScriptedProvider::new(Vec::new()))
                .with_model(Some(asset(dir.path(), "b"))),
        );

    assert_eq!(backends.select().unwrap().kind(), BackendKind::Fallback);
    assert_eq!(broken.inits.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn test_no_assets_is_fatal() {
    let dir = tempfile::tempdir().unwrap();

    let backends = WakeWordBackends::new()
        .with_primary(
            BackendSlot::new(ScriptedProvider::new(Vec::new()))
                .with_model(Some(dir.path().join("primary.onnx"))),
        )
        .with_fallback(
            BackendSlot::new(ScriptedProvider::new(Vec::new()))
                .with_model(Some(dir.path().join("fallback.rpw"))),
        );

    match backends.select() {
        Err(Error::NoWakeWordBackendAvailable(causes)) => {
            assert!(causes.contains("primary.onnx"));
            assert!(causes.contains("fallback.rpw"));
        }
        other => panic!("expected no backend, got {:?}", other.map(|b| b.kind())),
    }
}

#[test]
fn test_unconfigured_assets_are_fatal() {
    let backends = WakeWordBackends::new()
        .with_primary(BackendSlot::new(ScriptedProvider::new(Vec::new())))
        .with_fallback(BackendSlot::new(ScriptedProvider::new(Vec::new())));

    assert!(matches!(
        backends.select(),
        Err(Error::NoWakeWordBackendAvailable(_))
    ));
}

#[test]
fn test_engine_start_fails_without_backend() {
    let input = ScriptedInput::frames(Vec::new());
    let mut engine =
        SegmentationEngine::new(SegmenterConfig::default(), input.clone(), WakeWordBackends::new());

    let result = engine.start();
    assert!(matches!(result, Err(Error::NoWakeWordBackendAvailable(_))));
    assert!(!engine.is_running());

    // Backend selection happens before the device is touched
    assert_eq!(input.opens(), 0);
}

#[test]
fn test_engine_runs_on_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let backends = WakeWordBackends::new()
        .with_primary(
            BackendSlot::new(BrokenProvider::default()).with_model(Some(asset(dir.path(), "a"))),
        )
        .with_fallback(
            BackendSlot::new(ScriptedProvider::new(Vec::new()))
                .with_model(Some(asset(dir.path(), "b"))),
        );

    let mut engine = SegmentationEngine::new(
        SegmenterConfig::default(),
        ScriptedInput::frames(Vec::new()),
        backends,
    );

    engine.start().unwrap();
    assert_eq!(
        engine.status(),
        voice_frontend::EngineStatus::Running {
            backend: BackendKind::Fallback
        }
    );
    engine.stop();
}

#[test]
fn test_builtin_backends_without_assets() {
    let backends = WakeWordBackends::from_config(&WakeWordConfig::default());
    assert!(matches!(
        backends.select(),
        Err(Error::NoWakeWordBackendAvailable(_))
    ));
}

#[cfg(feature = "openwakeword")]
#[test]
fn test_openwakeword_needs_shared_models() {
    // A classifier without melspectrogram/embedding models next to it
    let dir = tempfile::tempdir().unwrap();
    let config = WakeWordConfig {
        primary_model: Some(asset(dir.path(), "hey_jarvis.onnx")),
        ..WakeWordConfig::default()
    };

    match WakeWordBackends::from_config(&config).select() {
        Err(Error::NoWakeWordBackendAvailable(causes)) => {
            assert!(causes.contains("melspectrogram.onnx"));
        }
        other => panic!("expected no backend, got {:?}", other.map(|b| b.kind())),
    }
}
