//! End-to-End Pipeline Tests
//!
//! Drives the full pipeline (pack directory, WASM engine, cache, resolver,
//! picker) through the scenarios the picker relies on.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::core::cache::{TranscodeCache, DEFAULT_SOFT_ENTRY_LIMIT};
use crate::core::packs::fixtures::raw_pack;
use crate::core::packs::{
    DirectoryPackStore, MetasSignature, PackResolver, PackSetSynchronizer, PackStore,
};
use crate::core::picker::{PickerController, PickerDeps, PickerOptions, PickerPhase};
use crate::core::transcode::testing::{CountingLoader, CountingTranscoder};
use crate::core::transcode::test_engines::echo_loader;
use crate::core::transcode::{
    fixtures, BlobStore, EngineHandle, EngineOptions, SourceAsset, TargetFormat, TargetPolicy,
};
use crate::core::CoreError;

fn wasm_engine() -> Arc<EngineHandle> {
    Arc::new(EngineHandle::new(
        Arc::new(echo_loader()),
        Arc::new(BlobStore::new()),
        EngineOptions::default(),
    ))
}

fn resolver(store: Arc<DirectoryPackStore>, engine: Arc<EngineHandle>) -> PackResolver {
    let cache = Arc::new(TranscodeCache::new(engine, DEFAULT_SOFT_ENTRY_LIMIT));
    PackResolver::new(store, cache, TargetPolicy::default())
}

async fn directory_store(temp_dir: &TempDir, ids: &[&str]) -> Arc<DirectoryPackStore> {
    let store = Arc::new(DirectoryPackStore::new(temp_dir.path().join("packs")));
    for id in ids {
        store
            .save_pack(raw_pack(id, &[b"one", b"two"]))
            .await
            .unwrap();
    }
    store
}

#[tokio::test]
async fn test_pipeline_signature_from_directory_listing() {
    let temp_dir = TempDir::new().unwrap();
    let store = directory_store(&temp_dir, &["y", "x"]).await;
    let sync = PackSetSynchronizer::new(store.clone());

    let first = sync.poll(&MetasSignature::empty()).await.unwrap();
    assert!(first.changed);
    assert_eq!(first.signature.as_str(), "x,y");

    let second = sync.poll(&first.signature).await.unwrap();
    assert!(!second.changed);

    store.delete_pack("y").await.unwrap();
    let third = sync.poll(&second.signature).await.unwrap();
    assert!(third.changed);
    assert_eq!(third.signature.as_str(), "x");
}

#[tokio::test]
async fn test_pipeline_concurrent_warmup_initializes_once() {
    let loader = CountingLoader::slow(CountingTranscoder::new(), Duration::from_millis(30));
    let engine = Arc::new(EngineHandle::new(
        loader.clone(),
        Arc::new(BlobStore::new()),
        EngineOptions::default(),
    ));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.ensure_loaded().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(loader.loads(), 1);
    assert!(engine.is_loaded());
}

#[tokio::test]
async fn test_pipeline_convert_requires_loaded_engine() {
    let engine = wasm_engine();
    let asset = SourceAsset::new(fixtures::still_png(), Some("image/png".to_string()));

    let err = engine.convert(&asset, TargetFormat::Png).await.unwrap_err();
    assert!(matches!(err, CoreError::EngineNotReady));

    engine.ensure_loaded().await.unwrap();
    let rendered = engine.convert(&asset, TargetFormat::Png).await.unwrap();
    assert_eq!(rendered.mime_type, "image/png");
    assert_eq!(rendered.size_bytes, asset.len() as u64 + 1);
}

#[tokio::test]
async fn test_pipeline_resolving_twice_reuses_conversions() {
    let temp_dir = TempDir::new().unwrap();
    let store = directory_store(&temp_dir, &["x"]).await;
    let engine = wasm_engine();
    let resolver = resolver(store, engine.clone());

    let first = resolver.resolve_pack("x").await.unwrap().unwrap();
    let conversions = engine.conversion_count();
    assert_eq!(conversions, 2);

    let second = resolver.resolve_pack("x").await.unwrap().unwrap();
    assert_eq!(engine.conversion_count(), conversions);
    assert_eq!(
        first.stickers[1].renderable().unwrap().url,
        second.stickers[1].renderable().unwrap().url
    );
}

#[tokio::test]
async fn test_pipeline_batch_filters_deleted_pack() {
    let temp_dir = TempDir::new().unwrap();
    let store = directory_store(&temp_dir, &["A", "B", "C"]).await;
    let metas = store.list_pack_metas().await.unwrap();
    let ids: Vec<_> = metas.into_iter().map(|m| m.id).collect();

    // B disappears between listing and resolution
    store.delete_pack("B").await.unwrap();

    let packs = resolver(store, wasm_engine())
        .resolve_packs(&ids)
        .await
        .unwrap();
    let resolved: Vec<_> = packs.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(resolved, vec!["A", "C"]);
}

#[tokio::test]
async fn test_pipeline_one_corrupt_sticker_of_five() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(DirectoryPackStore::new(temp_dir.path().to_path_buf()));
    let still = fixtures::still_png();
    store
        .save_pack(raw_pack("mixed", &[&still, b"a", &[0xFF, 0x00], b"b", b"c"]))
        .await
        .unwrap();

    let pack = resolver(store, wasm_engine())
        .resolve_pack("mixed")
        .await
        .unwrap()
        .unwrap();

    assert_eq!(pack.stickers.len(), 5);
    assert_eq!(pack.placeholder_count(), 1);
    assert!(pack.stickers[2].is_placeholder());
    assert_eq!(
        pack.stickers.iter().filter(|s| s.renderable().is_some()).count(),
        4
    );
}

#[tokio::test]
async fn test_pipeline_picker_over_directory_store() {
    let temp_dir = TempDir::new().unwrap();
    let store = directory_store(&temp_dir, &["x", "y"]).await;
    let engine = wasm_engine();

    let controller = PickerController::mount(
        PickerDeps {
            store: store.clone(),
            engine: engine.clone(),
            sink: None,
        },
        PickerOptions::default(),
    );

    let mut rx = controller.subscribe();
    let state = tokio::time::timeout(
        Duration::from_secs(10),
        rx.wait_for(|s| s.phase == PickerPhase::PacksReady && s.engine.is_loaded),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    assert_eq!(state.signature.as_str(), "x,y");
    assert_eq!(state.sticker_packs.len(), 2);
    assert!(state
        .sticker_packs
        .iter()
        .all(|p| p.placeholder_count() == 0));

    // Both packs share content, so each distinct sticker converts once
    assert_eq!(engine.conversion_count(), 2);
    assert_eq!(engine.blobs().len().await, 2);

    store.delete_pack("x").await.unwrap();
    assert!(controller.refresh().await.unwrap());
    assert_eq!(engine.blobs().len().await, 2);

    controller.unmount().await;
    assert!(engine.blobs().is_empty().await);
}
