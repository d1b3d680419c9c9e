//! Picker State Controller
//!
//! Owns the picker state tree and drives it: engine warm-up, metadata polls,
//! pack resolution, and the user actions the presentation layer calls.
//!
//! Background work runs on a [`JoinSet`] owned by the controller, so unmounting
//! (or dropping) the controller aborts it. Each resolution is tagged with a
//! poll generation; a result whose generation is no longer the latest is
//! discarded instead of overwriting newer state.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;

use super::sink::{StickerSink, StickerSubmission};
use super::state::{Availability, EngineView, PickerPhase, PickerState, VisibleSticker};
use crate::core::cache::{TranscodeCache, DEFAULT_SOFT_ENTRY_LIMIT};
use crate::core::packs::{
    PackDirectoryWatcher, PackResolver, PackSetSynchronizer, PackStore, StickerPack,
};
use crate::core::settings::StickerSettings;
use crate::core::transcode::{EngineHandle, EngineStatus, TargetPolicy};
use crate::core::{CoreError, CoreResult, PackId};

// =============================================================================
// Mount Configuration
// =============================================================================

/// Collaborators injected at mount
#[derive(Clone)]
pub struct PickerDeps {
    pub store: Arc<dyn PackStore>,
    pub engine: Arc<EngineHandle>,
    /// Host upload path; `None` disables `commit_sticker`
    pub sink: Option<Arc<dyn StickerSink>>,
}

/// Controller behaviour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickerOptions {
    pub policy: TargetPolicy,
    /// Periodic metadata poll; `None` polls on mount and refresh only
    pub poll_interval: Option<Duration>,
    /// Pack directory to watch for on-disk changes
    pub watch_dir: Option<PathBuf>,
    pub soft_entry_limit: usize,
}

impl Default for PickerOptions {
    fn default() -> Self {
        Self {
            policy: TargetPolicy::default(),
            poll_interval: None,
            watch_dir: None,
            soft_entry_limit: DEFAULT_SOFT_ENTRY_LIMIT,
        }
    }
}

impl PickerOptions {
    /// Options from settings. `pack_dir` is watched when the settings enable it.
    pub fn from_settings(settings: &StickerSettings, pack_dir: Option<PathBuf>) -> Self {
        Self {
            policy: settings.target_policy(),
            poll_interval: (settings.picker.poll_interval_secs > 0)
                .then(|| Duration::from_secs(settings.picker.poll_interval_secs)),
            watch_dir: pack_dir.filter(|_| settings.packs.watch),
            soft_entry_limit: settings.cache.soft_entry_limit,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// State shared between the controller and its background tasks
struct Session {
    state: watch::Sender<PickerState>,
    synchronizer: PackSetSynchronizer,
    resolver: PackResolver,
    engine: Arc<EngineHandle>,
    sink: Option<Arc<dyn StickerSink>>,
    /// Latest started resolution
    generation: AtomicU64,
    closed: AtomicBool,
    /// Serializes polls so each compares against the latest signature
    poll_lock: tokio::sync::Mutex<()>,
}

impl Session {
    fn cache(&self) -> &Arc<TranscodeCache> {
        self.resolver.cache()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_closed() {
            Err(CoreError::ControllerClosed)
        } else {
            Ok(())
        }
    }

    fn update(&self, modify: impl FnOnce(&mut PickerState)) {
        if !self.is_closed() {
            self.state.send_modify(modify);
        }
    }

    fn current_pack_ids(&self) -> Vec<PackId> {
        self.state
            .borrow()
            .sticker_pack_metas
            .iter()
            .map(|meta| meta.id.clone())
            .collect()
    }

    async fn warm_up(self: Arc<Self>) {
        if let Err(e) = self.engine.ensure_loaded().await {
            tracing::warn!("Sticker engine unavailable: {}", e);
            let reason = e.to_string();
            self.update(|state| {
                state.availability = Availability::Unavailable { reason };
            });
        }
    }

    /// Mirrors engine status into the state tree.
    async fn follow_engine(self: Arc<Self>) {
        let mut status_rx = self.engine.subscribe();
        loop {
            let status = status_rx.borrow_and_update().clone();
            self.apply_engine_status(status);
            if status_rx.changed().await.is_err() {
                break;
            }
        }
    }

    fn apply_engine_status(&self, status: EngineStatus) {
        self.update(|state| {
            if let EngineStatus::Failed(reason) = &status {
                state.availability = Availability::Unavailable {
                    reason: reason.clone(),
                };
            }
            // Readiness is monotonic
            if !state.engine.is_loaded {
                state.engine = EngineView::from_status(status);
            }
        });
    }

    async fn poll_periodically(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; mount already polled
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if matches!(self.synchronize().await, Err(CoreError::ControllerClosed)) {
                break;
            }
        }
    }

    async fn refresh_on_ticks(self: Arc<Self>, mut ticks: mpsc::Receiver<()>) {
        while ticks.recv().await.is_some() {
            tracing::debug!("Pack directory changed, refreshing");
            if matches!(self.synchronize().await, Err(CoreError::ControllerClosed)) {
                break;
            }
        }
    }

    /// One synchronization cycle. Returns whether new packs were applied.
    async fn synchronize(&self) -> CoreResult<bool> {
        self.ensure_open()?;

        let (generation, pack_ids) = {
            let _poll = self.poll_lock.lock().await;
            let last = self.state.borrow().signature.clone();

            let outcome = match self.synchronizer.poll(&last).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!("Sticker pack poll failed, keeping current packs: {}", e);
                    let message = e.to_string();
                    self.update(|state| {
                        state.last_error = Some(message);
                        if state.phase == PickerPhase::MetasLoading {
                            state.phase = PickerPhase::MetasReady;
                        }
                    });
                    return Err(e);
                }
            };
            self.ensure_open()?;

            if !outcome.changed {
                self.update(|state| {
                    state.last_error = None;
                    // Nothing to resolve for a first poll that matches the empty set
                    if state.phase == PickerPhase::MetasLoading {
                        state.phase = PickerPhase::PacksReady;
                    }
                });
                return Ok(false);
            }

            let pack_ids: Vec<PackId> = outcome.metas.iter().map(|m| m.id.clone()).collect();
            let mut generation = 0;
            self.update(|state| {
                generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                state.sticker_pack_metas = outcome.metas;
                state.signature = outcome.signature;
                state.phase = PickerPhase::PacksResolving;
                state.last_error = None;
                let selection_gone = !state
                    .selected_sticker_pack_id
                    .as_ref()
                    .is_some_and(|id| pack_ids.contains(id));
                if selection_gone {
                    state.selected_sticker_pack_id = pack_ids.first().cloned();
                }
            });
            (generation, pack_ids)
        };

        let result = self.resolver.resolve_packs(&pack_ids).await;

        if self.is_closed() {
            // Unmount already cleared the cache; drop what this run added
            self.cache().clear().await;
            return Err(CoreError::ControllerClosed);
        }

        match result {
            Ok(packs) => {
                let count = packs.len();
                let applied = self.state.send_if_modified(|state| {
                    if self.generation.load(Ordering::SeqCst) != generation || self.is_closed() {
                        return false;
                    }
                    state.sticker_packs = packs;
                    state.phase = PickerPhase::PacksReady;
                    state.generation = generation;
                    true
                });

                if applied {
                    tracing::info!(
                        "Resolved {} sticker packs (generation {})",
                        count,
                        generation
                    );
                    self.cache().retain_packs(&pack_ids).await;
                } else {
                    tracing::debug!("Discarding stale pack resolution (generation {})", generation);
                    self.cache().retain_packs(&self.current_pack_ids()).await;
                }
                Ok(applied)
            }
            Err(e) => {
                tracing::warn!("Sticker packs unavailable: {}", e);
                let reason = e.to_string();
                self.update(|state| {
                    state.availability = Availability::Unavailable {
                        reason: reason.clone(),
                    };
                    state.phase = PickerPhase::MetasReady;
                    state.last_error = Some(reason);
                });
                Err(e)
            }
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// Mounted picker session
pub struct PickerController {
    session: Arc<Session>,
    tasks: Mutex<JoinSet<()>>,
    watcher: Mutex<Option<PackDirectoryWatcher>>,
}

impl PickerController {
    /// Mounts the picker: starts engine warm-up, the first metadata poll, and
    /// the optional periodic poll and directory watch.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn mount(deps: PickerDeps, options: PickerOptions) -> Self {
        let cache = Arc::new(TranscodeCache::new(
            Arc::clone(&deps.engine),
            options.soft_entry_limit,
        ));
        let resolver = PackResolver::new(Arc::clone(&deps.store), cache, options.policy);

        let (state, _) = watch::channel(PickerState {
            phase: PickerPhase::MetasLoading,
            engine: EngineView::from_status(deps.engine.status()),
            ..PickerState::default()
        });

        let session = Arc::new(Session {
            state,
            synchronizer: PackSetSynchronizer::new(deps.store),
            resolver,
            engine: deps.engine,
            sink: deps.sink,
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            poll_lock: tokio::sync::Mutex::new(()),
        });

        let mut tasks = JoinSet::new();
        tasks.spawn(Arc::clone(&session).follow_engine());
        tasks.spawn(Arc::clone(&session).warm_up());
        {
            let session = Arc::clone(&session);
            tasks.spawn(async move {
                if let Err(e) = session.synchronize().await {
                    tracing::debug!("Initial sticker pack sync failed: {}", e);
                }
            });
        }
        if let Some(period) = options.poll_interval {
            tasks.spawn(Arc::clone(&session).poll_periodically(period));
        }

        let watcher = options.watch_dir.and_then(|dir| {
            let (tick_tx, tick_rx) = mpsc::channel(1);
            match PackDirectoryWatcher::start(dir, tick_tx) {
                Ok(watcher) => {
                    tasks.spawn(Arc::clone(&session).refresh_on_ticks(tick_rx));
                    Some(watcher)
                }
                Err(e) => {
                    tracing::warn!("Pack directory watch disabled: {}", e);
                    None
                }
            }
        });

        tracing::info!("Sticker picker mounted");

        Self {
            session,
            tasks: Mutex::new(tasks),
            watcher: Mutex::new(watcher),
        }
    }

    /// Runs one synchronization cycle now.
    pub async fn refresh(&self) -> CoreResult<bool> {
        self.session.synchronize().await
    }

    pub fn subscribe(&self) -> watch::Receiver<PickerState> {
        self.session.state.subscribe()
    }

    pub fn state(&self) -> PickerState {
        self.session.state.borrow().clone()
    }

    pub fn cache(&self) -> &Arc<TranscodeCache> {
        self.session.cache()
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    pub fn set_query(&self, query: impl Into<String>) -> CoreResult<()> {
        self.session.ensure_open()?;
        let query = query.into();
        self.session.update(|state| state.query = query);
        Ok(())
    }

    pub fn set_selected_pack_id(&self, pack_id: Option<PackId>) -> CoreResult<()> {
        self.session.ensure_open()?;
        self.session
            .update(|state| state.selected_sticker_pack_id = pack_id);
        Ok(())
    }

    pub fn visible_stickers(&self) -> Vec<VisibleSticker> {
        self.session.state.borrow().visible_stickers()
    }

    pub fn selected_pack(&self) -> Option<StickerPack> {
        self.session.state.borrow().selected_pack().cloned()
    }

    /// Hands the sticker's renderable asset to the host sink.
    pub async fn commit_sticker(
        &self,
        channel_id: &str,
        sticker_id: &str,
    ) -> CoreResult<StickerSubmission> {
        self.session.ensure_open()?;

        let (pack_id, asset) = {
            let state = self.session.state.borrow();
            let (pack, sticker) = state
                .find_sticker(sticker_id)
                .ok_or_else(|| CoreError::StickerNotFound(sticker_id.to_string()))?;
            let asset = sticker
                .renderable()
                .cloned()
                .ok_or_else(|| CoreError::StickerUnavailable(sticker_id.to_string()))?;
            (pack.id.clone(), asset)
        };

        let sink = self
            .session
            .sink
            .as_ref()
            .ok_or_else(|| CoreError::Internal("No sticker sink configured".to_string()))?;

        let data = self
            .session
            .engine
            .blobs()
            .get(&asset.url)
            .await
            .ok_or_else(|| CoreError::StickerUnavailable(sticker_id.to_string()))?;

        let submission = StickerSubmission {
            channel_id: channel_id.to_string(),
            pack_id,
            sticker_id: sticker_id.to_string(),
            filename: StickerSubmission::filename_for(sticker_id, &asset.mime_type),
            asset,
            data,
        };
        sink.submit(submission.clone()).await?;

        tracing::info!(
            "Committed sticker '{}' from '{}' to channel {}",
            submission.sticker_id,
            submission.pack_id,
            submission.channel_id
        );
        Ok(submission)
    }

    /// Closes the controller, aborts background work and releases every
    /// renderable asset of the session. In-flight results are dropped.
    pub async fn unmount(&self) {
        if self.session.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.abort_all();
        }
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(mut watcher) = watcher.take() {
                watcher.stop();
            }
        }

        let evicted = self.session.cache().clear().await;
        tracing::info!("Sticker picker unmounted ({} assets released)", evicted);
    }
}

impl Drop for PickerController {
    fn drop(&mut self) {
        self.session.closed.store(true, Ordering::SeqCst);
        if let Ok(tasks) = self.tasks.get_mut() {
            tasks.abort_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packs::fixtures::raw_pack;
    use crate::core::packs::MemoryPackStore;
    use crate::core::transcode::testing::{CountingLoader, CountingTranscoder, POISON_BYTE};
    use crate::core::transcode::{BlobStore, EngineLoader, EngineOptions};
    use async_trait::async_trait;

    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct RecordingSink {
        submissions: tokio::sync::Mutex<Vec<StickerSubmission>>,
    }

    #[async_trait]
    impl StickerSink for RecordingSink {
        async fn submit(&self, submission: StickerSubmission) -> CoreResult<()> {
            self.submissions.lock().await.push(submission);
            Ok(())
        }
    }

    fn engine(loader: Arc<dyn EngineLoader>) -> Arc<EngineHandle> {
        Arc::new(EngineHandle::new(
            loader,
            Arc::new(BlobStore::new()),
            EngineOptions::default(),
        ))
    }

    fn mount(store: Arc<MemoryPackStore>, engine: Arc<EngineHandle>) -> PickerController {
        PickerController::mount(
            PickerDeps {
                store,
                engine,
                sink: None,
            },
            PickerOptions::default(),
        )
    }

    async fn wait_until(
        controller: &PickerController,
        condition: impl FnMut(&PickerState) -> bool,
    ) -> PickerState {
        let mut rx = controller.subscribe();
        let state = tokio::time::timeout(WAIT, rx.wait_for(condition))
            .await
            .expect("timed out waiting for picker state")
            .unwrap()
            .clone();
        state
    }

    #[tokio::test]
    async fn test_mount_loads_engine_and_resolves_packs() {
        let transcoder = CountingTranscoder::new();
        let loader = CountingLoader::new(transcoder.clone());
        let store = Arc::new(MemoryPackStore::with_packs(vec![
            raw_pack("x", &[b"1", b"2"]),
            raw_pack("y", &[b"3"]),
        ]));
        let controller = mount(store, engine(loader.clone()));

        let state = wait_until(&controller, |s| {
            s.phase == PickerPhase::PacksReady && s.engine.is_loaded
        })
        .await;
        assert_eq!(state.signature.as_str(), "x,y");
        assert_eq!(state.sticker_packs.len(), 2);
        assert_eq!(state.selected_sticker_pack_id.as_deref(), Some("x"));
        assert_eq!(state.generation, 1);
        assert!(state.is_available());
        assert_eq!(loader.loads(), 1);
        assert_eq!(transcoder.calls(), 3);
    }

    #[tokio::test]
    async fn test_unchanged_poll_keeps_packs() {
        let transcoder = CountingTranscoder::new();
        let store = Arc::new(MemoryPackStore::with_packs(vec![
            raw_pack("x", &[b"1"]),
            raw_pack("y", &[b"2"]),
        ]));
        let controller = mount(store.clone(), engine(CountingLoader::new(transcoder.clone())));
        wait_until(&controller, |s| s.phase == PickerPhase::PacksReady).await;
        let fetches = store.fetch_calls();

        assert!(!controller.refresh().await.unwrap());
        store
            .replace_all(vec![raw_pack("y", &[b"2"]), raw_pack("x", &[b"1"])])
            .await;
        assert!(!controller.refresh().await.unwrap());

        assert_eq!(store.fetch_calls(), fetches);
        assert_eq!(transcoder.calls(), 2);
        assert_eq!(controller.state().sticker_packs[0].id, "x");
    }

    #[tokio::test]
    async fn test_user_actions_do_not_resolve() {
        let store = Arc::new(MemoryPackStore::with_packs(vec![
            raw_pack("cats", &[b"1"]),
            raw_pack("dogs", &[b"2"]),
        ]));
        let controller = mount(store.clone(), engine(CountingLoader::new(CountingTranscoder::new())));
        wait_until(&controller, |s| s.phase == PickerPhase::PacksReady).await;
        let (lists, fetches) = (store.list_calls(), store.fetch_calls());

        controller.set_query("sticker 0").unwrap();
        controller
            .set_selected_pack_id(Some("dogs".to_string()))
            .unwrap();

        assert_eq!(controller.selected_pack().unwrap().id, "dogs");
        assert_eq!(controller.visible_stickers().len(), 2);
        controller.set_query("cats").unwrap();
        let visible = controller.visible_stickers();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].pack_id, "cats");

        assert_eq!(store.list_calls(), lists);
        assert_eq!(store.fetch_calls(), fetches);
        assert_eq!(controller.state().phase, PickerPhase::PacksReady);
    }

    #[tokio::test]
    async fn test_pack_set_change_resolves_and_releases_removed_packs() {
        let store = Arc::new(MemoryPackStore::with_packs(vec![
            raw_pack("x", &[b"1"]),
            raw_pack("y", &[b"2", b"3"]),
        ]));
        let engine = engine(CountingLoader::new(CountingTranscoder::new()));
        let controller = mount(store.clone(), engine.clone());
        wait_until(&controller, |s| s.phase == PickerPhase::PacksReady).await;
        assert_eq!(engine.blobs().len().await, 3);

        store.delete_pack("y").await.unwrap();
        store.upsert(raw_pack("z", &[b"4"])).await;
        assert!(controller.refresh().await.unwrap());

        let state = controller.state();
        let ids: Vec<_> = state.sticker_packs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z"]);
        assert_eq!(state.signature.as_str(), "x,z");
        assert_eq!(state.generation, 2);
        assert_eq!(engine.blobs().len().await, 2);
    }

    #[tokio::test]
    async fn test_metadata_failure_keeps_displayed_packs() {
        let store = Arc::new(MemoryPackStore::with_packs(vec![raw_pack("x", &[b"1"])]));
        let controller = mount(store.clone(), engine(CountingLoader::new(CountingTranscoder::new())));
        wait_until(&controller, |s| s.phase == PickerPhase::PacksReady).await;

        store.set_unavailable(Some("offline")).await;
        let err = controller.refresh().await.unwrap_err();
        assert!(matches!(err, CoreError::MetadataUnavailable(_)));

        let state = controller.state();
        assert_eq!(state.sticker_packs.len(), 1);
        assert!(state.last_error.as_deref().unwrap().contains("offline"));

        store.set_unavailable(None).await;
        assert!(!controller.refresh().await.unwrap());
        assert!(controller.state().last_error.is_none());
    }

    #[tokio::test]
    async fn test_engine_failure_makes_picker_unavailable() {
        let store = Arc::new(MemoryPackStore::with_packs(vec![raw_pack("x", &[b"1"])]));
        let controller = mount(store, engine(CountingLoader::failing("corrupt wasm")));

        let state = wait_until(&controller, |s| {
            s.phase == PickerPhase::MetasReady && !s.is_available()
        })
        .await;
        assert!(state.sticker_packs.is_empty());
        assert!(!state.engine.is_loaded);
        assert!(matches!(
            &state.availability,
            Availability::Unavailable { reason } if reason.contains("corrupt wasm")
        ));
    }

    #[tokio::test]
    async fn test_stale_resolution_is_discarded() {
        let store = Arc::new(
            MemoryPackStore::with_packs(vec![raw_pack("slow", &[b"1"])])
                .with_fetch_delay(Duration::from_millis(100)),
        );
        let engine = engine(CountingLoader::new(CountingTranscoder::new()));
        let controller = mount(store.clone(), engine.clone());
        wait_until(&controller, |s| s.phase == PickerPhase::PacksResolving).await;

        // A newer poll over the empty set finishes first
        store.replace_all(Vec::new()).await;
        assert!(controller.refresh().await.unwrap());
        assert_eq!(controller.state().generation, 2);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let state = controller.state();
        assert_eq!(state.generation, 2);
        assert!(state.sticker_packs.is_empty());
        assert_eq!(state.phase, PickerPhase::PacksReady);
        assert!(engine.blobs().is_empty().await);
    }

    #[tokio::test]
    async fn test_commit_sticker() {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(MemoryPackStore::with_packs(vec![raw_pack(
            "x",
            &[b"ok", &[POISON_BYTE]],
        )]));
        let controller = PickerController::mount(
            PickerDeps {
                store,
                engine: engine(CountingLoader::new(CountingTranscoder::new())),
                sink: Some(sink.clone()),
            },
            PickerOptions::default(),
        );
        wait_until(&controller, |s| s.phase == PickerPhase::PacksReady).await;

        let submission = controller.commit_sticker("chan-1", "x-0").await.unwrap();
        assert_eq!(submission.pack_id, "x");
        assert_eq!(submission.filename, "x-0.png");
        assert_eq!(submission.data.len() as u64, submission.asset.size_bytes);
        assert_eq!(sink.submissions.lock().await.len(), 1);

        assert!(matches!(
            controller.commit_sticker("chan-1", "x-1").await,
            Err(CoreError::StickerUnavailable(_))
        ));
        assert!(matches!(
            controller.commit_sticker("chan-1", "nope").await,
            Err(CoreError::StickerNotFound(_))
        ));
        assert_eq!(sink.submissions.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unmount_drops_in_flight_results() {
        let store = Arc::new(
            MemoryPackStore::with_packs(vec![raw_pack("x", &[b"1"])])
                .with_fetch_delay(Duration::from_millis(100)),
        );
        let engine = engine(CountingLoader::new(CountingTranscoder::new()));
        let controller = mount(store, engine.clone());
        wait_until(&controller, |s| s.phase == PickerPhase::PacksResolving).await;

        controller.unmount().await;
        tokio::time::sleep(Duration::from_millis(250)).await;

        let state = controller.state();
        assert!(state.sticker_packs.is_empty());
        assert_ne!(state.phase, PickerPhase::PacksReady);
        assert!(engine.blobs().is_empty().await);
        assert!(controller.is_closed());
        assert!(matches!(
            controller.refresh().await,
            Err(CoreError::ControllerClosed)
        ));
        assert!(controller.set_query("x").is_err());
    }

    #[tokio::test]
    async fn test_unmount_releases_assets() {
        let store = Arc::new(MemoryPackStore::with_packs(vec![raw_pack("x", &[b"1", b"2"])]));
        let engine = engine(CountingLoader::new(CountingTranscoder::new()));
        let controller = mount(store, engine.clone());
        wait_until(&controller, |s| s.phase == PickerPhase::PacksReady).await;
        assert_eq!(engine.blobs().len().await, 2);

        controller.unmount().await;
        controller.unmount().await;
        assert!(engine.blobs().is_empty().await);
        assert!(controller.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_periodic_poll_picks_up_new_packs() {
        let store = Arc::new(MemoryPackStore::with_packs(vec![raw_pack("x", &[b"1"])]));
        let controller = PickerController::mount(
            PickerDeps {
                store: store.clone(),
                engine: engine(CountingLoader::new(CountingTranscoder::new())),
                sink: None,
            },
            PickerOptions {
                poll_interval: Some(Duration::from_millis(50)),
                ..PickerOptions::default()
            },
        );
        wait_until(&controller, |s| s.sticker_packs.len() == 1).await;

        store.upsert(raw_pack("y", &[b"2"])).await;
        let state = wait_until(&controller, |s| s.sticker_packs.len() == 2).await;
        assert_eq!(state.signature.as_str(), "x,y");
    }

    #[test]
    fn test_options_from_settings() {
        let mut settings = StickerSettings::default();
        settings.picker.poll_interval_secs = 30;
        settings.packs.watch = false;

        let options = PickerOptions::from_settings(&settings, Some(PathBuf::from("/packs")));
        assert_eq!(options.poll_interval, Some(Duration::from_secs(30)));
        assert!(options.watch_dir.is_none());
        assert_eq!(options.policy, settings.target_policy());

        settings.picker.poll_interval_secs = 0;
        settings.packs.watch = true;
        let options = PickerOptions::from_settings(&settings, Some(PathBuf::from("/packs")));
        assert!(options.poll_interval.is_none());
        assert_eq!(options.watch_dir, Some(PathBuf::from("/packs")));
    }
}
