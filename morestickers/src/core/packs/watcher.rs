//! Pack Directory Watcher
//!
//! Watches the pack directory with `notify` and emits a debounced refresh
//! tick whenever packs are added, removed or edited on disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify_debouncer_mini::{new_debouncer, DebouncedEvent};
use tokio::sync::mpsc;
use tokio::sync::oneshot::error::TryRecvError;

/// Debounce window for filesystem events
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

/// Running watcher; dropping it stops the watch thread.
pub struct PackDirectoryWatcher {
    /// Stop signal sender, dropping this stops the watcher
    _stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
    dir: PathBuf,
}

impl PackDirectoryWatcher {
    /// Starts watching `dir` (created if missing).
    ///
    /// Ticks coalesce: while one is pending in `tick_tx`, further changes are
    /// folded into it.
    pub fn start(dir: PathBuf, tick_tx: mpsc::Sender<()>) -> Result<Self, String> {
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create pack directory: {}", e))?;

        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel::<()>();
        // Events may report the resolved path (e.g. /private/var on macOS)
        let roots = vec![dir.clone(), dir.canonicalize().unwrap_or_else(|_| dir.clone())];

        let (tx, rx) = std::sync::mpsc::channel();
        let mut debouncer = new_debouncer(WATCH_DEBOUNCE, tx)
            .map_err(|e| format!("Failed to create pack watcher: {}", e))?;

        debouncer
            .watcher()
            .watch(&dir, notify::RecursiveMode::Recursive)
            .map_err(|e| format!("Failed to watch pack directory: {}", e))?;

        std::thread::spawn(move || {
            let _debouncer = debouncer;

            loop {
                // Sent or dropped sender both mean stop
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    tracing::debug!("Pack watcher stopped");
                    break;
                }

                match rx.recv_timeout(Duration::from_millis(200)) {
                    Ok(Ok(events)) => {
                        if !is_relevant_batch(&roots, &events) {
                            continue;
                        }
                        match tick_tx.try_send(()) {
                            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                            Err(mpsc::error::TrySendError::Closed(())) => {
                                tracing::debug!("Pack refresh channel closed, stopping watcher");
                                return;
                            }
                        }
                    }
                    Ok(Err(error)) => {
                        tracing::warn!(error = %error, "Pack watcher error");
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                        tracing::debug!("Pack watcher channel disconnected, stopping");
                        break;
                    }
                }
            }
        });

        tracing::info!("Watching sticker pack directory {}", dir.display());

        Ok(Self {
            _stop_tx: Some(stop_tx),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Stop the watcher
    pub fn stop(&mut self) {
        self._stop_tx.take();
    }
}

fn is_relevant_batch(roots: &[PathBuf], events: &[DebouncedEvent]) -> bool {
    events
        .iter()
        .any(|event| roots.iter().any(|root| is_relevant_path(root, &event.path)))
}

/// Changes under import staging directories (`.{id}.{ulid}.tmp`) are ignored;
/// the final rename produces its own event.
fn is_relevant_path(root: &Path, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(rel) => !rel
            .components()
            .next()
            .and_then(|c| c.as_os_str().to_str())
            .is_some_and(|first| first.starts_with('.')),
        Err(_) => false,
    }
}
