//! MoreStickers Core Library
//!
//! Sticker pack acquisition, caching and transcoding for chat sticker pickers.
//! External sticker packs are listed from a pack store, resolved on demand,
//! and converted by a sandboxed WebAssembly engine into formats the host can
//! render and upload.

pub mod core;

use std::path::Path;
use std::sync::OnceLock;

static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

/// Installs the global tracing subscriber at INFO.
///
/// Logs go to stdout, and to a daily rolling `morestickers.log` in `log_dir`
/// when one is given. Calling this more than once is harmless.
pub fn init_logging(log_dir: Option<&Path>) {
    init_logging_with_level(log_dir, tracing::Level::INFO);
}

/// Like [`init_logging`], with `level` as the default directive on top of `RUST_LOG`.
pub fn init_logging_with_level(log_dir: Option<&Path>, level: tracing::Level) {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(cfg!(debug_assertions));

    let file_layer = log_dir.and_then(|dir| {
        std::fs::create_dir_all(dir).ok()?;
        let file_appender = tracing_appender::rolling::daily(dir, "morestickers.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        let _ = LOG_GUARD.set(guard);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
    });

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer);

    // Already initialized (tests, embedding hosts)
    let _ = tracing::subscriber::set_global_default(subscriber);
}
