//! MoreStickers CLI
//!
//! Headless pack management and transcoding against the same data directory
//! the picker uses.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};

use morestickers_lib::core::cache::TranscodeCache;
use morestickers_lib::core::packs::{
    import_pack_archive, mime_from_extension, DirectoryPackStore, MetasSignature, PackResolver,
    PackSetSynchronizer, PackStore, StickerRender,
};
use morestickers_lib::core::picker::StickerSubmission;
use morestickers_lib::core::settings::{default_data_dir, SettingsManager, StickerSettings};
use morestickers_lib::core::CoreError;
use morestickers_lib::core::transcode::{
    BlobStore, EngineHandle, EngineOptions, SourceAsset, TargetFormat, WasmEngineLoader,
};

#[derive(Parser, Debug)]
#[command(name = "morestickers-cli", version, about)]
struct Cli {
    /// Data directory (settings and default pack directory).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed sticker packs and their set signature.
    List,
    /// Resolve a pack through the engine and report per-sticker status.
    Resolve {
        pack_id: String,
        /// Directory to write the converted stickers to.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Convert a single file.
    Convert {
        input: PathBuf,
        /// Output format (gif, webp, png).
        #[arg(long)]
        to: TargetFormat,
        /// Output file.
        #[arg(long)]
        out: PathBuf,
    },
    /// Import a pack archive (.zip with manifest.json).
    Import { archive: PathBuf },
    /// Delete an installed pack.
    Remove { pack_id: String },
    /// Print the effective settings.
    Settings {
        /// Restore defaults first.
        #[arg(long)]
        reset: bool,
    },
}

struct Context {
    data_dir: PathBuf,
    settings: StickerSettings,
}

impl Context {
    fn pack_store(&self) -> Arc<DirectoryPackStore> {
        Arc::new(DirectoryPackStore::new(self.settings.pack_dir(&self.data_dir)))
    }

    async fn engine(&self) -> anyhow::Result<Arc<EngineHandle>> {
        let Some(loader) = WasmEngineLoader::from_settings(&self.settings.engine) else {
            bail!("No transcoding engine configured (set engine.wasmPath or engine.wasmUrl)");
        };
        let engine = Arc::new(EngineHandle::new(
            Arc::new(loader),
            Arc::new(BlobStore::new()),
            EngineOptions::from_settings(&self.settings.engine),
        ));
        engine
            .ensure_loaded()
            .await
            .context("load transcoding engine")?;
        Ok(engine)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    morestickers_lib::init_logging_with_level(None, level);

    let data_dir = cli.data_dir.unwrap_or_else(default_data_dir);
    let manager = SettingsManager::new(data_dir.clone());

    if let Command::Settings { reset } = cli.cmd {
        let settings = if reset {
            manager.reset().map_err(anyhow::Error::msg)?
        } else {
            manager.load()
        };
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let ctx = Context {
        settings: manager.load(),
        data_dir,
    };

    match cli.cmd {
        Command::List => cmd_list(&ctx).await,
        Command::Resolve { pack_id, out } => cmd_resolve(&ctx, &pack_id, out.as_deref()).await,
        Command::Convert { input, to, out } => cmd_convert(&ctx, &input, to, &out).await,
        Command::Import { archive } => cmd_import(&ctx, &archive).await,
        Command::Remove { pack_id } => cmd_remove(&ctx, &pack_id).await,
        Command::Settings { .. } => Ok(()),
    }
}

async fn cmd_list(ctx: &Context) -> anyhow::Result<()> {
    let outcome = PackSetSynchronizer::new(ctx.pack_store())
        .poll(&MetasSignature::empty())
        .await?;

    let output = serde_json::json!({
        "signature": outcome.signature,
        "packs": outcome.metas,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn cmd_resolve(ctx: &Context, pack_id: &str, out: Option<&Path>) -> anyhow::Result<()> {
    let engine = ctx.engine().await?;
    let cache = Arc::new(TranscodeCache::new(
        Arc::clone(&engine),
        ctx.settings.cache.soft_entry_limit,
    ));
    let resolver = PackResolver::new(ctx.pack_store(), cache, ctx.settings.target_policy());

    let pack = resolver
        .resolve_pack(pack_id)
        .await?
        .ok_or_else(|| CoreError::PackNotFound(pack_id.to_string()))?;

    if let Some(out) = out {
        std::fs::create_dir_all(out)
            .with_context(|| format!("create output dir '{}'", out.display()))?;
    }

    for sticker in &pack.stickers {
        match &sticker.render {
            StickerRender::Ready { asset } => {
                println!(
                    "{}\t{}\t{} bytes\t{}",
                    sticker.id, asset.mime_type, asset.size_bytes, sticker.title
                );
                if let Some(out) = out {
                    let data = engine
                        .blobs()
                        .get(&asset.url)
                        .await
                        .with_context(|| format!("missing output for '{}'", sticker.id))?;
                    let path =
                        out.join(StickerSubmission::filename_for(&sticker.id, &asset.mime_type));
                    std::fs::write(&path, data.as_slice())
                        .with_context(|| format!("write '{}'", path.display()))?;
                }
            }
            StickerRender::Placeholder { reason } => {
                println!("{}\tplaceholder\t{}", sticker.id, reason);
            }
        }
    }

    eprintln!(
        "resolved '{}': {} stickers, {} placeholders",
        pack.id,
        pack.stickers.len(),
        pack.placeholder_count()
    );
    Ok(())
}

async fn cmd_convert(
    ctx: &Context,
    input: &Path,
    target: TargetFormat,
    out: &Path,
) -> anyhow::Result<()> {
    let bytes = std::fs::read(input).with_context(|| format!("read '{}'", input.display()))?;
    let source = SourceAsset::new(bytes, mime_from_extension(input).map(str::to_string));

    let engine = ctx.engine().await?;
    let asset = engine.convert(&source, target).await?;
    let data = engine
        .blobs()
        .get(&asset.url)
        .await
        .context("converted output was not registered")?;

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(out, data.as_slice()).with_context(|| format!("write '{}'", out.display()))?;

    eprintln!(
        "wrote {} ({:?} -> {}, {} bytes)",
        out.display(),
        source.format,
        target,
        asset.size_bytes
    );
    Ok(())
}

async fn cmd_import(ctx: &Context, archive: &Path) -> anyhow::Result<()> {
    let pack_dir = ctx.settings.pack_dir(&ctx.data_dir);
    std::fs::create_dir_all(&pack_dir)
        .with_context(|| format!("create pack dir '{}'", pack_dir.display()))?;

    let meta = import_pack_archive(&pack_dir, archive)
        .await
        .with_context(|| format!("import '{}'", archive.display()))?;
    eprintln!("imported '{}' ({})", meta.id, meta.title);
    Ok(())
}

async fn cmd_remove(ctx: &Context, pack_id: &str) -> anyhow::Result<()> {
    if !ctx.pack_store().delete_pack(pack_id).await? {
        return Err(CoreError::PackNotFound(pack_id.to_string()).into());
    }
    eprintln!("removed '{}'", pack_id);
    Ok(())
}
