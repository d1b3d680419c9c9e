//! WASM Engine Host
//!
//! Runs the multimedia engine as a sandboxed wasmtime guest.
//!
//! Guest ABI (version 1):
//! - exports `memory`, `ms_alloc(len: i32) -> i32` and
//!   `ms_transcode(ptr: i32, len: i32, src: i32, dst: i32) -> i64`
//! - a non-negative `ms_transcode` result packs `(out_ptr << 32) | out_len`,
//!   a negative result is an engine error code
//! - imports `env.host_log(level, ptr, len)` and `env.host_time_now() -> i64`
//!
//! Every conversion gets a fresh `Store`, so guest state never leaks between
//! stickers and memory/fuel limits apply per conversion.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use wasmtime::*;

use super::payload::{verify_checksum, EnginePayload};
use super::{EngineLoader, SourceFormat, TargetFormat, TranscodeError, Transcoder};
use crate::core::settings::EngineSettings;
use crate::core::{CoreError, CoreResult};

/// Host/guest calling convention version
pub const ABI_VERSION: u32 = 1;

const EXPORT_MEMORY: &str = "memory";
const EXPORT_ALLOC: &str = "ms_alloc";
const EXPORT_TRANSCODE: &str = "ms_transcode";

/// Resource limits applied to every conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WasmEngineConfig {
    /// Maximum linear memory per conversion (bytes)
    pub max_memory_bytes: usize,
    /// Fuel per conversion; `None` disables metering
    pub fuel: Option<u64>,
}

impl Default for WasmEngineConfig {
    fn default() -> Self {
        Self {
            max_memory_bytes: 256 * 1024 * 1024, // 256MB
            fuel: None,
        }
    }
}

impl WasmEngineConfig {
    pub fn from_settings(engine: &EngineSettings) -> Self {
        Self {
            max_memory_bytes: engine.max_memory_mb as usize * 1024 * 1024,
            fuel: (engine.fuel > 0).then_some(engine.fuel),
        }
    }
}

// =============================================================================
// Loader
// =============================================================================

/// Fetches, verifies and compiles the engine binary
#[derive(Debug, Clone)]
pub struct WasmEngineLoader {
    payload: EnginePayload,
    expected_sha256: Option<String>,
    config: WasmEngineConfig,
}

impl WasmEngineLoader {
    pub fn new(payload: EnginePayload, config: WasmEngineConfig) -> Self {
        Self {
            payload,
            expected_sha256: None,
            config,
        }
    }

    /// Requires the fetched binary to match a SHA-256 hex digest.
    pub fn with_checksum(mut self, sha256: impl Into<String>) -> Self {
        self.expected_sha256 = Some(sha256.into());
        self
    }

    /// Builds a loader from engine settings. `None` when no payload is configured.
    pub fn from_settings(engine: &EngineSettings) -> Option<Self> {
        let payload = EnginePayload::from_settings(engine)?;
        let mut loader = Self::new(payload, WasmEngineConfig::from_settings(engine));
        loader.expected_sha256 = engine.wasm_sha256.clone();
        Some(loader)
    }

    pub fn payload(&self) -> &EnginePayload {
        &self.payload
    }
}

#[async_trait]
impl EngineLoader for WasmEngineLoader {
    async fn load(&self) -> CoreResult<Arc<dyn Transcoder>> {
        let started = Instant::now();
        let bytes = self.payload.fetch().await?;

        if let Some(expected) = &self.expected_sha256 {
            verify_checksum(&bytes, expected)?;
        }

        let config = self.config.clone();
        let name = self.payload.to_string();
        let transcoder =
            tokio::task::spawn_blocking(move || WasmTranscoder::compile(&bytes, config, name))
                .await
                .map_err(|e| CoreError::Internal(format!("Engine compile task failed: {}", e)))??;

        tracing::info!(
            "Loaded transcoding engine {} ({} ms)",
            transcoder.name(),
            started.elapsed().as_millis()
        );

        Ok(Arc::new(transcoder))
    }
}

// =============================================================================
// Transcoder
// =============================================================================

/// Per-conversion store data
struct GuestState {
    engine_name: Arc<str>,
    limits: StoreLimits,
}

/// A compiled engine module ready to be instantiated per conversion
pub struct WasmTranscoder {
    engine: Engine,
    instance_pre: InstancePre<GuestState>,
    config: WasmEngineConfig,
    name: Arc<str>,
}

impl std::fmt::Debug for WasmTranscoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmTranscoder")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

impl WasmTranscoder {
    /// Compiles a module (binary or, for development, WAT text) and checks
    /// that it implements the guest ABI.
    pub fn compile(bytes: &[u8], config: WasmEngineConfig, name: String) -> CoreResult<Self> {
        let mut wasmtime_config = Config::new();
        if config.fuel.is_some() {
            wasmtime_config.consume_fuel(true);
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            CoreError::EngineInitFailed(format!("Failed to create WASM engine: {}", e))
        })?;

        let module = Module::new(&engine, bytes).map_err(|e| {
            CoreError::EngineInitFailed(format!("Failed to compile engine module: {}", e))
        })?;

        validate_exports(&module)?;

        let mut linker = Linker::new(&engine);
        add_host_functions(&mut linker)?;

        let instance_pre = linker.instantiate_pre(&module).map_err(|e| {
            CoreError::EngineInitFailed(format!("Engine imports cannot be satisfied: {}", e))
        })?;

        Ok(Self {
            engine,
            instance_pre,
            config,
            name: Arc::from(name),
        })
    }

    fn create_store(&self) -> Result<Store<GuestState>, TranscodeError> {
        let state = GuestState {
            engine_name: Arc::clone(&self.name),
            limits: StoreLimitsBuilder::new()
                .memory_size(self.config.max_memory_bytes)
                .instances(1)
                .build(),
        };

        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel {
            store
                .set_fuel(fuel)
                .map_err(|e| TranscodeError::Trap(format!("Failed to set fuel: {}", e)))?;
        }

        Ok(store)
    }
}

impl Transcoder for WasmTranscoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn transcode(
        &self,
        input: &[u8],
        source: SourceFormat,
        target: TargetFormat,
    ) -> Result<Vec<u8>, TranscodeError> {
        let input_len = i32::try_from(input.len())
            .map_err(|_| TranscodeError::Abi(format!("input too large ({} bytes)", input.len())))?;

        let mut store = self.create_store()?;
        let instance = self
            .instance_pre
            .instantiate(&mut store)
            .map_err(trap_error)?;

        let memory = instance
            .get_memory(&mut store, EXPORT_MEMORY)
            .ok_or_else(|| TranscodeError::Abi("missing memory export".to_string()))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, EXPORT_ALLOC)
            .map_err(|e| TranscodeError::Abi(e.to_string()))?;
        let run = instance
            .get_typed_func::<(i32, i32, i32, i32), i64>(&mut store, EXPORT_TRANSCODE)
            .map_err(|e| TranscodeError::Abi(e.to_string()))?;

        let in_ptr = alloc.call(&mut store, input_len).map_err(trap_error)?;
        memory
            .write(&mut store, in_ptr as u32 as usize, input)
            .map_err(|_| {
                TranscodeError::Abi(format!("ms_alloc returned unusable pointer {}", in_ptr))
            })?;

        let packed = run
            .call(
                &mut store,
                (in_ptr, input_len, source.wire_code(), target.wire_code()),
            )
            .map_err(trap_error)?;

        if packed < 0 {
            return Err(TranscodeError::guest(packed));
        }

        let out_ptr = (packed >> 32) as u32;
        let out_len = (packed & 0xFFFF_FFFF) as u32;
        let start = out_ptr as usize;
        start
            .checked_add(out_len as usize)
            .and_then(|end| memory.data(&store).get(start..end))
            .map(|slice| slice.to_vec())
            .ok_or(TranscodeError::OutputOutOfBounds {
                ptr: out_ptr,
                len: out_len,
            })
    }
}

fn trap_error(err: Error) -> TranscodeError {
    match err.downcast_ref::<Trap>() {
        Some(trap) => TranscodeError::Trap(trap.to_string()),
        None => TranscodeError::Trap(format!("{:#}", err)),
    }
}

fn val_name(ty: ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        ValType::Ref(_) => "ref",
    }
}

fn signature(ty: &FuncType) -> String {
    let params: Vec<&str> = ty.params().map(val_name).collect();
    let results: Vec<&str> = ty.results().map(val_name).collect();
    format!("({}) -> ({})", params.join(", "), results.join(", "))
}

fn validate_exports(module: &Module) -> CoreResult<()> {
    if !matches!(module.get_export(EXPORT_MEMORY), Some(ExternType::Memory(_))) {
        return Err(CoreError::EngineInitFailed(format!(
            "Engine module does not export `{}`",
            EXPORT_MEMORY
        )));
    }

    let expected = [
        (EXPORT_ALLOC, "(i32) -> (i32)"),
        (EXPORT_TRANSCODE, "(i32, i32, i32, i32) -> (i64)"),
    ];
    for (name, expected_signature) in expected {
        match module.get_export(name) {
            Some(ExternType::Func(ty)) => {
                let actual = signature(&ty);
                if actual != expected_signature {
                    return Err(CoreError::EngineInitFailed(format!(
                        "Engine export `{}` has signature {}, expected {}",
                        name, actual, expected_signature
                    )));
                }
            }
            _ => {
                return Err(CoreError::EngineInitFailed(format!(
                    "Engine module does not export function `{}`",
                    name
                )))
            }
        }
    }

    Ok(())
}

/// Adds host functions to the linker
fn add_host_functions(linker: &mut Linker<GuestState>) -> CoreResult<()> {
    linker
        .func_wrap(
            "env",
            "host_log",
            |mut caller: Caller<'_, GuestState>, level: i32, ptr: i32, len: i32| {
                let Some(memory) = caller.get_export(EXPORT_MEMORY).and_then(|e| e.into_memory())
                else {
                    return;
                };
                let start = ptr as u32 as usize;
                let Some(end) = start.checked_add(len as u32 as usize) else {
                    return;
                };
                let data = memory.data(&caller);
                let Some(message) = data
                    .get(start..end)
                    .and_then(|slice| std::str::from_utf8(slice).ok())
                else {
                    return;
                };
                let engine = &caller.data().engine_name;
                match level {
                    0 => tracing::debug!("[engine:{}] {}", engine, message),
                    1 => tracing::info!("[engine:{}] {}", engine, message),
                    2 => tracing::warn!("[engine:{}] {}", engine, message),
                    _ => tracing::error!("[engine:{}] {}", engine, message),
                }
            },
        )
        .map_err(|e| CoreError::EngineInitFailed(format!("Failed to add host_log: {}", e)))?;

    linker
        .func_wrap("env", "host_time_now", || -> i64 {
            crate::core::now_millis()
        })
        .map_err(|e| CoreError::EngineInitFailed(format!("Failed to add host_time_now: {}", e)))?;

    Ok(())
}


// ============================================================================
// Tests
// ============================================================================
