//! Isolate lifecycle: one bounded guest execution context per run.
//!
//! An [`Isolate`] owns a wasmtime store with its own memory ceiling, a WASI
//! context with no capabilities, and the `sandbox` host functions:
//!
//! | import | signature | effect |
//! |---|---|---|
//! | `log` | `(ptr, len)` | record a console line |
//! | `resolve` | `(ptr, len) -> len` | check and stage a module snapshot |
//! | `read` | `(ptr, cap) -> len` | copy the staged snapshot into guest memory |
//! | `throw` | `(ptr, len)` | abort the run with a guest error |
//!
//! WASI `poll_oneoff` and `sched_yield` answer `notsup`: a guest cannot
//! block its thread beyond the reach of the epoch deadline.
//!
//! Isolates are single-use. [`Isolate::dispose`] is idempotent and `Drop`
//! calls it, so every successful [`Isolate::initialize`] is released exactly
//! once whatever path the run takes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use wasmtime::{Caller, Linker, Memory, Module, Store, Trap, WasmBacktrace};
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{I32Exit, WasiCtxBuilder};

use crate::context::{Correlation, ExecutionContext};
use crate::error::{EngineError, FailureKind, GuestError, ResolveError, Result};
use crate::model::{InvocationType, ScopeSet};
use crate::sandbox::bridge::BridgeHandle;
use crate::sandbox::cache::SharedEngine;
use crate::sandbox::capability::{self, Delivery, ModuleKind, SnapshotSource};
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::GuestConsole;
use crate::sandbox::limits::{IsolateLimiter, LimitExceeded};
use crate::snapshot::{snapshot_for, Snapshot};

/// Import namespace of the host functions.
pub const HOST_NAMESPACE: &str = "sandbox";

/// Longest string a guest may pass to `log`, `resolve` or `throw`.
const MAX_GUEST_STRING: usize = 64 * 1024;

const WASI_NAMESPACE: &str = "wasi_snapshot_preview1";

/// WASI `errno::notsup`.
const ERRNO_NOTSUP: i32 = 58;

/// Counts live isolates and isolates ever created.
#[derive(Debug, Clone, Default)]
pub struct IsolateTracker {
    inner: Arc<TrackerCounts>,
}

#[derive(Debug, Default)]
struct TrackerCounts {
    live: AtomicUsize,
    created: AtomicUsize,
}

impl IsolateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Isolates initialized and not yet disposed.
    pub fn live(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    fn acquire(&self) {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        self.inner.live.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.inner.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Snapshots available to the guest: eager ones computed up front, lazy ones
/// fetched through the bridge.
pub struct GuestModules {
    eager: BTreeMap<ModuleKind, Snapshot>,
    bridge: Option<BridgeHandle>,
}

impl GuestModules {
    pub fn new(eager: BTreeMap<ModuleKind, Snapshot>, bridge: Option<BridgeHandle>) -> Self {
        Self { eager, bridge }
    }

    /// Precompute every eager module the context may resolve.
    pub fn for_context(ctx: &ExecutionContext, bridge: Option<BridgeHandle>) -> Self {
        let eager = ModuleKind::ALL
            .into_iter()
            .filter(|kind| kind.delivery() == Delivery::Eager)
            .filter(|kind| {
                capability::check(kind.name(), ctx.scopes(), ctx.invocation_type()).is_ok()
            })
            .filter_map(|kind| snapshot_for(kind, ctx).ok().map(|s| (kind, s)))
            .collect();
        Self::new(eager, bridge)
    }
}

impl SnapshotSource for GuestModules {
    fn snapshot(&mut self, kind: ModuleKind) -> std::result::Result<Snapshot, ResolveError> {
        match kind.delivery() {
            Delivery::Lazy => match &self.bridge {
                Some(bridge) => bridge.request(kind),
                None => Err(ResolveError::BridgeClosed {
                    module: kind.name().to_string(),
                }),
            },
            Delivery::Eager => {
                self.eager
                    .get(&kind)
                    .cloned()
                    .ok_or_else(|| ResolveError::UnknownCapability {
                        module: kind.name().to_string(),
                    })
            }
            Delivery::Unavailable => Ok(Snapshot::unavailable(kind)),
        }
    }
}

/// Everything an isolate exposes to its guest.
pub struct IsolateGlobals {
    pub scopes: ScopeSet,
    pub invocation: InvocationType,
    pub modules: GuestModules,
    pub console: GuestConsole,
    pub correlation: Correlation,
}

impl IsolateGlobals {
    /// Globals for a run of `ctx`.
    pub fn for_context(
        ctx: &ExecutionContext,
        bridge: BridgeHandle,
        console: GuestConsole,
    ) -> Self {
        Self {
            scopes: ctx.scopes().clone(),
            invocation: ctx.invocation_type(),
            modules: GuestModules::for_context(ctx, Some(bridge)),
            console,
            correlation: ctx.correlation(),
        }
    }
}

/// Store data of one isolate.
pub struct GuestState {
    limiter: IsolateLimiter,
    wasi: WasiP1Ctx,
    globals: IsolateGlobals,
    /// Serialized snapshot awaiting `read`.
    staged: Option<Vec<u8>>,
    resolved: Vec<ModuleKind>,
}

/// Host-function faults that end a run.
#[derive(Error, Debug)]
pub enum GuestFault {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("guest raised an error")]
    Thrown(Option<String>),

    #[error("guest module exports no memory")]
    NoMemory,

    #[error("guest passed an out-of-bounds buffer")]
    OutOfBounds,

    #[error("module name is not valid UTF-8")]
    InvalidName,

    #[error("no snapshot staged for read")]
    NothingStaged,

    #[error("read buffer of {given} bytes cannot hold the {needed}-byte snapshot")]
    BufferTooSmall { needed: usize, given: usize },

    #[error("failed to encode snapshot")]
    Encode(#[source] serde_json::Error),
}

impl GuestFault {
    fn to_guest_error(&self) -> GuestError {
        match self {
            GuestFault::Resolve(err) => GuestError::from(err.clone()),
            GuestFault::Thrown(message) => GuestError {
                kind: FailureKind::Thrown,
                message: message.clone(),
            },
            GuestFault::Encode(_) => GuestError::opaque(FailureKind::Internal),
            other => GuestError::new(FailureKind::Trap, other.to_string()),
        }
    }
}

enum IsolateState {
    Uninitialized,
    Ready {
        store: Store<GuestState>,
        linker: Linker<GuestState>,
    },
    Disposed,
}

/// A single-use guest execution context.
pub struct Isolate {
    engine: SharedEngine,
    config: SandboxConfig,
    tracker: IsolateTracker,
    state: IsolateState,
}

impl Isolate {
    /// Create an uninitialized isolate. Nothing is allocated yet.
    pub fn new(engine: SharedEngine, config: &SandboxConfig, tracker: IsolateTracker) -> Self {
        Self {
            engine,
            config: config.clone(),
            tracker,
            state: IsolateState::Uninitialized,
        }
    }

    /// Create the store and install the host globals.
    ///
    /// The epoch deadline is derived from `timeout`. Errors are fatal for
    /// the run; the tracker only counts isolates that initialized.
    pub fn initialize(&mut self, globals: IsolateGlobals, timeout: Duration) -> Result<()> {
        if !matches!(self.state, IsolateState::Uninitialized) {
            return Err(EngineError::IsolateFatal(anyhow::anyhow!(
                "isolate already initialized"
            )));
        }
        if self.config.max_memory == 0 {
            return Err(EngineError::IsolateFatal(anyhow::anyhow!(
                "memory ceiling must be non-zero"
            )));
        }
        if self.config.epoch_tick_interval.is_zero() {
            return Err(EngineError::IsolateFatal(anyhow::anyhow!(
                "epoch tick interval must be non-zero"
            )));
        }

        // No preopened directories, environment, arguments or sockets
        let wasi = WasiCtxBuilder::new()
            .stdout(globals.console.stdout_pipe())
            .stderr(globals.console.stderr_pipe())
            .build_p1();

        let state = GuestState {
            limiter: IsolateLimiter::new(self.config.max_memory, self.config.max_table_elements),
            wasi,
            globals,
            staged: None,
            resolved: Vec::new(),
        };
        let mut store = Store::new(self.engine.engine(), state);
        store.limiter(|state| &mut state.limiter);
        store.epoch_deadline_trap();
        store.set_epoch_deadline(self.config.deadline_ticks(timeout));

        let linker = build_linker(&self.engine).map_err(EngineError::IsolateFatal)?;

        self.tracker.acquire();
        self.state = IsolateState::Ready { store, linker };
        Ok(())
    }

    /// Instantiate `module` and call its entry export (`run`, else `_start`).
    pub fn evaluate(&mut self, module: &Module) -> std::result::Result<(), GuestError> {
        let IsolateState::Ready { store, linker } = &mut self.state else {
            return Err(GuestError::new(
                FailureKind::Internal,
                "isolate is not initialized",
            ));
        };

        let instance = match linker.instantiate(&mut *store, module) {
            Ok(instance) => instance,
            Err(err) => {
                return match classify(store, err) {
                    Ok(Some(failure)) => Err(failure),
                    Ok(None) => Ok(()),
                    // unknown imports, bad signatures
                    Err(err) => Err(GuestError::new(FailureKind::InvalidModule, err.to_string())),
                };
            }
        };

        let entry = instance
            .get_typed_func::<(), ()>(&mut *store, "run")
            .or_else(|_| instance.get_typed_func::<(), ()>(&mut *store, "_start"))
            .map_err(|_| {
                GuestError::new(
                    FailureKind::InvalidModule,
                    "module exports neither `run` nor `_start`",
                )
            })?;

        match entry.call(&mut *store, ()) {
            Ok(()) => Ok(()),
            Err(err) => match classify(store, err) {
                Ok(Some(failure)) => Err(failure),
                Ok(None) => Ok(()),
                Err(err) => {
                    tracing::trace!(error = ?err, "unclassified guest error");
                    Err(GuestError::opaque(FailureKind::Internal))
                }
            },
        }
    }

    /// Modules the guest resolved, in call order.
    pub fn resolved(&self) -> Vec<ModuleKind> {
        match &self.state {
            IsolateState::Ready { store, .. } => store.data().resolved.clone(),
            IsolateState::Uninitialized | IsolateState::Disposed => Vec::new(),
        }
    }

    /// Peak linear memory the guest reached, in bytes.
    pub fn peak_memory(&self) -> u64 {
        match &self.state {
            IsolateState::Ready { store, .. } => store.data().limiter.peak_memory(),
            IsolateState::Uninitialized | IsolateState::Disposed => 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, IsolateState::Ready { .. })
    }

    /// Release the store and linker. Safe to call from any state, any number
    /// of times.
    pub fn dispose(&mut self) {
        let previous = std::mem::replace(&mut self.state, IsolateState::Disposed);
        if let IsolateState::Ready { store, linker } = previous {
            drop(linker);
            drop(store);
            self.tracker.release();
        }
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Map a wasmtime error to a guest failure.
///
/// `Ok(None)` is a clean WASI exit; `Err` hands back errors that are not
/// attributable to the guest.
fn classify(
    store: &Store<GuestState>,
    err: anyhow::Error,
) -> std::result::Result<Option<GuestError>, anyhow::Error> {
    let correlation = &store.data().globals.correlation;
    tracing::trace!(
        guild_id = %correlation.guild_id,
        extension_id = %correlation.extension_id,
        version_id = %correlation.version_id,
        error = ?err,
        "guest error chain"
    );

    if let Some(fault) = err.downcast_ref::<GuestFault>() {
        return Ok(Some(fault.to_guest_error()));
    }
    if let Some(Trap::Interrupt) = err.downcast_ref::<Trap>() {
        return Ok(Some(GuestError::new(
            FailureKind::Timeout,
            "extension exceeded its time limit",
        )));
    }
    if err.downcast_ref::<LimitExceeded>().is_some() {
        return Ok(Some(memory_limit_error()));
    }
    if let Some(exit) = err.downcast_ref::<I32Exit>() {
        return Ok(match exit.0 {
            0 => None,
            code => Some(GuestError::new(
                FailureKind::Exit(code),
                format!("extension exited with status {code}"),
            )),
        });
    }
    if let Some(trap) = err.downcast_ref::<Trap>() {
        return Ok(Some(GuestError::new(FailureKind::Trap, trap.to_string())));
    }
    // Host calls rejecting guest arguments, e.g. malformed WASI flags
    if err.downcast_ref::<WasmBacktrace>().is_some() {
        return Ok(Some(GuestError::new(
            FailureKind::Trap,
            "extension passed invalid arguments to a host call",
        )));
    }
    // Limiter errors raised while instantiating may be wrapped beyond reach
    if store.data().limiter.limit_exceeded() {
        return Ok(Some(memory_limit_error()));
    }
    Err(err)
}

fn memory_limit_error() -> GuestError {
    GuestError::new(
        FailureKind::MemoryLimit,
        "extension exceeded its memory limit",
    )
}

fn build_linker(engine: &SharedEngine) -> anyhow::Result<Linker<GuestState>> {
    let mut linker = Linker::new(engine.engine());
    preview1::add_to_linker_sync(&mut linker, |state: &mut GuestState| &mut state.wasi)?;

    // Blocking waits cannot be interrupted by the epoch deadline, so a
    // sleeping guest would outlive its run.
    linker.allow_shadowing(true);
    linker.func_wrap(
        WASI_NAMESPACE,
        "poll_oneoff",
        |_in: i32, _out: i32, _subscriptions: i32, _events: i32| -> i32 { ERRNO_NOTSUP },
    )?;
    linker.func_wrap(WASI_NAMESPACE, "sched_yield", || -> i32 { ERRNO_NOTSUP })?;
    linker.allow_shadowing(false);

    linker.func_wrap(
        HOST_NAMESPACE,
        "log",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = read_guest_bytes(&mut caller, ptr, len)?;
            let line = String::from_utf8_lossy(&bytes).into_owned();
            let globals = &caller.data().globals;
            tracing::info!(
                target: "extension_sandbox::guest",
                guild_id = %globals.correlation.guild_id,
                extension_id = %globals.correlation.extension_id,
                version_id = %globals.correlation.version_id,
                "{line}"
            );
            globals.console.push_log(line);
            Ok(())
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "resolve",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let bytes = read_guest_bytes(&mut caller, ptr, len)?;
            let name = String::from_utf8(bytes).map_err(|_| GuestFault::InvalidName)?;

            let state = caller.data_mut();
            let globals = &mut state.globals;
            let snapshot = capability::resolve(
                &name,
                &globals.scopes,
                globals.invocation,
                &mut globals.modules,
            )
            .map_err(GuestFault::from)?;

            let kind = ModuleKind::from_name(&name).ok_or_else(|| {
                GuestFault::from(ResolveError::UnknownCapability {
                    module: name.clone(),
                })
            })?;
            let encoded = snapshot.to_json_bytes(kind).map_err(GuestFault::Encode)?;
            let len = i32::try_from(encoded.len()).map_err(|_| GuestFault::OutOfBounds)?;
            state.staged = Some(encoded);
            state.resolved.push(kind);
            Ok(len)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "read",
        |mut caller: Caller<'_, GuestState>, ptr: i32, cap: i32| -> anyhow::Result<i32> {
            let staged = caller
                .data_mut()
                .staged
                .take()
                .ok_or(GuestFault::NothingStaged)?;
            let given = usize::try_from(cap).map_err(|_| GuestFault::OutOfBounds)?;
            if given < staged.len() {
                return Err(GuestFault::BufferTooSmall {
                    needed: staged.len(),
                    given,
                }
                .into());
            }
            let offset = usize::try_from(ptr).map_err(|_| GuestFault::OutOfBounds)?;
            let memory = guest_memory(&mut caller)?;
            memory
                .write(&mut caller, offset, &staged)
                .map_err(|_| GuestFault::OutOfBounds)?;
            Ok(staged.len() as i32)
        },
    )?;

    linker.func_wrap(
        HOST_NAMESPACE,
        "throw",
        |mut caller: Caller<'_, GuestState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = read_guest_bytes(&mut caller, ptr, len)?;
            let message = String::from_utf8(bytes).ok().filter(|m| !m.is_empty());
            Err(GuestFault::Thrown(message).into())
        },
    )?;

    Ok(linker)
}

fn guest_memory(caller: &mut Caller<'_, GuestState>) -> std::result::Result<Memory, GuestFault> {
    caller
        .get_export("memory")
        .and_then(|export| export.into_memory())
        .ok_or(GuestFault::NoMemory)
}

fn read_guest_bytes(
    caller: &mut Caller<'_, GuestState>,
    ptr: i32,
    len: i32,
) -> std::result::Result<Vec<u8>, GuestFault> {
    let offset = usize::try_from(ptr).map_err(|_| GuestFault::OutOfBounds)?;
    let len = usize::try_from(len).map_err(|_| GuestFault::OutOfBounds)?;
    if len > MAX_GUEST_STRING {
        return Err(GuestFault::OutOfBounds);
    }
    let memory = guest_memory(caller)?;
    let mut buf = vec![0u8; len];
    memory
        .read(&*caller, offset, &mut buf)
        .map_err(|_| GuestFault::OutOfBounds)?;
    Ok(buf)
}
