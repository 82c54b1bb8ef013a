//! Core execution engine: one isolate per run, bounded by a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::ExecutionContext;
use crate::error::{FailureKind, GuestError, Result};
use crate::sandbox::bridge;
use crate::sandbox::cache::{code_id_for, ModuleCache, SharedEngine};
use crate::sandbox::capability::ModuleKind;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::{ConsoleOutput, GuestConsole};
use crate::sandbox::isolate::{Isolate, IsolateGlobals, IsolateTracker};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure(GuestError),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Success)
    }

    pub fn error(&self) -> Option<&GuestError> {
        match self {
            RunOutcome::Success => None,
            RunOutcome::Failure(err) => Some(err),
        }
    }
}

/// Result of one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// What the guest wrote to stdout, stderr and `log`.
    pub console: ConsoleOutput,
    /// Wall-clock time from isolate creation to the outcome.
    pub elapsed: Duration,
    /// Modules the guest resolved, in call order.
    pub resolved: Vec<ModuleKind>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Runs guest code in fresh isolates.
///
/// Cloning is cheap; clones share the engine, the compiled module cache and
/// the isolate tracker.
#[derive(Debug, Clone)]
pub struct ExtensionRunner {
    config: Arc<SandboxConfig>,
    engine: SharedEngine,
    cache: Arc<ModuleCache>,
    tracker: IsolateTracker,
}

impl ExtensionRunner {
    /// Create a runner. Fails on invalid limits.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        config.validate()?;
        let engine = SharedEngine::new(config.epoch_tick_interval)?;
        let cache = Arc::new(ModuleCache::new(config.module_cache_capacity));
        Ok(Self {
            config: Arc::new(config),
            engine,
            cache,
            tracker: IsolateTracker::new(),
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn tracker(&self) -> &IsolateTracker {
        &self.tracker
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Run `source` against `ctx`.
    ///
    /// Guest failures are contained in the report's outcome. Only a failure
    /// to create the isolate is returned as `Err`, and then nothing ran.
    pub async fn run(
        &self,
        source: &[u8],
        ctx: Arc<ExecutionContext>,
        requested_timeout: Duration,
    ) -> Result<RunReport> {
        let timeout = self.config.effective_timeout(requested_timeout);
        let correlation = ctx.correlation();
        let started = Instant::now();

        let console = GuestConsole::new(self.config.max_console_bytes, self.config.max_log_lines);
        let (bridge, _responder) = bridge::spawn_responder(Arc::clone(&ctx));
        let globals = IsolateGlobals::for_context(&ctx, bridge, console.clone());

        let mut isolate = Isolate::new(self.engine.clone(), &self.config, self.tracker.clone());
        isolate.initialize(globals, timeout)?;

        let engine = self.engine.clone();
        let cache = Arc::clone(&self.cache);
        let code_id = code_id_for(source);
        let source = source.to_vec();
        let exec_handle = tokio::task::spawn_blocking(move || {
            let result = cache
                .get_or_compile(engine.engine(), &code_id, &source)
                .map_err(|err| GuestError::new(FailureKind::InvalidModule, err.to_string()))
                .and_then(|module| isolate.evaluate(&module));
            let resolved = isolate.resolved();
            isolate.dispose();
            (result, resolved)
        });

        // The epoch deadline interrupts the guest; the grace period covers a
        // guest stuck in a host call.
        let (result, resolved) = tokio::select! {
            joined = exec_handle => match joined {
                Ok(finished) => finished,
                Err(err) => {
                    tracing::trace!(error = ?err, "guest thread panicked");
                    (Err(GuestError::opaque(FailureKind::Internal)), Vec::new())
                }
            },
            _ = tokio::time::sleep(timeout + self.config.timeout_grace) => {
                (Err(timeout_error(timeout)), Vec::new())
            }
        };

        let outcome = match result {
            Ok(()) => RunOutcome::Success,
            Err(err) if err.is_timeout() => RunOutcome::Failure(timeout_error(timeout)),
            Err(err) => RunOutcome::Failure(err),
        };
        let elapsed = started.elapsed();

        match &outcome {
            RunOutcome::Success => tracing::debug!(
                guild_id = %correlation.guild_id,
                extension_id = %correlation.extension_id,
                version_id = %correlation.version_id,
                elapsed_ms = elapsed.as_millis() as u64,
                "extension run succeeded"
            ),
            RunOutcome::Failure(err) => tracing::debug!(
                guild_id = %correlation.guild_id,
                extension_id = %correlation.extension_id,
                version_id = %correlation.version_id,
                code = err.code(),
                elapsed_ms = elapsed.as_millis() as u64,
                "extension run failed"
            ),
        }

        Ok(RunReport {
            outcome,
            console: console.output(),
            elapsed,
            resolved,
        })
    }
}

fn timeout_error(timeout: Duration) -> GuestError {
    GuestError::new(
        FailureKind::Timeout,
        format!("extension exceeded its {} ms time limit", timeout.as_millis()),
    )
}
