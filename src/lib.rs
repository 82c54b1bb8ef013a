//! # Extension Sandbox
//!
//! A capability-scoped execution engine for third-party chat-bot extensions.
//!
//! Guest extensions are WebAssembly modules run in the Wasmtime runtime, one
//! fresh isolate per invocation. Guests see the host only through immutable
//! JSON snapshots of the modules their version declared scopes for:
//!
//! - **Capability checks**: modules are resolved by name, checked against the
//!   invocation type and the version's scopes at the moment of resolution
//! - **Memory limits**: a fixed ceiling per isolate, independent of the host
//! - **Timeout protection**: epoch-based interruption for infinite loops
//! - **No ambient authority**: WASI without directories, environment,
//!   arguments or sockets
//! - **Durable status**: every completed run updates the installation status
//!
//! ## Example
//!
//! ```rust,ignore
//! use extension_sandbox::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let runner = ExtensionRunner::new(SandboxConfig::default())?;
//!     let sources = Arc::new(InMemorySourceStore::new());
//!     let statuses = Arc::new(InMemoryStatusStore::new());
//!     let manager = ExtensionManager::new(runner, sources.clone(), statuses.clone());
//!
//!     let ctx = ExecutionContext::new(extension, installation, server, guild, bot, payload)?;
//!     match manager.invoke(ctx).await? {
//!         Invocation::Completed(report) => println!("success: {}", report.is_success()),
//!         Invocation::Skipped(reason) => println!("skipped: {reason}"),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Guest interface
//!
//! Guests import from the `sandbox` namespace:
//!
//! ```wat
//! (import "sandbox" "resolve" (func (param i32 i32) (result i32)))
//! (import "sandbox" "read" (func (param i32 i32) (result i32)))
//! (import "sandbox" "log" (func (param i32 i32)))
//! (import "sandbox" "throw" (func (param i32 i32)))
//! ```
//!
//! and export `run` (or the WASI `_start`). `resolve` takes a module name
//! and returns the length of the staged snapshot, which `read` copies into
//! guest memory as `{"v": 1, "module": "...", "data": {...}}`.

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod logging;
pub mod manager;
pub mod model;
pub mod prelude;
pub mod reporter;
pub mod sandbox;
pub mod snapshot;

// Re-export main types at crate root for convenience
pub use config::{EngineConfig, LoggingConfig};
pub use context::ExecutionContext;
pub use error::{EngineError, FailureKind, GuestError, ResolveError, Result};
pub use manager::{ExtensionManager, InMemorySourceStore, Invocation, SkipReason, SourceFetcher};
pub use reporter::{InMemoryStatusStore, ResultReporter, StatusStore};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::{ExtensionRunner, RunOutcome, RunReport};
