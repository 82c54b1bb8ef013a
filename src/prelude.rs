//! Prelude module for convenient imports.

pub use crate::context::ExecutionContext;
pub use crate::error::{EngineError, FailureKind, GuestError, Result};
pub use crate::host::{BotState, GuildState, ServerDocument, TriggerPayload};
pub use crate::manager::{ExtensionManager, InMemorySourceStore, Invocation, SkipReason};
pub use crate::model::{Extension, ExtensionVersion, Installation, InstallationKey, Scope, Trigger};
pub use crate::reporter::{InMemoryStatusStore, StatusStore};
pub use crate::sandbox::{
    config::SandboxConfig,
    executor::{ExtensionRunner, RunOutcome, RunReport},
};
