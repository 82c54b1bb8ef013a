//! Extension manager: gates an invocation, fetches the source, runs it and
//! reports the result.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::{EngineError, Result};
use crate::host::TriggerPayload;
use crate::model::Trigger;
use crate::reporter::{ResultReporter, StatusStore};
use crate::sandbox::cache::code_id_for;
use crate::sandbox::executor::{ExtensionRunner, RunReport};

/// Loads guest source by content id.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch_source(&self, code_id: &str) -> Result<Vec<u8>>;
}

/// Content-addressed source store; for tests and embedding.
#[derive(Debug, Default)]
pub struct InMemorySourceStore {
    sources: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `source` and return its code id.
    pub fn insert(&self, source: impl Into<Vec<u8>>) -> String {
        let source = source.into();
        let code_id = code_id_for(&source);
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources.insert(code_id.clone(), source);
        code_id
    }

    /// Store `source` under an arbitrary id, bypassing content addressing.
    pub fn insert_raw(&self, code_id: impl Into<String>, source: impl Into<Vec<u8>>) {
        let mut sources = self.sources.write().unwrap_or_else(PoisonError::into_inner);
        sources.insert(code_id.into(), source.into());
    }
}

#[async_trait]
impl SourceFetcher for InMemorySourceStore {
    async fn fetch_source(&self, code_id: &str) -> Result<Vec<u8>> {
        let sources = self.sources.read().unwrap_or_else(PoisonError::into_inner);
        sources
            .get(code_id)
            .cloned()
            .ok_or_else(|| EngineError::SourceFetch(format!("no source stored for {code_id}")))
    }
}

/// Why an invocation did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The pinned version has not passed review.
    NotAccepted,
    /// The payload's channel is disabled for this installation.
    ChannelDisabled,
    /// The payload does not fire this version's trigger.
    TriggerMismatch,
    /// The invoking member's admin level is below the installation's minimum.
    InsufficientAdminLevel,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            SkipReason::NotAccepted => "version not accepted",
            SkipReason::ChannelDisabled => "channel disabled",
            SkipReason::TriggerMismatch => "trigger mismatch",
            SkipReason::InsufficientAdminLevel => "insufficient admin level",
        };
        f.write_str(reason)
    }
}

/// Result of [`ExtensionManager::invoke`].
#[derive(Debug, Clone)]
pub enum Invocation {
    Completed(RunReport),
    Skipped(SkipReason),
}

impl Invocation {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Invocation::Completed(report) => Some(report),
            Invocation::Skipped(_) => None,
        }
    }
}

/// Orchestrates one extension invocation end to end.
#[derive(Clone)]
pub struct ExtensionManager {
    runner: ExtensionRunner,
    fetcher: Arc<dyn SourceFetcher>,
    reporter: ResultReporter,
}

impl ExtensionManager {
    pub fn new(
        runner: ExtensionRunner,
        fetcher: Arc<dyn SourceFetcher>,
        store: Arc<dyn StatusStore>,
    ) -> Self {
        Self {
            runner,
            fetcher,
            reporter: ResultReporter::new(store),
        }
    }

    pub fn runner(&self) -> &ExtensionRunner {
        &self.runner
    }

    /// Run the extension for `ctx` if it is allowed to fire.
    ///
    /// Skips and source failures write no status. A completed run, whether
    /// the guest succeeded or not, always does.
    pub async fn invoke(&self, ctx: ExecutionContext) -> Result<Invocation> {
        if let Some(reason) = gate(&ctx) {
            tracing::debug!(
                guild_id = %ctx.guild().id,
                extension_id = %ctx.extension().id,
                reason = %reason,
                "extension invocation skipped"
            );
            return Ok(Invocation::Skipped(reason));
        }

        let version = ctx.version();
        let source = self.fetcher.fetch_source(&version.code_id).await?;
        let actual = code_id_for(&source);
        if actual != version.code_id {
            return Err(EngineError::SourceIntegrity {
                expected: version.code_id.clone(),
                actual,
            });
        }

        let timeout = Duration::from_millis(version.timeout_ms);
        let key = ctx.installation().key();
        let report = self.runner.run(&source, Arc::new(ctx), timeout).await?;
        self.reporter.report(&key, &report.outcome).await?;
        Ok(Invocation::Completed(report))
    }
}

/// First gate the context fails, if any.
pub fn gate(ctx: &ExecutionContext) -> Option<SkipReason> {
    let version = ctx.version();
    let installation = ctx.installation();

    if !version.accepted {
        return Some(SkipReason::NotAccepted);
    }
    if let Some(channel_id) = ctx.payload().channel_id() {
        if installation.is_channel_disabled(channel_id) {
            return Some(SkipReason::ChannelDisabled);
        }
    }
    if !trigger_matches(&version.trigger, ctx) {
        return Some(SkipReason::TriggerMismatch);
    }
    if let Some(actor_id) = ctx.payload().actor_id() {
        let level = ctx.server().member_admin_level(ctx.guild(), actor_id);
        if level < installation.admin_level {
            return Some(SkipReason::InsufficientAdminLevel);
        }
    }
    None
}

fn trigger_matches(trigger: &Trigger, ctx: &ExecutionContext) -> bool {
    match (trigger, ctx.payload()) {
        (Trigger::Command { .. } | Trigger::Keyword { .. }, TriggerPayload::Message(message)) => {
            trigger.matches_message(&ctx.server().command_prefix, &message.content)
        }
        (Trigger::Slash { key, .. }, TriggerPayload::Interaction(interaction)) => {
            interaction.command == *key
        }
        (Trigger::Event { event }, TriggerPayload::Event(payload)) => payload.name == *event,
        (Trigger::Timer { .. }, TriggerPayload::Timer(_)) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_store_is_content_addressed() {
        let store = InMemorySourceStore::new();
        let code_id = store.insert("(module)");
        assert_eq!(code_id, code_id_for(b"(module)"));

        let source = tokio_test::block_on(store.fetch_source(&code_id)).unwrap();
        assert_eq!(source, b"(module)");
    }

    #[test]
    fn test_missing_source_is_fetch_error() {
        let store = InMemorySourceStore::new();
        let err = tokio_test::block_on(store.fetch_source("deadbeef")).unwrap_err();
        assert!(matches!(err, EngineError::SourceFetch(_)));
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::ChannelDisabled.to_string(), "channel disabled");
        assert_eq!(
            SkipReason::InsufficientAdminLevel.to_string(),
            "insufficient admin level"
        );
    }
}
