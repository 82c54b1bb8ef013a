//! Transient per-invocation execution context.

use crate::error::ContextError;
use crate::host::{BotState, GuildState, ServerDocument, TriggerPayload};
use crate::model::{Extension, ExtensionVersion, Installation, InvocationType, ScopeSet};

/// Everything one run may read, assembled from persisted documents and the
/// triggering event. Built per call and discarded afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    extension: Extension,
    version: ExtensionVersion,
    installation: Installation,
    server: ServerDocument,
    guild: GuildState,
    bot: BotState,
    payload: TriggerPayload,
}

impl ExecutionContext {
    /// Assemble a context for the version pinned by `installation`.
    pub fn new(
        extension: Extension,
        installation: Installation,
        server: ServerDocument,
        guild: GuildState,
        bot: BotState,
        payload: TriggerPayload,
    ) -> Result<Self, ContextError> {
        if installation.extension_id != extension.id {
            return Err(ContextError::ExtensionMismatch {
                installed: installation.extension_id.clone(),
                extension_id: extension.id.clone(),
            });
        }
        let version = extension
            .version(&installation.version_id)
            .cloned()
            .ok_or_else(|| ContextError::UnknownVersion {
                extension_id: extension.id.clone(),
                version_id: installation.version_id.clone(),
            })?;
        Self::with_version(extension, version, installation, server, guild, bot, payload)
    }

    /// Assemble a context for an explicit version, e.g. a test run of an
    /// unpublished revision. The installation must still pin the same version.
    pub fn with_version(
        extension: Extension,
        version: ExtensionVersion,
        installation: Installation,
        server: ServerDocument,
        guild: GuildState,
        bot: BotState,
        payload: TriggerPayload,
    ) -> Result<Self, ContextError> {
        if installation.extension_id != extension.id {
            return Err(ContextError::ExtensionMismatch {
                installed: installation.extension_id.clone(),
                extension_id: extension.id.clone(),
            });
        }
        if installation.version_id != version.id {
            return Err(ContextError::VersionMismatch {
                pinned: installation.version_id.clone(),
                version_id: version.id.clone(),
            });
        }
        if installation.guild_id != server.guild_id || server.guild_id != guild.id {
            return Err(ContextError::GuildMismatch {
                installation: installation.guild_id.clone(),
                server: server.guild_id.clone(),
                guild: guild.id.clone(),
            });
        }

        if let Some(origin) = payload.guild_id() {
            if origin != guild.id {
                return Err(ContextError::PayloadGuildMismatch {
                    payload: payload.kind(),
                    origin: origin.to_string(),
                    guild: guild.id.clone(),
                });
            }
        }

        let invocation = version.invocation_type();
        let compatible = matches!(
            (invocation, &payload),
            (
                InvocationType::Command | InvocationType::Keyword,
                TriggerPayload::Message(_)
            ) | (InvocationType::Slash, TriggerPayload::Interaction(_))
                | (InvocationType::Timer, TriggerPayload::Timer(_))
                | (InvocationType::Event, TriggerPayload::Event(_))
        );
        if !compatible {
            return Err(ContextError::PayloadMismatch {
                invocation: invocation.as_str(),
                payload: payload.kind(),
            });
        }

        Ok(Self {
            extension,
            version,
            installation,
            server,
            guild,
            bot,
            payload,
        })
    }

    pub fn extension(&self) -> &Extension {
        &self.extension
    }

    pub fn version(&self) -> &ExtensionVersion {
        &self.version
    }

    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    pub fn server(&self) -> &ServerDocument {
        &self.server
    }

    pub fn guild(&self) -> &GuildState {
        &self.guild
    }

    pub fn bot(&self) -> &BotState {
        &self.bot
    }

    pub fn payload(&self) -> &TriggerPayload {
        &self.payload
    }

    pub fn invocation_type(&self) -> InvocationType {
        self.version.invocation_type()
    }

    /// Scopes granted to this run: exactly the version's declared scopes.
    pub fn scopes(&self) -> &ScopeSet {
        &self.version.scopes
    }

    /// Identifiers attached to every log line about this run.
    pub fn correlation(&self) -> Correlation {
        Correlation {
            guild_id: self.guild.id.clone(),
            extension_id: self.extension.id.clone(),
            version_id: self.version.id.clone(),
        }
    }
}

/// Log correlation identifiers for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub guild_id: String,
    pub extension_id: String,
    pub version_id: String,
}
