//! Error types for the extension sandbox.

use std::fmt;

use thiserror::Error;

use crate::model::Scope;

/// Errors raised to the guest when it resolves a module.
///
/// These are recoverable from the engine's point of view: they surface at the
/// guest's resolution call and end up inside a failed [`RunOutcome`].
///
/// [`RunOutcome`]: crate::sandbox::executor::RunOutcome
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The module does not exist, or not for this invocation type.
    #[error("unknown module '{module}'")]
    UnknownCapability { module: String },

    /// The module exists but the version lacks the scope it requires.
    #[error("module '{module}' requires the '{scope}' scope")]
    ScopeViolation { module: String, scope: Scope },

    /// The host side of the resolution bridge is gone.
    #[error("module '{module}' could not be resolved")]
    BridgeClosed { module: String },
}

impl ResolveError {
    /// Stable code surfaced to guests and administrators.
    pub fn code(&self) -> &'static str {
        match self {
            ResolveError::UnknownCapability { .. } => "UNKNOWN_MODULE",
            ResolveError::ScopeViolation { .. } => "MISSING_SCOPES",
            ResolveError::BridgeClosed { .. } => "MODULE_UNAVAILABLE",
        }
    }
}

/// Why an [`ExecutionContext`](crate::context::ExecutionContext) could not be built.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("extension {extension_id} has no version {version_id}")]
    UnknownVersion {
        extension_id: String,
        version_id: String,
    },

    #[error("installation is for extension {installed}, not {extension_id}")]
    ExtensionMismatch {
        installed: String,
        extension_id: String,
    },

    #[error("installation pins version {pinned}, not {version_id}")]
    VersionMismatch { pinned: String, version_id: String },

    #[error("guild mismatch: installation {installation}, server {server}, guild {guild}")]
    GuildMismatch {
        installation: String,
        server: String,
        guild: String,
    },

    #[error("{invocation} extensions cannot be invoked by a {payload} payload")]
    PayloadMismatch {
        invocation: &'static str,
        payload: &'static str,
    },

    #[error("{payload} payload from guild {origin} cannot run in guild {guild}")]
    PayloadGuildMismatch {
        payload: &'static str,
        origin: String,
        guild: String,
    },
}

/// Errors that escape the engine.
///
/// Guest-originated failures never appear here; they are contained in the
/// run outcome. Only isolate creation failures and host collaborator
/// failures are returned as `Err`.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The isolate or its context could not be created.
    #[error("failed to initialize isolate: {0}")]
    IsolateFatal(#[source] anyhow::Error),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The execution context is inconsistent.
    #[error("invalid execution context: {0}")]
    Context(#[from] ContextError),

    /// The source fetch collaborator failed.
    #[error("failed to fetch extension source: {0}")]
    SourceFetch(String),

    /// The fetched source does not hash to its code id.
    #[error("source integrity check failed: expected {expected}, got {actual}")]
    SourceIntegrity { expected: String, actual: String },

    /// The status store collaborator failed.
    #[error("failed to persist installation status: {0}")]
    Store(String),

    /// I/O error while loading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Check if this error means no isolate could be created.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::IsolateFatal(_))
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Guest resolved a module without the required scope.
    MissingScopes,
    /// Guest resolved a module that does not exist for this invocation.
    UnknownModule,
    /// Host side of a lazy module was unavailable.
    ModuleUnavailable,
    /// Guest raised an error through `throw`.
    Thrown,
    /// Guest trapped (unreachable, out-of-bounds access, ...).
    Trap,
    /// Source failed to compile, link or expose an entry point.
    InvalidModule,
    /// Wall-clock timeout.
    Timeout,
    /// The isolate's memory ceiling was hit.
    MemoryLimit,
    /// Guest exited through WASI `proc_exit` with a non-zero code.
    Exit(i32),
    /// Host-side fault while running the guest.
    Internal,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::MissingScopes => "MISSING_SCOPES",
            FailureKind::UnknownModule => "UNKNOWN_MODULE",
            FailureKind::ModuleUnavailable => "MODULE_UNAVAILABLE",
            FailureKind::Thrown => "GUEST_ERROR",
            FailureKind::Trap => "GUEST_TRAP",
            FailureKind::InvalidModule => "INVALID_MODULE",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::MemoryLimit => "MEMORY_LIMIT",
            FailureKind::Exit(_) => "GUEST_EXIT",
            FailureKind::Internal => "INTERNAL",
        }
    }
}

impl From<&ResolveError> for FailureKind {
    fn from(err: &ResolveError) -> Self {
        match err {
            ResolveError::UnknownCapability { .. } => FailureKind::UnknownModule,
            ResolveError::ScopeViolation { .. } => FailureKind::MissingScopes,
            ResolveError::BridgeClosed { .. } => FailureKind::ModuleUnavailable,
        }
    }
}

/// A contained guest failure.
///
/// `message` is `None` when the guest raised something that is not a
/// well-formed error (empty or non-UTF-8 message).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestError {
    pub kind: FailureKind,
    pub message: Option<String>,
}

impl GuestError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: Some(message.into()),
        }
    }

    /// A failure without a usable message.
    pub fn opaque(kind: FailureKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == FailureKind::Timeout
    }
}

impl From<ResolveError> for GuestError {
    fn from(err: ResolveError) -> Self {
        GuestError::new(FailureKind::from(&err), err.to_string())
    }
}

impl fmt::Display for GuestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code(), message),
            None => f.write_str(self.code()),
        }
    }
}

impl std::error::Error for GuestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_error_codes() {
        let unknown = ResolveError::UnknownCapability {
            module: "message".to_string(),
        };
        assert_eq!(unknown.code(), "UNKNOWN_MODULE");
        assert_eq!(unknown.to_string(), "unknown module 'message'");

        let scope = ResolveError::ScopeViolation {
            module: "channel".to_string(),
            scope: Scope::ChannelsRead,
        };
        assert_eq!(scope.code(), "MISSING_SCOPES");
        assert_eq!(
            scope.to_string(),
            "module 'channel' requires the 'channels_read' scope"
        );
    }

    #[test]
    fn test_guest_error_from_resolve() {
        let err: GuestError = ResolveError::ScopeViolation {
            module: "channel".to_string(),
            scope: Scope::ChannelsRead,
        }
        .into();
        assert_eq!(err.kind, FailureKind::MissingScopes);
        assert_eq!(err.code(), "MISSING_SCOPES");
        assert!(err.to_string().starts_with("MISSING_SCOPES: "));
    }

    #[test]
    fn test_error_helpers() {
        let fatal = EngineError::IsolateFatal(anyhow::anyhow!("no memory"));
        assert!(fatal.is_fatal());
        assert_eq!(fatal.to_string(), "failed to initialize isolate: no memory");

        let store = EngineError::Store("disk full".to_string());
        assert!(!store.is_fatal());

        let timeout = GuestError::new(FailureKind::Timeout, "timed out");
        assert!(timeout.is_timeout());
        assert_eq!(GuestError::opaque(FailureKind::Thrown).to_string(), "GUEST_ERROR");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "config.toml");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
