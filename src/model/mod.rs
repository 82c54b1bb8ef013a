//! Persisted documents the engine reads: extensions, versions, installations.

pub mod extension;
pub mod installation;
pub mod scope;

pub use extension::{Extension, ExtensionVersion, InvocationType, NetworkCapability, Trigger};
pub use installation::{Installation, InstallationKey, InstallationStatus, StatusCode};
pub use scope::{parse_scopes, Scope, ScopeSet, UnknownScope};
