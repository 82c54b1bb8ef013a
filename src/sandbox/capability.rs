//! Capability-checked module resolution.
//!
//! Every module a guest may resolve is listed in [`ModuleKind`]. Resolution
//! first checks that the module exists for the current invocation type, then
//! that the version declared the scope it requires, and only then asks a
//! [`SnapshotSource`] for data.

use crate::context::ExecutionContext;
use crate::error::ResolveError;
use crate::model::{InvocationType, Scope, ScopeSet};
use crate::snapshot::{snapshot_for, Snapshot};

/// How a module's snapshot reaches the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Computed once when the isolate is set up.
    Eager,
    /// Computed on demand through the resolution bridge.
    Lazy,
    /// Always answered with an unavailability marker.
    Unavailable,
}

/// A module name a guest can pass to `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleKind {
    Message,
    Channel,
    Guild,
    Members,
    Roles,
    Economy,
    Config,
    Bot,
    Event,
    Extension,
    Interaction,
    Http,
    Rss,
}

impl ModuleKind {
    pub const ALL: [ModuleKind; 13] = [
        ModuleKind::Message,
        ModuleKind::Channel,
        ModuleKind::Guild,
        ModuleKind::Members,
        ModuleKind::Roles,
        ModuleKind::Economy,
        ModuleKind::Config,
        ModuleKind::Bot,
        ModuleKind::Event,
        ModuleKind::Extension,
        ModuleKind::Interaction,
        ModuleKind::Http,
        ModuleKind::Rss,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModuleKind::Message => "message",
            ModuleKind::Channel => "channel",
            ModuleKind::Guild => "guild",
            ModuleKind::Members => "members",
            ModuleKind::Roles => "roles",
            ModuleKind::Economy => "economy",
            ModuleKind::Config => "config",
            ModuleKind::Bot => "bot",
            ModuleKind::Event => "event",
            ModuleKind::Extension => "extension",
            ModuleKind::Interaction => "interaction",
            ModuleKind::Http => "http",
            ModuleKind::Rss => "rss",
        }
    }

    /// Look up a module by its exact guest-facing name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn required_scope(&self) -> Option<Scope> {
        match self {
            ModuleKind::Channel => Some(Scope::ChannelsRead),
            ModuleKind::Guild => Some(Scope::GuildRead),
            ModuleKind::Members => Some(Scope::MembersRead),
            ModuleKind::Roles => Some(Scope::RolesRead),
            ModuleKind::Economy => Some(Scope::EconomyRead),
            ModuleKind::Config => Some(Scope::Config),
            ModuleKind::Message
            | ModuleKind::Bot
            | ModuleKind::Event
            | ModuleKind::Extension
            | ModuleKind::Interaction
            | ModuleKind::Http
            | ModuleKind::Rss => None,
        }
    }

    pub fn available_for(&self, invocation: InvocationType) -> bool {
        match self {
            ModuleKind::Message | ModuleKind::Channel => matches!(
                invocation,
                InvocationType::Command | InvocationType::Keyword
            ),
            ModuleKind::Event => invocation == InvocationType::Event,
            ModuleKind::Interaction => invocation == InvocationType::Slash,
            ModuleKind::Guild
            | ModuleKind::Members
            | ModuleKind::Roles
            | ModuleKind::Economy
            | ModuleKind::Config
            | ModuleKind::Bot
            | ModuleKind::Extension
            | ModuleKind::Http
            | ModuleKind::Rss => true,
        }
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            ModuleKind::Members | ModuleKind::Roles | ModuleKind::Economy => Delivery::Lazy,
            ModuleKind::Http | ModuleKind::Rss => Delivery::Unavailable,
            ModuleKind::Message
            | ModuleKind::Channel
            | ModuleKind::Guild
            | ModuleKind::Config
            | ModuleKind::Bot
            | ModuleKind::Event
            | ModuleKind::Extension
            | ModuleKind::Interaction => Delivery::Eager,
        }
    }
}

/// Produces snapshots for modules that already passed the capability check.
pub trait SnapshotSource {
    fn snapshot(&mut self, kind: ModuleKind) -> Result<Snapshot, ResolveError>;
}

impl SnapshotSource for ExecutionContext {
    fn snapshot(&mut self, kind: ModuleKind) -> Result<Snapshot, ResolveError> {
        snapshot_for(kind, self)
    }
}

/// Decide whether `name` may be resolved, without producing data.
///
/// Availability is checked before scopes, so a module that does not exist
/// for this invocation type reports `UNKNOWN_MODULE` even when its scope is
/// also missing.
pub fn check(
    name: &str,
    granted: &ScopeSet,
    invocation: InvocationType,
) -> Result<ModuleKind, ResolveError> {
    let kind = ModuleKind::from_name(name)
        .filter(|kind| kind.available_for(invocation))
        .ok_or_else(|| ResolveError::UnknownCapability {
            module: name.to_string(),
        })?;

    if let Some(scope) = kind.required_scope() {
        if !granted.contains(&scope) {
            return Err(ResolveError::ScopeViolation {
                module: name.to_string(),
                scope,
            });
        }
    }
    Ok(kind)
}

/// Check `name` and fetch its snapshot from `source`.
pub fn resolve<S: SnapshotSource + ?Sized>(
    name: &str,
    granted: &ScopeSet,
    invocation: InvocationType,
    source: &mut S,
) -> Result<Snapshot, ResolveError> {
    let kind = check(name, granted, invocation)?;
    match kind.delivery() {
        Delivery::Unavailable => Ok(Snapshot::unavailable(kind)),
        Delivery::Eager | Delivery::Lazy => source.snapshot(kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Source that records every request and never fails.
    #[derive(Default)]
    struct Recording {
        requested: Vec<ModuleKind>,
    }

    impl SnapshotSource for Recording {
        fn snapshot(&mut self, kind: ModuleKind) -> Result<Snapshot, ResolveError> {
            self.requested.push(kind);
            Ok(Snapshot::unavailable(kind))
        }
    }

    fn all_scopes() -> ScopeSet {
        Scope::ALL.into_iter().collect()
    }

    #[test]
    fn test_names_round_trip() {
        for kind in ModuleKind::ALL {
            assert_eq!(ModuleKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ModuleKind::from_name("Message"), None);
        assert_eq!(ModuleKind::from_name("fs"), None);
    }

    #[test]
    fn test_channel_requires_scope() {
        let err = check("channel", &ScopeSet::new(), InvocationType::Command).unwrap_err();
        assert_eq!(err.code(), "MISSING_SCOPES");

        let granted: ScopeSet = [Scope::ChannelsRead].into_iter().collect();
        assert_eq!(
            check("channel", &granted, InvocationType::Command).unwrap(),
            ModuleKind::Channel
        );
    }

    #[test]
    fn test_availability_precedes_scope() {
        // channel is unavailable for timers and its scope is missing too
        let err = check("channel", &ScopeSet::new(), InvocationType::Timer).unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_MODULE");
    }

    #[test]
    fn test_resolution_table_is_exhaustive() {
        for invocation in InvocationType::ALL {
            for kind in ModuleKind::ALL {
                let everything = check(kind.name(), &all_scopes(), invocation);
                assert_eq!(everything.is_ok(), kind.available_for(invocation));

                let nothing = check(kind.name(), &ScopeSet::new(), invocation);
                match (kind.available_for(invocation), kind.required_scope()) {
                    (false, _) => assert_eq!(nothing.unwrap_err().code(), "UNKNOWN_MODULE"),
                    (true, Some(_)) => assert_eq!(nothing.unwrap_err().code(), "MISSING_SCOPES"),
                    (true, None) => assert_eq!(nothing.unwrap(), kind),
                }
            }
        }
    }

    #[test]
    fn test_each_scope_unlocks_only_its_module() {
        for scope in Scope::ALL {
            let granted: ScopeSet = [scope].into_iter().collect();
            for kind in ModuleKind::ALL {
                let allowed = check(kind.name(), &granted, InvocationType::Command).is_ok();
                let expected = kind.available_for(InvocationType::Command)
                    && kind.required_scope().map_or(true, |required| required == scope);
                assert_eq!(allowed, expected, "{scope} / {}", kind.name());
            }
        }
    }

    #[test]
    fn test_unavailable_modules_skip_source() {
        let mut source = Recording::default();
        let snapshot = resolve("http", &ScopeSet::new(), InvocationType::Timer, &mut source).unwrap();
        assert_eq!(snapshot, Snapshot::unavailable(ModuleKind::Http));
        assert!(source.requested.is_empty());

        resolve("bot", &ScopeSet::new(), InvocationType::Timer, &mut source).unwrap();
        assert_eq!(source.requested, vec![ModuleKind::Bot]);
    }

    #[test]
    fn test_failed_check_never_reaches_source() {
        let mut source = Recording::default();
        assert!(resolve("members", &ScopeSet::new(), InvocationType::Event, &mut source).is_err());
        assert!(resolve("message", &all_scopes(), InvocationType::Event, &mut source).is_err());
        assert!(source.requested.is_empty());
    }
}
