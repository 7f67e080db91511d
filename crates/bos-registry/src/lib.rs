#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-registry** – Event type registry for the BOS kernel (C3).
//!
//! Tracks which event types exist, at which current version, owned by which
//! source engine, and whether they require a `branch_id`. The kernel
//! consults this before accepting a command so that an unrecognized
//! `event_type` is rejected deterministically (`UNKNOWN_EVENT_TYPE`) instead
//! of silently producing an event nothing can ever project.
//!
//! Unlike the global, process-wide handler table this crate is descended
//! from, the registry here is instance-owned: each kernel instance builds
//! its own `Registry` at startup and holds it for its lifetime, so tests
//! never leak registrations across cases.

use dashmap::DashMap;
use bos_types::RejectionCode;
use thiserror::Error;

/// Everything the kernel needs to know about one event type before
/// accepting a command that would produce it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTypeDescriptor {
    /// Wire identifier, e.g. `"ledger.entry.posted.v1"`.
    pub event_type: String,
    /// Current schema version new events of this type are stamped with.
    pub current_version: u32,
    /// The engine authorized to emit this event type.
    pub source_engine: String,
    /// Whether a command producing this event must carry a `branch_id`.
    pub requires_branch: bool,
}

impl EventTypeDescriptor {
    /// Convenience constructor for the common case of a branch-agnostic
    /// event type at version 1.
    pub fn new(event_type: impl Into<String>, source_engine: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            current_version: 1,
            source_engine: source_engine.into(),
            requires_branch: false,
        }
    }

    /// Mark this descriptor as requiring a `branch_id` on every event.
    pub fn requiring_branch(mut self) -> Self {
        self.requires_branch = true;
        self
    }

    /// Override the current version (for types that have been revised).
    pub fn at_version(mut self, version: u32) -> Self {
        self.current_version = version;
        self
    }
}

/// Failure modes raised while registering or resolving an event type.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// No descriptor exists for this event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),
    /// A descriptor already exists for this event type with different
    /// contents; re-registering with identical contents is a no-op.
    #[error("event type already registered with different contents: {0}")]
    AlreadyRegistered(String),
    /// The command requested a version this registry does not recognize as
    /// current for the event type.
    #[error("version mismatch for {event_type}: current is {current}, requested {requested}")]
    VersionMismatch {
        /// Event type in question.
        event_type: String,
        /// The version the registry considers current.
        current: u32,
        /// The version the caller asked about.
        requested: u32,
    },
}

impl RegistryError {
    /// Map this registry failure onto the closed kernel rejection code.
    pub fn rejection_code(&self) -> RejectionCode {
        match self {
            RegistryError::UnknownEventType(_) => RejectionCode::UnknownEventType,
            RegistryError::AlreadyRegistered(_) => RejectionCode::GuardInternalError,
            RegistryError::VersionMismatch { .. } => RejectionCode::UnknownEventType,
        }
    }
}

/// Instance-owned table of known event types.
#[derive(Debug, Default)]
pub struct Registry {
    entries: DashMap<String, EventTypeDescriptor>,
}

impl Registry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `descriptor`. Registering the exact same descriptor twice
    /// is idempotent; registering a different descriptor under an
    /// already-used `event_type` is an error.
    pub fn register(&self, descriptor: EventTypeDescriptor) -> Result<(), RegistryError> {
        if let Some(existing) = self.entries.get(&descriptor.event_type) {
            if *existing == descriptor {
                return Ok(());
            }
            return Err(RegistryError::AlreadyRegistered(descriptor.event_type.clone()));
        }
        tracing::debug!(event_type = %descriptor.event_type, source_engine = %descriptor.source_engine, "registered event type");
        self.entries.insert(descriptor.event_type.clone(), descriptor);
        Ok(())
    }

    /// Look up the descriptor for `event_type`.
    pub fn lookup(&self, event_type: &str) -> Result<EventTypeDescriptor, RegistryError> {
        self.entries
            .get(event_type)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::UnknownEventType(event_type.to_string()))
    }

    /// True if `event_type` has a registered descriptor.
    pub fn contains(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    /// Verify that `version` is the current version for `event_type`.
    pub fn validate_version(&self, event_type: &str, version: u32) -> Result<(), RegistryError> {
        let descriptor = self.lookup(event_type)?;
        if descriptor.current_version != version {
            return Err(RegistryError::VersionMismatch {
                event_type: event_type.to_string(),
                current: descriptor.current_version,
                requested: version,
            });
        }
        Ok(())
    }

    /// Number of registered event types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no event types are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
