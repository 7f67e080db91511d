#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-projection** – Deterministic event-fold projection runtime (C9).
//!
//! A projection has a stable name, a set of subscribed event types, a pure
//! `apply` fold, a `truncate` reset, and a cursor tracking the last event it
//! applied. The runtime here owns the cursor bookkeeping so individual
//! projections stay pure folds: applying the same event twice is always a
//! no-op, whether or not the projection's own fold is itself idempotent,
//! because the runtime never re-applies an event once its cursor has passed
//! it.
//!
//! Authored fresh in the surrounding crates' idiom, generalizing a
//! plugin-registry shape used elsewhere for pluggable content classifiers
//! into a fold-projection registry instead.

use std::collections::HashSet;
use std::sync::Arc;

use bos_store_core::Cursor;
use bos_types::{BusinessId, Event};
use dashmap::DashMap;
use thiserror::Error;

/// Failure raised while folding an event into a projection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    /// The projection's own fold function failed.
    #[error("projection '{name}' failed to apply event {event_id}: {message}")]
    Fold {
        /// Projection name.
        name: String,
        /// Event that failed to fold.
        event_id: uuid::Uuid,
        /// Failure description.
        message: String,
    },
    /// `restore` was given bytes it could not parse.
    #[error("projection '{0}' failed to restore from snapshot bytes")]
    Restore(String),
    /// No projection is registered under this name.
    #[error("unknown projection: {0}")]
    UnknownProjection(String),
}

/// A deterministic, pure fold of events into a read model.
pub trait Projection: Send + Sync {
    /// Stable name, used for cursor tracking and snapshot records.
    fn name(&self) -> &str;

    /// Event types this projection folds; events of any other type are
    /// never routed to it by the runtime.
    fn subscribed_event_types(&self) -> HashSet<String>;

    /// Fold one event into this projection's state. Must be a pure
    /// function of the projection's current state and the event: no
    /// clock reads, no randomness, no reads from outside the event
    /// payload.
    fn apply(&self, event: &Event) -> Result<(), ProjectionError>;

    /// Reset this projection to its zero state for `business_id` (or for
    /// every business, when scoped globally), ahead of a replay.
    fn truncate(&self, business_id: Option<BusinessId>);

    /// Serialize current state to bytes for a snapshot record. Two
    /// projection instances that have folded the same prefix of the log
    /// must produce byte-identical snapshots.
    fn snapshot(&self) -> Vec<u8>;

    /// Restore state from a previously produced [`Projection::snapshot`].
    fn restore(&self, bytes: &[u8]) -> Result<(), ProjectionError>;
}

/// Owns the cursor for one `(projection, business)` pair and routes events
/// to every registered projection subscribed to their type.
#[derive(Default)]
pub struct ProjectionRuntime {
    projections: DashMap<String, Arc<dyn Projection>>,
    cursors: DashMap<(String, BusinessId), Cursor>,
}

impl ProjectionRuntime {
    /// Construct an empty runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a projection. Replacing an existing name is allowed (used
    /// by tests and by `bos-replay` rebuilding a fresh instance).
    pub fn register(&self, projection: Arc<dyn Projection>) {
        self.projections.insert(projection.name().to_string(), projection);
    }

    /// The last cursor applied for `(projection_name, business_id)`, if
    /// any event has been folded yet.
    pub fn cursor(&self, projection_name: &str, business_id: BusinessId) -> Option<Cursor> {
        self.cursors.get(&(projection_name.to_string(), business_id)).map(|c| *c)
    }

    /// Names of every projection currently registered, for callers (e.g.
    /// `bos-replay`) that need to target "every projection" without the
    /// runtime exposing the projections themselves.
    pub fn registered_names(&self) -> Vec<String> {
        self.projections.iter().map(|e| e.key().clone()).collect()
    }

    /// The registered projection under `name`, if any. Lets a caller (e.g.
    /// `bos-replay` taking a snapshot) reach a projection's `snapshot`/
    /// `restore` without routing through event application.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Projection>> {
        self.projections.get(name).map(|e| e.value().clone())
    }

    /// Overwrite the stored cursor for `(projection_name, business_id)`
    /// directly, without folding an event. Used when resuming from a
    /// snapshot: the projection's state already reflects everything up to
    /// `cursor`, so the runtime must record that without re-applying it.
    pub fn set_cursor(&self, projection_name: &str, business_id: BusinessId, cursor: Cursor) {
        self.cursors.insert((projection_name.to_string(), business_id), cursor);
    }

    /// Fold `event` into exactly the named projection, skipping it if its
    /// cursor has already passed this event or it is not subscribed to the
    /// event's type. Unlike [`Self::apply_event`], other registered
    /// projections are left untouched — used by snapshot-scoped replay,
    /// which resumes one projection at a time.
    pub fn apply_event_to(&self, projection_name: &str, event: &Event) -> Result<(), ProjectionError> {
        let projection = self
            .projections
            .get(projection_name)
            .ok_or_else(|| ProjectionError::UnknownProjection(projection_name.to_string()))?;
        if !projection.subscribed_event_types().contains(&event.event_type) {
            return Ok(());
        }
        let incoming = Cursor::of(event);
        let key = (projection_name.to_string(), event.business_id);
        if let Some(current) = self.cursors.get(&key) {
            if *current >= incoming {
                return Ok(());
            }
        }
        projection.apply(event)?;
        self.cursors.insert(key, incoming);
        Ok(())
    }

    /// Fold `event` into every registered projection subscribed to its
    /// type, skipping any projection whose cursor has already passed it.
    pub fn apply_event(&self, event: &Event) -> Result<(), ProjectionError> {
        let incoming = Cursor::of(event);
        for entry in self.projections.iter() {
            let projection = entry.value();
            if !projection.subscribed_event_types().contains(&event.event_type) {
                continue;
            }
            let key = (projection.name().to_string(), event.business_id);
            if let Some(current) = self.cursors.get(&key) {
                if *current >= incoming {
                    continue;
                }
            }
            projection.apply(event).map_err(|e| match e {
                ProjectionError::Fold { name, event_id, message } => ProjectionError::Fold { name, event_id, message },
                other => other,
            })?;
            self.cursors.insert(key, incoming);
        }
        Ok(())
    }

    /// Fold a whole batch in order (as produced by a single commit or by
    /// replay iterating the log).
    pub fn apply_batch(&self, events: &[Event]) -> Result<(), ProjectionError> {
        for event in events {
            self.apply_event(event)?;
        }
        Ok(())
    }

    /// Reset the named projection (and its cursors) ahead of a replay.
    pub fn truncate(&self, projection_name: &str, business_id: Option<BusinessId>) -> Result<(), ProjectionError> {
        let projection = self
            .projections
            .get(projection_name)
            .ok_or_else(|| ProjectionError::UnknownProjection(projection_name.to_string()))?;
        projection.truncate(business_id);
        match business_id {
            Some(business_id) => {
                self.cursors.remove(&(projection_name.to_string(), business_id));
            }
            None => {
                self.cursors.retain(|(name, _), _| name != projection_name);
            }
        }
        Ok(())
    }
}
