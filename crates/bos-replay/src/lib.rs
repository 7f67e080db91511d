#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-replay** – Rebuild projections from the committed log under a
//! replay-isolation guard (C10).
//!
//! Shaped like a write-ahead-log `recover()` pass: a bounded, resumable
//! sweep over durable storage that rebuilds in-memory state before normal
//! traffic resumes. Here the durable source is the event log rather than
//! a WAL segment, and the rebuilt state is one or more
//! [`bos_projection::Projection`] instances rather than an engine's live
//! world-state.

use bos_projection::{ProjectionError, ProjectionRuntime};
use bos_store_core::{Cursor, ReadQuery, Snapshot, StorageBackend, StoreError};
use bos_types::BusinessId;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// What a replay pass should rebuild.
#[derive(Debug, Clone, Default)]
pub struct ReplayScope {
    /// Restrict to one tenant's chain; `None` replays every business the
    /// store has a chain for (callers must supply the full id list, as the
    /// store has no "list businesses" operation by design — §4.2).
    pub business_ids: Vec<BusinessId>,
    /// Only replay events received at or before this bound.
    pub until: Option<DateTime<Utc>>,
    /// Only rebuild these projections by name; empty means every
    /// projection registered on the runtime.
    pub projections: Vec<String>,
}

impl ReplayScope {
    /// Replay everything registered for `business_id`, with no time bound.
    pub fn business(business_id: BusinessId) -> Self {
        Self {
            business_ids: vec![business_id],
            until: None,
            projections: Vec::new(),
        }
    }

    /// Narrow to a specific set of projection names.
    pub fn only_projections(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.projections = names.into_iter().collect();
        self
    }

    /// Bound replay to events received at or before `until`.
    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }
}

/// Failure modes for a replay pass. Any failure leaves targeted projections
/// truncated but not necessarily caught back up — callers should retry the
/// whole pass rather than resume partway, since truncation already
/// invalidated their prior cursor.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The store rejected a read (e.g. became unavailable mid-pass).
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A projection's fold failed while replaying.
    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Replay the committed log into a [`ProjectionRuntime`] under a
/// replay-isolation guard, so concurrent `append` calls for the same
/// business are rejected with [`StoreError::ReplayActive`] until the pass
/// completes or panics.
///
/// Each targeted projection is rebuilt independently (§4.10): if the store
/// holds a [`Snapshot`] for `(projection_name, business_id)`, the
/// projection is `restore`d from it and only the log tail strictly after
/// `snapshot.cursor` is folded in; otherwise the projection is truncated
/// and rebuilt from genesis. Snapshot use is automatic — a caller never
/// opts in or out, it simply follows from whether `save_snapshot` was ever
/// called for that pair. Dispatch to the subscriber bus is never invoked
/// here — replay never re-notifies subscribers; only the kernel's live
/// dispatch path does that.
pub async fn replay(
    store: &dyn StorageBackend,
    runtime: &ProjectionRuntime,
    scope: ReplayScope,
) -> Result<usize, ReplayError> {
    let mut total = 0usize;
    let targets = if scope.projections.is_empty() {
        runtime.registered_names()
    } else {
        scope.projections.clone()
    };
    for business_id in &scope.business_ids {
        let _guard = store.replay_guards().enter(*business_id);

        for name in &targets {
            let snapshot = store.load_snapshot(name, *business_id, scope.until.map(cursor_bound)).await?;
            let since_cursor = match &snapshot {
                Some(snapshot) => {
                    let projection = runtime.get(name).ok_or_else(|| ProjectionError::UnknownProjection(name.clone()))?;
                    projection.restore(&snapshot.bytes)?;
                    runtime.set_cursor(name, *business_id, snapshot.cursor);
                    Some(snapshot.cursor)
                }
                None => {
                    runtime.truncate(name, Some(*business_id))?;
                    None
                }
            };

            let query = ReadQuery {
                since: None,
                until: scope.until,
                cursor: since_cursor,
                limit: None,
            };
            let events = store.read(*business_id, query).await?;
            for event in &events {
                runtime.apply_event_to(name, event)?;
            }
            total += events.len();
        }
    }
    Ok(total)
}

/// An upper-bound timestamp has no cursor tie-breaker of its own; pairing
/// it with the maximum `event_id` makes the comparison inclusive of every
/// event actually received at that instant.
fn cursor_bound(until: DateTime<Utc>) -> Cursor {
    Cursor { received_at: until, event_id: uuid::Uuid::max() }
}

/// Take a snapshot of the named projection's current state for
/// `business_id` at its current cursor, and persist it to `store`. The
/// projection must already be caught up to the cursor it is snapshotted
/// at — callers typically call this right after a live commit or a full
/// replay, never mid-fold.
pub async fn take_snapshot(
    store: &dyn StorageBackend,
    runtime: &ProjectionRuntime,
    projection_name: &str,
    business_id: BusinessId,
) -> Result<(), ReplayError> {
    let projection = runtime
        .get(projection_name)
        .ok_or_else(|| ProjectionError::UnknownProjection(projection_name.to_string()))?;
    let Some(cursor) = runtime.cursor(projection_name, business_id) else {
        return Ok(());
    };
    let bytes = projection.snapshot();
    store
        .save_snapshot(Snapshot {
            projection_name: projection_name.to_string(),
            business_id,
            cursor,
            bytes,
        })
        .await?;
    Ok(())
}
