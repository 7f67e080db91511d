#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-store-core** – Core event store abstraction for the BOS kernel (C2).
//!
//! Defines the append-only, chain-verified, tenant-isolated storage contract.
//! Concrete backends (`bos-store-memory` and friends) implement
//! [`StorageBackend`]; no backend may expose UPDATE or DELETE on a stored
//! event, only `append` (INSERT) and `read`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bos_hash::{compute_event_hash, genesis, verify_event_hash};
use bos_types::{BusinessId, Event};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// A position in a business's event log, used to resume a bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    /// Monotonic receipt timestamp assigned by the store.
    pub received_at: DateTime<Utc>,
    /// Tie-breaker for events received in the same instant.
    pub event_id: Uuid,
}

impl Cursor {
    /// Build a cursor from an already-stored event.
    pub fn of(event: &Event) -> Self {
        Self {
            received_at: event.received_at,
            event_id: event.event_id,
        }
    }
}

/// Bounds for a [`StorageBackend::read`] call.
#[derive(Debug, Clone, Default)]
pub struct ReadQuery {
    /// Only return events received at or after this bound.
    pub since: Option<DateTime<Utc>>,
    /// Only return events received at or before this bound.
    pub until: Option<DateTime<Utc>>,
    /// Resume strictly after this cursor (exclusive).
    pub cursor: Option<Cursor>,
    /// Cap the number of events returned.
    pub limit: Option<usize>,
}

/// A persisted projection checkpoint: `{projection_name, business_id,
/// cursor, bytes}` (§6.4). Snapshots are append-only per `(projection_name,
/// business_id)` pair, same as the event log itself — taking a new one
/// never overwrites an older one, it just becomes the newest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Name of the projection this snapshot captures.
    pub projection_name: String,
    /// Tenant this snapshot belongs to.
    pub business_id: BusinessId,
    /// The cursor the projection had reached when the snapshot was taken.
    pub cursor: Cursor,
    /// Opaque serialized projection state, produced by `Projection::snapshot`.
    pub bytes: Vec<u8>,
}

/// Deterministic, closed failure modes for store operations (§4.2, §7).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The batch's `previous_event_hash` did not match the tenant's current
    /// chain tip, or two events within the batch do not chain to one
    /// another.
    #[error("chain mismatch for business {0}")]
    ChainMismatch(BusinessId),
    /// `event_id` already exists with a different `event_hash`.
    #[error("idempotency conflict for event {0}")]
    IdempotencyConflict(Uuid),
    /// No `business_id` was supplied, or a batch mixed businesses.
    #[error("missing or inconsistent business_id")]
    MissingBusinessId,
    /// `append` was called while replay is active for this business.
    #[error("replay is active for business {0}; writes are forbidden")]
    ReplayActive(BusinessId),
    /// Underlying backend failed (I/O, serialization, etc).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Per-business flags coordinating replay isolation (§5, §4.10) between the
/// replay engine and every `StorageBackend`.
#[derive(Debug, Default)]
pub struct ReplayGuardRegistry {
    flags: DashMap<BusinessId, Arc<AtomicBool>>,
}

impl ReplayGuardRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, business_id: BusinessId) -> Arc<AtomicBool> {
        self.flags
            .entry(business_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// True if replay is currently active for `business_id`.
    pub fn is_active(&self, business_id: BusinessId) -> bool {
        self.flag(business_id).load(Ordering::SeqCst)
    }

    /// Mark replay active for `business_id`. The returned guard resets the
    /// flag to `false` on drop, so a panicking replay cannot wedge a
    /// business shut forever.
    pub fn enter(&self, business_id: BusinessId) -> ReplayGuard {
        let flag = self.flag(business_id);
        flag.store(true, Ordering::SeqCst);
        ReplayGuard { flag }
    }
}

/// RAII guard that clears the replay-active flag on drop.
pub struct ReplayGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for ReplayGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Per-business write serialization (§5: "one writer per business at a
/// time"). Shared between `StorageBackend` implementations so cross-tenant
/// appends never contend.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: DashMap<BusinessId, Arc<Mutex<()>>>,
}

impl TenantLocks {
    /// Construct an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the write lock for `business_id`, blocking any concurrent
    /// append for the same tenant.
    pub async fn acquire(&self, business_id: BusinessId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(business_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}

/// Append-only, chain-verified, tenant-isolated event storage (§4.2).
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Append `events` atomically; all must share `business_id`. Returns the
    /// events as actually stored: resubmitting a batch whose `event_id`s are
    /// already present with identical `event_hash` values is a no-op that
    /// returns the previously stored events, not a fresh append.
    async fn append(&self, business_id: BusinessId, events: Vec<Event>) -> Result<Vec<Event>, StoreError>;

    /// Read events for `business_id` in `(received_at ASC, event_id ASC)`
    /// order, bounded by `query`.
    async fn read(&self, business_id: BusinessId, query: ReadQuery) -> Result<Vec<Event>, StoreError>;

    /// The `event_hash` of the most recently appended event for
    /// `business_id`, or [`bos_hash::genesis`] if the chain is empty.
    async fn tip(&self, business_id: BusinessId) -> Result<String, StoreError>;

    /// Persist a new snapshot record. Append-only: an earlier snapshot for
    /// the same `(projection_name, business_id)` is never overwritten or
    /// removed, only superseded as "newest" by cursor order.
    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError>;

    /// The newest snapshot at or before `at_or_before` for
    /// `(projection_name, business_id)`, or the newest snapshot overall when
    /// `at_or_before` is `None` (§4.10 time-travel query).
    async fn load_snapshot(&self, projection_name: &str, business_id: BusinessId, at_or_before: Option<Cursor>) -> Result<Option<Snapshot>, StoreError>;

    /// Shared replay-isolation registry this backend honours (§4.10, §5).
    fn replay_guards(&self) -> &ReplayGuardRegistry;
}

/// Validate that a freshly-proposed batch chains correctly onto `tip`,
/// before a backend commits it. Shared by every backend so chain-mismatch
/// semantics are identical regardless of storage medium.
pub fn validate_batch_chain(events: &[Event], business_id: BusinessId, tip: &str) -> Result<(), StoreError> {
    let mut expected_previous = tip.to_string();
    for event in events {
        if event.business_id != business_id {
            return Err(StoreError::MissingBusinessId);
        }
        if event.previous_event_hash != expected_previous {
            return Err(StoreError::ChainMismatch(business_id));
        }
        if verify_event_hash(event).is_err() {
            return Err(StoreError::ChainMismatch(business_id));
        }
        expected_previous = event.event_hash.clone();
    }
    Ok(())
}

/// Recompute what `event`'s hash would be as the first event of a fresh
/// chain. Used by handlers composing a candidate event before the tenant's
/// current tip is known.
pub fn would_chain_from_genesis(event: &Event) -> Result<String, bos_hash::HashError> {
    let mut clone = event.clone();
    clone.previous_event_hash = genesis().to_string();
    compute_event_hash(&clone)
}
