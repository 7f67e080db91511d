#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-store-memory** – In-memory event store driver for the BOS kernel.
//!
//! Fast, non-persistent implementation of [`StorageBackend`] suitable for
//! tests, demos, and development. All data is lost when the process exits.
//! Also exposes a live broadcast stream of committed events, used by
//! `bos-bus` to drive post-commit subscribers without re-reading storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bos_hash::genesis;
use bos_store_core::{validate_batch_chain, Cursor, ReadQuery, ReplayGuardRegistry, Snapshot, StorageBackend, StoreError, TenantLocks};
use bos_types::{BusinessId, Event};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Default buffer size for the live event broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

/// Strictly-increasing nanosecond-resolution timestamp source, owned by the
/// store so `received_at` reflects true append order even when two appends
/// land in the same clock tick (§3: "assigned by the store on append",
/// §8 property 2 depends on `received_at` never ties across events).
#[derive(Debug, Default)]
struct MonotonicReceiptClock {
    last_nanos: AtomicI64,
}

impl MonotonicReceiptClock {
    fn next(&self) -> DateTime<Utc> {
        let wall_nanos = Utc::now().timestamp_nanos_opt().unwrap_or(0);
        let mut prev = self.last_nanos.load(Ordering::SeqCst);
        loop {
            let candidate = wall_nanos.max(prev + 1);
            match self.last_nanos.compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return DateTime::<Utc>::from_timestamp_nanos(candidate),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// An in-memory, non-persistent, chain-verified event store.
#[derive(Debug)]
pub struct MemoryBackend {
    chains: RwLock<HashMap<BusinessId, Vec<Event>>>,
    by_id: RwLock<HashMap<Uuid, Event>>,
    snapshots: RwLock<HashMap<(String, BusinessId), Vec<Snapshot>>>,
    tenant_locks: TenantLocks,
    replay_guards: ReplayGuardRegistry,
    broadcast_tx: broadcast::Sender<Event>,
    receipt_clock: MonotonicReceiptClock,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a new, empty memory backend with the default broadcast buffer.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// Creates a new memory backend with a custom broadcast buffer size.
    ///
    /// The buffer determines how many committed events can queue for slow
    /// subscribers before the oldest are dropped from the live stream; a
    /// lagging subscriber must fall back to `read` to catch up.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer_size);
        Self {
            chains: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            tenant_locks: TenantLocks::new(),
            replay_guards: ReplayGuardRegistry::new(),
            broadcast_tx,
            receipt_clock: MonotonicReceiptClock::default(),
        }
    }

    /// Subscribe to the live stream of committed events across all tenants.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.broadcast_tx.subscribe()
    }

    /// Total number of events stored across every business.
    pub async fn event_count(&self) -> usize {
        self.by_id.read().await.len()
    }

    /// Drop all stored events. Testing/development only.
    pub async fn clear(&self) {
        self.chains.write().await.clear();
        self.by_id.write().await.clear();
    }

    /// Check whether `events` are an exact idempotent resubmission of an
    /// already-stored batch. Returns `Some(stored)` if every event_id is
    /// already present with a matching `event_hash`, an error if any
    /// event_id is present with a *different* hash, or `None` if none of
    /// the event_ids have been seen before.
    async fn check_idempotency(&self, events: &[Event]) -> Result<Option<Vec<Event>>, StoreError> {
        let by_id = self.by_id.read().await;
        let mut seen_count = 0usize;
        let mut stored = Vec::with_capacity(events.len());
        for event in events {
            match by_id.get(&event.event_id) {
                Some(existing) if existing.event_hash == event.event_hash => {
                    seen_count += 1;
                    stored.push(existing.clone());
                }
                Some(_) => return Err(StoreError::IdempotencyConflict(event.event_id)),
                None => stored.push(event.clone()),
            }
        }
        if seen_count == events.len() {
            Ok(Some(stored))
        } else if seen_count == 0 {
            Ok(None)
        } else {
            // Partial overlap: some events in this batch were already
            // committed, some were not. The batch cannot be replayed
            // atomically without re-deriving which half is new, so treat
            // it as a conflict rather than guess.
            Err(StoreError::IdempotencyConflict(events[0].event_id))
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn append(&self, business_id: BusinessId, events: Vec<Event>) -> Result<Vec<Event>, StoreError> {
        if events.is_empty() {
            return Ok(Vec::new());
        }
        if self.replay_guards.is_active(business_id) {
            return Err(StoreError::ReplayActive(business_id));
        }

        let _write_guard = self.tenant_locks.acquire(business_id).await;

        if let Some(stored) = self.check_idempotency(&events).await? {
            return Ok(stored);
        }

        let mut chains = self.chains.write().await;
        let chain = chains.entry(business_id).or_default();
        let tip = chain
            .last()
            .map(|e| e.event_hash.clone())
            .unwrap_or_else(|| genesis().to_string());
        validate_batch_chain(&events, business_id, &tip)?;

        // `received_at` is assigned here, by the store, from its own
        // monotonic clock rather than trusted from the caller — it plays no
        // part in `event_hash` (see `bos_hash::StableHeader`), so
        // overwriting it now cannot invalidate the chain just verified
        // above.
        let mut events = events;
        for event in &mut events {
            event.received_at = self.receipt_clock.next();
        }

        let mut by_id = self.by_id.write().await;
        for event in &events {
            by_id.insert(event.event_id, event.clone());
        }
        chain.extend(events.iter().cloned());
        drop(by_id);
        drop(chains);

        for event in &events {
            let _ = self.broadcast_tx.send(event.clone());
        }
        Ok(events)
    }

    async fn read(&self, business_id: BusinessId, query: ReadQuery) -> Result<Vec<Event>, StoreError> {
        let chains = self.chains.read().await;
        let Some(chain) = chains.get(&business_id) else {
            return Ok(Vec::new());
        };

        let mut result: Vec<Event> = chain
            .iter()
            .filter(|e| query.since.map(|s| e.received_at >= s).unwrap_or(true))
            .filter(|e| query.until.map(|u| e.received_at <= u).unwrap_or(true))
            .filter(|e| {
                query
                    .cursor
                    .map(|c| (e.received_at, e.event_id) > (c.received_at, c.event_id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        result.sort_by_key(|e| (e.received_at, e.event_id));
        if let Some(limit) = query.limit {
            result.truncate(limit);
        }
        Ok(result)
    }

    async fn tip(&self, business_id: BusinessId) -> Result<String, StoreError> {
        let chains = self.chains.read().await;
        Ok(chains
            .get(&business_id)
            .and_then(|chain| chain.last())
            .map(|e| e.event_hash.clone())
            .unwrap_or_else(|| genesis().to_string()))
    }

    async fn save_snapshot(&self, snapshot: Snapshot) -> Result<(), StoreError> {
        let key = (snapshot.projection_name.clone(), snapshot.business_id);
        self.snapshots.write().await.entry(key).or_default().push(snapshot);
        Ok(())
    }

    async fn load_snapshot(&self, projection_name: &str, business_id: BusinessId, at_or_before: Option<Cursor>) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        let key = (projection_name.to_string(), business_id);
        let Some(entries) = snapshots.get(&key) else {
            return Ok(None);
        };
        Ok(entries
            .iter()
            .filter(|s| at_or_before.map(|bound| s.cursor <= bound).unwrap_or(true))
            .max_by_key(|s| s.cursor)
            .cloned())
    }

    fn replay_guards(&self) -> &ReplayGuardRegistry {
        &self.replay_guards
    }
}
