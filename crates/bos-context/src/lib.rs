#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-context** – Injectable clock and per-request business context (C4).
//!
//! The reference kernel reads `Utc::now()` directly wherever a timestamp is
//! needed. That is fine in production but makes deterministic replay and
//! time-sensitive guard tests (rate limits, quota windows) awkward to write.
//! This crate pulls time behind a [`Clock`] trait so kernel code takes
//! `&dyn Clock` instead of calling `Utc::now()` inline, and bundles the
//! per-command actor/correlation metadata every guard and handler needs
//! into one [`BusinessContext`].

use std::sync::atomic::{AtomicI64, Ordering};

use bos_types::{ActorType, BranchId, BusinessId};
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

/// Source of the current time, injected everywhere a timestamp is needed.
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real wall-clock time, used outside tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns the same instant, for reproducible tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// A clock that advances by a fixed step every time it is read, for tests
/// that need strictly increasing but deterministic timestamps (e.g.
/// verifying `received_at` ordering without real sleeps).
#[derive(Debug)]
pub struct SteppingClock {
    start_millis: i64,
    step_millis: i64,
    ticks: AtomicI64,
}

impl SteppingClock {
    /// Build a clock starting at `start` and advancing by `step` on every
    /// `now()` call.
    pub fn new(start: DateTime<Utc>, step: chrono::Duration) -> Self {
        Self {
            start_millis: start.timestamp_millis(),
            step_millis: step.num_milliseconds(),
            ticks: AtomicI64::new(0),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst);
        let millis = self.start_millis + tick * self.step_millis;
        Utc.timestamp_millis_opt(millis).single().expect("valid timestamp")
    }
}

/// Per-command metadata threaded through the guard pipeline and handlers:
/// who is acting, on behalf of which business/branch, and how this command
/// relates to whatever caused it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusinessContext {
    /// Tenant the command targets.
    pub business_id: BusinessId,
    /// Optional branch scope within the business.
    pub branch_id: Option<BranchId>,
    /// Kind of actor issuing the command.
    pub actor_type: ActorType,
    /// Opaque actor identifier (user id, system name, device id).
    pub actor_id: String,
    /// Correlates every event produced by a single top-level request.
    pub correlation_id: String,
    /// The event (if any) whose projection caused this command to be
    /// issued.
    pub causation_id: Option<Uuid>,
}

impl BusinessContext {
    /// Start a new top-level context: generates a fresh `correlation_id`
    /// and leaves `causation_id` empty.
    pub fn new_request(business_id: BusinessId, actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            business_id,
            branch_id: None,
            actor_type,
            actor_id: actor_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
        }
    }

    /// Scope this context to a branch.
    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    /// Derive a child context caused by `event_id`, preserving the
    /// correlation id so the whole causal fan-out stays traceable to one
    /// request.
    pub fn caused_by(&self, event_id: Uuid) -> Self {
        Self {
            causation_id: Some(event_id),
            ..self.clone()
        }
    }
}
