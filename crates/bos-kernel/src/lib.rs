#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-kernel** – The command bus & dispatcher (C6): the single lawful
//! write path of the BOS kernel.
//!
//! [`Kernel::submit`] runs every command through the exact nine-step
//! sequence: resolve handler, build context, run the guard pipeline,
//! invoke the pure engine handler, hash and append the candidate events,
//! fold them into projections, return `Accepted`, then hand the batch to
//! the subscriber bus: capability check, dispatch, publish, generalized
//! from a single global world-state to per-tenant projections and from a
//! static opcode table to an instance-owned [`HandlerRegistry`], the same
//! move `bos-registry` already made for event-type descriptors.

pub mod identity;

use std::sync::Arc;

use bos_audit::{AiDecisionEntry, AuditEntry, ConsentRecord, DecisionJournal};
use bos_bus::{DispatchReport, SubscriberBus};
use bos_context::Clock;
use bos_guard::{ActorDirectory, BusinessStateSource, CommandClassRegistry, GuardPipeline};
use bos_hash::compute_event_hash;
use bos_projection::ProjectionRuntime;
use bos_resilience::ResilienceState;
use bos_store_core::{ReadQuery, StorageBackend, StoreError};
use bos_types::{BranchId, BusinessId, Command, Event, EventStatus, Outcome, Reference, Rejection, RejectionCode};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Every field of a would-be event except the ones only the kernel itself
/// may assign: `event_id`, tenant/actor/causal metadata, timestamps, and
/// the hash chain. An engine handler returns these; the kernel completes
/// them into full [`Event`]s (§4.6 step 5).
#[derive(Debug, Clone)]
pub struct CandidateEvent {
    /// Dotted event type; must be registered in the event type registry.
    pub event_type: String,
    /// Payload schema version.
    pub event_version: u32,
    /// Optional branch scope, usually copied from the triggering command.
    pub branch_id: Option<BranchId>,
    /// Engine that produced this candidate.
    pub source_engine: String,
    /// Structured payload.
    pub payload: serde_json::Value,
    /// Optional pointer to the domain object this event concerns.
    pub reference: Option<Reference>,
    /// Lifecycle status to stamp on the resulting event.
    pub status: EventStatus,
    /// Optional id of the event this one corrects.
    pub correction_of: Option<Uuid>,
}

/// A pure translation from one command type to zero or more candidate
/// events. Must not mutate external state, read wall-clock time directly,
/// use randomness, or call another engine (§4.6 step 4); the only inputs
/// are the command itself, a read-only projection view, and the injected
/// clock.
pub trait EngineHandler: Send + Sync {
    /// The `command_type` this handler answers for.
    fn command_type(&self) -> &str;

    /// Produce the candidate events this command should append, or a
    /// rejection raised by the engine's own domain logic (distinct from a
    /// guard rejection, which never reaches the handler).
    fn handle(&self, command: &Command, projections: &ProjectionRuntime, clock: &dyn Clock) -> Result<Vec<CandidateEvent>, Rejection>;
}

/// Instance-owned `command_type -> handler` table, replacing a global
/// lazily-initialized lock-guarded map with a value owned by each kernel.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn EngineHandler>>,
}

impl HandlerRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own declared `command_type`.
    pub fn register(&self, handler: Arc<dyn EngineHandler>) {
        self.handlers.insert(handler.command_type().to_string(), handler);
    }

    /// Look up the handler for `command_type`.
    pub fn lookup(&self, command_type: &str) -> Option<Arc<dyn EngineHandler>> {
        self.handlers.get(command_type).map(|h| h.clone())
    }
}

/// Wiring for the whole lawful write path. One instance serves every
/// tenant; per-tenant isolation lives inside the store and the projections.
pub struct Kernel {
    store: Arc<dyn StorageBackend>,
    handlers: HandlerRegistry,
    guards: GuardPipeline,
    projections: Arc<ProjectionRuntime>,
    bus: Arc<SubscriberBus>,
    resilience: Arc<ResilienceState>,
    clock: Arc<dyn Clock>,
    journal: Option<Arc<dyn DecisionJournal>>,
    idempotency: DashMap<(BusinessId, String), Outcome>,
}

impl Kernel {
    /// Assemble a kernel from its wired components. Use
    /// [`identity::builtin_command_classes`] and [`identity::builtin_handlers`]
    /// to populate `classes`/`handlers` with the built-in administrative
    /// command set before passing `classes` on into the [`GuardPipeline`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn StorageBackend>,
        handlers: HandlerRegistry,
        guards: GuardPipeline,
        projections: Arc<ProjectionRuntime>,
        bus: Arc<SubscriberBus>,
        resilience: Arc<ResilienceState>,
        clock: Arc<dyn Clock>,
        journal: Option<Arc<dyn DecisionJournal>>,
    ) -> Self {
        Self {
            store,
            handlers,
            guards,
            projections,
            bus,
            resilience,
            clock,
            journal,
            idempotency: DashMap::new(),
        }
    }

    /// The single lawful write path (§4.6).
    pub async fn submit(&self, command: Command) -> Outcome {
        // Step 1: resolve handler.
        let Some(handler) = self.handlers.lookup(&command.command_type) else {
            let rejection = Rejection::new(RejectionCode::UnknownCommand, "dispatcher", format!("no handler registered for command type: {}", command.command_type));
            self.record_rejection(&command, &rejection).await;
            return Outcome::Rejected { error: rejection };
        };

        // Idempotency short-circuit: a prior identical key returns the
        // prior outcome unchanged, without re-running guards or the
        // handler (§4.6 step 6, interpreted as a dispatcher-level cache
        // keyed on `idempotency_key` rather than a per-event check, since
        // the key belongs to the command, not to any one candidate event).
        if let Some(key) = &command.idempotency_key {
            if let Some(prior) = self.idempotency.get(&(command.business_id, key.clone())) {
                return prior.clone();
            }
        }

        // Step 2: build context (correlation id resolved, fresh if absent).
        let now = self.clock.now();

        // Step 3: guard pipeline.
        if let Err(rejection) = self.guards.evaluate(&command, now) {
            self.record_rejection(&command, &rejection).await;
            return Outcome::Rejected { error: rejection };
        }

        // Step 4: invoke the pure engine handler.
        let candidates = match handler.handle(&command, &self.projections, self.clock.as_ref()) {
            Ok(candidates) => candidates,
            Err(rejection) => {
                self.record_rejection(&command, &rejection).await;
                return Outcome::Rejected { error: rejection };
            }
        };

        let correlation_id = command.correlation_id.clone().unwrap_or_else(|| command.command_id.to_string());

        // Step 5: hash-chain the candidates against the current tip.
        let events = match self.build_chain(&command, candidates, &correlation_id, now).await {
            Ok(events) => events,
            Err(rejection) => {
                self.record_rejection(&command, &rejection).await;
                return Outcome::Rejected { error: rejection };
            }
        };

        // Step 6: atomic append.
        let stored = match self.store.append(command.business_id, events).await {
            Ok(stored) => stored,
            Err(err) => {
                let rejection = map_store_error(err);
                self.record_rejection(&command, &rejection).await;
                return Outcome::Rejected { error: rejection };
            }
        };

        // Step 7: fold into projections. Resilience mode/feature-flag state
        // is folded directly rather than through the projection runtime:
        // it is consulted by the guard pipeline on every command, ahead of
        // any engine handler, so it is kept as a standalone structure
        // instead of a registered `Projection`.
        if let Err(err) = self.projections.apply_batch(&stored) {
            tracing::error!(error = %err, "projection fold failed for a committed batch; the log remains authoritative");
        }
        for event in &stored {
            self.resilience.apply_event(event);
        }

        self.record_decisions(&stored).await;

        // Step 8: build the outcome.
        let outcome = Outcome::Accepted { events: stored.clone() };
        if let Some(key) = command.idempotency_key {
            self.idempotency.insert((command.business_id, key), outcome.clone());
        }

        // Step 9: post-commit fan-out; subscriber failures never roll back
        // the commit already recorded above.
        let report: DispatchReport = self.bus.dispatch(&stored);
        for failure in report.failures() {
            tracing::warn!(subscriber = %failure.subscriber, event_id = %failure.event_id, message = %failure.message, "subscriber failed after commit");
        }

        outcome
    }

    async fn build_chain(&self, command: &Command, candidates: Vec<CandidateEvent>, correlation_id: &str, now: DateTime<Utc>) -> Result<Vec<Event>, Rejection> {
        let mut tip = self
            .store
            .tip(command.business_id)
            .await
            .map_err(map_store_error)?;
        let mut events = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let mut event = Event {
                event_id: Uuid::new_v4(),
                event_type: candidate.event_type,
                event_version: candidate.event_version,
                business_id: command.business_id,
                branch_id: candidate.branch_id,
                source_engine: candidate.source_engine,
                actor_type: command.actor_type,
                actor_id: command.actor_id.clone(),
                correlation_id: correlation_id.to_string(),
                causation_id: None,
                payload: candidate.payload,
                reference: candidate.reference,
                created_at: now,
                received_at: now,
                status: candidate.status,
                correction_of: candidate.correction_of,
                previous_event_hash: tip.clone(),
                event_hash: String::new(),
            };
            event.validate().map_err(|e| Rejection::new(RejectionCode::InvalidCommandStructure, "dispatcher", e.to_string()))?;
            event.event_hash = compute_event_hash(&event).map_err(|e| Rejection::new(RejectionCode::GuardInternalError, "dispatcher", e.to_string()))?;
            tip = event.event_hash.clone();
            events.push(event);
        }
        Ok(events)
    }

    /// Emit a `rejection.recorded.v1` event into the business's own chain
    /// when that business has opted in via the `audit_rejections` feature
    /// flag, so rejections are themselves auditable (§4.6). Best-effort:
    /// failure to record never changes the rejection already returned to
    /// the caller.
    async fn record_rejection(&self, command: &Command, rejection: &Rejection) {
        if let Some(journal) = &self.journal {
            if self.resilience.feature_enabled(command.business_id, "audit_rejections") {
                let _ = journal
                    .record_audit(AuditEntry {
                        id: Uuid::new_v4(),
                        business_id: command.business_id,
                        category: "rejection".to_string(),
                        message: rejection.message.clone(),
                        details: Some(serde_json::json!({
                            "command_type": command.command_type,
                            "code": rejection.code,
                            "policy_name": rejection.policy_name,
                        })),
                        recorded_at: self.clock.now(),
                    })
                    .await;
            }
        }
    }

    /// Mirror consent and AI-decision events into the decision journal as
    /// they commit, so `bos-audit`'s read side stays current without a
    /// separate subscriber wiring for every built-in administrative event.
    async fn record_decisions(&self, events: &[Event]) {
        let Some(journal) = &self.journal else { return };
        for event in events {
            match event.event_type.as_str() {
                "identity.consent.granted.v1" | "identity.consent.revoked.v1" => {
                    if let (Some(actor_id), Some(scope)) = (
                        event.payload.get("actor_id").and_then(|v| v.as_str()),
                        event.payload.get("scope").and_then(|v| v.as_str()),
                    ) {
                        let record = if event.event_type == "identity.consent.granted.v1" {
                            ConsentRecord::grant(event.business_id, actor_id, scope, event.received_at)
                        } else {
                            ConsentRecord::revoke(event.business_id, actor_id, scope, event.received_at)
                        };
                        let _ = journal.record_consent(record).await;
                    }
                }
                "ai.decision.recorded.v1" => {
                    if let Ok(entry) = serde_json::from_value::<AiDecisionPayload>(event.payload.clone()) {
                        let _ = journal
                            .record_ai_decision(AiDecisionEntry {
                                id: event.event_id,
                                business_id: event.business_id,
                                actor_id: event.actor_id.clone(),
                                mode: entry.mode,
                                advisory_payload: entry.advisory_payload,
                                outcome: entry.outcome,
                                recorded_at: event.received_at,
                            })
                            .await;
                    }
                }
                _ => {}
            }
        }
    }

    /// Read the committed log for `business_id`, for callers (tests, CLI
    /// inspection) that need it outside of a projection.
    pub async fn read(&self, business_id: BusinessId, query: ReadQuery) -> Result<Vec<Event>, StoreError> {
        self.store.read(business_id, query).await
    }

    /// The backing store, for callers driving a rebuild via
    /// `bos_replay::replay` against this kernel's own log and projections.
    pub fn store(&self) -> &Arc<dyn StorageBackend> {
        &self.store
    }

    /// The live projection runtime, shared with every guard source that
    /// doubles as a projection (see [`identity`]).
    pub fn projections(&self) -> &Arc<ProjectionRuntime> {
        &self.projections
    }
}

#[derive(Debug, serde::Deserialize)]
struct AiDecisionPayload {
    mode: bos_audit::AiDecisionMode,
    advisory_payload: serde_json::Value,
    outcome: String,
}

fn map_store_error(err: StoreError) -> Rejection {
    match err {
        StoreError::ChainMismatch(_) => Rejection::new(RejectionCode::ChainMismatch, "store", err.to_string()),
        StoreError::IdempotencyConflict(_) => Rejection::new(RejectionCode::IdempotencyConflict, "store", err.to_string()),
        StoreError::MissingBusinessId => Rejection::new(RejectionCode::MissingBusinessId, "store", err.to_string()),
        StoreError::ReplayActive(_) => Rejection::new(RejectionCode::ReadOnlyMode, "store", err.to_string()),
        StoreError::Unavailable(_) => Rejection::new(RejectionCode::StoreUnavailable, "store", err.to_string()),
    }
}

/// Helper namespace for wiring a fresh [`Kernel`] with the built-in
/// administrative command set already registered, used by `bos-cli` and
/// by integration tests that don't need a custom guard assembly.
pub mod wiring {
    use super::*;
    use bos_guard::{AnomalyDetector, RateLimiter};
    use std::collections::HashMap;

    /// Everything a caller needs to both construct a [`Kernel`] and read
    /// back the administrative projections it wired in (e.g. to seed a
    /// business's compliance profile before issuing commands against it).
    pub struct Wired {
        /// The assembled kernel.
        pub kernel: Kernel,
        /// Business lifecycle state, shared with the guard pipeline.
        pub business_states: Arc<identity::BusinessLifecycleProjection>,
        /// Actor directory, shared with the guard pipeline.
        pub actors: Arc<identity::ActorDirectoryProjection>,
        /// Compliance profiles, shared with the guard pipeline.
        pub compliance: Arc<identity::CompliancePolicyProjection>,
        /// Branch lifecycle state, shared with the guard pipeline.
        pub branches: Arc<identity::BranchDirectoryProjection>,
        /// API-key lifecycle state (create/revoke/rotate), for
        /// administrative listing. Not consulted by the guard pipeline:
        /// request-time bearer-token verification lives in the adapter
        /// layer, not the kernel.
        pub api_keys: Arc<identity::ApiKeyDirectoryProjection>,
        /// Resilience mode and feature flags, shared with the guard pipeline.
        pub resilience: Arc<ResilienceState>,
    }

    /// Assemble a kernel with the built-in administrative engine installed
    /// and no domain-specific rate-limit tiers (every actor type shares
    /// `default_tier`).
    pub fn wire(store: Arc<dyn StorageBackend>, bus: Arc<SubscriberBus>, clock: Arc<dyn Clock>, journal: Option<Arc<dyn DecisionJournal>>) -> Wired {
        let classes = Arc::new(CommandClassRegistry::new());
        let handlers = HandlerRegistry::new();
        for (command_type, class) in identity::builtin_command_classes() {
            classes.register(command_type, class);
        }
        for handler in identity::builtin_handlers() {
            handlers.register(Arc::new(handler));
        }

        let business_states = Arc::new(identity::BusinessLifecycleProjection::new());
        let actors = Arc::new(identity::ActorDirectoryProjection::new());
        let compliance = Arc::new(identity::CompliancePolicyProjection::new());
        let branches = Arc::new(identity::BranchDirectoryProjection::new());
        let api_keys = Arc::new(identity::ApiKeyDirectoryProjection::new());
        let resilience = Arc::new(ResilienceState::new(["identity.business.create".to_string(), "identity.actor.register".to_string()]));

        let projections = Arc::new(ProjectionRuntime::new());
        projections.register(business_states.clone());
        projections.register(actors.clone());
        projections.register(compliance.clone());
        projections.register(branches.clone());
        projections.register(api_keys.clone());

        let rate_limiter = RateLimiter::new(HashMap::new(), (120, chrono::Duration::minutes(1)));
        let anomaly = AnomalyDetector::new(20, chrono::Duration::minutes(5));

        let guards = GuardPipeline::new(
            classes,
            actors.clone() as Arc<dyn ActorDirectory>,
            business_states.clone() as Arc<dyn BusinessStateSource>,
            resilience.clone(),
            compliance.clone() as Arc<dyn bos_guard::ComplianceSource>,
            branches.clone() as Arc<dyn bos_guard::BranchDirectory>,
            rate_limiter,
            anomaly,
        );

        let kernel = Kernel::new(store, handlers, guards, projections, bus, resilience.clone(), clock, journal);

        Wired {
            kernel,
            business_states,
            actors,
            compliance,
            branches,
            api_keys,
            resilience,
        }
    }
}
