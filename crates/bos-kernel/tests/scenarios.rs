//! Concrete end-to-end scenarios exercising the universal properties of
//! the lawful write path: genesis append, chain continuation, branch
//! scoping, cross-tenant denial, read-only mode, and projection rebuild
//! via replay.

use std::collections::HashMap;
use std::sync::Arc;

use bos_context::{Clock, SystemClock};
use bos_guard::{ActorDirectory, AnomalyDetector, BusinessStateSource, CommandClass, CommandClassRegistry, ComplianceSource, GuardPipeline, RateLimiter};
use bos_kernel::{identity, CandidateEvent, EngineHandler, HandlerRegistry, Kernel};
use bos_projection::{Projection, ProjectionRuntime};
use bos_replay::{replay, take_snapshot, ReplayScope};
use bos_resilience::ResilienceState;
use bos_store_core::ReadQuery;
use bos_store_memory::MemoryBackend;
use bos_types::{ActorType, BusinessId, Command, EventStatus, Rejection, RejectionCode};
use uuid::Uuid;

/// A minimal domain handler standing in for a branch-scoped cash engine,
/// used only to exercise the scope guard (S4) against a non-administrative
/// command type.
struct CashDrawerOpenHandler;

impl EngineHandler for CashDrawerOpenHandler {
    fn command_type(&self) -> &str {
        "cash.drawer.open"
    }

    fn handle(&self, command: &Command, _projections: &ProjectionRuntime, _clock: &dyn Clock) -> Result<Vec<CandidateEvent>, Rejection> {
        Ok(vec![CandidateEvent {
            event_type: "cash.drawer.opened.v1".to_string(),
            event_version: 1,
            branch_id: command.branch_id,
            source_engine: "cash".to_string(),
            payload: command.payload.clone(),
            reference: None,
            status: EventStatus::Final,
            correction_of: None,
        }])
    }
}

struct Wired {
    kernel: Kernel,
    business_states: Arc<identity::BusinessLifecycleProjection>,
}

/// Assembles a kernel identical to `bos_kernel::wiring::wire` but with the
/// `cash.drawer.open` command type added, so scope enforcement can be
/// exercised against a branch-required command outside the administrative
/// command set (which has none).
fn wire_with_cash_engine(store: Arc<dyn bos_store_core::StorageBackend>, bus: Arc<bos_bus::SubscriberBus>) -> Wired {
    let classes = Arc::new(CommandClassRegistry::new());
    let handlers = HandlerRegistry::new();
    for (command_type, class) in identity::builtin_command_classes() {
        classes.register(command_type, class);
    }
    classes.register("cash.drawer.open", CommandClass::standard("cash_engine").requiring_branch());
    for handler in identity::builtin_handlers() {
        handlers.register(Arc::new(handler));
    }
    handlers.register(Arc::new(CashDrawerOpenHandler));

    let business_states = Arc::new(identity::BusinessLifecycleProjection::new());
    let actors = Arc::new(identity::ActorDirectoryProjection::new());
    let compliance = Arc::new(identity::CompliancePolicyProjection::new());
    let branches = Arc::new(identity::BranchDirectoryProjection::new());
    let resilience = Arc::new(ResilienceState::new(["identity.business.create".to_string(), "identity.actor.register".to_string()]));

    let projections = Arc::new(ProjectionRuntime::new());
    projections.register(business_states.clone());
    projections.register(actors.clone());
    projections.register(compliance.clone());
    projections.register(branches.clone());

    let rate_limiter = RateLimiter::new(HashMap::new(), (120, chrono::Duration::minutes(1)));
    let anomaly = AnomalyDetector::new(20, chrono::Duration::minutes(5));

    let guards = GuardPipeline::new(
        classes,
        actors.clone() as Arc<dyn ActorDirectory>,
        business_states.clone() as Arc<dyn BusinessStateSource>,
        resilience.clone(),
        compliance.clone() as Arc<dyn ComplianceSource>,
        branches.clone() as Arc<dyn bos_guard::BranchDirectory>,
        rate_limiter,
        anomaly,
    );

    let kernel = Kernel::new(store, handlers, guards, projections, bus, resilience, Arc::new(SystemClock), None);
    Wired { kernel, business_states }
}

fn command(business_id: BusinessId, command_type: &str, actor_id: &str, payload: serde_json::Value) -> Command {
    Command {
        command_id: Uuid::new_v4(),
        command_type: command_type.to_string(),
        business_id,
        branch_id: None,
        actor_type: ActorType::Human,
        actor_id: actor_id.to_string(),
        correlation_id: None,
        issued_at: chrono::Utc::now(),
        payload,
        source_engine: "cash".to_string(),
        idempotency_key: None,
    }
}

async fn onboard(kernel: &Kernel, business_id: BusinessId, owner: &str) {
    let mut create = command(business_id, "identity.business.create", "bootstrap", serde_json::json!({"name": "Acme"}));
    create.actor_type = ActorType::System;
    create.actor_id = "bootstrap".to_string();
    assert!(kernel.submit(create).await.is_accepted());

    let mut register = command(business_id, "identity.actor.register", "bootstrap", serde_json::json!({"actor_type": "HUMAN", "actor_id": owner}));
    register.actor_type = ActorType::System;
    register.actor_id = "bootstrap".to_string();
    assert!(kernel.submit(register).await.is_accepted());

    let activate = command(business_id, "identity.business.activate", owner, serde_json::json!({}));
    assert!(kernel.submit(activate).await.is_accepted());
}

#[tokio::test]
async fn s1_s2_genesis_append_and_chain_continuation() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store, bus);
    let business_id = BusinessId::new();

    let create = command(business_id, "identity.business.create", "bootstrap", serde_json::json!({"name": "Acme"}));
    let outcome = wired.kernel.submit(create).await;
    let genesis_event = match outcome {
        bos_types::Outcome::Accepted { events } => events.into_iter().next().unwrap(),
        other => panic!("expected Accepted, got {other:?}"),
    };
    assert_eq!(genesis_event.previous_event_hash, "GENESIS");
    assert!(!genesis_event.event_hash.is_empty());

    let register = command(business_id, "identity.actor.register", "bootstrap", serde_json::json!({"actor_type": "HUMAN", "actor_id": "owner-1"}));
    let outcome = wired.kernel.submit(register).await;
    let next_event = match outcome {
        bos_types::Outcome::Accepted { events } => events.into_iter().next().unwrap(),
        other => panic!("expected Accepted, got {other:?}"),
    };
    assert_eq!(next_event.previous_event_hash, genesis_event.event_hash);
}

#[tokio::test]
async fn s4_branch_required_rejection() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store, bus);
    let business_id = BusinessId::new();
    onboard(&wired.kernel, business_id, "owner-1").await;
    let enable_cash = command(business_id, "resilience.feature_flag.set", "owner-1", serde_json::json!({"feature_key": "cash_engine", "enabled": true}));
    assert!(wired.kernel.submit(enable_cash).await.is_accepted());

    let open_no_branch = command(business_id, "cash.drawer.open", "owner-1", serde_json::json!({}));
    let outcome = wired.kernel.submit(open_no_branch).await;
    match outcome {
        bos_types::Outcome::Rejected { error } => {
            assert_eq!(error.code, RejectionCode::BranchRequiredMissing);
            assert_eq!(error.policy_name, "scope_guard");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn s5_cross_tenant_deny() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store, bus);
    let business_a = BusinessId::new();
    let business_b = BusinessId::new();
    onboard(&wired.kernel, business_a, "owner-1").await;
    onboard(&wired.kernel, business_b, "owner-2").await;

    let command_against_b = command(business_b, "identity.consent.grant", "owner-1", serde_json::json!({"actor_id": "owner-1", "scope": "marketing"}));
    let outcome = wired.kernel.submit(command_against_b).await;
    match outcome {
        bos_types::Outcome::Rejected { error } => assert_eq!(error.code, RejectionCode::ActorUnauthorizedBusiness),
        other => panic!("expected Rejected, got {other:?}"),
    }
}

#[tokio::test]
async fn s6_read_only_mode_blocks_mutation_but_not_reads() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store, bus);
    let business_id = BusinessId::new();
    onboard(&wired.kernel, business_id, "owner-1").await;

    let set_read_only = command(business_id, "resilience.mode.set", "owner-1", serde_json::json!({"mode": "READ_ONLY"}));
    assert!(wired.kernel.submit(set_read_only).await.is_accepted());

    let grant = command(business_id, "identity.consent.grant", "owner-1", serde_json::json!({"actor_id": "owner-1", "scope": "marketing"}));
    let outcome = wired.kernel.submit(grant).await;
    match outcome {
        bos_types::Outcome::Rejected { error } => assert_eq!(error.code, RejectionCode::ReadOnlyMode),
        other => panic!("expected Rejected, got {other:?}"),
    }

    let log = wired.kernel.read(business_id, ReadQuery::default()).await.unwrap();
    assert!(!log.is_empty(), "reads must still succeed in read-only mode");
}

#[tokio::test]
async fn s7_full_rebuild_from_scratch_matches_pre_wipe_state() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store.clone(), bus);
    let business_id = BusinessId::new();
    onboard(&wired.kernel, business_id, "owner-1").await;

    let consent = command(business_id, "identity.consent.grant", "owner-1", serde_json::json!({"actor_id": "owner-1", "scope": "marketing"}));
    assert!(wired.kernel.submit(consent).await.is_accepted());

    let projections = wired.kernel.projections();
    let before = wired.business_states.snapshot();

    projections.truncate("business_lifecycle", Some(business_id)).unwrap();
    assert_ne!(wired.business_states.snapshot(), before, "truncate must actually reset state before replay");

    replay(store.as_ref(), projections, ReplayScope::business(business_id)).await.unwrap();

    assert_eq!(wired.business_states.snapshot(), before, "replay must reconstruct the same projection state that existed before the wipe");
}

#[tokio::test]
async fn s8_replay_resumes_from_a_persisted_snapshot() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store.clone(), bus);
    let business_id = BusinessId::new();
    onboard(&wired.kernel, business_id, "owner-1").await;

    let projections = wired.kernel.projections();
    take_snapshot(store.as_ref(), projections, "business_lifecycle", business_id).await.unwrap();
    let snapshotted = wired.business_states.snapshot();

    let suspend = command(business_id, "identity.business.suspend", "owner-1", serde_json::json!({"reason": "review"}));
    assert!(wired.kernel.submit(suspend).await.is_accepted());
    let before_wipe = wired.business_states.snapshot();
    assert_ne!(before_wipe, snapshotted, "the command issued after the snapshot must have changed projection state");

    projections.truncate("business_lifecycle", Some(business_id)).unwrap();

    let replayed = replay(store.as_ref(), projections, ReplayScope::business(business_id).only_projections(["business_lifecycle".to_string()]))
        .await
        .unwrap();

    assert_eq!(replayed, 1, "only the command issued after the snapshot should be read from the log");
    assert_eq!(wired.business_states.snapshot(), before_wipe, "resuming from the snapshot must land on the same state as a from-scratch rebuild");
}

#[tokio::test]
async fn s9_branch_scoped_command_requires_an_open_registered_branch() {
    let store = Arc::new(MemoryBackend::new());
    let bus = Arc::new(bos_bus::SubscriberBus::new(64));
    let wired = wire_with_cash_engine(store, bus);
    let business_id = BusinessId::new();
    onboard(&wired.kernel, business_id, "owner-1").await;
    let enable_cash = command(business_id, "resilience.feature_flag.set", "owner-1", serde_json::json!({"feature_key": "cash_engine", "enabled": true}));
    assert!(wired.kernel.submit(enable_cash).await.is_accepted());

    let branch_id = Uuid::new_v4();
    let open_unregistered = {
        let mut c = command(business_id, "cash.drawer.open", "owner-1", serde_json::json!({}));
        c.branch_id = Some(bos_types::BranchId(branch_id));
        c
    };
    let outcome = wired.kernel.submit(open_unregistered).await;
    match outcome {
        bos_types::Outcome::Rejected { error } => {
            assert_eq!(error.code, RejectionCode::BranchNotInBusiness);
            assert_eq!(error.policy_name, "scope_guard");
        }
        other => panic!("expected Rejected, got {other:?}"),
    }

    let add_branch = command(business_id, "identity.branch.add", "owner-1", serde_json::json!({"branch_id": branch_id.to_string()}));
    assert!(wired.kernel.submit(add_branch).await.is_accepted());

    let open_registered = {
        let mut c = command(business_id, "cash.drawer.open", "owner-1", serde_json::json!({}));
        c.branch_id = Some(bos_types::BranchId(branch_id));
        c
    };
    assert!(wired.kernel.submit(open_registered).await.is_accepted());

    let close_branch = command(business_id, "identity.branch.close", "owner-1", serde_json::json!({"branch_id": branch_id.to_string()}));
    assert!(wired.kernel.submit(close_branch).await.is_accepted());

    let open_after_close = {
        let mut c = command(business_id, "cash.drawer.open", "owner-1", serde_json::json!({}));
        c.branch_id = Some(bos_types::BranchId(branch_id));
        c
    };
    let outcome = wired.kernel.submit(open_after_close).await;
    match outcome {
        bos_types::Outcome::Rejected { error } => assert_eq!(error.code, RejectionCode::BranchNotInBusiness),
        other => panic!("expected Rejected, got {other:?}"),
    }
}
