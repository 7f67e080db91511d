#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-guard** – The ten-guard fail-closed pipeline (C5).
//!
//! Every command runs through [`GuardPipeline::evaluate`] before it reaches
//! an engine handler. Guards run in a fixed order and short-circuit on the
//! first rejection; any unexpected internal failure (a panic inside a
//! guard, a poisoned lookup) is caught and converted into
//! `GUARD_INTERNAL_ERROR` rather than propagated: a fail-closed posture
//! toward lock poisoning and panics alike.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use bos_policy::{evaluate_profile, ComplianceProfile};
use bos_resilience::{ResilienceMode, ResilienceState};
use bos_types::{ActorType, BranchId, BusinessId, Command, Rejection, RejectionCode};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Whether a command class may be issued against the whole business or
/// must declare a specific branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRequirement {
    /// Any branch, or none, is acceptable.
    BusinessAllowed,
    /// `branch_id` must be present.
    BranchRequired,
}

/// Guard-relevant metadata about one `command_type`.
#[derive(Debug, Clone)]
pub struct CommandClass {
    /// Scope this command class declares.
    pub scope: ScopeRequirement,
    /// Whether an authorized actor must be present.
    pub actor_required: bool,
    /// Feature flag key that must be `ENABLED` for this command to pass.
    pub feature_key: String,
    /// Whether this command class may run while the business is still
    /// `CREATED` (setup commands), not yet `ACTIVE`.
    pub allowed_while_created: bool,
    /// Whether the tenant-isolation guard (#6) applies to this command
    /// class. Bootstrap commands that create a business or register its
    /// first actor run before any actor-to-business grant exists, so they
    /// opt out; every ordinary command class stays scoped.
    pub tenant_scoped: bool,
}

impl CommandClass {
    /// A standard command class: business-scoped, actor required, gated by
    /// `feature_key`, usable only once the business is `ACTIVE`.
    pub fn standard(feature_key: impl Into<String>) -> Self {
        Self {
            scope: ScopeRequirement::BusinessAllowed,
            actor_required: true,
            feature_key: feature_key.into(),
            allowed_while_created: false,
            tenant_scoped: true,
        }
    }

    /// Mark this class as requiring a `branch_id`.
    pub fn requiring_branch(mut self) -> Self {
        self.scope = ScopeRequirement::BranchRequired;
        self
    }

    /// Mark this class as usable during business setup (state `CREATED`).
    pub fn allowed_during_setup(mut self) -> Self {
        self.allowed_while_created = true;
        self
    }

    /// Mark this class as not requiring an authorized actor (rare; only
    /// for fully-automated system-issued commands).
    pub fn without_actor_requirement(mut self) -> Self {
        self.actor_required = false;
        self
    }

    /// Exempt this class from the tenant-isolation guard (#6). Only
    /// appropriate for bootstrap commands issued before any actor-to-
    /// business grant can exist yet.
    pub fn unscoped(mut self) -> Self {
        self.tenant_scoped = false;
        self
    }
}

/// Instance-owned table of `command_type -> CommandClass`.
#[derive(Debug, Default)]
pub struct CommandClassRegistry {
    classes: DashMap<String, CommandClass>,
}

impl CommandClassRegistry {
    /// Construct an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the guard metadata for `command_type`.
    pub fn register(&self, command_type: impl Into<String>, class: CommandClass) {
        self.classes.insert(command_type.into(), class);
    }

    /// Look up the guard metadata for `command_type`.
    pub fn lookup(&self, command_type: &str) -> Option<CommandClass> {
        self.classes.get(command_type).map(|c| c.clone())
    }
}

/// Accepting states a business may be in for ordinary commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusinessState {
    /// Bootstrapped but not yet fully activated; only setup commands pass.
    Created,
    /// Normal operating state.
    Active,
    /// Temporarily halted; nothing passes.
    Suspended,
    /// Permanently closed; nothing passes.
    Closed,
}

/// Source of the current lifecycle state of a business, backed by the
/// identity engine's projection.
pub trait BusinessStateSource: Send + Sync {
    /// Current state of `business_id`.
    fn state(&self, business_id: BusinessId) -> BusinessState;
}

/// Source of actor identity, authorization scope, and AI-specific
/// restrictions, backed by the identity/access-control projection.
pub trait ActorDirectory: Send + Sync {
    /// Whether this actor is known at all.
    fn is_known(&self, actor_type: ActorType, actor_id: &str) -> bool;
    /// The set of businesses this actor may act within.
    fn allowed_businesses(&self, actor_type: ActorType, actor_id: &str) -> HashSet<BusinessId>;
    /// The set of branches this actor may act within for `business_id`, or
    /// `None` if the actor is authorized for every branch of that
    /// business.
    fn allowed_branches(&self, actor_type: ActorType, actor_id: &str, business_id: BusinessId) -> Option<HashSet<BranchId>>;
    /// Command types this AI actor is forbidden from issuing, regardless
    /// of any other authorization.
    fn ai_forbidden_commands(&self, actor_id: &str) -> HashSet<String>;
}

/// Source of the active compliance profile for a business.
pub trait ComplianceSource: Send + Sync {
    /// The profile currently in force for `business_id`, if any.
    fn profile(&self, business_id: BusinessId) -> Option<ComplianceProfile>;
}

/// Lifecycle state of a registered branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// Open and eligible to receive branch-scoped commands.
    Open,
    /// Closed; no longer eligible for new commands.
    Closed,
}

/// Source of branch registration state, backed by the identity engine's
/// branch directory projection.
pub trait BranchDirectory: Send + Sync {
    /// The state of `branch_id` within `business_id`, or `None` if no such
    /// branch has ever been added to that business.
    fn branch_state(&self, business_id: BusinessId, branch_id: BranchId) -> Option<BranchState>;
}

/// Sliding-window request counter, tiered by actor type (§4.5 guard 7).
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<(String, BusinessId), Vec<DateTime<Utc>>>,
    tiers: HashMap<ActorType, (usize, Duration)>,
    default_tier: (usize, Duration),
}

impl RateLimiter {
    /// Build a limiter with per-actor-type tiers; `default_tier` covers any
    /// actor type without an explicit entry.
    pub fn new(tiers: HashMap<ActorType, (usize, Duration)>, default_tier: (usize, Duration)) -> Self {
        Self {
            windows: DashMap::new(),
            tiers,
            default_tier,
        }
    }

    /// Record one request for `(actor_id, business_id)` at `now`, and
    /// return whether it is within the tier's limit.
    pub fn check_and_record(&self, actor_type: ActorType, actor_id: &str, business_id: BusinessId, now: DateTime<Utc>) -> bool {
        let (limit, window) = self.tiers.get(&actor_type).copied().unwrap_or(self.default_tier);
        let mut entry = self
            .windows
            .entry((actor_id.to_string(), business_id))
            .or_default();
        entry.retain(|seen_at| now.signed_duration_since(*seen_at) <= window);
        if entry.len() >= limit {
            false
        } else {
            entry.push(now);
            true
        }
    }
}

/// Deterministic repeated-rejection detector (§4.5 guard 8). Every guard
/// rejection anywhere in the pipeline is recorded here; exceeding
/// `threshold` rejections within `window` trips the anomaly guard for
/// subsequent commands from the same actor/business pair.
#[derive(Debug)]
pub struct AnomalyDetector {
    rejections: DashMap<(String, BusinessId), Vec<DateTime<Utc>>>,
    threshold: usize,
    window: Duration,
}

impl AnomalyDetector {
    /// Build a detector that trips after `threshold` rejections within
    /// `window`.
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            rejections: DashMap::new(),
            threshold,
            window,
        }
    }

    /// Record that `(actor_id, business_id)` was just rejected at `now`.
    pub fn record_rejection(&self, actor_id: &str, business_id: BusinessId, now: DateTime<Utc>) {
        let mut entry = self
            .rejections
            .entry((actor_id.to_string(), business_id))
            .or_default();
        entry.retain(|seen_at| now.signed_duration_since(*seen_at) <= self.window);
        entry.push(now);
    }

    /// Whether `(actor_id, business_id)` is currently within the normal
    /// range (`true`) or has crossed the anomaly threshold (`false`).
    pub fn check(&self, actor_id: &str, business_id: BusinessId, now: DateTime<Utc>) -> bool {
        self.rejections
            .get(&(actor_id.to_string(), business_id))
            .map(|entry| entry.iter().filter(|t| now.signed_duration_since(**t) <= self.window).count())
            .unwrap_or(0)
            < self.threshold
    }
}

fn internal_error(guard: &'static str) -> Rejection {
    Rejection::new(RejectionCode::GuardInternalError, guard, "guard pipeline encountered an internal failure")
}

/// The fixed-order, fail-closed, short-circuiting guard pipeline.
pub struct GuardPipeline {
    classes: Arc<CommandClassRegistry>,
    actors: Arc<dyn ActorDirectory>,
    business_states: Arc<dyn BusinessStateSource>,
    resilience: Arc<ResilienceState>,
    compliance: Arc<dyn ComplianceSource>,
    branches: Arc<dyn BranchDirectory>,
    rate_limiter: RateLimiter,
    anomaly: AnomalyDetector,
}

impl GuardPipeline {
    /// Assemble a pipeline from its data sources.
    pub fn new(
        classes: Arc<CommandClassRegistry>,
        actors: Arc<dyn ActorDirectory>,
        business_states: Arc<dyn BusinessStateSource>,
        resilience: Arc<ResilienceState>,
        compliance: Arc<dyn ComplianceSource>,
        branches: Arc<dyn BranchDirectory>,
        rate_limiter: RateLimiter,
        anomaly: AnomalyDetector,
    ) -> Self {
        Self {
            classes,
            actors,
            business_states,
            resilience,
            compliance,
            branches,
            rate_limiter,
            anomaly,
        }
    }

    /// Run all ten guards against `command` at `now`, in order,
    /// short-circuiting on the first rejection.
    pub fn evaluate(&self, command: &Command, now: DateTime<Utc>) -> Result<(), Rejection> {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.evaluate_inner(command, now)));
        let result = outcome.unwrap_or_else(|_| Err(internal_error("guard_pipeline")));
        if let Err(rejection) = &result {
            self.anomaly.record_rejection(&command.actor_id, command.business_id, now);
            tracing::debug!(command_type = %command.command_type, code = %rejection.code, policy = %rejection.policy_name, "command rejected");
        }
        result
    }

    fn evaluate_inner(&self, command: &Command, now: DateTime<Utc>) -> Result<(), Rejection> {
        // 1. Structural validation.
        command
            .validate()
            .map_err(|e| Rejection::new(RejectionCode::InvalidCommandStructure, "structural_guard", e.to_string()))?;

        let class = self
            .classes
            .lookup(&command.command_type)
            .ok_or_else(|| Rejection::new(RejectionCode::UnknownCommand, "structural_guard", format!("unknown command type: {}", command.command_type)))?;

        // 2. Actor guard.
        if class.actor_required {
            if command.actor_id.trim().is_empty() {
                return Err(Rejection::new(RejectionCode::ActorRequiredMissing, "actor_guard", "an actor is required for this command"));
            }
            if !self.actors.is_known(command.actor_type, &command.actor_id) {
                return Err(Rejection::new(RejectionCode::ActorInvalid, "actor_guard", "actor is not recognized"));
            }
            if command.actor_type == ActorType::Ai
                && self.actors.ai_forbidden_commands(&command.actor_id).contains(&command.command_type)
            {
                return Err(Rejection::new(
                    RejectionCode::AiExecutionForbidden,
                    "actor_guard",
                    "AI actors may not issue this command type",
                ));
            }
        }

        // 3. Scope guard.
        if class.scope == ScopeRequirement::BranchRequired && command.branch_id.is_none() {
            return Err(Rejection::new(RejectionCode::BranchRequiredMissing, "scope_guard", "this command requires a branch_id"));
        }
        if let Some(branch_id) = command.branch_id {
            match self.branches.branch_state(command.business_id, branch_id) {
                Some(BranchState::Open) => {}
                Some(BranchState::Closed) | None => {
                    return Err(Rejection::new(RejectionCode::BranchNotInBusiness, "scope_guard", "branch is not open for this business"));
                }
            }
        }

        // 4. Business-state guard.
        match self.business_states.state(command.business_id) {
            BusinessState::Active => {}
            BusinessState::Created if class.allowed_while_created => {}
            BusinessState::Created => {
                return Err(Rejection::new(RejectionCode::BusinessSuspended, "business_state_guard", "business has not completed setup"));
            }
            BusinessState::Suspended => {
                return Err(Rejection::new(RejectionCode::BusinessSuspended, "business_state_guard", "business is suspended"));
            }
            BusinessState::Closed => {
                return Err(Rejection::new(RejectionCode::BusinessClosed, "business_state_guard", "business is closed"));
            }
        }

        // 5. Feature-flag guard.
        if !self.resilience.feature_enabled(command.business_id, &class.feature_key) {
            return Err(Rejection::new(RejectionCode::FeatureDisabled, "feature_flag_guard", format!("feature '{}' is not enabled", class.feature_key)));
        }

        // 6. Tenant-isolation guard.
        if class.tenant_scoped {
            let allowed_businesses = self.actors.allowed_businesses(command.actor_type, &command.actor_id);
            if !allowed_businesses.contains(&command.business_id) {
                return Err(Rejection::new(RejectionCode::ActorUnauthorizedBusiness, "tenant_isolation_guard", "actor is not authorized for this business"));
            }
            if let Some(branch_id) = command.branch_id {
                if let Some(allowed_branches) = self.actors.allowed_branches(command.actor_type, &command.actor_id, command.business_id) {
                    if !allowed_branches.contains(&branch_id) {
                        return Err(Rejection::new(RejectionCode::ActorUnauthorizedBranch, "tenant_isolation_guard", "actor is not authorized for this branch"));
                    }
                }
            }
        }

        // 7. Rate-limit guard.
        if !self.rate_limiter.check_and_record(command.actor_type, &command.actor_id, command.business_id, now) {
            return Err(Rejection::new(RejectionCode::QuotaExceeded, "rate_limit_guard", "request rate exceeded for this actor"));
        }

        // 8. Anomaly guard.
        if !self.anomaly.check(&command.actor_id, command.business_id, now) {
            return Err(Rejection::new(RejectionCode::QuotaExceeded, "anomaly_guard", "anomalous rejection pattern detected"));
        }

        // 9. Resilience-mode guard.
        match self.resilience.mode(command.business_id) {
            ResilienceMode::Normal => {}
            ResilienceMode::Degraded if self.resilience.is_essential(&command.command_type) => {}
            ResilienceMode::Degraded | ResilienceMode::ReadOnly => {
                return Err(Rejection::new(RejectionCode::ReadOnlyMode, "resilience_mode_guard", "business is not accepting this command in its current resilience mode"));
            }
        }

        // 10. Compliance guard.
        if let Some(profile) = self.compliance.profile(command.business_id) {
            if let Some(rejection) = evaluate_profile(&profile, command) {
                return Err(rejection);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_types::BusinessId;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FixedDirectory {
        known: HashSet<(ActorType, String)>,
        businesses: HashSet<BusinessId>,
    }

    impl ActorDirectory for FixedDirectory {
        fn is_known(&self, actor_type: ActorType, actor_id: &str) -> bool {
            self.known.contains(&(actor_type, actor_id.to_string()))
        }
        fn allowed_businesses(&self, _actor_type: ActorType, _actor_id: &str) -> HashSet<BusinessId> {
            self.businesses.clone()
        }
        fn allowed_branches(&self, _actor_type: ActorType, _actor_id: &str, _business_id: BusinessId) -> Option<HashSet<BranchId>> {
            None
        }
        fn ai_forbidden_commands(&self, _actor_id: &str) -> HashSet<String> {
            HashSet::new()
        }
    }

    struct FixedState(Mutex<BusinessState>);
    impl BusinessStateSource for FixedState {
        fn state(&self, _business_id: BusinessId) -> BusinessState {
            *self.0.lock().unwrap()
        }
    }

    struct NoCompliance;
    impl ComplianceSource for NoCompliance {
        fn profile(&self, _business_id: BusinessId) -> Option<ComplianceProfile> {
            None
        }
    }

    struct AllBranchesOpen;
    impl BranchDirectory for AllBranchesOpen {
        fn branch_state(&self, _business_id: BusinessId, _branch_id: BranchId) -> Option<BranchState> {
            Some(BranchState::Open)
        }
    }

    fn make_command(business_id: BusinessId, command_type: &str, actor_id: &str) -> Command {
        Command {
            command_id: Uuid::new_v4(),
            command_type: command_type.into(),
            business_id,
            branch_id: None,
            actor_type: ActorType::Human,
            actor_id: actor_id.into(),
            correlation_id: None,
            issued_at: Utc::now(),
            payload: serde_json::json!({}),
            source_engine: "ledger".into(),
            idempotency_key: None,
        }
    }

    fn test_pipeline(business_id: BusinessId) -> GuardPipeline {
        let classes = Arc::new(CommandClassRegistry::new());
        classes.register("ledger.entry.post", CommandClass::standard("ledger"));

        let resilience = Arc::new(ResilienceState::new([]));
        resilience.apply_event(&bos_types::Event {
            event_id: Uuid::new_v4(),
            event_type: "feature_flag.set.v1".into(),
            event_version: 1,
            business_id,
            branch_id: None,
            source_engine: "ledger".into(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload: serde_json::json!({"feature_key": "ledger", "enabled": true}),
            reference: None,
            created_at: Utc::now(),
            received_at: Utc::now(),
            status: bos_types::EventStatus::Final,
            correction_of: None,
            previous_event_hash: "GENESIS".into(),
            event_hash: "ignored".into(),
        });

        let directory = Arc::new(FixedDirectory {
            known: [(ActorType::Human, "actor-1".to_string())].into_iter().collect(),
            businesses: [business_id].into_iter().collect(),
        });
        let business_state = Arc::new(FixedState(Mutex::new(BusinessState::Active)));
        let compliance = Arc::new(NoCompliance);
        let rate_limiter = RateLimiter::new(HashMap::new(), (100, Duration::minutes(1)));
        let anomaly = AnomalyDetector::new(1000, Duration::minutes(1));

        GuardPipeline::new(classes, directory, business_state, resilience, compliance, Arc::new(AllBranchesOpen), rate_limiter, anomaly)
    }

    #[test]
    fn compliant_command_passes_all_ten_guards() {
        let business = BusinessId::new();
        let pipeline = test_pipeline(business);
        let command = make_command(business, "ledger.entry.post", "actor-1");
        assert!(pipeline.evaluate(&command, Utc::now()).is_ok());
    }

    #[test]
    fn unknown_command_type_is_rejected_first() {
        let business = BusinessId::new();
        let pipeline = test_pipeline(business);
        let command = make_command(business, "no.such.command", "actor-1");
        let rejection = pipeline.evaluate(&command, Utc::now()).unwrap_err();
        assert_eq!(rejection.code, RejectionCode::UnknownCommand);
    }

    #[test]
    fn unauthorized_actor_is_rejected() {
        let business = BusinessId::new();
        let pipeline = test_pipeline(business);
        let command = make_command(business, "ledger.entry.post", "stranger");
        let rejection = pipeline.evaluate(&command, Utc::now()).unwrap_err();
        assert_eq!(rejection.code, RejectionCode::ActorInvalid);
    }

    #[test]
    fn rate_limit_trips_after_tier_exhausted() {
        let business = BusinessId::new();
        let classes = Arc::new(CommandClassRegistry::new());
        classes.register("ledger.entry.post", CommandClass::standard("ledger"));
        let resilience = Arc::new(ResilienceState::new([]));
        resilience.apply_event(&bos_types::Event {
            event_id: Uuid::new_v4(),
            event_type: "feature_flag.set.v1".into(),
            event_version: 1,
            business_id: business,
            branch_id: None,
            source_engine: "ledger".into(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload: serde_json::json!({"feature_key": "ledger", "enabled": true}),
            reference: None,
            created_at: Utc::now(),
            received_at: Utc::now(),
            status: bos_types::EventStatus::Final,
            correction_of: None,
            previous_event_hash: "GENESIS".into(),
            event_hash: "ignored".into(),
        });
        let directory = Arc::new(FixedDirectory {
            known: [(ActorType::Human, "actor-1".to_string())].into_iter().collect(),
            businesses: [business].into_iter().collect(),
        });
        let business_state = Arc::new(FixedState(Mutex::new(BusinessState::Active)));
        let compliance = Arc::new(NoCompliance);
        let rate_limiter = RateLimiter::new(HashMap::new(), (1, Duration::minutes(1)));
        let anomaly = AnomalyDetector::new(1000, Duration::minutes(1));
        let pipeline = GuardPipeline::new(classes, directory, business_state, resilience, compliance, Arc::new(AllBranchesOpen), rate_limiter, anomaly);

        let now = Utc::now();
        let first = make_command(business, "ledger.entry.post", "actor-1");
        assert!(pipeline.evaluate(&first, now).is_ok());
        let second = make_command(business, "ledger.entry.post", "actor-1");
        let rejection = pipeline.evaluate(&second, now).unwrap_err();
        assert_eq!(rejection.code, RejectionCode::QuotaExceeded);
    }

    #[test]
    fn read_only_mode_blocks_mutating_commands() {
        let business = BusinessId::new();
        let pipeline = test_pipeline(business);
        pipeline.resilience.apply_event(&bos_types::Event {
            event_id: Uuid::new_v4(),
            event_type: "resilience.mode.set.v1".into(),
            event_version: 1,
            business_id: business,
            branch_id: None,
            source_engine: "resilience".into(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload: serde_json::json!({"mode": "READ_ONLY"}),
            reference: None,
            created_at: Utc::now(),
            received_at: Utc::now(),
            status: bos_types::EventStatus::Final,
            correction_of: None,
            previous_event_hash: "GENESIS".into(),
            event_hash: "ignored".into(),
        });
        let command = make_command(business, "ledger.entry.post", "actor-1");
        let rejection = pipeline.evaluate(&command, Utc::now()).unwrap_err();
        assert_eq!(rejection.code, RejectionCode::ReadOnlyMode);
    }

    struct FixedBranch(Option<BranchState>);
    impl BranchDirectory for FixedBranch {
        fn branch_state(&self, _business_id: BusinessId, _branch_id: BranchId) -> Option<BranchState> {
            self.0
        }
    }

    fn pipeline_with_branch_directory(business_id: BusinessId, branches: Arc<dyn BranchDirectory>) -> GuardPipeline {
        let classes = Arc::new(CommandClassRegistry::new());
        classes.register("ledger.entry.post", CommandClass::standard("ledger"));
        let resilience = Arc::new(ResilienceState::new([]));
        resilience.apply_event(&bos_types::Event {
            event_id: Uuid::new_v4(),
            event_type: "feature_flag.set.v1".into(),
            event_version: 1,
            business_id,
            branch_id: None,
            source_engine: "ledger".into(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload: serde_json::json!({"feature_key": "ledger", "enabled": true}),
            reference: None,
            created_at: Utc::now(),
            received_at: Utc::now(),
            status: bos_types::EventStatus::Final,
            correction_of: None,
            previous_event_hash: "GENESIS".into(),
            event_hash: "ignored".into(),
        });
        let directory = Arc::new(FixedDirectory {
            known: [(ActorType::Human, "actor-1".to_string())].into_iter().collect(),
            businesses: [business_id].into_iter().collect(),
        });
        let business_state = Arc::new(FixedState(Mutex::new(BusinessState::Active)));
        let compliance = Arc::new(NoCompliance);
        let rate_limiter = RateLimiter::new(HashMap::new(), (100, Duration::minutes(1)));
        let anomaly = AnomalyDetector::new(1000, Duration::minutes(1));
        GuardPipeline::new(classes, directory, business_state, resilience, compliance, branches, rate_limiter, anomaly)
    }

    #[test]
    fn branch_scoped_command_is_rejected_when_branch_is_unknown() {
        let business = BusinessId::new();
        let pipeline = pipeline_with_branch_directory(business, Arc::new(FixedBranch(None)));
        let mut command = make_command(business, "ledger.entry.post", "actor-1");
        command.branch_id = Some(BranchId::new());
        let rejection = pipeline.evaluate(&command, Utc::now()).unwrap_err();
        assert_eq!(rejection.code, RejectionCode::BranchNotInBusiness);
    }

    #[test]
    fn branch_scoped_command_is_rejected_when_branch_is_closed() {
        let business = BusinessId::new();
        let pipeline = pipeline_with_branch_directory(business, Arc::new(FixedBranch(Some(BranchState::Closed))));
        let mut command = make_command(business, "ledger.entry.post", "actor-1");
        command.branch_id = Some(BranchId::new());
        let rejection = pipeline.evaluate(&command, Utc::now()).unwrap_err();
        assert_eq!(rejection.code, RejectionCode::BranchNotInBusiness);
    }

    #[test]
    fn branch_scoped_command_passes_when_branch_is_open() {
        let business = BusinessId::new();
        let pipeline = pipeline_with_branch_directory(business, Arc::new(FixedBranch(Some(BranchState::Open))));
        let mut command = make_command(business, "ledger.entry.post", "actor-1");
        command.branch_id = Some(BranchId::new());
        assert!(pipeline.evaluate(&command, Utc::now()).is_ok());
    }
}
