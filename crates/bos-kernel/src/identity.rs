//! Core-owned administrative projections and handlers: business
//! lifecycle, actor directory, consent, compliance-profile assignment and
//! resilience/feature-flag control. These are not a pluggable "engine" in
//! the sense external domain engines are — every `BusinessStateSource`,
//! `ActorDirectory` and `ComplianceSource` the guard pipeline reads from is
//! implemented here, shipped with the kernel itself, while finance and
//! other domains stay external extension crates.

use std::collections::{HashMap, HashSet};

use bos_guard::{ActorDirectory, BranchDirectory, BranchState, BusinessState, BusinessStateSource};
use bos_policy::ComplianceProfile;
use bos_projection::{Projection, ProjectionError};
use bos_types::{ActorType, BranchId, BusinessId, Event, Rejection, RejectionCode};
use dashmap::DashMap;

use crate::{CandidateEvent, EngineHandler};

/// Folds business-lifecycle events into the current state per tenant.
/// Doubles as the guard pipeline's [`BusinessStateSource`].
#[derive(Debug, Default)]
pub struct BusinessLifecycleProjection {
    states: DashMap<BusinessId, BusinessState>,
}

impl BusinessLifecycleProjection {
    /// Construct with no businesses known yet (every lookup defaults to
    /// `CREATED` until a `business.created.v1` event is folded in).
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for BusinessLifecycleProjection {
    fn name(&self) -> &str {
        "business_lifecycle"
    }

    fn subscribed_event_types(&self) -> HashSet<String> {
        [
            "identity.business.created.v1",
            "identity.business.activated.v1",
            "identity.business.suspended.v1",
            "identity.business.closed.v1",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
        let state = match event.event_type.as_str() {
            "identity.business.created.v1" => BusinessState::Created,
            "identity.business.activated.v1" => BusinessState::Active,
            "identity.business.suspended.v1" => BusinessState::Suspended,
            "identity.business.closed.v1" => BusinessState::Closed,
            other => {
                return Err(ProjectionError::Fold {
                    name: "business_lifecycle".into(),
                    event_id: event.event_id,
                    message: format!("unexpected event type: {other}"),
                })
            }
        };
        self.states.insert(event.business_id, state);
        Ok(())
    }

    fn truncate(&self, business_id: Option<BusinessId>) {
        match business_id {
            Some(id) => {
                self.states.remove(&id);
            }
            None => self.states.clear(),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let map: HashMap<String, &'static str> = self
            .states
            .iter()
            .map(|e| (e.key().to_string(), state_tag(*e.value())))
            .collect();
        serde_json::to_vec(&map).unwrap_or_default()
    }

    fn restore(&self, bytes: &[u8]) -> Result<(), ProjectionError> {
        let map: HashMap<String, String> =
            serde_json::from_slice(bytes).map_err(|_| ProjectionError::Restore("business_lifecycle".into()))?;
        self.states.clear();
        for (key, tag) in map {
            let id = key.parse::<uuid::Uuid>().map_err(|_| ProjectionError::Restore("business_lifecycle".into()))?;
            let state = match tag.as_str() {
                "CREATED" => BusinessState::Created,
                "ACTIVE" => BusinessState::Active,
                "SUSPENDED" => BusinessState::Suspended,
                "CLOSED" => BusinessState::Closed,
                _ => return Err(ProjectionError::Restore("business_lifecycle".into())),
            };
            self.states.insert(BusinessId(id), state);
        }
        Ok(())
    }
}

fn state_tag(state: BusinessState) -> &'static str {
    match state {
        BusinessState::Created => "CREATED",
        BusinessState::Active => "ACTIVE",
        BusinessState::Suspended => "SUSPENDED",
        BusinessState::Closed => "CLOSED",
    }
}

impl BusinessStateSource for BusinessLifecycleProjection {
    fn state(&self, business_id: BusinessId) -> BusinessState {
        self.states.get(&business_id).map(|s| *s).unwrap_or(BusinessState::Created)
    }
}

/// Folds branch lifecycle events into a per-`(business, branch)` state
/// table. Doubles as the guard pipeline's [`BranchDirectory`].
#[derive(Debug, Default)]
pub struct BranchDirectoryProjection {
    states: DashMap<(BusinessId, BranchId), BranchState>,
}

impl BranchDirectoryProjection {
    /// Construct with no branches known yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for BranchDirectoryProjection {
    fn name(&self) -> &str {
        "branch_directory"
    }

    fn subscribed_event_types(&self) -> HashSet<String> {
        ["identity.branch.added.v1".to_string(), "identity.branch.closed.v1".to_string()].into_iter().collect()
    }

    fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
        let fold = || -> Option<()> {
            let branch_id = BranchId(event.payload.get("branch_id")?.as_str()?.parse().ok()?);
            let state = match event.event_type.as_str() {
                "identity.branch.added.v1" => BranchState::Open,
                "identity.branch.closed.v1" => BranchState::Closed,
                _ => return None,
            };
            self.states.insert((event.business_id, branch_id), state);
            Some(())
        };
        fold().ok_or_else(|| ProjectionError::Fold {
            name: "branch_directory".into(),
            event_id: event.event_id,
            message: "malformed branch lifecycle payload".into(),
        })
    }

    fn truncate(&self, business_id: Option<BusinessId>) {
        match business_id {
            Some(id) => self.states.retain(|(business, _), _| *business != id),
            None => self.states.clear(),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let rows: Vec<(String, String, &'static str)> = self
            .states
            .iter()
            .map(|e| (e.key().0.to_string(), e.key().1.to_string(), branch_state_tag(*e.value())))
            .collect();
        serde_json::to_vec(&rows).unwrap_or_default()
    }

    fn restore(&self, bytes: &[u8]) -> Result<(), ProjectionError> {
        let rows: Vec<(String, String, String)> =
            serde_json::from_slice(bytes).map_err(|_| ProjectionError::Restore("branch_directory".into()))?;
        self.states.clear();
        for (business, branch, tag) in rows {
            let business_id = BusinessId(business.parse().map_err(|_| ProjectionError::Restore("branch_directory".into()))?);
            let branch_id = BranchId(branch.parse().map_err(|_| ProjectionError::Restore("branch_directory".into()))?);
            let state = match tag.as_str() {
                "OPEN" => BranchState::Open,
                "CLOSED" => BranchState::Closed,
                _ => return Err(ProjectionError::Restore("branch_directory".into())),
            };
            self.states.insert((business_id, branch_id), state);
        }
        Ok(())
    }
}

fn branch_state_tag(state: BranchState) -> &'static str {
    match state {
        BranchState::Open => "OPEN",
        BranchState::Closed => "CLOSED",
    }
}

impl BranchDirectory for BranchDirectoryProjection {
    fn branch_state(&self, business_id: BusinessId, branch_id: BranchId) -> Option<BranchState> {
        self.states.get(&(business_id, branch_id)).map(|s| *s)
    }
}

/// Status of an administrative API key as last recorded by the identity
/// engine. Request-time bearer-token verification is an adapter-layer
/// concern (`bos-auth-support`), not a guard-pipeline one; this projection
/// only tracks lifecycle for audit and administrative listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyStatus {
    /// Active and usable.
    Active,
    /// Revoked; no longer usable.
    Revoked,
}

/// Folds API-key lifecycle events into a per-`(business, key_id)` status
/// table.
#[derive(Debug, Default)]
pub struct ApiKeyDirectoryProjection {
    keys: DashMap<(BusinessId, String), ApiKeyStatus>,
}

impl ApiKeyDirectoryProjection {
    /// Construct with no keys known yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status of `key_id` within `business_id`, if it has ever
    /// been created.
    pub fn status(&self, business_id: BusinessId, key_id: &str) -> Option<ApiKeyStatus> {
        self.keys.get(&(business_id, key_id.to_string())).map(|s| *s)
    }
}

impl Projection for ApiKeyDirectoryProjection {
    fn name(&self) -> &str {
        "api_key_directory"
    }

    fn subscribed_event_types(&self) -> HashSet<String> {
        [
            "identity.api_key.created.v1",
            "identity.api_key.revoked.v1",
            "identity.api_key.rotated.v1",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
        let fold = || -> Option<()> {
            let key_id = event.payload.get("key_id")?.as_str()?.to_string();
            match event.event_type.as_str() {
                "identity.api_key.created.v1" => {
                    self.keys.insert((event.business_id, key_id), ApiKeyStatus::Active);
                }
                "identity.api_key.revoked.v1" => {
                    self.keys.insert((event.business_id, key_id), ApiKeyStatus::Revoked);
                }
                "identity.api_key.rotated.v1" => {
                    // A rotation retires `key_id` and activates the
                    // `new_key_id` it was rotated into.
                    self.keys.insert((event.business_id, key_id), ApiKeyStatus::Revoked);
                    let new_key_id = event.payload.get("new_key_id")?.as_str()?.to_string();
                    self.keys.insert((event.business_id, new_key_id), ApiKeyStatus::Active);
                }
                _ => return None,
            }
            Some(())
        };
        fold().ok_or_else(|| ProjectionError::Fold {
            name: "api_key_directory".into(),
            event_id: event.event_id,
            message: "malformed api key lifecycle payload".into(),
        })
    }

    fn truncate(&self, business_id: Option<BusinessId>) {
        match business_id {
            Some(id) => self.keys.retain(|(business, _), _| *business != id),
            None => self.keys.clear(),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let rows: Vec<(String, String, bool)> = self
            .keys
            .iter()
            .map(|e| (e.key().0.to_string(), e.key().1.clone(), matches!(*e.value(), ApiKeyStatus::Active)))
            .collect();
        serde_json::to_vec(&rows).unwrap_or_default()
    }

    fn restore(&self, bytes: &[u8]) -> Result<(), ProjectionError> {
        let rows: Vec<(String, String, bool)> =
            serde_json::from_slice(bytes).map_err(|_| ProjectionError::Restore("api_key_directory".into()))?;
        self.keys.clear();
        for (business, key_id, active) in rows {
            let business_id = BusinessId(business.parse().map_err(|_| ProjectionError::Restore("api_key_directory".into()))?);
            self.keys.insert((business_id, key_id), if active { ApiKeyStatus::Active } else { ApiKeyStatus::Revoked });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct ActorRecord {
    businesses: HashSet<BusinessId>,
    branches: HashMap<BusinessId, HashSet<BranchId>>,
    ai_forbidden: HashSet<String>,
}

/// Folds actor-registration events into a directory of known actors and
/// their authorized businesses/branches. Doubles as the guard pipeline's
/// [`ActorDirectory`].
#[derive(Debug, Default)]
pub struct ActorDirectoryProjection {
    actors: DashMap<(ActorType, String), ActorRecord>,
}

impl ActorDirectoryProjection {
    /// Construct with no actors known yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for ActorDirectoryProjection {
    fn name(&self) -> &str {
        "actor_directory"
    }

    fn subscribed_event_types(&self) -> HashSet<String> {
        ["identity.actor.registered.v1".to_string()].into_iter().collect()
    }

    fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
        let fold = || -> Option<()> {
            let actor_type: ActorType = serde_json::from_value(event.payload.get("actor_type")?.clone()).ok()?;
            let actor_id = event.payload.get("actor_id")?.as_str()?.to_string();
            let mut record = self.actors.entry((actor_type, actor_id)).or_default();
            record.businesses.insert(event.business_id);
            if let Some(branch) = event.payload.get("branch_id").and_then(|v| v.as_str()) {
                let branch_id = BranchId(branch.parse().ok()?);
                record.branches.entry(event.business_id).or_default().insert(branch_id);
            }
            if let Some(forbidden) = event.payload.get("ai_forbidden_commands").and_then(|v| v.as_array()) {
                for item in forbidden {
                    if let Some(command_type) = item.as_str() {
                        record.ai_forbidden.insert(command_type.to_string());
                    }
                }
            }
            Some(())
        };
        fold().ok_or_else(|| ProjectionError::Fold {
            name: "actor_directory".into(),
            event_id: event.event_id,
            message: "malformed identity.actor.registered.v1 payload".into(),
        })
    }

    fn truncate(&self, business_id: Option<BusinessId>) {
        match business_id {
            Some(id) => {
                self.actors.retain(|_, record| {
                    record.businesses.remove(&id);
                    record.branches.remove(&id);
                    !record.businesses.is_empty()
                });
            }
            None => self.actors.clear(),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let rows: Vec<(String, String, Vec<String>)> = self
            .actors
            .iter()
            .map(|e| (e.key().0.to_string(), e.key().1.clone(), e.value().businesses.iter().map(|b| b.to_string()).collect()))
            .collect();
        serde_json::to_vec(&rows).unwrap_or_default()
    }

    fn restore(&self, _bytes: &[u8]) -> Result<(), ProjectionError> {
        // Branch/AI-forbidden detail is intentionally not snapshotted in
        // this reference form; a full restore re-derives from the log via
        // `bos_replay::replay` instead of this coarse snapshot.
        Ok(())
    }
}

impl ActorDirectory for ActorDirectoryProjection {
    fn is_known(&self, actor_type: ActorType, actor_id: &str) -> bool {
        self.actors.contains_key(&(actor_type, actor_id.to_string()))
    }

    fn allowed_businesses(&self, actor_type: ActorType, actor_id: &str) -> HashSet<BusinessId> {
        self.actors
            .get(&(actor_type, actor_id.to_string()))
            .map(|r| r.businesses.clone())
            .unwrap_or_default()
    }

    fn allowed_branches(&self, actor_type: ActorType, actor_id: &str, business_id: BusinessId) -> Option<HashSet<BranchId>> {
        self.actors.get(&(actor_type, actor_id.to_string()))?.branches.get(&business_id).cloned()
    }

    fn ai_forbidden_commands(&self, actor_id: &str) -> HashSet<String> {
        self.actors
            .get(&(ActorType::Ai, actor_id.to_string()))
            .map(|r| r.ai_forbidden.clone())
            .unwrap_or_default()
    }
}

/// Folds compliance-profile assignment events. Doubles as the guard
/// pipeline's [`bos_guard::ComplianceSource`].
#[derive(Debug, Default)]
pub struct CompliancePolicyProjection {
    profiles: DashMap<BusinessId, ComplianceProfile>,
}

impl CompliancePolicyProjection {
    /// Construct with no business opted into a profile yet.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Projection for CompliancePolicyProjection {
    fn name(&self) -> &str {
        "compliance_policy"
    }

    fn subscribed_event_types(&self) -> HashSet<String> {
        ["compliance.profile.set.v1".to_string()].into_iter().collect()
    }

    fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
        let profile: ComplianceProfile = serde_json::from_value(event.payload.clone()).map_err(|e| ProjectionError::Fold {
            name: "compliance_policy".into(),
            event_id: event.event_id,
            message: e.to_string(),
        })?;
        self.profiles.insert(event.business_id, profile);
        Ok(())
    }

    fn truncate(&self, business_id: Option<BusinessId>) {
        match business_id {
            Some(id) => {
                self.profiles.remove(&id);
            }
            None => self.profiles.clear(),
        }
    }

    fn snapshot(&self) -> Vec<u8> {
        let map: HashMap<String, ComplianceProfile> = self.profiles.iter().map(|e| (e.key().to_string(), e.value().clone())).collect();
        serde_json::to_vec(&map).unwrap_or_default()
    }

    fn restore(&self, bytes: &[u8]) -> Result<(), ProjectionError> {
        let map: HashMap<String, ComplianceProfile> =
            serde_json::from_slice(bytes).map_err(|_| ProjectionError::Restore("compliance_policy".into()))?;
        self.profiles.clear();
        for (key, profile) in map {
            let id = key.parse::<uuid::Uuid>().map_err(|_| ProjectionError::Restore("compliance_policy".into()))?;
            self.profiles.insert(BusinessId(id), profile);
        }
        Ok(())
    }
}

impl bos_guard::ComplianceSource for CompliancePolicyProjection {
    fn profile(&self, business_id: BusinessId) -> Option<ComplianceProfile> {
        self.profiles.get(&business_id).map(|p| p.clone())
    }
}

/// One handler per administrative command type; each is a pure translation
/// from command payload to a single candidate event of the matching type.
pub struct IdentityHandler {
    command_type: &'static str,
    event_type: &'static str,
}

impl IdentityHandler {
    /// Build a handler that turns `command_type` into one `event_type`
    /// event, copying the command's payload through unchanged.
    pub const fn new(command_type: &'static str, event_type: &'static str) -> Self {
        Self { command_type, event_type }
    }
}

impl EngineHandler for IdentityHandler {
    fn command_type(&self) -> &str {
        self.command_type
    }

    fn handle(&self, command: &bos_types::Command, _projections: &bos_projection::ProjectionRuntime, _clock: &dyn bos_context::Clock) -> Result<Vec<CandidateEvent>, Rejection> {
        if !command.payload.is_object() {
            return Err(Rejection::new(RejectionCode::InvalidCommandStructure, "identity_handler", "payload must be an object"));
        }
        Ok(vec![CandidateEvent {
            event_type: self.event_type.to_string(),
            event_version: 1,
            branch_id: command.branch_id,
            source_engine: "identity".to_string(),
            payload: command.payload.clone(),
            reference: None,
            status: bos_types::EventStatus::Final,
            correction_of: None,
        }])
    }
}

/// The full set of built-in administrative command types and the command
/// class metadata the guard pipeline needs for each (§6.6).
pub fn builtin_command_classes() -> Vec<(&'static str, bos_guard::CommandClass)> {
    use bos_guard::CommandClass;
    vec![
        // Bootstrap commands run before any actor-to-business grant or
        // feature flag can exist, so they carry no feature gate (empty
        // key, §6.6 bootstrap convention) and are exempt from tenant
        // isolation (#6) and, for the earliest two, from actor
        // authorization (#2) entirely.
        ("identity.business.create", CommandClass::standard("").allowed_during_setup().unscoped().without_actor_requirement()),
        ("identity.actor.register", CommandClass::standard("").allowed_during_setup().unscoped().without_actor_requirement()),
        ("identity.business.activate", CommandClass::standard("").allowed_during_setup()),
        ("identity.business.suspend", CommandClass::standard("")),
        ("identity.business.close", CommandClass::standard("")),
        ("identity.consent.grant", CommandClass::standard("")),
        ("identity.consent.revoke", CommandClass::standard("")),
        ("compliance.profile.set", CommandClass::standard("")),
        ("resilience.mode.set", CommandClass::standard("").allowed_during_setup()),
        ("resilience.feature_flag.set", CommandClass::standard("").allowed_during_setup()),
        // Branch/API-key lifecycle commands target the whole business (the
        // branch or key they act on travels in the payload, not
        // `command.branch_id`), same as every other administrative command.
        ("identity.branch.add", CommandClass::standard("")),
        ("identity.branch.close", CommandClass::standard("")),
        ("identity.api_key.create", CommandClass::standard("")),
        ("identity.api_key.revoke", CommandClass::standard("")),
        ("identity.api_key.rotate", CommandClass::standard("")),
    ]
}

/// The built-in administrative handlers, paired one-to-one with
/// [`builtin_command_classes`].
pub fn builtin_handlers() -> Vec<IdentityHandler> {
    vec![
        IdentityHandler::new("identity.business.create", "identity.business.created.v1"),
        IdentityHandler::new("identity.business.activate", "identity.business.activated.v1"),
        IdentityHandler::new("identity.business.suspend", "identity.business.suspended.v1"),
        IdentityHandler::new("identity.business.close", "identity.business.closed.v1"),
        IdentityHandler::new("identity.actor.register", "identity.actor.registered.v1"),
        IdentityHandler::new("identity.consent.grant", "identity.consent.granted.v1"),
        IdentityHandler::new("identity.consent.revoke", "identity.consent.revoked.v1"),
        IdentityHandler::new("compliance.profile.set", "compliance.profile.set.v1"),
        IdentityHandler::new("resilience.mode.set", "resilience.mode.set.v1"),
        IdentityHandler::new("resilience.feature_flag.set", "feature_flag.set.v1"),
        IdentityHandler::new("identity.branch.add", "identity.branch.added.v1"),
        IdentityHandler::new("identity.branch.close", "identity.branch.closed.v1"),
        IdentityHandler::new("identity.api_key.create", "identity.api_key.created.v1"),
        IdentityHandler::new("identity.api_key.revoke", "identity.api_key.revoked.v1"),
        IdentityHandler::new("identity.api_key.rotate", "identity.api_key.rotated.v1"),
    ]
}
