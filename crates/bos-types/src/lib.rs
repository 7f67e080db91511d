#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-types** – Shared primitive data structures for the BOS kernel.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that every other crate can depend on it without causing cycles.
//! It makes no assumptions about hashing, storage, or transport – those are
//! the concern of `bos-hash`, `bos-store-core` and the adapter layer
//! respectively.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

//─────────────────────────────
//  Size constants
//─────────────────────────────

/// Maximum allowed size for a canonicalized event/command payload, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1MB

/// Maximum allowed length for an `actor_id` string.
pub const MAX_ACTOR_ID_LEN: usize = 256;

/// Maximum allowed length for a `correlation_id`/`causation_id`/`event_type` string.
pub const MAX_ID_LEN: usize = 256;

/// The literal sentinel used as `previous_event_hash` for the first event of
/// a business chain.
pub const GENESIS: &str = "GENESIS";

//─────────────────────────────
//  Identifiers
//─────────────────────────────

/// Tenant (business) identifier. Mandatory on every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusinessId(pub Uuid);

impl BusinessId {
    /// Generate a fresh random business id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BusinessId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BusinessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Physical/operational sub-scope within a business. Optional on every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(pub Uuid);

impl BranchId {
    /// Generate a fresh random branch id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BranchId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

//─────────────────────────────
//  Actors
//─────────────────────────────

/// Who (or what) caused an event/command to be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorType {
    /// A human operator.
    Human,
    /// An internal system process.
    System,
    /// A physical device (e.g. a till, a sensor).
    Device,
    /// An AI advisory actor – may recommend but never autonomously mutate.
    Ai,
}

impl ActorType {
    /// AI actors are subject to an additional forbidden-operation check by
    /// the actor guard (§4.5 guard 2).
    pub fn requires_ai_check(&self) -> bool {
        matches!(self, ActorType::Ai)
    }
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActorType::Human => "HUMAN",
            ActorType::System => "SYSTEM",
            ActorType::Device => "DEVICE",
            ActorType::Ai => "AI",
        };
        f.write_str(s)
    }
}

//─────────────────────────────
//  Event status & references
//─────────────────────────────

/// Lifecycle status attached to every stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventStatus {
    /// The event is final and will not be corrected.
    Final,
    /// The event is provisional and may later be corrected.
    Provisional,
    /// The event requires human review before being treated as final.
    ReviewRequired,
}

/// Optional pointer to the domain object an event concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Domain object type, e.g. `"invoice"`.
    pub object_type: String,
    /// Domain object identifier.
    pub object_id: String,
}

//─────────────────────────────
//  Validation errors
//─────────────────────────────

/// Structural validation failure raised while constructing a type in this
/// crate. Distinct from a guard/policy [`Rejection`] – this happens before a
/// value can even exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A mandatory field was missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    /// A field exceeded its maximum allowed length/size.
    #[error("{field} exceeds maximum length of {max} (got {actual})")]
    TooLong {
        /// Field name.
        field: &'static str,
        /// Allowed maximum.
        max: usize,
        /// Actual observed size.
        actual: usize,
    },
    /// The payload was not a JSON object, or otherwise structurally invalid.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    if value.len() > max {
        return Err(ValidationError::TooLong {
            field,
            max,
            actual: value.len(),
        });
    }
    Ok(())
}

//─────────────────────────────
//  Event
//─────────────────────────────

/// The sole unit of truth. Immutable once stored (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier; also the idempotency key.
    pub event_id: Uuid,
    /// Dotted name `engine.domain.action.vN`; must exist in the registry.
    pub event_type: String,
    /// Non-negative integer, bumped on breaking payload changes.
    pub event_version: u32,
    /// Mandatory tenant key.
    pub business_id: BusinessId,
    /// Optional physical-location key; `None` means business scope.
    pub branch_id: Option<BranchId>,
    /// Engine that emitted the event.
    pub source_engine: String,
    /// Kind of actor that caused the event.
    pub actor_type: ActorType,
    /// Actor identifier.
    pub actor_id: String,
    /// Groups all events in one causal chain.
    pub correlation_id: String,
    /// Optional id of the directly causing event.
    pub causation_id: Option<Uuid>,
    /// Structured payload; schema selected by `event_type`.
    pub payload: serde_json::Value,
    /// Optional pointer to the domain object.
    pub reference: Option<Reference>,
    /// Caller-supplied timestamp (from a `Clock`); never read inside handlers.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Assigned by the store on append.
    pub received_at: chrono::DateTime<chrono::Utc>,
    /// Lifecycle status.
    pub status: EventStatus,
    /// Optional id of the event this one corrects.
    pub correction_of: Option<Uuid>,
    /// The `event_hash` of the preceding event in the same business chain,
    /// or the literal [`GENESIS`] for the first event of a business.
    pub previous_event_hash: String,
    /// SHA-256 hash over the canonical payload, previous hash and stable
    /// header fields. Computed by `bos-hash`.
    pub event_hash: String,
}

impl Event {
    /// Validate size/shape invariants that must hold regardless of hashing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_len("event_type", &self.event_type, MAX_ID_LEN)?;
        check_len("source_engine", &self.source_engine, MAX_ID_LEN)?;
        check_len("actor_id", &self.actor_id, MAX_ACTOR_ID_LEN)?;
        check_len("correlation_id", &self.correlation_id, MAX_ID_LEN)?;
        if !self.payload.is_object() {
            return Err(ValidationError::InvalidPayload(
                "payload must be a JSON object".into(),
            ));
        }
        let size = serde_json::to_vec(&self.payload)
            .map(|b| b.len())
            .unwrap_or(usize::MAX);
        if size > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::TooLong {
                field: "payload",
                max: MAX_PAYLOAD_BYTES,
                actual: size,
            });
        }
        Ok(())
    }
}

//─────────────────────────────
//  Command
//─────────────────────────────

/// The unit of intent; transient – never stored as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command identifier.
    pub command_id: Uuid,
    /// Declares which handler/schema/scope rules apply.
    pub command_type: String,
    /// Mandatory tenant key.
    pub business_id: BusinessId,
    /// Optional physical-location key.
    pub branch_id: Option<BranchId>,
    /// Kind of actor issuing the command.
    pub actor_type: ActorType,
    /// Actor identifier.
    pub actor_id: String,
    /// Causal correlation id; a fresh one is minted if absent.
    pub correlation_id: Option<String>,
    /// Caller-supplied issue timestamp.
    pub issued_at: chrono::DateTime<chrono::Utc>,
    /// Structured payload; schema declared per `command_type`.
    pub payload: serde_json::Value,
    /// Engine that is meant to handle this command.
    pub source_engine: String,
    /// Optional idempotency key distinct from `command_id`.
    pub idempotency_key: Option<String>,
}

impl Command {
    /// Validate size/shape invariants.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_len("command_type", &self.command_type, MAX_ID_LEN)?;
        check_len("actor_id", &self.actor_id, MAX_ACTOR_ID_LEN)?;
        check_len("source_engine", &self.source_engine, MAX_ID_LEN)?;
        if !self.payload.is_object() {
            return Err(ValidationError::InvalidPayload(
                "payload must be a JSON object".into(),
            ));
        }
        Ok(())
    }
}

//─────────────────────────────
//  Rejection / Outcome
//─────────────────────────────

/// Closed set of rejection codes (§7). Every error path in the bus, guard
/// pipeline, policy layer and store maps onto exactly one of these.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    InvalidCommandStructure,
    UnknownCommand,
    UnknownEventType,
    MissingBusinessId,
    ActorRequiredMissing,
    ActorInvalid,
    ActorUnauthorizedBusiness,
    ActorUnauthorizedBranch,
    BranchRequiredMissing,
    BranchNotInBusiness,
    FeatureDisabled,
    ComplianceViolation,
    BusinessSuspended,
    BusinessClosed,
    QuotaExceeded,
    AiExecutionForbidden,
    DuplicateRequest,
    IdempotencyConflict,
    ChainMismatch,
    HashMismatch,
    ReadOnlyMode,
    GuardInternalError,
    StoreUnavailable,
}

impl std::fmt::Display for RejectionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // SCREAMING_SNAKE_CASE wire form, derived via serde so the display
        // string always matches the §7 table exactly.
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| "UNKNOWN".to_string());
        f.write_str(&s)
    }
}

/// A structured rejection produced by a guard, policy or handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Closed error code.
    pub code: RejectionCode,
    /// Human-readable message.
    pub message: String,
    /// Authoritative identifier of the policy/guard that produced this.
    pub policy_name: String,
    /// Optional structured detail payload.
    pub details: Option<serde_json::Value>,
}

impl Rejection {
    /// Construct a rejection with no extra detail payload.
    pub fn new(code: RejectionCode, policy_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            policy_name: policy_name.into(),
            details: None,
        }
    }

    /// Attach a structured detail payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The tagged-union result of submitting a [`Command`] to the kernel (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    /// The command was accepted; zero or more events were appended.
    Accepted {
        /// Events appended as a result of this command.
        events: Vec<Event>,
    },
    /// The command was rejected before, during, or after the guard pipeline.
    Rejected {
        /// The rejection detail.
        error: Rejection,
    },
}

impl Outcome {
    /// True if this outcome is `Accepted`.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }
}
