#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-audit** – Append-only audit, consent and AI decision journal (C12).
//!
//! A single pluggable `async_trait`, with a reference in-memory
//! implementation behind a `memory-store` feature. Append-only-forever
//! rather than revoke/check — there is no `is_revoked`-style negative
//! lookup here, only `record_*` and historical reads. Consent revocation
//! is a new [`ConsentRecord`] with `revoked_at` set, never a deletion or
//! update of the original grant.

use bos_types::BusinessId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A free-form, tenant-scoped evidence record (e.g. "rejection recorded",
/// "manual override applied").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Tenant this entry concerns.
    pub business_id: BusinessId,
    /// Caller-assigned category, e.g. `"rejection"`, `"override"`.
    pub category: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail payload.
    pub details: Option<serde_json::Value>,
    /// When this entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// A grant (or later revocation) of consent by an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// Unique identifier for this record (a revocation gets its own id).
    pub id: Uuid,
    /// Tenant this consent concerns.
    pub business_id: BusinessId,
    /// Actor who granted (or is revoking) consent.
    pub actor_id: String,
    /// What the consent covers, e.g. `"marketing_email"`.
    pub scope: String,
    /// When this grant/revocation was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Set only on a revocation record; grants always carry `None`.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ConsentRecord {
    /// Build a fresh grant record.
    pub fn grant(business_id: BusinessId, actor_id: impl Into<String>, scope: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            business_id,
            actor_id: actor_id.into(),
            scope: scope.into(),
            recorded_at,
            revoked_at: None,
        }
    }

    /// Build a revocation record for a prior grant. This is a new,
    /// independent [`ConsentRecord`] — the original grant is never
    /// mutated or removed.
    pub fn revoke(business_id: BusinessId, actor_id: impl Into<String>, scope: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            business_id,
            actor_id: actor_id.into(),
            scope: scope.into(),
            recorded_at,
            revoked_at: Some(recorded_at),
        }
    }

    /// True if this particular record is a revocation rather than a grant.
    pub fn is_revocation(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// How autonomously an AI actor acted when this decision was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AiDecisionMode {
    /// The AI only surfaced a recommendation; a human or system actor
    /// issued the resulting command, if any.
    Advisory,
    /// The AI's recommendation was applied with human confirmation.
    Assisted,
    /// The AI's recommendation was applied without a human in the loop.
    Autonomous,
}

/// A record of one AI advisory/decision, independent of whether it led to
/// a command being issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiDecisionEntry {
    /// Unique identifier.
    pub id: Uuid,
    /// Tenant this decision concerns.
    pub business_id: BusinessId,
    /// The AI actor that produced the decision.
    pub actor_id: String,
    /// How autonomously it acted.
    pub mode: AiDecisionMode,
    /// The advisory content itself (recommendation, rationale, etc).
    pub advisory_payload: serde_json::Value,
    /// What actually happened as a result (free text, e.g. `"applied"`,
    /// `"rejected by human reviewer"`, `"no action taken"`).
    pub outcome: String,
    /// When this entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Pluggable, append-only sink for audit, consent and AI decision records.
/// Every method is insert-only; there is no update or delete.
#[async_trait::async_trait]
pub trait DecisionJournal: Send + Sync + 'static {
    /// Append an audit entry.
    async fn record_audit(&self, entry: AuditEntry) -> anyhow::Result<()>;

    /// Append a consent grant or revocation record.
    async fn record_consent(&self, record: ConsentRecord) -> anyhow::Result<()>;

    /// Append an AI decision record.
    async fn record_ai_decision(&self, entry: AiDecisionEntry) -> anyhow::Result<()>;

    /// All audit entries for `business_id`, oldest first.
    async fn audit_entries(&self, business_id: BusinessId) -> anyhow::Result<Vec<AuditEntry>>;

    /// Full consent history (grants and revocations) for `business_id` and
    /// `actor_id`, oldest first.
    async fn consent_history(&self, business_id: BusinessId, actor_id: &str) -> anyhow::Result<Vec<ConsentRecord>>;

    /// True if the most recent consent record for `(business_id, actor_id,
    /// scope)` is a grant with no later revocation.
    async fn has_active_consent(&self, business_id: BusinessId, actor_id: &str, scope: &str) -> anyhow::Result<bool> {
        let history = self.consent_history(business_id, actor_id).await?;
        Ok(history
            .into_iter()
            .filter(|r| r.scope == scope)
            .max_by_key(|r| r.recorded_at)
            .map(|r| !r.is_revocation())
            .unwrap_or(false))
    }

    /// All AI decision entries for `business_id`, oldest first.
    async fn ai_decisions(&self, business_id: BusinessId) -> anyhow::Result<Vec<AiDecisionEntry>>;
}

#[cfg(feature = "memory-store")]
mod memory {
    use super::*;
    use parking_lot::Mutex;

    /// Non-persistent reference implementation – suitable for tests and
    /// local development only.
    #[derive(Debug, Default)]
    pub struct InMemoryJournal {
        audit: Mutex<Vec<AuditEntry>>,
        consent: Mutex<Vec<ConsentRecord>>,
        ai: Mutex<Vec<AiDecisionEntry>>,
    }

    impl InMemoryJournal {
        /// Construct an empty journal.
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait::async_trait]
    impl DecisionJournal for InMemoryJournal {
        async fn record_audit(&self, entry: AuditEntry) -> anyhow::Result<()> {
            self.audit.lock().push(entry);
            Ok(())
        }

        async fn record_consent(&self, record: ConsentRecord) -> anyhow::Result<()> {
            self.consent.lock().push(record);
            Ok(())
        }

        async fn record_ai_decision(&self, entry: AiDecisionEntry) -> anyhow::Result<()> {
            self.ai.lock().push(entry);
            Ok(())
        }

        async fn audit_entries(&self, business_id: BusinessId) -> anyhow::Result<Vec<AuditEntry>> {
            Ok(self.audit.lock().iter().filter(|e| e.business_id == business_id).cloned().collect())
        }

        async fn consent_history(&self, business_id: BusinessId, actor_id: &str) -> anyhow::Result<Vec<ConsentRecord>> {
            Ok(self
                .consent
                .lock()
                .iter()
                .filter(|r| r.business_id == business_id && r.actor_id == actor_id)
                .cloned()
                .collect())
        }

        async fn ai_decisions(&self, business_id: BusinessId) -> anyhow::Result<Vec<AiDecisionEntry>> {
            Ok(self.ai.lock().iter().filter(|e| e.business_id == business_id).cloned().collect())
        }
    }

}

#[cfg(feature = "memory-store")]
pub use memory::InMemoryJournal;
