#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-resilience** – Resilience mode and feature-flag state (C11).
//!
//! Both are ordinary event-sourced read models: a business's resilience
//! mode and its per-engine feature flags only change because a
//! `resilience.mode.set.v1` or `feature_flag.set.v1` event was folded in.
//! This crate holds that folded state and the fold function itself; the
//! guard pipeline (`bos-guard`) only ever reads it.

use std::collections::HashSet;

use bos_types::{BusinessId, Event};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Operating mode a business's write path currently honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResilienceMode {
    /// All commands are processed normally.
    Normal,
    /// Only commands in the essential allowlist are processed; everything
    /// else is rejected with `READ_ONLY_MODE`-adjacent handling at the
    /// guard layer.
    Degraded,
    /// No mutating command is processed.
    ReadOnly,
}

impl Default for ResilienceMode {
    fn default() -> Self {
        ResilienceMode::Normal
    }
}

/// Event-sourced resilience mode and feature-flag state for every business.
#[derive(Debug, Default)]
pub struct ResilienceState {
    modes: DashMap<BusinessId, ResilienceMode>,
    flags: DashMap<(BusinessId, String), bool>,
    essential_commands: HashSet<String>,
}

impl ResilienceState {
    /// Build state with a fixed set of command types considered essential
    /// (still processed while a business is `DEGRADED`).
    pub fn new(essential_commands: impl IntoIterator<Item = String>) -> Self {
        Self {
            modes: DashMap::new(),
            flags: DashMap::new(),
            essential_commands: essential_commands.into_iter().collect(),
        }
    }

    /// Current resilience mode for `business_id`; `NORMAL` until a mode-set
    /// event has been folded in.
    pub fn mode(&self, business_id: BusinessId) -> ResilienceMode {
        self.modes.get(&business_id).map(|m| *m).unwrap_or_default()
    }

    /// Whether `feature_key` is enabled for `business_id`. Fails closed:
    /// an engine whose flag has never been set is treated as disabled. The
    /// empty key is reserved for bootstrap command classes with no engine
    /// feature gate at all (e.g. creating the business that would own the
    /// flag in the first place) and is always enabled.
    pub fn feature_enabled(&self, business_id: BusinessId, feature_key: &str) -> bool {
        if feature_key.is_empty() {
            return true;
        }
        self.flags
            .get(&(business_id, feature_key.to_string()))
            .map(|v| *v)
            .unwrap_or(false)
    }

    /// Whether `command_type` is processed even while `DEGRADED`.
    pub fn is_essential(&self, command_type: &str) -> bool {
        self.essential_commands.contains(command_type)
    }

    /// Fold a committed event into resilience/feature-flag state. Unknown
    /// event types are ignored; this projection only cares about two.
    pub fn apply_event(&self, event: &Event) {
        match event.event_type.as_str() {
            "resilience.mode.set.v1" => {
                if let Ok(mode) = serde_json::from_value::<ResilienceMode>(
                    event.payload.get("mode").cloned().unwrap_or_default(),
                ) {
                    self.modes.insert(event.business_id, mode);
                }
            }
            "feature_flag.set.v1" => {
                let key = event.payload.get("feature_key").and_then(|v| v.as_str());
                let enabled = event.payload.get("enabled").and_then(|v| v.as_bool());
                if let (Some(key), Some(enabled)) = (key, enabled) {
                    self.flags.insert((event.business_id, key.to_string()), enabled);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_types::{ActorType, EventStatus};
    use uuid::Uuid;

    fn event(business_id: BusinessId, event_type: &str, payload: serde_json::Value) -> Event {
        Event {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            event_version: 1,
            business_id,
            branch_id: None,
            source_engine: "resilience".into(),
            actor_type: ActorType::System,
            actor_id: "system".into(),
            correlation_id: Uuid::new_v4().to_string(),
            causation_id: None,
            payload,
            reference: None,
            created_at: chrono::Utc::now(),
            received_at: chrono::Utc::now(),
            status: EventStatus::Final,
            correction_of: None,
            previous_event_hash: "GENESIS".into(),
            event_hash: "ignored-in-this-test".into(),
        }
    }

    #[test]
    fn defaults_to_normal_and_disabled() {
        let state = ResilienceState::new([]);
        let business = BusinessId::new();
        assert_eq!(state.mode(business), ResilienceMode::Normal);
        assert!(!state.feature_enabled(business, "ledger"));
    }

    #[test]
    fn empty_feature_key_is_always_enabled() {
        let state = ResilienceState::new([]);
        assert!(state.feature_enabled(BusinessId::new(), ""));
    }

    #[test]
    fn folds_mode_and_flag_events() {
        let state = ResilienceState::new(["identity.business.bootstrap".to_string()]);
        let business = BusinessId::new();

        state.apply_event(&event(business, "resilience.mode.set.v1", serde_json::json!({"mode": "READ_ONLY"})));
        assert_eq!(state.mode(business), ResilienceMode::ReadOnly);

        state.apply_event(&event(
            business,
            "feature_flag.set.v1",
            serde_json::json!({"feature_key": "ledger", "enabled": true}),
        ));
        assert!(state.feature_enabled(business, "ledger"));

        assert!(state.is_essential("identity.business.bootstrap"));
        assert!(!state.is_essential("ledger.entry.post"));
    }
}
