#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bos-policy** – Declarative compliance rule evaluation (C7).
//!
//! A compliance profile is a named, ordered list of [`ComplianceRule`]s a
//! business has opted into. Each rule is evaluated as a pure
//! `fn(&Command) -> Option<Rejection>`; [`evaluate_profile`] runs them in
//! order and stops at the first violation.

use bos_types::{ActorType, Command, Rejection, RejectionCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One declarative rule within a compliance profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComplianceRule {
    /// `payload.<field>` must be present and non-null.
    RequireField {
        /// Dotted path into the command payload, e.g. `"customer.tax_id"`.
        field: String,
    },
    /// `payload.<field>` (read as a number) must not exceed `max`.
    MaxValue {
        /// Dotted path into the command payload.
        field: String,
        /// Inclusive upper bound.
        max: f64,
    },
    /// `payload.<field>` (read as a number) must be at least `min`.
    MinValue {
        /// Dotted path into the command payload.
        field: String,
        /// Inclusive lower bound.
        min: f64,
    },
    /// Only the named actor type may issue this command.
    EnforceActorType {
        /// The sole permitted actor type.
        allowed: ActorType,
    },
}

impl ComplianceRule {
    /// Evaluate this rule against `command`; `None` means it passed.
    pub fn evaluate(&self, command: &Command) -> Option<Rejection> {
        match self {
            ComplianceRule::RequireField { field } => {
                let present = lookup(&command.payload, field).map(|v| !v.is_null()).unwrap_or(false);
                if present {
                    None
                } else {
                    Some(Rejection::new(
                        RejectionCode::ComplianceViolation,
                        "require_field",
                        format!("field '{field}' is required by the active compliance profile"),
                    ))
                }
            }
            ComplianceRule::MaxValue { field, max } => match lookup(&command.payload, field).and_then(Value::as_f64) {
                Some(value) if value > *max => Some(Rejection::new(
                    RejectionCode::ComplianceViolation,
                    "max_value",
                    format!("field '{field}' = {value} exceeds maximum {max}"),
                )),
                _ => None,
            },
            ComplianceRule::MinValue { field, min } => match lookup(&command.payload, field).and_then(Value::as_f64) {
                Some(value) if value < *min => Some(Rejection::new(
                    RejectionCode::ComplianceViolation,
                    "min_value",
                    format!("field '{field}' = {value} is below minimum {min}"),
                )),
                _ => None,
            },
            ComplianceRule::EnforceActorType { allowed } => {
                if command.actor_type == *allowed {
                    None
                } else {
                    Some(Rejection::new(
                        RejectionCode::ComplianceViolation,
                        "enforce_actor_type",
                        format!("only {allowed} actors may issue this command"),
                    ))
                }
            }
        }
    }
}

fn lookup<'a>(payload: &'a Value, dotted_field: &str) -> Option<&'a Value> {
    let mut current = payload;
    for segment in dotted_field.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// A named, ordered set of compliance rules a business has adopted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceProfile {
    /// Human-readable profile name, e.g. `"eu-retail-v1"`.
    pub name: String,
    /// Rules evaluated in order; the first violation wins.
    pub rules: Vec<ComplianceRule>,
}

impl ComplianceProfile {
    /// Build an empty, named profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rules: Vec::new(),
        }
    }

    /// Add a rule, builder-style.
    pub fn with_rule(mut self, rule: ComplianceRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Evaluate every rule in `profile` against `command`, returning the first
/// violation encountered, or `None` if the command complies.
pub fn evaluate_profile(profile: &ComplianceProfile, command: &Command) -> Option<Rejection> {
    profile.rules.iter().find_map(|rule| {
        rule.evaluate(command).map(|mut rejection| {
            rejection.policy_name = format!("{}:{}", profile.name, rejection.policy_name);
            rejection
        })
    })
}
