use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The only condition type aegis resources report.
pub const AVAILABLE: &str = "Available";

pub const REASON_RECONCILING: &str = "Reconciling";
pub const REASON_RECONCILED: &str = "Reconciled";

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    pub last_transition_time: Option<DateTime<Utc>>,
    pub observed_generation: Option<i64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Resources whose status carries a type-keyed condition list.
pub trait HasConditions {
    fn conditions(&self) -> &[Condition];

    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions().iter().find(|c| c.type_ == type_)
    }

    /// Replaces the condition with the same type, keeping its position.
    /// The transition time only moves when the status changes.
    fn set_condition(&mut self, mut condition: Condition) {
        let conditions = self.conditions_mut();
        match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => conditions.push(condition),
        }
    }
}

// === impl Condition ===

impl Condition {
    pub fn available(
        status: ConditionStatus,
        reason: &str,
        message: impl Into<String>,
        generation: Option<i64>,
    ) -> Self {
        Self {
            type_: AVAILABLE.to_string(),
            status,
            reason: reason.to_string(),
            message: message.into(),
            last_transition_time: Some(Utc::now()),
            observed_generation: generation,
        }
    }

    /// The condition set when reconciliation of a resource begins.
    pub fn reconciling(generation: Option<i64>) -> Self {
        Self::available(
            ConditionStatus::Unknown,
            REASON_RECONCILING,
            "Starting reconciliation",
            generation,
        )
    }

    pub fn reconciled(message: impl Into<String>, generation: Option<i64>) -> Self {
        Self::available(
            ConditionStatus::True,
            REASON_RECONCILED,
            message,
            generation,
        )
    }
}
