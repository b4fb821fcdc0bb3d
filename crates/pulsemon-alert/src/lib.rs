//! Alert evaluation engine for clinical observations.
//!
//! Given a newly recorded [`Observation`](pulsemon_common::types::Observation),
//! the engine loads the active rules for the patient's organization,
//! evaluates each rule's condition tree against the observation plus a
//! bounded history window, suppresses redundant re-triggers via per-rule
//! cooldowns, computes a 0-10 risk score and an SLA deadline, and persists
//! one [`Alert`](pulsemon_common::types::Alert) per matching rule.
//!
//! Rule failures are isolated: a malformed condition or an unknown metric
//! skips that rule only and is reported alongside the created alerts.

pub mod condition;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod pattern;
pub mod rule_builder;
pub mod score;
pub mod sla;

#[cfg(test)]
mod tests;

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use pulsemon_common::types::Severity;
use serde::{Deserialize, Serialize};

use crate::condition::ConditionExpr;

/// A fully parsed, validated alert rule ready for evaluation.
///
/// Built from a stored [`AlertRuleRow`](pulsemon_storage::AlertRuleRow)
/// by [`rule_builder::build_rule`]; rows that fail to parse are skipped
/// per-rule and never reach the evaluator.
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub severity: Severity,
    pub priority: i32,
    pub condition: ConditionExpr,
    pub dedupe_key_template: String,
    pub cooldown: Duration,
    pub actions: RuleActions,
}

/// Downstream actions attached to a rule. The engine records them on the
/// rule; the notification dispatcher consumes them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default)]
    pub notify: Vec<String>,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default)]
    pub auto_resolve: bool,
}

/// Per-call evaluation settings supplied by the caller.
///
/// `now` is injected rather than read from the clock so cooldown and SLA
/// behavior is deterministic under test. `day_offset` is the
/// organization's configured UTC offset, used only to derive the
/// `[start, end)` calendar-day windows consumed by the pattern tracker.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub now: DateTime<Utc>,
    /// Expected assessment cadence for the patient, when configured.
    /// Drives missed-assessment conditions and the adherence penalty.
    pub assessment_cadence: Option<Duration>,
    pub day_offset: FixedOffset,
}

impl EvalContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            assessment_cadence: None,
            day_offset: Utc.fix(),
        }
    }

    pub fn with_cadence(mut self, cadence: Duration) -> Self {
        self.assessment_cadence = Some(cadence);
        self
    }

    pub fn with_day_offset(mut self, offset: FixedOffset) -> Self {
        self.day_offset = offset;
        self
    }
}
