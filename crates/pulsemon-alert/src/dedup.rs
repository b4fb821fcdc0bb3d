//! Dedup key rendering and cooldown suppression.
//!
//! The guard runs in two layers: a precise read of the most recent alert
//! for `(rule_id, dedupe_key)` against the rule's cooldown, then the
//! storage layer's unique `(rule_id, dedupe_key, cooldown_bucket)` index
//! as the atomic backstop for concurrent evaluations (see
//! [`InsertOutcome::DuplicateInWindow`](pulsemon_storage::InsertOutcome)).

use chrono::{DateTime, Utc};
use pulsemon_common::types::Observation;
use pulsemon_storage::AlertStore;

use crate::error::Result;
use crate::AlertRule;

/// Substitutes `{patientId}`-style placeholders in the rule's dedupe key
/// template. Unknown placeholders are left verbatim so a mistyped
/// template still produces a stable (if odd-looking) key.
pub fn render_dedupe_key(template: &str, rule: &AlertRule, obs: &Observation) -> String {
    template
        .replace("{patientId}", &obs.patient_id)
        .replace("{metricId}", &obs.metric_id)
        .replace("{organizationId}", &obs.organization_id)
        .replace("{ruleId}", &rule.id)
}

/// Bucket index for the unique-insert backstop. Two inserts with the
/// same key inside one cooldown span land in the same bucket and
/// collide; with a zero or negative cooldown every insert gets its own
/// bucket and suppression is disabled.
pub fn cooldown_bucket(now: DateTime<Utc>, cooldown_secs: i64) -> i64 {
    if cooldown_secs <= 0 {
        return now.timestamp_millis();
    }
    now.timestamp().div_euclid(cooldown_secs)
}

/// Returns true when the most recent alert for this rule and key is
/// still inside the cooldown window.
pub fn should_suppress(
    alerts: &dyn AlertStore,
    rule: &AlertRule,
    dedupe_key: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    if rule.cooldown <= chrono::Duration::zero() {
        return Ok(false);
    }
    let previous = alerts.latest_alert_for_key(&rule.id, dedupe_key)?;
    Ok(previous.is_some_and(|alert| now - alert.triggered_at < rule.cooldown))
}
