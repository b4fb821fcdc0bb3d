//! Stored rule row -> typed [`AlertRule`] conversion.
//!
//! Rule rows are authored elsewhere and arrive as JSON columns; anything
//! that fails to parse fails only that rule.

use chrono::Duration;
use pulsemon_common::types::Severity;
use pulsemon_storage::AlertRuleRow;

use crate::condition::ConditionExpr;
use crate::error::{EvalError, Result};
use crate::{AlertRule, RuleActions};

/// Convert a single row into a typed rule, validating the condition
/// structurally.
pub fn build_rule(row: &AlertRuleRow, max_depth: usize) -> Result<AlertRule> {
    let severity: Severity = row.severity.parse().map_err(|reason| EvalError::InvalidRule {
        reason,
    })?;

    let condition: ConditionExpr =
        serde_json::from_str(&row.condition_json).map_err(|e| EvalError::InvalidRule {
            reason: format!("invalid condition: {e}"),
        })?;
    condition.validate(max_depth)?;

    let actions: RuleActions = if row.actions_json.trim().is_empty() {
        RuleActions::default()
    } else {
        serde_json::from_str(&row.actions_json).map_err(|e| EvalError::InvalidRule {
            reason: format!("invalid actions: {e}"),
        })?
    };

    Ok(AlertRule {
        id: row.id.clone(),
        organization_id: row.organization_id.clone(),
        name: row.name.clone(),
        severity,
        priority: row.priority,
        condition,
        dedupe_key_template: row.dedupe_key_template.clone(),
        cooldown: Duration::seconds(row.cooldown_secs),
        actions,
    })
}
