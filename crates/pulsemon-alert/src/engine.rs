//! Evaluation orchestrator: load rules, evaluate, guard, score, emit.

use std::sync::Arc;

use chrono::Duration;
use pulsemon_common::types::{
    Alert, AlertStatus, MetricDefinition, Observation, ObservationSource,
};
use pulsemon_storage::{
    AlertStore, InsertOutcome, MetricStore, ObservationQuery, ObservationStore, RuleStore,
};

use crate::config::EngineConfig;
use crate::dedup;
use crate::error::{EvalError, Result};
use crate::evaluator::Evaluator;
use crate::rule_builder;
use crate::score::{self, Adherence};
use crate::sla;
use crate::{AlertRule, EvalContext};

/// Result of evaluating one observation: the alerts created plus every
/// per-rule failure that was skipped. Partial success is the expected
/// shape; one malformed rule never aborts the rest.
#[derive(Debug, Default)]
pub struct EvaluationOutcome {
    pub alerts: Vec<Alert>,
    pub failures: Vec<RuleFailure>,
}

/// A rule that could not be evaluated, reported alongside the alerts
/// that did fire.
#[derive(Debug)]
pub struct RuleFailure {
    pub rule_id: String,
    pub rule_name: String,
    pub error: EvalError,
}

/// The evaluation engine. Holds repository handles and tunables; all
/// evaluation state lives in storage, so one engine value serves
/// concurrent evaluations across patients.
pub struct AlertEngine {
    rules: Arc<dyn RuleStore>,
    observations: Arc<dyn ObservationStore>,
    alerts: Arc<dyn AlertStore>,
    metrics: Arc<dyn MetricStore>,
    config: EngineConfig,
}

impl AlertEngine {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        observations: Arc<dyn ObservationStore>,
        alerts: Arc<dyn AlertStore>,
        metrics: Arc<dyn MetricStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            rules,
            observations,
            alerts,
            metrics,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluates every active rule of the observation's organization
    /// against the observation.
    ///
    /// Returns the created alerts (zero, one, or many) in no guaranteed
    /// order; callers sort by `priority_rank` when queue order matters.
    /// Only a failure to load the rule set aborts the whole call.
    pub fn evaluate_observation(
        &self,
        obs: &Observation,
        ctx: &EvalContext,
    ) -> Result<EvaluationOutcome> {
        let rows = self.rules.list_active_rules(&obs.organization_id)?;
        let mut outcome = EvaluationOutcome::default();

        for row in &rows {
            let rule = match rule_builder::build_rule(row, self.config.max_expression_depth) {
                Ok(rule) => rule,
                Err(error) => {
                    tracing::warn!(
                        rule_id = %row.id,
                        rule_name = %row.name,
                        error = %error,
                        "Skipping invalid alert rule"
                    );
                    outcome.failures.push(RuleFailure {
                        rule_id: row.id.clone(),
                        rule_name: row.name.clone(),
                        error,
                    });
                    continue;
                }
            };

            match self.evaluate_rule(&rule, obs, ctx) {
                Ok(Some(alert)) => outcome.alerts.push(alert),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(
                        rule_id = %rule.id,
                        rule_name = %rule.name,
                        patient_id = %obs.patient_id,
                        error = %error,
                        "Rule evaluation failed"
                    );
                    outcome.failures.push(RuleFailure {
                        rule_id: rule.id.clone(),
                        rule_name: rule.name.clone(),
                        error,
                    });
                }
            }
        }

        tracing::debug!(
            observation_id = %obs.id,
            patient_id = %obs.patient_id,
            rule_count = rows.len(),
            alert_count = outcome.alerts.len(),
            failure_count = outcome.failures.len(),
            "Observation evaluated"
        );
        Ok(outcome)
    }

    /// Runs one rule end to end: condition, cooldown guard, scoring,
    /// atomic persist. `Ok(None)` means no match or suppressed.
    fn evaluate_rule(
        &self,
        rule: &AlertRule,
        obs: &Observation,
        ctx: &EvalContext,
    ) -> Result<Option<Alert>> {
        let evaluator = Evaluator {
            metrics: self.metrics.as_ref(),
            observations: self.observations.as_ref(),
            config: &self.config,
            ctx,
        };
        if !evaluator.evaluate(&rule.condition, obs)? {
            return Ok(None);
        }

        let dedupe_key = dedup::render_dedupe_key(&rule.dedupe_key_template, rule, obs);
        if dedup::should_suppress(self.alerts.as_ref(), rule, &dedupe_key, ctx.now)? {
            tracing::debug!(
                rule_id = %rule.id,
                patient_id = %obs.patient_id,
                dedupe_key = %dedupe_key,
                "Alert suppressed (cooldown)"
            );
            return Ok(None);
        }

        let alert = self.build_alert(rule, obs, ctx, dedupe_key)?;
        let bucket = dedup::cooldown_bucket(ctx.now, rule.cooldown.num_seconds());
        match self.alerts.insert_alert(&alert, bucket)? {
            InsertOutcome::Created => Ok(Some(alert)),
            InsertOutcome::DuplicateInWindow => {
                tracing::debug!(
                    rule_id = %rule.id,
                    patient_id = %obs.patient_id,
                    dedupe_key = %alert.dedupe_key,
                    "Alert suppressed (lost dedup race)"
                );
                Ok(None)
            }
        }
    }

    fn build_alert(
        &self,
        rule: &AlertRule,
        obs: &Observation,
        ctx: &EvalContext,
        dedupe_key: String,
    ) -> Result<Alert> {
        let metric = self.metrics.get_metric_by_id(&obs.metric_id)?;
        let risk_score = self.compute_risk(rule, obs, ctx, metric.as_ref())?;
        let matched_condition = rule.condition.describe();
        let message = match obs.numeric_value() {
            Some(value) => format!(
                "{matched_condition} for patient {} (observed {value:.1})",
                obs.patient_id
            ),
            None => format!("{matched_condition} for patient {}", obs.patient_id),
        };

        Ok(Alert {
            id: pulsemon_common::id::next_id(),
            organization_id: obs.organization_id.clone(),
            patient_id: obs.patient_id.clone(),
            rule_id: rule.id.clone(),
            severity: rule.severity,
            status: AlertStatus::Pending,
            message,
            risk_score,
            sla_breach_time: sla::sla_breach_time(rule.severity, ctx.now, &self.config.sla),
            priority_rank: sla::priority_rank(rule.severity, risk_score),
            triggered_at: ctx.now,
            matched_condition,
            observation_id: obs.id.clone(),
            dedupe_key,
            created_at: ctx.now,
            updated_at: ctx.now,
        })
    }

    /// Combines vitals deviation, trend velocity, and adherence penalty.
    /// An observation whose metric is missing from the registry still
    /// alerts (e.g. missed-assessment rules); its deviation and trend
    /// inputs are simply zero.
    fn compute_risk(
        &self,
        rule: &AlertRule,
        obs: &Observation,
        ctx: &EvalContext,
        metric: Option<&MetricDefinition>,
    ) -> Result<f64> {
        let adherence = self.adherence(obs, ctx)?;

        let (deviation, trend) = match (metric, obs.numeric_value()) {
            (Some(def), Some(value)) => {
                let history = self.trend_history(obs, ctx)?;
                (
                    score::range_deviation(value, def),
                    score::trend_velocity(&history, value, def),
                )
            }
            _ => (0.0, 0.0),
        };

        Ok(score::risk_score(
            deviation,
            trend,
            adherence.penalty(),
            rule.severity,
        ))
    }

    /// Trailing same-metric observations (including the new one) for the
    /// trend regression, bounded by the configured lookback and window
    /// size.
    fn trend_history(&self, obs: &Observation, ctx: &EvalContext) -> Result<Vec<Observation>> {
        let lookback = Duration::hours(self.config.history_lookback_hours);
        let mut history = self.observations.query_observations(&ObservationQuery {
            patient_id: obs.patient_id.clone(),
            metric_id: Some(obs.metric_id.clone()),
            from: ctx.now - lookback,
            to: ctx.now + Duration::milliseconds(1),
        })?;
        if !history.iter().any(|o| o.id == obs.id) {
            history.push(obs.clone());
        }
        let excess = history.len().saturating_sub(self.config.trend_window_points);
        Ok(history.split_off(excess))
    }

    /// Missed/expected assessment counts over the lookback, zero when no
    /// cadence is configured.
    fn adherence(&self, obs: &Observation, ctx: &EvalContext) -> Result<Adherence> {
        let Some(cadence) = ctx.assessment_cadence else {
            return Ok(Adherence::default());
        };
        let cadence_secs = cadence.num_seconds();
        if cadence_secs <= 0 {
            return Ok(Adherence::default());
        }
        let lookback = Duration::hours(self.config.history_lookback_hours);
        let expected = (lookback.num_seconds() / cadence_secs).max(0) as u32;
        if expected == 0 {
            return Ok(Adherence::default());
        }
        let actual = self.observations.count_observations(
            &obs.patient_id,
            Some(ObservationSource::Assessment),
            ctx.now - lookback,
            ctx.now,
        )? as u32;
        Ok(Adherence {
            missed: expected.saturating_sub(actual),
            expected,
        })
    }
}
