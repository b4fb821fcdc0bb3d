//! Recursive condition evaluation against one observation plus bounded
//! history.

use chrono::Duration;
use pulsemon_common::types::{MetricDefinition, Observation, ObservationSource};
use pulsemon_storage::{MetricStore, ObservationQuery, ObservationStore};

use crate::condition::{BoolOp, CompareOp, ConditionExpr};
use crate::config::EngineConfig;
use crate::error::{EvalError, Result};
use crate::pattern::{self, DayWindow};
use crate::EvalContext;

/// Stateless evaluator borrowing the stores and per-call context.
pub struct Evaluator<'a> {
    pub metrics: &'a dyn MetricStore,
    pub observations: &'a dyn ObservationStore,
    pub config: &'a EngineConfig,
    pub ctx: &'a EvalContext,
}

impl<'a> Evaluator<'a> {
    /// Evaluates `expr` with `obs` as the current observation.
    ///
    /// Recursion is bounded by the structural depth cap applied in
    /// [`ConditionExpr::validate`] before any evaluation starts.
    pub fn evaluate(&self, expr: &ConditionExpr, obs: &Observation) -> Result<bool> {
        match expr {
            ConditionExpr::Threshold {
                metric_key,
                operator,
                threshold,
                evaluation_window_secs,
            } => self.evaluate_threshold(
                obs,
                metric_key,
                *operator,
                *threshold,
                *evaluation_window_secs,
            ),
            ConditionExpr::Composite {
                operator,
                conditions,
            } => self.evaluate_composite(obs, *operator, conditions),
            ConditionExpr::MissedAssessment {} => self.evaluate_missed_assessment(obs),
            ConditionExpr::ConsecutivePattern {
                inner,
                required_consecutive_days,
            } => self.evaluate_consecutive(obs, inner, *required_consecutive_days),
        }
    }

    fn evaluate_threshold(
        &self,
        obs: &Observation,
        metric_key: &str,
        operator: CompareOp,
        threshold: f64,
        window_secs: Option<i64>,
    ) -> Result<bool> {
        let target = self
            .metrics
            .get_metric_by_key(metric_key)?
            .ok_or_else(|| EvalError::UnknownMetric(metric_key.to_string()))?;

        if obs.metric_id == target.id {
            let value = self.numeric_value_checked(obs, &target)?;
            return Ok(operator.check(value, threshold));
        }

        // The condition references a different metric than the triggering
        // observation: use that metric's most recent value within the
        // evaluation window ending at the observation's own timestamp.
        let window = Duration::seconds(
            window_secs.unwrap_or(self.config.default_evaluation_window_secs),
        );
        let latest = self.observations.latest_observation(
            &obs.patient_id,
            &target.id,
            obs.recorded_at - window,
            obs.recorded_at + Duration::milliseconds(1),
        )?;
        match latest {
            Some(other) => {
                let value = self.numeric_value_checked(&other, &target)?;
                Ok(operator.check(value, threshold))
            }
            None => Ok(false),
        }
    }

    fn numeric_value_checked(&self, obs: &Observation, def: &MetricDefinition) -> Result<f64> {
        if obs.unit != def.unit {
            return Err(EvalError::UnitMismatch {
                metric: def.key.clone(),
                observed: obs.unit.clone(),
                expected: def.unit.clone(),
            });
        }
        obs.numeric_value().ok_or_else(|| EvalError::NonNumericValue {
            observation_id: obs.id.clone(),
        })
    }

    fn evaluate_composite(
        &self,
        obs: &Observation,
        operator: BoolOp,
        conditions: &[ConditionExpr],
    ) -> Result<bool> {
        match operator {
            BoolOp::And => {
                for cond in conditions {
                    if !self.evaluate(cond, obs)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            BoolOp::Or => {
                for cond in conditions {
                    if self.evaluate(cond, obs)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    /// True when the patient has submitted no assessment inside the
    /// expected cadence window. Device and manual observations do not
    /// count: the arriving device reading is often exactly what triggers
    /// this check.
    fn evaluate_missed_assessment(&self, obs: &Observation) -> Result<bool> {
        let cadence = self
            .ctx
            .assessment_cadence
            .ok_or(EvalError::CadenceNotConfigured)?;
        let count = self.observations.count_observations(
            &obs.patient_id,
            Some(ObservationSource::Assessment),
            self.ctx.now - cadence,
            self.ctx.now,
        )?;
        Ok(count == 0)
    }

    fn evaluate_consecutive(
        &self,
        obs: &Observation,
        inner: &ConditionExpr,
        required_days: u32,
    ) -> Result<bool> {
        let windows =
            pattern::trailing_day_windows(self.ctx.now, required_days, self.ctx.day_offset);
        pattern::matches_consecutive(&windows, |window| self.day_satisfied(obs, inner, window))
    }

    /// A day is satisfied when at least one of the patient's observations
    /// recorded inside the window satisfies the inner condition.
    fn day_satisfied(
        &self,
        obs: &Observation,
        inner: &ConditionExpr,
        window: &DayWindow,
    ) -> Result<bool> {
        let query = ObservationQuery {
            patient_id: obs.patient_id.clone(),
            metric_id: None,
            from: window.start,
            to: window.end,
        };
        for candidate in self.observations.query_observations(&query)? {
            if self.evaluate(inner, &candidate)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
