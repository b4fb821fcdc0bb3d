//! In-memory store used by tests and single-process deployments.
//!
//! All four repository traits are implemented on one [`MemoryStore`] so a
//! test can seed metrics, rules, and observations against the same state
//! the engine evaluates. A single mutex guards the whole dataset, which
//! makes [`AlertStore::insert_alert`] naturally atomic: two racing
//! evaluations of the same `(rule_id, dedupe_key, cooldown_bucket)` see
//! exactly one `Created`.

use chrono::{DateTime, Utc};
use pulsemon_common::types::{Alert, MetricDefinition, Observation, ObservationSource};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::error::Result;
use crate::{
    AlertRuleRow, AlertStore, InsertOutcome, MetricStore, ObservationQuery, ObservationStore,
    RuleStore,
};

#[derive(Default)]
struct Inner {
    observations: Vec<Observation>,
    rules: Vec<AlertRuleRow>,
    alerts: Vec<Alert>,
    dedupe_index: HashSet<(String, String, i64)>,
    metrics: HashMap<String, MetricDefinition>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Total number of stored alerts, regardless of filters.
    pub fn alert_count(&self) -> usize {
        self.lock().alerts.len()
    }
}

impl ObservationStore for MemoryStore {
    fn insert_observation(&self, obs: &Observation) -> Result<()> {
        self.lock().observations.push(obs.clone());
        Ok(())
    }

    fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>> {
        let inner = self.lock();
        let mut results: Vec<Observation> = inner
            .observations
            .iter()
            .filter(|o| o.patient_id == query.patient_id)
            .filter(|o| {
                query
                    .metric_id
                    .as_deref()
                    .is_none_or(|m| o.metric_id == m)
            })
            .filter(|o| o.recorded_at >= query.from && o.recorded_at < query.to)
            .cloned()
            .collect();
        results.sort_by_key(|o| o.recorded_at);
        Ok(results)
    }

    fn latest_observation(
        &self,
        patient_id: &str,
        metric_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Observation>> {
        let inner = self.lock();
        Ok(inner
            .observations
            .iter()
            .filter(|o| o.patient_id == patient_id && o.metric_id == metric_id)
            .filter(|o| o.recorded_at >= from && o.recorded_at < to)
            .max_by_key(|o| o.recorded_at)
            .cloned())
    }

    fn count_observations(
        &self,
        patient_id: &str,
        source: Option<ObservationSource>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        let inner = self.lock();
        Ok(inner
            .observations
            .iter()
            .filter(|o| o.patient_id == patient_id)
            .filter(|o| source.is_none_or(|s| o.source == s))
            .filter(|o| o.recorded_at >= from && o.recorded_at < to)
            .count() as u64)
    }
}

impl RuleStore for MemoryStore {
    fn insert_rule(&self, row: &AlertRuleRow) -> Result<()> {
        self.lock().rules.push(row.clone());
        Ok(())
    }

    fn list_active_rules(&self, organization_id: &str) -> Result<Vec<AlertRuleRow>> {
        let inner = self.lock();
        Ok(inner
            .rules
            .iter()
            .filter(|r| r.enabled && r.organization_id == organization_id)
            .cloned()
            .collect())
    }

    fn get_rule_by_id(&self, id: &str) -> Result<Option<AlertRuleRow>> {
        let inner = self.lock();
        Ok(inner.rules.iter().find(|r| r.id == id).cloned())
    }
}

impl AlertStore for MemoryStore {
    fn insert_alert(&self, alert: &Alert, cooldown_bucket: i64) -> Result<InsertOutcome> {
        let mut inner = self.lock();
        let key = (
            alert.rule_id.clone(),
            alert.dedupe_key.clone(),
            cooldown_bucket,
        );
        if !inner.dedupe_index.insert(key) {
            return Ok(InsertOutcome::DuplicateInWindow);
        }
        inner.alerts.push(alert.clone());
        Ok(InsertOutcome::Created)
    }

    fn latest_alert_for_key(&self, rule_id: &str, dedupe_key: &str) -> Result<Option<Alert>> {
        let inner = self.lock();
        Ok(inner
            .alerts
            .iter()
            .filter(|a| a.rule_id == rule_id && a.dedupe_key == dedupe_key)
            .max_by_key(|a| a.triggered_at)
            .cloned())
    }

    fn get_alert_by_id(&self, id: &str) -> Result<Option<Alert>> {
        let inner = self.lock();
        Ok(inner.alerts.iter().find(|a| a.id == id).cloned())
    }

    fn query_alert_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        severity: Option<&str>,
        patient_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>> {
        let inner = self.lock();
        let mut results: Vec<Alert> = inner
            .alerts
            .iter()
            .filter(|a| a.triggered_at >= from && a.triggered_at < to)
            .filter(|a| severity.is_none_or(|s| a.severity.to_string() == s))
            .filter(|a| patient_id.is_none_or(|p| a.patient_id == p))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(results.into_iter().skip(offset).take(limit).collect())
    }
}

impl MetricStore for MemoryStore {
    fn upsert_metric(&self, def: &MetricDefinition) -> Result<()> {
        self.lock().metrics.insert(def.id.clone(), def.clone());
        Ok(())
    }

    fn get_metric_by_key(&self, key: &str) -> Result<Option<MetricDefinition>> {
        let inner = self.lock();
        Ok(inner.metrics.values().find(|m| m.key == key).cloned())
    }

    fn get_metric_by_id(&self, id: &str) -> Result<Option<MetricDefinition>> {
        let inner = self.lock();
        Ok(inner.metrics.get(id).cloned())
    }
}
