//! Persistence layer for observations, alert rules, and fired alerts.
//!
//! The engine talks to storage exclusively through the repository traits
//! defined here ([`ObservationStore`], [`RuleStore`], [`AlertStore`],
//! [`MetricStore`]). Two implementations ship with the workspace: an
//! in-memory store ([`memory::MemoryStore`]) for tests and race
//! simulation, and a SQLite store ([`sqlite::SqliteStore`]) with WAL mode
//! for concurrent reads.

pub mod error;
pub mod memory;
pub mod sqlite;


use chrono::{DateTime, Utc};
use pulsemon_common::types::{Alert, MetricDefinition, Observation, ObservationSource};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Parameters for a time-range observation query, scoped to a single
/// patient and optionally one metric.
///
/// The range is half-open: `from <= recorded_at < to`.
///
/// # Examples
///
/// ```
/// use pulsemon_storage::ObservationQuery;
/// use chrono::{Duration, Utc};
///
/// let now = Utc::now();
/// let query = ObservationQuery {
///     patient_id: "patient-17".into(),
///     metric_id: Some("metric-pain".into()),
///     from: now - Duration::hours(72),
///     to: now,
/// };
/// assert!(query.metric_id.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct ObservationQuery {
    pub patient_id: String,
    pub metric_id: Option<String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Alert rule data row, as authored and stored by the rule-management
/// subsystem. The engine reads rows and builds typed rules from them;
/// the condition and actions columns are JSON documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRuleRow {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub severity: String,
    pub enabled: bool,
    pub priority: i32,
    pub condition_json: String,
    pub dedupe_key_template: String,
    pub cooldown_secs: i64,
    pub actions_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of an atomic alert insert.
///
/// `DuplicateInWindow` means another evaluation already created an alert
/// for the same `(rule_id, dedupe_key, cooldown_bucket)`: the caller
/// lost the dedup race and must treat the insert as a suppression, not
/// an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    DuplicateInWindow,
}

/// Read/write access to patient observations.
///
/// Implementations must be safe to share across threads (`Send + Sync`)
/// because evaluations run concurrently across patients.
pub trait ObservationStore: Send + Sync {
    /// Persists one observation.
    fn insert_observation(&self, obs: &Observation) -> Result<()>;

    /// Queries observations matching the given patient, optional metric,
    /// and half-open time range, ordered by `recorded_at` ascending.
    fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>>;

    /// Returns the most recent observation for the patient and metric
    /// within `[from, to)`, if any.
    fn latest_observation(
        &self,
        patient_id: &str,
        metric_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Observation>>;

    /// Counts observations for the patient (any metric) in `[from, to)`,
    /// optionally restricted to one source (e.g. assessments only).
    fn count_observations(
        &self,
        patient_id: &str,
        source: Option<ObservationSource>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64>;
}

/// Read access to alert rule configuration.
pub trait RuleStore: Send + Sync {
    /// Persists one rule row. Rule authoring lives in another subsystem;
    /// this exists for seeding and tests.
    fn insert_rule(&self, row: &AlertRuleRow) -> Result<()>;

    /// Returns every enabled rule for the organization.
    fn list_active_rules(&self, organization_id: &str) -> Result<Vec<AlertRuleRow>>;

    /// Gets a single rule row by ID.
    fn get_rule_by_id(&self, id: &str) -> Result<Option<AlertRuleRow>>;
}

/// Read/write access to fired alerts and their dedup records.
pub trait AlertStore: Send + Sync {
    /// Atomically persists an alert, enforcing uniqueness on
    /// `(rule_id, dedupe_key, cooldown_bucket)`.
    fn insert_alert(&self, alert: &Alert, cooldown_bucket: i64) -> Result<InsertOutcome>;

    /// Returns the most recently triggered alert for the given rule and
    /// dedupe key, if any.
    fn latest_alert_for_key(&self, rule_id: &str, dedupe_key: &str) -> Result<Option<Alert>>;

    /// Gets a single alert by ID.
    fn get_alert_by_id(&self, id: &str) -> Result<Option<Alert>>;

    /// Queries alert history with optional severity and patient filters,
    /// newest first.
    fn query_alert_history(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        severity: Option<&str>,
        patient_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Alert>>;
}

/// Read access to the metric definition registry.
pub trait MetricStore: Send + Sync {
    /// Persists one metric definition. The registry is owned elsewhere;
    /// this exists for seeding and tests.
    fn upsert_metric(&self, def: &MetricDefinition) -> Result<()>;

    /// Resolves a metric by its key (e.g. `"pain"`).
    fn get_metric_by_key(&self, key: &str) -> Result<Option<MetricDefinition>>;

    /// Resolves a metric by its ID.
    fn get_metric_by_id(&self, id: &str) -> Result<Option<MetricDefinition>>;
}
