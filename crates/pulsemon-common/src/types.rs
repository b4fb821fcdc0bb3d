use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped patient measurement for one metric.
///
/// Observations are produced by the ingestion subsystem (device sync,
/// manual entry, or assessment answers) and are immutable once recorded.
/// The alert engine reads them, never mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub organization_id: String,
    pub patient_id: String,
    pub metric_id: String,
    pub value: ObservationValue,
    pub unit: String,
    pub recorded_at: DateTime<Utc>,
    pub source: ObservationSource,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl Observation {
    /// The numeric value, if this observation carries one.
    pub fn numeric_value(&self) -> Option<f64> {
        match &self.value {
            ObservationValue::Numeric(v) => Some(*v),
            ObservationValue::Structured(_) => None,
        }
    }
}

/// Recorded value of an observation: a plain number for most vitals, or
/// a structured payload for compound measurements (e.g. blood pressure).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObservationValue {
    Numeric(f64),
    Structured(serde_json::Value),
}

/// How an observation entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationSource {
    Device,
    Manual,
    Assessment,
}

impl std::fmt::Display for ObservationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObservationSource::Device => write!(f, "device"),
            ObservationSource::Manual => write!(f, "manual"),
            ObservationSource::Assessment => write!(f, "assessment"),
        }
    }
}

impl std::str::FromStr for ObservationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "device" => Ok(ObservationSource::Device),
            "manual" => Ok(ObservationSource::Manual),
            "assessment" => Ok(ObservationSource::Assessment),
            _ => Err(format!("unknown observation source: {s}")),
        }
    }
}

/// Reference data describing a metric: canonical unit and normal range.
///
/// Owned by the metric registry subsystem; the engine only reads it to
/// resolve threshold metric keys and compute vitals deviation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub id: String,
    pub key: String,
    pub unit: String,
    pub normal_range: NormalRange,
}

/// Inclusive normal range for a metric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NormalRange {
    pub min: f64,
    pub max: f64,
}

impl NormalRange {
    /// Range width, guarded so degenerate ranges still normalize sanely.
    pub fn width(&self) -> f64 {
        let w = self.max - self.min;
        if w > f64::EPSILON {
            w
        } else {
            self.max.abs().max(1.0)
        }
    }
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use pulsemon_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Numeric rank for priority ordering, 1 (low) through 4 (critical).
    pub fn rank(&self) -> i64 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Triage lifecycle state of an alert.
///
/// The engine only ever creates alerts as [`AlertStatus::Pending`]; the
/// downstream triage workflow owns every later transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Pending => write!(f, "pending"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(AlertStatus::Pending),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// A fired alert, created once per matching non-suppressed rule.
///
/// Immutable after creation as far as this engine is concerned; the
/// triage workflow transitions `status` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub organization_id: String,
    pub patient_id: String,
    pub rule_id: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    /// Computed urgency in [0, 10].
    pub risk_score: f64,
    /// Deadline by which the alert must receive a response.
    pub sla_breach_time: DateTime<Utc>,
    /// Monotonic queue-ordering key; higher is more urgent.
    pub priority_rank: i64,
    pub triggered_at: DateTime<Utc>,
    /// Human-readable rendering of the condition that matched.
    pub matched_condition: String,
    /// The observation that triggered the evaluation.
    pub observation_id: String,
    /// Rendered dedupe key used for cooldown suppression lookups.
    pub dedupe_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
