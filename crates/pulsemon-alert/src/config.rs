use serde::{Deserialize, Serialize};

/// Tunable engine settings, deserializable from a JSON config document.
///
/// Every field has a default so an empty `{}` yields a working engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of trailing same-metric observations fed into the trend
    /// velocity regression.
    #[serde(default = "default_trend_window_points")]
    pub trend_window_points: usize,

    /// How far back history queries reach for trend and adherence inputs.
    #[serde(default = "default_history_lookback_hours")]
    pub history_lookback_hours: i64,

    /// Lookback for cross-metric threshold conditions that do not set
    /// their own `evaluation_window_secs`.
    #[serde(default = "default_evaluation_window_secs")]
    pub default_evaluation_window_secs: i64,

    /// Hard cap on condition tree nesting.
    #[serde(default = "default_max_expression_depth")]
    pub max_expression_depth: usize,

    #[serde(default)]
    pub sla: SlaConfig,
}

fn default_trend_window_points() -> usize {
    5
}

fn default_history_lookback_hours() -> i64 {
    72
}

fn default_evaluation_window_secs() -> i64 {
    86400
}

fn default_max_expression_depth() -> usize {
    32
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trend_window_points: default_trend_window_points(),
            history_lookback_hours: default_history_lookback_hours(),
            default_evaluation_window_secs: default_evaluation_window_secs(),
            max_expression_depth: default_max_expression_depth(),
            sla: SlaConfig::default(),
        }
    }
}

/// Minutes until SLA breach per severity.
///
/// Defaults follow the severity ordering contract: stricter severities
/// always breach sooner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaConfig {
    #[serde(default = "default_critical_minutes")]
    pub critical_minutes: i64,
    #[serde(default = "default_high_minutes")]
    pub high_minutes: i64,
    #[serde(default = "default_medium_minutes")]
    pub medium_minutes: i64,
    #[serde(default = "default_low_minutes")]
    pub low_minutes: i64,
}

fn default_critical_minutes() -> i64 {
    30
}

fn default_high_minutes() -> i64 {
    120
}

fn default_medium_minutes() -> i64 {
    480
}

fn default_low_minutes() -> i64 {
    1440
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            critical_minutes: default_critical_minutes(),
            high_minutes: default_high_minutes(),
            medium_minutes: default_medium_minutes(),
            low_minutes: default_low_minutes(),
        }
    }
}
