//! Risk scoring: a 0-10 urgency combining vitals deviation, trend
//! velocity, and adherence penalty, scaled by rule severity.
//!
//! Contract pinned by the scoring design: CRITICAL rules triggered by
//! values far outside the normal range score above 7; HIGH rules with
//! moderate deviation score above 3. Everything else is tunable as long
//! as each input stays monotonic and bounded in [0, 1].

use chrono::Duration;
use pulsemon_common::types::{MetricDefinition, Observation, Severity};

const VITALS_WEIGHT: f64 = 0.5;
const TREND_WEIGHT: f64 = 0.3;
const ADHERENCE_WEIGHT: f64 = 0.2;
const SCORE_SCALE: f64 = 10.0;

/// Assessment adherence over the history lookback.
#[derive(Debug, Clone, Copy, Default)]
pub struct Adherence {
    pub missed: u32,
    pub expected: u32,
}

impl Adherence {
    /// `missed / expected`, clamped to [0, 1]; zero when no cadence is
    /// configured (`expected == 0`).
    pub fn penalty(&self) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        clamp01(f64::from(self.missed) / f64::from(self.expected))
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

pub fn severity_multiplier(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 0.75,
        Severity::Medium => 1.0,
        Severity::High => 1.5,
        Severity::Critical => 2.0,
    }
}

/// Distance outside the normal range, normalized by range width and
/// clamped to [0, 1]. Zero anywhere inside the range; saturates at 1.0
/// once the value is a full range-width beyond either bound.
pub fn range_deviation(value: f64, def: &MetricDefinition) -> f64 {
    let range = def.normal_range;
    let overshoot = if value > range.max {
        value - range.max
    } else if value < range.min {
        range.min - value
    } else {
        return 0.0;
    };
    clamp01(overshoot / range.width())
}

/// Rate of worsening across the trailing same-metric observations,
/// normalized to [0, 1].
///
/// Least-squares slope over (recorded_at, value), in range-widths per
/// day. Only movement further outside the violated bound counts: a
/// rising value already above the max worsens, a falling value below the
/// min worsens, anything else scores 0.
pub fn trend_velocity(history: &[Observation], current: f64, def: &MetricDefinition) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }

    let base_ts = history[0].recorded_at.timestamp() as f64;
    let mut n = 0.0;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_x2 = 0.0;

    for obs in history {
        let Some(y) = obs.numeric_value() else {
            continue;
        };
        let x = obs.recorded_at.timestamp() as f64 - base_ts;
        n += 1.0;
        sum_x += x;
        sum_y += y;
        sum_xy += x * y;
        sum_x2 += x * x;
    }

    if n < 2.0 {
        return 0.0;
    }
    let denom = n * sum_x2 - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return 0.0;
    }
    let slope_per_sec = (n * sum_xy - sum_x * sum_y) / denom;

    let range = def.normal_range;
    let worsening = if current >= range.max {
        slope_per_sec
    } else if current <= range.min {
        -slope_per_sec
    } else {
        return 0.0;
    };
    if worsening <= 0.0 {
        return 0.0;
    }

    let per_day = worsening * Duration::days(1).num_seconds() as f64;
    clamp01(per_day / range.width())
}

/// Combined 0-10 risk score.
pub fn risk_score(
    vitals_deviation: f64,
    trend_velocity: f64,
    adherence_penalty: f64,
    severity: Severity,
) -> f64 {
    let raw = SCORE_SCALE
        * (VITALS_WEIGHT * clamp01(vitals_deviation)
            + TREND_WEIGHT * clamp01(trend_velocity)
            + ADHERENCE_WEIGHT * clamp01(adherence_penalty));
    (raw * severity_multiplier(severity)).clamp(0.0, 10.0)
}
