//! SLA deadlines and triage queue ordering.

use chrono::{DateTime, Duration, Utc};
use pulsemon_common::types::Severity;

use crate::config::SlaConfig;

/// Deadline by which a fired alert must receive a response.
///
/// Invariant: stricter severities always breach sooner.
/// `critical < high < medium < low` in time-to-breach, each strictly
/// after `now`.
pub fn sla_breach_time(severity: Severity, now: DateTime<Utc>, config: &SlaConfig) -> DateTime<Utc> {
    let minutes = match severity {
        Severity::Critical => config.critical_minutes,
        Severity::High => config.high_minutes,
        Severity::Medium => config.medium_minutes,
        Severity::Low => config.low_minutes,
    };
    now + Duration::minutes(minutes.max(1))
}

/// Monotonic queue-ordering key: severity dominates, risk score breaks
/// ties within a severity band. Higher is more urgent.
pub fn priority_rank(severity: Severity, risk_score: f64) -> i64 {
    severity.rank() * 1000 + (risk_score.clamp(0.0, 10.0) * 10.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breach_times_are_strictly_ordered_by_severity() {
        let now = Utc::now();
        let config = SlaConfig::default();
        let critical = sla_breach_time(Severity::Critical, now, &config);
        let high = sla_breach_time(Severity::High, now, &config);
        let medium = sla_breach_time(Severity::Medium, now, &config);
        let low = sla_breach_time(Severity::Low, now, &config);

        assert!(now < critical);
        assert!(critical < high);
        assert!(high < medium);
        assert!(medium < low);
    }

    #[test]
    fn default_magnitudes_match_contract() {
        let now = Utc::now();
        let config = SlaConfig::default();
        assert_eq!(
            sla_breach_time(Severity::Critical, now, &config),
            now + Duration::minutes(30)
        );
        assert_eq!(
            sla_breach_time(Severity::Low, now, &config),
            now + Duration::hours(24)
        );
    }

    #[test]
    fn severity_dominates_priority_rank() {
        // A maxed-out LOW alert still ranks below a zero-risk MEDIUM one.
        assert!(priority_rank(Severity::Medium, 0.0) > priority_rank(Severity::Low, 10.0));
        assert!(priority_rank(Severity::Critical, 2.0) > priority_rank(Severity::High, 9.9));
    }

    #[test]
    fn risk_breaks_ties_within_severity() {
        assert!(priority_rank(Severity::High, 8.0) > priority_rank(Severity::High, 3.0));
    }
}
