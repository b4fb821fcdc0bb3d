use crate::config::EngineConfig;
use crate::engine::AlertEngine;
use crate::error::ErrorKind;
use crate::EvalContext;
use chrono::{DateTime, Duration, TimeZone, Utc};
use pulsemon_common::types::{
    MetricDefinition, NormalRange, Observation, ObservationSource, ObservationValue, Severity,
};
use pulsemon_storage::memory::MemoryStore;
use pulsemon_storage::{AlertRuleRow, AlertStore, MetricStore, ObservationStore, RuleStore};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
}

fn pain_metric() -> MetricDefinition {
    MetricDefinition {
        id: "metric-pain".into(),
        key: "pain".into(),
        unit: "score".into(),
        normal_range: NormalRange { min: 0.0, max: 4.0 },
    }
}

fn spo2_metric() -> MetricDefinition {
    MetricDefinition {
        id: "metric-spo2".into(),
        key: "spo2".into(),
        unit: "%".into(),
        normal_range: NormalRange {
            min: 94.0,
            max: 100.0,
        },
    }
}

fn setup() -> (Arc<MemoryStore>, AlertEngine) {
    pulsemon_common::id::init(1, 1);
    let store = Arc::new(MemoryStore::new());
    store.upsert_metric(&pain_metric()).unwrap();
    store.upsert_metric(&spo2_metric()).unwrap();
    let engine = AlertEngine::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        EngineConfig::default(),
    );
    (store, engine)
}

fn make_obs(metric_id: &str, unit: &str, value: f64, recorded_at: DateTime<Utc>) -> Observation {
    Observation {
        id: pulsemon_common::id::next_id(),
        organization_id: "org-1".into(),
        patient_id: "patient-1".into(),
        metric_id: metric_id.into(),
        value: ObservationValue::Numeric(value),
        unit: unit.into(),
        recorded_at,
        source: ObservationSource::Device,
        context: None,
    }
}

fn pain_obs(value: f64, recorded_at: DateTime<Utc>) -> Observation {
    make_obs("metric-pain", "score", value, recorded_at)
}

fn rule_row(id: &str, severity: &str, condition_json: &str, cooldown_secs: i64) -> AlertRuleRow {
    let now = t0() - Duration::days(30);
    AlertRuleRow {
        id: id.into(),
        organization_id: "org-1".into(),
        name: format!("rule {id}"),
        severity: severity.into(),
        enabled: true,
        priority: 10,
        condition_json: condition_json.into(),
        dedupe_key_template: "{patientId}:{metricId}".into(),
        cooldown_secs,
        actions_json: "{}".into(),
        created_at: now,
        updated_at: now,
    }
}

fn pain_threshold_json(threshold: f64) -> String {
    format!(
        r#"{{"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": {threshold}}}"#
    )
}

#[test]
fn threshold_rule_fires_and_persists_alert() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert!(outcome.failures.is_empty());

    let alert = &outcome.alerts[0];
    assert_eq!(alert.severity, Severity::High);
    assert_eq!(alert.rule_id, "high-pain");
    assert_eq!(alert.status.to_string(), "pending");
    assert_eq!(alert.dedupe_key, "patient-1:metric-pain");
    assert_eq!(alert.matched_condition, "pain above 7.0");
    assert!(alert.message.contains("patient-1"));
    assert!(alert.priority_rank > 3000, "high-band rank: {}", alert.priority_rank);

    // Persisted, not just returned.
    let stored = store.get_alert_by_id(&alert.id).unwrap();
    assert!(stored.is_some());
}

#[test]
fn below_threshold_produces_no_alert() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    let obs = pain_obs(5.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
    assert!(outcome.failures.is_empty());
}

#[test]
fn cooldown_suppresses_then_allows_after_expiry() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    let first = pain_obs(9.0, t0());
    store.insert_observation(&first).unwrap();
    let outcome = engine
        .evaluate_observation(&first, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);

    // Ten minutes later: still inside the one-hour cooldown.
    let second = pain_obs(9.5, t0() + Duration::minutes(10));
    store.insert_observation(&second).unwrap();
    let outcome = engine
        .evaluate_observation(&second, &EvalContext::new(t0() + Duration::minutes(10)))
        .unwrap();
    assert!(outcome.alerts.is_empty());
    assert!(outcome.failures.is_empty());

    // Two hours later: cooldown elapsed, fires again.
    let third = pain_obs(9.0, t0() + Duration::hours(2));
    store.insert_observation(&third).unwrap();
    let outcome = engine
        .evaluate_observation(&third, &EvalContext::new(t0() + Duration::hours(2)))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);

    assert_eq!(store.alert_count(), 2);
}

#[test]
fn re_running_same_observation_is_idempotent_within_cooldown() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();
    let ctx = EvalContext::new(t0());

    let first = engine.evaluate_observation(&obs, &ctx).unwrap();
    assert_eq!(first.alerts.len(), 1);

    let second = engine.evaluate_observation(&obs, &ctx).unwrap();
    assert!(second.alerts.is_empty());
    assert!(second.failures.is_empty());
    assert_eq!(store.alert_count(), 1);
}

#[test]
fn observation_exceeding_two_thresholds_fires_both_rules() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("pain-high", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();
    store
        .insert_rule(&rule_row(
            "pain-critical",
            "critical",
            &pain_threshold_json(9.0),
            3600,
        ))
        .unwrap();

    let obs = pain_obs(10.0, t0());
    store.insert_observation(&obs).unwrap();

    let mut outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 2);
    assert!(outcome.failures.is_empty());

    outcome.alerts.sort_by_key(|a| a.severity);
    let high = &outcome.alerts[0];
    let critical = &outcome.alerts[1];
    assert_eq!(high.severity, Severity::High);
    assert_eq!(critical.severity, Severity::Critical);
    assert!(high.risk_score > 3.0, "high risk: {}", high.risk_score);
    assert!(
        critical.risk_score > 7.0,
        "critical risk: {}",
        critical.risk_score
    );
    assert!(critical.priority_rank > high.priority_rank);
    assert!(critical.sla_breach_time < high.sla_breach_time);
}

#[test]
fn consecutive_pattern_fires_only_on_unbroken_streak() {
    let pattern_json = r#"{
        "type": "consecutive_pattern",
        "inner": {"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": 7.0},
        "required_consecutive_days": 3
    }"#;

    // Qualifying observations on all three trailing days: fires.
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("pain-streak", "medium", pattern_json, 0))
        .unwrap();
    for days_back in [2, 1] {
        store
            .insert_observation(&pain_obs(8.0, t0() - Duration::days(days_back)))
            .unwrap();
    }
    let trigger = pain_obs(8.5, t0());
    store.insert_observation(&trigger).unwrap();
    let outcome = engine
        .evaluate_observation(&trigger, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(
        outcome.alerts[0].matched_condition,
        "pain above 7.0 on 3 consecutive days"
    );

    // Day 2 has only a non-qualifying observation: the gap breaks the streak.
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("pain-streak", "medium", pattern_json, 0))
        .unwrap();
    store
        .insert_observation(&pain_obs(8.0, t0() - Duration::days(2)))
        .unwrap();
    store
        .insert_observation(&pain_obs(4.0, t0() - Duration::days(1)))
        .unwrap();
    let trigger = pain_obs(8.5, t0());
    store.insert_observation(&trigger).unwrap();
    let outcome = engine
        .evaluate_observation(&trigger, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
    assert!(outcome.failures.is_empty());
}

#[test]
fn worsening_run_fires_threshold_before_pattern() {
    // Pain 5, 6, 7 on days 1-3, then 8 on day 4: the threshold rule
    // fires on day 4's observation, the 3-day pattern does not (only one
    // qualifying day so far).
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("pain-high", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();
    store
        .insert_rule(&rule_row(
            "pain-streak",
            "medium",
            r#"{
                "type": "consecutive_pattern",
                "inner": {"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": 7.0},
                "required_consecutive_days": 3
            }"#,
            3600,
        ))
        .unwrap();

    for (value, days_back) in [(5.0, 3), (6.0, 2), (7.0, 1)] {
        store
            .insert_observation(&pain_obs(value, t0() - Duration::days(days_back)))
            .unwrap();
    }
    let trigger = pain_obs(8.0, t0());
    store.insert_observation(&trigger).unwrap();

    let outcome = engine
        .evaluate_observation(&trigger, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].rule_id, "pain-high");
    // The worsening trend contributes on top of the deviation.
    assert!(outcome.alerts[0].risk_score > 3.0);
}

#[test]
fn invalid_rule_is_skipped_without_aborting_others() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("broken", "high", "definitely not json", 3600))
        .unwrap();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].rule_id, "high-pain");
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].rule_id, "broken");
    assert_eq!(outcome.failures[0].error.kind(), ErrorKind::Validation);
}

#[test]
fn unit_mismatch_is_a_validation_failure() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    // Pain recorded in the wrong unit: hard error, not a silent false.
    let obs = make_obs("metric-pain", "mmHg", 9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].error.kind(), ErrorKind::Validation);
}

#[test]
fn unknown_metric_key_is_a_reference_failure() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row(
            "ghost-rule",
            "high",
            r#"{"type": "threshold", "metric_key": "ghost", "operator": "gt", "threshold": 1.0}"#,
            3600,
        ))
        .unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].error.kind(), ErrorKind::Reference);
}

#[test]
fn missed_assessment_fires_without_recent_assessment() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row(
            "no-checkin",
            "medium",
            r#"{"type": "missed_assessment"}"#,
            0,
        ))
        .unwrap();

    // A device reading arrives, but the patient has not submitted an
    // assessment inside the 24h cadence window.
    let obs = pain_obs(3.0, t0());
    store.insert_observation(&obs).unwrap();
    let ctx = EvalContext::new(t0()).with_cadence(Duration::hours(24));

    let outcome = engine.evaluate_observation(&obs, &ctx).unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].matched_condition, "missed assessment");

    // After an assessment lands, the same rule stays quiet.
    let mut assessment = pain_obs(2.0, t0() + Duration::hours(1));
    assessment.source = ObservationSource::Assessment;
    store.insert_observation(&assessment).unwrap();

    let later = pain_obs(3.0, t0() + Duration::hours(2));
    store.insert_observation(&later).unwrap();
    let ctx = EvalContext::new(t0() + Duration::hours(2)).with_cadence(Duration::hours(24));
    let outcome = engine.evaluate_observation(&later, &ctx).unwrap();
    assert!(outcome.alerts.is_empty());
}

#[test]
fn missed_assessment_without_cadence_is_a_validation_failure() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row(
            "no-checkin",
            "medium",
            r#"{"type": "missed_assessment"}"#,
            0,
        ))
        .unwrap();

    let obs = pain_obs(3.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].error.kind(), ErrorKind::Validation);
}

#[test]
fn composite_or_fires_when_one_branch_matches() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row(
            "pain-or-spo2",
            "high",
            r#"{
                "type": "composite",
                "operator": "or",
                "conditions": [
                    {"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": 7.0},
                    {"type": "threshold", "metric_key": "spo2", "operator": "lt", "threshold": 90.0}
                ]
            }"#,
            3600,
        ))
        .unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);
}

#[test]
fn cross_metric_threshold_reads_recent_history() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row(
            "pain-and-low-spo2",
            "critical",
            r#"{
                "type": "composite",
                "operator": "and",
                "conditions": [
                    {"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": 7.0},
                    {"type": "threshold", "metric_key": "spo2", "operator": "lt", "threshold": 92.0}
                ]
            }"#,
            3600,
        ))
        .unwrap();

    // SpO2 of 90% recorded an hour before the pain spike.
    store
        .insert_observation(&make_obs(
            "metric-spo2",
            "%",
            90.0,
            t0() - Duration::hours(1),
        ))
        .unwrap();
    let trigger = pain_obs(9.0, t0());
    store.insert_observation(&trigger).unwrap();

    let outcome = engine
        .evaluate_observation(&trigger, &EvalContext::new(t0()))
        .unwrap();
    assert_eq!(outcome.alerts.len(), 1);
    assert_eq!(outcome.alerts[0].severity, Severity::Critical);

    // With a healthy SpO2 more recent than the low one, the AND fails.
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row(
            "pain-and-low-spo2",
            "critical",
            r#"{
                "type": "composite",
                "operator": "and",
                "conditions": [
                    {"type": "threshold", "metric_key": "pain", "operator": "gt", "threshold": 7.0},
                    {"type": "threshold", "metric_key": "spo2", "operator": "lt", "threshold": 92.0}
                ]
            }"#,
            3600,
        ))
        .unwrap();
    store
        .insert_observation(&make_obs(
            "metric-spo2",
            "%",
            97.0,
            t0() - Duration::minutes(30),
        ))
        .unwrap();
    let trigger = pain_obs(9.0, t0());
    store.insert_observation(&trigger).unwrap();
    let outcome = engine
        .evaluate_observation(&trigger, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
}

#[test]
fn rules_from_other_organizations_are_not_loaded() {
    let (store, engine) = setup();
    let mut foreign = rule_row("other-org", "high", &pain_threshold_json(1.0), 3600);
    foreign.organization_id = "org-2".into();
    store.insert_rule(&foreign).unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
}

#[test]
fn disabled_rules_are_not_evaluated() {
    let (store, engine) = setup();
    let mut disabled = rule_row("disabled", "high", &pain_threshold_json(1.0), 3600);
    disabled.enabled = false;
    store.insert_rule(&disabled).unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();

    let outcome = engine
        .evaluate_observation(&obs, &EvalContext::new(t0()))
        .unwrap();
    assert!(outcome.alerts.is_empty());
}

#[test]
fn concurrent_inserts_for_same_key_create_exactly_one_alert() {
    let (store, engine) = setup();
    store
        .insert_rule(&rule_row("high-pain", "high", &pain_threshold_json(7.0), 3600))
        .unwrap();

    let obs = pain_obs(9.0, t0());
    store.insert_observation(&obs).unwrap();
    let obs = Arc::new(obs);
    let engine = Arc::new(engine);

    // Both threads race the full evaluate path for the same observation;
    // the unique (rule_id, dedupe_key, cooldown_bucket) reservation lets
    // only one create an alert.
    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = Arc::clone(&engine);
        let obs = Arc::clone(&obs);
        handles.push(std::thread::spawn(move || {
            engine
                .evaluate_observation(&obs, &EvalContext::new(t0()))
                .unwrap()
                .alerts
                .len()
        }));
    }
    let created: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(created, 1);
    assert_eq!(store.alert_count(), 1);
}
