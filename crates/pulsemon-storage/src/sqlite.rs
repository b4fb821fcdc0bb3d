//! SQLite-backed store.
//!
//! One database file holds metric definitions, observations, alert rules,
//! and fired alerts. WAL mode keeps history reads cheap while evaluations
//! write alerts. The `alerts` table carries a unique index on
//! `(rule_id, dedupe_key, cooldown_bucket)`; a constraint violation on
//! insert is surfaced as [`InsertOutcome::DuplicateInWindow`] so the
//! cooldown guard stays race-free under concurrent evaluations.

use chrono::{DateTime, Utc};
use pulsemon_common::types::{
    Alert, AlertStatus, MetricDefinition, NormalRange, Observation, ObservationSource,
    ObservationValue, Severity,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{Result, StorageError};
use crate::{
    AlertRuleRow, AlertStore, InsertOutcome, MetricStore, ObservationQuery, ObservationStore,
    RuleStore,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS metric_definitions (
    id         TEXT PRIMARY KEY,
    key        TEXT NOT NULL UNIQUE,
    unit       TEXT NOT NULL,
    range_min  REAL NOT NULL,
    range_max  REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS observations (
    id              TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    patient_id      TEXT NOT NULL,
    metric_id       TEXT NOT NULL,
    value_json      TEXT NOT NULL,
    unit            TEXT NOT NULL,
    recorded_at     INTEGER NOT NULL,
    source          TEXT NOT NULL,
    context_json    TEXT
);
CREATE INDEX IF NOT EXISTS idx_observations_patient_metric_time
    ON observations (patient_id, metric_id, recorded_at);

CREATE TABLE IF NOT EXISTS alert_rules (
    id                  TEXT PRIMARY KEY,
    organization_id     TEXT NOT NULL,
    name                TEXT NOT NULL,
    severity            TEXT NOT NULL,
    enabled             INTEGER NOT NULL,
    priority            INTEGER NOT NULL,
    condition_json      TEXT NOT NULL,
    dedupe_key_template TEXT NOT NULL,
    cooldown_secs       INTEGER NOT NULL,
    actions_json        TEXT NOT NULL,
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alert_rules_org
    ON alert_rules (organization_id, enabled);

CREATE TABLE IF NOT EXISTS alerts (
    id                TEXT PRIMARY KEY,
    organization_id   TEXT NOT NULL,
    patient_id        TEXT NOT NULL,
    rule_id           TEXT NOT NULL,
    severity          TEXT NOT NULL,
    status            TEXT NOT NULL,
    message           TEXT NOT NULL,
    risk_score        REAL NOT NULL,
    sla_breach_time   INTEGER NOT NULL,
    priority_rank     INTEGER NOT NULL,
    triggered_at      INTEGER NOT NULL,
    matched_condition TEXT NOT NULL,
    observation_id    TEXT NOT NULL,
    dedupe_key        TEXT NOT NULL,
    cooldown_bucket   INTEGER NOT NULL,
    created_at        INTEGER NOT NULL,
    updated_at        INTEGER NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uniq_alerts_dedupe
    ON alerts (rule_id, dedupe_key, cooldown_bucket);
CREATE INDEX IF NOT EXISTS idx_alerts_triggered
    ON alerts (triggered_at);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies the schema.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn ts_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_column<T>(column: &'static str, raw: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse().map_err(|reason| StorageError::InvalidColumn {
        column,
        reason,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

type ObservationRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    Option<String>,
);

fn row_to_observation(row: ObservationRow) -> Result<Observation> {
    let (id, organization_id, patient_id, metric_id, value_json, unit, recorded_ms, source, context_json) =
        row;
    let value: ObservationValue = serde_json::from_str(&value_json)?;
    let context = match context_json {
        Some(raw) => Some(serde_json::from_str(&raw)?),
        None => None,
    };
    Ok(Observation {
        id,
        organization_id,
        patient_id,
        metric_id,
        value,
        unit,
        recorded_at: from_millis(recorded_ms),
        source: parse_column::<ObservationSource>("source", &source)?,
        context,
    })
}

impl ObservationStore for SqliteStore {
    fn insert_observation(&self, obs: &Observation) -> Result<()> {
        let conn = self.lock();
        let value_json = serde_json::to_string(&obs.value)?;
        let context_json = obs
            .context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let mut stmt = conn.prepare_cached(
            "INSERT INTO observations
             (id, organization_id, patient_id, metric_id, value_json, unit, recorded_at, source, context_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        stmt.execute(rusqlite::params![
            obs.id,
            obs.organization_id,
            obs.patient_id,
            obs.metric_id,
            value_json,
            obs.unit,
            ts_millis(obs.recorded_at),
            obs.source.to_string(),
            context_json,
        ])?;
        Ok(())
    }

    fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<Observation>> {
        let conn = self.lock();
        let mut sql = String::from(
            "SELECT id, organization_id, patient_id, metric_id, value_json, unit, recorded_at, source, context_json
             FROM observations
             WHERE patient_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3",
        );
        if query.metric_id.is_some() {
            sql.push_str(" AND metric_id = ?4");
        }
        sql.push_str(" ORDER BY recorded_at ASC");

        let mut stmt = conn.prepare_cached(&sql)?;
        let from_ms = ts_millis(query.from);
        let to_ms = ts_millis(query.to);

        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ObservationRow> {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
            ))
        };

        let mut results = Vec::new();
        match &query.metric_id {
            Some(metric_id) => {
                let rows = stmt.query_map(
                    rusqlite::params![query.patient_id, from_ms, to_ms, metric_id],
                    map_row,
                )?;
                for row in rows {
                    results.push(row_to_observation(row?)?);
                }
            }
            None => {
                let rows = stmt.query_map(
                    rusqlite::params![query.patient_id, from_ms, to_ms],
                    map_row,
                )?;
                for row in rows {
                    results.push(row_to_observation(row?)?);
                }
            }
        }
        Ok(results)
    }

    fn latest_observation(
        &self,
        patient_id: &str,
        metric_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Option<Observation>> {
        let query = ObservationQuery {
            patient_id: patient_id.to_string(),
            metric_id: Some(metric_id.to_string()),
            from,
            to,
        };
        let mut results = self.query_observations(&query)?;
        Ok(results.pop())
    }

    fn count_observations(
        &self,
        patient_id: &str,
        source: Option<ObservationSource>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<u64> {
        let conn = self.lock();
        let count: i64 = match source {
            Some(source) => {
                let mut stmt = conn.prepare_cached(
                    "SELECT COUNT(*) FROM observations
                     WHERE patient_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3
                       AND source = ?4",
                )?;
                stmt.query_row(
                    rusqlite::params![
                        patient_id,
                        ts_millis(from),
                        ts_millis(to),
                        source.to_string()
                    ],
                    |row| row.get(0),
                )?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT COUNT(*) FROM observations
                     WHERE patient_id = ?1 AND recorded_at >= ?2 AND recorded_at < ?3",
                )?;
                stmt.query_row(
                    rusqlite::params![patient_id, ts_millis(from), ts_millis(to)],
                    |row| row.get(0),
                )?
            }
        };
        Ok(count as u64)
    }
}

impl RuleStore for SqliteStore {
    fn insert_rule(&self, row: &AlertRuleRow) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO alert_rules
             (id, organization_id, name, severity, enabled, priority, condition_json,
              dedupe_key_template, cooldown_secs, actions_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )?;
        stmt.execute(rusqlite::params![
            row.id,
            row.organization_id,
            row.name,
            row.severity,
            row.enabled,
            row.priority,
            row.condition_json,
            row.dedupe_key_template,
            row.cooldown_secs,
            row.actions_json,
            ts_millis(row.created_at),
            ts_millis(row.updated_at),
        ])?;
        Ok(())
    }

    fn list_active_rules(&self, organization_id: &str) -> Result<Vec<AlertRuleRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, organization_id, name, severity, enabled, priority, condition_json,
                    dedupe_key_template, cooldown_secs, actions_json, created_at, updated_at
             FROM alert_rules
             WHERE organization_id = ?1 AND enabled = 1
             ORDER BY priority DESC, created_at ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![organization_id], rule_from_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    fn get_rule_by_id(&self, id: &str) -> Result<Option<AlertRuleRow>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, organization_id, name, severity, enabled, priority, condition_json,
                    dedupe_key_template, cooldown_secs, actions_json, created_at, updated_at
             FROM alert_rules WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(rusqlite::params![id], rule_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

fn rule_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRuleRow> {
    Ok(AlertRuleRow {
        id: row.get(0)?,
        organization_id: row.get(1)?,
        name: row.get(2)?,
        severity: row.get(3)?,
        enabled: row.get(4)?,
        priority: row.get(5)?,
        condition_json: row.get(6)?,
        dedupe_key_template: row.get(7)?,
        cooldown_secs: row.get(8)?,
        actions_json: row.get(9)?,
        created_at: from_millis(row.get(10)?),
        updated_at: from_millis(row.get(11)?),
    })
}

type AlertRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    f64,
    i64,
    i64,
    i64,
    String,
    String,
    String,
    i64,
    i64,
);

fn row_to_alert(row: AlertRow) -> Result<Alert> {
    let (
        id,
        organization_id,
        patient_id,
        rule_id,
        severity,
        status,
        message,
        risk_score,
        sla_ms,
        priority_rank,
        triggered_ms,
        matched_condition,
        observation_id,
        dedupe_key,
        created_ms,
        updated_ms,
    ) = row;
    Ok(Alert {
        id,
        organization_id,
        patient_id,
        rule_id,
        severity: parse_column::<Severity>("severity", &severity)?,
        status: parse_column::<AlertStatus>("status", &status)?,
        message,
        risk_score,
        sla_breach_time: from_millis(sla_ms),
        priority_rank,
        triggered_at: from_millis(triggered_ms),
        matched_condition,
        observation_id,
        dedupe_key,
        created_at: from_millis(created_ms),
        updated_at: from_millis(updated_ms),
    })
}

const ALERT_COLUMNS: &str = "id, organization_id, patient_id, rule_id, severity, status, message,
     risk_score, sla_breach_time, priority_rank, triggered_at, matched_condition,
     observation_id, dedupe_key, created_at, updated_at";

fn map_alert_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
        row.get(11)?,
        row.get(12)?,
        row.get(13)?,
        row.get(14)?,
        row.get(15)?,
    ))
}

impl AlertStore for SqliteStore {
    fn insert_alert(&self, alert: &Alert, cooldown_bucket: i64) -> Result<InsertOutcome> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO alerts
             (id, organization_id, patient_id, rule_id, severity, status, message,
              risk_score, sla_breach_time, priority_rank, triggered_at, matched_condition,
              observation_id, dedupe_key, cooldown_bucket, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )?;
        let result = stmt.execute(rusqlite::params![
            alert.id,
            alert.organization_id,
            alert.patient_id,
            alert.rule_id,
            alert.severity.to_string(),
            alert.status.to_string(),
            alert.message,
            alert.risk_score,
            ts_millis(alert.sla_breach_time),
            alert.priority_rank,
            ts_millis(alert.triggered_at),
            alert.matched_condition,
            alert.observation_id,
            alert.dedupe_key,
            cooldown_bucket,
            ts_millis(alert.created_at),
            ts_millis(alert.updated_at),
        ]);
        match result {
            Ok(_) => Ok(InsertOutcome::Created),
            Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::DuplicateInWindow),
            Err(err) => Err(err.into()),
        }
    }

    fn latest_alert_for_key(&self, rule_id: &str, dedupe_key: &str) -> Result<Option<Alert>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE rule_id = ?1 AND dedupe_key = ?2
             ORDER BY triggered_at DESC LIMIT 1"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(rusqlite::params![rule_id, dedupe_key], map_alert_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row_to_alert(row?)?)),
            None => Ok(None),
        }
    }

    fn get_alert_by_id(&self, id: &str) -> Result<Option<Alert>> {
        let conn = self.lock();
        let sql = format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?1");
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(rusqlite::params![id], map_alert_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row_to_alert(row?)?)),
            None => Ok(None),
        }
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
        let conn = self.lock();
        let mut sql = format!(
            "SELECT {ALERT_COLUMNS} FROM alerts
             WHERE triggered_at >= ?1 AND triggered_at < ?2"
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = vec![
            Box::new(ts_millis(from)),
            Box::new(ts_millis(to)),
        ];
        if let Some(sev) = severity {
            params.push(Box::new(sev.to_string()));
            sql.push_str(&format!(" AND severity = ?{}", params.len()));
        }
        if let Some(patient) = patient_id {
            params.push(Box::new(patient.to_string()));
            sql.push_str(&format!(" AND patient_id = ?{}", params.len()));
        }
        params.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY triggered_at DESC LIMIT ?{}", params.len()));
        params.push(Box::new(offset as i64));
        sql.push_str(&format!(" OFFSET ?{}", params.len()));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> =
            params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), map_alert_row)?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row_to_alert(row?)?);
        }
        Ok(results)
    }
}

impl MetricStore for SqliteStore {
    fn upsert_metric(&self, def: &MetricDefinition) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "INSERT INTO metric_definitions (id, key, unit, range_min, range_max)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 key = excluded.key,
                 unit = excluded.unit,
                 range_min = excluded.range_min,
                 range_max = excluded.range_max",
        )?;
        stmt.execute(rusqlite::params![
            def.id,
            def.key,
            def.unit,
            def.normal_range.min,
            def.normal_range.max,
        ])?;
        Ok(())
    }

    fn get_metric_by_key(&self, key: &str) -> Result<Option<MetricDefinition>> {
        self.get_metric_where("key = ?1", key)
    }

    fn get_metric_by_id(&self, id: &str) -> Result<Option<MetricDefinition>> {
        self.get_metric_where("id = ?1", id)
    }
}

impl SqliteStore {
    fn get_metric_where(&self, clause: &str, param: &str) -> Result<Option<MetricDefinition>> {
        let conn = self.lock();
        let sql = format!(
            "SELECT id, key, unit, range_min, range_max FROM metric_definitions WHERE {clause}"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(rusqlite::params![param], |row| {
            Ok(MetricDefinition {
                id: row.get(0)?,
                key: row.get(1)?,
                unit: row.get(2)?,
                normal_range: NormalRange {
                    min: row.get(3)?,
                    max: row.get(4)?,
                },
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}
