// 📒 Stage Ledger - SQLite audit trail of pipeline stage runs
// Every stage appends events (started / completed / failed / scored).
// Nothing reads the ledger back during a run; it exists for `history`
// and for comparing scores across runs.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const ACTOR: &str = "trackml-pipeline";

/// One entry of the audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageEvent {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub stage: String,
    pub event_type: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl StageEvent {
    pub fn new(run_id: &str, stage: &str, event_type: &str, data: serde_json::Value) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
            stage: stage.to_string(),
            event_type: event_type.to_string(),
            data,
            actor: ACTOR.to_string(),
        }
    }
}

/// Open (creating if needed) a ledger database
pub fn open_ledger(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create ledger directory {:?}", parent))?;
        }
    }

    let conn =
        Connection::open(path).with_context(|| format!("Failed to open ledger {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS stage_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            run_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            stage TEXT NOT NULL,
            event_type TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stage_events_run ON stage_events(run_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_stage_events_type ON stage_events(event_type)",
        [],
    )?;

    Ok(())
}

pub fn insert_stage_event(conn: &Connection, event: &StageEvent) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO stage_events (
            event_id, run_id, timestamp, stage, event_type, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.run_id,
            event.timestamp.to_rfc3339(),
            event.stage,
            event.event_type,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

const SELECT_COLUMNS: &str =
    "SELECT event_id, run_id, timestamp, stage, event_type, data, actor FROM stage_events";

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StageEvent> {
    let timestamp_str: String = row.get(2)?;
    let data_json: String = row.get(5)?;

    Ok(StageEvent {
        event_id: row.get(0)?,
        run_id: row.get(1)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
            })?
            .with_timezone(&Utc),
        stage: row.get(3)?,
        event_type: row.get(4)?,
        data: serde_json::from_str(&data_json).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?,
        actor: row.get(6)?,
    })
}

/// Events of one run, in the order they were recorded
pub fn get_events_for_run(conn: &Connection, run_id: &str) -> Result<Vec<StageEvent>> {
    let sql = format!("{} WHERE run_id = ?1 ORDER BY id ASC", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;

    let events = stmt
        .query_map(params![run_id], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Most recent events across all runs, newest first
pub fn get_recent_events(conn: &Connection, limit: usize) -> Result<Vec<StageEvent>> {
    let sql = format!("{} ORDER BY id DESC LIMIT ?1", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;

    let events = stmt
        .query_map(params![limit as i64], row_to_event)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Score recorded by the most recent `scored` event, if any
pub fn latest_score(conn: &Connection) -> Result<Option<f64>> {
    let sql = format!(
        "{} WHERE event_type = 'scored' ORDER BY id DESC LIMIT 1",
        SELECT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut events = stmt.query_map([], row_to_event)?;

    match events.next() {
        Some(event) => Ok(event?.data.get("score").and_then(|s| s.as_f64())),
        None => Ok(None),
    }
}
