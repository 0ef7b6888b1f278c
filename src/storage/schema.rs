//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY,
            alertname TEXT NOT NULL,
            service TEXT NOT NULL,
            cluster TEXT NOT NULL,
            severity TEXT,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS investigations (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            service TEXT NOT NULL,
            cluster TEXT NOT NULL,
            confidence TEXT NOT NULL,
            root_cause TEXT NOT NULL,
            report_json TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS playbook_runs (
            id TEXT PRIMARY KEY,
            playbook_id TEXT NOT NULL,
            playbook_name TEXT NOT NULL,
            status TEXT NOT NULL,
            investigation_id TEXT,
            record_json TEXT NOT NULL,
            started_at TEXT NOT NULL,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_events_created ON events(created_at);
        CREATE INDEX IF NOT EXISTS idx_investigations_started ON investigations(started_at);
        CREATE INDEX IF NOT EXISTS idx_runs_started ON playbook_runs(started_at);",
    )?;

    Ok(())
}
