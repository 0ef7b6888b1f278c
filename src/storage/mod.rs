//! SQLite audit ledger -- schema, pool, best-effort writes.
//!
//! Durability here is explicitly best-effort: the in-memory registries are
//! the source of truth for one process lifetime, and a failed ledger write
//! is logged, never propagated into an engine result.

pub mod schema;

use anyhow::Result;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use tracing::warn;

use crate::investigate::Investigation;
use crate::model::Event;
use crate::playbook::PlaybookRun;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Record an inbound event. Best-effort.
pub fn save_event(pool: &Pool, event: &Event) {
    let result = (|| -> Result<()> {
        let conn = pool.get()?;
        conn.execute(
            "INSERT INTO events (alertname, service, cluster, severity, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![
                event.alertname(),
                event.service().unwrap_or("unknown"),
                event.cluster(),
                event.severity.as_deref().unwrap_or(""),
                serde_json::to_string(event)?,
            ],
        )?;
        Ok(())
    })();
    if let Err(e) = result {
        warn!(error = %e, "failed to ledger event");
    }
}

/// Record a finished investigation. Best-effort.
pub fn save_investigation(pool: &Pool, inv: &Investigation) {
    let result = (|| -> Result<()> {
        let conn = pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO investigations
               (id, status, service, cluster, confidence, root_cause, report_json, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                inv.id,
                serde_json::to_value(inv.status)?.as_str().unwrap_or("unknown"),
                inv.alert.service().unwrap_or("unknown"),
                inv.alert.cluster(),
                inv.confidence.as_str(),
                inv.root_cause,
                serde_json::to_string(inv)?,
                inv.started_at.to_rfc3339(),
                inv.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    })();
    if let Err(e) = result {
        warn!(investigation = %inv.id, error = %e, "failed to ledger investigation");
    }
}

/// Record a finished playbook run. Best-effort.
pub fn save_run(pool: &Pool, run: &PlaybookRun) {
    let result = (|| -> Result<()> {
        let conn = pool.get()?;
        conn.execute(
            "INSERT OR REPLACE INTO playbook_runs
               (id, playbook_id, playbook_name, status, investigation_id, record_json, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                run.id,
                run.playbook_id,
                run.playbook_name,
                serde_json::to_value(run.status)?.as_str().unwrap_or("unknown"),
                run.investigation_id,
                serde_json::to_string(run)?,
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    })();
    if let Err(e) = result {
        warn!(run = %run.id, error = %e, "failed to ledger playbook run");
    }
}

/// Recent playbook runs from the ledger, newest first. Used by the
/// one-shot `runs` CLI command, which has no live engine to ask.
pub fn list_runs(pool: &Pool, limit: usize) -> Result<Vec<PlaybookRun>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT record_json FROM playbook_runs ORDER BY started_at DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map([limit], |row| row.get::<_, String>(0))?;

    let mut runs = Vec::new();
    for row in rows {
        match serde_json::from_str(&row?) {
            Ok(run) => runs.push(run),
            Err(e) => warn!(error = %e, "skipping unreadable run record"),
        }
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::investigate::InvestigationStatus;
    use crate::playbook::{Playbook, RunStatus};

    fn temp_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[test]
    fn test_event_round_trip() {
        let (_dir, pool) = temp_pool();
        let event: Event = serde_json::from_value(serde_json::json!({
            "alertname": "HighCPUUsage", "service": "vmagent", "severity": "critical"
        }))
        .unwrap();
        save_event(&pool, &event);

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_run_ledger_round_trip() {
        let (_dir, pool) = temp_pool();
        let pb = Playbook::new("p", "d", vec![], vec![]);
        let mut run = PlaybookRun::new(&pb, Event::default());
        run.finish(RunStatus::Success);
        save_run(&pool, &run);

        let runs = list_runs(&pool, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, run.id);
        assert_eq!(runs[0].status, RunStatus::Success);
    }

    #[test]
    fn test_investigation_upsert() {
        let (_dir, pool) = temp_pool();
        let mut inv = Investigation::new("inv-1".to_string(), Event::default());
        save_investigation(&pool, &inv);
        inv.finish(InvestigationStatus::Complete);
        save_investigation(&pool, &inv);

        let conn = pool.get().unwrap();
        let (count, status): (i64, String) = conn
            .query_row(
                "SELECT COUNT(*), MAX(status) FROM investigations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(status, "complete");
    }
}
