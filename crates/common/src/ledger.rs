//! Test run ledger
//!
//! Append-mostly store of [`TestRunRecord`]s. Rows are written once per
//! pipeline invocation that reached execution and are only ever removed by
//! their owner.

use crate::types::{NewTestRun, RunStatus, TestRunRecord};
use crate::{Database, Error, Result};
use rusqlite::{params, OptionalExtension, Row};
use tracing::debug;

const RECORD_COLUMNS: &str = "id, user_id, url, instruction, status, date, created_at, logs";

/// Ledger service over the shared state database
#[derive(Clone)]
pub struct HistoryLedger {
    db: Database,
}

impl HistoryLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new run and return the stored record
    pub fn insert(&self, run: &NewTestRun) -> Result<TestRunRecord> {
        let now = chrono::Utc::now();
        let created_at = now.timestamp();
        let date = now.to_rfc3339();

        let conn = self.db.connection();
        let conn = conn.lock();
        conn.execute(
            "INSERT INTO history (user_id, url, instruction, status, date, created_at, logs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                run.user_id,
                run.url,
                run.instruction,
                run.status.as_str(),
                date,
                created_at,
                run.logs,
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!("Recorded run {} for user {} ({})", id, run.user_id, run.status);

        Ok(TestRunRecord {
            id,
            user_id: run.user_id.clone(),
            url: run.url.clone(),
            instruction: run.instruction.clone(),
            status: run.status,
            date,
            created_at,
            logs: run.logs.clone(),
        })
    }

    /// All runs owned by `user_id`, most recent first
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<TestRunRecord>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM history WHERE user_id = ?1 ORDER BY id DESC",
            RECORD_COLUMNS
        ))?;
        let rows = stmt.query_map(params![user_id], record_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    /// Fetch a single run if it is owned by `user_id`
    pub fn get(&self, id: i64, user_id: &str) -> Result<Option<TestRunRecord>> {
        let conn = self.db.connection();
        let conn = conn.lock();
        conn.query_row(
            &format!(
                "SELECT {} FROM history WHERE id = ?1 AND user_id = ?2",
                RECORD_COLUMNS
            ),
            params![id, user_id],
            record_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Delete a run owned by `user_id`.
    ///
    /// Returns `NotFound` when no such row exists for that owner, which also
    /// covers a second delete of the same id.
    pub fn delete(&self, id: i64, user_id: &str) -> Result<()> {
        let conn = self.db.connection();
        let conn = conn.lock();
        let affected = conn.execute(
            "DELETE FROM history WHERE id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        if affected == 0 {
            return Err(Error::not_found("test run", id));
        }
        debug!("Deleted run {} for user {}", id, user_id);
        Ok(())
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TestRunRecord> {
    let status: String = row.get(4)?;
    let status = status.parse::<RunStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            e.into(),
        )
    })?;
    Ok(TestRunRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        url: row.get(2)?,
        instruction: row.get(3)?,
        status,
        date: row.get(5)?,
        created_at: row.get(6)?,
        logs: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_ledger() -> HistoryLedger {
        HistoryLedger::new(Database::open_memory().unwrap())
    }

    fn run(user: &str, status: RunStatus) -> NewTestRun {
        NewTestRun {
            user_id: user.to_string(),
            url: "https://example.com".to_string(),
            instruction: "click the login button".to_string(),
            status,
            logs: "TEST_RESULT: PASS\n".to_string(),
        }
    }

    #[test]
    fn test_insert_and_list_most_recent_first() {
        let ledger = test_ledger();
        let first = ledger.insert(&run("alice", RunStatus::Pass)).unwrap();
        let second = ledger.insert(&run("alice", RunStatus::Fail)).unwrap();
        ledger.insert(&run("bob", RunStatus::Pass)).unwrap();

        let rows = ledger.list_for_user("alice").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, second.id);
        assert_eq!(rows[1].id, first.id);
        assert_eq!(rows[0].status, RunStatus::Fail);
        assert!(!rows[0].date.is_empty());
    }

    #[test]
    fn test_get_is_scoped_to_owner() {
        let ledger = test_ledger();
        let rec = ledger.insert(&run("alice", RunStatus::Pass)).unwrap();
        assert_eq!(ledger.get(rec.id, "alice").unwrap(), Some(rec.clone()));
        assert!(ledger.get(rec.id, "bob").unwrap().is_none());
    }

    #[test]
    fn test_delete_twice_reports_not_found() {
        let ledger = test_ledger();
        let rec = ledger.insert(&run("alice", RunStatus::Pass)).unwrap();

        ledger.delete(rec.id, "alice").unwrap();
        let again = ledger.delete(rec.id, "alice");
        assert!(matches!(again, Err(Error::NotFound { .. })));
        assert!(ledger.list_for_user("alice").unwrap().is_empty());
    }

    #[test]
    fn test_delete_by_non_owner_keeps_row() {
        let ledger = test_ledger();
        let rec = ledger.insert(&run("alice", RunStatus::Pass)).unwrap();

        assert!(ledger.delete(rec.id, "mallory").is_err());
        assert_eq!(ledger.list_for_user("alice").unwrap().len(), 1);
    }
}
