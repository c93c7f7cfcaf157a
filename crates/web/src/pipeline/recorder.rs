//! Persistence of run results

use autoqa_common::{HistoryLedger, NewTestRun, TestRunRecord};
use tracing::error;

use super::classifier::Verdict;
use super::prompt::TestRequest;

/// Appends every classified run to the history ledger
#[derive(Clone)]
pub struct RunRecorder {
    ledger: HistoryLedger,
}

impl RunRecorder {
    pub fn new(ledger: HistoryLedger) -> Self {
        Self { ledger }
    }

    /// Store one run. A ledger failure is logged and does not change the
    /// verdict already computed for the caller.
    pub fn record(&self, request: &TestRequest, verdict: &Verdict) -> Option<TestRunRecord> {
        let run = NewTestRun {
            user_id: request.requester_id.clone(),
            url: request.target_url.clone(),
            instruction: request.instruction.clone(),
            status: verdict.status,
            logs: verdict.logs.clone(),
        };
        match self.ledger.insert(&run) {
            Ok(record) => Some(record),
            Err(e) => {
                error!("Failed to record run for {}: {}", request.requester_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoqa_common::{Database, RunStatus};

    #[test]
    fn test_record_appends_to_ledger() {
        let db = Database::open_memory().unwrap();
        let ledger = HistoryLedger::new(db);
        let recorder = RunRecorder::new(ledger.clone());

        let request =
            TestRequest::new(Some("https://example.com"), Some("check title"), "alice").unwrap();
        let verdict = Verdict {
            status: RunStatus::Pass,
            logs: "TEST_RESULT: PASS\n".to_string(),
        };

        let record = recorder.record(&request, &verdict).unwrap();
        assert_eq!(record.status, RunStatus::Pass);
        assert_eq!(record.url, "https://example.com");

        let rows = ledger.list_for_user("alice").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, record.id);
    }

    #[test]
    fn test_ledger_failure_is_swallowed() {
        let db = Database::open_memory().unwrap();
        db.connection().lock().execute_batch("DROP TABLE history;").unwrap();
        let recorder = RunRecorder::new(HistoryLedger::new(db));

        let request =
            TestRequest::new(Some("https://example.com"), Some("check title"), "alice").unwrap();
        let verdict = Verdict {
            status: RunStatus::Fail,
            logs: "boom".to_string(),
        };
        assert!(recorder.record(&request, &verdict).is_none());
    }
}
