//! Verdict classification
//!
//! PASS requires a clean exit *and* the pass marker on stdout. Anything else
//! is FAIL: a non-zero exit, a timeout, or a script that ran cleanly but never
//! printed the marker.

use autoqa_common::RunStatus;
use serde::Serialize;

use super::protocol::{PASS_MARKER, STDERR_SECTION};
use super::sandbox::ExecutionOutcome;

/// Status plus the human-readable log of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub status: RunStatus,
    pub logs: String,
}

pub fn classify(outcome: &ExecutionOutcome) -> Verdict {
    let status = if !outcome.exit_failed && outcome.stdout.contains(PASS_MARKER) {
        RunStatus::Pass
    } else {
        RunStatus::Fail
    };

    let logs = if outcome.exit_failed {
        format!("{}{}{}", outcome.stdout, STDERR_SECTION, outcome.stderr)
    } else {
        outcome.stdout.clone()
    };

    Verdict { status, logs }
}

/// Recover a status from logs alone.
///
/// Agrees with [`classify`] unless a clean run printed the stderr section
/// label on its own stdout. Such a run is read back as FAIL here even when
/// it passed.
pub fn status_from_logs(logs: &str) -> RunStatus {
    if !logs.contains(STDERR_SECTION) && logs.contains(PASS_MARKER) {
        RunStatus::Pass
    } else {
        RunStatus::Fail
    }
}
