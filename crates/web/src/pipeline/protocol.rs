//! Output contract shared by the prompt rules and the classifier.
//!
//! Changing any of these reclassifies every future run.

/// Printed by a generated script when its checks succeed
pub const PASS_MARKER: &str = "TEST_RESULT: PASS";

/// Printed by a generated script before it throws
pub const FAIL_MARKER: &str = "TEST_RESULT: FAIL";

/// Separates stdout from stderr in the logs of a failed process
pub const STDERR_SECTION: &str = "\nERROR DETAILS:\n";

/// Version of the prompt rule set; bump whenever the rules change
pub const RULESET_VERSION: &str = "2025.1";
