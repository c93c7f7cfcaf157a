//! Core types for AutoQA

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier handed out by the identity store
pub type UserId = String;

/// Requester id used for runs submitted with an inline key and no session
pub const ANONYMOUS_USER: &str = "anonymous";

/// Verdict of a single test run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pass,
    Fail,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pass => "PASS",
            RunStatus::Fail => "FAIL",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, RunStatus::Pass)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PASS" => Ok(Self::Pass),
            "FAIL" => Ok(Self::Fail),
            _ => Err(format!("unknown run status: {}", s)),
        }
    }
}

/// A persisted test run, one row per pipeline invocation that reached execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRunRecord {
    pub id: i64,
    pub user_id: UserId,
    pub url: String,
    pub instruction: String,
    pub status: RunStatus,
    /// Human readable RFC 3339 timestamp
    pub date: String,
    pub created_at: i64,
    pub logs: String,
}

/// Values for a run that has not been written yet
#[derive(Debug, Clone)]
pub struct NewTestRun {
    pub user_id: UserId,
    pub url: String,
    pub instruction: String,
    pub status: RunStatus,
    pub logs: String,
}

/// Registered user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub username: String,
    pub created_at: i64,
}

impl UserAccount {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.into(),
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Login session, keyed by the SHA-256 of its bearer token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token_hash: String,
    pub user_id: UserId,
    pub created_at: i64,
    pub expires_at: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
