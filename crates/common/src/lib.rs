//! AutoQA Common Library
//!
//! Shared types and persistence (test run ledger, identity store) for the
//! AutoQA service.

pub mod db;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod types;

// Re-export commonly used types
pub use db::Database;
pub use error::{Error, Result};
pub use identity::IdentityStore;
pub use ledger::HistoryLedger;
pub use types::*;

/// AutoQA version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
