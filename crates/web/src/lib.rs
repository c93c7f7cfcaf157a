//! AutoQA Web Service
//!
//! Turns a natural-language test instruction into a browser-automation
//! script, runs it, and keeps a per-user history of verdicts.

pub mod auth;
pub mod config;
pub mod pipeline;
pub mod server;

pub use config::{AppConfig, AuthMode};
pub use pipeline::{Pipeline, PipelineError};
pub use server::WebServer;
