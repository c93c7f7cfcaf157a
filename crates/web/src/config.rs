//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub model: ModelConfig,
    pub runner: RunnerConfig,
    pub auth: AuthConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,

    /// Optional directory with the browser UI, served at `/`
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3000".to_string(),
            static_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("autoqa.db"),
        }
    }
}

/// Code-generation model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// REST base URL of the generative language API
    pub endpoint: String,

    /// Model name
    pub model: String,

    /// Provider credential. Usually injected from `GEMINI_API_KEY`.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            api_key: None,
            timeout_secs: 120,
        }
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Generated-script runner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interpreter used to run artifacts
    pub runtime: String,

    /// Extra arguments placed before the artifact path
    pub runtime_args: Vec<String>,

    /// Directory for ephemeral artifacts
    pub scratch_dir: PathBuf,

    /// Artifact file extension (no dot)
    pub artifact_extension: String,

    /// Working directory for the child; defaults to the service's own
    pub working_dir: Option<PathBuf>,

    /// Wall-clock limit per run in seconds
    pub timeout_secs: u64,

    /// Time between SIGTERM and SIGKILL when a run is terminated
    pub kill_grace_ms: u64,

    /// Concurrent runs allowed per requester (0 = unlimited)
    pub max_concurrent_runs_per_user: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runtime: "node".to_string(),
            runtime_args: Vec::new(),
            scratch_dir: PathBuf::from(".autoqa/runs"),
            artifact_extension: "mjs".to_string(),
            working_dir: None,
            timeout_secs: 180,
            kill_grace_ms: 2000,
            max_concurrent_runs_per_user: 2,
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// How run-test requests are authorized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// A login session is required; the credential comes from configuration.
    #[default]
    Session,
    /// A request may carry its own provider key instead of a session.
    InlineKey,
}

impl std::str::FromStr for AuthMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session" => Ok(Self::Session),
            "inline_key" | "inline-key" => Ok(Self::InlineKey),
            _ => Err(format!("unknown auth mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub session_ttl_secs: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Session,
            session_ttl_secs: 12 * 60 * 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply `AUTOQA_*` and `GEMINI_API_KEY` environment overrides
    pub fn with_env_overrides(self) -> anyhow::Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AUTOQA_LISTEN") {
            self.server.listen = v;
        }
        if let Some(v) = get("AUTOQA_STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = get("AUTOQA_DB_PATH") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = get("AUTOQA_SCRATCH_DIR") {
            self.runner.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = get("AUTOQA_MODEL") {
            self.model.model = v;
        }
        if let Some(v) = get("AUTOQA_AUTH_MODE") {
            self.auth.mode = v.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        }
        if let Some(v) = get("GEMINI_API_KEY") {
            self.model.api_key = Some(v);
        }
        Ok(self)
    }
}
