//! Script materialization and cleanup
//!
//! A [`GeneratedScript`] owns its artifact file. The pipeline removes it
//! explicitly with [`GeneratedScript::cleanup`]; if the script is dropped
//! first (a panic while executing, say) the `Drop` impl removes it instead.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

static ARTIFACT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Writes generated source into the scratch directory
#[derive(Debug, Clone)]
pub struct ScriptMaterializer {
    scratch_dir: PathBuf,
    extension: String,
}

/// A materialized artifact awaiting execution
#[derive(Debug)]
pub struct GeneratedScript {
    pub source_text: String,
    pub artifact_path: PathBuf,
    pub created_at: DateTime<Utc>,
    removed: bool,
}

impl ScriptMaterializer {
    pub fn new(scratch_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            extension: extension.into().trim_start_matches('.').to_string(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Unique per process and per call: wall clock millis, pid, a process-wide
    /// sequence number and 32 random bits.
    fn artifact_name(&self) -> String {
        let seq = ARTIFACT_SEQ.fetch_add(1, Ordering::Relaxed);
        format!(
            "test_{}_{}_{}_{:08x}.{}",
            Utc::now().timestamp_millis(),
            std::process::id(),
            seq,
            rand::random::<u32>(),
            self.extension
        )
    }

    /// Write `source_text` to a fresh artifact file
    pub async fn materialize(&self, source_text: String) -> std::io::Result<GeneratedScript> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let artifact_path = self.scratch_dir.join(self.artifact_name());
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&artifact_path)
            .await?;

        // Own the path from here on so a failed write still removes it.
        let script = GeneratedScript {
            source_text,
            artifact_path,
            created_at: Utc::now(),
            removed: false,
        };
        file.write_all(script.source_text.as_bytes()).await?;
        file.flush().await?;

        debug!("Materialized artifact {}", script.artifact_path.display());
        Ok(script)
    }
}

impl GeneratedScript {
    /// Delete the artifact. Failures are logged and swallowed.
    pub async fn cleanup(mut self) -> bool {
        self.removed = true;
        match tokio::fs::remove_file(&self.artifact_path).await {
            Ok(()) => {
                debug!("Removed artifact {}", self.artifact_path.display());
                true
            }
            Err(e) => {
                warn!("Cleanup of {} failed: {}", self.artifact_path.display(), e);
                false
            }
        }
    }
}

impl Drop for GeneratedScript {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_file(&self.artifact_path) {
            Ok(()) => debug!("Removed abandoned artifact {}", self.artifact_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cleanup of {} failed: {}", self.artifact_path.display(), e),
        }
    }
}
