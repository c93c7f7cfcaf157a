//! Pipeline orchestration
//!
//! One invocation walks
//! `Idle -> Validating -> Generating -> Materialized -> Executing -> Classified
//! -> Recorded -> Cleaned -> Responded`. Errors before execution abort the run
//! and surface to the caller. Once `Executing` is entered the run always
//! reaches `Responded` with a PASS or FAIL verdict.

use autoqa_common::{HistoryLedger, RunStatus, UserId};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, info_span, Instrument};

use super::classifier::{classify, Verdict};
use super::error::{GenerationError, PipelineError, PipelineResult};
use super::generation::{generate_source, CodeGenerator, GeminiClient};
use super::limiter::RunLimiter;
use super::materializer::ScriptMaterializer;
use super::prompt::{synthesize, TestRequest};
use super::recorder::RunRecorder;
use super::sandbox::{ExecutionOutcome, ExecutionSandbox, ProcessSandbox};
use crate::config::AppConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Validating,
    Generating,
    Materialized,
    Executing,
    Classified,
    Recorded,
    Cleaned,
    Responded,
    Aborted,
}

/// Raw inputs of one run, as received
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub url: Option<String>,
    pub instruction: Option<String>,
    pub requester_id: UserId,
    /// Credential already resolved for the deployment mode
    pub api_key: Option<String>,
}

/// Result of a run that reached execution
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub logs: String,
    pub record_id: Option<i64>,
    pub outcome: ExecutionOutcome,
    pub stages: Vec<PipelineStage>,
    pub artifact_path: PathBuf,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.status.is_pass()
    }
}

struct StageLog {
    stages: Vec<PipelineStage>,
}

impl StageLog {
    fn new() -> Self {
        Self {
            stages: vec![PipelineStage::Idle],
        }
    }

    fn enter(&mut self, stage: PipelineStage) {
        debug!("stage {:?} -> {:?}", self.current(), stage);
        self.stages.push(stage);
    }

    fn current(&self) -> PipelineStage {
        self.stages.last().copied().unwrap_or(PipelineStage::Idle)
    }

    fn abort(&mut self, err: &PipelineError) {
        error!("Run aborted during {:?}: {}", self.current(), err);
        self.enter(PipelineStage::Aborted);
    }
}

/// Sequences generation, execution, classification and recording
pub struct Pipeline {
    generator: Arc<dyn CodeGenerator>,
    materializer: ScriptMaterializer,
    sandbox: Arc<dyn ExecutionSandbox>,
    recorder: RunRecorder,
    limiter: RunLimiter,
}

impl Pipeline {
    pub fn new(
        generator: Arc<dyn CodeGenerator>,
        materializer: ScriptMaterializer,
        sandbox: Arc<dyn ExecutionSandbox>,
        recorder: RunRecorder,
        limiter: RunLimiter,
    ) -> Self {
        Self {
            generator,
            materializer,
            sandbox,
            recorder,
            limiter,
        }
    }

    /// Wire the production components from configuration
    pub fn from_config(cfg: &AppConfig, ledger: HistoryLedger) -> Result<Self, GenerationError> {
        Ok(Self::new(
            Arc::new(GeminiClient::new(&cfg.model)?),
            ScriptMaterializer::new(&cfg.runner.scratch_dir, &cfg.runner.artifact_extension),
            Arc::new(ProcessSandbox::from_config(&cfg.runner)),
            RunRecorder::new(ledger),
            RunLimiter::new(cfg.runner.max_concurrent_runs_per_user),
        ))
    }

    pub fn materializer(&self) -> &ScriptMaterializer {
        &self.materializer
    }

    /// Run one invocation end to end
    pub async fn run(&self, input: RunInput) -> PipelineResult<RunReport> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        let span = info_span!("pipeline", run = %&run_id[..8], user = %input.requester_id);
        self.run_inner(run_id, input).instrument(span).await
    }

    async fn run_inner(&self, run_id: String, input: RunInput) -> PipelineResult<RunReport> {
        let mut log = StageLog::new();

        log.enter(PipelineStage::Validating);
        let request = match TestRequest::new(
            input.url.as_deref(),
            input.instruction.as_deref(),
            input.requester_id,
        ) {
            Ok(r) => r,
            Err(e) => {
                log.abort(&e);
                return Err(e);
            }
        };
        let _permit = match self.limiter.try_acquire(&request.requester_id) {
            Ok(p) => p,
            Err(e) => {
                log.abort(&e);
                return Err(e);
            }
        };

        log.enter(PipelineStage::Generating);
        let prompt = synthesize(&request);
        let source =
            match generate_source(self.generator.as_ref(), &prompt, input.api_key.as_deref()).await {
                Ok(s) => s,
                Err(e) => {
                    let e = PipelineError::from(e);
                    log.abort(&e);
                    return Err(e);
                }
            };

        let script = match self.materializer.materialize(source).await {
            Ok(s) => s,
            Err(e) => {
                let e = PipelineError::Materialize(e);
                log.abort(&e);
                return Err(e);
            }
        };
        log.enter(PipelineStage::Materialized);
        let artifact_path = script.artifact_path.clone();

        log.enter(PipelineStage::Executing);
        info!("Executing {} against {}", artifact_path.display(), request.target_url);
        let outcome = self.sandbox.execute(&script).await;

        let verdict = classify(&outcome);
        log.enter(PipelineStage::Classified);

        let record_id = self.recorder.record(&request, &verdict).map(|r| r.id);
        log.enter(PipelineStage::Recorded);

        script.cleanup().await;
        log.enter(PipelineStage::Cleaned);

        info!(
            "Run finished: {} (exit {:?}, {} ms)",
            verdict.status, outcome.exit_code, outcome.duration_ms
        );
        log.enter(PipelineStage::Responded);

        let Verdict { status, logs } = verdict;
        Ok(RunReport {
            run_id,
            status,
            logs,
            record_id,
            outcome,
            stages: log.stages,
            artifact_path,
        })
    }
}
