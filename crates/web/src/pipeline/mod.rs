//! Test pipeline
//!
//! Prompt synthesis, code generation, artifact materialization, sandboxed
//! execution, classification and recording, sequenced by [`Pipeline`].

pub mod classifier;
pub mod error;
pub mod generation;
pub mod limiter;
pub mod materializer;
pub mod orchestrator;
pub mod prompt;
pub mod protocol;
pub mod recorder;
pub mod sandbox;

pub use classifier::{classify, status_from_logs, Verdict};
pub use error::{GenerationError, PipelineError, PipelineResult};
pub use generation::{resolve_credential, CodeGenerator, GeminiClient};
pub use limiter::{RunLimiter, RunPermit};
pub use materializer::{GeneratedScript, ScriptMaterializer};
pub use orchestrator::{Pipeline, PipelineStage, RunInput, RunReport};
pub use prompt::TestRequest;
pub use recorder::RunRecorder;
pub use sandbox::{ExecutionOutcome, ExecutionSandbox, ProcessSandbox};
