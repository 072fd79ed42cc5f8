use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use brandframe_contracts::canvas::{formats_digest, CanvasFormats};
use brandframe_contracts::events::{payload, EventWriter};
use brandframe_contracts::runs::{FailureKind, PipelineKind, PipelineResult, RunStatus};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{error_chain_text, push_unique_warning};
use crate::model::{GenerationModel, ModelSettings};
use crate::stores::{BrandProfileStore, TemplateStore};

/// Result of one collaborator call as a stage sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    /// A documented substitute was used; the run continues with a warning.
    Fallback { value: T, reason: String },
    /// The missing artifact is structurally required; the run fails.
    Fatal(String),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Fallback { value, reason } => Outcome::Fallback {
                value: f(value),
                reason,
            },
            Outcome::Fatal(reason) => Outcome::Fatal(reason),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Outcome::Fatal(_))
    }
}

/// Identity, status and diagnostics shared by every pipeline state.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMeta {
    pub run_id: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub warnings: Vec<String>,
}

impl RunMeta {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Processing,
            error: None,
            failure: None,
            warnings: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// No-op once the run is terminal.
    pub fn fail(&mut self, kind: FailureKind, error: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let error = error.into();
        self.status = RunStatus::Failed;
        self.failure = Some(kind);
        self.error = Some(if error.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            error
        });
    }

    fn complete(&mut self) {
        if self.status == RunStatus::Processing {
            self.status = RunStatus::Completed;
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        push_unique_warning(&mut self.warnings, message.into());
    }

    /// Outward record. The digest covers `formats` whenever any were built.
    pub fn into_result(self, pipeline: PipelineKind, formats: CanvasFormats) -> PipelineResult {
        let digest = if formats.is_empty() {
            None
        } else {
            formats_digest(&formats).ok()
        };
        PipelineResult {
            message: result_message(pipeline, self.status).to_string(),
            run_id: self.run_id,
            pipeline,
            status: self.status,
            error: self.error,
            formats,
            image_url: None,
            refined_prompt: None,
            warnings: self.warnings,
            failure: self.failure,
            digest,
        }
    }
}

fn result_message(pipeline: PipelineKind, status: RunStatus) -> &'static str {
    match (pipeline, status) {
        (PipelineKind::Creative, RunStatus::Completed) => "Creative generated successfully",
        (PipelineKind::Creative, _) => "Creative generation failed",
        (PipelineKind::Product, RunStatus::Completed) => "Product poster generated successfully",
        (PipelineKind::Product, _) => "Product poster generation failed",
        (PipelineKind::Template, RunStatus::Completed) => "Template poster generated successfully",
        (PipelineKind::Template, _) => "Template poster generation failed",
    }
}

pub trait PipelineState: Clone {
    fn meta(&self) -> &RunMeta;
    fn meta_mut(&mut self) -> &mut RunMeta;
}

/// Collaborators a run may call. Shared by reference; the run owns its state.
pub struct PipelineContext<'a> {
    pub brands: &'a dyn BrandProfileStore,
    pub templates: &'a dyn TemplateStore,
    pub model: &'a dyn GenerationModel,
    pub settings: &'a ModelSettings,
    pub events: &'a EventWriter,
}

impl PipelineContext<'_> {
    /// Applies the outcome policy: `Ok` passes through, `Fallback` records a
    /// warning and passes the substitute through, `Fatal` fails the run as a
    /// business failure and yields nothing.
    pub fn settle<T, S: PipelineState>(
        &self,
        stage: &str,
        state: &mut S,
        outcome: Outcome<T>,
    ) -> Option<T> {
        match outcome {
            Outcome::Ok(value) => Some(value),
            Outcome::Fallback { value, reason } => {
                warn!(run_id = %state.meta().run_id, stage, "{reason}");
                self.events.record(
                    "stage_fallback",
                    payload(json!({ "stage": stage, "reason": reason })),
                );
                state.meta_mut().warn(reason);
                Some(value)
            }
            Outcome::Fatal(reason) => {
                state.meta_mut().fail(FailureKind::Business, reason);
                None
            }
        }
    }
}

pub type StageFn<S> = fn(&PipelineContext<'_>, S) -> anyhow::Result<S>;

/// One named step. Takes the state by value and returns the next state.
pub struct Stage<S> {
    pub name: &'static str,
    pub run: StageFn<S>,
}

/// A fixed stage list folded over one state value. Stops at the first
/// terminal status; an error or panic inside a stage fails the run as a
/// fault and the stage's partial work is discarded.
pub struct Pipeline<S: 'static> {
    kind: PipelineKind,
    stages: &'static [Stage<S>],
}

impl<S: PipelineState + 'static> Pipeline<S> {
    pub const fn new(kind: PipelineKind, stages: &'static [Stage<S>]) -> Self {
        Self { kind, stages }
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name).collect()
    }

    pub fn run(&self, ctx: &PipelineContext<'_>, initial: S) -> S {
        let mut state = initial;
        let run_id = state.meta().run_id.clone();
        info!(run_id = %run_id, pipeline = %self.kind, "run started");
        ctx.events.record(
            "run_started",
            payload(json!({ "stages": self.stage_names() })),
        );

        for stage in self.stages {
            if state.meta().is_terminal() {
                break;
            }
            debug!(run_id = %run_id, stage = stage.name, "stage started");
            ctx.events
                .record("stage_started", payload(json!({ "stage": stage.name })));

            let snapshot = state.clone();
            let result = panic::catch_unwind(AssertUnwindSafe(|| (stage.run)(ctx, state)));
            state = match result {
                Ok(Ok(next)) => next,
                Ok(Err(err)) => {
                    let mut failed = snapshot;
                    failed
                        .meta_mut()
                        .fail(FailureKind::Fault, error_chain_text(&err, 800));
                    failed
                }
                Err(panic) => {
                    let mut failed = snapshot;
                    failed.meta_mut().fail(
                        FailureKind::Fault,
                        format!("stage {} panicked: {}", stage.name, panic_message(panic.as_ref())),
                    );
                    failed
                }
            };

            ctx.events.record(
                "stage_completed",
                payload(json!({ "stage": stage.name, "status": state.meta().status })),
            );
        }

        state.meta_mut().complete();
        let meta = state.meta();
        match meta.status {
            RunStatus::Failed => {
                warn!(
                    run_id = %run_id,
                    pipeline = %self.kind,
                    error = meta.error.as_deref().unwrap_or_default(),
                    "run failed"
                );
                ctx.events.record(
                    "run_failed",
                    payload(json!({ "error": meta.error, "failure": meta.failure })),
                );
            }
            _ => {
                info!(run_id = %run_id, pipeline = %self.kind, warnings = meta.warnings.len(), "run finished");
                ctx.events.record(
                    "run_finished",
                    payload(json!({ "status": meta.status, "warnings": meta.warnings })),
                );
            }
        }
        state
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        return (*text).to_string();
    }
    if let Some(text) = panic.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}
