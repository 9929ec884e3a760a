//! Pipeline state store: a reducer-based state machine tracking one case's
//! pipeline of stages. Actions are applied strictly in dispatch order and
//! every post-action state is mirrored to local storage best-effort.

pub mod simulation;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::api::ScreeningReport;
use crate::storage::{self, KeyValueStore};
use crate::types::{CaseId, PipelineMode, Priority, StageId, StageStatus};

/// Typed stage output, replacing the untyped key-value bag the pipeline state
/// started life as. Streamed text accumulates in `Streamed` until the stage
/// finalizes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    #[default]
    Empty,
    Streamed {
        text: String,
    },
    Report {
        report: ScreeningReport,
    },
    Fields {
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

impl StageOutput {
    pub fn streamed_text(&self) -> Option<&str> {
        match self {
            StageOutput::Streamed { text } => Some(text),
            _ => None,
        }
    }

    fn append_token(&mut self, token: &str) {
        match self {
            StageOutput::Streamed { text } => text.push_str(token),
            StageOutput::Empty => {
                *self = StageOutput::Streamed {
                    text: token.to_string(),
                }
            }
            // Finalized outputs never accumulate; terminal-stage guards
            // upstream make this unreachable in practice.
            _ => {}
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: StageId,
    pub status: StageStatus,
    pub confidence: f64,
    pub progress: u8,
    pub output: StageOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub timestamp: String,
    pub dependencies: Vec<StageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Stage {
    fn pending(id: StageId, dependencies: Vec<StageId>) -> Self {
        Self {
            id,
            status: StageStatus::Pending,
            confidence: 0.0,
            progress: 0,
            output: StageOutput::Empty,
            duration_ms: None,
            timestamp: now_iso(),
            dependencies,
            error: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub case_id: Option<CaseId>,
    pub pipeline: Vec<StageId>,
    pub stages: HashMap<StageId, Stage>,
    pub current_stage: Option<StageId>,
    pub mode: PipelineMode,
    pub priority: Priority,
    pub is_complete: bool,
}

impl PipelineState {
    pub fn stage(&self, id: StageId) -> Option<&Stage> {
        self.stages.get(&id)
    }

    /// True once every stage in the pipeline reached a terminal status.
    pub fn all_stages_settled(&self) -> bool {
        !self.pipeline.is_empty()
            && self
                .pipeline
                .iter()
                .all(|id| self.stages.get(id).is_some_and(|s| s.status.is_terminal()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineAction {
    InitPipeline {
        case_id: CaseId,
        pipeline: Vec<StageId>,
        priority: Priority,
    },
    AgentStart {
        stage: StageId,
    },
    AgentStream {
        stage: StageId,
        token: String,
    },
    AgentSuccess {
        stage: StageId,
        output: StageOutput,
        duration_ms: u64,
    },
    AgentError {
        stage: StageId,
        error: String,
    },
    CompleteCase,
    SetMode {
        mode: PipelineMode,
    },
    Reset,
}

/// Source of the per-stage confidence assigned on success.
pub trait ConfidenceSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Uniform in [0.85, 1.0]. A demo placeholder: real deployments must replace
/// this with the confidence reported by the inference backend.
pub struct SyntheticConfidence;

impl ConfidenceSource for SyntheticConfidence {
    fn sample(&self) -> f64 {
        use rand::Rng;
        rand::thread_rng().gen_range(0.85..=1.0)
    }
}

pub struct FixedConfidence(pub f64);

impl ConfidenceSource for FixedConfidence {
    fn sample(&self) -> f64 {
        self.0
    }
}

/// What `advance()` does when the current stage has errored. The upstream
/// behavior was undefined; the policy is explicit configuration here.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Skip the errored stage and start its successor.
    #[default]
    ContinueOnError,
    /// Mark the case complete immediately, leaving later stages pending.
    AbortOnError,
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// Pure transition function. Actions addressed at a stage that already
/// reached a terminal status are ignored: stages never regress within a run.
pub fn reduce(state: &mut PipelineState, action: PipelineAction, confidence: &dyn ConfidenceSource) {
    match action {
        PipelineAction::InitPipeline {
            case_id,
            pipeline,
            priority,
        } => {
            let mut stages = HashMap::with_capacity(pipeline.len());
            let mut prev: Option<StageId> = None;
            for &id in &pipeline {
                let deps = prev.map(|p| vec![p]).unwrap_or_default();
                stages.insert(id, Stage::pending(id, deps));
                prev = Some(id);
            }
            state.case_id = Some(case_id);
            state.current_stage = pipeline.first().copied();
            state.pipeline = pipeline;
            state.stages = stages;
            state.priority = priority;
            state.is_complete = false;
        }
        PipelineAction::AgentStart { stage } => {
            let Some(entry) = live_stage(state, stage) else {
                return;
            };
            entry.status = StageStatus::Running;
            entry.progress = 10;
            entry.timestamp = now_iso();
            state.current_stage = Some(stage);
        }
        PipelineAction::AgentStream { stage, token } => {
            let Some(entry) = live_stage(state, stage) else {
                return;
            };
            entry.status = StageStatus::Streaming;
            entry.progress = entry.progress.saturating_add(2).min(95);
            entry.output.append_token(&token);
            entry.timestamp = now_iso();
        }
        PipelineAction::AgentSuccess {
            stage,
            output,
            duration_ms,
        } => {
            let sampled = confidence.sample();
            let Some(entry) = live_stage(state, stage) else {
                return;
            };
            entry.status = StageStatus::Success;
            entry.progress = 100;
            entry.confidence = sampled;
            // An empty success payload keeps whatever streamed in.
            if output != StageOutput::Empty {
                entry.output = output;
            }
            entry.duration_ms = Some(duration_ms);
            entry.timestamp = now_iso();
        }
        PipelineAction::AgentError { stage, error } => {
            let Some(entry) = live_stage(state, stage) else {
                return;
            };
            entry.status = StageStatus::Error;
            entry.error = Some(error);
            entry.timestamp = now_iso();
            // current_stage is left in place: the caller decides whether to
            // abort or skip (see ErrorPolicy / advance()).
        }
        PipelineAction::CompleteCase => {
            state.is_complete = true;
            state.current_stage = None;
        }
        PipelineAction::SetMode { mode } => {
            state.mode = mode;
        }
        PipelineAction::Reset => {
            *state = PipelineState::default();
        }
    }
}

fn live_stage(state: &mut PipelineState, id: StageId) -> Option<&mut Stage> {
    match state.stages.get_mut(&id) {
        Some(stage) if stage.status.is_terminal() => {
            log::debug!("ignoring action for terminal stage {id}");
            None
        }
        Some(stage) => Some(stage),
        None => {
            log::debug!("ignoring action for unknown stage {id}");
            None
        }
    }
}

/// Owns one case's state, applies actions in dispatch order, and mirrors the
/// result to storage under `agent_state_<caseId>`.
pub struct PipelineStore {
    state: PipelineState,
    storage: Arc<dyn KeyValueStore>,
    confidence: Box<dyn ConfidenceSource>,
    error_policy: ErrorPolicy,
}

impl PipelineStore {
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            state: PipelineState::default(),
            storage,
            confidence: Box::new(SyntheticConfidence),
            error_policy: ErrorPolicy::default(),
        }
    }

    pub fn with_confidence(mut self, source: Box<dyn ConfidenceSource>) -> Self {
        self.confidence = source;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }

    pub fn dispatch(&mut self, action: PipelineAction) {
        log::debug!("dispatch {action:?}");
        reduce(&mut self.state, action, self.confidence.as_ref());
        if let Some(case_id) = &self.state.case_id {
            storage::mirror(
                self.storage.as_ref(),
                &storage::agent_state_key(case_id),
                &self.state,
            );
        }
    }

    /// Drive the pipeline forward: start the successor of the current stage,
    /// or complete the case when none remains. Returns the stage started.
    pub fn advance(&mut self) -> Option<StageId> {
        let current = self.state.current_stage?;

        if self.error_policy == ErrorPolicy::AbortOnError
            && self
                .state
                .stage(current)
                .is_some_and(|s| s.status == StageStatus::Error)
        {
            self.dispatch(PipelineAction::CompleteCase);
            return None;
        }

        let next = self
            .state
            .pipeline
            .iter()
            .position(|&id| id == current)
            .and_then(|idx| self.state.pipeline.get(idx + 1))
            .copied();

        match next {
            Some(stage) => {
                self.dispatch(PipelineAction::AgentStart { stage });
                Some(stage)
            }
            None => {
                self.dispatch(PipelineAction::CompleteCase);
                None
            }
        }
    }
}
