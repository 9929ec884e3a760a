//! Backend-free pipeline driver. Dispatches the exact action sequence a real
//! run would (start → streamed tokens for the inference stage → success →
//! complete), with fixed delays and canned tokens, so observers of the store
//! need no changes when a live backend replaces it.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{ErrorPolicy, PipelineAction, PipelineStore, StageOutput};
use crate::types::StageId;

pub type SharedPipelineStore = Arc<Mutex<PipelineStore>>;

#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Wall time each simulated stage takes.
    pub step_delay: Duration,
    /// A stage exceeding this is failed with an error instead of hanging.
    pub stage_timeout: Duration,
    /// Canned tokens emitted by the inference stage.
    pub tokens: Vec<String>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(150),
            stage_timeout: Duration::from_secs(30),
            tokens: [
                "Based", " on", " the", " reported", " observations,",
                " continued", " monitoring", " is", " recommended.",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl SimulationConfig {
    /// Near-instant variant for tests.
    pub fn fast() -> Self {
        Self {
            step_delay: Duration::from_millis(1),
            stage_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

/// Runs every stage of the initialized pipeline to completion and marks the
/// case complete. Infallible by design: a timed-out stage is recorded as a
/// stage error and the configured error policy decides whether to go on.
pub async fn run_pipeline_simulation(store: SharedPipelineStore, config: SimulationConfig) {
    let (pipeline, policy) = {
        let guard = store.lock().await;
        (guard.state().pipeline.clone(), guard.error_policy())
    };

    for stage in pipeline {
        store
            .lock()
            .await
            .dispatch(PipelineAction::AgentStart { stage });
        let started = Instant::now();

        let work = run_stage(&store, stage, &config);
        match tokio::time::timeout(config.stage_timeout, work).await {
            Ok(()) => {
                store.lock().await.dispatch(PipelineAction::AgentSuccess {
                    stage,
                    output: StageOutput::Empty,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            }
            Err(_) => {
                log::warn!("stage {stage} timed out after {:?}", config.stage_timeout);
                store.lock().await.dispatch(PipelineAction::AgentError {
                    stage,
                    error: "stage timed out".to_string(),
                });
                if policy == ErrorPolicy::AbortOnError {
                    break;
                }
            }
        }
    }

    store.lock().await.dispatch(PipelineAction::CompleteCase);
}

async fn run_stage(store: &SharedPipelineStore, stage: StageId, config: &SimulationConfig) {
    if stage == StageId::Inference {
        let token_gap = config.step_delay / (config.tokens.len().max(1) as u32);
        for token in &config.tokens {
            tokio::time::sleep(token_gap).await;
            store.lock().await.dispatch(PipelineAction::AgentStream {
                stage,
                token: token.clone(),
            });
        }
    } else {
        tokio::time::sleep(config.step_delay).await;
    }
}

/// Convenience used by callers polling for the terminal signal.
pub async fn wait_for_completion(store: &SharedPipelineStore, poll: Duration) {
    loop {
        if store.lock().await.state().is_complete {
            return;
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::FixedConfidence;
    use crate::routing::FULL_PIPELINE;
    use crate::storage::MemoryStore;
    use crate::types::{CaseId, Priority, StageStatus};

    fn shared_store(pipeline: &[StageId]) -> SharedPipelineStore {
        let mut store = PipelineStore::new(Arc::new(MemoryStore::new()))
            .with_confidence(Box::new(FixedConfidence(0.95)));
        store.dispatch(PipelineAction::InitPipeline {
            case_id: CaseId::new("sim-case"),
            pipeline: pipeline.to_vec(),
            priority: Priority::Medium,
        });
        Arc::new(Mutex::new(store))
    }

    #[tokio::test]
    async fn simulation_completes_every_stage() {
        let store = shared_store(FULL_PIPELINE);
        run_pipeline_simulation(store.clone(), SimulationConfig::fast()).await;

        let guard = store.lock().await;
        let state = guard.state();
        assert!(state.is_complete);
        assert!(state.current_stage.is_none());
        for id in FULL_PIPELINE {
            let stage = state.stage(*id).unwrap();
            assert_eq!(stage.status, StageStatus::Success, "stage {id}");
            assert_eq!(stage.progress, 100);
            assert!(stage.duration_ms.is_some());
        }
    }

    #[tokio::test]
    async fn inference_stage_accumulates_canned_tokens() {
        let store = shared_store(&[StageId::Intake, StageId::Inference]);
        let mut config = SimulationConfig::fast();
        config.tokens = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        run_pipeline_simulation(store.clone(), config).await;

        let guard = store.lock().await;
        let stage = guard.state().stage(StageId::Inference).unwrap();
        assert_eq!(stage.output.streamed_text(), Some("ABC"));
        assert_eq!(stage.status, StageStatus::Success);
    }

    #[tokio::test]
    async fn stage_timeout_is_recorded_as_error() {
        let store = shared_store(&[StageId::Intake, StageId::Safety]);
        let config = SimulationConfig {
            step_delay: Duration::from_millis(50),
            stage_timeout: Duration::from_millis(5),
            tokens: Vec::new(),
        };
        run_pipeline_simulation(store.clone(), config).await;

        let guard = store.lock().await;
        let state = guard.state();
        assert!(state.is_complete);
        let intake = state.stage(StageId::Intake).unwrap();
        assert_eq!(intake.status, StageStatus::Error);
        assert_eq!(intake.error.as_deref(), Some("stage timed out"));
    }

    #[tokio::test]
    async fn abort_policy_stops_after_timed_out_stage() {
        let mut inner = PipelineStore::new(Arc::new(MemoryStore::new()))
            .with_error_policy(ErrorPolicy::AbortOnError);
        inner.dispatch(PipelineAction::InitPipeline {
            case_id: CaseId::new("abort-case"),
            pipeline: vec![StageId::Intake, StageId::Safety],
            priority: Priority::Low,
        });
        let store = Arc::new(Mutex::new(inner));

        let config = SimulationConfig {
            step_delay: Duration::from_millis(50),
            stage_timeout: Duration::from_millis(5),
            tokens: Vec::new(),
        };
        run_pipeline_simulation(store.clone(), config).await;

        let guard = store.lock().await;
        let state = guard.state();
        assert!(state.is_complete);
        assert_eq!(
            state.stage(StageId::Safety).unwrap().status,
            StageStatus::Pending
        );
    }
}
