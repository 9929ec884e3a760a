//! Composition root: router → pipeline store → rule engine → stream client →
//! result cache, glued behind one `orchestrate` call.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::api::{ApiClient, ScreeningRequest};
use crate::cache::{CachedCaseData, CaseCache, HttpSyncBackend, SyncBackend};
use crate::config::OrchestratorConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::pipeline::simulation::{self, SharedPipelineStore, SimulationConfig};
use crate::pipeline::{PipelineAction, PipelineStore};
use crate::routing::{RouteDecision, SmartRouter};
use crate::rules::{OfflineResponse, RuleEngine};
use crate::storage::KeyValueStore;
use crate::stream::{SseTransport, StreamStats, StreamTransport, TokenStreamClient};
use crate::types::{CaseId, StageId};

/// Composite answer returned to the caller immediately; pipeline progress is
/// observed through the shared store.
#[derive(Clone, Debug)]
pub struct OrchestrationResult {
    pub routing: RouteDecision,
    pub offline_result: OfflineResponse,
    pub case_id: CaseId,
    pub is_streaming: bool,
    pub stream_ready: bool,
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    router: SmartRouter,
    rules: RuleEngine,
    store: SharedPipelineStore,
    cache: CaseCache,
    connectivity: Arc<ConnectivityMonitor>,
    stream: TokenStreamClient,
    sync_backend: Arc<dyn SyncBackend>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let api = Arc::new(ApiClient::new(
            config.api.base_url.clone(),
            config.api.timeout_seconds,
        )?);

        let store = PipelineStore::new(storage.clone())
            .with_error_policy(config.pipeline.error_policy);

        Ok(Self {
            config,
            router: SmartRouter::new(),
            rules: RuleEngine::new(storage.clone()),
            store: Arc::new(Mutex::new(store)),
            cache: CaseCache::new(storage),
            connectivity: Arc::new(ConnectivityMonitor::default()),
            stream: TokenStreamClient::new(Arc::new(SseTransport::new(api.clone()))),
            sync_backend: Arc::new(HttpSyncBackend::new(api)),
        })
    }

    pub fn with_stream_transport(mut self, transport: Arc<dyn StreamTransport>) -> Self {
        self.stream = TokenStreamClient::new(transport);
        self
    }

    pub fn with_sync_backend(mut self, backend: Arc<dyn SyncBackend>) -> Self {
        self.sync_backend = backend;
        self
    }

    pub fn store(&self) -> SharedPipelineStore {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> &CaseCache {
        &self.cache
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Forward connectivity transitions into the pipeline store until the
    /// monitor is dropped.
    pub fn watch_connectivity(&self) -> JoinHandle<()> {
        let mut rx = self.connectivity.subscribe();
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let mode = *rx.borrow_and_update();
                store.lock().await.dispatch(PipelineAction::SetMode { mode });
            }
        })
    }

    /// Single entry point for one screening case. Never fails under normal
    /// conditions: every sub-call degrades to a fallback value. The caller
    /// gets the optimistic offline answer immediately; pipeline execution
    /// continues in the background and the finished case is cached (and,
    /// when online, synced) on completion.
    pub async fn orchestrate(&self, input: &str, age_months: u32) -> OrchestrationResult {
        let case_id = CaseId::generate();
        let routing = self.router.route(input, age_months);
        let mode = self.connectivity.mode();

        {
            let mut store = self.store.lock().await;
            store.dispatch(PipelineAction::SetMode { mode });
            store.dispatch(PipelineAction::InitPipeline {
                case_id: case_id.clone(),
                pipeline: routing.full_pipeline.clone(),
                priority: routing.priority,
            });
        }

        // Optimistic local answer regardless of connectivity.
        let offline_result = self.rules.evaluate(age_months, input);

        self.spawn_pipeline_run(case_id.clone(), offline_result.clone());

        let stream_ready = self.connectivity.is_online();
        if stream_ready {
            log::debug!("case {case_id}: stream transport armed for inference stage");
        }

        OrchestrationResult {
            routing,
            offline_result,
            case_id,
            is_streaming: false,
            stream_ready,
        }
    }

    /// Explicit second step once the inference stage is reached: open the
    /// token stream and relay every token into the pipeline store in order.
    pub async fn start_inference_stream(&self, request: ScreeningRequest) -> JoinHandle<()> {
        let rx = self.stream.start(request).await;
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            relay_tokens(rx, store).await;
        })
    }

    pub async fn stream_stats(&self) -> StreamStats {
        self.stream.stats().await
    }

    pub async fn cancel_stream(&self) {
        self.stream.cancel().await;
    }

    /// Re-attempt server reconciliation for every unsynced cached case.
    pub async fn sync_pending(&self, pending: &[CachedCaseData]) -> crate::cache::SyncReport {
        self.cache.sync_queue(pending, self.sync_backend.as_ref()).await
    }

    fn spawn_pipeline_run(&self, case_id: CaseId, offline: OfflineResponse) {
        let store = Arc::clone(&self.store);
        let cache = self.cache.clone();
        let connectivity = Arc::clone(&self.connectivity);
        let sync_backend = Arc::clone(&self.sync_backend);
        let sim = SimulationConfig {
            step_delay: self.config.pipeline.simulation_step(),
            stage_timeout: self.config.pipeline.stage_timeout(),
            ..SimulationConfig::default()
        };

        tokio::spawn(async move {
            simulation::run_pipeline_simulation(store, sim).await;

            let data = case_data_from_offline(case_id, &offline);
            if let Err(e) = cache.cache_case(&data) {
                log::warn!("could not cache finished case {}: {e}", data.case_id);
                return;
            }
            if connectivity.is_online() {
                cache.sync_queue(&[data], sync_backend.as_ref()).await;
            }
        });
    }
}

async fn relay_tokens(mut rx: mpsc::Receiver<String>, store: SharedPipelineStore) {
    while let Some(token) = rx.recv().await {
        store.lock().await.dispatch(PipelineAction::AgentStream {
            stage: StageId::Inference,
            token,
        });
    }
}

fn case_data_from_offline(case_id: CaseId, offline: &OfflineResponse) -> CachedCaseData {
    let mut data = CachedCaseData::new(case_id)
        .with_field("risk", offline.risk.clone().into())
        .with_field("confidence", offline.confidence.into())
        .with_field(
            "summary",
            offline
                .summary
                .iter()
                .cloned()
                .map(serde_json::Value::from)
                .collect::<Vec<_>>()
                .into(),
        );
    if let Some(rule_id) = &offline.rule_id {
        data = data.with_field("rule_id", rule_id.as_str().into());
    }
    data
}
