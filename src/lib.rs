pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod errors;
pub mod orchestrator;
pub mod pipeline;
pub mod routing;
pub mod rules;
pub mod storage;
pub mod stream;
pub mod types;

pub use crate::api::{ScreeningReport, ScreeningRequest};
pub use crate::cache::{CachedCaseData, CaseCache};
pub use crate::config::OrchestratorConfig;
pub use crate::orchestrator::{OrchestrationResult, Orchestrator};
pub use crate::routing::{RouteDecision, SmartRouter};
pub use crate::rules::{OfflineResponse, RuleEngine};
pub use crate::types::{CaseId, PipelineMode, Priority, StageId, StageStatus};
