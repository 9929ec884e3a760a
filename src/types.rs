use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Fresh random case id (one per screening attempt).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(String);

impl RuleId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The fixed set of pipeline stages. Pipelines are ordered subsets of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Intake,
    Embedding,
    Temporal,
    Inference,
    Safety,
    Summarizer,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Intake => "intake",
            StageId::Embedding => "embedding",
            StageId::Temporal => "temporal",
            StageId::Inference => "inference",
            StageId::Safety => "safety",
            StageId::Summarizer => "summarizer",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage status. Within one run a stage only moves forward:
/// pending → running → (streaming)* → success | error. Offline is terminal
/// and reserved for external drivers marking stages that cannot run without
/// connectivity; nothing in this crate dispatches it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Idle,
    Pending,
    Running,
    Streaming,
    Success,
    Error,
    Offline,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageStatus::Success | StageStatus::Error | StageStatus::Offline
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Low,
    Medium,
    High,
    Urgent,
}

/// Network reachability as observed by the host, not pipeline choice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    #[default]
    Online,
    Hybrid,
    Offline,
}

/// Provenance of an offline/optimistic response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    OfflineRules,
    OfflineSafe,
    Hybrid,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_id_serializes_snake_case() {
        let json = serde_json::to_string(&StageId::Summarizer).unwrap();
        assert_eq!(json, "\"summarizer\"");
        let back: StageId = serde_json::from_str("\"intake\"").unwrap();
        assert_eq!(back, StageId::Intake);
    }

    #[test]
    fn terminal_statuses() {
        assert!(StageStatus::Success.is_terminal());
        assert!(StageStatus::Error.is_terminal());
        assert!(StageStatus::Offline.is_terminal());
        assert!(!StageStatus::Streaming.is_terminal());
        assert!(!StageStatus::Pending.is_terminal());
    }

    #[test]
    fn priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn case_id_generate_is_unique() {
        assert_ne!(CaseId::generate(), CaseId::generate());
    }
}
