use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An operation the inspector asked to run again against the live store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
}

/// Result of a replayed operation. Correlated with its request purely by
/// message-type pairing; execution failures travel inside `response`,
/// never as a relay error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    pub response: serde_json::Value,
}

/// Executes replayed operations against the inspected store. External
/// collaborator; the relay only routes requests and outcomes.
#[async_trait]
pub trait ReplayHandler: Send + Sync {
    async fn replay(&self, request: ReplayRequest) -> ReplayOutcome;
}
