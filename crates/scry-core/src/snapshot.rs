use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Where a tracked operation stands, as shown to the inspector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Loading,
    Ready,
    Error,
}

/// Inspector-facing metadata for one tracked operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationInfo {
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub status: OperationStatus,
}

impl OperationInfo {
    pub fn new(document: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            document: document.into(),
            variables: None,
            errors: Vec::new(),
            status,
        }
    }
}

/// One materialized view of the inspected store: tracked queries and
/// mutations keyed by operation id, plus the cache contents.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub queries: BTreeMap<String, OperationInfo>,
    pub mutations: BTreeMap<String, OperationInfo>,
    pub cache: serde_json::Value,
}

/// A snapshot staged for transmission, tagged with its arrival sequence.
///
/// The consumer uses `seq` to detect gaps and ordering; the coordinator
/// itself never branches on it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StateBroadcast {
    pub seq: u64,
    pub queries: BTreeMap<String, OperationInfo>,
    pub mutations: BTreeMap<String, OperationInfo>,
    pub cache: serde_json::Value,
}

impl StateBroadcast {
    pub fn new(seq: u64, snapshot: StoreSnapshot) -> Self {
        Self {
            seq,
            queries: snapshot.queries,
            mutations: snapshot.mutations,
            cache: snapshot.cache,
        }
    }
}

/// Pull-side contract of the snapshot producer: materialize the current
/// store state on demand. Callers must not assume the result is handled
/// synchronously.
pub trait StoreInspector: Send + Sync {
    fn snapshot(&self) -> StoreSnapshot;
}
