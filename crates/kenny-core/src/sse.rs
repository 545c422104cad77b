//! Progressive stream chunk envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    RouterStart,
    RouterDone,
    PlannerStart,
    PlannerDone,
    AgentCallStart,
    AgentCallComplete,
    ReviewerDone,
    FinalResult,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub chunk_type: ChunkType,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub data: serde_json::Value,
}

impl StreamChunk {
    pub fn new(chunk_type: ChunkType, correlation_id: Uuid, data: serde_json::Value) -> Self {
        Self { chunk_type, timestamp: Utc::now(), correlation_id, data }
    }

    pub fn to_sse_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
