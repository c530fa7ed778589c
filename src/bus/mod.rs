//! Fast, best-effort bus: pub/sub channels and bounded append streams.
//!
//! Nothing on the bus is authoritative. Callers treat every error as a
//! delivery failure and fall back to the [`Store`](crate::store::Store).

mod memory;

pub use memory::MemoryBus;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::{EntityId, RunId, SpaceId};

/// Retention limits for an append stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    pub max_len: usize,
    pub ttl: Duration,
}

impl Default for StreamLimits {
    fn default() -> Self {
        Self {
            max_len: 2000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// One entry of an append stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Bus-assigned, increasing within the stream.
    pub id: u64,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait Bus: Send + Sync {
    /// Publish to every current subscriber of a channel.
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<()>;

    /// Subscribe to a channel; only messages published afterwards arrive.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<serde_json::Value>>;

    /// Append to a stream, trimming it to `limits`. Returns the entry id.
    async fn append(
        &self,
        stream: &str,
        payload: serde_json::Value,
        limits: StreamLimits,
    ) -> Result<u64>;

    /// Unexpired entries with `id > after`, oldest first.
    async fn read_stream(&self, stream: &str, after: u64) -> Result<Vec<StreamEntry>>;

    /// Newest unexpired entry of a stream.
    async fn last_entry(&self, stream: &str) -> Result<Option<StreamEntry>>;
}

/// Channel and stream names.
pub mod keys {
    use super::*;

    pub fn space(space_id: SpaceId) -> String {
        format!("space:{space_id}")
    }

    pub fn run_events(run_id: RunId) -> String {
        format!("run:{run_id}:events")
    }

    pub fn run_notify(run_id: RunId) -> String {
        format!("run:{run_id}:notify")
    }

    pub fn entity_events(entity_id: EntityId) -> String {
        format!("entity:{entity_id}:events")
    }

    pub fn entity_notify(entity_id: EntityId) -> String {
        format!("entity:{entity_id}:notify")
    }

    /// Client-confirmed tool calls for out-of-process workers.
    pub const TOOL_CALLS: &str = "tools:calls";
}
