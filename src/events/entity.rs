//! Per-entity event stream.

use std::sync::Arc;

use chrono::Utc;

use crate::bus::{keys, Bus, StreamEntry, StreamLimits};
use crate::types::{EntityEvent, EntityEventKind, EntityId};

#[derive(Clone)]
pub struct EntityPublisher {
    bus: Arc<dyn Bus>,
    limits: StreamLimits,
}

impl EntityPublisher {
    pub fn new(bus: Arc<dyn Bus>, limits: StreamLimits) -> Self {
        Self { bus, limits }
    }

    /// Append to the entity's stream and notify live subscribers.
    pub async fn publish(&self, entity_id: EntityId, kind: EntityEventKind, payload: serde_json::Value) {
        let entry = serde_json::json!({
            "type": kind,
            "payload": payload,
            "created_at": Utc::now(),
        });
        match self
            .bus
            .append(&keys::entity_events(entity_id), entry, self.limits)
            .await
        {
            Ok(seq) => {
                let note = serde_json::json!({ "type": kind, "seq": seq });
                if let Err(e) = self.bus.publish(&keys::entity_notify(entity_id), note).await {
                    tracing::warn!(entity_id = %entity_id, error = %e, "entity notify failed");
                }
            }
            Err(e) => {
                tracing::warn!(entity_id = %entity_id, kind = %kind, error = %e, "entity stream append failed");
            }
        }
    }
}

/// Decode a stream entry written by [`EntityPublisher`].
pub fn decode_entry(entity_id: EntityId, entry: &StreamEntry) -> Option<EntityEvent> {
    Some(EntityEvent {
        entity_id,
        seq: entry.id,
        kind: serde_json::from_value(entry.payload.get("type")?.clone()).ok()?,
        payload: entry.payload.get("payload").cloned().unwrap_or_default(),
        created_at: serde_json::from_value(entry.payload.get("created_at")?.clone()).ok()?,
    })
}
