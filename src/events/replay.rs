//! Replay from the store plus a live tail from the bus.
//!
//! Subscribers never depend on the bus for completeness: every stream
//! subscribes first, backfills from the store, and falls back to polling
//! the store when the bus is unavailable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

use super::entity::decode_entry;
use crate::bus::{keys, Bus};
use crate::error::{AgoraError, Result};
use crate::store::Store;
use crate::types::{
    EntityEvent, EntityId, MessageQuery, RunEvent, RunId, SpaceEvent, SpaceEventKind, SpaceId,
    SpaceMessage,
};

/// A boxed, fallible event stream.
pub type EventStream<T> = BoxStream<'static, Result<T>>;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Polls to wait for a missing terminal event once the run is terminal.
const TERMINAL_GRACE_POLLS: u32 = 4;

async fn subscribe(bus: &dyn Bus, channel: &str) -> Option<Receiver<serde_json::Value>> {
    match bus.subscribe(channel).await {
        Ok(rx) => Some(rx),
        Err(e) => {
            tracing::warn!(channel, error = %e, "live tail unavailable; polling the store");
            None
        }
    }
}

/// Wait for the next live payload. `None` means: catch up from the store.
async fn wait_for_signal(live: &mut Option<Receiver<serde_json::Value>>) -> Option<serde_json::Value> {
    match live.as_mut() {
        Some(rx) => match rx.recv().await {
            Ok(value) => Some(value),
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "live tail lagged; catching up");
                None
            }
            Err(RecvError::Closed) => {
                *live = None;
                None
            }
        },
        None => {
            tokio::time::sleep(POLL_INTERVAL).await;
            None
        }
    }
}

/// Events of a run after `after_seq`, ending at its terminal event.
pub fn run_events(
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    run_id: RunId,
    after_seq: u64,
) -> EventStream<RunEvent> {
    try_stream! {
        let mut live = subscribe(bus.as_ref(), &keys::run_notify(run_id)).await;
        let mut cursor = after_seq;
        let mut stream_cursor = 0u64;
        let mut grace = 0u32;

        'replay: loop {
            let batch = catch_up_run(store.as_ref(), bus.as_ref(), run_id, cursor, &mut stream_cursor).await?;
            for event in batch {
                cursor = event.seq;
                let terminal = event.kind.is_terminal();
                yield event;
                if terminal {
                    break 'replay;
                }
            }

            let run = store.get_run(run_id).await?.ok_or(AgoraError::UnknownRun(run_id))?;
            if run.status.is_terminal() {
                let logged = store.list_run_events(run_id, 0).await?;
                let past_end = logged
                    .iter()
                    .any(|event| event.kind.is_terminal() && event.seq <= cursor);
                if past_end || grace >= TERMINAL_GRACE_POLLS {
                    break 'replay;
                }
                grace += 1;
                tokio::time::sleep(POLL_INTERVAL).await;
                continue 'replay;
            }

            wait_for_signal(&mut live).await;
        }
    }
    .boxed()
}

async fn catch_up_run(
    store: &dyn Store,
    bus: &dyn Bus,
    run_id: RunId,
    cursor: u64,
    stream_cursor: &mut u64,
) -> Result<Vec<RunEvent>> {
    let mut merged: BTreeMap<u64, RunEvent> = store
        .list_run_events(run_id, cursor)
        .await?
        .into_iter()
        .map(|event| (event.seq, event))
        .collect();

    match bus.read_stream(&keys::run_events(run_id), *stream_cursor).await {
        Ok(entries) => {
            for entry in entries {
                *stream_cursor = entry.id;
                let Ok(event) = serde_json::from_value::<RunEvent>(entry.payload) else {
                    continue;
                };
                if event.seq > cursor {
                    merged.entry(event.seq).or_insert(event);
                }
            }
        }
        Err(e) => {
            tracing::debug!(run_id = %run_id, error = %e, "live stream unreadable; store only");
        }
    }
    Ok(merged.into_values().collect())
}

/// Messages of a space after `after_seq`, then live space events.
///
/// `space.message` events are deduplicated by seq and gaps in the live tail
/// are filled from the store. Transient events (tool progress, agent
/// activity) are live only.
pub fn space_events(
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    space_id: SpaceId,
    after_seq: i64,
) -> EventStream<SpaceEvent> {
    try_stream! {
        let mut live = subscribe(bus.as_ref(), &keys::space(space_id)).await;
        let mut cursor = after_seq;

        for message in backfill(store.as_ref(), space_id, cursor).await? {
            cursor = message.seq;
            yield SpaceEvent::from_message(&message);
        }

        loop {
            let Some(raw) = wait_for_signal(&mut live).await else {
                for message in backfill(store.as_ref(), space_id, cursor).await? {
                    cursor = message.seq;
                    yield SpaceEvent::from_message(&message);
                }
                continue;
            };
            let Ok(event) = serde_json::from_value::<SpaceEvent>(raw) else {
                continue;
            };
            match (event.kind, event.seq) {
                (SpaceEventKind::Message, Some(seq)) if seq <= cursor => {}
                (SpaceEventKind::Message, Some(seq)) if seq == cursor + 1 => {
                    cursor = seq;
                    yield event;
                }
                (SpaceEventKind::Message, Some(_)) => {
                    for message in backfill(store.as_ref(), space_id, cursor).await? {
                        cursor = message.seq;
                        yield SpaceEvent::from_message(&message);
                    }
                }
                _ => yield event,
            }
        }
    }
    .boxed()
}

async fn backfill(store: &dyn Store, space_id: SpaceId, cursor: i64) -> Result<Vec<SpaceMessage>> {
    store.list_messages(space_id, &MessageQuery::after(cursor)).await
}

/// Events on an entity's own stream after `after_seq`, then live.
///
/// Entity streams live on the bus only and are bounded by its retention.
pub fn entity_events(bus: Arc<dyn Bus>, entity_id: EntityId, after_seq: u64) -> EventStream<EntityEvent> {
    try_stream! {
        let mut live = subscribe(bus.as_ref(), &keys::entity_notify(entity_id)).await;
        let mut cursor = after_seq;
        loop {
            let entries = match bus.read_stream(&keys::entity_events(entity_id), cursor).await {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(entity_id = %entity_id, error = %e, "entity stream unreadable");
                    Vec::new()
                }
            };
            for entry in entries {
                cursor = entry.id;
                if let Some(event) = decode_entry(entity_id, &entry) {
                    yield event;
                }
            }
            wait_for_signal(&mut live).await;
        }
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, StreamLimits};
    use crate::events::EventEmitter;
    use crate::store::MemoryStore;
    use crate::types::{Run, RunEventKind, RunPatch, RunStatus, TriggerContext};
    use futures::TryStreamExt;
    use uuid::Uuid;

    async fn finished_run(store: &Arc<MemoryStore>, bus: &Arc<MemoryBus>) -> RunId {
        let run = Run::queued(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TriggerContext::Service {
                service_name: "test".into(),
                payload: serde_json::Value::Null,
                space_id: None,
            },
        );
        let run_id = run.id;
        store.insert_run(run).await.unwrap();
        let em = EventEmitter::open(run_id, store.clone(), bus.clone(), StreamLimits::default(), 5)
            .await
            .unwrap();
        em.emit(RunEventKind::RunStarted, serde_json::json!({})).await.unwrap();
        em.emit(RunEventKind::TextDelta, serde_json::json!({"delta": "a"})).await.unwrap();
        em.emit(RunEventKind::TextDone, serde_json::json!({"text": "a"})).await.unwrap();
        store
            .compare_and_transition(run_id, &[RunStatus::Queued], RunStatus::Running, RunPatch::default())
            .await
            .unwrap();
        store
            .compare_and_transition(run_id, &[RunStatus::Running], RunStatus::Completed, RunPatch::default())
            .await
            .unwrap();
        em.emit(RunEventKind::RunCompleted, serde_json::json!({})).await.unwrap();
        run_id
    }

    #[tokio::test]
    async fn replay_merges_live_deltas_with_persisted_events() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let run_id = finished_run(&store, &bus).await;

        let events: Vec<RunEvent> = run_events(store.clone(), bus.clone(), run_id, 0)
            .try_collect()
            .await
            .unwrap();
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        assert_eq!(events[1].kind, RunEventKind::TextDelta);
    }

    #[tokio::test]
    async fn replay_without_bus_uses_persisted_events() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let run_id = finished_run(&store, &bus).await;
        bus.set_offline(true);

        let events: Vec<RunEvent> = run_events(store.clone(), bus.clone(), run_id, 1)
            .try_collect()
            .await
            .unwrap();
        let kinds: Vec<RunEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![RunEventKind::TextDone, RunEventKind::RunCompleted]);
    }

    #[tokio::test]
    async fn unknown_run_fails_the_stream() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let result: Result<Vec<RunEvent>> = run_events(store, bus, Uuid::new_v4(), 0)
            .try_collect()
            .await;
        assert!(matches!(result, Err(AgoraError::UnknownRun(_))));
    }
}
