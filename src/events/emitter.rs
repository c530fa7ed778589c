//! Per-run event log writer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::bus::{keys, Bus, StreamLimits};
use crate::error::Result;
use crate::store::Store;
use crate::types::{RunEvent, RunEventKind, RunId, RunNotification};
use crate::util::retry::RetryPolicy;

/// Writes the ordered event log of one run.
///
/// Seqs are run-local and seeded from the larger of the last persisted seq
/// and the last live-stream seq, so a restarted process continues the log.
/// Delta kinds go to the live stream only. Everything else is persisted
/// first; a seq conflict with another writer of the same run (an
/// introspection tool canceling it, say) re-seeds and retries.
pub struct EventEmitter {
    run_id: RunId,
    store: Arc<dyn Store>,
    bus: Arc<dyn Bus>,
    limits: StreamLimits,
    retry: RetryPolicy,
    seq: AtomicU64,
}

impl EventEmitter {
    pub async fn open(
        run_id: RunId,
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
        limits: StreamLimits,
        persist_attempts: u32,
    ) -> Result<Self> {
        let persisted = store.last_run_event_seq(run_id).await?;
        let live = last_live_seq(bus.as_ref(), run_id).await;
        let seed = persisted.max(live);
        tracing::debug!(run_id = %run_id, persisted, live, "event emitter opened");
        Ok(Self {
            run_id,
            store,
            bus,
            limits,
            retry: RetryPolicy::new(persist_attempts, Duration::from_millis(5)),
            seq: AtomicU64::new(seed),
        })
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Last seq handed out.
    pub fn last_seq(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn reseed(&self) -> Result<()> {
        let persisted = self.store.last_run_event_seq(self.run_id).await?;
        let live = last_live_seq(self.bus.as_ref(), self.run_id).await;
        self.seq.fetch_max(persisted.max(live), Ordering::SeqCst);
        Ok(())
    }

    /// Append one event to the run log.
    pub async fn emit(&self, kind: RunEventKind, payload: serde_json::Value) -> Result<RunEvent> {
        let event = if kind.is_delta() {
            self.build(kind, payload)
        } else {
            self.retry
                .on_conflict(|attempt| {
                    let payload = payload.clone();
                    async move {
                        if attempt > 1 {
                            self.reseed().await?;
                        }
                        let event = self.build(kind, payload);
                        self.store.insert_run_event(event.clone()).await?;
                        Ok(event)
                    }
                })
                .await?
        };
        self.publish_live(&event).await;
        Ok(event)
    }

    fn build(&self, kind: RunEventKind, payload: serde_json::Value) -> RunEvent {
        RunEvent {
            run_id: self.run_id,
            seq: self.next_seq(),
            kind,
            payload,
            created_at: Utc::now(),
        }
    }

    async fn publish_live(&self, event: &RunEvent) {
        let entry = match serde_json::to_value(event) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(run_id = %self.run_id, error = %e, "unserializable run event");
                return;
            }
        };
        let stream = keys::run_events(self.run_id);
        if let Err(e) = self.bus.append(&stream, entry, self.limits).await {
            tracing::warn!(run_id = %self.run_id, seq = event.seq, error = %e, "live stream append failed");
        }
        let note = RunNotification {
            kind: event.kind,
            seq: event.seq,
        };
        let note = serde_json::to_value(note).unwrap_or_default();
        if let Err(e) = self.bus.publish(&keys::run_notify(self.run_id), note).await {
            tracing::warn!(run_id = %self.run_id, seq = event.seq, error = %e, "run notify failed");
        }
    }
}

async fn last_live_seq(bus: &dyn Bus, run_id: RunId) -> u64 {
    match bus.last_entry(&keys::run_events(run_id)).await {
        Ok(entry) => entry
            .and_then(|entry| entry.payload.get("seq").and_then(|v| v.as_u64()))
            .unwrap_or(0),
        Err(e) => {
            tracing::warn!(run_id = %run_id, error = %e, "live stream unavailable; seeding from store");
            0
        }
    }
}

/// Buffers streamed text and reasoning until a segment completes.
#[derive(Debug, Default)]
pub struct SegmentAssembler {
    text: String,
    reasoning: String,
}

impl SegmentAssembler {
    /// Stream a text delta and buffer it.
    pub async fn text(&mut self, emitter: &EventEmitter, delta: &str) -> Result<()> {
        self.text.push_str(delta);
        emitter
            .emit(RunEventKind::TextDelta, serde_json::json!({ "delta": delta }))
            .await?;
        Ok(())
    }

    /// Stream a reasoning delta and buffer it.
    pub async fn reasoning(&mut self, emitter: &EventEmitter, delta: &str) -> Result<()> {
        self.reasoning.push_str(delta);
        emitter
            .emit(RunEventKind::ReasoningDelta, serde_json::json!({ "delta": delta }))
            .await?;
        Ok(())
    }

    /// Persist the assembled segments as `*.done` events.
    ///
    /// Returns the assembled text of the segment.
    pub async fn finish(&mut self, emitter: &EventEmitter) -> Result<String> {
        let reasoning = std::mem::take(&mut self.reasoning);
        if !reasoning.is_empty() {
            emitter
                .emit(RunEventKind::ReasoningDone, serde_json::json!({ "text": reasoning }))
                .await?;
        }
        let text = std::mem::take(&mut self.text);
        if !text.is_empty() {
            emitter
                .emit(RunEventKind::TextDone, serde_json::json!({ "text": text }))
                .await?;
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::store::MemoryStore;
    use uuid::Uuid;

    async fn emitter(store: Arc<MemoryStore>, bus: Arc<MemoryBus>, run_id: RunId) -> EventEmitter {
        EventEmitter::open(run_id, store, bus, StreamLimits::default(), 5)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn deltas_are_live_only() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let run_id = Uuid::new_v4();
        let em = emitter(store.clone(), bus.clone(), run_id).await;

        let mut segments = SegmentAssembler::default();
        segments.text(&em, "Hel").await.unwrap();
        segments.text(&em, "lo").await.unwrap();
        assert_eq!(segments.finish(&em).await.unwrap(), "Hello");

        let persisted = store.list_run_events(run_id, 0).await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].kind, RunEventKind::TextDone);
        assert_eq!(persisted[0].seq, 3);
        assert_eq!(persisted[0].payload["text"], "Hello");

        let live = bus.read_stream(&keys::run_events(run_id), 0).await.unwrap();
        assert_eq!(live.len(), 3);
    }

    #[tokio::test]
    async fn reopened_emitter_continues_after_live_deltas() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        let run_id = Uuid::new_v4();
        let first = emitter(store.clone(), bus.clone(), run_id).await;
        first.emit(RunEventKind::RunStarted, serde_json::json!({})).await.unwrap();
        first
            .emit(RunEventKind::TextDelta, serde_json::json!({"delta": "x"}))
            .await
            .unwrap();

        let second = emitter(store.clone(), bus.clone(), run_id).await;
        assert_eq!(second.last_seq(), 2);
    }

    #[tokio::test]
    async fn concurrent_writers_reseed_on_conflict() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(MemoryBus::new());
        bus.set_offline(true);
        let run_id = Uuid::new_v4();
        let a = emitter(store.clone(), bus.clone(), run_id).await;
        let b = emitter(store.clone(), bus.clone(), run_id).await;

        a.emit(RunEventKind::RunStarted, serde_json::json!({})).await.unwrap();
        let canceled = b
            .emit(RunEventKind::RunCanceled, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(canceled.seq, 2);

        let seqs: Vec<u64> = store
            .list_run_events(run_id, 0)
            .await
            .unwrap()
            .iter()
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }
}
