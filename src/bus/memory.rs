//! In-process bus built on tokio broadcast channels.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::{Bus, StreamEntry, StreamLimits};
use crate::error::{AgoraError, Result};

const CHANNEL_CAPACITY: usize = 1024;

struct TimedEntry {
    entry: StreamEntry,
    expires_at: Instant,
}

#[derive(Default)]
struct Stream {
    next_id: u64,
    entries: VecDeque<TimedEntry>,
}

impl Stream {
    fn expire(&mut self, now: Instant) {
        while self
            .entries
            .front()
            .is_some_and(|timed| timed.expires_at <= now)
        {
            self.entries.pop_front();
        }
    }
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, broadcast::Sender<serde_json::Value>>,
    streams: HashMap<String, Stream>,
}

/// A [`Bus`] living in process memory.
///
/// `set_offline(true)` makes every operation fail with a delivery error,
/// which is how tests exercise the store fallback paths.
#[derive(Default)]
pub struct MemoryBus {
    inner: Mutex<Inner>,
    offline: AtomicBool,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn guard(&self, name: &str) -> Result<MutexGuard<'_, Inner>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AgoraError::delivery(name, "bus offline"));
        }
        self.inner
            .lock()
            .map_err(|_| AgoraError::delivery(name, "bus lock poisoned"))
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: serde_json::Value) -> Result<()> {
        let inner = self.guard(channel)?;
        if let Some(sender) = inner.channels.get(channel) {
            // No receivers is not an error for pub/sub.
            let _ = sender.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<serde_json::Value>> {
        let mut inner = self.guard(channel)?;
        let sender = inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Ok(sender.subscribe())
    }

    async fn append(
        &self,
        stream: &str,
        payload: serde_json::Value,
        limits: StreamLimits,
    ) -> Result<u64> {
        let mut inner = self.guard(stream)?;
        let now = Instant::now();
        let entries = inner.streams.entry(stream.to_string()).or_default();
        entries.expire(now);
        entries.next_id += 1;
        let id = entries.next_id;
        entries.entries.push_back(TimedEntry {
            entry: StreamEntry { id, payload },
            expires_at: now + limits.ttl,
        });
        while entries.entries.len() > limits.max_len {
            entries.entries.pop_front();
        }
        Ok(id)
    }

    async fn read_stream(&self, stream: &str, after: u64) -> Result<Vec<StreamEntry>> {
        let mut inner = self.guard(stream)?;
        let Some(entries) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        entries.expire(Instant::now());
        Ok(entries
            .entries
            .iter()
            .filter(|timed| timed.entry.id > after)
            .map(|timed| timed.entry.clone())
            .collect())
    }

    async fn last_entry(&self, stream: &str) -> Result<Option<StreamEntry>> {
        let mut inner = self.guard(stream)?;
        let Some(entries) = inner.streams.get_mut(stream) else {
            return Ok(None);
        };
        entries.expire(Instant::now());
        Ok(entries.entries.back().map(|timed| timed.entry.clone()))
    }
}
