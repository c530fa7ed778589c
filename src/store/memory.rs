//! In-memory reference store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{RunMutation, Store, Transition};
use crate::error::{AgoraError, Result};
use crate::types::{
    MessageId, MessageQuery, Run, RunEvent, RunFilter, RunId, RunStatus, SpaceId, SpaceMessage,
};

#[derive(Default)]
struct Inner {
    spaces: HashMap<SpaceId, BTreeMap<i64, MessageId>>,
    messages: HashMap<MessageId, SpaceMessage>,
    runs: HashMap<RunId, Run>,
    run_events: HashMap<RunId, BTreeMap<u64, RunEvent>>,
}

/// A [`Store`] backed by process memory.
///
/// Every method takes one short lock, so the uniqueness checks and the
/// guarded run update are atomic. The read-max/insert pair used by the
/// sequencer is two calls and can genuinely race.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| AgoraError::Storage("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn max_message_seq(&self, space_id: SpaceId) -> Result<i64> {
        let inner = self.lock()?;
        Ok(inner
            .spaces
            .get(&space_id)
            .and_then(|seqs| seqs.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn insert_message(&self, message: SpaceMessage) -> Result<()> {
        let mut inner = self.lock()?;
        let seqs = inner.spaces.entry(message.space_id).or_default();
        if seqs.contains_key(&message.seq) {
            return Err(AgoraError::conflict(
                format!("space:{}", message.space_id),
                format!("seq {} already taken", message.seq),
            ));
        }
        seqs.insert(message.seq, message.id);
        inner.messages.insert(message.id, message);
        Ok(())
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<SpaceMessage>> {
        Ok(self.lock()?.messages.get(&id).cloned())
    }

    async fn list_messages(
        &self,
        space_id: SpaceId,
        query: &MessageQuery,
    ) -> Result<Vec<SpaceMessage>> {
        let inner = self.lock()?;
        let Some(seqs) = inner.spaces.get(&space_id) else {
            return Ok(Vec::new());
        };
        let lower = query.after_seq.saturating_add(1);
        let upper = query.before_seq.unwrap_or(i64::MAX);
        if lower >= upper {
            return Ok(Vec::new());
        }
        let window = seqs
            .range(lower..upper)
            .filter_map(|(_, id)| inner.messages.get(id).cloned());
        Ok(match (query.limit, query.before_seq) {
            (Some(limit), Some(_)) => {
                let mut newest: Vec<SpaceMessage> = window.rev().take(limit).collect();
                newest.reverse();
                newest
            }
            (Some(limit), None) => window.take(limit).collect(),
            (None, _) => window.collect(),
        })
    }

    async fn recent_messages(&self, space_id: SpaceId, limit: usize) -> Result<Vec<SpaceMessage>> {
        let inner = self.lock()?;
        let Some(seqs) = inner.spaces.get(&space_id) else {
            return Ok(Vec::new());
        };
        let mut recent: Vec<SpaceMessage> = seqs
            .values()
            .rev()
            .take(limit)
            .filter_map(|id| inner.messages.get(id).cloned())
            .collect();
        recent.reverse();
        Ok(recent)
    }

    async fn update_message_metadata(
        &self,
        id: MessageId,
        metadata: serde_json::Value,
    ) -> Result<SpaceMessage> {
        let mut inner = self.lock()?;
        let message = inner
            .messages
            .get_mut(&id)
            .ok_or_else(|| AgoraError::InvalidArgument(format!("unknown message {id}")))?;
        message.metadata = metadata;
        Ok(message.clone())
    }

    async fn insert_run(&self, run: Run) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.runs.contains_key(&run.id) {
            return Err(AgoraError::conflict(
                format!("run:{}", run.id),
                "run already exists",
            ));
        }
        inner.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        Ok(self.lock()?.runs.get(&id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let inner = self.lock()?;
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|run| filter.matches(run))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let iter = runs.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => iter.take(limit).collect(),
            None => iter.collect(),
        })
    }

    async fn update_run_where(
        &self,
        id: RunId,
        expected: &[RunStatus],
        mutate: RunMutation,
    ) -> Result<Transition> {
        let mut inner = self.lock()?;
        let run = inner.runs.get_mut(&id).ok_or(AgoraError::UnknownRun(id))?;
        if !expected.is_empty() && !expected.contains(&run.status) {
            return Ok(Transition::Rejected {
                current: run.status,
            });
        }
        mutate(run);
        Ok(Transition::Applied(run.clone()))
    }

    async fn insert_run_event(&self, event: RunEvent) -> Result<()> {
        let mut inner = self.lock()?;
        let events = inner.run_events.entry(event.run_id).or_default();
        if events.contains_key(&event.seq) {
            return Err(AgoraError::conflict(
                format!("run:{}:events", event.run_id),
                format!("seq {} already taken", event.seq),
            ));
        }
        events.insert(event.seq, event);
        Ok(())
    }

    async fn last_run_event_seq(&self, run_id: RunId) -> Result<u64> {
        let inner = self.lock()?;
        Ok(inner
            .run_events
            .get(&run_id)
            .and_then(|events| events.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn list_run_events(&self, run_id: RunId, after_seq: u64) -> Result<Vec<RunEvent>> {
        let inner = self.lock()?;
        Ok(inner
            .run_events
            .get(&run_id)
            .map(|events| {
                events
                    .range(after_seq.saturating_add(1)..)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
