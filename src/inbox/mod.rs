//! Per-agent inbox of wake signals.

pub mod plans;
pub mod router;

pub use plans::{Plan, PlanScheduler, Schedule};
pub use router::TriggerRouter;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::{AgoraError, Result};
use crate::events::EntityPublisher;
use crate::types::{EntityEventKind, EntityId, RunId, TriggerContext};

/// What an inbox entry asks the agent to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboxEventKind {
    /// Create a run for this trigger.
    Trigger { trigger: TriggerContext },
    /// Continue a suspended run whose pending calls are answered.
    Resume { run_id: RunId },
    /// Execute a run that was created directly, already queued.
    Execute { run_id: RunId },
}

/// A queued wake signal for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboxEvent {
    pub id: Uuid,
    pub target: EntityId,
    #[serde(flatten)]
    pub kind: InboxEventKind,
    pub created_at: DateTime<Utc>,
}

impl InboxEvent {
    pub fn trigger(target: EntityId, trigger: TriggerContext) -> Self {
        Self::new(target, InboxEventKind::Trigger { trigger })
    }

    pub fn resume(target: EntityId, run_id: RunId) -> Self {
        Self::new(target, InboxEventKind::Resume { run_id })
    }

    pub fn execute(target: EntityId, run_id: RunId) -> Self {
        Self::new(target, InboxEventKind::Execute { run_id })
    }

    fn new(target: EntityId, kind: InboxEventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            kind,
            created_at: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Queue {
    entries: VecDeque<InboxEvent>,
    waker: Arc<Notify>,
}

/// Inboxes for every registered agent entity.
///
/// Entries queue while the agent's process is stopped and are drained when
/// it starts. Pushing to an unregistered entity is a delivery error.
#[derive(Default)]
pub struct Inbox {
    queues: Mutex<HashMap<EntityId, Queue>>,
    entity_events: Option<EntityPublisher>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mirror every push onto the target's entity stream.
    pub fn with_entity_events(mut self, publisher: EntityPublisher) -> Self {
        self.entity_events = Some(publisher);
        self
    }

    fn queues(&self) -> Result<MutexGuard<'_, HashMap<EntityId, Queue>>> {
        self.queues
            .lock()
            .map_err(|_| AgoraError::delivery("inbox", "inbox lock poisoned"))
    }

    /// Create the inbox of an agent entity; idempotent.
    pub fn register(&self, agent_entity_id: EntityId) -> Result<()> {
        self.queues()?.entry(agent_entity_id).or_default();
        Ok(())
    }

    pub fn is_registered(&self, agent_entity_id: EntityId) -> bool {
        self.queues()
            .map(|queues| queues.contains_key(&agent_entity_id))
            .unwrap_or(false)
    }

    /// Mirror an entry onto the entity stream, queue it, then wake the agent.
    ///
    /// The mirrored `inbox.received` entry is written before the agent can
    /// see the entry, so it always precedes whatever the agent records next.
    pub async fn push(&self, event: InboxEvent) -> Result<()> {
        let target = event.target;
        if !self.is_registered(target) {
            return Err(no_inbox(target));
        }
        if let Some(publisher) = &self.entity_events {
            let mirrored = serde_json::to_value(&event).unwrap_or_default();
            publisher
                .publish(target, EntityEventKind::InboxReceived, mirrored)
                .await;
        }
        let waker = {
            let mut queues = self.queues()?;
            let queue = queues.get_mut(&target).ok_or_else(|| no_inbox(target))?;
            queue.entries.push_back(event);
            queue.waker.clone()
        };
        waker.notify_one();
        tracing::debug!(target = %target, "inbox entry queued");
        Ok(())
    }

    /// Remove and return every queued entry, oldest first.
    pub fn drain(&self, agent_entity_id: EntityId) -> Vec<InboxEvent> {
        match self.queues() {
            Ok(mut queues) => queues
                .get_mut(&agent_entity_id)
                .map(|queue| queue.entries.drain(..).collect())
                .unwrap_or_default(),
            Err(e) => {
                tracing::error!(agent = %agent_entity_id, error = %e, "inbox drain failed");
                Vec::new()
            }
        }
    }

    /// Wake handle notified on every push to this agent.
    pub fn waker(&self, agent_entity_id: EntityId) -> Result<Arc<Notify>> {
        self.queues()?
            .get(&agent_entity_id)
            .map(|queue| queue.waker.clone())
            .ok_or_else(|| no_inbox(agent_entity_id))
    }

    pub fn len(&self, agent_entity_id: EntityId) -> usize {
        self.queues()
            .ok()
            .and_then(|queues| queues.get(&agent_entity_id).map(|q| q.entries.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, agent_entity_id: EntityId) -> bool {
        self.len(agent_entity_id) == 0
    }
}

fn no_inbox(entity_id: EntityId) -> AgoraError {
    AgoraError::delivery(format!("inbox:{entity_id}"), "no inbox for entity")
}
