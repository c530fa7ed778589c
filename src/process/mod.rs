//! Agent process supervision.
//!
//! Each agent entity has at most one supervised task running
//! [`agent_loop::run`]. The manager tracks its state explicitly, surfaces
//! crashes in [`ProcessManager::status`] and restarts only under an
//! explicit [`RestartPolicy`].

pub mod agent_loop;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::Display;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::error::{AgoraError, Result};
use crate::services::Services;
use crate::types::{AgentId, EntityId};

/// Lifecycle of an agent process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ProcessState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// What happens after a crash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Stay crashed until started again.
    #[default]
    Never,
    /// Restart up to `max_restarts` times, waiting `backoff_ms` before each.
    OnCrash { max_restarts: u32, backoff_ms: u64 },
}

/// Snapshot of one agent process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessStatus {
    pub entity_id: EntityId,
    pub agent_id: AgentId,
    pub state: ProcessState,
    pub restarts: u32,
    pub last_error: Option<String>,
}

struct Entry {
    agent_id: AgentId,
    generation: u64,
    state: watch::Sender<ProcessState>,
    cancel: CancellationToken,
    restarts: u32,
    last_error: Option<String>,
}

impl Entry {
    fn current(&self) -> ProcessState {
        *self.state.borrow()
    }
}

pub struct ProcessManager {
    services: Arc<Services>,
    entries: Mutex<HashMap<EntityId, Entry>>,
    generation: AtomicU64,
}

impl ProcessManager {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<EntityId, Entry>>> {
        self.entries
            .lock()
            .map_err(|_| AgoraError::InvalidState("process table poisoned".into()))
    }

    fn restart_policy(&self) -> &RestartPolicy {
        &self.services.config.processes.restart
    }

    /// Start the process of an agent. A live process makes this a no-op.
    pub fn start(self: &Arc<Self>, agent_id: AgentId, entity_id: EntityId) -> Result<()> {
        self.services.agent(entity_id)?;
        let mut entries = self.entries()?;
        let restarts = match entries.get(&entity_id) {
            Some(entry) if entry.current().is_live() => {
                tracing::debug!(entity_id = %entity_id, "process already live");
                return Ok(());
            }
            Some(entry) if entry.current() == ProcessState::Stopping => {
                return Err(AgoraError::InvalidState(format!(
                    "process of {entity_id} is still stopping"
                )));
            }
            _ => 0,
        };
        self.launch(&mut entries, agent_id, entity_id, restarts);
        Ok(())
    }

    fn launch(
        self: &Arc<Self>,
        entries: &mut HashMap<EntityId, Entry>,
        agent_id: AgentId,
        entity_id: EntityId,
        restarts: u32,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let (state, _) = watch::channel(ProcessState::Starting);
        let last_error = entries.get(&entity_id).and_then(|entry| entry.last_error.clone());
        entries.insert(
            entity_id,
            Entry {
                agent_id,
                generation,
                state: state.clone(),
                cancel: cancel.clone(),
                restarts,
                last_error,
            },
        );

        let handle = tokio::spawn(agent_loop::run(
            self.services.clone(),
            entity_id,
            cancel,
            state,
        ));
        let manager = self.clone();
        tokio::spawn(async move {
            let exit = handle.await;
            manager.on_exit(entity_id, generation, exit);
        });
        tracing::info!(entity_id = %entity_id, generation, restarts, "agent process starting");
    }

    fn on_exit(
        self: &Arc<Self>,
        entity_id: EntityId,
        generation: u64,
        exit: std::result::Result<Result<()>, JoinError>,
    ) {
        let Ok(mut entries) = self.entries() else {
            return;
        };
        let Some(entry) = entries.get_mut(&entity_id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }

        let error = match exit {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) if e.is_panic() => Some(format!("agent loop panicked: {e}")),
            Err(e) => Some(e.to_string()),
        };
        let Some(error) = error else {
            entry.state.send_replace(ProcessState::Stopped);
            tracing::info!(entity_id = %entity_id, "agent process stopped");
            return;
        };

        entry.last_error = Some(error.clone());
        entry.state.send_replace(ProcessState::Crashed);
        tracing::error!(entity_id = %entity_id, error = %error, restarts = entry.restarts, "agent process crashed");
        if entry.cancel.is_cancelled() {
            return;
        }

        if let RestartPolicy::OnCrash {
            max_restarts,
            backoff_ms,
        } = self.restart_policy().clone()
        {
            if entry.restarts >= max_restarts {
                tracing::warn!(entity_id = %entity_id, max_restarts, "restart budget exhausted");
                return;
            }
            let agent_id = entry.agent_id;
            let restarts = entry.restarts + 1;
            let manager = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                let Ok(mut entries) = manager.entries() else {
                    return;
                };
                let still_crashed = entries.get(&entity_id).is_some_and(|entry| {
                    entry.generation == generation && entry.current() == ProcessState::Crashed
                });
                if still_crashed {
                    manager.launch(&mut entries, agent_id, entity_id, restarts);
                }
            });
        }
    }

    /// Stop an agent's process and wait up to the configured grace period.
    ///
    /// Returns the state the process settled in; a process that outlives the
    /// grace period is reported `stopped` and left to wind down on its own.
    pub async fn stop(&self, entity_id: EntityId) -> Result<ProcessState> {
        let mut watcher = {
            let entries = self.entries()?;
            let entry = entries
                .get(&entity_id)
                .ok_or(AgoraError::UnknownAgent(entity_id))?;
            let current = entry.current();
            if !current.is_live() && current != ProcessState::Stopping {
                return Ok(current);
            }
            entry.state.send_replace(ProcessState::Stopping);
            entry.cancel.cancel();
            entry.state.subscribe()
        };

        let grace = self.services.config.processes.stop_grace();
        let settled = tokio::time::timeout(
            grace,
            watcher.wait_for(|state| matches!(state, ProcessState::Stopped | ProcessState::Crashed)),
        )
        .await
        .map(|waited| waited.map(|state| *state));
        match settled {
            Ok(Ok(state)) => Ok(state),
            outcome => {
                if let Ok(Err(_)) = outcome {
                    tracing::warn!(entity_id = %entity_id, "process state channel closed while stopping");
                } else {
                    tracing::warn!(entity_id = %entity_id, grace_ms = grace.as_millis() as u64, "agent process did not stop in time");
                }
                let entries = self.entries()?;
                if let Some(entry) = entries.get(&entity_id) {
                    entry.state.send_replace(ProcessState::Stopped);
                }
                Ok(ProcessState::Stopped)
            }
        }
    }

    /// Stop every process, best-effort.
    pub async fn stop_all(&self) {
        let ids: Vec<EntityId> = match self.entries() {
            Ok(entries) => entries.keys().copied().collect(),
            Err(e) => {
                tracing::error!(error = %e, "cannot list processes");
                return;
            }
        };
        let stops = ids.into_iter().map(|id| async move {
            if let Err(e) = self.stop(id).await {
                tracing::warn!(entity_id = %id, error = %e, "stop failed");
            }
        });
        futures::future::join_all(stops).await;
    }

    pub fn state(&self, entity_id: EntityId) -> Option<ProcessState> {
        self.entries()
            .ok()?
            .get(&entity_id)
            .map(Entry::current)
    }

    /// Follow state changes of a process.
    pub fn watch(&self, entity_id: EntityId) -> Option<watch::Receiver<ProcessState>> {
        self.entries()
            .ok()?
            .get(&entity_id)
            .map(|entry| entry.state.subscribe())
    }

    pub fn status(&self) -> Vec<ProcessStatus> {
        let Ok(entries) = self.entries() else {
            return Vec::new();
        };
        let mut status: Vec<ProcessStatus> = entries
            .iter()
            .map(|(entity_id, entry)| ProcessStatus {
                entity_id: *entity_id,
                agent_id: entry.agent_id,
                state: entry.current(),
                restarts: entry.restarts,
                last_error: entry.last_error.clone(),
            })
            .collect();
        status.sort_by_key(|s| s.entity_id);
        status
    }
}
