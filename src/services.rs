//! Shared collaborators handed to runs, tools and agent processes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::bus::Bus;
use crate::config::{AgentDefinition, RuntimeConfig};
use crate::directory::Directory;
use crate::error::{AgoraError, Result};
use crate::events::{EntityPublisher, EventEmitter, SpacePublisher};
use crate::inbox::{Inbox, TriggerRouter};
use crate::model::ModelInvoker;
use crate::sequencer::Sequencer;
use crate::store::Store;
use crate::tools::ToolRegistry;
use crate::types::{EntityId, NewMessage, RunId, SpaceMessage};

pub struct Services {
    pub config: RuntimeConfig,
    pub store: Arc<dyn Store>,
    pub bus: Arc<dyn Bus>,
    pub directory: Arc<dyn Directory>,
    pub model: Arc<dyn ModelInvoker>,
    pub sequencer: Sequencer,
    pub inbox: Arc<Inbox>,
    pub router: Arc<TriggerRouter>,
    pub spaces: SpacePublisher,
    pub entities: EntityPublisher,
    pub tools: ToolRegistry,
    agents: RwLock<HashMap<EntityId, AgentDefinition>>,
}

impl Services {
    pub fn new(
        config: RuntimeConfig,
        store: Arc<dyn Store>,
        bus: Arc<dyn Bus>,
        directory: Arc<dyn Directory>,
        model: Arc<dyn ModelInvoker>,
    ) -> Self {
        let limits = config.streams.limits();
        let entities = EntityPublisher::new(bus.clone(), limits);
        let inbox = Arc::new(Inbox::new().with_entity_events(entities.clone()));
        let router = Arc::new(TriggerRouter::new(
            store.clone(),
            directory.clone(),
            inbox.clone(),
            config.runs.recent_context,
        ));
        Self {
            sequencer: Sequencer::new(store.clone(), config.sequencer.retry_policy()),
            spaces: SpacePublisher::new(bus.clone()),
            entities,
            inbox,
            router,
            tools: ToolRegistry::with_builtins(),
            agents: RwLock::new(HashMap::new()),
            config,
            store,
            bus,
            directory,
            model,
        }
    }

    /// Make an agent known to the runtime and give it an inbox.
    pub fn register_agent(&self, agent: AgentDefinition) -> Result<()> {
        self.inbox.register(agent.entity_id)?;
        self.agents
            .write()
            .map_err(|_| AgoraError::InvalidState("agent table poisoned".into()))?
            .insert(agent.entity_id, agent);
        Ok(())
    }

    pub fn agent(&self, entity_id: EntityId) -> Result<AgentDefinition> {
        self.agents
            .read()
            .ok()
            .and_then(|agents| agents.get(&entity_id).cloned())
            .ok_or(AgoraError::UnknownAgent(entity_id))
    }

    pub fn agents(&self) -> Vec<AgentDefinition> {
        self.agents
            .read()
            .map(|agents| agents.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn open_emitter(&self, run_id: RunId) -> Result<EventEmitter> {
        EventEmitter::open(
            run_id,
            self.store.clone(),
            self.bus.clone(),
            self.config.streams.limits(),
            self.config.runs.event_persist_attempts,
        )
        .await
    }

    /// Sequence, persist and publish a message, then fan it out.
    ///
    /// Only the store write can fail the call; publish and fan-out failures
    /// are logged.
    pub async fn post(&self, message: NewMessage, trigger_agents: bool) -> Result<SpaceMessage> {
        let message = self.sequencer.append(message).await?;
        self.spaces.message(&message).await;
        if trigger_agents {
            if let Err(e) = self.router.on_message(&message).await {
                tracing::warn!(
                    space_id = %message.space_id,
                    seq = message.seq,
                    error = %e,
                    "fan-out skipped"
                );
            }
        }
        Ok(message)
    }
}
