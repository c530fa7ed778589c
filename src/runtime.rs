//! The assembled runtime and its public surface.

use std::sync::Arc;

use uuid::Uuid;

use crate::bus::{Bus, MemoryBus};
use crate::config::{AgentDefinition, RuntimeConfig};
use crate::directory::{Directory, MemoryDirectory};
use crate::error::{AgoraError, Result};
use crate::events::{self, EventStream};
use crate::inbox::{Plan, PlanScheduler};
use crate::introspection;
use crate::model::ModelInvoker;
use crate::process::{ProcessManager, ProcessState, ProcessStatus};
use crate::run::RunExecutor;
use crate::services::Services;
use crate::store::{MemoryStore, Store};
use crate::tools::Tool;
use crate::types::{
    Entity, EntityEvent, EntityId, MessageQuery, NewMessage, Run, RunEvent, RunFilter, RunId,
    SpaceEvent, SpaceId, SpaceMessage, TriggerContext,
};

/// Service name on the trigger of runs made by [`Runtime::create_run`].
pub const DIRECT_RUN_SERVICE: &str = "api";

/// Spaces, runs and agent processes behind one handle.
///
/// Store, bus and directory default to the in-memory implementations; the
/// in-memory directory is populated from the configured humans, agents and
/// spaces.
pub struct Runtime {
    services: Arc<Services>,
    processes: Arc<ProcessManager>,
    plans: PlanScheduler,
}

#[bon::bon]
impl Runtime {
    #[builder]
    pub fn new(
        #[builder(default)] config: RuntimeConfig,
        store: Option<Arc<dyn Store>>,
        bus: Option<Arc<dyn Bus>>,
        directory: Option<Arc<dyn Directory>>,
        model: Arc<dyn ModelInvoker>,
    ) -> Result<Self> {
        config.validate()?;
        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let bus = bus.unwrap_or_else(|| Arc::new(MemoryBus::new()));
        let directory = directory.unwrap_or_else(|| Arc::new(directory_from(&config)));
        let agents = config.agents.clone();

        let services = Arc::new(Services::new(config, store, bus, directory, model));
        for agent in agents {
            services.register_agent(agent)?;
        }
        Ok(Self {
            processes: Arc::new(ProcessManager::new(services.clone())),
            plans: PlanScheduler::new(services.router.clone()),
            services,
        })
    }
}

fn directory_from(config: &RuntimeConfig) -> MemoryDirectory {
    let directory = MemoryDirectory::new();
    for human in &config.humans {
        directory.add_entity(Entity::human(human.id, human.name.clone()));
    }
    for agent in &config.agents {
        directory.add_entity(Entity::agent(agent.entity_id, agent.agent_id, agent.name.clone()));
    }
    for space in &config.spaces {
        for member in &space.members {
            directory.add_member(space.id, *member);
        }
    }
    directory
}

impl Runtime {
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn processes(&self) -> &Arc<ProcessManager> {
        &self.processes
    }

    /// Register an agent that was not in the configuration.
    pub fn register_agent(&self, agent: AgentDefinition) -> Result<()> {
        self.services.register_agent(agent)
    }

    /// Start the process of every agent marked `autostart`.
    pub fn boot(&self) -> Result<()> {
        let agents = self.services.agents();
        for agent in agents.iter().filter(|agent| agent.autostart) {
            self.processes.start(agent.agent_id, agent.entity_id)?;
        }
        tracing::info!(agents = agents.len(), "runtime booted");
        Ok(())
    }

    /// Stop plans and every agent process, best-effort.
    pub async fn shutdown(&self) {
        self.plans.shutdown();
        self.processes.stop_all().await;
        tracing::info!("runtime shut down");
    }

    pub fn start_agent(&self, entity_id: EntityId) -> Result<()> {
        let agent = self.services.agent(entity_id)?;
        self.processes.start(agent.agent_id, entity_id)
    }

    pub async fn stop_agent(&self, entity_id: EntityId) -> Result<ProcessState> {
        self.processes.stop(entity_id).await
    }

    pub fn process_status(&self) -> Vec<ProcessStatus> {
        self.processes.status()
    }

    /// Post a user message as `entity_id`, optionally triggering agent
    /// members.
    pub async fn post_message(
        &self,
        space_id: SpaceId,
        entity_id: EntityId,
        content: impl Into<String>,
        trigger_agents: bool,
    ) -> Result<SpaceMessage> {
        self.send(
            NewMessage::builder()
                .space_id(space_id)
                .entity_id(entity_id)
                .content(content.into())
                .build(),
            trigger_agents,
        )
        .await
    }

    /// Post a message with its own role and metadata. The author must be a
    /// member of the space.
    pub async fn send(&self, message: NewMessage, trigger_agents: bool) -> Result<SpaceMessage> {
        self.services
            .directory
            .require_member(message.space_id, message.entity_id)
            .await?;
        self.services.post(message, trigger_agents).await
    }

    pub async fn list_messages(
        &self,
        space_id: SpaceId,
        query: MessageQuery,
    ) -> Result<Vec<SpaceMessage>> {
        self.services.store.list_messages(space_id, &query).await
    }

    pub async fn submit_tool_result(
        &self,
        run_id: RunId,
        tool_call_id: &str,
        result: serde_json::Value,
    ) -> Result<Run> {
        introspection::submit_tool_result(&self.services, run_id, tool_call_id, result).await
    }

    pub async fn get_run(&self, run_id: RunId) -> Result<Run> {
        self.services.store.require_run(run_id).await
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        self.services.store.list_runs(filter).await
    }

    /// Create a queued run for an agent and hand it to the agent's process.
    ///
    /// The run's trigger is an `api` service call carrying `payload`. If the
    /// hand-off is lost, the run stays queued until the agent next starts.
    pub async fn create_run(
        &self,
        agent_entity_id: EntityId,
        payload: serde_json::Value,
        space_id: Option<SpaceId>,
    ) -> Result<Run> {
        if let Some(space_id) = space_id {
            self.services
                .directory
                .require_member(space_id, agent_entity_id)
                .await?;
        }
        let trigger = TriggerContext::Service {
            service_name: DIRECT_RUN_SERVICE.into(),
            payload,
            space_id,
        };
        let run = RunExecutor::new(self.services.clone())
            .start(agent_entity_id, trigger)
            .await?;
        if let Err(e) = self.services.router.execute(agent_entity_id, run.id).await {
            tracing::warn!(run_id = %run.id, agent = %agent_entity_id, error = %e, "run hand-off not delivered");
        }
        Ok(run)
    }

    /// Cancel a run from outside any agent.
    pub async fn cancel_run(&self, run_id: RunId, reason: Option<&str>) -> Result<Run> {
        introspection::cancel_run(
            &self.services,
            run_id,
            reason.unwrap_or("canceled by operator"),
            None,
        )
        .await
    }

    pub fn space_events(&self, space_id: SpaceId, after_seq: i64) -> EventStream<SpaceEvent> {
        events::space_events(
            self.services.store.clone(),
            self.services.bus.clone(),
            space_id,
            after_seq,
        )
    }

    pub fn run_events(&self, run_id: RunId, after_seq: u64) -> EventStream<RunEvent> {
        events::run_events(
            self.services.store.clone(),
            self.services.bus.clone(),
            run_id,
            after_seq,
        )
    }

    pub fn entity_events(&self, entity_id: EntityId, after_seq: u64) -> EventStream<EntityEvent> {
        events::entity_events(self.services.bus.clone(), entity_id, after_seq)
    }

    /// Trigger an agent from an external service.
    pub async fn trigger_service(
        &self,
        agent_entity_id: EntityId,
        service_name: impl Into<String>,
        payload: serde_json::Value,
        space_id: Option<SpaceId>,
    ) -> Result<()> {
        self.services
            .router
            .service(agent_entity_id, service_name.into(), payload, space_id)
            .await
    }

    pub fn schedule_plan(&self, plan: Plan) -> Result<Uuid> {
        if !self.services.inbox.is_registered(plan.agent_entity_id) {
            return Err(AgoraError::UnknownAgent(plan.agent_entity_id));
        }
        self.plans.schedule(plan)
    }

    pub fn cancel_plan(&self, plan_id: Uuid) -> bool {
        self.plans.cancel(plan_id)
    }

    /// Make a server tool available to every agent.
    pub fn register_tool(&self, tool: Arc<dyn Tool>) -> Result<()> {
        self.services.tools.register(tool)
    }
}
