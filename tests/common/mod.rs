//! Shared test harness: a runtime over in-memory collaborators.
#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use agora::config::{
    AgentDefinition, ClientToolDefinition, HumanDefinition, RuntimeConfig, SpaceDefinition,
};
use agora::error::{AgoraError, Result};
use agora::model::ScriptedModel;
use agora::process::ProcessState;
use agora::store::{MemoryStore, RunMutation, Store, Transition};
use agora::types::*;
use agora::Runtime;

pub const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

/// A memory store with switchable faults.
///
/// Failing run listings crash agent processes on start, since recovery reads
/// them first. Conflicting inserts make every seq look taken.
#[derive(Default)]
pub struct FlakyStore {
    inner: MemoryStore,
    fail_list_runs: AtomicBool,
    conflict_inserts: AtomicBool,
}

impl FlakyStore {
    pub fn set_failing(&self, failing: bool) {
        self.fail_list_runs.store(failing, Ordering::SeqCst);
    }

    pub fn set_conflicting(&self, conflicting: bool) {
        self.conflict_inserts.store(conflicting, Ordering::SeqCst);
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn max_message_seq(&self, space_id: SpaceId) -> Result<i64> {
        self.inner.max_message_seq(space_id).await
    }

    async fn insert_message(&self, message: SpaceMessage) -> Result<()> {
        if self.conflict_inserts.load(Ordering::SeqCst) {
            return Err(AgoraError::conflict("space", format!("seq {} taken", message.seq)));
        }
        self.inner.insert_message(message).await
    }

    async fn get_message(&self, id: MessageId) -> Result<Option<SpaceMessage>> {
        self.inner.get_message(id).await
    }

    async fn list_messages(
        &self,
        space_id: SpaceId,
        query: &MessageQuery,
    ) -> Result<Vec<SpaceMessage>> {
        self.inner.list_messages(space_id, query).await
    }

    async fn recent_messages(&self, space_id: SpaceId, limit: usize) -> Result<Vec<SpaceMessage>> {
        self.inner.recent_messages(space_id, limit).await
    }

    async fn update_message_metadata(
        &self,
        id: MessageId,
        metadata: serde_json::Value,
    ) -> Result<SpaceMessage> {
        self.inner.update_message_metadata(id, metadata).await
    }

    async fn insert_run(&self, run: Run) -> Result<()> {
        self.inner.insert_run(run).await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<Run>> {
        self.inner.get_run(id).await
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        if self.fail_list_runs.load(Ordering::SeqCst) {
            return Err(AgoraError::Storage("database unavailable".into()));
        }
        self.inner.list_runs(filter).await
    }

    async fn update_run_where(
        &self,
        id: RunId,
        expected: &[RunStatus],
        mutate: RunMutation,
    ) -> Result<Transition> {
        self.inner.update_run_where(id, expected, mutate).await
    }

    async fn insert_run_event(&self, event: RunEvent) -> Result<()> {
        self.inner.insert_run_event(event).await
    }

    async fn last_run_event_seq(&self, run_id: RunId) -> Result<u64> {
        self.inner.last_run_event_seq(run_id).await
    }

    async fn list_run_events(&self, run_id: RunId, after_seq: u64) -> Result<Vec<RunEvent>> {
        self.inner.list_run_events(run_id, after_seq).await
    }
}

/// A runtime with one human and some agents sharing one space.
pub struct Harness {
    pub runtime: Runtime,
    pub model: Arc<ScriptedModel>,
    pub store: Arc<FlakyStore>,
    pub space: SpaceId,
    pub human: EntityId,
    pub agents: Vec<AgentDefinition>,
}

/// A non-visible client tool answered through `submit_tool_result`.
pub fn confirm_tool() -> ClientToolDefinition {
    ClientToolDefinition {
        name: "confirm".into(),
        description: "Ask the operator to confirm".into(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        }),
        visible: false,
    }
}

pub fn config_for(names: &[&str]) -> RuntimeConfig {
    let human = HumanDefinition {
        id: Uuid::new_v4(),
        name: "ada".into(),
    };
    let agents: Vec<AgentDefinition> = names
        .iter()
        .map(|name| {
            let mut agent = AgentDefinition::new(*name);
            agent.client_tools.push(confirm_tool());
            agent
        })
        .collect();
    let mut members = vec![human.id];
    members.extend(agents.iter().map(|a| a.entity_id));

    let mut config = RuntimeConfig::default();
    config.processes.stop_grace_ms = 500;
    config.sequencer.backoff_ms = 1;
    config.humans = vec![human];
    config.agents = agents;
    config.spaces = vec![SpaceDefinition {
        id: Uuid::new_v4(),
        name: "general".into(),
        members,
    }];
    config
}

impl Harness {
    /// Agents named `names`, all started.
    pub async fn start(names: &[&str]) -> Self {
        Self::start_with(config_for(names)).await
    }

    pub async fn start_with(config: RuntimeConfig) -> Self {
        let harness = Self::build(config);
        harness.runtime.boot().unwrap();
        for agent in &harness.agents {
            harness.wait_process(agent.entity_id, ProcessState::Running).await;
        }
        harness
    }

    /// Built but not booted.
    pub fn build(config: RuntimeConfig) -> Self {
        let model = Arc::new(ScriptedModel::new());
        let store = Arc::new(FlakyStore::default());
        let space = config.spaces[0].id;
        let human = config.humans[0].id;
        let agents = config.agents.clone();
        let runtime = Runtime::builder()
            .config(config)
            .store(store.clone())
            .model(model.clone())
            .build()
            .unwrap();
        Self {
            runtime,
            model,
            store,
            space,
            human,
            agents,
        }
    }

    pub fn agent(&self, index: usize) -> EntityId {
        self.agents[index].entity_id
    }

    pub async fn say(&self, text: &str) -> SpaceMessage {
        self.runtime
            .post_message(self.space, self.human, text, true)
            .await
            .unwrap()
    }

    pub async fn messages(&self) -> Vec<SpaceMessage> {
        self.runtime
            .list_messages(self.space, MessageQuery::default())
            .await
            .unwrap()
    }

    pub async fn runs_of(&self, agent: EntityId) -> Vec<Run> {
        let filter = RunFilter::builder().agent_entity_id(agent).build();
        self.runtime.list_runs(&filter).await.unwrap()
    }

    /// Wait until the agent has a run in `status`; returns the newest one.
    pub async fn wait_run_in(&self, agent: EntityId, status: RunStatus) -> Run {
        wait_until(move || async move {
            self.runs_of(agent)
                .await
                .into_iter()
                .find(|run| run.status == status)
        })
        .await
    }

    pub async fn wait_status(&self, run_id: RunId, status: RunStatus) -> Run {
        wait_until(move || async move {
            let run = self.runtime.get_run(run_id).await.ok()?;
            (run.status == status).then_some(run)
        })
        .await
    }

    /// Wait until every run of the agent is terminal and at least `count`
    /// exist.
    pub async fn wait_settled(&self, agent: EntityId, count: usize) -> Vec<Run> {
        wait_until(move || async move {
            let runs = self.runs_of(agent).await;
            (runs.len() >= count && runs.iter().all(|run| run.status.is_terminal()))
                .then_some(runs)
        })
        .await
    }

    pub async fn wait_messages(&self, count: usize) -> Vec<SpaceMessage> {
        wait_until(move || async move {
            let messages = self.messages().await;
            (messages.len() >= count).then_some(messages)
        })
        .await
    }

    pub async fn wait_process(&self, entity: EntityId, state: ProcessState) {
        wait_until(move || async move {
            (self.runtime.processes().state(entity) == Some(state)).then_some(())
        })
        .await
    }
}

/// Poll `check` until it yields a value, failing the test after [`WAIT`].
pub async fn wait_until<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {WAIT:?}"
        );
        tokio::time::sleep(POLL).await;
    }
}

/// Status path of a run, reconstructed from its persisted lifecycle events.
pub async fn status_path(runtime: &Runtime, run_id: RunId) -> Vec<RunEventKind> {
    runtime
        .services()
        .store
        .list_run_events(run_id, 0)
        .await
        .unwrap()
        .into_iter()
        .map(|event| event.kind)
        .filter(|kind| {
            matches!(
                kind,
                RunEventKind::RunStarted
                    | RunEventKind::RunWaitingTool
                    | RunEventKind::RunResumed
                    | RunEventKind::RunCompleted
                    | RunEventKind::RunFailed
                    | RunEventKind::RunCanceled
            )
        })
        .collect()
}

/// Tool results the model saw in its latest request for `agent`.
pub fn last_tool_results(model: &ScriptedModel, agent: EntityId) -> Vec<ToolResult> {
    model
        .requests_for(agent)
        .last()
        .map(|request| {
            request
                .messages
                .iter()
                .flat_map(|m| m.tool_results().into_iter().cloned())
                .collect()
        })
        .unwrap_or_default()
}
