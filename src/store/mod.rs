//! Durable store abstraction.
//!
//! The store is the source of truth for messages, runs and persisted run
//! events. Implementations must enforce uniqueness of `(space_id, seq)` and
//! `(run_id, seq)` by returning [`AgoraError::Conflict`], and must apply
//! [`Store::update_run_where`] atomically with its status guard.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use crate::error::{AgoraError, Result};
use crate::types::{
    MessageId, MessageQuery, Run, RunEvent, RunFilter, RunId, RunPatch, RunStatus, SpaceId,
    SpaceMessage,
};

/// Mutation applied to a run under a status guard.
pub type RunMutation = Box<dyn FnOnce(&mut Run) + Send>;

/// Outcome of a guarded run update.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The guard matched; carries the updated run.
    Applied(Run),
    /// The run was not in any expected status.
    Rejected { current: RunStatus },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    /// Convert a rejection into [`AgoraError::AlreadyTransitioned`].
    pub fn into_applied(self, run_id: RunId) -> Result<Run> {
        match self {
            Self::Applied(run) => Ok(run),
            Self::Rejected { current } => Err(AgoraError::AlreadyTransitioned {
                run_id,
                status: current,
            }),
        }
    }
}

/// Transactional storage consumed by the runtime.
#[async_trait]
pub trait Store: Send + Sync {
    /// Highest seq in a space, `0` when empty.
    async fn max_message_seq(&self, space_id: SpaceId) -> Result<i64>;

    /// Insert a message; `Conflict` if its seq is already taken.
    async fn insert_message(&self, message: SpaceMessage) -> Result<()>;

    async fn get_message(&self, id: MessageId) -> Result<Option<SpaceMessage>>;

    /// Messages inside `query` in ascending seq order.
    async fn list_messages(
        &self,
        space_id: SpaceId,
        query: &MessageQuery,
    ) -> Result<Vec<SpaceMessage>>;

    /// The last `limit` messages of a space in ascending order.
    async fn recent_messages(&self, space_id: SpaceId, limit: usize) -> Result<Vec<SpaceMessage>>;

    /// Replace a message's metadata (tool display lifecycle).
    async fn update_message_metadata(
        &self,
        id: MessageId,
        metadata: serde_json::Value,
    ) -> Result<SpaceMessage>;

    async fn insert_run(&self, run: Run) -> Result<()>;

    async fn get_run(&self, id: RunId) -> Result<Option<Run>>;

    /// Runs matching a filter, newest first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>>;

    /// Apply `mutate` only if the run's status is in `expected`.
    ///
    /// An empty `expected` slice matches any status. Unknown ids fail with
    /// `UnknownRun`.
    async fn update_run_where(
        &self,
        id: RunId,
        expected: &[RunStatus],
        mutate: RunMutation,
    ) -> Result<Transition>;

    /// Persist a run event; `Conflict` if its seq is already taken.
    async fn insert_run_event(&self, event: RunEvent) -> Result<()>;

    /// Highest persisted event seq for a run, `0` when none.
    async fn last_run_event_seq(&self, run_id: RunId) -> Result<u64>;

    /// Persisted events with `seq > after_seq` in ascending order.
    async fn list_run_events(&self, run_id: RunId, after_seq: u64) -> Result<Vec<RunEvent>>;

    /// Move a run from one of `from` to `to`, applying `patch`.
    async fn compare_and_transition(
        &self,
        id: RunId,
        from: &[RunStatus],
        to: RunStatus,
        patch: RunPatch,
    ) -> Result<Transition> {
        if let Some(bad) = from.iter().find(|status| !status.can_transition_to(to)) {
            return Err(AgoraError::InvalidState(format!(
                "no transition from {bad} to {to}"
            )));
        }
        self.update_run_where(id, from, Box::new(move |run| patch.apply(run, to)))
            .await
    }

    /// Fetch a run or fail with `UnknownRun`.
    async fn require_run(&self, id: RunId) -> Result<Run> {
        self.get_run(id).await?.ok_or(AgoraError::UnknownRun(id))
    }
}
