//! Per-execution scratch state shared with tools.

use std::sync::{Mutex, MutexGuard};

use super::intent::CompletionIntent;
use crate::types::{SentMessage, SpaceId};

#[derive(Debug, Default)]
struct ScopeState {
    active_space_id: Option<SpaceId>,
    sent: Vec<SentMessage>,
    intents: Vec<CompletionIntent>,
}

/// State one run execution shares with the tools it calls.
///
/// Owned by the execution and dropped with it, so nothing a tool records
/// can leak into another run.
#[derive(Debug, Default)]
pub struct RunScope {
    state: Mutex<ScopeState>,
}

impl RunScope {
    pub fn new(active_space_id: Option<SpaceId>) -> Self {
        Self {
            state: Mutex::new(ScopeState {
                active_space_id,
                ..ScopeState::default()
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn active_space(&self) -> Option<SpaceId> {
        self.state().active_space_id
    }

    pub fn set_active_space(&self, space_id: SpaceId) {
        self.state().active_space_id = Some(space_id);
    }

    pub fn record_sent(&self, message: SentMessage) {
        self.state().sent.push(message);
    }

    /// Messages sent since the last call.
    pub fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut self.state().sent)
    }

    pub fn push_intent(&self, intent: CompletionIntent) {
        self.state().intents.push(intent);
    }

    pub fn take_intents(&self) -> Vec<CompletionIntent> {
        std::mem::take(&mut self.state().intents)
    }
}
