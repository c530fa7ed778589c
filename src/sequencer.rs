//! Per-space message sequencing.

use std::sync::Arc;

use crate::error::Result;
use crate::store::Store;
use crate::types::{NewMessage, SpaceId, SpaceMessage};
use crate::util::retry::RetryPolicy;

/// Assigns gap-free, collision-safe seqs to space messages.
///
/// Seqs are read-max-then-insert against the store's unique `(space, seq)`
/// constraint. A lost race is a `Conflict`, retried with linear backoff; once
/// the policy is exhausted the write fails and nothing is persisted.
#[derive(Clone)]
pub struct Sequencer {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl Sequencer {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// The seq the next append to `space_id` will try first.
    pub async fn next_seq(&self, space_id: SpaceId) -> Result<i64> {
        Ok(self.store.max_message_seq(space_id).await? + 1)
    }

    /// Persist a message under the next free seq.
    pub async fn append(&self, message: NewMessage) -> Result<SpaceMessage> {
        let space_id = message.space_id;
        let result = self
            .retry
            .on_conflict(|attempt| {
                let message = message.clone();
                async move {
                    let seq = self.next_seq(space_id).await?;
                    let persisted = message.into_message(seq);
                    self.store.insert_message(persisted.clone()).await?;
                    tracing::debug!(space_id = %space_id, seq, attempt, "message sequenced");
                    Ok(persisted)
                }
            })
            .await;

        if let Err(e) = &result {
            tracing::warn!(space_id = %space_id, error = %e, "message append failed");
        }
        result
    }
}
