//! Turns trigger sources into inbox entries.

use std::sync::Arc;

use uuid::Uuid;

use super::{Inbox, InboxEvent};
use crate::directory::Directory;
use crate::error::{AgoraError, Result};
use crate::store::Store;
use crate::types::{ContextLine, EntityId, RunId, SpaceId, SpaceMessage, TriggerContext};

/// Routes messages, mentions, delegations, plans and service calls to
/// agent inboxes.
///
/// Space fan-out is fire-and-forget: a failed push to one member is logged
/// and the remaining members are still delivered to.
pub struct TriggerRouter {
    store: Arc<dyn Store>,
    directory: Arc<dyn Directory>,
    inbox: Arc<Inbox>,
    recent_context: usize,
}

impl TriggerRouter {
    pub fn new(
        store: Arc<dyn Store>,
        directory: Arc<dyn Directory>,
        inbox: Arc<Inbox>,
        recent_context: usize,
    ) -> Self {
        Self {
            store,
            directory,
            inbox,
            recent_context,
        }
    }

    pub fn inbox(&self) -> &Arc<Inbox> {
        &self.inbox
    }

    async fn recent(&self, space_id: SpaceId) -> Vec<ContextLine> {
        match self.store.recent_messages(space_id, self.recent_context).await {
            Ok(messages) => messages.iter().map(ContextLine::from).collect(),
            Err(e) => {
                tracing::warn!(space_id = %space_id, error = %e, "recent context unavailable");
                Vec::new()
            }
        }
    }

    async fn require_agent(&self, entity_id: EntityId) -> Result<()> {
        match self.directory.entity(entity_id).await? {
            Some(entity) if entity.is_agent() => Ok(()),
            _ => Err(AgoraError::UnknownAgent(entity_id)),
        }
    }

    /// Fan a persisted message out to every agent member except its sender.
    ///
    /// Returns the number of inboxes the message was delivered to.
    pub async fn on_message(&self, message: &SpaceMessage) -> Result<usize> {
        let members = self.directory.members(message.space_id).await?;
        let targets: Vec<EntityId> = members
            .iter()
            .filter(|member| member.is_agent() && member.id != message.entity_id)
            .map(|member| member.id)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let trigger = TriggerContext::SpaceMessage {
            space_id: message.space_id,
            message_id: message.id,
            seq: message.seq,
            sender_id: message.entity_id,
            content: message.content.clone().unwrap_or_default(),
            recent: self.recent(message.space_id).await,
        };

        let mut delivered = 0;
        for target in targets {
            match self
                .inbox
                .push(InboxEvent::trigger(target, trigger.clone()))
                .await
            {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(
                    space_id = %message.space_id,
                    seq = message.seq,
                    target = %target,
                    error = %e,
                    "fan-out to member failed"
                ),
            }
        }
        tracing::debug!(space_id = %message.space_id, seq = message.seq, delivered, "message fanned out");
        Ok(delivered)
    }

    /// Explicitly address another agent.
    pub async fn mention(
        &self,
        target: EntityId,
        from_entity_id: EntityId,
        from_run_id: Option<RunId>,
        space_id: Option<SpaceId>,
        message: String,
        expect_reply: bool,
    ) -> Result<()> {
        self.require_agent(target).await?;
        let recent = match space_id {
            Some(space_id) => self.recent(space_id).await,
            None => Vec::new(),
        };
        let trigger = TriggerContext::Mention {
            space_id,
            from_entity_id,
            from_run_id,
            message,
            expect_reply,
            recent,
        };
        self.inbox.push(InboxEvent::trigger(target, trigger)).await
    }

    /// Hand the original trigger of a run to another agent.
    pub async fn delegate(
        &self,
        target: EntityId,
        from_entity_id: EntityId,
        from_run_id: RunId,
        original: TriggerContext,
        note: Option<String>,
    ) -> Result<()> {
        self.require_agent(target).await?;
        let trigger = TriggerContext::Delegation {
            from_entity_id,
            from_run_id,
            note,
            original: Box::new(original),
        };
        self.inbox.push(InboxEvent::trigger(target, trigger)).await
    }

    /// Report a finished mention back to the agent that asked for a reply.
    pub async fn reply(
        &self,
        target: EntityId,
        from_entity_id: EntityId,
        reply_to_run_id: RunId,
        space_id: Option<SpaceId>,
        content: String,
    ) -> Result<()> {
        let trigger = TriggerContext::Reply {
            space_id,
            from_entity_id,
            reply_to_run_id,
            content,
        };
        self.inbox.push(InboxEvent::trigger(target, trigger)).await
    }

    /// External service call.
    pub async fn service(
        &self,
        target: EntityId,
        service_name: String,
        payload: serde_json::Value,
        space_id: Option<SpaceId>,
    ) -> Result<()> {
        self.require_agent(target).await?;
        if let Some(space_id) = space_id {
            self.directory.require_member(space_id, target).await?;
        }
        let trigger = TriggerContext::Service {
            service_name,
            payload,
            space_id,
        };
        self.inbox.push(InboxEvent::trigger(target, trigger)).await
    }

    /// Scheduled plan firing.
    pub async fn plan(
        &self,
        target: EntityId,
        plan_id: Uuid,
        name: String,
        instructions: String,
        space_id: Option<SpaceId>,
    ) -> Result<()> {
        let trigger = TriggerContext::Plan {
            plan_id,
            name,
            space_id,
            instructions,
        };
        self.inbox.push(InboxEvent::trigger(target, trigger)).await
    }

    /// Ask an agent to execute a queued run.
    pub async fn execute(&self, agent_entity_id: EntityId, run_id: RunId) -> Result<()> {
        self.inbox
            .push(InboxEvent::execute(agent_entity_id, run_id))
            .await
    }

    /// Ask an agent to continue a suspended run.
    pub async fn resume(&self, agent_entity_id: EntityId, run_id: RunId) -> Result<()> {
        self.inbox
            .push(InboxEvent::resume(agent_entity_id, run_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::inbox::InboxEventKind;
    use crate::store::MemoryStore;
    use crate::types::{Entity, NewMessage};

    struct Fixture {
        router: TriggerRouter,
        inbox: Arc<Inbox>,
        directory: Arc<MemoryDirectory>,
        space: SpaceId,
        human: Entity,
        a: Entity,
        b: Entity,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let directory = Arc::new(MemoryDirectory::new());
        let inbox = Arc::new(Inbox::new());
        let space = Uuid::new_v4();
        let human = Entity::human(Uuid::new_v4(), "ada");
        let a = Entity::agent(Uuid::new_v4(), Uuid::new_v4(), "a");
        let b = Entity::agent(Uuid::new_v4(), Uuid::new_v4(), "b");
        for entity in [&human, &a, &b] {
            directory.add_entity(entity.clone());
            directory.add_member(space, entity.id);
        }
        inbox.register(a.id).unwrap();
        inbox.register(b.id).unwrap();
        let router = TriggerRouter::new(store, directory.clone(), inbox.clone(), 5);
        Fixture {
            router,
            inbox,
            directory,
            space,
            human,
            a,
            b,
        }
    }

    #[tokio::test]
    async fn message_reaches_agent_members_except_sender() {
        let f = fixture();
        let msg = NewMessage::builder()
            .space_id(f.space)
            .entity_id(f.a.id)
            .content("hello")
            .build()
            .into_message(1);

        assert_eq!(f.router.on_message(&msg).await.unwrap(), 1);
        assert!(f.inbox.is_empty(f.a.id));
        assert_eq!(f.inbox.len(f.b.id), 1);
        assert!(f.inbox.is_empty(f.human.id));
    }

    #[tokio::test]
    async fn failed_push_does_not_block_other_members() {
        let f = fixture();
        // A member agent without an inbox.
        let stray = Entity::agent(Uuid::new_v4(), Uuid::new_v4(), "stray");
        f.directory.add_entity(stray.clone());
        f.directory.add_member(f.space, stray.id);

        let msg = NewMessage::builder()
            .space_id(f.space)
            .entity_id(f.human.id)
            .content("anyone?")
            .build()
            .into_message(1);
        assert_eq!(f.router.on_message(&msg).await.unwrap(), 2);
        assert_eq!(f.inbox.len(f.a.id), 1);
        assert_eq!(f.inbox.len(f.b.id), 1);
    }

    #[tokio::test]
    async fn delegation_carries_the_original_trigger() {
        let f = fixture();
        let original = TriggerContext::Service {
            service_name: "ticket".into(),
            payload: serde_json::json!({"id": 1}),
            space_id: None,
        };
        f.router
            .delegate(f.b.id, f.a.id, Uuid::new_v4(), original.clone(), None)
            .await
            .unwrap();
        let entry = f.inbox.drain(f.b.id).remove(0);
        match entry.kind {
            InboxEventKind::Trigger {
                trigger: TriggerContext::Delegation { original: inner, .. },
            } => assert_eq!(*inner, original),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[tokio::test]
    async fn mention_of_a_human_is_rejected() {
        let f = fixture();
        let err = f
            .router
            .mention(f.human.id, f.a.id, None, Some(f.space), "hi".into(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, AgoraError::UnknownAgent(_)));
    }
}
