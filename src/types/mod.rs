//! Core data model: entities, space messages, runs, triggers, events.

pub mod conversation;
pub mod entity;
pub mod event;
pub mod message;
pub mod run;
pub mod trigger;
pub mod usage;

pub use conversation::*;
pub use entity::*;
pub use event::*;
pub use message::*;
pub use run::*;
pub use trigger::*;
pub use usage::*;

/// Identifier of a human or agent participant.
pub type EntityId = uuid::Uuid;
/// Identifier of an agent definition (the configuration behind an agent entity).
pub type AgentId = uuid::Uuid;
/// Identifier of a space.
pub type SpaceId = uuid::Uuid;
/// Identifier of a space message.
pub type MessageId = uuid::Uuid;
/// Identifier of a run.
pub type RunId = uuid::Uuid;
