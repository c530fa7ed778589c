//! Event delivery: run logs, space events, entity streams, and replay.

pub mod emitter;
pub mod entity;
pub mod replay;
pub mod space;

pub use emitter::{EventEmitter, SegmentAssembler};
pub use entity::EntityPublisher;
pub use replay::{entity_events, run_events, space_events, EventStream};
pub use space::{SpacePublisher, ToolCallRequest};
