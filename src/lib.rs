//! Agora: run orchestration and event delivery for persistent multi-agent
//! spaces.
//!
//! Humans and agents share durable spaces. A message posted to a space is
//! sequenced, persisted and fanned out to the inboxes of its agent members;
//! each agent's supervised process turns inbox entries into runs that drive
//! a model and tool loop, suspend on client-confirmed tools, and stream an
//! ordered event log that subscribers replay from the store plus a live
//! bus tail.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use agora::prelude::*;
//! use agora::model::{Fallback, ScriptedModel};
//!
//! # async fn example() -> agora::error::Result<()> {
//! let config = RuntimeConfig::load_default()?;
//! let runtime = Runtime::builder()
//!     .config(config)
//!     .model(Arc::new(ScriptedModel::with_fallback(Fallback::Echo)))
//!     .build()?;
//! runtime.boot()?;
//! # Ok(())
//! # }
//! ```

pub mod bus;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod inbox;
pub mod introspection;
pub mod model;
pub mod prelude;
pub mod process;
pub mod run;
pub mod runtime;
pub mod sequencer;
pub mod services;
pub mod store;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use runtime::Runtime;
