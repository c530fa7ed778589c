//! Tools every agent gets.
//!
//! `send_message` is an agent's only way to speak in a space. The rest let
//! an agent move between spaces, inspect and stop its own runs, fold a
//! stale run into the current one, and hand work to other agents.

mod coordination;
mod messaging;
mod runs;

use std::sync::Arc;

use super::tool::Tool;

pub use coordination::{delegate_to_agent_tool, mention_agent_tool};
pub use messaging::{enter_space_tool, send_message_tool};
pub use runs::{absorb_run_tool, get_my_runs_tool, stop_run_tool};

/// Names reserved by the built-in tools.
pub const NAMES: &[&str] = &[
    "send_message",
    "enter_space",
    "get_my_runs",
    "stop_run",
    "absorb_run",
    "delegate_to_agent",
    "mention_agent",
];

pub fn all_tools() -> Vec<Arc<dyn Tool>> {
    vec![
        send_message_tool(),
        enter_space_tool(),
        get_my_runs_tool(),
        stop_run_tool(),
        absorb_run_tool(),
        delegate_to_agent_tool(),
        mention_agent_tool(),
    ]
}
