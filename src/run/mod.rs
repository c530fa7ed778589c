//! Run execution: lifecycle transitions, the model and tool loop, and the
//! per-run state tools see.

pub mod context;
pub mod executor;
pub mod intent;
pub mod scope;
pub mod state;
pub mod tool_phase;

pub use executor::{RunExecutor, RunOutcome};
pub use intent::CompletionIntent;
pub use scope::RunScope;
pub use state::Lifecycle;
