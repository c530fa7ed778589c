//! Unified error classification and API bodies.

use serde::{Deserialize, Serialize};

/// Machine-readable error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Conflict,
    UnknownRun,
    NotWaiting,
    UnknownToolCall,
    NotMember,
    AlreadyTransitioned,
    NotOwner,
    UnknownEntity,
    InvalidArgument,
    InvalidState,
    ExecutionFailed,
    DeliveryFailed,
    Timeout,
    Internal,
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Lost an optimistic race; safe to retry locally.
    Conflict,
    /// Wrong state, unknown id, or missing membership. Never retried.
    Precondition,
    /// Model or tool failure inside a run. Terminal for that run.
    Execution,
    /// Inbox or bus delivery failure. Logged, recoverable by replay.
    Delivery,
    Timeout,
    Configuration,
    Serialization,
    Storage,
}

/// Structured error body returned to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}
