//! Error types for agora.

pub mod unified;

pub use unified::{ErrorBody, ErrorCategory, ErrorCode};

use thiserror::Error;
use uuid::Uuid;

use crate::types::RunStatus;

/// Primary error type for all agora operations.
#[derive(Error, Debug)]
pub enum AgoraError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Conflict on {resource}: {message}")]
    Conflict { resource: String, message: String },

    #[error("Unknown run: {0}")]
    UnknownRun(Uuid),

    #[error("Run {run_id} is not waiting for tool results (status: {status})")]
    NotWaiting { run_id: Uuid, status: RunStatus },

    #[error("Run {run_id} has no pending tool call {call_id}")]
    UnknownToolCall { run_id: Uuid, call_id: String },

    #[error("Entity {entity_id} is not a member of space {space_id}")]
    NotMember { space_id: Uuid, entity_id: Uuid },

    #[error("Run {run_id} already transitioned (status: {status})")]
    AlreadyTransitioned { run_id: Uuid, status: RunStatus },

    #[error("Run {run_id} does not belong to agent {agent_entity_id}")]
    NotOwner { run_id: Uuid, agent_entity_id: Uuid },

    #[error("Unknown agent entity: {0}")]
    UnknownAgent(Uuid),

    #[error("Unknown entity: {0}")]
    UnknownEntity(Uuid),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Delivery error on {channel}: {message}")]
    Delivery { channel: String, message: String },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgoraError {
    /// Create a conflict error for a contended resource.
    pub fn conflict(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a delivery error for a bus channel or inbox.
    pub fn delivery(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::UnknownRun(_)
            | Self::NotWaiting { .. }
            | Self::UnknownToolCall { .. }
            | Self::NotMember { .. }
            | Self::AlreadyTransitioned { .. }
            | Self::NotOwner { .. }
            | Self::UnknownAgent(_)
            | Self::UnknownEntity(_)
            | Self::InvalidArgument(_)
            | Self::InvalidState(_) => ErrorCategory::Precondition,
            Self::Model(_) | Self::ToolExecution { .. } => ErrorCategory::Execution,
            Self::Delivery { .. } => ErrorCategory::Delivery,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::Storage(_) | Self::Io(_) => ErrorCategory::Storage,
        }
    }

    /// Machine-readable code for API bodies.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Conflict { .. } => ErrorCode::Conflict,
            Self::UnknownRun(_) => ErrorCode::UnknownRun,
            Self::NotWaiting { .. } => ErrorCode::NotWaiting,
            Self::UnknownToolCall { .. } => ErrorCode::UnknownToolCall,
            Self::NotMember { .. } => ErrorCode::NotMember,
            Self::AlreadyTransitioned { .. } => ErrorCode::AlreadyTransitioned,
            Self::NotOwner { .. } => ErrorCode::NotOwner,
            Self::UnknownAgent(_) | Self::UnknownEntity(_) => ErrorCode::UnknownEntity,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidState(_) => ErrorCode::InvalidState,
            Self::Model(_) | Self::ToolExecution { .. } => ErrorCode::ExecutionFailed,
            Self::Delivery { .. } => ErrorCode::DeliveryFailed,
            Self::Timeout(_) => ErrorCode::Timeout,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Conflict | ErrorCategory::Delivery | ErrorCategory::Timeout
        )
    }

    /// Whether this error rejects a request without side effects.
    pub fn is_precondition(&self) -> bool {
        self.category() == ErrorCategory::Precondition
    }

    /// Structured body for API callers.
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgoraError>;
