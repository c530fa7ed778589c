//! Runtime configuration (layered: TOML file < environment).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::StreamLimits;
use crate::error::{AgoraError, Result};
use crate::process::RestartPolicy;
use crate::types::{AgentId, EntityId, SpaceId};
use crate::util::retry::RetryPolicy;

/// Top-level runtime configuration.
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sequencer: SequencerConfig,
    pub streams: StreamsConfig,
    pub processes: ProcessesConfig,
    pub runs: RunsConfig,
    pub humans: Vec<HumanDefinition>,
    pub agents: Vec<AgentDefinition>,
    pub spaces: Vec<SpaceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 20,
        }
    }
}

impl SequencerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamsConfig {
    pub max_len: usize,
    pub ttl_secs: u64,
}

impl Default for StreamsConfig {
    fn default() -> Self {
        Self {
            max_len: 2000,
            ttl_secs: 3600,
        }
    }
}

impl StreamsConfig {
    pub fn limits(&self) -> StreamLimits {
        StreamLimits {
            max_len: self.max_len,
            ttl: Duration::from_secs(self.ttl_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessesConfig {
    pub stop_grace_ms: u64,
    pub restart: RestartPolicy,
}

impl Default for ProcessesConfig {
    fn default() -> Self {
        Self {
            stop_grace_ms: 5000,
            restart: RestartPolicy::Never,
        }
    }
}

impl ProcessesConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunsConfig {
    /// Model turns per run before it fails.
    pub max_turns: u32,
    /// Messages of recent space context shipped with each trigger.
    pub recent_context: usize,
    /// Characters kept per prior turn in the résumé shown after suspension.
    pub resume_excerpt_chars: usize,
    /// Attempts for persisting a run event after a seq conflict.
    pub event_persist_attempts: u32,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            max_turns: 16,
            recent_context: 10,
            resume_excerpt_chars: 600,
            event_persist_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDefinition {
    pub id: EntityId,
    pub name: String,
}

/// A configured agent and the entity it runs as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub agent_id: AgentId,
    pub entity_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub memories: Vec<String>,
    /// Tools answered by an external client rather than executed inline.
    #[serde(default)]
    pub client_tools: Vec<ClientToolDefinition>,
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            agent_id: Uuid::new_v4(),
            entity_id: Uuid::new_v4(),
            name: name.into(),
            instructions: String::new(),
            goals: Vec::new(),
            memories: Vec::new(),
            client_tools: Vec::new(),
            max_turns: None,
            autostart: true,
        }
    }
}

/// Declaration of a client-confirmed tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
    #[serde(default = "default_true")]
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceDefinition {
    pub id: SpaceId,
    pub name: String,
    #[serde(default)]
    pub members: Vec<EntityId>,
}

fn default_true() -> bool {
    true
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl RuntimeConfig {
    /// Parse a TOML document.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AgoraError::Configuration(format!("invalid TOML: {e}")))
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            AgoraError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&raw)?;
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default path if it exists, otherwise defaults + env.
    pub fn load_default() -> Result<Self> {
        let _ = dotenvy::dotenv();
        match std::env::var_os("AGORA_CONFIG")
            .map(PathBuf::from)
            .or_else(default_config_path)
        {
            Some(path) if path.exists() => Self::load(path),
            _ => Self::from_env(),
        }
    }

    /// Defaults with environment overrides (`.env` honored).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `AGORA_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        override_from(&lookup, "AGORA_SEQUENCER_MAX_ATTEMPTS", &mut self.sequencer.max_attempts)?;
        override_from(&lookup, "AGORA_SEQUENCER_BACKOFF_MS", &mut self.sequencer.backoff_ms)?;
        override_from(&lookup, "AGORA_STREAM_MAX_LEN", &mut self.streams.max_len)?;
        override_from(&lookup, "AGORA_STREAM_TTL_SECS", &mut self.streams.ttl_secs)?;
        override_from(&lookup, "AGORA_STOP_GRACE_MS", &mut self.processes.stop_grace_ms)?;
        override_from(&lookup, "AGORA_MAX_TURNS", &mut self.runs.max_turns)?;
        override_from(&lookup, "AGORA_RECENT_CONTEXT", &mut self.runs.recent_context)?;
        Ok(())
    }

    /// Reject configurations the runtime cannot honor.
    pub fn validate(&self) -> Result<()> {
        if self.sequencer.max_attempts == 0 {
            return Err(AgoraError::Configuration(
                "sequencer.max_attempts must be at least 1".into(),
            ));
        }
        if self.runs.max_turns == 0 {
            return Err(AgoraError::Configuration(
                "runs.max_turns must be at least 1".into(),
            ));
        }
        if self.streams.max_len == 0 {
            return Err(AgoraError::Configuration(
                "streams.max_len must be at least 1".into(),
            ));
        }

        let mut known = std::collections::HashSet::new();
        for id in self
            .humans
            .iter()
            .map(|h| h.id)
            .chain(self.agents.iter().map(|a| a.entity_id))
        {
            if !known.insert(id) {
                return Err(AgoraError::Configuration(format!(
                    "entity {id} is declared twice"
                )));
            }
        }
        for space in &self.spaces {
            if let Some(stranger) = space.members.iter().find(|m| !known.contains(*m)) {
                return Err(AgoraError::Configuration(format!(
                    "space '{}' lists unknown member {stranger}",
                    space.name
                )));
            }
        }
        Ok(())
    }

    pub fn agent(&self, entity_id: EntityId) -> Option<&AgentDefinition> {
        self.agents.iter().find(|a| a.entity_id == entity_id)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| AgoraError::Configuration(format!("{key}={raw}: {e}")))?;
    }
    Ok(())
}

/// `<config dir>/agora.toml` for the current platform.
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "agora", "agora")
        .map(|dirs| dirs.config_dir().join("agora.toml"))
}
