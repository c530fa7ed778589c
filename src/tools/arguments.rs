//! Typed access to tool call arguments.

use crate::error::{AgoraError, Result};
use crate::types::{EntityId, RunId, SpaceId};

/// Wrapper around committed tool call arguments.
#[derive(Debug, Clone)]
pub struct ToolArguments {
    value: serde_json::Value,
}

impl ToolArguments {
    pub fn new(value: serde_json::Value) -> Self {
        Self { value }
    }

    /// Get the raw JSON value.
    pub fn raw(&self) -> &serde_json::Value {
        &self.value
    }

    /// Get a string argument by key.
    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .ok_or_else(|| AgoraError::InvalidArgument(format!("Missing string argument: {key}")))
    }

    /// Get an optional, non-empty string argument.
    pub fn get_str_opt(&self, key: &str) -> Option<&str> {
        self.value
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Get a boolean argument, defaulting when absent.
    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.value
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(default)
    }

    /// Get an optional non-negative integer argument.
    pub fn get_u64_opt(&self, key: &str) -> Option<u64> {
        self.value.get(key).and_then(|v| v.as_u64())
    }

    /// Get a uuid argument (run, space or entity id).
    pub fn get_id(&self, key: &str) -> Result<uuid::Uuid> {
        let raw = self.get_str(key)?;
        raw.trim()
            .parse()
            .map_err(|_| AgoraError::InvalidArgument(format!("Argument {key} is not a valid id: {raw}")))
    }

    /// Get an optional uuid argument.
    pub fn get_id_opt(&self, key: &str) -> Result<Option<uuid::Uuid>> {
        match self.get_str_opt(key) {
            Some(_) => self.get_id(key).map(Some),
            None => Ok(None),
        }
    }

    pub fn run_id(&self, key: &str) -> Result<RunId> {
        self.get_id(key)
    }

    pub fn space_id_opt(&self, key: &str) -> Result<Option<SpaceId>> {
        self.get_id_opt(key)
    }

    pub fn entity_id(&self, key: &str) -> Result<EntityId> {
        self.get_id(key)
    }

    /// Deserialize the entire arguments into a typed struct.
    pub fn deserialize<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let value = match &self.value {
            serde_json::Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str::<serde_json::Value>(trimmed).map_err(|e| {
                        AgoraError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
                    })?
                }
            }
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| {
            AgoraError::InvalidArgument(format!("Failed to deserialize arguments: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_must_parse() {
        let run = uuid::Uuid::new_v4();
        let args = ToolArguments::new(json!({"run_id": run.to_string(), "space_id": "nope"}));
        assert_eq!(args.run_id("run_id").unwrap(), run);
        assert!(matches!(
            args.space_id_opt("space_id"),
            Err(AgoraError::InvalidArgument(_))
        ));
        assert_eq!(args.space_id_opt("missing").unwrap(), None);
    }

    #[test]
    fn string_encoded_arguments_deserialize() {
        #[derive(serde::Deserialize)]
        struct Reply {
            text: String,
        }
        let args = ToolArguments::new(json!("{\"text\": \"hi\"}"));
        assert_eq!(args.deserialize::<Reply>().unwrap().text, "hi");
    }
}
