//! Tool lookup for a run.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::builtin;
use super::tool::{ClientTool, Tool};
use crate::config::AgentDefinition;
use crate::error::{AgoraError, Result};
use crate::model::ToolSpec;

/// Shared tools plus each agent's client-confirmed tools.
///
/// Built-in tools cannot be replaced; registering a tool under an existing
/// name replaces the previous registration.
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ToolRegistry {
    /// A registry with no tools at all.
    pub fn empty() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
        }
    }

    /// A registry preloaded with the built-in agent tools.
    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        if let Ok(mut tools) = registry.tools.write() {
            for tool in builtin::all_tools() {
                tools.insert(tool.name().to_string(), tool);
            }
        }
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if builtin::NAMES.contains(&name.as_str()) {
            return Err(AgoraError::InvalidArgument(format!(
                "{name} is a built-in tool"
            )));
        }
        self.tools
            .write()
            .map_err(|_| AgoraError::InvalidState("tool registry poisoned".into()))?
            .insert(name.clone(), tool);
        tracing::debug!(tool = %name, "tool registered");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().ok()?.get(name).cloned()
    }

    /// Resolve a tool called by an agent: shared tools first, then the
    /// agent's client tools.
    pub fn resolve(&self, agent: &AgentDefinition, name: &str) -> Option<Arc<dyn Tool>> {
        self.get(name).or_else(|| {
            agent
                .client_tools
                .iter()
                .find(|def| def.name == name)
                .map(|def| Arc::new(ClientTool::from(def)) as Arc<dyn Tool>)
        })
    }

    /// Tool specs advertised to an agent's model.
    pub fn specs_for(&self, agent: &AgentDefinition) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .read()
            .map(|tools| tools.values().map(|tool| spec(tool.as_ref())).collect())
            .unwrap_or_default();
        for def in &agent.client_tools {
            if self.get(&def.name).is_none() {
                specs.push(spec(&ClientTool::from(def)));
            }
        }
        specs
    }
}

fn spec(tool: &dyn Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name().to_string(),
        description: tool.description().to_string(),
        parameters: tool.parameters().schema.clone(),
    }
}
