//! Role/tool capability configuration.
//!
//! Worker agents and concrete tools are out of this crate's scope (§1) — the
//! orchestrator only needs to know which roles exist and which tool names
//! each role may be dispatched for, so plans can be validated before
//! dispatch. This generalizes the teacher's fixed four-role
//! `AgentDefinition` into an open-ended, configured set of roles.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// A tool a role is permitted to invoke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// A worker role and the tools it exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefinition {
    pub role: String,
    pub description: String,
    pub tools: Vec<ToolDefinition>,
}

/// The set of roles/tools this deployment knows about, loaded once at
/// startup from `AppConfig.capabilities_path` (§9: "no global mutable state").
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    roles: HashMap<String, RoleDefinition>,
}

impl Capabilities {
    pub fn from_definitions(definitions: Vec<RoleDefinition>) -> Self {
        let roles = definitions
            .into_iter()
            .map(|role| (role.role.clone(), role))
            .collect();
        Self { roles }
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OrchestratorError::Config(format!("could not read {}: {e}", path.display())))?;
        let definitions: Vec<RoleDefinition> = serde_json::from_str(&contents)
            .map_err(|e| OrchestratorError::Config(format!("invalid capabilities JSON: {e}")))?;
        Ok(Self::from_definitions(definitions))
    }

    pub fn role(&self, role: &str) -> Option<&RoleDefinition> {
        self.roles.get(role)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Whether `role` is permitted to invoke `tool_name`, used by the Plan
    /// Manager to validate model-generated plans before they reach the
    /// executor (§4.6 schema validation).
    pub fn role_has_tool(&self, role: &str, tool_name: &str) -> bool {
        self.roles
            .get(role)
            .map(|r| r.tools.iter().any(|t| t.name == tool_name))
            .unwrap_or(false)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}
