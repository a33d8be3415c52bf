//! Plan Manager (§4.6).
//!
//! Generates a `Plan` for a user task: first by matching it against loaded
//! templates, falling back to asking the Language-Model Adapter for a
//! JSON plan when nothing matches. Model-generated plans are validated
//! against the configured role/tool capabilities before being handed to the
//! executor.

pub mod templates;

use crate::capabilities::Capabilities;
use crate::error::PlanError;
use crate::llm::LanguageModelAdapter;
use crate::types::{Plan, PlanSource};
use std::sync::Arc;
use templates::PlanTemplate;
use tracing::{info, warn};

pub struct PlanManager {
    templates: Vec<PlanTemplate>,
    capabilities: Capabilities,
    llm: Arc<dyn LanguageModelAdapter>,
}

impl PlanManager {
    pub fn new(
        templates: Vec<PlanTemplate>,
        capabilities: Capabilities,
        llm: Arc<dyn LanguageModelAdapter>,
    ) -> Self {
        Self {
            templates,
            capabilities,
            llm,
        }
    }

    /// Produces a plan for `user_task`, trying templates first. Returns the
    /// plan together with where it came from, matching §4.6's requirement
    /// that the source of a plan be traceable.
    pub async fn generate_plan(&self, user_task: &str) -> Result<(Plan, PlanSource), PlanError> {
        for template in &self.templates {
            if let Some(result) = template.try_render(user_task) {
                let plan = result?;
                self.validate(&plan)?;
                info!(template = %template.name, "matched plan template");
                return Ok((plan, PlanSource::Template));
            }
        }

        info!("no template matched, falling back to model-generated plan");
        let plan = self.generate_model_plan(user_task).await?;
        self.validate(&plan)?;
        Ok((plan, PlanSource::Model))
    }

    /// Re-generates a plan incorporating structured failure info from a
    /// previous attempt (§4.7 bounded replanning loop).
    pub async fn revise_plan(
        &self,
        user_task: &str,
        failure_context: &str,
    ) -> Result<(Plan, PlanSource), PlanError> {
        let prompt = format!(
            "The previous plan for this task failed.\n\nTask: {user_task}\n\nFailure details:\n{failure_context}\n\nProduce a revised plan as a JSON array of stages, where each stage is an array of sub-task definitions."
        );
        let raw = self.llm.generate_text(&prompt).await?;
        let plan = parse_plan_json(&raw)?;
        self.validate(&plan)?;
        Ok((plan, PlanSource::Model))
    }

    async fn generate_model_plan(&self, user_task: &str) -> Result<Plan, PlanError> {
        let roles: Vec<&str> = self.capabilities.role_names().collect();
        let prompt = format!(
            "Produce a plan for the following task as a JSON array of stages, where each \
             stage is an array of sub-task definitions with fields assigned_agent_role, \
             tool_name, sub_task_input, narrative_step. Available roles: {roles:?}.\n\nTask: {user_task}"
        );
        let raw = self.llm.generate_text(&prompt).await?;
        parse_plan_json(&raw)
    }

    /// Rejects a plan if any sub-task names a role or tool outside the
    /// configured capabilities.
    fn validate(&self, plan: &Plan) -> Result<(), PlanError> {
        if plan.is_empty() {
            return Err(PlanError::SchemaInvalid("plan has no stages".into()));
        }
        for stage in plan {
            if stage.is_empty() {
                return Err(PlanError::SchemaInvalid("plan contains an empty stage".into()));
            }
            for definition in stage {
                if definition.narrative_step.trim().is_empty() {
                    return Err(PlanError::SchemaInvalid(
                        "sub-task definition has an empty narrative_step".into(),
                    ));
                }
                if !definition.sub_task_input.is_object() {
                    return Err(PlanError::SchemaInvalid(format!(
                        "sub_task_input for '{}' must be a JSON object",
                        definition.narrative_step
                    )));
                }
                if self.capabilities.role_names().next().is_some()
                    && !self
                        .capabilities
                        .role_has_tool(&definition.assigned_agent_role, &definition.tool_name)
                {
                    warn!(
                        role = %definition.assigned_agent_role,
                        tool = %definition.tool_name,
                        "plan references an unconfigured role/tool pair"
                    );
                    return Err(PlanError::SchemaInvalid(format!(
                        "role '{}' has no tool '{}'",
                        definition.assigned_agent_role, definition.tool_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Strips a leading/trailing Markdown code fence (```` ```json ```` or bare
/// ```` ``` ````) before parsing, since models routinely wrap JSON output in
/// one.
fn strip_json_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let without_leading = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_leading.strip_suffix("```").unwrap_or(without_leading).trim()
}

fn parse_plan_json(raw: &str) -> Result<Plan, PlanError> {
    let cleaned = strip_json_fence(raw);
    serde_json::from_str(cleaned).map_err(|e| PlanError::GenerationFailed {
        message: format!("model response was not a valid plan: {e}"),
        raw_response: Some(raw.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Capabilities, RoleDefinition, ToolDefinition};
    use crate::llm::TestAdapter;

    fn capabilities() -> Capabilities {
        Capabilities::from_definitions(vec![RoleDefinition {
            role: "researcher".into(),
            description: "gathers information".into(),
            tools: vec![ToolDefinition {
                name: "search".into(),
                description: "search the web".into(),
            }],
        }])
    }

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n[[{\"x\": 1}]]\n```";
        assert_eq!(strip_json_fence(raw), "[[{\"x\": 1}]]");
    }

    #[tokio::test]
    async fn falls_back_to_model_when_no_template_matches() {
        let adapter = Arc::new(TestAdapter::new("test"));
        adapter.queue_response(
            r#"[[{"assigned_agent_role":"researcher","tool_name":"search","sub_task_input":{},"narrative_step":"look it up"}]]"#,
        );
        let manager = PlanManager::new(vec![], capabilities(), adapter);

        let (plan, source) = manager.generate_plan("do something novel").await.unwrap();
        assert_eq!(source, PlanSource::Model);
        assert_eq!(plan.len(), 1);
    }

    #[tokio::test]
    async fn rejects_plan_referencing_unknown_tool() {
        let adapter = Arc::new(TestAdapter::new("test"));
        adapter.queue_response(
            r#"[[{"assigned_agent_role":"researcher","tool_name":"send_email","sub_task_input":{},"narrative_step":"oops"}]]"#,
        );
        let manager = PlanManager::new(vec![], capabilities(), adapter);

        let result = manager.generate_plan("do something novel").await;
        assert!(result.is_err());
    }
}
