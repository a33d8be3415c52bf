//! Plan template loading and matching (§4.6).
//!
//! A template pairs a regex against the incoming task string with a plan
//! skeleton containing `{{PARAM}}` placeholders. Templates are loaded once
//! at startup and never mutated afterward (§9: "no global mutable state").

use crate::error::PlanError;
use crate::types::Plan;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct TemplateFile {
    name: String,
    pattern: String,
    /// Named capture groups from `pattern`, e.g. `["TOPIC", "FORMAT"]`.
    #[serde(default)]
    params: Vec<String>,
    plan: serde_json::Value,
}

pub struct PlanTemplate {
    pub name: String,
    pattern: Regex,
    params: Vec<String>,
    plan_template: String,
}

impl PlanTemplate {
    fn from_file(file: TemplateFile) -> Result<Self, PlanError> {
        let pattern = Regex::new(&file.pattern)
            .map_err(|e| PlanError::SchemaInvalid(format!("invalid template pattern: {e}")))?;
        let plan_template = serde_json::to_string(&file.plan)
            .map_err(|e| PlanError::SchemaInvalid(format!("invalid template plan: {e}")))?;
        Ok(Self {
            name: file.name,
            pattern,
            params: file.params,
            plan_template,
        })
    }

    /// Attempts to match `task` against this template's pattern, returning a
    /// fully-substituted `Plan` on success.
    pub fn try_render(&self, task: &str) -> Option<Result<Plan, PlanError>> {
        let captures = self.pattern.captures(task)?;
        let mut rendered = self.plan_template.clone();
        for param in &self.params {
            if let Some(value) = captures.name(param) {
                rendered = rendered.replace(&format!("{{{{{param}}}}}"), value.as_str());
            }
        }

        Some(
            serde_json::from_str(&rendered)
                .map_err(|e| PlanError::SchemaInvalid(format!("template '{}' rendered invalid plan JSON: {e}", self.name))),
        )
    }
}

/// Loads all `*.json` template files from `dir`, skipping (and logging) any
/// file that fails to parse rather than aborting the whole load.
pub async fn load_templates(dir: impl AsRef<Path>) -> Result<Vec<PlanTemplate>, PlanError> {
    let dir = dir.as_ref();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(PlanError::GenerationFailed {
                message: format!("could not read templates dir {}: {e}", dir.display()),
                raw_response: None,
            })
        }
    };

    let mut templates = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| PlanError::GenerationFailed {
        message: e.to_string(),
        raw_response: None,
    })? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let contents = tokio::fs::read_to_string(&path).await.map_err(|e| PlanError::GenerationFailed {
            message: e.to_string(),
            raw_response: None,
        })?;
        match serde_json::from_str::<TemplateFile>(&contents) {
            Ok(file) => templates.push(PlanTemplate::from_file(file)?),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping invalid plan template");
            }
        }
    }
    Ok(templates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template() -> PlanTemplate {
        let file = TemplateFile {
            name: "summarize".into(),
            pattern: "summarize (?P<TOPIC>.+)".into(),
            params: vec!["TOPIC".into()],
            plan: serde_json::json!([[{
                "assigned_agent_role": "researcher",
                "tool_name": "summarize",
                "sub_task_input": {"topic": "{{TOPIC}}"},
                "narrative_step": "summarize {{TOPIC}}"
            }]]),
        };
        PlanTemplate::from_file(file).unwrap()
    }

    #[test]
    fn renders_plan_with_substituted_param() {
        let template = sample_template();
        let plan = template.try_render("summarize the quarterly report").unwrap().unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0][0].narrative_step, "summarize the quarterly report");
    }

    #[test]
    fn non_matching_task_returns_none() {
        let template = sample_template();
        assert!(template.try_render("translate this document").is_none());
    }
}
