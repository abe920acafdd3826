//! Stage definitions, prompt templates and the built-in pipelines.
//!
//! This module provides:
//! - `StageDefinition`, one unit of agent work with its gating flags
//! - `StageTemplate`, a definition whose prompt has `{placeholder}` variables
//! - `StageConfig`, a template list plus skip/override rules
//! - `StagesFile`, JSON loading for project-specific pipelines
//! - The built-in `llm-wrapper`, `api` and `frontend` template sets

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_STAGE_MAX_TOKENS: u32 = 8000;
pub const DEFAULT_STAGE_TEMPERATURE: f32 = 0.3;

/// Names of the built-in template sets.
pub const TEMPLATE_NAMES: [&str; 3] = ["llm-wrapper", "api", "frontend"];

fn default_true() -> bool {
    true
}

fn default_max_tokens() -> u32 {
    DEFAULT_STAGE_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_STAGE_TEMPERATURE
}

/// A single stage of a pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    pub prompt: String,
    /// Pause for a developer decision after the stage completes.
    #[serde(default)]
    pub requires_approval: bool,
    /// Snapshot before the stage and roll back if its tests fail.
    #[serde(default = "default_true")]
    pub critical_path: bool,
    #[serde(default)]
    pub skip_tests: bool,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl StageDefinition {
    /// Ungated, critical, tested stage with the default budget.
    pub fn new(name: &str, prompt: &str) -> Self {
        Self {
            name: name.to_string(),
            prompt: prompt.to_string(),
            requires_approval: false,
            critical_path: true,
            skip_tests: false,
            max_tokens: DEFAULT_STAGE_MAX_TOKENS,
            temperature: DEFAULT_STAGE_TEMPERATURE,
        }
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical_path = false;
        self
    }

    pub fn without_tests(mut self) -> Self {
        self.skip_tests = true;
        self
    }

    pub fn with_budget(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }
}

/// A stage whose prompt still contains `{placeholder}` variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTemplate {
    #[serde(flatten)]
    pub stage: StageDefinition,
}

impl StageTemplate {
    pub fn new(stage: StageDefinition) -> Self {
        Self { stage }
    }

    pub fn name(&self) -> &str {
        &self.stage.name
    }

    /// Substitute every `{key}` present in `vars`. Unknown placeholders are
    /// left in place.
    pub fn render(&self, vars: &HashMap<String, String>) -> StageDefinition {
        StageDefinition {
            prompt: render_prompt(&self.stage.prompt, vars),
            ..self.stage.clone()
        }
    }
}

pub fn render_prompt(template: &str, vars: &HashMap<String, String>) -> String {
    let mut prompt = template.to_string();
    for (key, value) in vars {
        prompt = prompt.replace(&format!("{{{key}}}"), value);
    }
    prompt
}

/// Which templates run and with what prompts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageConfig {
    pub templates: Vec<StageTemplate>,
    pub skip_stages: Vec<String>,
    pub custom_prompts: HashMap<String, String>,
}

impl StageConfig {
    pub fn new(templates: Vec<StageTemplate>) -> Self {
        Self {
            templates,
            ..Default::default()
        }
    }

    /// Built-in template set by name; unknown names use `llm-wrapper`.
    pub fn for_template(name: &str) -> Self {
        Self::new(default_templates(name))
    }

    pub fn skip(mut self, stages: Vec<String>) -> Self {
        self.skip_stages = stages;
        self
    }

    pub fn with_custom_prompts(mut self, prompts: HashMap<String, String>) -> Self {
        self.custom_prompts = prompts;
        self
    }

    /// Render the pipeline for `project_path`, in template order.
    pub fn stages(&self, project_path: &Path) -> Vec<StageDefinition> {
        let mut vars = HashMap::new();
        vars.insert("project_path".to_string(), project_path.display().to_string());
        self.stages_with(&vars)
    }

    pub fn stages_with(&self, vars: &HashMap<String, String>) -> Vec<StageDefinition> {
        self.templates
            .iter()
            .filter(|t| !self.skip_stages.iter().any(|s| s == t.name()))
            .map(|t| match self.custom_prompts.get(t.name()) {
                Some(custom) => StageTemplate::new(StageDefinition {
                    prompt: custom.clone(),
                    ..t.stage.clone()
                })
                .render(vars),
                None => t.render(vars),
            })
            .collect()
    }
}

/// Project-specific pipeline stored as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagesFile {
    pub stages: Vec<StageTemplate>,
}

impl StagesFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stages file: {}", path.display()))?;

        let file: StagesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse stages JSON: {}", path.display()))?;

        if file.stages.is_empty() {
            anyhow::bail!("Stages file {} defines no stages", path.display());
        }
        Ok(file)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize stages to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write stages file: {}", path.display()))?;

        Ok(())
    }
}

fn template(stage: StageDefinition) -> StageTemplate {
    StageTemplate::new(stage)
}

/// Built-in templates for a workflow type.
pub fn default_templates(workflow_type: &str) -> Vec<StageTemplate> {
    match workflow_type {
        "api" => api_templates(),
        "frontend" => frontend_templates(),
        _ => llm_wrapper_templates(),
    }
}

fn llm_wrapper_templates() -> Vec<StageTemplate> {
    vec![
        template(StageDefinition::new(
            "scaffold",
            "Create a TypeScript LLM wrapper library with:
- Support for OpenAI, Anthropic, and local models
- Type-safe interfaces
- Streaming support
- Error handling and retries
- Cost tracking
Setup project structure in {project_path}",
        )),
        template(
            StageDefinition::new(
                "core-implementation",
                "Implement core wrapper functionality:
- Base LLMClient abstract class
- OpenAI provider implementation
- Anthropic provider implementation
- Unified response format
- Token counting utilities",
            )
            .with_approval(),
        ),
        template(StageDefinition::new(
            "streaming",
            "Add streaming support:
- Server-sent events handling
- Async iterators for streams
- Backpressure handling
- Stream cancellation",
        )),
        template(
            StageDefinition::new(
                "error-handling",
                "Implement robust error handling:
- Custom error classes for different failure types
- Exponential backoff with jitter
- Circuit breaker pattern
- Request timeout handling
- Rate limit detection and retry",
            )
            .non_critical(),
        ),
        template(StageDefinition::new(
            "testing",
            "Create comprehensive test suite:
- Unit tests for each provider
- Integration tests with mock APIs
- Streaming tests
- Error handling tests
- Edge case coverage",
        )),
        template(
            StageDefinition::new(
                "documentation",
                "Generate complete documentation:
- README with quick start guide
- API reference for all public methods
- Usage examples for common scenarios
- Migration guides
- TypeScript type documentation",
            )
            .non_critical()
            .without_tests(),
        ),
    ]
}

fn api_templates() -> Vec<StageTemplate> {
    vec![
        template(StageDefinition::new(
            "scaffold",
            "Create API project structure in {project_path}:
- FastAPI/Express framework setup
- Database models and migrations
- Authentication middleware
- API documentation setup",
        )),
        template(
            StageDefinition::new(
                "endpoints",
                "Implement API endpoints:
- CRUD operations for main resources
- Input validation
- Error responses
- Pagination support",
            )
            .with_approval(),
        ),
        template(
            StageDefinition::new(
                "authentication",
                "Add authentication and authorization:
- JWT token handling
- Role-based access control
- API key management
- Rate limiting",
            )
            .with_approval(),
        ),
        template(StageDefinition::new(
            "testing",
            "Create API test suite:
- Unit tests for handlers
- Integration tests for endpoints
- Authentication tests
- Error handling tests",
        )),
    ]
}

fn frontend_templates() -> Vec<StageTemplate> {
    vec![
        template(StageDefinition::new(
            "scaffold",
            "Create frontend project in {project_path}:
- React/Vue/Svelte setup
- Component library integration
- State management setup
- Build configuration",
        )),
        template(StageDefinition::new(
            "components",
            "Implement UI components:
- Layout components
- Form components
- Data display components
- Navigation components",
        )),
        template(
            StageDefinition::new(
                "pages",
                "Create application pages:
- Main dashboard
- Detail views
- Forms and editors
- Settings pages",
            )
            .with_approval(),
        ),
        template(StageDefinition::new(
            "testing",
            "Add frontend tests:
- Component unit tests
- Integration tests
- Accessibility tests
- Visual regression tests",
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn names(stages: &[StageDefinition]) -> Vec<&str> {
        stages.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn test_stage_defaults() {
        let stage = StageDefinition::new("a", "do a");
        assert!(!stage.requires_approval);
        assert!(stage.critical_path);
        assert!(!stage.skip_tests);
        assert_eq!(stage.max_tokens, 8000);
        assert!((stage.temperature - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let stage: StageDefinition = serde_json::from_str(r#"{"name":"x","prompt":"y"}"#).unwrap();
        assert_eq!(stage, StageDefinition::new("x", "y"));
    }

    #[test]
    fn test_render_substitutes_project_path() {
        let stages = StageConfig::for_template("api").stages(Path::new("/work/app"));
        assert!(stages[0].prompt.contains("Create API project structure in /work/app:"));
        assert!(!stages[0].prompt.contains("{project_path}"));
    }

    #[test]
    fn test_unknown_placeholder_left_in_place() {
        let vars = HashMap::from([("a".to_string(), "1".to_string())]);
        assert_eq!(render_prompt("{a} {b}", &vars), "1 {b}");
    }

    #[test]
    fn test_llm_wrapper_flags() {
        let stages = StageConfig::for_template("llm-wrapper").stages(Path::new("."));
        assert_eq!(
            names(&stages),
            vec![
                "scaffold",
                "core-implementation",
                "streaming",
                "error-handling",
                "testing",
                "documentation"
            ]
        );
        assert!(stages[1].requires_approval);
        assert!(!stages[3].critical_path);
        assert!(stages[5].skip_tests);
    }

    #[test]
    fn test_unknown_template_falls_back() {
        assert_eq!(
            StageConfig::for_template("nope"),
            StageConfig::for_template("llm-wrapper")
        );
    }

    #[test]
    fn test_skip_and_custom_prompts() {
        let config = StageConfig::for_template("frontend")
            .skip(vec!["components".into()])
            .with_custom_prompts(HashMap::from([(
                "pages".to_string(),
                "Only a login page in {project_path}".to_string(),
            )]));

        let stages = config.stages(Path::new("/p"));
        assert_eq!(names(&stages), vec!["scaffold", "pages", "testing"]);
        assert_eq!(stages[1].prompt, "Only a login page in /p");
        assert!(stages[1].requires_approval);
    }

    #[test]
    fn test_stages_file_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stages.json");
        let file = StagesFile {
            stages: vec![StageTemplate::new(
                StageDefinition::new("only", "Work in {project_path}").non_critical(),
            )],
        };
        file.save(&path).unwrap();

        let loaded = StagesFile::load(&path).unwrap();
        assert_eq!(loaded.stages.len(), 1);
        assert!(!loaded.stages[0].stage.critical_path);
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"prompt\""));
    }

    #[test]
    fn test_empty_stages_file_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stages.json");
        std::fs::write(&path, r#"{"stages": []}"#).unwrap();
        assert!(StagesFile::load(&path).is_err());
    }
}
