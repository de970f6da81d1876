//! Pipeline template configuration
//!
//! Loads a Bitbucket-Pipelines-style YAML template and resolves pipelines
//! by name. Nested pipelines are addressed as `group:name`
//! (e.g. `branches:main`, `custom:deploy`); the bare name `default`
//! addresses the top-level default pipeline.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::pipeline::{Pipeline, RunnerError, RunnerResult, Step};

/// Image used when the template does not set one.
pub const DEFAULT_IMAGE: &str = "atlassian/default-image:4";

/// One step as it appears in the template.
#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Display name, optional.
    pub name: Option<String>,
    /// Image override for this step.
    pub image: Option<String>,
    /// Ordered shell commands.
    #[serde(default)]
    pub script: Vec<String>,
    /// Artifact glob patterns.
    #[serde(default)]
    pub artifacts: Vec<String>,
}

/// Wrapper matching the `- step:` list item shape.
#[derive(Debug, Clone, Deserialize)]
pub struct StepEntry {
    /// The step definition.
    pub step: StepConfig,
}

/// The `pipelines:` section of the template.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelinesSection {
    /// The default pipeline.
    #[serde(default)]
    pub default: Option<Vec<StepEntry>>,
    /// Branch-triggered pipelines.
    #[serde(default)]
    pub branches: BTreeMap<String, Vec<StepEntry>>,
    /// Manually triggered pipelines.
    #[serde(default)]
    pub custom: BTreeMap<String, Vec<StepEntry>>,
    /// Tag-triggered pipelines.
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<StepEntry>>,
    /// Pull-request pipelines.
    #[serde(default, rename = "pull-requests")]
    pub pull_requests: BTreeMap<String, Vec<StepEntry>>,
}

/// The whole template file.
#[derive(Debug, Clone, Deserialize)]
pub struct Template {
    /// Default image for steps without an override.
    pub image: Option<String>,
    /// All declared pipelines.
    pub pipelines: PipelinesSection,
}

/// Loaded template with name-based lookup.
#[derive(Debug, Clone)]
pub struct Configuration {
    template: Template,
}

impl Configuration {
    /// Loads and parses a template file.
    pub fn from_file(path: impl AsRef<Path>) -> RunnerResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|_| {
            RunnerError::Configuration(format!(
                "template file \"{}\" does not exist",
                path.display()
            ))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parses a template from YAML text.
    pub fn from_yaml(raw: &str) -> RunnerResult<Self> {
        let template: Template = serde_yaml::from_str(raw)
            .map_err(|e| RunnerError::Configuration(format!("template is not valid YAML: {e}")))?;
        Ok(Self { template })
    }

    /// The default image steps fall back to.
    #[must_use]
    pub fn default_image(&self) -> String {
        self.template
            .image
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE.to_string())
    }

    /// Resolves a pipeline by name.
    pub fn pipeline_by_name(&self, name: &str) -> RunnerResult<Pipeline> {
        let entries = self.lookup(name).ok_or_else(|| {
            RunnerError::Configuration(format!("pipeline \"{name}\" does not exist"))
        })?;

        let steps = entries
            .iter()
            .map(|entry| {
                let config = entry.step.clone();
                Step {
                    name: config.name,
                    image: config.image,
                    script: config.script,
                    artifacts: config.artifacts,
                }
            })
            .collect();

        Ok(Pipeline::new(name, steps))
    }

    /// Resolved step display names for a pipeline.
    pub fn pipeline_step_names(&self, name: &str) -> RunnerResult<Vec<String>> {
        Ok(self.pipeline_by_name(name)?.step_names())
    }

    /// All addressable pipeline names declared by the template.
    #[must_use]
    pub fn available_pipelines(&self) -> Vec<String> {
        let section = &self.template.pipelines;
        let mut names = Vec::new();

        if section.default.is_some() {
            names.push("default".to_string());
        }
        for (group, members) in [
            ("branches", &section.branches),
            ("custom", &section.custom),
            ("tags", &section.tags),
            ("pull-requests", &section.pull_requests),
        ] {
            names.extend(members.keys().map(|key| format!("{group}:{key}")));
        }
        names
    }

    fn lookup(&self, name: &str) -> Option<&Vec<StepEntry>> {
        let section = &self.template.pipelines;

        match name.split_once(':') {
            None if name == "default" => section.default.as_ref(),
            None => None,
            Some((group, key)) => match group {
                "branches" => section.branches.get(key),
                "custom" => section.custom.get(key),
                "tags" => section.tags.get(key),
                "pull-requests" => section.pull_requests.get(key),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TEMPLATE: &str = r#"
image: node:20

pipelines:
  default:
    - step:
        name: Build
        script:
          - npm ci
          - npm run build
        artifacts:
          - dist/**
    - step:
        script:
          - npm test
  custom:
    deploy:
      - step:
          name: Deploy
          image: alpine:3
          script:
            - ./deploy.sh
"#;

    #[test]
    fn test_default_image_from_template() {
        let config = Configuration::from_yaml(TEMPLATE).unwrap();
        assert_eq!(config.default_image(), "node:20");
    }

    #[test]
    fn test_default_image_fallback() {
        let config = Configuration::from_yaml("pipelines:\n  default:\n").unwrap();
        assert_eq!(config.default_image(), DEFAULT_IMAGE);
    }

    #[test]
    fn test_pipeline_by_name_default() {
        let config = Configuration::from_yaml(TEMPLATE).unwrap();
        let pipeline = config.pipeline_by_name("default").unwrap();

        assert_eq!(pipeline.steps.len(), 2);
        assert_eq!(pipeline.step_names(), vec!["Build", "Step 2"]);
        assert_eq!(pipeline.steps[0].artifacts, vec!["dist/**"]);
    }

    #[test]
    fn test_pipeline_by_nested_name() {
        let config = Configuration::from_yaml(TEMPLATE).unwrap();
        let pipeline = config.pipeline_by_name("custom:deploy").unwrap();

        assert_eq!(pipeline.steps.len(), 1);
        assert_eq!(pipeline.steps[0].image.as_deref(), Some("alpine:3"));
    }

    #[test]
    fn test_unknown_pipeline_is_configuration_error() {
        let config = Configuration::from_yaml(TEMPLATE).unwrap();
        let err = config.pipeline_by_name("branches:main").unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }

    #[test]
    fn test_available_pipelines() {
        let config = Configuration::from_yaml(TEMPLATE).unwrap();
        assert_eq!(config.available_pipelines(), vec!["default", "custom:deploy"]);
    }

    #[test]
    fn test_invalid_yaml_is_configuration_error() {
        let err = Configuration::from_yaml("pipelines: [unclosed").unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let err = Configuration::from_file("/nonexistent/bitbucket-pipelines.yml").unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitbucket-pipelines.yml");
        std::fs::write(&path, TEMPLATE).unwrap();

        let config = Configuration::from_file(&path).unwrap();
        assert_eq!(config.pipeline_step_names("default").unwrap().len(), 2);
    }
}
