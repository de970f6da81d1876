//! Pipeline domain types
//!
//! A `Pipeline` is an ordered sequence of `Step`s, fixed at load time.
//! Both types are immutable once built; the engine only reads them.

mod errors;

pub use errors::RunnerError;

/// Result alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// One unit of pipeline work, running in its own container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Display name; steps without a name render as `Step N`.
    pub name: Option<String>,
    /// Image override; falls back to the pipeline default image.
    pub image: Option<String>,
    /// Ordered shell commands. An empty list is a configuration error,
    /// detected when the step is dispatched.
    pub script: Vec<String>,
    /// Glob patterns for files this step publishes to later steps.
    pub artifacts: Vec<String>,
}

impl Step {
    /// Creates a step from its script lines.
    #[must_use]
    pub fn new(script: Vec<String>) -> Self {
        Self {
            name: None,
            image: None,
            script,
            artifacts: Vec::new(),
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the image override.
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Sets the artifact glob patterns.
    #[must_use]
    pub fn with_artifacts(mut self, patterns: Vec<String>) -> Self {
        self.artifacts = patterns;
        self
    }

    /// The name shown to observers, `Step N` (1-based) when unnamed.
    #[must_use]
    pub fn display_name(&self, position: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("Step {}", position + 1))
    }
}

/// An ordered pipeline of steps. Order never changes after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Name the pipeline was addressed by (e.g. `default`, `custom:deploy`).
    pub name: String,
    /// The steps, in execution order.
    pub steps: Vec<Step>,
}

impl Pipeline {
    /// Creates a pipeline from its steps.
    #[must_use]
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    /// Resolved display names for every step, in order.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.steps
            .iter()
            .enumerate()
            .map(|(i, step)| step.display_name(i))
            .collect()
    }

    /// Finds a step by its display name.
    #[must_use]
    pub fn step_by_name(&self, name: &str) -> Option<(usize, &Step)> {
        self.steps
            .iter()
            .enumerate()
            .find(|(i, step)| step.display_name(*i) == name)
    }
}
