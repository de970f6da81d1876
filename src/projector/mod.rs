//! State projector
//!
//! Folds the ordered pipeline event stream into an immutable snapshot
//! any UI layer can render. The fold is a pure function of the previous
//! state and the next action; it performs no I/O, so identical event
//! logs always reproduce identical snapshots.

mod reducer;

pub use reducer::{Action, ProjectorState, reduce};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall pipeline status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// No run has started yet.
    Idle,
    /// A run is in flight.
    Running,
    /// The last run completed successfully.
    Success,
    /// The last run failed or was cancelled.
    Failed,
}

/// Per-step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not reached yet.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Success,
    /// Failed; later steps will not run.
    Failed,
    /// Never ran because an earlier step failed.
    Skipped,
}

/// Per-script status. Transitions `running → success | failed` exactly
/// once and is then terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptStatus {
    /// Currently executing.
    Running,
    /// Exited zero.
    Success,
    /// Exited non-zero or its phase failed.
    Failed,
}

/// Named stage within a step, used to group output for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptPhase {
    /// Container/environment preparation.
    Setup,
    /// A configured script command.
    Script,
    /// Container teardown.
    Cleanup,
    /// Incoming artifact upload.
    ArtifactsUpload,
    /// Outgoing artifact extraction.
    ArtifactsDownload,
}

/// Classification of one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineKind {
    /// Script stdout.
    Stdout,
    /// Script stderr.
    Stderr,
    /// Informational progress text.
    Info,
    /// Success confirmation.
    Success,
    /// Error text.
    Error,
    /// The command a script ran.
    Command,
}

/// One renderable line of output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    /// The line text, SGR sequences preserved.
    pub text: String,
    /// Display classification.
    pub kind: LineKind,
}

impl OutputLine {
    /// Creates a line.
    #[must_use]
    pub fn new(text: impl Into<String>, kind: LineKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// One script (or synthetic phase group) within a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    /// The command, flattened for display.
    pub command: String,
    /// Phase the script belongs to.
    pub phase: ScriptPhase,
    /// Current status.
    pub status: ScriptStatus,
    /// Output lines attributed to this script.
    pub lines: Vec<OutputLine>,
}

/// One step's reconstructed state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSnapshot {
    /// Display name.
    pub name: String,
    /// Current status.
    pub status: StepStatus,
    /// Scripts opened under this step, in order.
    pub scripts: Vec<ScriptSnapshot>,
    /// All output for the step, append-only while it lives.
    pub output: Vec<OutputLine>,
    /// When the step started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the step finished.
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepSnapshot {
    fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            scripts: Vec::new(),
            output: Vec::new(),
            started_at: None,
            ended_at: None,
        }
    }
}

/// The renderable view of a whole run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Name of the pipeline being run.
    pub pipeline_name: String,
    /// Overall status.
    pub status: RunStatus,
    /// Steps in execution order.
    pub steps: Vec<StepSnapshot>,
    /// Index of the step the observer is looking at; always within
    /// bounds once `steps` is non-empty.
    pub selected_step_index: usize,
    /// Output published before any step started.
    pub global_output: Vec<OutputLine>,
}

impl Snapshot {
    /// Initial snapshot for a named pipeline.
    #[must_use]
    pub fn initial(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            status: RunStatus::Idle,
            steps: Vec::new(),
            selected_step_index: 0,
            global_output: Vec::new(),
        }
    }
}
