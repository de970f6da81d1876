//! Event types carried by the event channel.
//!
//! `PipelineEvent` flows engine → observers, `CommandEvent` flows
//! observers → engine. The serialized shape keeps the original
//! `subject:verb` variant tags so any transport stays compatible with
//! existing consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress notification published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A run (or rerun) began; observers reset their view.
    #[serde(rename = "pipeline:start")]
    PipelineStart,

    /// The full resolved step list, emitted right after `pipeline:start`.
    #[serde(rename = "pipeline:steps")]
    PipelineSteps {
        /// Display names of every step, in execution order.
        steps: Vec<String>,
    },

    /// Every step finished successfully.
    #[serde(rename = "pipeline:complete")]
    PipelineComplete,

    /// The run failed or was cancelled as a whole.
    #[serde(rename = "pipeline:error")]
    PipelineError {
        /// Human-readable failure description.
        message: String,
    },

    /// A step began executing.
    #[serde(rename = "step:start")]
    StepStart {
        /// Display name of the step.
        #[serde(rename = "stepName")]
        step_name: String,
    },

    /// A step finished successfully.
    #[serde(rename = "step:complete")]
    StepComplete {
        /// Display name of the step.
        #[serde(rename = "stepName")]
        step_name: String,
    },

    /// A step failed; no later step will start.
    #[serde(rename = "step:error")]
    StepError {
        /// Display name of the step.
        #[serde(rename = "stepName")]
        step_name: String,
        /// Human-readable failure description.
        message: String,
    },

    /// A script command started inside the step's container.
    #[serde(rename = "script:start")]
    ScriptStart {
        /// The raw command as configured.
        script: String,
        /// 1-based position within the step's script list.
        index: usize,
        /// Total number of scripts in the step.
        total: usize,
        /// The command with embedded newlines flattened for display.
        #[serde(rename = "sanitizedScript")]
        sanitized_script: String,
    },

    /// One completed output line from the running script.
    #[serde(rename = "script:output")]
    ScriptOutput {
        /// The line text, SGR color sequences preserved.
        text: String,
        /// Always false under a TTY exec; the pseudo-terminal interleaves
        /// stdout and stderr into one stream.
        stderr: bool,
    },

    /// The script exited with code zero.
    #[serde(rename = "script:complete")]
    ScriptComplete,

    /// The script exited non-zero or its stream broke.
    #[serde(rename = "script:error")]
    ScriptError {
        /// Human-readable failure description.
        message: String,
    },

    /// Pinging the Docker daemon.
    #[serde(rename = "docker:checking")]
    DockerChecking,

    /// The daemon answered the ping.
    #[serde(rename = "docker:available")]
    DockerAvailable,

    /// The daemon is unreachable; the run aborts.
    #[serde(rename = "docker:unavailable")]
    DockerUnavailable {
        /// Human-readable failure description.
        message: String,
    },

    /// The image is not cached locally and is being pulled.
    #[serde(rename = "image:pulling")]
    ImagePulling {
        /// Image reference being pulled.
        image: String,
    },

    /// The image is ready, either freshly pulled or from the local cache.
    #[serde(rename = "image:pulled")]
    ImagePulled {
        /// Image reference.
        image: String,
        /// True when no registry round-trip was needed.
        cached: bool,
    },

    /// Creating the step's container.
    #[serde(rename = "instance:creating")]
    InstanceCreating {
        /// Image the container is created from.
        image: String,
    },

    /// The container exists.
    #[serde(rename = "instance:created")]
    InstanceCreated {
        /// Full container id.
        id: String,
        /// Abbreviated id for display, `abcd..wxyz`.
        #[serde(rename = "shortId")]
        short_id: String,
    },

    /// Copying the invocation directory into the container.
    #[serde(rename = "instance:copying")]
    InstanceCopying,

    /// The copy finished.
    #[serde(rename = "instance:copied")]
    InstanceCopied,

    /// The container started.
    #[serde(rename = "instance:started")]
    InstanceStarted,

    /// Stopping and removing the container.
    #[serde(rename = "instance:stopping")]
    InstanceStopping,

    /// The container is gone.
    #[serde(rename = "instance:stopped")]
    InstanceStopped,

    /// Uploading previously produced artifacts into the container.
    #[serde(rename = "artifacts:uploading")]
    ArtifactsUploading,

    /// Artifact upload finished.
    #[serde(rename = "artifacts:uploaded")]
    ArtifactsUploaded {
        /// Number of files uploaded; zero is a successful no-op.
        count: usize,
    },

    /// Extracting freshly produced artifacts from the container.
    #[serde(rename = "artifacts:generating")]
    ArtifactsGenerating {
        /// Glob patterns being resolved.
        patterns: Vec<String>,
    },

    /// Artifact extraction finished.
    #[serde(rename = "artifacts:generated")]
    ArtifactsGenerated {
        /// Number of files stored.
        count: usize,
        /// Host directory the artifacts were stored under.
        path: String,
    },

    /// Free-form informational message.
    #[serde(rename = "info")]
    Info {
        /// The message text.
        message: String,
    },

    /// Free-form error message outside any step context.
    #[serde(rename = "error")]
    Error {
        /// The message text.
        message: String,
    },
}

/// Control request published by an observer, consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandEvent {
    /// Reset run state and run the whole pipeline again.
    #[serde(rename = "rerun:pipeline")]
    RerunPipeline,

    /// Reset run state and run a single named step.
    #[serde(rename = "rerun:step")]
    RerunStep {
        /// Display name of the step to rerun.
        #[serde(rename = "stepName")]
        step_name: String,
    },

    /// Stop dispatching further steps and tear down the active container.
    #[serde(rename = "cancel:pipeline")]
    CancelPipeline,
}

/// A pipeline event plus the instant it was published.
///
/// The projector reads time from here instead of a clock, so replaying a
/// recorded log reproduces the exact same snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The event payload.
    pub event: PipelineEvent,
    /// Publish instant, stamped by the bus.
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    /// Wraps an event with the current instant.
    #[must_use]
    pub fn now(event: PipelineEvent) -> Self {
        Self {
            event,
            timestamp: Utc::now(),
        }
    }

    /// Wraps an event with an explicit instant (replay, tests).
    #[must_use]
    pub fn at(event: PipelineEvent, timestamp: DateTime<Utc>) -> Self {
        Self { event, timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pipeline_event_wire_tags() {
        let event = PipelineEvent::StepStart {
            step_name: "Build".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "step:start");
        assert_eq!(json["stepName"], "Build");
    }

    #[test]
    fn test_image_pulled_carries_cached_flag() {
        let event = PipelineEvent::ImagePulled {
            image: "alpine:3".to_string(),
            cached: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "image:pulled");
        assert_eq!(json["cached"], true);
    }

    #[test]
    fn test_script_start_sanitized_field_name() {
        let event = PipelineEvent::ScriptStart {
            script: "echo a\necho b".to_string(),
            index: 1,
            total: 2,
            sanitized_script: "echo a; echo b".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["sanitizedScript"], "echo a; echo b");
    }

    #[test]
    fn test_command_event_round_trip() {
        let command = CommandEvent::RerunStep {
            step_name: "Deploy".to_string(),
        };
        let json = serde_json::to_string(&command).unwrap();
        let back: CommandEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, command);
    }

    #[test]
    fn test_cancel_wire_tag() {
        let json = serde_json::to_value(CommandEvent::CancelPipeline).unwrap();
        assert_eq!(json["type"], "cancel:pipeline");
    }
}
