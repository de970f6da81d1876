//! Error types for pipeline execution

use thiserror::Error;

/// Errors that can occur while loading or running a pipeline.
///
/// Every failure is reported once on the event channel before it is
/// propagated; nothing below the process entry point exits the process.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Bad or missing pipeline configuration (fatal, pre-run)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The Docker daemon is unreachable (fatal, aborts the run)
    #[error("Docker is not running, or you do not have permission to access it")]
    DockerUnavailable(#[source] bollard::errors::Error),

    /// Pulling the image from the registry failed
    #[error("Error pulling image \"{image}\": {message}")]
    ImagePull {
        /// The image reference that failed to pull.
        image: String,
        /// Error message from the registry or daemon.
        message: String,
    },

    /// A script exited with a non-zero code (fatal for the step and the run)
    #[error("Script failed with exit code \"{exit_code}\"")]
    ScriptExecution {
        /// Exit code returned by the script.
        exit_code: i64,
    },

    /// Transport-level failure while streaming exec output
    #[error("Script stream failed: {0}")]
    Stream(String),

    /// Bundling, extracting or copying artifacts failed
    #[error("Artifact I/O error: {0}")]
    ArtifactIo(String),

    /// The run was cancelled by an observer command
    #[error("Pipeline cancelled")]
    Cancelled,

    /// Container daemon operation failed
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl From<std::io::Error> for RunnerError {
    fn from(err: std::io::Error) -> Self {
        Self::ArtifactIo(err.to_string())
    }
}
