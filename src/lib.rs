//! # pipelocal - run Bitbucket-style pipelines locally
//!
//! pipelocal reads a `bitbucket-pipelines.yml` template, runs each step
//! in its own Docker container from the project directory, and carries
//! artifacts from step to step the way the hosted service does.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the default pipeline from ./bitbucket-pipelines.yml
//! pipelocal run
//!
//! # Run a branch pipeline with variables
//! pipelocal run branches:main -v "API_KEY=abc,REGION=eu"
//!
//! # See what a template defines
//! pipelocal list
//! ```
//!
//! ## Architecture
//!
//! Execution is event-driven: the [`engine`] publishes
//! [`events::PipelineEvent`]s onto a broadcast channel and any number of
//! observers consume them. The bundled [`console`] observer prints a
//! live trace; the [`projector`] folds the same events into a
//! renderable snapshot for richer frontends.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod cli;
pub mod console;
pub mod engine;
pub mod events;
pub mod infrastructure;
pub mod pipeline;
pub mod projector;

// Re-export commonly used types
pub use engine::{ArtifactsManager, Engine, EngineOptions, InstanceManager};
pub use events::{CommandEvent, EventBus, EventEnvelope, PipelineEvent};
pub use infrastructure::{Configuration, Environment, ScratchPaths, DEFAULT_IMAGE};
pub use pipeline::{Pipeline, RunnerError, RunnerResult, Step};
pub use projector::{Action, ProjectorState, Snapshot};

/// Crate version, as published.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
