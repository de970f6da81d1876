//! Infrastructure concerns
//!
//! Template configuration, environment variable parsing, scratch paths
//! and logging setup. These are collaborators of the execution engine;
//! none of them publish events.

pub mod config;
pub mod environment;
pub mod logging;
pub mod paths;

pub use config::{Configuration, DEFAULT_IMAGE};
pub use environment::Environment;
pub use logging::init_logging;
pub use paths::{CONTAINER_WORKDIR, ScratchPaths};
