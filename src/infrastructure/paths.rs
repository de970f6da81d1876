//! Scratch directory layout
//!
//! All host-side staging happens under one scratch root in the invocation
//! directory: `tmp/` for transient archive extraction, `artifacts/` for
//! files accumulated across steps within a run.

use std::path::{Path, PathBuf};

/// Name of the scratch root created in the invocation directory.
pub const SCRATCH_DIR_NAME: &str = ".pipelocal";

/// Fixed working directory inside every step container.
pub const CONTAINER_WORKDIR: &str = "/runner";

/// Resolved scratch layout for one process invocation.
#[derive(Debug, Clone)]
pub struct ScratchPaths {
    root: PathBuf,
}

impl ScratchPaths {
    /// Lays out the scratch directories under `base` (normally the
    /// invocation directory).
    #[must_use]
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            root: base.as_ref().join(SCRATCH_DIR_NAME),
        }
    }

    /// Resolves against the current working directory.
    pub fn from_current_dir() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// The scratch root itself.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ephemeral extraction area, cleared after each use.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Artifact store, accumulating across steps within one run.
    #[must_use]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }
}
