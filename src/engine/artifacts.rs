//! Artifacts manager
//!
//! Artifacts are the only cross-step communication mechanism: files a
//! step declares are extracted from its container after the scripts run
//! and re-uploaded into the next step's container before its scripts
//! run. Everything is staged under the scratch root on the host.

use std::path::Path;
use std::sync::Arc;

use bollard::Docker;
use bollard::container::{DownloadFromContainerOptions, UploadToContainerOptions};
use futures::StreamExt;

use crate::events::{EventBus, PipelineEvent};
use crate::infrastructure::paths::{CONTAINER_WORKDIR, ScratchPaths};
use crate::pipeline::{RunnerError, RunnerResult};

use super::archive;

/// Carries files between host-side artifact storage and step containers.
pub struct ArtifactsManager {
    docker: Arc<Docker>,
    bus: Arc<EventBus>,
    paths: ScratchPaths,
}

impl ArtifactsManager {
    /// Creates the manager and resets the scratch root, guaranteeing a
    /// clean slate per process invocation.
    pub fn new(docker: Arc<Docker>, bus: Arc<EventBus>, paths: ScratchPaths) -> RunnerResult<Self> {
        if paths.root().exists() {
            std::fs::remove_dir_all(paths.root())?;
        }
        std::fs::create_dir_all(paths.artifacts_dir())?;
        Ok(Self { docker, bus, paths })
    }

    /// Uploads previously produced artifacts into a new step's container.
    ///
    /// An empty or absent artifact store is a successful no-op, so steps
    /// without incoming dependencies cost nothing.
    pub async fn upload_artifacts(&self, container_id: &str) -> RunnerResult<()> {
        self.bus.publish(PipelineEvent::ArtifactsUploading);

        let store = self.paths.artifacts_dir();
        let count = if store.is_dir() {
            archive::count_files(&store)?
        } else {
            0
        };
        if count == 0 {
            self.bus
                .publish(PipelineEvent::ArtifactsUploaded { count: 0 });
            return Ok(());
        }

        let (bundle, count) = tokio::task::spawn_blocking(move || archive::bundle_directory(&store))
            .await
            .map_err(|e| RunnerError::ArtifactIo(e.to_string()))??;

        self.docker
            .upload_to_container(
                container_id,
                Some(UploadToContainerOptions {
                    path: CONTAINER_WORKDIR,
                    ..Default::default()
                }),
                bundle.into(),
            )
            .await?;

        self.bus.publish(PipelineEvent::ArtifactsUploaded { count });
        Ok(())
    }

    /// Extracts files matching the step's artifact patterns out of the
    /// container into the host-side artifact store.
    pub async fn generate_artifacts(
        &self,
        container_id: &str,
        patterns: &[String],
    ) -> RunnerResult<()> {
        self.bus.publish(PipelineEvent::ArtifactsGenerating {
            patterns: patterns.to_vec(),
        });

        let store = self.paths.artifacts_dir();
        if patterns.is_empty() {
            self.bus.publish(PipelineEvent::ArtifactsGenerated {
                count: 0,
                path: store.display().to_string(),
            });
            return Ok(());
        }

        let mut download = self.docker.download_from_container(
            container_id,
            Some(DownloadFromContainerOptions {
                path: CONTAINER_WORKDIR,
            }),
        );
        let mut bytes = Vec::new();
        while let Some(chunk) = download.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        // The extraction is transient; always discard it afterwards so
        // disk use stays bounded across steps.
        let tmp = self.paths.tmp_dir();
        if tmp.exists() {
            std::fs::remove_dir_all(&tmp)?;
        }

        let result = self.extract_and_collect(&bytes, &tmp, patterns, &store).await;
        if tmp.exists() {
            let _ = std::fs::remove_dir_all(&tmp);
        }
        let count = result?;

        self.bus.publish(PipelineEvent::ArtifactsGenerated {
            count,
            path: store.display().to_string(),
        });
        Ok(())
    }

    async fn extract_and_collect(
        &self,
        bytes: &[u8],
        tmp: &Path,
        patterns: &[String],
        store: &Path,
    ) -> RunnerResult<usize> {
        let bytes = bytes.to_vec();
        let tmp_dir = tmp.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack_archive(&bytes, &tmp_dir))
            .await
            .map_err(|e| RunnerError::ArtifactIo(e.to_string()))??;

        // The archive contains one top-level entry named after the
        // container working directory; patterns are rooted below it.
        let extract_root = tmp.join(CONTAINER_WORKDIR.trim_start_matches('/'));
        collect_matches(&extract_root, patterns, store)
    }
}

/// Resolves glob patterns under `root` and copies every matching file
/// into `dest`, preserving relative paths. Returns the number of files
/// copied.
pub fn collect_matches(root: &Path, patterns: &[String], dest: &Path) -> RunnerResult<usize> {
    let mut count = 0;

    for pattern in patterns {
        let rooted = root.join(pattern);
        let rooted = rooted
            .to_str()
            .ok_or_else(|| RunnerError::ArtifactIo(format!("non-UTF-8 pattern: {pattern}")))?;

        let matches = glob::glob(rooted)
            .map_err(|e| RunnerError::ArtifactIo(format!("invalid pattern \"{pattern}\": {e}")))?;

        for path in matches.flatten() {
            if !path.is_file() {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .map_err(|e| RunnerError::ArtifactIo(e.to_string()))?;
            let target = dest.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&path, &target)?;
            count += 1;
        }
    }

    Ok(count)
}
