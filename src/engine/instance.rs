//! Container instance manager
//!
//! Drives one container through its full lifecycle for one step:
//! availability check, image caching/pull, creation, copy-in of the
//! invocation directory, script execution with streamed output, teardown.
//!
//! Lifecycle of one instance:
//! `Absent → Pulling? → Created → Copying → Started → (Executing)* →
//! Stopping → Removed`; any failure while executing short-circuits to
//! teardown before the error propagates.

use std::path::PathBuf;
use std::sync::Arc;

use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::events::{EventBus, PipelineEvent};
use crate::infrastructure::paths::CONTAINER_WORKDIR;
use crate::pipeline::{RunnerError, RunnerResult};

use super::archive;
use super::terminal::{LineAssembler, flatten_script};

/// Fixed variables injected into every container so tools emit color
/// even though no real terminal is attached.
pub const TERMINAL_ENV: &[&str] = &["TERM=xterm-256color", "FORCE_COLOR=1", "CLICOLOR_FORCE=1"];

/// Opaque handle to a created container.
#[derive(Debug, Clone)]
pub struct InstanceHandle {
    id: String,
}

impl InstanceHandle {
    /// Full container id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Abbreviated id for display, `abcd..wxyz`.
    #[must_use]
    pub fn short_id(&self) -> String {
        if self.id.len() <= 8 {
            return self.id.clone();
        }
        format!("{}..{}", &self.id[..4], &self.id[self.id.len() - 4..])
    }
}

/// Owns container lifecycle operations for the engine.
///
/// The daemon client is shared with the artifacts manager; the engine's
/// serialization guarantee means at most one container operation is in
/// flight at a time.
pub struct InstanceManager {
    docker: Arc<Docker>,
    bus: Arc<EventBus>,
    workspace: PathBuf,
    active: Mutex<Option<String>>,
}

impl InstanceManager {
    /// Creates a manager copying `workspace` into each step's container.
    #[must_use]
    pub fn new(docker: Arc<Docker>, bus: Arc<EventBus>, workspace: PathBuf) -> Self {
        Self {
            docker,
            bus,
            workspace,
            active: Mutex::new(None),
        }
    }

    /// Pings the daemon. Unreachable daemons abort the run.
    pub async fn check_availability(&self) -> RunnerResult<()> {
        self.bus.publish(PipelineEvent::DockerChecking);

        match self.docker.ping().await {
            Ok(_) => {
                self.bus.publish(PipelineEvent::DockerAvailable);
                Ok(())
            }
            Err(e) => {
                self.bus.publish(PipelineEvent::DockerUnavailable {
                    message: e.to_string(),
                });
                Err(RunnerError::DockerUnavailable(e))
            }
        }
    }

    /// Whether the exact image reference exists in the local image list.
    pub async fn is_image_cached(&self, reference: &str) -> RunnerResult<bool> {
        let images = self
            .docker
            .list_images(Option::<ListImagesOptions<String>>::None)
            .await?;
        Ok(images
            .iter()
            .any(|image| image.repo_tags.iter().any(|tag| tag == reference)))
    }

    /// Ensures the image is present, pulling it only when it is not
    /// cached locally.
    pub async fn pull_image(&self, image: &str) -> RunnerResult<()> {
        if self.is_image_cached(image).await? {
            self.bus.publish(PipelineEvent::ImagePulled {
                image: image.to_string(),
                cached: true,
            });
            return Ok(());
        }

        self.bus.publish(PipelineEvent::ImagePulling {
            image: image.to_string(),
        });

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);

        while let Some(update) = progress.next().await {
            if let Err(e) = update {
                return Err(RunnerError::ImagePull {
                    image: image.to_string(),
                    message: e.to_string(),
                });
            }
        }

        self.bus.publish(PipelineEvent::ImagePulled {
            image: image.to_string(),
            cached: false,
        });
        Ok(())
    }

    /// Creates and starts a container for one step, copying the
    /// invocation directory into its working directory.
    pub async fn create_instance(
        &self,
        image: &str,
        variables: &[String],
    ) -> RunnerResult<InstanceHandle> {
        self.pull_image(image).await?;

        let mut env: Vec<String> = variables.to_vec();
        env.extend(TERMINAL_ENV.iter().map(|v| (*v).to_string()));

        self.bus.publish(PipelineEvent::InstanceCreating {
            image: image.to_string(),
        });

        let options = CreateContainerOptions {
            name: format!("pipelocal-{}", uuid::Uuid::new_v4()),
            platform: None,
        };
        let config = ContainerConfig {
            image: Some(image.to_string()),
            tty: Some(true),
            env: Some(env),
            working_dir: Some(CONTAINER_WORKDIR.to_string()),
            ..Default::default()
        };

        let created = self.docker.create_container(Some(options), config).await?;
        let handle = InstanceHandle { id: created.id };

        // Recorded before copy-in and start: if either fails, the
        // failure-path teardown still finds the container.
        *self.active.lock().await = Some(handle.id().to_string());

        self.bus.publish(PipelineEvent::InstanceCreated {
            id: handle.id().to_string(),
            short_id: handle.short_id(),
        });

        self.bus.publish(PipelineEvent::InstanceCopying);
        let workspace = self.workspace.clone();
        let (bundle, _) = tokio::task::spawn_blocking(move || archive::bundle_directory(&workspace))
            .await
            .map_err(|e| RunnerError::ArtifactIo(e.to_string()))??;

        self.docker
            .upload_to_container(
                handle.id(),
                Some(UploadToContainerOptions {
                    path: CONTAINER_WORKDIR,
                    ..Default::default()
                }),
                bundle.into(),
            )
            .await?;
        self.bus.publish(PipelineEvent::InstanceCopied);

        self.docker.start_container::<String>(handle.id(), None).await?;
        self.bus.publish(PipelineEvent::InstanceStarted);

        tracing::debug!(container = %handle.short_id(), image = %image, "instance ready");

        Ok(handle)
    }

    /// Stops and removes the container. Best-effort: failures are logged
    /// and swallowed so cleanup never masks the original error.
    pub async fn remove_instance(&self, handle: &InstanceHandle) {
        self.bus.publish(PipelineEvent::InstanceStopping);

        if let Err(e) = self.docker.stop_container(handle.id(), None).await {
            tracing::warn!(container = %handle.short_id(), error = %e, "stop failed");
        }
        let remove = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self.docker.remove_container(handle.id(), Some(remove)).await {
            tracing::warn!(container = %handle.short_id(), error = %e, "remove failed");
        }

        self.bus.publish(PipelineEvent::InstanceStopped);

        let mut active = self.active.lock().await;
        if active.as_deref() == Some(handle.id()) {
            *active = None;
        }
    }

    /// Tears down the active container, if any. Used by the failure path
    /// and by cancellation; safe to call when nothing is running.
    pub async fn teardown_active(&self) {
        let id = self.active.lock().await.take();
        if let Some(id) = id {
            self.remove_instance(&InstanceHandle { id }).await;
        }
    }

    /// Runs one script inside the container, streaming its output line
    /// by line. Non-zero exit or a broken stream tears the instance down
    /// before the error propagates.
    pub async fn run_instance_script(
        &self,
        handle: &InstanceHandle,
        command: &str,
        index: usize,
        total: usize,
    ) -> RunnerResult<()> {
        self.bus.publish(PipelineEvent::ScriptStart {
            script: command.to_string(),
            index,
            total,
            sanitized_script: flatten_script(command),
        });

        let exec = self
            .docker
            .create_exec(
                handle.id(),
                CreateExecOptions {
                    cmd: Some(vec!["bash", "-c", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    tty: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        else {
            return self
                .fail_script(handle, RunnerError::Stream("exec did not attach".to_string()))
                .await;
        };

        // The TTY interleaves stdout and stderr into one ordered stream,
        // so every line is reported with stderr: false.
        let mut assembler = LineAssembler::new();
        while let Some(chunk) = output.next().await {
            match chunk {
                Ok(log) => {
                    for line in assembler.push_chunk(&log.into_bytes()) {
                        self.bus.publish(PipelineEvent::ScriptOutput {
                            text: line,
                            stderr: false,
                        });
                    }
                }
                Err(e) => {
                    return self
                        .fail_script(handle, RunnerError::Stream(e.to_string()))
                        .await;
                }
            }
        }
        if let Some(rest) = assembler.finish() {
            self.bus.publish(PipelineEvent::ScriptOutput {
                text: rest,
                stderr: false,
            });
        }

        let inspected = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspected.exit_code.unwrap_or(0);

        if exit_code == 0 {
            self.bus.publish(PipelineEvent::ScriptComplete);
            Ok(())
        } else {
            self.fail_script(handle, RunnerError::ScriptExecution { exit_code })
                .await
        }
    }

    async fn fail_script(&self, handle: &InstanceHandle, error: RunnerError) -> RunnerResult<()> {
        self.bus.publish(PipelineEvent::ScriptError {
            message: error.to_string(),
        });
        self.remove_instance(handle).await;
        Err(error)
    }
}
