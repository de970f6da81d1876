//! Pipeline execution engine
//!
//! The orchestrator: sequences steps and their phases, drives the
//! instance and artifacts managers, publishes progress events and reacts
//! to observer commands (cancel, rerun). One logical task drives a run;
//! steps and their container operations never overlap.
//!
//! Phase order within a step: setup (docker check once per run, image
//! pull, instance create, copy-in), artifacts upload, scripts in order,
//! artifacts download, cleanup. A failing phase tears down the in-flight
//! container before the error propagates.

mod archive;
pub mod artifacts;
pub mod instance;
pub mod terminal;

pub use artifacts::ArtifactsManager;
pub use instance::{InstanceHandle, InstanceManager, TERMINAL_ENV};

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bollard::Docker;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;

use crate::events::{CommandEvent, EventBus, PipelineEvent};
use crate::infrastructure::ScratchPaths;
use crate::pipeline::{Pipeline, RunnerError, RunnerResult, Step};

/// Run-scoped flags, reset at the start of every run or rerun.
#[derive(Debug, Default)]
struct EngineRunState {
    /// Daemon availability is verified once per run, not once per step.
    docker_checked: bool,
    /// Reentrancy guard; a second `run` while one is in flight is
    /// rejected and dropped, never queued.
    is_running: bool,
}

impl EngineRunState {
    /// Marks a run as started, resetting per-run flags. Returns false if
    /// a run is already in flight.
    fn begin(&mut self) -> bool {
        if self.is_running {
            return false;
        }
        *self = Self {
            docker_checked: false,
            is_running: true,
        };
        true
    }

    fn end(&mut self) {
        self.is_running = false;
    }
}

/// Construction parameters for [`Engine`].
pub struct EngineOptions {
    /// The pipeline to execute.
    pub pipeline: Pipeline,
    /// Image for steps without an override.
    pub default_image: String,
    /// `KEY=VALUE` variables injected into every step container.
    pub variables: Vec<String>,
    /// Host directory copied into each step's container.
    pub workspace: PathBuf,
    /// Scratch layout for artifact staging.
    pub paths: ScratchPaths,
}

/// The pipeline engine. Emits events, never reads snapshots.
pub struct Engine {
    pipeline: Pipeline,
    default_image: String,
    variables: Vec<String>,
    bus: Arc<EventBus>,
    instances: InstanceManager,
    artifacts: ArtifactsManager,
    state: Mutex<EngineRunState>,
    cancel_requested: AtomicBool,
}

impl Engine {
    /// Builds the engine and installs its command subscription.
    ///
    /// The subscription lives for the engine's lifetime and is the only
    /// consumer of the command channel. Must be called within a Tokio
    /// runtime.
    pub fn new(
        options: EngineOptions,
        bus: Arc<EventBus>,
        docker: Arc<Docker>,
    ) -> RunnerResult<Arc<Self>> {
        let instances = InstanceManager::new(docker.clone(), bus.clone(), options.workspace);
        let artifacts = ArtifactsManager::new(docker, bus.clone(), options.paths)?;

        let engine = Arc::new(Self {
            pipeline: options.pipeline,
            default_image: options.default_image,
            variables: options.variables,
            bus,
            instances,
            artifacts,
            state: Mutex::new(EngineRunState::default()),
            cancel_requested: AtomicBool::new(false),
        });

        Self::spawn_command_listener(&engine);
        Ok(engine)
    }

    fn spawn_command_listener(engine: &Arc<Self>) {
        let mut commands = engine.bus.subscribe_commands();
        let weak = Arc::downgrade(engine);

        tokio::spawn(async move {
            loop {
                match commands.recv().await {
                    Ok(command) => {
                        let Some(engine) = weak.upgrade() else { break };
                        match command {
                            // Cancellation must reach an in-flight run, so
                            // it is handled here; reruns execute on their
                            // own task and the loop keeps draining. A rerun
                            // arriving while one runs hits the is_running
                            // guard and is dropped, never queued.
                            CommandEvent::CancelPipeline => engine.cancel().await,
                            CommandEvent::RerunPipeline => {
                                tokio::spawn(async move {
                                    engine.rerun_pipeline().await;
                                });
                            }
                            CommandEvent::RerunStep { step_name } => {
                                tokio::spawn(async move {
                                    engine.rerun_step(&step_name).await;
                                });
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "command channel lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }

    /// Runs the whole pipeline, step by step.
    ///
    /// Stops at the first failing step; the triggering error is returned
    /// after it has been reported on the event channel.
    pub async fn run(&self) -> RunnerResult<()> {
        if !self.state.lock().begin() {
            self.bus.publish(PipelineEvent::Info {
                message: "Pipeline is already running".to_string(),
            });
            return Ok(());
        }
        self.cancel_requested.store(false, Ordering::SeqCst);

        let result = self.run_inner().await;
        self.state.lock().end();
        result
    }

    async fn run_inner(&self) -> RunnerResult<()> {
        tracing::info!(pipeline = %self.pipeline.name, "pipeline run started");
        self.bus.publish(PipelineEvent::PipelineStart);
        self.bus.publish(PipelineEvent::PipelineSteps {
            steps: self.pipeline.step_names(),
        });

        for (position, step) in self.pipeline.steps.iter().enumerate() {
            // Cancellation is cooperative, checked at step boundaries.
            if self.cancel_requested.load(Ordering::SeqCst) {
                return self.report_cancelled();
            }
            self.execute_step(step, position).await?;
        }

        self.bus.publish(PipelineEvent::PipelineComplete);
        tracing::info!(pipeline = %self.pipeline.name, "pipeline run complete");
        Ok(())
    }

    /// Reruns the whole pipeline from scratch. Errors are swallowed here
    /// because they were already reported via events.
    pub async fn rerun_pipeline(&self) {
        if let Err(e) = self.run().await {
            tracing::debug!(error = %e, "rerun failed");
        }
    }

    /// Reruns a single named step without touching any other step's
    /// recorded state.
    pub async fn rerun_step(&self, step_name: &str) {
        if !self.state.lock().begin() {
            self.bus.publish(PipelineEvent::Info {
                message: "Pipeline is already running".to_string(),
            });
            return;
        }
        self.cancel_requested.store(false, Ordering::SeqCst);

        let result = self.run_single_step(step_name).await;
        self.state.lock().end();
        if let Err(e) = result {
            tracing::debug!(step = %step_name, error = %e, "step rerun failed");
        }
    }

    async fn run_single_step(&self, step_name: &str) -> RunnerResult<()> {
        let Some((position, step)) = self.pipeline.step_by_name(step_name) else {
            let error = RunnerError::Configuration(format!("step \"{step_name}\" does not exist"));
            self.bus.publish(PipelineEvent::Error {
                message: error.to_string(),
            });
            return Err(error);
        };

        // Synthetic start/steps pair so observers reset their view.
        self.bus.publish(PipelineEvent::PipelineStart);
        self.bus.publish(PipelineEvent::PipelineSteps {
            steps: self.pipeline.step_names(),
        });

        self.execute_step(step, position).await?;
        self.bus.publish(PipelineEvent::PipelineComplete);
        Ok(())
    }

    /// Requests cancellation: no further step is dispatched, and the
    /// active step's container is torn down through the same path
    /// failures use.
    pub async fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.cancel_requested.store(true, Ordering::SeqCst);
        self.instances.teardown_active().await;
    }

    fn report_cancelled(&self) -> RunnerResult<()> {
        let error = RunnerError::Cancelled;
        self.bus.publish(PipelineEvent::Info {
            message: error.to_string(),
        });
        self.bus.publish(PipelineEvent::PipelineError {
            message: error.to_string(),
        });
        Err(error)
    }

    async fn execute_step(&self, step: &Step, position: usize) -> RunnerResult<()> {
        let name = step.display_name(position);
        tracing::info!(step = %name, "executing step");
        self.bus.publish(PipelineEvent::StepStart {
            step_name: name.clone(),
        });

        let result = self.run_step_phases(step).await;
        match &result {
            Ok(()) => {
                self.bus.publish(PipelineEvent::StepComplete { step_name: name });
            }
            Err(e) => {
                // No orphaned containers on failure paths; teardown is a
                // no-op when the script path already removed the instance.
                self.instances.teardown_active().await;
                self.bus.publish(PipelineEvent::StepError {
                    step_name: name.clone(),
                    message: e.to_string(),
                });
                tracing::error!(step = %name, error = %e, "step failed");
            }
        }
        result
    }

    async fn run_step_phases(&self, step: &Step) -> RunnerResult<()> {
        // Configuration error, detected before any container work.
        if step.script.is_empty() {
            return Err(RunnerError::Configuration(
                "step script is empty".to_string(),
            ));
        }

        let docker_checked = self.state.lock().docker_checked;
        if !docker_checked {
            self.instances.check_availability().await?;
            self.state.lock().docker_checked = true;
        }

        let image = step.image.as_deref().unwrap_or(&self.default_image);
        let handle = self.instances.create_instance(image, &self.variables).await?;

        self.artifacts.upload_artifacts(handle.id()).await?;

        let total = step.script.len();
        for (index, command) in step.script.iter().enumerate() {
            self.instances
                .run_instance_script(&handle, command, index + 1, total)
                .await?;
        }

        self.artifacts
            .generate_artifacts(handle.id(), &step.artifacts)
            .await?;

        self.instances.remove_instance(&handle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventEnvelope;
    use pretty_assertions::assert_eq;

    fn drain(sub: &mut crate::events::PipelineSubscription) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Ok(EventEnvelope { event, .. }) = sub.try_recv() {
            events.push(event);
        }
        events
    }

    fn build_engine(
        pipeline: Pipeline,
        workdir: &std::path::Path,
    ) -> (Arc<Engine>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let docker = Arc::new(Docker::connect_with_local_defaults().unwrap());
        let engine = Engine::new(
            EngineOptions {
                pipeline,
                default_image: "alpine:3".to_string(),
                variables: Vec::new(),
                workspace: workdir.to_path_buf(),
                paths: ScratchPaths::new(workdir),
            },
            bus.clone(),
            docker,
        )
        .unwrap();
        (engine, bus)
    }

    #[test]
    fn test_run_state_guard() {
        let mut state = EngineRunState::default();
        assert!(state.begin());
        assert!(!state.begin());
        state.end();
        assert!(state.begin());
    }

    #[test]
    fn test_run_state_reset_clears_docker_checked() {
        let mut state = EngineRunState::default();
        assert!(state.begin());
        state.docker_checked = true;
        state.end();
        assert!(state.begin());
        assert!(!state.docker_checked);
    }

    #[tokio::test]
    async fn test_empty_script_fails_before_container_work() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            "default",
            vec![Step::new(Vec::new()).with_name("Broken")],
        );
        let (engine, bus) = build_engine(pipeline, dir.path());
        let mut sub = bus.subscribe();

        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, RunnerError::Configuration(_)));

        let events = drain(&mut sub);
        assert_eq!(events[0], PipelineEvent::PipelineStart);
        assert_eq!(
            events[1],
            PipelineEvent::PipelineSteps {
                steps: vec!["Broken".to_string()]
            }
        );
        assert_eq!(
            events[2],
            PipelineEvent::StepStart {
                step_name: "Broken".to_string()
            }
        );
        assert!(matches!(
            &events[3],
            PipelineEvent::StepError { step_name, .. } if step_name == "Broken"
        ));
        // No docker activity, no pipeline:complete.
        assert_eq!(events.len(), 4);
    }

    #[tokio::test]
    async fn test_rerun_unknown_step_reports_error_event() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            "default",
            vec![Step::new(vec!["echo hi".to_string()]).with_name("Build")],
        );
        let (engine, bus) = build_engine(pipeline, dir.path());
        let mut sub = bus.subscribe();

        engine.rerun_step("Deploy").await;

        let events = drain(&mut sub);
        assert!(matches!(
            &events[0],
            PipelineEvent::Error { message } if message.contains("Deploy")
        ));
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_commands_reach_engine_while_run_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            "default",
            vec![Step::new(vec!["echo hi".to_string()]).with_name("Build")],
        );
        let (engine, bus) = build_engine(pipeline, dir.path());
        let mut sub = bus.subscribe();

        // Hold the run slot as if a run were executing.
        assert!(engine.state.lock().begin());

        bus.publish_command(CommandEvent::RerunPipeline);
        bus.publish_command(CommandEvent::CancelPipeline);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // Cancellation landed even though a rerun command came first.
        assert!(engine.cancel_requested.load(Ordering::SeqCst));

        // The rerun was rejected and dropped: one info event, no run.
        let events = drain(&mut sub);
        let rejections = events
            .iter()
            .filter(|e| {
                matches!(e, PipelineEvent::Info { message } if message == "Pipeline is already running")
            })
            .count();
        assert_eq!(rejections, 1);
        assert!(!events.contains(&PipelineEvent::PipelineStart));
    }

    #[tokio::test]
    async fn test_cancel_before_first_step_reports_and_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(
            "default",
            vec![Step::new(vec!["echo hi".to_string()]).with_name("Build")],
        );
        let (engine, bus) = build_engine(pipeline, dir.path());
        let mut sub = bus.subscribe();

        // Flag set before run: the boundary check fires before step one.
        engine.cancel_requested.store(true, Ordering::SeqCst);
        let result = engine.run_inner().await;
        assert!(matches!(result, Err(RunnerError::Cancelled)));

        let events = drain(&mut sub);
        assert!(events.contains(&PipelineEvent::PipelineError {
            message: "Pipeline cancelled".to_string()
        }));
        assert!(!events.iter().any(|e| matches!(e, PipelineEvent::StepStart { .. })));
    }
}
