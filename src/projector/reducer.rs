//! The pure fold from events to snapshots.
//!
//! `reduce` is total over every event variant and never touches a clock
//! or any other ambient state; step timestamps come from the event
//! envelope. Selection follows the active step automatically until the
//! observer navigates manually, and snaps back to auto-follow when the
//! step they were watching completes.

use chrono::{DateTime, Utc};

use crate::events::{EventEnvelope, PipelineEvent};

use super::{
    LineKind, OutputLine, RunStatus, ScriptPhase, ScriptSnapshot, ScriptStatus, Snapshot,
    StepSnapshot, StepStatus,
};

/// Input to the reducer: either an observer navigation or an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// The observer selected a step to look at.
    SelectStep(usize),
    /// A pipeline event arrived.
    Event(EventEnvelope),
}

/// Snapshot plus the internal tracking the fold needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectorState {
    snapshot: Snapshot,
    /// Step currently receiving output; distinct from the selected step,
    /// which is what the observer is looking at.
    active_step_index: Option<usize>,
    /// Set once the observer navigates manually; suppresses auto-follow.
    is_user_selected: bool,
    /// Phase that low-level events without a phase tag belong to.
    current_phase: ScriptPhase,
}

impl ProjectorState {
    /// Initial state for a named pipeline.
    #[must_use]
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            snapshot: Snapshot::initial(pipeline_name),
            active_step_index: None,
            is_user_selected: false,
            current_phase: ScriptPhase::Setup,
        }
    }

    /// The current renderable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

/// Folds one action into the state.
#[must_use]
pub fn reduce(mut state: ProjectorState, action: &Action) -> ProjectorState {
    match action {
        Action::SelectStep(index) => {
            if !state.snapshot.steps.is_empty() {
                state.snapshot.selected_step_index =
                    (*index).min(state.snapshot.steps.len() - 1);
                state.is_user_selected = true;
            }
            state
        }
        Action::Event(envelope) => apply_event(state, &envelope.event, envelope.timestamp),
    }
}

fn apply_event(
    mut state: ProjectorState,
    event: &PipelineEvent,
    at: DateTime<Utc>,
) -> ProjectorState {
    match event {
        PipelineEvent::PipelineStart => {
            state.snapshot.status = RunStatus::Running;
            state.snapshot.steps.clear();
            state.snapshot.selected_step_index = 0;
            state.snapshot.global_output.clear();
            state.active_step_index = None;
            state.is_user_selected = false;
            state.current_phase = ScriptPhase::Setup;
            state
        }

        PipelineEvent::PipelineSteps { steps } => {
            state.snapshot.steps = steps
                .iter()
                .map(|name| StepSnapshot::pending(name.clone()))
                .collect();
            state
        }

        PipelineEvent::PipelineComplete => {
            state.snapshot.status = RunStatus::Success;
            add_output(
                state,
                OutputLine::new("Pipeline completed successfully", LineKind::Success),
            )
        }

        PipelineEvent::PipelineError { message } => {
            state.snapshot.status = RunStatus::Failed;
            add_output(
                state,
                OutputLine::new(format!("Error: {message}"), LineKind::Error),
            )
        }

        PipelineEvent::StepStart { step_name } => {
            let existing = state
                .snapshot
                .steps
                .iter()
                .position(|s| s.name == *step_name);

            let active = match existing {
                Some(index) => {
                    let step = &mut state.snapshot.steps[index];
                    step.status = StepStatus::Running;
                    step.started_at = Some(at);
                    index
                }
                None => {
                    // Steps are normally pre-seeded; tolerate a bare start.
                    let mut step = StepSnapshot::pending(step_name.clone());
                    step.status = StepStatus::Running;
                    step.started_at = Some(at);
                    state.snapshot.steps.push(step);
                    state.snapshot.steps.len() - 1
                }
            };

            state.active_step_index = Some(active);
            if !state.is_user_selected {
                state.snapshot.selected_step_index = active;
            }
            state
        }

        PipelineEvent::StepComplete { step_name } => {
            let completed = state
                .snapshot
                .steps
                .iter()
                .position(|s| s.name == *step_name);

            if let Some(index) = completed {
                let step = &mut state.snapshot.steps[index];
                step.status = StepStatus::Success;
                step.ended_at = Some(at);

                // Auto-advance when the observer was watching the step
                // that just finished; this re-arms auto-follow.
                if index == state.snapshot.selected_step_index
                    && index + 1 < state.snapshot.steps.len()
                {
                    state.snapshot.selected_step_index = index + 1;
                    state.is_user_selected = false;
                }
            }
            state
        }

        PipelineEvent::StepError { step_name, message } => {
            if let Some(step) = state
                .snapshot
                .steps
                .iter_mut()
                .find(|s| s.name == *step_name)
            {
                step.status = StepStatus::Failed;
                step.ended_at = Some(at);
            }
            state.snapshot.status = RunStatus::Failed;
            add_output(
                state,
                OutputLine::new(format!("Error: {message}"), LineKind::Error),
            )
        }

        PipelineEvent::ScriptStart {
            sanitized_script, ..
        } => {
            state.current_phase = ScriptPhase::Script;
            start_script(state, sanitized_script, ScriptPhase::Script)
        }

        PipelineEvent::ScriptOutput { text, stderr } => {
            let kind = if *stderr {
                LineKind::Stderr
            } else {
                LineKind::Stdout
            };
            add_output(state, OutputLine::new(text.clone(), kind))
        }

        PipelineEvent::ScriptComplete => complete_script(state, true),

        PipelineEvent::ScriptError { message } => {
            let mut state = complete_script(state, false);
            state = add_output(
                state,
                OutputLine::new(message.clone(), LineKind::Error),
            );
            fail_active_step(state, at)
        }

        PipelineEvent::DockerChecking => {
            let state = ensure_setup_script(state);
            add_output(
                state,
                OutputLine::new("Checking Docker availability...", LineKind::Info),
            )
        }

        PipelineEvent::DockerAvailable => add_output(
            state,
            OutputLine::new("Docker is available", LineKind::Success),
        ),

        PipelineEvent::DockerUnavailable { .. } => {
            let state = add_output(
                state,
                OutputLine::new("Docker is not available", LineKind::Error),
            );
            let state = complete_script(state, false);
            fail_active_step(state, at)
        }

        PipelineEvent::ImagePulling { image } => add_output(
            state,
            OutputLine::new(format!("Pulling image: {image}"), LineKind::Info),
        ),

        PipelineEvent::ImagePulled { image, cached } => {
            let text = if *cached {
                format!("Image ready (cached): {image}")
            } else {
                format!("Image ready: {image}")
            };
            add_output(state, OutputLine::new(text, LineKind::Success))
        }

        PipelineEvent::InstanceCreating { image } => {
            let state = ensure_setup_script(state);
            add_output(
                state,
                OutputLine::new(
                    format!("Creating container from \"{image}\""),
                    LineKind::Info,
                ),
            )
        }

        PipelineEvent::InstanceCreated { short_id, .. } => add_output(
            state,
            OutputLine::new(format!("Container created: {short_id}"), LineKind::Info),
        ),

        PipelineEvent::InstanceCopying => add_output(
            state,
            OutputLine::new("Copying project files to container", LineKind::Info),
        ),

        PipelineEvent::InstanceCopied => add_output(
            state,
            OutputLine::new("Project files copied to container", LineKind::Info),
        ),

        PipelineEvent::InstanceStarted => {
            let state = add_output(
                state,
                OutputLine::new("Container started", LineKind::Success),
            );
            complete_script(state, true)
        }

        PipelineEvent::InstanceStopping => {
            state.current_phase = ScriptPhase::Cleanup;
            let state = start_script(state, "Cleaning up", ScriptPhase::Cleanup);
            add_output(
                state,
                OutputLine::new("Stopping and removing container", LineKind::Info),
            )
        }

        PipelineEvent::InstanceStopped => {
            let state = add_output(
                state,
                OutputLine::new("Container stopped", LineKind::Info),
            );
            complete_script(state, true)
        }

        PipelineEvent::ArtifactsUploading => start_script(
            state,
            "Uploading artifacts",
            ScriptPhase::ArtifactsUpload,
        ),

        PipelineEvent::ArtifactsUploaded { count } => {
            let state = add_output(
                state,
                OutputLine::new(
                    format!("Uploaded {count} artifact file(s)"),
                    LineKind::Success,
                ),
            );
            complete_script(state, true)
        }

        PipelineEvent::ArtifactsGenerating { patterns } => {
            let mut state = start_script(
                state,
                "Downloading artifacts",
                ScriptPhase::ArtifactsDownload,
            );
            if !patterns.is_empty() {
                state = add_output(
                    state,
                    OutputLine::new(
                        format!("Patterns: {}", patterns.join(", ")),
                        LineKind::Info,
                    ),
                );
            }
            state
        }

        PipelineEvent::ArtifactsGenerated { count, path } => {
            let state = add_output(
                state,
                OutputLine::new(
                    format!("Stored {count} artifact file(s) in {path}"),
                    LineKind::Success,
                ),
            );
            complete_script(state, true)
        }

        PipelineEvent::Info { message } => {
            add_output(state, OutputLine::new(message.clone(), LineKind::Info))
        }

        PipelineEvent::Error { message } => {
            add_output(state, OutputLine::new(message.clone(), LineKind::Error))
        }
    }
}

/// Appends a line to the active step (and its latest script), or to the
/// global output when no step is active yet.
fn add_output(mut state: ProjectorState, line: OutputLine) -> ProjectorState {
    match state.active_step_index {
        Some(index) if index < state.snapshot.steps.len() => {
            let step = &mut state.snapshot.steps[index];
            if let Some(script) = step.scripts.last_mut() {
                script.lines.push(line.clone());
            }
            step.output.push(line);
        }
        _ => state.snapshot.global_output.push(line),
    }
    state
}

/// Opens a new script under the active step.
fn start_script(
    mut state: ProjectorState,
    command: &str,
    phase: ScriptPhase,
) -> ProjectorState {
    if let Some(index) = state.active_step_index {
        if index < state.snapshot.steps.len() {
            let step = &mut state.snapshot.steps[index];
            step.output
                .push(OutputLine::new(command, LineKind::Command));
            step.scripts.push(ScriptSnapshot {
                command: command.to_string(),
                phase,
                status: ScriptStatus::Running,
                lines: Vec::new(),
            });
        }
    }
    state
}

/// Closes the most recently opened script. The transition is terminal;
/// an already-closed script is left untouched.
fn complete_script(mut state: ProjectorState, success: bool) -> ProjectorState {
    if let Some(index) = state.active_step_index {
        if index < state.snapshot.steps.len() {
            if let Some(script) = state.snapshot.steps[index]
                .scripts
                .iter_mut()
                .rev()
                .find(|s| s.status == ScriptStatus::Running)
            {
                script.status = if success {
                    ScriptStatus::Success
                } else {
                    ScriptStatus::Failed
                };
            }
        }
    }
    state
}

/// Opens the synthetic setup script exactly once per step, so setup
/// activity is visually grouped without an explicit `script:start`.
fn ensure_setup_script(mut state: ProjectorState) -> ProjectorState {
    let has_setup = state
        .active_step_index
        .and_then(|i| state.snapshot.steps.get(i))
        .is_some_and(|step| step.scripts.iter().any(|s| s.phase == ScriptPhase::Setup));

    if !has_setup {
        state.current_phase = ScriptPhase::Setup;
        state = start_script(state, "Setting up container", ScriptPhase::Setup);
    }
    state
}

/// Marks the active step and the pipeline failed.
fn fail_active_step(mut state: ProjectorState, at: DateTime<Utc>) -> ProjectorState {
    if let Some(index) = state.active_step_index {
        if let Some(step) = state.snapshot.steps.get_mut(index) {
            step.status = StepStatus::Failed;
            step.ended_at = Some(at);
        }
    }
    state.snapshot.status = RunStatus::Failed;
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn at(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, seconds).unwrap()
    }

    fn event(seconds: u32, event: PipelineEvent) -> Action {
        Action::Event(EventEnvelope::at(event, at(seconds)))
    }

    fn run_log(actions: &[Action]) -> ProjectorState {
        actions
            .iter()
            .fold(ProjectorState::new("default"), |state, action| {
                reduce(state, action)
            })
    }

    fn two_step_start() -> Vec<Action> {
        vec![
            event(0, PipelineEvent::PipelineStart),
            event(
                0,
                PipelineEvent::PipelineSteps {
                    steps: vec!["A".to_string(), "B".to_string()],
                },
            ),
        ]
    }

    #[test]
    fn test_pipeline_steps_seeds_pending() {
        let state = run_log(&two_step_start());
        let snapshot = state.snapshot();

        assert_eq!(snapshot.status, RunStatus::Running);
        assert_eq!(snapshot.steps.len(), 2);
        assert!(snapshot.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_step_start_activates_and_follows() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "B".to_string(),
            },
        ));
        let state = run_log(&actions);

        assert_eq!(state.snapshot().steps[1].status, StepStatus::Running);
        assert_eq!(state.snapshot().steps[1].started_at, Some(at(1)));
        assert_eq!(state.snapshot().selected_step_index, 1);
    }

    #[test]
    fn test_step_complete_auto_advances_selection() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "A".to_string(),
            },
        ));
        actions.push(event(
            2,
            PipelineEvent::StepComplete {
                step_name: "A".to_string(),
            },
        ));
        let state = run_log(&actions);

        assert_eq!(state.snapshot().steps[0].status, StepStatus::Success);
        assert_eq!(state.snapshot().selected_step_index, 1);
    }

    #[test]
    fn test_manual_selection_suppresses_auto_follow() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "A".to_string(),
            },
        ));
        actions.push(Action::SelectStep(0));
        actions.push(event(
            2,
            PipelineEvent::StepStart {
                step_name: "B".to_string(),
            },
        ));
        let state = run_log(&actions);

        // User pinned step A; the running step moved on without them.
        assert_eq!(state.snapshot().selected_step_index, 0);
    }

    #[test]
    fn test_select_step_clamps_to_bounds() {
        let mut actions = two_step_start();
        actions.push(Action::SelectStep(99));
        let state = run_log(&actions);
        assert_eq!(state.snapshot().selected_step_index, 1);
    }

    #[test]
    fn test_output_before_first_step_goes_global() {
        let actions = vec![
            event(0, PipelineEvent::PipelineStart),
            event(
                0,
                PipelineEvent::Info {
                    message: "warming up".to_string(),
                },
            ),
        ];
        let state = run_log(&actions);

        assert_eq!(state.snapshot().global_output.len(), 1);
        assert_eq!(state.snapshot().global_output[0].kind, LineKind::Info);
    }

    #[test]
    fn test_script_lifecycle_under_active_step() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "A".to_string(),
            },
        ));
        actions.push(event(
            1,
            PipelineEvent::ScriptStart {
                script: "echo hi".to_string(),
                index: 1,
                total: 1,
                sanitized_script: "echo hi".to_string(),
            },
        ));
        actions.push(event(
            1,
            PipelineEvent::ScriptOutput {
                text: "hi".to_string(),
                stderr: false,
            },
        ));
        actions.push(event(2, PipelineEvent::ScriptComplete));
        let state = run_log(&actions);

        let step = &state.snapshot().steps[0];
        assert_eq!(step.scripts.len(), 1);
        assert_eq!(step.scripts[0].phase, ScriptPhase::Script);
        assert_eq!(step.scripts[0].status, ScriptStatus::Success);
        assert_eq!(step.scripts[0].lines, vec![OutputLine::new("hi", LineKind::Stdout)]);
        // Command line plus the output line.
        assert_eq!(step.output.len(), 2);
    }

    #[test]
    fn test_script_error_fails_step_and_pipeline() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "B".to_string(),
            },
        ));
        actions.push(event(
            1,
            PipelineEvent::ScriptStart {
                script: "exit 1".to_string(),
                index: 1,
                total: 1,
                sanitized_script: "exit 1".to_string(),
            },
        ));
        actions.push(event(
            2,
            PipelineEvent::ScriptError {
                message: "Script failed with exit code \"1\"".to_string(),
            },
        ));
        let state = run_log(&actions);

        assert_eq!(state.snapshot().status, RunStatus::Failed);
        assert_eq!(state.snapshot().steps[1].status, StepStatus::Failed);
        assert_eq!(state.snapshot().steps[1].ended_at, Some(at(2)));
        assert_eq!(
            state.snapshot().steps[1].scripts[0].status,
            ScriptStatus::Failed
        );
    }

    #[test]
    fn test_setup_script_opens_lazily_exactly_once() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "A".to_string(),
            },
        ));
        actions.push(event(1, PipelineEvent::DockerChecking));
        actions.push(event(
            1,
            PipelineEvent::InstanceCreating {
                image: "alpine:3".to_string(),
            },
        ));
        actions.push(event(2, PipelineEvent::InstanceStarted));
        let state = run_log(&actions);

        let step = &state.snapshot().steps[0];
        let setups: Vec<_> = step
            .scripts
            .iter()
            .filter(|s| s.phase == ScriptPhase::Setup)
            .collect();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0].status, ScriptStatus::Success);
    }

    #[test]
    fn test_pipeline_start_resets_everything() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "A".to_string(),
            },
        ));
        actions.push(Action::SelectStep(1));
        actions.push(event(3, PipelineEvent::PipelineStart));
        let state = run_log(&actions);

        assert!(state.snapshot().steps.is_empty());
        assert_eq!(state.snapshot().selected_step_index, 0);
        assert!(!state.is_user_selected);
        assert_eq!(state.snapshot().status, RunStatus::Running);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let mut actions = two_step_start();
        actions.push(event(
            1,
            PipelineEvent::StepStart {
                step_name: "A".to_string(),
            },
        ));
        actions.push(event(1, PipelineEvent::DockerChecking));
        actions.push(event(
            1,
            PipelineEvent::ScriptStart {
                script: "echo hi".to_string(),
                index: 1,
                total: 1,
                sanitized_script: "echo hi".to_string(),
            },
        ));
        actions.push(event(
            2,
            PipelineEvent::ScriptOutput {
                text: "hi".to_string(),
                stderr: false,
            },
        ));
        actions.push(event(2, PipelineEvent::ScriptComplete));
        actions.push(event(
            3,
            PipelineEvent::StepComplete {
                step_name: "A".to_string(),
            },
        ));
        actions.push(event(4, PipelineEvent::PipelineComplete));

        let first = run_log(&actions);
        let second = run_log(&actions);
        assert_eq!(first, second);
    }

    #[test]
    fn test_failure_scenario_event_order() {
        // Pipeline `default` = [A: echo hi, B: exit 1].
        let mut actions = two_step_start();
        for action in [
            event(1, PipelineEvent::StepStart { step_name: "A".to_string() }),
            event(
                1,
                PipelineEvent::ScriptStart {
                    script: "echo hi".to_string(),
                    index: 1,
                    total: 1,
                    sanitized_script: "echo hi".to_string(),
                },
            ),
            event(1, PipelineEvent::ScriptOutput { text: "hi".to_string(), stderr: false }),
            event(2, PipelineEvent::ScriptComplete),
            event(2, PipelineEvent::StepComplete { step_name: "A".to_string() }),
            event(3, PipelineEvent::StepStart { step_name: "B".to_string() }),
            event(
                3,
                PipelineEvent::ScriptStart {
                    script: "exit 1".to_string(),
                    index: 1,
                    total: 1,
                    sanitized_script: "exit 1".to_string(),
                },
            ),
            event(
                4,
                PipelineEvent::ScriptError {
                    message: "Script failed with exit code \"1\"".to_string(),
                },
            ),
            event(
                4,
                PipelineEvent::StepError {
                    step_name: "B".to_string(),
                    message: "Script failed with exit code \"1\"".to_string(),
                },
            ),
        ] {
            actions.push(action);
        }
        let state = run_log(&actions);

        assert_eq!(state.snapshot().status, RunStatus::Failed);
        assert_eq!(state.snapshot().steps[0].status, StepStatus::Success);
        assert_eq!(state.snapshot().steps[1].status, StepStatus::Failed);
    }
}
