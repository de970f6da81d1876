//! Console rendering of pipeline events.
//!
//! Subscribes to the event channel and prints a colored, human-readable
//! trace of the run. Script output is passed through untouched so the
//! container's own coloring survives.

use std::sync::Arc;

use colored::Colorize;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::events::{EventBus, PipelineEvent};

/// Spawns a task that prints every pipeline event until the bus closes.
pub fn spawn_console_observer(bus: Arc<EventBus>) -> JoinHandle<()> {
    let mut subscription = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match subscription.recv().await {
                Ok(envelope) => render(&envelope.event),
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "console observer lagged behind the event channel");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn render(event: &PipelineEvent) {
    match event {
        PipelineEvent::PipelineStart => {
            println!("{}", "Starting pipeline".bold());
        }
        PipelineEvent::PipelineSteps { steps } => {
            println!("{} {}", "Steps:".bold(), steps.join(", "));
        }
        PipelineEvent::PipelineComplete => {
            println!("{}", "Pipeline completed successfully".green().bold());
        }
        PipelineEvent::PipelineError { message } => {
            eprintln!("{} {}", "Pipeline failed:".red().bold(), message.red());
        }
        PipelineEvent::StepStart { step_name } => {
            println!();
            println!("{} {}", "==>".cyan().bold(), step_name.bold());
        }
        PipelineEvent::StepComplete { step_name } => {
            println!("{} {}", "ok".green().bold(), step_name);
        }
        PipelineEvent::StepError { step_name, message } => {
            eprintln!("{} {}: {}", "failed".red().bold(), step_name, message.red());
        }
        PipelineEvent::ScriptStart {
            sanitized_script,
            index,
            total,
            ..
        } => {
            println!(
                "{} {}",
                format!("[{index}/{total}] $").dimmed(),
                sanitized_script.bold()
            );
        }
        PipelineEvent::ScriptOutput { text, stderr } => {
            if *stderr {
                eprintln!("{text}");
            } else {
                println!("{text}");
            }
        }
        PipelineEvent::ScriptComplete => {
            println!("{}", "Script executed successfully".dimmed());
        }
        PipelineEvent::ScriptError { message } => {
            eprintln!("{}", message.red());
        }
        PipelineEvent::DockerChecking => {
            println!("{}", "Checking Docker availability...".dimmed());
        }
        PipelineEvent::DockerAvailable => {
            println!("{}", "Docker is available".dimmed());
        }
        PipelineEvent::DockerUnavailable { message } => {
            eprintln!("{} {}", "Docker is not available:".red().bold(), message.red());
        }
        PipelineEvent::ImagePulling { image } => {
            println!("{} {}", "Pulling image".dimmed(), image.dimmed());
        }
        PipelineEvent::ImagePulled { image, cached } => {
            if *cached {
                println!("{} {} {}", "Image".dimmed(), image.dimmed(), "(cached)".dimmed());
            } else {
                println!("{} {}", "Image pulled:".dimmed(), image.dimmed());
            }
        }
        PipelineEvent::InstanceCreating { image } => {
            println!("{} {}", "Creating container from".dimmed(), image.dimmed());
        }
        PipelineEvent::InstanceCreated { short_id, .. } => {
            println!("{} {}", "Container created:".dimmed(), short_id.dimmed());
        }
        PipelineEvent::InstanceCopying => {
            println!("{}", "Copying project files to container".dimmed());
        }
        PipelineEvent::InstanceCopied => {
            println!("{}", "Project files copied".dimmed());
        }
        PipelineEvent::InstanceStarted => {
            println!("{}", "Container started".dimmed());
        }
        PipelineEvent::InstanceStopping => {
            println!("{}", "Stopping container".dimmed());
        }
        PipelineEvent::InstanceStopped => {
            println!("{}", "Container stopped".dimmed());
        }
        PipelineEvent::ArtifactsUploading => {
            println!("{}", "Uploading artifacts from previous steps".dimmed());
        }
        PipelineEvent::ArtifactsUploaded { count } => {
            println!("{}", format!("Uploaded {count} artifact file(s)").dimmed());
        }
        PipelineEvent::ArtifactsGenerating { patterns } => {
            println!(
                "{} {}",
                "Collecting artifacts:".dimmed(),
                patterns.join(", ").dimmed()
            );
        }
        PipelineEvent::ArtifactsGenerated { count, path } => {
            println!(
                "{}",
                format!("Stored {count} artifact file(s) in {path}").dimmed()
            );
        }
        PipelineEvent::Info { message } => {
            println!("{}", message.dimmed());
        }
        PipelineEvent::Error { message } => {
            eprintln!("{}", message.red());
        }
    }
}
