//! The `run` and `list` commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use bollard::Docker;
use colored::Colorize;
use tracing::debug;

use crate::console::spawn_console_observer;
use crate::engine::{Engine, EngineOptions};
use crate::events::EventBus;
use crate::infrastructure::{Configuration, Environment, ScratchPaths};

/// Loads the template, wires the event channel and engine together and
/// drives the named pipeline to completion.
pub async fn run_pipeline(
    name: &str,
    template: &Path,
    variables: Option<&str>,
) -> Result<()> {
    let configuration = Configuration::from_file(template)
        .with_context(|| format!("failed to load template {}", template.display()))?;
    let pipeline = configuration.pipeline_by_name(name)?;
    let environment = Environment::parse(variables)?;

    let workspace = std::env::current_dir().context("failed to resolve working directory")?;
    let paths = ScratchPaths::new(&workspace);

    let bus = Arc::new(EventBus::new());
    let observer = spawn_console_observer(bus.clone());

    let docker =
        Arc::new(Docker::connect_with_local_defaults().context("failed to connect to Docker")?);

    debug!(pipeline = name, steps = pipeline.steps.len(), "starting run");

    let engine = Engine::new(
        EngineOptions {
            pipeline,
            default_image: configuration.default_image(),
            variables: environment.container_format_variables(),
            workspace,
            paths,
        },
        bus.clone(),
        docker,
    )?;

    let outcome = engine.run().await;

    // Close the event channel so the observer drains and exits.
    drop(engine);
    drop(bus);
    let _ = observer.await;

    outcome?;
    Ok(())
}

/// Prints the pipelines a template defines.
pub fn list_pipelines(template: &Path) -> Result<()> {
    let configuration = Configuration::from_file(template)
        .with_context(|| format!("failed to load template {}", template.display()))?;

    let pipelines = configuration.available_pipelines();
    if pipelines.is_empty() {
        println!("No pipelines defined in {}", template.display());
        return Ok(());
    }

    println!("{}", "Available pipelines:".bold());
    for name in pipelines {
        let steps = configuration.pipeline_step_names(&name)?;
        println!("  {} ({})", name.cyan(), steps.join(", "));
    }
    Ok(())
}
