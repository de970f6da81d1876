//! Command-line interface for pipelocal
//!
//! Provides the commands exposed by the `pipelocal` binary:
//! - `run`: Execute a pipeline from a Bitbucket-style YAML template
//! - `list`: Show the pipelines a template defines

pub mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default template looked up next to the working directory.
const DEFAULT_TEMPLATE: &str = "bitbucket-pipelines.yml";

/// CLI arguments for pipelocal
#[derive(Parser, Debug)]
#[command(name = "pipelocal")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a pipeline inside a local Docker container
    Run {
        /// Pipeline to run, e.g. "default" or "branches:main"
        #[arg(default_value = "default")]
        pipeline: String,
        /// Pipeline template file
        #[arg(short, long, default_value = DEFAULT_TEMPLATE)]
        template: PathBuf,
        /// Variables as KEY=VALUE pairs separated by commas, or a path
        /// to an env file
        #[arg(short, long)]
        variables: Option<String>,
    },

    /// List the pipelines defined in a template
    List {
        /// Pipeline template file
        #[arg(short, long, default_value = DEFAULT_TEMPLATE)]
        template: PathBuf,
    },
}

/// Parse and execute CLI arguments
pub async fn run() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Run {
            pipeline,
            template,
            variables,
        } => {
            run::run_pipeline(&pipeline, &template, variables.as_deref()).await?;
        }
        Command::List { template } => {
            run::list_pipelines(&template)?;
        }
    }

    Ok(())
}
