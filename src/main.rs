//! pipelocal - run Bitbucket-style pipelines in local Docker containers
//!
//! ```bash
//! pipelocal run                      # default pipeline
//! pipelocal run custom:deploy       # a custom pipeline
//! pipelocal list                    # pipelines in the template
//! ```

use std::process::ExitCode;

use pipelocal::infrastructure::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    // Tracing goes to stderr and stays quiet unless asked for.
    if let Ok(level) = std::env::var("PIPELOCAL_DEBUG") {
        let level = if level.is_empty() { "debug" } else { &level };
        init_logging(level);
    }

    match pipelocal::cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            if std::env::var("PIPELOCAL_VERBOSE").is_ok() {
                eprintln!("{e:?}");
            }
            ExitCode::FAILURE
        }
    }
}
