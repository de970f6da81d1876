//! Environment variable handling
//!
//! Turns the CLI `--variables` option into `KEY=VALUE` strings ready for
//! direct injection into a container's environment. The option accepts
//! either a comma-separated list (`KEY1=V1,KEY2=V2`) or a path to an
//! env file with one assignment per line.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::pipeline::{RunnerError, RunnerResult};

static ASSIGNMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*=.*$").unwrap());

/// Parsed variable set for one run.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    variables: Vec<String>,
}

impl Environment {
    /// Builds an empty variable set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the raw `--variables` option value.
    ///
    /// A value naming an existing file is read as an env file; anything
    /// else is treated as a comma-separated assignment list.
    pub fn parse(raw: Option<&str>) -> RunnerResult<Self> {
        let Some(raw) = raw else {
            return Ok(Self::new());
        };

        if std::path::Path::new(raw).is_file() {
            let content = std::fs::read_to_string(raw).map_err(|e| {
                RunnerError::Configuration(format!("cannot read env file \"{raw}\": {e}"))
            })?;
            return Self::from_lines(content.lines());
        }

        Self::from_lines(raw.split(','))
    }

    fn from_lines<'a>(lines: impl Iterator<Item = &'a str>) -> RunnerResult<Self> {
        let mut variables = Vec::new();

        for line in lines {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if !ASSIGNMENT_RE.is_match(line) {
                return Err(RunnerError::Configuration(format!(
                    "invalid variable assignment \"{line}\", expected KEY=VALUE"
                )));
            }
            variables.push(line.to_string());
        }

        Ok(Self { variables })
    }

    /// `KEY=VALUE` strings ready for the container environment.
    #[must_use]
    pub fn container_format_variables(&self) -> Vec<String> {
        self.variables.clone()
    }
}
