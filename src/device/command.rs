//! command.rs
//! Subprocess shims: devices only reachable through a vendor CLI
//! (e.g. `piTest -1 -q -r InputValue_1` / `piTest -w OutputValue_1,4250`).

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::device::{Actuator, SampleSource};
use crate::error::{ActuatorError, SourceError};

/// Placeholder substituted with the raw command value in actuator arguments.
pub const VALUE_PLACEHOLDER: &str = "{value}";

pub struct CommandSource {
    program: String,
    args: Vec<String>,
}

impl CommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl SampleSource for CommandSource {
    async fn sample(&mut self) -> Result<f64, SourceError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| SourceError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(SourceError::Command {
                program: self.program.clone(),
                status: output.status,
            });
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f64>()
            .map_err(|e| SourceError::Parse(format!("{:?}: {e}", text.trim())))
    }
}

pub struct CommandActuator {
    program: String,
    args: Vec<String>,
    release_args: Option<Vec<String>>,
}

impl CommandActuator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            release_args: None,
        }
    }

    /// Arguments run once on shutdown; `{value}` is replaced with 0.
    pub fn with_release(mut self, args: Vec<String>) -> Self {
        self.release_args = Some(args);
        self
    }

    async fn run(&self, args: &[String], raw: i64) -> Result<(), ActuatorError> {
        let value = raw.to_string();
        let args: Vec<String> = args
            .iter()
            .map(|a| a.replace(VALUE_PLACEHOLDER, &value))
            .collect();
        debug!("{} {}", self.program, args.join(" "));

        let status = Command::new(&self.program)
            .args(&args)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| ActuatorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(ActuatorError::Command {
                program: self.program.clone(),
                status,
            })
        }
    }
}

#[async_trait]
impl Actuator for CommandActuator {
    async fn apply(&mut self, raw: i64) -> Result<(), ActuatorError> {
        self.run(&self.args, raw).await
    }

    async fn release(&mut self) -> Result<(), ActuatorError> {
        match &self.release_args {
            Some(args) => self.run(args, 0).await,
            None => Ok(()),
        }
    }
}
