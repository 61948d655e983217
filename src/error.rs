//! error.rs
//! Error types for every fallible edge of an asset system.
//!
//! Each concern gets its own enum so the owner, the sampler and the gateway can
//! decide policy by kind: acquisition failures are logged and skipped, mailbox
//! failures are surfaced to the caller, configuration failures stop startup.

use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// A Sample Source could not produce a reading this tick.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unparseable reading: {0}")]
    Parse(String),

    #[error("`{program}` could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Command { program: String, status: ExitStatus },

    /// Injected by simulated sources.
    #[error("simulated fault")]
    Simulated,
}

/// A device-level command failed.
#[derive(Debug, Error)]
pub enum ActuatorError {
    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` could not be started: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` exited with {status}")]
    Command { program: String, status: ExitStatus },

    #[error("publish to `{topic}` failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("simulated fault")]
    Simulated,
}

/// Outcome of a mailbox round trip that did not produce a signal.
#[derive(Debug, Error)]
pub enum OwnerError {
    /// No reply inside the request bound. The owner keeps running.
    #[error("request timed out")]
    Timeout,

    /// The owner task has terminated (shutdown) or dropped the reply.
    #[error("asset task is gone")]
    Closed,

    #[error("unknown service `{0}`")]
    UnknownService(String),

    /// The request was understood but refused (read-only service, bad value).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Nothing has been sampled yet.
    #[error("no reading available yet")]
    NoData,

    #[error("device error: {0}")]
    Device(#[from] ActuatorError),
}

/// Failure of a call against another system's capability.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{url} answered {status}")]
    Status { url: String, status: u16 },

    #[error("call exceeded {0:?}")]
    Timeout(std::time::Duration),

    /// In-process service resolved through the registry.
    #[error(transparent)]
    Local(#[from] OwnerError),
}

/// Configuration problems. Only ever raised before any task is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no configuration at {0}; a template was written there, edit it and restart")]
    TemplateWritten(PathBuf),

    #[error("duplicate asset name `{0}`")]
    DuplicateAsset(String),

    #[error("asset `{asset}`: {reason}")]
    Invalid { asset: String, reason: String },
}

impl ConfigError {
    pub fn invalid(asset: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            asset: asset.to_string(),
            reason: reason.into(),
        }
    }
}

/// Startup failures of the composition root.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("binding gateway on {addr}: {reason}")]
    Bind { addr: String, reason: String },
}
