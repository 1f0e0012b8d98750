//! Error type for fact gathering.

use thiserror::Error;

use dut_facts_core::{LookupError, ParseError};

use crate::runner::RunError;

/// Errors raised while collecting or checking device facts.
#[derive(Debug, Error)]
pub enum GatherError {
    /// Running a command on the device failed.
    #[error(transparent)]
    Run(#[from] RunError),

    /// Command output did not decode as a table.
    #[error("failed to parse output of '{command}': {source}")]
    Parse {
        command: String,
        #[source]
        source: ParseError,
    },

    /// A parsed record lacks a column the check relies on.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// Local filesystem failure (firmware binaries, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Output parsed but its content is not what the check expects.
    #[error("unexpected output from '{command}': {detail}")]
    UnexpectedOutput { command: String, detail: String },

    /// A configured firmware component is absent from the device status.
    #[error("component '{0}' missing from firmware status")]
    MissingComponent(String),

    /// The component has no update handler.
    #[error("unsupported firmware component '{0}'")]
    UnsupportedComponent(String),

    /// No firmware image is available for the requested install.
    #[error("no {which} firmware image for {component}")]
    MissingImage {
        component: String,
        which: &'static str,
    },

    /// The configuration does not cover what was asked of it.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A device feature the check depends on is not enabled.
    #[error("{0} is not available on this device")]
    Unavailable(String),

    /// The worker pool for inventory gathering could not be built.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl GatherError {
    /// Wraps a [`ParseError`] with the command whose output failed.
    pub fn parse(command: &str, source: ParseError) -> Self {
        Self::Parse {
            command: command.to_string(),
            source,
        }
    }
}

/// Convenience alias for results with [`GatherError`].
pub type Result<T> = std::result::Result<T, GatherError>;
