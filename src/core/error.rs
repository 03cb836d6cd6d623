//! Error types for process, configuration, and service operations.

use thiserror::Error;
use uuid::Uuid;

/// Errors produced by a worker process and its framed channel.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The worker command was empty after whitespace splitting.
    #[error("worker command is empty")]
    EmptyCommand,
    /// The child process could not be started.
    #[error("failed to start `{command}`: {source}")]
    Start {
        /// Command line that failed to start.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
    /// A stdio pipe was not available after spawn.
    #[error("process {0} has no {1} pipe")]
    MissingPipe(Uuid, &'static str),
    /// Writing a frame to the child's stdin failed.
    #[error("failed to write to process {uuid}: {source}")]
    Write {
        /// Process identifier.
        uuid: Uuid,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Reading a frame from the child's stdout failed.
    #[error("failed to read from process {uuid}: {source}")]
    Read {
        /// Process identifier.
        uuid: Uuid,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The child wrote something that is not a valid frame header.
    #[error("malformed frame header {header:?}{output}")]
    Framing {
        /// Raw header bytes, lossily decoded.
        header: String,
        /// Whatever else could be salvaged from stdout/stderr.
        output: String,
    },
    /// A reply frame was not valid UTF-8.
    #[error("process {uuid} replied with invalid UTF-8: {source}")]
    InvalidUtf8 {
        /// Process identifier.
        uuid: Uuid,
        /// Decoding error.
        #[source]
        source: std::string::FromUtf8Error,
    },
    /// The frame length exceeds the accepted maximum.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Declared length.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },
    /// The reader side of the process is gone.
    #[error("process {0} output closed")]
    Closed(Uuid),
}

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// An environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    Env {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },
    /// An env file or JSON document could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Errors surfaced by the worker service API.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service has begun shutting down and no longer accepts tasks.
    #[error("service is closing")]
    Closing,
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A process-level failure.
    #[error(transparent)]
    Process(#[from] ProcessError),
}
