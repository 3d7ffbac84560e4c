// src/error.rs

//! Error types for the build pipeline
//!
//! The pipeline is fail-fast: the first error aborts the build and is
//! surfaced to the CLI as exit code 1. Variants are grouped by where they
//! originate: recipe/configuration, source integrity, child tooling,
//! filesystem, and the remote backend.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can abort a build
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed recipe, bad CLI input, unknown engine
    #[error("configuration error: {0}")]
    Config(String),

    /// Package directory not found in the recipe repository
    #[error("not found: {0}")]
    NotFound(String),

    /// A bare package name matched more than one category
    #[error("ambiguous package {name}, candidates: {candidates:?}")]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    /// None of the engine probes matched the source tree
    #[error("could not detect build type")]
    UnknownBuildType,

    /// Download returned a non-success HTTP status
    #[error("HTTP error {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// Downloaded artifact size disagrees with the pinned record
    #[error("invalid file size for {0}")]
    SizeMismatch(String),

    /// Downloaded artifact hash disagrees with the pinned record
    #[error("failed checking {file}: {algo} hash value fail")]
    HashMismatch { file: String, algo: String },

    /// Child process exited non-zero
    #[error("{program} exited with status {code}")]
    Tool { program: String, code: i32 },

    /// Child process terminated without an exit status
    #[error("{0} terminated by signal")]
    ToolKilled(String),

    /// Remote backend failure outside of SSH/SFTP error codes
    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("download error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),
}

impl Error {
    /// Build a tool error from a program name and an optional exit code.
    pub fn tool(program: impl Into<String>, code: Option<i32>) -> Self {
        let program = program.into();
        match code {
            Some(code) => Error::Tool { program, code },
            None => Error::ToolKilled(program),
        }
    }
}
