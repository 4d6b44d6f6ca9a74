//! Error types for the generation and deployment pipeline.
//!
//! Every failure the core can surface to a caller is one variant of [`Error`].
//! Parse degradation is deliberately absent: a missing code fence is reported
//! as a [`ParseWarning`](crate::codegen::parser::ParseWarning) and never aborts
//! an operation.

use std::path::PathBuf;

use thiserror::Error;

use crate::codegen::AppId;

/// Pipeline error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Request names an unknown or unsupported variant. Raised before any I/O.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The model or the network failed. Never retried by the core.
    #[error("Model error: {0}")]
    Model(String),

    /// Writing generated files to disk failed. Files already written stay.
    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        /// Path that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The external build tool exited nonzero, could not start, or timed out.
    #[error("Build failed during `{step}`: {reason}")]
    Build {
        /// Which build step failed (e.g. `npm install`).
        step: String,
        /// Exit status, timeout or spawn failure, with captured stderr.
        reason: String,
    },

    /// The build exited successfully but produced no output directory.
    #[error("Build finished but output directory {} is missing", path.display())]
    BuildOutputMissing {
        /// Expected build output directory.
        path: PathBuf,
    },

    /// The caller does not own the application.
    #[error("User {user_id} is not allowed to access app {app_id}")]
    Authorization {
        /// Resolved caller identity.
        user_id: String,
        /// Application that was requested.
        app_id: AppId,
    },

    /// No caller identity could be resolved.
    #[error("Authentication required")]
    Unauthenticated,

    /// The application or its saved output does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A consumed collaborator (history store, app store) failed.
    #[error("Collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

impl Error {
    /// Short machine-readable kind, used in HTTP error bodies and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Model(_) => "model",
            Self::Persistence { .. } => "persistence",
            Self::Build { .. } => "build",
            Self::BuildOutputMissing { .. } => "build_output_missing",
            Self::Authorization { .. } => "authorization",
            Self::Unauthenticated => "unauthenticated",
            Self::NotFound(_) => "not_found",
            Self::Collaborator(_) => "collaborator",
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
