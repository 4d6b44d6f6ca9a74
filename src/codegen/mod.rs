//! Core generation data model.
//!
//! - [`Variant`]: the generation kind, the single dispatch table of the crate
//! - [`CodeArtifact`]: parsed model output, one field per saved file
//! - [`GenerationRequest`]: what a caller asks the dispatcher for
//!
//! # Example
//!
//! ```rust
//! use axum_codegen_deploy::codegen::Variant;
//!
//! let variant: Variant = "multi_file".parse().unwrap();
//! assert_eq!(variant.file_names(), &["index.html", "style.css", "script.js"]);
//! ```

pub mod artifacts;
pub mod parser;
pub mod prompts;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Application identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppId(pub u64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for AppId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Generation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// One self-contained `index.html`.
    SinglePage,
    /// Separate HTML, CSS and JS files.
    MultiFile,
    /// A multi-file project written by agent tool calls and built before deploy.
    BuildableProject,
}

impl Variant {
    /// All variants, in declaration order.
    pub const ALL: [Variant; 3] = [Self::SinglePage, Self::MultiFile, Self::BuildableProject];

    /// Wire name, also used as the artifact directory prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SinglePage => "single_page",
            Self::MultiFile => "multi_file",
            Self::BuildableProject => "buildable_project",
        }
    }

    /// Fixed file set written for a parsed artifact. Empty for projects,
    /// whose files are chosen by the agent.
    #[must_use]
    pub fn file_names(self) -> &'static [&'static str] {
        match self {
            Self::SinglePage => &["index.html"],
            Self::MultiFile => &["index.html", "style.css", "script.js"],
            Self::BuildableProject => &[],
        }
    }

    /// Maximum number of messages kept in the conversation window.
    #[must_use]
    pub fn memory_window(self) -> usize {
        match self {
            Self::SinglePage | Self::MultiFile => 35,
            Self::BuildableProject => 10,
        }
    }

    /// Number of persisted turns loaded when a session is created.
    #[must_use]
    pub fn history_turns(self) -> usize {
        match self {
            Self::SinglePage | Self::MultiFile => 20,
            Self::BuildableProject => 10,
        }
    }

    /// Whether the model drives file writes through tool calls.
    #[must_use]
    pub fn uses_tools(self) -> bool {
        matches!(self, Self::BuildableProject)
    }

    /// Whether deploy runs the external build step first.
    #[must_use]
    pub fn requires_build(self) -> bool {
        matches!(self, Self::BuildableProject)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Variant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::Configuration(format!("unsupported generation variant: {s:?}")))
    }
}

/// Parsed model output. Every field is a full file body; a missing block is
/// an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodeArtifact {
    SinglePage {
        html: String,
    },
    MultiFile {
        html: String,
        css: String,
        js: String,
    },
}

impl CodeArtifact {
    /// Variant this artifact belongs to.
    #[must_use]
    pub fn variant(&self) -> Variant {
        match self {
            Self::SinglePage { .. } => Variant::SinglePage,
            Self::MultiFile { .. } => Variant::MultiFile,
        }
    }

    /// `(file name, content)` pairs in the variant's fixed order.
    #[must_use]
    pub fn files(&self) -> Vec<(&'static str, &str)> {
        let names = self.variant().file_names();
        let contents: Vec<&str> = match self {
            Self::SinglePage { html } => vec![html],
            Self::MultiFile { html, css, js } => vec![html, css, js],
        };
        names.iter().copied().zip(contents).collect()
    }
}

/// A caller's generation request.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub app_id: AppId,
    /// Caller identity, used when appending chat history.
    pub user_id: String,
    pub prompt: String,
    pub variant: Variant,
    pub streaming: bool,
}

impl GenerationRequest {
    /// Build a request from an untyped variant name.
    ///
    /// Fails with [`Error::Configuration`] for an unknown variant, before any
    /// other work happens.
    pub fn parse(
        app_id: AppId,
        user_id: impl Into<String>,
        prompt: impl Into<String>,
        variant: &str,
        streaming: bool,
    ) -> crate::error::Result<Self> {
        Ok(Self {
            app_id,
            user_id: user_id.into(),
            prompt: prompt.into(),
            variant: variant.parse()?,
            streaming,
        })
    }
}
