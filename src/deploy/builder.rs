//! External project build.
//!
//! A build is a list of subprocess steps run in the project directory, each
//! with its own timeout, followed by a check that the output directory exists.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::{Error, Result};

/// Stderr kept in a [`Error::Build`] reason.
const STDERR_TAIL_LINES: usize = 20;

/// One subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStep {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

impl BuildStep {
    pub fn new<I, S>(command: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout_secs: timeout.as_secs(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Command line as shown in errors, e.g. `npm run build`.
    pub fn label(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Dependency install, skipped when absent.
    #[serde(default)]
    pub install: Option<BuildStep>,
    pub build: BuildStep,
    /// Build output, relative to the project directory.
    pub output_dir: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            install: Some(BuildStep::new("npm", ["install"], Duration::from_secs(300))),
            build: BuildStep::new("npm", ["run", "build"], Duration::from_secs(180)),
            output_dir: "dist".to_string(),
        }
    }
}

/// Runs [`BuildSettings`] against a project directory.
#[derive(Debug, Clone, Default)]
pub struct ProjectBuilder {
    settings: BuildSettings,
}

impl ProjectBuilder {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// Build `project_dir` and return its output directory.
    ///
    /// A failing or timed-out step is [`Error::Build`]; a clean exit without
    /// the output directory is [`Error::BuildOutputMissing`].
    #[tracing::instrument(skip(self), fields(project = %project_dir.display()))]
    pub async fn build(&self, project_dir: &Path) -> Result<PathBuf> {
        let output = project_dir.join(&self.settings.output_dir);
        // Output from an earlier build must not satisfy the check below.
        match tokio::fs::remove_dir_all(&output).await {
            Ok(()) => tracing::debug!(output = %output.display(), "Removed previous build output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::persistence(&output, e)),
        }

        if let Some(install) = &self.settings.install {
            run_step(install, project_dir).await?;
        }
        run_step(&self.settings.build, project_dir).await?;

        match tokio::fs::metadata(&output).await {
            Ok(meta) if meta.is_dir() => Ok(output),
            _ => Err(Error::BuildOutputMissing { path: output }),
        }
    }
}

async fn run_step(step: &BuildStep, dir: &Path) -> Result<()> {
    let label = step.label();
    let started = Instant::now();

    let child = Command::new(&step.command)
        .args(&step.args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Build {
            step: label.clone(),
            reason: format!("failed to start: {e}"),
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(step.timeout(), child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(Error::Build {
                step: label,
                reason: format!("failed while waiting: {e}"),
            });
        }
        Err(_) => {
            tracing::warn!(step = %label, timeout_secs = step.timeout_secs, "Build step timed out");
            return Err(Error::Build {
                step: label,
                reason: format!("timed out after {}s", step.timeout_secs),
            });
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::error!(step = %label, status = %output.status, "Build step failed");
        return Err(Error::Build {
            step: label,
            reason: format!("{}\n{}", output.status, stderr_tail(&stderr)),
        });
    }

    tracing::info!(
        step = %label,
        elapsed_ms = started.elapsed().as_millis(),
        "Build step finished"
    );
    Ok(())
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim_end().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_steps_are_npm() {
        let settings = BuildSettings::default();
        assert_eq!(settings.install.as_ref().unwrap().label(), "npm install");
        assert_eq!(settings.build.label(), "npm run build");
        assert_eq!(settings.build.timeout(), Duration::from_secs(180));
        assert_eq!(settings.output_dir, "dist");
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr: String = (0..50).map(|i| format!("line {i}\n")).collect();
        let tail = stderr_tail(&stderr);
        assert!(tail.starts_with("line 30"));
        assert!(tail.ends_with("line 49"));
    }

    #[cfg(unix)]
    fn sh(script: &str, timeout: Duration) -> BuildStep {
        BuildStep::new("sh", ["-c", script], timeout)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_returns_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ProjectBuilder::new(BuildSettings {
            install: None,
            build: sh("mkdir -p dist && echo ok > dist/index.html", Duration::from_secs(10)),
            output_dir: "dist".into(),
        });
        let out = builder.build(dir.path()).await.unwrap();
        assert_eq!(out, dir.path().join("dist"));
        assert!(out.join("index.html").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_build_error_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ProjectBuilder::new(BuildSettings {
            install: Some(sh("echo 'missing vite' >&2; exit 3", Duration::from_secs(10))),
            build: sh("mkdir dist", Duration::from_secs(10)),
            output_dir: "dist".into(),
        });
        let err = builder.build(dir.path()).await.unwrap_err();
        match err {
            Error::Build { step, reason } => {
                assert!(step.starts_with("sh -c"));
                assert!(reason.contains("missing vite"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dir.path().join("dist").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_is_build_error() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ProjectBuilder::new(BuildSettings {
            install: None,
            build: sh("sleep 5", Duration::from_secs(1)),
            output_dir: "dist".into(),
        });
        let err = builder.build(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Build { ref reason, .. } if reason.contains("timed out")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_output_is_distinct_error() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ProjectBuilder::new(BuildSettings {
            install: None,
            build: sh("true", Duration::from_secs(10)),
            output_dir: "dist".into(),
        });
        let err = builder.build(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::BuildOutputMissing { ref path } if path.ends_with("dist")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_output_does_not_count_as_built() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/index.html"), "old").unwrap();

        let builder = ProjectBuilder::new(BuildSettings {
            install: None,
            build: sh("true", Duration::from_secs(10)),
            output_dir: "dist".into(),
        });
        let err = builder.build(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::BuildOutputMissing { .. }));
        assert!(!dir.path().join("dist").exists());
    }

    #[tokio::test]
    async fn test_unknown_program_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let builder = ProjectBuilder::new(BuildSettings {
            install: None,
            build: BuildStep::new("definitely-not-a-build-tool", Vec::<String>::new(), Duration::from_secs(5)),
            output_dir: "dist".into(),
        });
        let err = builder.build(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Build { ref reason, .. } if reason.contains("failed to start")));
    }
}
