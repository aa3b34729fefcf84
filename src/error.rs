//! Error types shared by the material generator, the runners and the orchestrator.

use std::path::PathBuf;

/// Errors raised while rendering a material file from its template.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("cannot read material template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write material file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("material file generation was cancelled")]
    Cancelled,
}

/// Failure taxonomy of an incremental analysis.
///
/// Only `Setup` ever leaves
/// [`Orchestrator::run`](crate::orchestrator::Orchestrator::run) as an `Err`.
/// `Job` values are carried inside failed job results and become warnings;
/// `Cancelled` is reported as [`Outcome::Cancelled`](crate::job::Outcome).
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("analysis was cancelled")]
    Cancelled,
    #[error("analysis for {label} (job {index}) has failed: {message}")]
    Job {
        index: usize,
        label: String,
        message: String,
    },
    #[error("analysis setup failed: {0}")]
    Setup(String),
    #[error("analysis results are incomplete: {0}")]
    Incomplete(String),
}

impl AnalysisError {
    pub fn setup(message: impl Into<String>) -> Self {
        AnalysisError::Setup(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, AnalysisError::Cancelled)
    }
}

impl From<RenderError> for AnalysisError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::Cancelled => AnalysisError::Cancelled,
            other => AnalysisError::Setup(other.to_string()),
        }
    }
}

/// Error returned by a single engine step (deck building, invocation, parsing).
///
/// Kept as a plain message so that backends can report whatever their external
/// tools print; the runner attaches the job index and label.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        EngineError(message.into())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_cancellation_maps_to_cancelled() {
        let err: AnalysisError = RenderError::Cancelled.into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn render_io_failure_is_a_setup_failure() {
        let err: AnalysisError = RenderError::Read {
            path: PathBuf::from("missing.mat"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        }
        .into();
        match err {
            AnalysisError::Setup(message) => assert!(message.contains("missing.mat")),
            other => panic!("expected setup failure, got {:?}", other),
        }
    }

    #[test]
    fn job_error_names_the_job() {
        let err = AnalysisError::Job {
            index: 2,
            label: "angle 30".into(),
            message: "engine exited with status 3".into(),
        };
        assert_eq!(
            err.to_string(),
            "analysis for angle 30 (job 2) has failed: engine exited with status 3"
        );
    }
}
