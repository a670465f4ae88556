use std::{
    fmt::{Display, Formatter},
    io,
    path::PathBuf,
};

use thiserror::Error;

use crate::process::ProcessError;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {command} failed: {source}")]
    CommandFailed {
        command: String,
        #[source]
        source: ProcessError,
    },
    #[error("expected different output from git {command}, but encountered: {output:?}")]
    Parse { command: String, output: String },
    #[error("checkout of {path} failed: {reason}", path = .path.display())]
    CheckoutFailed {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("could not read {path}", path = .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: Option<io::Error>,
    },
    #[error("internal error: {0}")]
    Internal(String),
    #[error("git operation was cancelled")]
    Cancelled,
}

impl GitError {
    pub(crate) fn checkout_failed(
        path: impl Into<PathBuf>,
        reason: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> GitError {
        GitError::CheckoutFailed {
            path: path.into(),
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GitError::Cancelled)
    }

    /// Diagnostic output captured from the failed git process, if any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            GitError::CommandFailed {
                source: ProcessError::Exit { stderr, .. },
                ..
            } => Some(stderr),
            _ => None,
        }
    }
}

/// Every failure collected while walking a directory tree.
#[derive(Debug)]
pub struct PurgeErrors(pub Vec<GitError>);

impl Display for PurgeErrors {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} entries could not be cleaned up", self.0.len())?;
        for error in &self.0 {
            write!(f, "; {error}")?;
            if let GitError::CheckoutFailed {
                source: Some(source),
                ..
            } = error
            {
                write!(f, " ({source})")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for PurgeErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn messages_keep_context() {
        let error = GitError::CommandFailed {
            command: "fetch --prune --quiet".to_owned(),
            source: ProcessError::Exit {
                status: Some(128),
                stderr: "fatal: repository not found\n".to_owned(),
            },
        };
        assert_eq!(
            error.to_string(),
            "git fetch --prune --quiet failed: process exited with status 128: fatal: repository not found"
        );
        assert_eq!(error.stderr(), Some("fatal: repository not found\n"));

        let error = GitError::checkout_failed(
            "/work/Vendor/Lib",
            "No object named \"v1.0\" exists",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(
            error.to_string(),
            "checkout of /work/Vendor/Lib failed: No object named \"v1.0\" exists"
        );
    }
}
