use std::{
    collections::HashMap,
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::trace;
use tokio_util::sync::CancellationToken;

use crate::process::{Invocation, ProcessError, ProcessRunner};

use super::GitError;

/// Environment variables forced onto every git invocation so that it fails instead of
/// prompting: no credential prompt, and ssh in batch mode (no host key or password prompt).
const NON_INTERACTIVE_ENV: [(&str, &str); 2] = [
    ("GIT_TERMINAL_PROMPT", "0"),
    ("GIT_SSH_COMMAND", "ssh -oBatchMode=yes"),
];

/// One git invocation.
#[derive(Debug, Clone, Default)]
pub struct GitRequest {
    args: Vec<OsString>,
    repository: Option<PathBuf>,
    stdin: Option<Vec<u8>>,
    env: Option<HashMap<OsString, OsString>>,
}

impl GitRequest {
    pub fn new<I, S>(args: I) -> GitRequest
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        GitRequest {
            args: args
                .into_iter()
                .map(|arg| arg.as_ref().to_os_string())
                .collect(),
            ..Default::default()
        }
    }

    /// Runs git from inside `repository`.
    pub fn in_repository(mut self, repository: impl Into<PathBuf>) -> GitRequest {
        self.repository = Some(repository.into());
        self
    }

    pub fn stdin(mut self, input: Vec<u8>) -> GitRequest {
        self.stdin = Some(input);
        self
    }

    /// Replaces the ambient environment.
    pub fn environment(mut self, env: HashMap<OsString, OsString>) -> GitRequest {
        self.env = Some(env);
        self
    }
}

/// Launches git through a [`ProcessRunner`] and turns its result into text or a [`GitError`].
#[derive(Clone)]
pub struct GitCommand {
    executable: PathBuf,
    runner: Arc<dyn ProcessRunner>,
    cancel: CancellationToken,
}

impl GitCommand {
    pub fn new(
        executable: impl Into<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
        cancel: CancellationToken,
    ) -> GitCommand {
        GitCommand {
            executable: executable.into(),
            runner,
            cancel,
        }
    }

    pub fn with_executable(self, executable: impl Into<PathBuf>) -> GitCommand {
        GitCommand {
            executable: executable.into(),
            ..self
        }
    }

    pub fn with_cancellation(self, cancel: CancellationToken) -> GitCommand {
        GitCommand { cancel, ..self }
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Runs `git <args>`, optionally inside `repository`.
    pub async fn run<I, S>(&self, args: I, repository: Option<&Path>) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut request = GitRequest::new(args);
        if let Some(repository) = repository {
            request = request.in_repository(repository);
        }
        self.execute(request).await
    }

    pub async fn execute(&self, request: GitRequest) -> Result<String, GitError> {
        let GitRequest {
            args,
            repository,
            stdin,
            env,
        } = request;

        let command = describe(&args);
        let mut env = env.unwrap_or_else(|| std::env::vars_os().collect());
        for (key, value) in NON_INTERACTIVE_ENV {
            env.insert(key.into(), value.into());
        }

        trace!(
            "Running git {}{}",
            command,
            repository
                .as_deref()
                .map(|path| format!(" in {}", path.display()))
                .unwrap_or_default()
        );

        let invocation = Invocation {
            program: self.executable.clone(),
            args,
            current_dir: repository,
            env: Some(env),
            stdin,
        };

        match self.runner.run(invocation, &self.cancel).await {
            Ok(output) => String::from_utf8(output.stdout).map_err(|error| {
                GitError::Internal(format!(
                    "output of git {command} is not valid UTF-8: {error}"
                ))
            }),
            Err(ProcessError::Cancelled) => Err(GitError::Cancelled),
            Err(source) => Err(GitError::CommandFailed { command, source }),
        }
    }
}

/// Arguments joined for logs and error messages.
pub(crate) fn describe(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}
