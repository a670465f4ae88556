//! Subprocess execution.
//!
//! Everything that talks to an external program goes through [`ProcessRunner`], so the git layer
//! can be driven by a real `tokio` process or by a scripted runner in tests.

use std::{
    collections::HashMap,
    ffi::OsString,
    io,
    path::PathBuf,
    process::Stdio,
};

use async_trait::async_trait;
use log::trace;
use thiserror::Error;
use tokio::{io::AsyncWriteExt, process::Command};
use tokio_util::sync::CancellationToken;

/// A single program launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub current_dir: Option<PathBuf>,
    /// Replaces the ambient environment when present.
    pub env: Option<HashMap<OsString, OsString>>,
    pub stdin: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("could not launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("IO error while talking to the process: {0}")]
    Io(#[from] io::Error),
    #[error("process exited with {}: {}", describe_status(.status), .stderr.trim())]
    Exit { status: Option<i32>, stderr: String },
    #[error("process was cancelled")]
    Cancelled,
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_owned(),
    }
}

/// Runs a program to completion.
///
/// Implementations must report a non-zero exit as [`ProcessError::Exit`] and must stop the
/// program and return [`ProcessError::Cancelled`] once `cancel` fires.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError>;
}

/// [`ProcessRunner`] backed by [`tokio::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput, ProcessError> {
        if cancel.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let Invocation {
            program,
            args,
            current_dir,
            env,
            stdin,
        } = invocation;

        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &current_dir {
            command.current_dir(dir);
        }
        if let Some(env) = env {
            command.env_clear().envs(env);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.display().to_string(),
            source,
        })?;
        let pipe = child.stdin.take();

        let completion = async move {
            let write_input = async {
                if let (Some(mut pipe), Some(bytes)) = (pipe, stdin) {
                    pipe.write_all(&bytes).await?;
                    pipe.shutdown().await?;
                }
                Ok::<(), io::Error>(())
            };
            let (written, output) = tokio::join!(write_input, child.wait_with_output());
            match written {
                Err(error) if error.kind() == io::ErrorKind::BrokenPipe => {
                    trace!("Process closed its input early");
                }
                Err(error) => return Err(ProcessError::Io(error)),
                Ok(()) => {}
            }
            Ok(output?)
        };

        // Dropping `completion` drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
            output = completion => output?,
        };

        if output.status.success() {
            Ok(ProcessOutput {
                stdout: output.stdout,
                stderr: output.stderr,
            })
        } else {
            Err(ProcessError::Exit {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::*;

    type Effect = Arc<dyn Fn(&Invocation) -> Result<String, String> + Send + Sync>;

    /// Canned answer for invocations whose arguments start with a given prefix.
    #[derive(Clone)]
    pub enum Reply {
        Success(String),
        Failure(String),
        /// Runs until cancelled.
        Hang,
        Effect(Effect),
    }

    impl Reply {
        pub fn ok(output: impl Into<String>) -> Reply {
            Reply::Success(output.into())
        }

        pub fn fail(stderr: impl Into<String>) -> Reply {
            Reply::Failure(stderr.into())
        }

        pub fn effect(
            effect: impl Fn(&Invocation) -> Result<String, String> + Send + Sync + 'static,
        ) -> Reply {
            Reply::Effect(Arc::new(effect))
        }
    }

    /// Records every invocation and answers from a script; unscripted commands succeed silently.
    #[derive(Default)]
    pub struct ScriptedRunner {
        script: Mutex<Vec<(Vec<String>, Reply)>>,
        invocations: Mutex<Vec<Invocation>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply(self, prefix: &[&str], reply: Reply) -> Self {
            self.script
                .lock()
                .unwrap()
                .push((prefix.iter().map(|s| s.to_string()).collect(), reply));
            self
        }

        pub fn invocations(&self) -> Vec<Invocation> {
            self.invocations.lock().unwrap().clone()
        }

        /// Arguments of every invocation joined with spaces.
        pub fn commands(&self) -> Vec<String> {
            self.invocations()
                .iter()
                .map(|invocation| args_of(invocation).join(" "))
                .collect()
        }
    }

    pub fn args_of(invocation: &Invocation) -> Vec<String> {
        invocation
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(
            &self,
            invocation: Invocation,
            cancel: &CancellationToken,
        ) -> Result<ProcessOutput, ProcessError> {
            if cancel.is_cancelled() {
                return Err(ProcessError::Cancelled);
            }
            self.invocations.lock().unwrap().push(invocation.clone());

            let args = args_of(&invocation);
            let reply = self
                .script
                .lock()
                .unwrap()
                .iter()
                .find(|(prefix, _)| args.starts_with(prefix))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| Reply::ok(""));

            let result = match reply {
                Reply::Success(output) => Ok(output),
                Reply::Failure(stderr) => Err(stderr),
                Reply::Effect(effect) => effect(&invocation),
                Reply::Hang => {
                    cancel.cancelled().await;
                    return Err(ProcessError::Cancelled);
                }
            };
            match result {
                Ok(output) => Ok(ProcessOutput {
                    stdout: output.into_bytes(),
                    stderr: Vec::new(),
                }),
                Err(stderr) => Err(ProcessError::Exit {
                    status: Some(128),
                    stderr,
                }),
            }
        }
    }
}
