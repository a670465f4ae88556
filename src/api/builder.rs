use std::{env, path::PathBuf, sync::Arc, time::Duration};

use anyhow::anyhow;
use home::home_dir;
use tokio_util::sync::CancellationToken;

use crate::{
    git::{cache::MirrorCache, Clock, FetchCache, GitClient, SystemClock, DEFAULT_FETCH_INTERVAL},
    process::{ProcessRunner, TokioProcessRunner},
    Repofetch,
};

#[derive(Default)]
pub struct RepofetchBuilder {
    cache_directory_path: Option<PathBuf>,
    git_executable: Option<PathBuf>,
    fetch_interval: Option<Duration>,
    runner: Option<Arc<dyn ProcessRunner>>,
    clock: Option<Arc<dyn Clock>>,
    cancellation: Option<CancellationToken>,
}

impl RepofetchBuilder {
    /// Location of the mirror cache directory.
    ///
    /// Defaults to `$HOME/.repofetch/cache`.
    pub fn cache_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_directory_path = Some(path.into());
        self
    }

    /// Git binary to run.
    ///
    /// Defaults to `git`, looked up on `PATH`.
    pub fn git_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.git_executable = Some(path.into());
        self
    }

    /// Minimum time between two fetches of the same remote.
    ///
    /// Defaults to 60 seconds.
    pub fn fetch_interval(mut self, interval: Duration) -> Self {
        self.fetch_interval = Some(interval);
        self
    }

    pub fn process_runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Token that aborts every running git command once cancelled.
    pub fn cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn try_build(self) -> anyhow::Result<Repofetch> {
        let Self {
            cache_directory_path,
            git_executable,
            fetch_interval,
            runner,
            clock,
            cancellation,
        } = self;

        let cache_directory = match cache_directory_path {
            Some(path) => env::current_dir()?.join(path),
            None => default_cache_directory()?,
        };

        let fetch_cache = FetchCache::with_clock(
            fetch_interval.unwrap_or(DEFAULT_FETCH_INTERVAL),
            clock.unwrap_or_else(|| Arc::new(SystemClock)),
        );
        let mut git = GitClient::new(
            runner.unwrap_or_else(|| Arc::new(TokioProcessRunner)),
            Arc::new(fetch_cache),
        );
        if let Some(executable) = git_executable {
            git = git.with_executable(executable);
        }
        if let Some(cancellation) = cancellation {
            git = git.with_cancellation(cancellation);
        }

        let cache = MirrorCache::new(cache_directory, git)?;

        Ok(Repofetch {
            cache: Arc::new(cache),
        })
    }
}

fn default_cache_directory() -> anyhow::Result<PathBuf> {
    let mut cache_directory = home_dir()
        .ok_or_else(|| anyhow!("Could not find home dir. Please define $HOME env variable."))?;
    cache_directory.push(".repofetch/cache");
    Ok(cache_directory)
}
