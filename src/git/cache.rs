use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use dashmap::DashMap;
use log::{debug, info, trace};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::flock::FileLock;

use super::{GitClient, GitError, GitUrl};

const LOCK_FILE: &str = ".lock";
const MIRROR_SUFFIX: &str = ".git";
const MIRROR_REFSPEC: &str = "+refs/heads/*:refs/heads/*";
const LOCAL_MIRRORS: &str = ".local";

/// Directory of bare mirrors, one per remote, kept up to date through a [`GitClient`].
///
/// The directory is locked for as long as the cache is alive, so only one repofetch process
/// works on it at a time.
pub struct MirrorCache {
    location: PathBuf,
    git: GitClient,
    in_flight: DashMap<GitUrl, Arc<Mutex<()>>>,
    _lock: FileLock,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),
    #[error("Cache location {location} is not a directory", location = .location.display())]
    BadLocation { location: PathBuf },
    #[error("Cannot derive a cache path from {url:?}")]
    InvalidUrl { url: String },
    #[error("Cache lock cannot be acquired")]
    Lock(#[from] crate::flock::Error),
    #[error("IO error: {0}")]
    IO(#[from] io::Error),
}

impl MirrorCache {
    pub fn new(location: PathBuf, git: GitClient) -> Result<MirrorCache, CacheError> {
        if location.exists() {
            if !location.is_dir() {
                return Err(CacheError::BadLocation { location });
            }
        } else {
            std::fs::create_dir_all(&location)?;
        }

        let lock = Self::acquire_lock(&location)?;

        Ok(MirrorCache {
            location,
            git,
            in_flight: DashMap::new(),
            _lock: lock,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn git(&self) -> &GitClient {
        &self.git
    }

    /// Where the mirror of `url` lives: `<cache>/<host>/<path>.git` for remotes and
    /// `<cache>/.local/<escaped path>.git` for local repositories. Distinct remotes never share
    /// a mirror.
    pub fn mirror_path(&self, url: &GitUrl) -> Result<PathBuf, CacheError> {
        let invalid = || CacheError::InvalidUrl {
            url: url.as_str().to_owned(),
        };
        let mut path = self.location.clone();

        let Some(host) = url.host() else {
            if url.path().is_empty() {
                return Err(invalid());
            }
            path.push(LOCAL_MIRRORS);
            path.push(format!("{}{MIRROR_SUFFIX}", escape_local_path(url.path())));
            return Ok(path);
        };

        // Hosts cannot start with a dot, which keeps them apart from `.local`.
        if host.is_empty() || host.starts_with('.') || host.contains(['/', '\\']) {
            return Err(invalid());
        }
        let mut components: Vec<&str> = url.path().trim_start_matches('/').split('/').collect();
        if components
            .iter()
            .any(|component| matches!(*component, "" | "." | "..") || component.contains('\\'))
        {
            return Err(invalid());
        }
        let Some(name) = components.pop() else {
            return Err(invalid());
        };

        path.push(host);
        path.extend(components);
        path.push(format!("{name}{MIRROR_SUFFIX}"));
        Ok(path)
    }

    /// Returns an up-to-date bare mirror of `url`, cloning it on first use.
    ///
    /// Concurrent calls for the same remote are serialized; the later one sees the fresh fetch
    /// and does not go to the network again.
    pub async fn mirror(&self, url: &GitUrl) -> Result<PathBuf, CacheError> {
        let path = self.mirror_path(url)?;
        let entry_lock = self.in_flight.entry(url.clone()).or_default().clone();
        let _guard = entry_lock.lock().await;

        if self.git.is_repository(&path).await {
            trace!("Using existing mirror at {}", path.display());
            self.git
                .fetch_if_needed(&path, url, Some(MIRROR_REFSPEC))
                .await?;
            return Ok(path);
        }

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!("Removed broken mirror at {}", path.display()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => return Err(error.into()),
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!("Creating mirror of {} at {}", url, path.display());
        self.git.clone_repository(url, &path, true).await?;
        Ok(path)
    }

    /// Deletes every mirror and forgets all recorded fetches.
    pub async fn clear(&self) -> Result<(), CacheError> {
        info!(
            "Clearing repofetch mirror cache {}.",
            self.location.display()
        );
        let mut entries = tokio::fs::read_dir(&self.location).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name() == LOCK_FILE {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        self.git.fetch_cache().clear();
        Ok(())
    }

    fn acquire_lock(location: &Path) -> Result<FileLock, CacheError> {
        let location = location.join(LOCK_FILE);
        debug!(
            "Acquiring a lock on the cache location: {}",
            location.display()
        );
        let lock = FileLock::new(&location)?;
        info!("Acquired a lock on {}", lock.path().display());
        Ok(lock)
    }
}

/// Flattens a local path into a single file name, reversibly.
fn escape_local_path(path: &str) -> String {
    path.replace('%', "%25").replace('/', "%2F")
}
