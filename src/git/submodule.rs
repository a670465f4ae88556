use std::{ffi::OsStr, io, path::Path};

use log::{debug, info};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::{error::PurgeErrors, GitClient, GitError, GitUrl};

const GIT_DIRECTORY: &str = ".git";

/// A repository nested in another one, pinned to a commit of its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Submodule {
    pub name: String,
    /// Location relative to the parent's working tree.
    pub path: String,
    pub url: GitUrl,
    pub sha: String,
}

/// A submodule as declared in `.gitmodules`, before its pinned commit is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmoduleEntry {
    pub name: String,
    pub path: String,
    pub url: GitUrl,
}

impl GitClient {
    /// Makes `submodule` a registered submodule of the working repository `repository`, checked
    /// out at its pinned commit. Objects are fetched from `fetch_url` (typically a local mirror)
    /// while the recorded remote stays `submodule.url`.
    pub async fn add_submodule_to_repository(
        &self,
        repository: &Path,
        submodule: &Submodule,
        fetch_url: &GitUrl,
    ) -> Result<(), GitError> {
        let submodule_dir = repository.join(&submodule.path);
        let exists = self.is_repository(&submodule_dir).await
            && tokio::fs::try_exists(submodule_dir.join(GIT_DIRECTORY))
                .await
                .unwrap_or(false);

        if exists {
            debug!(
                "Updating existing submodule {} at {}",
                submodule.name,
                submodule_dir.display()
            );
            self.fetch(
                &submodule_dir,
                Some(fetch_url),
                Some("+refs/heads/*:refs/remotes/origin/*"),
            )
            .await?;
            let url_key = format!("submodule.{}.url", submodule.name);
            self.git
                .run(
                    [
                        "config",
                        "--file",
                        ".gitmodules",
                        url_key.as_str(),
                        submodule.url.as_str(),
                    ],
                    Some(repository),
                )
                .await?;
            self.git
                .run(
                    [
                        OsStr::new("submodule"),
                        OsStr::new("--quiet"),
                        OsStr::new("sync"),
                        OsStr::new("--recursive"),
                        submodule_dir.as_os_str(),
                    ],
                    Some(repository),
                )
                .await?;
            self.checkout_submodule(submodule, &submodule_dir).await?;
            self.git
                .run(["add", "--force", submodule.path.as_str()], Some(repository))
                .await?;
            return Ok(());
        }

        // Clone refuses to write into a non-empty directory. A failed removal shows up as a
        // clone failure right after.
        if let Err(error) = tokio::fs::remove_dir_all(&submodule_dir).await {
            if error.kind() != io::ErrorKind::NotFound {
                debug!(
                    "Could not remove stale {}: {}",
                    submodule_dir.display(),
                    error
                );
            }
        }

        self.clone_repository(fetch_url, &submodule_dir, false).await?;
        self.git
            .run(
                ["remote", "set-url", "origin", submodule.url.as_str()],
                Some(&submodule_dir),
            )
            .await?;
        self.checkout_submodule(submodule, &submodule_dir).await?;

        // Fails when the path is already in the index, which is fine.
        match self
            .git
            .run(
                [
                    "submodule",
                    "--quiet",
                    "add",
                    "--force",
                    "--name",
                    submodule.name.as_str(),
                    "--",
                    submodule.url.as_str(),
                    submodule.path.as_str(),
                ],
                Some(repository),
            )
            .await
        {
            Ok(_) => {}
            Err(GitError::Cancelled) => return Err(GitError::Cancelled),
            Err(error) => debug!("Submodule {} already registered: {}", submodule.name, error),
        }

        self.git
            .run(
                ["submodule", "--quiet", "init", "--", submodule.path.as_str()],
                Some(repository),
            )
            .await?;
        info!(
            "Added submodule {} at {}",
            submodule.name,
            submodule_dir.display()
        );
        Ok(())
    }

    /// Materializes `submodule` under `working_directory` as plain files: cloned, checked out
    /// recursively, then stripped of every nested `.git`.
    pub async fn clone_submodule_into_working_directory(
        &self,
        submodule: &Submodule,
        working_directory: &Path,
    ) -> Result<(), GitError> {
        let submodule_dir = working_directory.join(&submodule.path);

        match tokio::fs::remove_dir_all(&submodule_dir).await {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => {
                return Err(GitError::checkout_failed(
                    &submodule_dir,
                    "could not remove submodule checkout",
                    error,
                ))
            }
        }

        self.clone_repository(&submodule.url, &submodule_dir, false).await?;
        self.checkout_submodule(submodule, &submodule_dir).await?;
        purge_git_directories(&submodule_dir, self.cancellation()).await?;
        debug!(
            "Checked out submodule {} at {}",
            submodule.name,
            submodule_dir.display()
        );
        Ok(())
    }

    /// Checks out the pinned commit in `submodule_dir` and updates its own submodules.
    pub async fn checkout_submodule(
        &self,
        submodule: &Submodule,
        submodule_dir: &Path,
    ) -> Result<(), GitError> {
        self.git
            .run(
                ["checkout", "--quiet", submodule.sha.as_str()],
                Some(submodule_dir),
            )
            .await?;
        self.git
            .run(
                ["submodule", "--quiet", "update", "--init", "--recursive"],
                Some(submodule_dir),
            )
            .await?;
        Ok(())
    }
}

/// Removes every `.git` entry below `directory` (its own included), without descending into
/// removed directories. Failures are collected per entry; only cancellation stops the walk.
pub async fn purge_git_directories(
    directory: &Path,
    cancel: &CancellationToken,
) -> Result<(), GitError> {
    let root = directory.to_owned();
    let cancel = cancel.clone();
    let errors = tokio::task::spawn_blocking(move || purge_blocking(&root, &cancel, remove_entry))
        .await
        .map_err(|error| GitError::Internal(format!("purge task failed: {error}")))??;

    if errors.is_empty() {
        Ok(())
    } else {
        Err(GitError::checkout_failed(
            directory,
            "could not remove nested git metadata",
            PurgeErrors(errors),
        ))
    }
}

fn remove_entry(path: &Path, is_dir: bool) -> io::Result<()> {
    if is_dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

fn purge_blocking(
    root: &Path,
    cancel: &CancellationToken,
    remove: impl Fn(&Path, bool) -> io::Result<()>,
) -> Result<Vec<GitError>, GitError> {
    let mut errors = Vec::new();
    let mut entries = WalkDir::new(root).min_depth(1).into_iter();

    while let Some(entry) = entries.next() {
        if cancel.is_cancelled() {
            return Err(GitError::Cancelled);
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                let path = error.path().map_or_else(|| root.to_owned(), Path::to_owned);
                errors.push(GitError::checkout_failed(
                    path,
                    "could not enumerate directory",
                    error,
                ));
                continue;
            }
        };
        if entry.file_name() != GIT_DIRECTORY {
            continue;
        }

        let path = entry.path();
        let is_dir = entry.file_type().is_dir();
        if is_dir {
            entries.skip_current_dir();
        }
        if let Err(error) = remove(path, is_dir) {
            errors.push(GitError::checkout_failed(
                path,
                format!("could not remove {}", path.display()),
                error,
            ));
        }
    }
    Ok(errors)
}
