use std::{
    cmp::Ordering,
    collections::HashMap,
    ffi::OsString,
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, trace};
use tokio_util::sync::CancellationToken;

use crate::process::{ProcessRunner, TokioProcessRunner};

use super::{
    command::{GitCommand, GitRequest},
    FetchCache, GitError, GitUrl, Submodule, SubmoduleEntry,
};

pub const DEFAULT_GIT_EXECUTABLE: &str = "git";

/// The oldest git release whose command line behaves the way this crate expects.
pub const REQUIRED_GIT_VERSION: &str = "2.3.0";

const GITMODULES: &str = ".gitmodules";

/// Git operations on local repositories and their remotes.
///
/// Cloning is cheap: clones share the process runner, the [`FetchCache`] and the cancellation
/// token, so cancelling one cancels every operation started from any of them.
#[derive(Clone)]
pub struct GitClient {
    pub(super) git: GitCommand,
    fetch_cache: Arc<FetchCache>,
}

impl GitClient {
    pub fn new(runner: Arc<dyn ProcessRunner>, fetch_cache: Arc<FetchCache>) -> GitClient {
        GitClient {
            git: GitCommand::new(DEFAULT_GIT_EXECUTABLE, runner, CancellationToken::new()),
            fetch_cache,
        }
    }

    /// Client that runs the `git` found on `PATH`.
    pub fn system() -> GitClient {
        GitClient::new(Arc::new(TokioProcessRunner), Arc::new(FetchCache::default()))
    }

    pub fn with_executable(self, executable: impl Into<PathBuf>) -> GitClient {
        GitClient {
            git: self.git.with_executable(executable),
            ..self
        }
    }

    pub fn with_cancellation(self, cancel: CancellationToken) -> GitClient {
        GitClient {
            git: self.git.with_cancellation(cancel),
            ..self
        }
    }

    pub fn command(&self) -> &GitCommand {
        &self.git
    }

    pub fn fetch_cache(&self) -> &Arc<FetchCache> {
        &self.fetch_cache
    }

    pub fn cancellation(&self) -> &CancellationToken {
        self.git.cancellation()
    }

    /// Checks that the installed git is at least `required`.
    pub async fn ensure_git_version(&self, required: &str) -> Result<bool, GitError> {
        let output = self.git.run(["--version"], None).await?;
        Ok(version_satisfies(&output, required))
    }

    /// Clones `source` into `destination`, which must not exist or be empty.
    pub async fn clone_repository(
        &self,
        source: &GitUrl,
        destination: &Path,
        bare: bool,
    ) -> Result<(), GitError> {
        let mut args = vec![OsString::from("clone")];
        if bare {
            args.push("--bare".into());
        }
        args.push("--quiet".into());
        args.push(source.as_str().into());
        args.push(destination.as_os_str().to_owned());

        self.git.run(args, None).await?;
        debug!("Cloned {} into {}", source, destination.display());
        self.fetch_cache.record_fetch(source);
        Ok(())
    }

    /// Fetches from `remote` (or the configured default remote), pruning stale refs.
    pub async fn fetch(
        &self,
        repository: &Path,
        remote: Option<&GitUrl>,
        refspec: Option<&str>,
    ) -> Result<(), GitError> {
        let mut args = vec!["fetch", "--prune", "--quiet"];
        if let Some(remote) = remote {
            args.push(remote.as_str());
        }
        // Tags need an explicit refspec to be pruned.
        args.push("refs/tags/*:refs/tags/*");
        if let Some(refspec) = refspec {
            args.push(refspec);
        }

        self.git.run(args, Some(repository)).await?;
        if let Some(remote) = remote {
            debug!("Fetched {} into {}", remote, repository.display());
            self.fetch_cache.record_fetch(remote);
        }
        Ok(())
    }

    /// Fetches only if `remote` was not fetched within the [`FetchCache`] interval.
    /// Returns whether a fetch ran.
    pub async fn fetch_if_needed(
        &self,
        repository: &Path,
        remote: &GitUrl,
        refspec: Option<&str>,
    ) -> Result<bool, GitError> {
        if !self.fetch_cache.needs_fetch(remote) {
            trace!(
                "Skipping fetch of {}, fetched less than {:?} ago",
                remote,
                self.fetch_cache.interval()
            );
            return Ok(false);
        }
        self.fetch(repository, Some(remote), refspec).await?;
        Ok(true)
    }

    /// Tags of the repository, last listed first.
    pub async fn list_tags(&self, repository: &Path) -> Result<Tags, GitError> {
        let output = self
            .git
            .run(["tag", "--column=never"], Some(repository))
            .await?;
        Ok(Tags::new(&output, self.cancellation().clone()))
    }

    /// Text of `path` at `revision`.
    pub async fn file_contents(
        &self,
        repository: &Path,
        path: &str,
        revision: &str,
    ) -> Result<String, GitError> {
        let object = format!("{revision}:{path}");
        self.git
            .run(["show", object.as_str()], Some(repository))
            .await
    }

    /// Checks out `revision` of `repository` (usually bare) into `destination`, creating it if
    /// needed. Submodules are not touched.
    pub async fn checkout_working_tree(
        &self,
        repository: &Path,
        destination: &Path,
        revision: &str,
    ) -> Result<(), GitError> {
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|error| {
                GitError::checkout_failed(destination, "could not create working directory", error)
            })?;
        // git runs inside `repository`, so the work tree must not be relative.
        let work_tree = tokio::fs::canonicalize(destination)
            .await
            .map_err(|error| {
                GitError::checkout_failed(destination, "could not resolve working directory", error)
            })?;

        let mut env: HashMap<OsString, OsString> = std::env::vars_os().collect();
        env.insert("GIT_WORK_TREE".into(), work_tree.into_os_string());

        self.git
            .execute(
                GitRequest::new(["checkout", "--quiet", "--force", revision])
                    .in_repository(repository)
                    .environment(env),
            )
            .await?;
        debug!(
            "Checked out {} of {} into {}",
            revision,
            repository.display(),
            destination.display()
        );
        Ok(())
    }

    /// Commit that the submodule at `path` is pinned to in `revision`.
    pub async fn submodule_sha(
        &self,
        repository: &Path,
        path: &str,
        revision: &str,
    ) -> Result<String, GitError> {
        let args = ["ls-tree", "-z", revision, path];
        let output = self.git.run(args, Some(repository)).await?;
        parse_submodule_sha(&output, &args.join(" "))
    }

    /// Submodules declared in `.gitmodules` at `revision`, or in the working tree's `.gitmodules`
    /// when `revision` is `None`. A repository without submodules has no entries.
    pub async fn submodule_manifest_entries(
        &self,
        repository: &Path,
        revision: Option<&str>,
    ) -> Result<Vec<SubmoduleEntry>, GitError> {
        let mut base_args = vec!["config".to_owned(), "-z".to_owned()];
        match revision {
            Some(revision) => {
                base_args.push("--blob".to_owned());
                base_args.push(format!("{revision}:{GITMODULES}"));
            }
            None => {
                base_args.push("--file".to_owned());
                base_args.push(GITMODULES.to_owned());
            }
        }
        let base = || base_args.iter().map(String::as_str);

        let paths = match self
            .git
            .run(
                base().chain(["--get-regexp", r"submodule\..*\.path"]),
                Some(repository),
            )
            .await
        {
            Ok(output) => output,
            Err(GitError::Cancelled) => return Err(GitError::Cancelled),
            Err(error) => {
                trace!(
                    "No submodules declared in {}: {}",
                    repository.display(),
                    error
                );
                return Ok(Vec::new());
            }
        };

        let mut entries = Vec::new();
        for (name, path) in parse_config_entries(&paths, "submodule.", ".path") {
            let key = format!("submodule.{name}.url");
            let url = self
                .git
                .run(base().chain(["--get", key.as_str()]), Some(repository))
                .await?;
            let url = url.strip_suffix('\0').unwrap_or(&url);
            entries.push(SubmoduleEntry {
                name,
                path,
                url: GitUrl::new(url),
            });
        }
        Ok(entries)
    }

    /// `repository` itself when bare, otherwise the top level of its working tree.
    pub async fn root_directory(&self, repository: &Path) -> Result<PathBuf, GitError> {
        let is_bare = self
            .git
            .run(["rev-parse", "--is-bare-repository"], Some(repository))
            .await?;
        if is_bare.trim() == "true" {
            return Ok(repository.to_owned());
        }

        let output = self
            .git
            .run(["rev-parse", "--show-toplevel"], Some(repository))
            .await?;
        let root = PathBuf::from(output.trim_end_matches(&['\r', '\n'][..]));
        match tokio::fs::metadata(&root).await {
            Ok(_) => Ok(root),
            Err(_) => Err(GitError::Internal(format!(
                "Unreadable file path output from git: {output:?}"
            ))),
        }
    }

    /// Submodules of `repository` at `revision` with the commits they are pinned to.
    /// Anything that is not a repository has no submodules.
    pub async fn list_submodules(
        &self,
        repository: &Path,
        revision: &str,
    ) -> Result<Vec<Submodule>, GitError> {
        if !self.is_repository(repository).await {
            return Ok(Vec::new());
        }
        let root = self.root_directory(repository).await?;
        let entries = self
            .submodule_manifest_entries(repository, Some(revision))
            .await?;

        let mut submodules = Vec::with_capacity(entries.len());
        for SubmoduleEntry { name, path, url } in entries {
            let sha = self.submodule_sha(&root, &path, revision).await?;
            submodules.push(Submodule {
                name,
                path,
                url,
                sha,
            });
        }
        Ok(submodules)
    }

    /// Whether `pattern` names a branch (and not a tag) in `repository`.
    pub async fn branch_exists(&self, repository: &Path, pattern: &str) -> bool {
        if !is_directory(repository).await {
            return false;
        }
        let (branch, tag) = tokio::join!(
            self.git.run(["show-ref", pattern], Some(repository)),
            self.git.run(["show-ref", "--tags", pattern], Some(repository)),
        );
        branch.is_ok() && tag.is_err()
    }

    /// Whether `revision` resolves to a commit in `repository`.
    pub async fn commit_exists(&self, repository: &Path, revision: &str) -> bool {
        if !is_directory(repository).await {
            return false;
        }
        let commit = format!("{revision}^{{commit}}");
        self.git
            .run(["rev-parse", commit.as_str()], Some(repository))
            .await
            .is_ok()
    }

    /// Object SHA that `reference` points at.
    pub async fn resolve_reference(
        &self,
        repository: &Path,
        reference: &str,
    ) -> Result<String, GitError> {
        let object = format!("{reference}^{{object}}");
        let result = async {
            ensure_directory(repository).await?;
            self.git
                .run(["rev-parse", object.as_str()], Some(repository))
                .await
        }
        .await;

        match result {
            Ok(output) => Ok(output.trim().to_owned()),
            Err(GitError::Cancelled) => Err(GitError::Cancelled),
            Err(error) => Err(GitError::checkout_failed(
                repository,
                format!("No object named \"{reference}\" exists"),
                error,
            )),
        }
    }

    /// SHA of the tag named `tag`.
    pub async fn resolve_tag(&self, repository: &Path, tag: &str) -> Result<String, GitError> {
        match self
            .git
            .run(["show-ref", "--tags", "--hash", tag], Some(repository))
            .await
        {
            Ok(output) => Ok(output.lines().next().unwrap_or_default().trim().to_owned()),
            Err(GitError::Cancelled) => Err(GitError::Cancelled),
            Err(error) => Err(GitError::checkout_failed(
                repository,
                format!("No tag named \"{tag}\" exists"),
                error,
            )),
        }
    }

    /// Whether `directory` exists and git can locate a git directory for it.
    pub async fn is_repository(&self, directory: &Path) -> bool {
        if !is_directory(directory).await {
            return false;
        }
        let Ok(output) = self
            .git
            .run(["rev-parse", "--git-dir"], Some(directory))
            .await
        else {
            return false;
        };

        let git_dir = Path::new(output.trim_end_matches(&['\r', '\n'][..]));
        if git_dir.is_absolute() {
            is_directory(git_dir).await
        } else {
            is_directory(&directory.join(git_dir)).await
        }
    }

    /// Entry names directly under `path` in `treeish`. Works in bare repositories.
    pub async fn list_tree(
        &self,
        repository: &Path,
        treeish: &str,
        path: &str,
    ) -> Result<Vec<String>, GitError> {
        // ls-tree treats "dir" and "dir/" differently; repeated slashes are harmless.
        let directory = format!("{path}/");
        let output = self
            .git
            .run(
                [
                    "ls-tree",
                    "-z",
                    "--full-name",
                    "--name-only",
                    treeish,
                    directory.as_str(),
                ],
                Some(repository),
            )
            .await?;
        Ok(output
            .split('\0')
            .filter(|entry| !entry.is_empty())
            .map(str::to_owned)
            .collect())
    }
}

/// Tag names produced by [`GitClient::list_tags`].
///
/// Iteration stops early, without yielding further names, once the client is cancelled.
#[derive(Debug)]
pub struct Tags {
    remaining: std::iter::Rev<std::vec::IntoIter<String>>,
    cancel: CancellationToken,
}

impl Tags {
    fn new(output: &str, cancel: CancellationToken) -> Tags {
        let tags: Vec<String> = output
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        Tags {
            remaining: tags.into_iter().rev(),
            cancel,
        }
    }
}

impl Iterator for Tags {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.remaining.next()
    }
}

async fn is_directory(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

async fn ensure_directory(path: &Path) -> Result<(), GitError> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(GitError::ReadFailed {
            path: path.to_owned(),
            source: None,
        }),
        Err(error) => Err(GitError::ReadFailed {
            path: path.to_owned(),
            source: Some(error),
        }),
    }
}

/// Extracts the object SHA from `ls-tree` output such as
/// `160000 commit 083fd81ecf00124cbdaa8f86ef10377737f6325a\tExternal/ObjectiveGit`.
pub(crate) fn parse_submodule_sha(output: &str, command: &str) -> Result<String, GitError> {
    output
        .split(|c: char| c == ' ' || c == '\t')
        .filter(|field| !field.is_empty())
        .nth(2)
        .map(str::to_owned)
        .ok_or_else(|| GitError::Parse {
            command: command.to_owned(),
            output: output.to_owned(),
        })
}

/// Parses `git config -z` output (NUL separated `key\nvalue` records) into `(key, value)` pairs,
/// keeping only keys that start with `key_prefix` and cutting each key at `key_suffix`.
pub(crate) fn parse_config_entries(
    contents: &str,
    key_prefix: &str,
    key_suffix: &str,
) -> Vec<(String, String)> {
    contents
        .split('\0')
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (key, value) = entry.split_once('\n')?;
            let key = key.strip_prefix(key_prefix)?;
            let key = match key_suffix {
                "" => key,
                suffix => key.find(suffix).map_or(key, |end| &key[..end]),
            };
            (!key.is_empty()).then(|| (key.to_owned(), value.to_owned()))
        })
        .collect()
}

fn version_satisfies(output: &str, required: &str) -> bool {
    match output.trim().strip_prefix("git version ") {
        Some(version) => compare_versions(version, required) != Ordering::Less,
        None => false,
    }
}

/// Compares the leading numeric components of two dotted versions, so `2.39.2 (Apple Git-143)`
/// is newer than `2.3.0`.
fn compare_versions(a: &str, b: &str) -> Ordering {
    fn components(version: &str) -> Vec<u64> {
        version
            .split('.')
            .map_while(|component| {
                let digits: String = component
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse().ok()
            })
            .collect()
    }

    let (a, b) = (components(a), components(b));
    let len = a.len().max(b.len());
    for index in 0..len {
        let ordering = a
            .get(index)
            .unwrap_or(&0)
            .cmp(b.get(index).unwrap_or(&0));
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
