use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    cli::command_handlers::{
        do_checkout, do_clear_cache, do_list_submodules, do_list_tags, do_mirror, do_resolve,
    },
    git::{cache::MirrorCache, GitClient, GitUrl, Submodule},
};

mod builder;

pub use builder::RepofetchBuilder;

pub struct Repofetch {
    cache: Arc<MirrorCache>,
}

/// How submodules end up in a checked out dependency.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum SubmoduleMode {
    /// Plain source files, recursively, without any git metadata.
    #[default]
    Plain,
    /// The dependency itself is registered as a git submodule of the repository that contains
    /// the destination, and its submodules are initialized by git.
    Submodules,
}

/// What [`Repofetch::resolve`] looks for.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ReferenceKind {
    /// Any revision: branch, tag, commit or symbolic reference.
    Any,
    Tag,
}

impl Repofetch {
    pub fn builder() -> RepofetchBuilder {
        RepofetchBuilder::default()
    }

    pub fn git(&self) -> &GitClient {
        self.cache.git()
    }

    pub fn cache(&self) -> &MirrorCache {
        &self.cache
    }

    /// Clones or refreshes the local mirror of `url` and returns its location
    pub async fn mirror(&self, url: &GitUrl) -> anyhow::Result<PathBuf> {
        do_mirror(&self.cache, url).await
    }

    /// Checks out `revision` of `url` into `destination`, including submodules.
    /// Returns the commit that was checked out.
    pub async fn checkout(
        &self,
        url: &GitUrl,
        revision: &str,
        destination: impl AsRef<Path>,
        mode: SubmoduleMode,
    ) -> anyhow::Result<String> {
        do_checkout(&self.cache, url, revision, destination.as_ref(), mode).await
    }

    /// Lists the submodules of a local repository at `revision`
    pub async fn submodules(
        &self,
        repository: impl AsRef<Path>,
        revision: &str,
    ) -> anyhow::Result<Vec<Submodule>> {
        do_list_submodules(self.git(), repository.as_ref(), revision).await
    }

    /// Lists the tags of a local repository, most recent listing entry first
    pub async fn tags(&self, repository: impl AsRef<Path>) -> anyhow::Result<Vec<String>> {
        do_list_tags(self.git(), repository.as_ref()).await
    }

    pub async fn resolve(
        &self,
        repository: impl AsRef<Path>,
        reference: &str,
        kind: ReferenceKind,
    ) -> anyhow::Result<String> {
        do_resolve(self.git(), repository.as_ref(), reference, kind).await
    }

    pub async fn clear_cache(&self) -> anyhow::Result<()> {
        do_clear_cache(&self.cache).await
    }
}
