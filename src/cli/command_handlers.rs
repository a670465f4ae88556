use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context};
use log::{debug, info};
use tokio::task::JoinSet;

use crate::{
    api::{ReferenceKind, SubmoduleMode},
    git::{cache::MirrorCache, GitClient, GitUrl, Submodule},
};

/// Handler to mirror command
pub async fn do_mirror(cache: &MirrorCache, url: &GitUrl) -> anyhow::Result<PathBuf> {
    let path = cache.mirror(url).await?;
    debug!("Mirror of {} is at {}", url, path.display());
    Ok(path)
}

/// Handler to checkout command
/// 1 - Mirrors the dependency and resolves the revision to a commit
/// 2 - Checks it out into the destination
/// 3 - Materializes its submodules, each from its own mirror
pub async fn do_checkout(
    cache: &Arc<MirrorCache>,
    url: &GitUrl,
    revision: &str,
    destination: &Path,
    mode: SubmoduleMode,
) -> anyhow::Result<String> {
    let git = cache.git();
    let mirror = cache.mirror(url).await?;
    let sha = git.resolve_reference(&mirror, revision).await?;

    match mode {
        SubmoduleMode::Plain => {
            git.checkout_working_tree(&mirror, destination, &sha)
                .await?;
            let submodules = git.list_submodules(&mirror, &sha).await?;
            checkout_plain_submodules(cache, url, submodules, destination).await?;
        }
        SubmoduleMode::Submodules => {
            add_as_submodule(git, url, &mirror, &sha, destination).await?;
        }
    }

    info!(
        "Checked out {} at {} into {}",
        url,
        sha,
        destination.display()
    );
    Ok(sha)
}

async fn checkout_plain_submodules(
    cache: &Arc<MirrorCache>,
    parent: &GitUrl,
    submodules: Vec<Submodule>,
    working_directory: &Path,
) -> anyhow::Result<()> {
    let mut tasks = JoinSet::new();
    for submodule in submodules {
        let cache = cache.clone();
        let remote = submodule.url.resolved_against(parent);
        let working_directory = working_directory.to_owned();
        tasks.spawn(async move {
            let mirror = cache.mirror(&remote).await?;
            let from_mirror = Submodule {
                url: GitUrl::new(mirror.to_string_lossy()),
                ..submodule
            };
            cache
                .git()
                .clone_submodule_into_working_directory(&from_mirror, &working_directory)
                .await?;
            anyhow::Ok(())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result??;
    }
    Ok(())
}

async fn add_as_submodule(
    git: &GitClient,
    url: &GitUrl,
    mirror: &Path,
    sha: &str,
    destination: &Path,
) -> anyhow::Result<()> {
    let name = destination
        .file_name()
        .ok_or_else(|| anyhow!("{} does not name a directory", destination.display()))?;
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    tokio::fs::create_dir_all(parent).await?;
    let parent = tokio::fs::canonicalize(parent).await?;

    if !git.is_repository(&parent).await {
        bail!("{} is not inside a git working tree", parent.display());
    }
    let project = git.root_directory(&parent).await?;
    let path = relative_submodule_path(&parent.join(name), &project)?;

    let submodule = Submodule {
        name: path.clone(),
        path,
        url: url.clone(),
        sha: sha.to_owned(),
    };
    git.add_submodule_to_repository(
        &project,
        &submodule,
        &GitUrl::new(mirror.to_string_lossy()),
    )
    .await?;
    Ok(())
}

/// `/`-separated path of `directory` inside `project`, as `.gitmodules` records it.
fn relative_submodule_path(directory: &Path, project: &Path) -> anyhow::Result<String> {
    let relative = directory.strip_prefix(project).with_context(|| {
        format!(
            "{} is outside of the repository at {}",
            directory.display(),
            project.display()
        )
    })?;
    let components = relative
        .components()
        .map(|component| match component {
            Component::Normal(name) => Ok(name.to_string_lossy().into_owned()),
            other => Err(anyhow!("unexpected path component {:?}", other)),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if components.is_empty() {
        bail!("cannot add the repository root as a submodule");
    }
    Ok(components.join("/"))
}

/// Handler to submodules command
pub async fn do_list_submodules(
    git: &GitClient,
    repository: &Path,
    revision: &str,
) -> anyhow::Result<Vec<Submodule>> {
    Ok(git.list_submodules(repository, revision).await?)
}

/// Handler to tags command
pub async fn do_list_tags(git: &GitClient, repository: &Path) -> anyhow::Result<Vec<String>> {
    Ok(git.list_tags(repository).await?.collect())
}

/// Handler to resolve command
pub async fn do_resolve(
    git: &GitClient,
    repository: &Path,
    reference: &str,
    kind: ReferenceKind,
) -> anyhow::Result<String> {
    let sha = match kind {
        ReferenceKind::Any => git.resolve_reference(repository, reference).await?,
        ReferenceKind::Tag => git.resolve_tag(repository, reference).await?,
    };
    Ok(sha)
}

pub async fn do_clear_cache(cache: &MirrorCache) -> anyhow::Result<()> {
    cache.clear().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::{
        git::FetchCache,
        process::testing::{Reply, ScriptedRunner},
    };

    use super::*;

    use pretty_assertions::assert_eq;

    const SHA: &str = "1111111111111111111111111111111111111111";
    const LIB_SHA: &str = "2222222222222222222222222222222222222222";

    /// Clone that creates the destination, with metadata for non-bare clones.
    fn creating_clone() -> Reply {
        Reply::effect(|invocation| {
            let destination = PathBuf::from(invocation.args.last().ok_or("no destination")?);
            let bare = invocation.args.iter().any(|arg| arg == "--bare");
            let metadata = if bare { "objects" } else { ".git/objects" };
            fs::create_dir_all(destination.join(metadata)).map_err(|e| e.to_string())?;
            Ok(String::new())
        })
    }

    fn mirror_script() -> ScriptedRunner {
        ScriptedRunner::new()
            .reply(&["clone"], creating_clone())
            .reply(&["rev-parse", "--git-dir"], Reply::ok(".\n"))
            .reply(&["rev-parse", "--is-bare-repository"], Reply::ok("true\n"))
            .reply(&["rev-parse"], Reply::ok(format!("{SHA}\n")))
    }

    fn mirror_cache(location: &Path, runner: ScriptedRunner) -> (Arc<MirrorCache>, Arc<ScriptedRunner>) {
        let runner = Arc::new(runner);
        let git = GitClient::new(runner.clone(), Arc::new(FetchCache::default()));
        (
            Arc::new(MirrorCache::new(location.to_owned(), git).unwrap()),
            runner,
        )
    }

    #[tokio::test]
    async fn plain_checkout_materializes_submodules_from_mirrors() {
        let scratch = tempfile::tempdir().unwrap();
        let cache_dir = scratch.path().join("cache");
        let destination = scratch.path().join("Checkouts/App");
        let blob = format!("{SHA}:.gitmodules");
        let runner = mirror_script()
            .reply(
                &["config", "-z", "--blob", blob.as_str(), "--get-regexp"],
                Reply::ok("submodule.Lib.path\nVendor/Lib\0"),
            )
            .reply(&["config"], Reply::ok("https://example.com/lib.git\0"))
            .reply(
                &["ls-tree"],
                Reply::ok(format!("160000 commit {LIB_SHA}\tVendor/Lib\0")),
            );
        let (cache, runner) = mirror_cache(&cache_dir, runner);

        let sha = do_checkout(
            &cache,
            &GitUrl::new("https://example.com/app.git"),
            "main",
            &destination,
            SubmoduleMode::Plain,
        )
        .await
        .unwrap();

        assert_eq!(sha, SHA);
        let app_mirror = cache_dir.join("example.com/app.git");
        let lib_mirror = cache_dir.join("example.com/lib.git");
        let lib_checkout = destination.join("Vendor/Lib");
        let commands = runner.commands();
        assert_eq!(
            commands[0],
            format!(
                "clone --bare --quiet https://example.com/app.git {}",
                app_mirror.display()
            )
        );
        assert_eq!(commands[1], "rev-parse main^{object}");
        assert!(commands.contains(&format!("checkout --quiet --force {SHA}")));
        assert!(commands.contains(&format!(
            "clone --bare --quiet https://example.com/lib.git {}",
            lib_mirror.display()
        )));
        assert!(commands.contains(&format!(
            "clone --quiet {} {}",
            lib_mirror.display(),
            lib_checkout.display()
        )));
        assert!(commands.contains(&format!("checkout --quiet {LIB_SHA}")));
        assert!(destination.is_dir());
        assert!(lib_checkout.is_dir());
        assert!(!lib_checkout.join(".git").exists());
    }

    #[tokio::test]
    async fn relative_submodule_urls_follow_the_parent_remote() {
        let scratch = tempfile::tempdir().unwrap();
        let cache_dir = scratch.path().join("cache");
        let destination = scratch.path().join("Checkouts/App");
        let blob = format!("{SHA}:.gitmodules");
        let runner = mirror_script()
            .reply(
                &["config", "-z", "--blob", blob.as_str(), "--get-regexp"],
                Reply::ok("submodule.Lib.path\nVendor/Lib\0"),
            )
            .reply(&["config"], Reply::ok("../lib.git\0"))
            .reply(
                &["ls-tree"],
                Reply::ok(format!("160000 commit {LIB_SHA}\tVendor/Lib\0")),
            );
        let (cache, runner) = mirror_cache(&cache_dir, runner);

        do_checkout(
            &cache,
            &GitUrl::new("https://example.com/org/app.git"),
            "main",
            &destination,
            SubmoduleMode::Plain,
        )
        .await
        .unwrap();

        let lib_mirror = cache_dir.join("example.com/org/lib.git");
        assert!(runner.commands().contains(&format!(
            "clone --bare --quiet https://example.com/org/lib.git {}",
            lib_mirror.display()
        )));
        assert!(!cache_dir.join(".local").exists());
    }

    #[tokio::test]
    async fn submodule_mode_needs_an_enclosing_repository() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = ScriptedRunner::new()
            .reply(&["clone"], creating_clone())
            .reply(&["rev-parse", "--git-dir"], Reply::fail("fatal: not a git repository"))
            .reply(&["rev-parse"], Reply::ok(format!("{SHA}\n")));
        let (cache, _runner) = mirror_cache(&scratch.path().join("cache"), runner);

        let error = do_checkout(
            &cache,
            &GitUrl::new("https://example.com/app.git"),
            "main",
            &scratch.path().join("project/Dependencies/Checkouts/App"),
            SubmoduleMode::Submodules,
        )
        .await
        .unwrap_err();

        assert!(error.to_string().contains("is not inside a git working tree"));
    }

    #[tokio::test]
    async fn submodule_mode_registers_dependency_in_project() {
        let scratch = tempfile::tempdir().unwrap();
        let project = scratch.path().join("project");
        fs::create_dir_all(&project).unwrap();
        let project = project.canonicalize().unwrap();
        // The enclosing project is a working tree, mirrors are bare.
        let runner = ScriptedRunner::new()
            .reply(&["clone"], creating_clone())
            .reply(&["rev-parse", "--git-dir"], Reply::ok(".\n"))
            .reply(
                &["rev-parse", "--is-bare-repository"],
                Reply::effect(|invocation| {
                    let bare = invocation
                        .current_dir
                        .as_ref()
                        .is_some_and(|dir| dir.to_string_lossy().ends_with(".git"));
                    Ok(format!("{bare}\n"))
                }),
            )
            .reply(
                &["rev-parse", "--show-toplevel"],
                Reply::ok(format!("{}\n", project.display())),
            )
            .reply(&["rev-parse"], Reply::ok(format!("{SHA}\n")));
        let (cache, runner) = mirror_cache(&scratch.path().join("cache"), runner);

        do_checkout(
            &cache,
            &GitUrl::new("https://example.com/app.git"),
            "main",
            &project.join("Dependencies/Checkouts/App"),
            SubmoduleMode::Submodules,
        )
        .await
        .unwrap();

        let commands = runner.commands();
        assert!(commands.contains(
            &"submodule --quiet add --force --name Dependencies/Checkouts/App -- https://example.com/app.git Dependencies/Checkouts/App"
                .to_owned()
        ));
        assert!(commands.contains(&"submodule --quiet init -- Dependencies/Checkouts/App".to_owned()));
    }

    #[test]
    fn submodule_paths_are_relative_to_the_project() {
        assert_eq!(
            relative_submodule_path(Path::new("/work/app/Vendor/Lib"), Path::new("/work/app"))
                .unwrap(),
            "Vendor/Lib"
        );
        assert!(relative_submodule_path(Path::new("/elsewhere/Lib"), Path::new("/work/app")).is_err());
        assert!(relative_submodule_path(Path::new("/work/app"), Path::new("/work/app")).is_err());
    }
}
