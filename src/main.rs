use std::error::Error;

use clap::Parser;
use log::warn;
use tokio_util::sync::CancellationToken;

use repofetch::{
    cli::args::{CliArgs, Command},
    config::RepofetchConfig,
    git::{GitUrl, REQUIRED_GIT_VERSION},
    ReferenceKind, Repofetch, SubmoduleMode,
};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let CliArgs {
        cmd,
        cache_directory,
        git_executable,
    } = CliArgs::parse();
    let config = RepofetchConfig::load()?;

    let cancellation = CancellationToken::new();
    let mut builder = Repofetch::builder().cancellation(cancellation.clone());
    if let Some(cache_directory) = cache_directory.or(config.cache_dir) {
        builder = builder.cache_directory(cache_directory);
    }
    if let Some(git_executable) = git_executable.or(config.git_executable) {
        builder = builder.git_executable(git_executable);
    }
    if let Some(fetch_interval) = config.fetch_interval {
        builder = builder.fetch_interval(fetch_interval);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping git");
                cancellation.cancel();
            }
        });

        let repofetch = builder.try_build()?;
        if !repofetch.git().ensure_git_version(REQUIRED_GIT_VERSION).await? {
            return Err(format!("git {} or later is required", REQUIRED_GIT_VERSION).into());
        }

        match cmd {
            Command::Mirror { url } => {
                let path = repofetch.mirror(&GitUrl::new(url)).await?;
                println!("{}", path.display());
            }
            Command::Checkout {
                url,
                revision,
                destination,
                use_submodules,
            } => {
                let mode = if use_submodules {
                    SubmoduleMode::Submodules
                } else {
                    SubmoduleMode::Plain
                };
                let sha = repofetch
                    .checkout(&GitUrl::new(url), &revision, destination, mode)
                    .await?;
                println!("{}", sha);
            }
            Command::Submodules {
                repository,
                revision,
            } => {
                for submodule in repofetch.submodules(repository, &revision).await? {
                    println!(
                        "{} {} {} {}",
                        submodule.sha, submodule.path, submodule.name, submodule.url
                    );
                }
            }
            Command::Tags { repository } => {
                for tag in repofetch.tags(repository).await? {
                    println!("{}", tag);
                }
            }
            Command::Resolve {
                repository,
                reference,
                tag,
            } => {
                let kind = if tag {
                    ReferenceKind::Tag
                } else {
                    ReferenceKind::Any
                };
                println!("{}", repofetch.resolve(repository, &reference, kind).await?);
            }
            Command::ClearCache => repofetch.clear_cache().await?,
        }
        Ok::<(), Box<dyn Error>>(())
    })
}
