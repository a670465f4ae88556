use std::path::PathBuf;

use clap::Parser;

/// Mirrors, checks out and inspects git dependencies, including their submodules.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    #[clap(short, long)]
    /// Location of the mirror cache directory [default: $HOME/.repofetch/cache]
    pub cache_directory: Option<PathBuf>,
    #[clap(long)]
    /// Git binary to run [default: git]
    pub git_executable: Option<PathBuf>,
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Clones or refreshes the bare mirror of a remote and prints its location
    Mirror { url: String },
    /// Checks out a revision of a remote, with its submodules, and prints the commit
    Checkout {
        url: String,
        revision: String,
        destination: PathBuf,
        #[clap(long)]
        /// Register the dependency as a git submodule of the enclosing repository
        use_submodules: bool,
    },
    /// Lists the submodules of a local repository at a revision
    Submodules {
        repository: PathBuf,
        #[clap(short, long, default_value = "HEAD")]
        revision: String,
    },
    /// Lists the tags of a local repository
    Tags { repository: PathBuf },
    /// Resolves a reference of a local repository to an object SHA
    Resolve {
        repository: PathBuf,
        reference: String,
        #[clap(long)]
        /// Only look for tags
        tag: bool,
    },
    /// Removes every mirror from the cache
    ClearCache,
}
