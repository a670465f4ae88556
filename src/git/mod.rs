pub mod cache;
pub mod command;
mod error;
mod fetch_cache;
mod repository;
mod submodule;
mod url;

pub use error::{GitError, PurgeErrors};
pub use fetch_cache::{Clock, FetchCache, SystemClock, DEFAULT_FETCH_INTERVAL};
pub use repository::{GitClient, Tags, DEFAULT_GIT_EXECUTABLE, REQUIRED_GIT_VERSION};
pub use submodule::{purge_git_directories, Submodule, SubmoduleEntry};
pub use url::{strip_git_suffix, GitUrl};
