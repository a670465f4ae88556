pub mod cli;
pub mod config;
mod flock;
pub mod git;
pub mod process;

mod api;

pub use api::{ReferenceKind, Repofetch, RepofetchBuilder, SubmoduleMode};
