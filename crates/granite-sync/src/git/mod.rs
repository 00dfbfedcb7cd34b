//! Git command execution and repository operations.

pub mod auth;
pub mod executor;
pub mod parse;
pub mod repository;
pub mod types;

pub use executor::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use repository::GitRepository;
pub use types::*;
