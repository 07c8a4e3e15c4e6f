//! Command-line interface module.

mod args;
pub mod init;
pub mod routes;
pub mod serve;

pub use args::{Cli, Commands};
