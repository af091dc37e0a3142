//! CLI argument parsing and commands.

mod args;
mod commands;

pub use args::Cli;
pub use commands::execute;
