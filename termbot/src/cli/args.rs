//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// termbot - drive terminal sessions and a coding assistant from chat
#[derive(Parser, Debug)]
#[command(name = "termbot")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/termbot/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Recover sessions and serve the inbound endpoint
    Serve {
        /// Port to listen on (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message to the running server and print the reply
    Send {
        /// Target session id or name
        #[arg(short, long)]
        session: Option<String>,

        /// Conversation key; each topic keeps its own current session
        #[arg(short, long)]
        topic: Option<String>,

        /// Sender identity
        #[arg(long, default_value = "cli")]
        sender: String,

        /// Message text
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },

    /// List sessions
    Sessions,

    /// List live tmux sessions that have no session record
    Orphans,

    /// Verify tmux and the assistant executable are available
    Check,
}
