use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Sprint board notifications from the terminal.
#[derive(Parser, Debug)]
#[command(name = "sbnotify", version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "SBNOTIFY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Extra session cookies (`name=value; other=value`), merged over the configured ones
    #[arg(long, global = true)]
    pub cookie: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Stay connected and print notifications as they arrive
    Watch {
        /// User whose notification topic to join
        #[arg(short, long)]
        user: String,

        /// Print one JSON object per line
        #[arg(long)]
        json: bool,
    },

    /// Fetch and print the current notification list
    List {
        #[arg(long)]
        json: bool,

        /// Only show unread notifications
        #[arg(long)]
        unread: bool,
    },

    /// Mark one notification as read
    MarkRead {
        #[arg(short, long)]
        user: String,

        /// Notification id
        id: String,
    },

    /// Mark all notifications as read
    MarkAllRead {
        #[arg(short, long)]
        user: String,
    },

    /// Show configuration
    Config {
        /// Print the effective configuration
        #[arg(long)]
        show: bool,
    },
}

impl Commands {
    pub fn wants_json(&self) -> bool {
        matches!(
            self,
            Commands::Watch { json: true, .. } | Commands::List { json: true, .. }
        )
    }
}
