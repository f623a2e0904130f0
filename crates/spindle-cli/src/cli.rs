//! CLI definitions for spindle.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "spindle")]
#[command(about = "Durable task queue and dispatcher")]
#[command(version)]
pub(crate) struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "SPINDLE_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the dispatcher until Ctrl-C
    Run {
        /// Configuration file (TOML)
        #[arg(short, long, env = "SPINDLE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Submit the sample email and data-process tasks and wait for them
    Demo {
        /// Configuration file (TOML)
        #[arg(short, long, env = "SPINDLE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Print one task record from a SQLite store
    Status {
        /// SQLite database path
        #[arg(long)]
        db: PathBuf,

        /// Task id (`task-01H...` or bare ULID)
        task_id: String,
    },

    /// List dead-lettered tasks, most recent first
    DeadLetters {
        /// SQLite database path
        #[arg(long)]
        db: PathBuf,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Per-queue counts by state
    Stats {
        /// SQLite database path
        #[arg(long)]
        db: PathBuf,

        /// Configuration file naming the queues (defaults otherwise)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
