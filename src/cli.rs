use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding sources, snapshots, read state and history.
    #[arg(long, default_value = "data", global = true)]
    pub data_dir: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run one ingestion pass across all enabled sources.
    Refresh,
    Sources {
        #[command(subcommand)]
        command: SourcesCommand,
    },
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    Read {
        #[command(subcommand)]
        command: ReadCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum SourcesCommand {
    /// List all registered sources.
    List,
    Add(SourceAddArgs),
    /// Remove a user-defined source by name.
    Remove {
        name: String,
    },
    /// Enable a source by name.
    Enable {
        name: String,
    },
    /// Disable a source by name (it is skipped on refresh).
    Disable {
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct SourceAddArgs {
    /// Display name, unique across all sources.
    #[arg(long)]
    pub name: String,

    /// Feed URL to poll.
    #[arg(long)]
    pub url: String,

    /// Category id (e.g. `technology`); unknown ids fall back to Uncategorized.
    #[arg(long, default_value = crate::categories::DEFAULT_CATEGORY_ID)]
    pub category: String,
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// Print the reading history, most recent first.
    List,
    /// Delete a single history entry by link.
    Delete { link: String },
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum ReadCommand {
    /// Mark an article link as read.
    Mark { link: String },
    /// Forget all read marks.
    Clear,
}
