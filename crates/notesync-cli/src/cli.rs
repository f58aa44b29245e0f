use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Offline-first notes that sync when a server is reachable")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Quick capture: notesync "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "add")]
    New {
        /// Title (defaults to the first line of the content)
        #[arg(short, long)]
        title: Option<String>,
        /// Mark the note as unfinished
        #[arg(long)]
        draft: bool,
        /// Note content (stdin or $EDITOR when omitted)
        content: Vec<String>,
    },
    /// Edit an existing note; opens $EDITOR on the body unless flags are given
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// Replace the title
        #[arg(short, long)]
        title: Option<String>,
        /// Mark the note as unfinished
        #[arg(long, conflicts_with = "finalize")]
        draft: bool,
        /// Clear the unfinished marker
        #[arg(long = "final")]
        finalize: bool,
    },
    /// List active notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print one note
    Show {
        /// Note ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a note to the trash
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Bring a note back from the trash
    Restore {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Permanently delete a trashed note, locally and on the server
    Purge {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// List trashed notes
    Trash {
        /// Show the server's trash instead of the local one
        #[arg(long)]
        remote: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Purge trashed notes older than the retention window
    Sweep,
    /// Synchronize with the server
    Sync {
        /// Fetch every note instead of changes since the last sync
        #[arg(long, conflicts_with = "note")]
        full: bool,
        /// Push a single note instead of running a batch pass
        #[arg(long, value_name = "ID")]
        note: Option<String>,
    },
    /// Store a session and run a full sync
    Login {
        /// User id the token was issued for
        #[arg(long, value_name = "ID")]
        user: String,
        /// Bearer token (read from stdin when omitted)
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
    },
    /// Forget the stored session; local notes are kept
    Logout,
    /// Show session and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the foreground until interrupted
    Watch {
        /// Seconds between sync ticks (defaults to NOTESYNC_SYNC_INTERVAL_SECS)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
}
