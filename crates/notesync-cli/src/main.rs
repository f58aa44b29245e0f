//! notesync CLI - offline-first notes from the command line
//!
//! Every command works against the local store; `sync`, `login` and `watch`
//! talk to the server configured in `NOTESYNC_API_URL`.

mod app;
mod cli;
mod commands;
mod error;


use clap::{CommandFactory, Parser};
use notesync_core::config::SyncSettings;

use crate::app::App;
use crate::cli::{Cli, Commands};
use crate::commands::common::resolve_db_path;
use crate::commands::notes::{run_edit, run_list, run_new, run_show};
use crate::commands::sync::{run_login, run_logout, run_status, run_sync, run_watch};
use crate::commands::trash::{run_delete, run_purge, run_restore, run_sweep, run_trash};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(directive) = "notesync=warn".parse() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    let Some(command) = cli.command else {
        // Quick capture mode: notesync "my thought"
        if cli.note.is_empty() {
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
        let app = App::open(&db_path, SyncSettings::from_env()?).await?;
        return run_new(&app, None, false, &cli.note).await;
    };

    let app = App::open(&db_path, SyncSettings::from_env()?).await?;
    match command {
        Commands::New {
            title,
            draft,
            content,
        } => run_new(&app, title.as_deref(), draft, &content).await,
        Commands::Edit {
            id,
            title,
            draft,
            finalize,
        } => run_edit(&app, &id, title, draft, finalize).await,
        Commands::List { limit, json } => run_list(&app, limit, json).await,
        Commands::Show { id, json } => run_show(&app, &id, json).await,
        Commands::Delete { id } => run_delete(&app, &id).await,
        Commands::Restore { id } => run_restore(&app, &id).await,
        Commands::Purge { id } => run_purge(&app, &id).await,
        Commands::Trash { remote, json } => run_trash(&app, remote, json).await,
        Commands::Sweep => run_sweep(&app).await,
        Commands::Sync { full, note } => run_sync(&app, full, note.as_deref()).await,
        Commands::Login { user, token } => run_login(&app, &user, token).await,
        Commands::Logout => run_logout(&app).await,
        Commands::Status { json } => run_status(&app, json).await,
        Commands::Watch { interval } => run_watch(&app, interval).await,
    }
}
