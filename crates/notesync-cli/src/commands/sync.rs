use std::io::{self, IsTerminal, Read};
use std::time::Duration;

use notesync_core::sync::{
    NoteSyncOutcome, ReconcileReport, SkipReason, SyncOutcome, SyncScheduler, SyncTrigger,
};
use serde::Serialize;

use crate::app::App;
use crate::commands::common::{format_timestamp, resolve_note};
use crate::error::CliError;

const TRIGGER_QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Serialize)]
struct StatusReport {
    api_url: Option<String>,
    signed_in: bool,
    user_id: Option<String>,
    last_sync_time: Option<i64>,
    pending: usize,
    trashed: usize,
}

pub async fn run_sync(app: &App, full: bool, note: Option<&str>) -> Result<(), CliError> {
    app.require_remote()?;
    if app.store().current_session().await?.is_none() {
        return Err(CliError::NotSignedIn);
    }

    if let Some(query) = note {
        let note = resolve_note(app.store(), query).await?;
        return match app.coordinator.sync_single_note(&note.id).await {
            NoteSyncOutcome::Pushed { settled, .. } => {
                if settled {
                    println!("{}", note.id);
                } else {
                    println!("{} (changed during push; still pending)", note.id);
                }
                Ok(())
            }
            NoteSyncOutcome::Skipped(reason) => Err(CliError::SyncSkipped(reason.label().into())),
            NoteSyncOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
        };
    }

    let outcome = if full {
        app.coordinator.force_sync().await
    } else {
        app.coordinator.schedule_auto_sync().await
    };
    report_outcome(outcome)
}

fn report_outcome(outcome: SyncOutcome) -> Result<(), CliError> {
    match outcome {
        SyncOutcome::Completed(report) => {
            println!("{}", summarize(&report));
            Ok(())
        }
        SyncOutcome::Skipped(SkipReason::NotAuthenticated) => Err(CliError::NotSignedIn),
        SyncOutcome::Skipped(reason) => Err(CliError::SyncSkipped(reason.label().into())),
        SyncOutcome::Failed(message) => Err(CliError::SyncFailed(message)),
    }
}

pub fn summarize(report: &ReconcileReport) -> String {
    let mut line = format!(
        "Sync completed: {} pushed, {} created, {} updated, {} removed",
        report.pushed,
        report.created,
        report.updated,
        report.pruned + report.removed_remotely
    );
    if report.conflicts > 0 {
        line.push_str(&format!(", {} rejected by the server", report.conflicts));
    }
    line
}

pub async fn run_login(app: &App, user: &str, token: Option<String>) -> Result<(), CliError> {
    app.require_remote()?;
    let token = match token {
        Some(token) => token,
        None => read_token_from_stdin()?,
    };

    let outcome = app.coordinator.login(user, &token).await?;
    match outcome {
        SyncOutcome::Completed(report) => {
            println!("Signed in as {}", user.trim());
            println!("{}", summarize(&report));
            Ok(())
        }
        SyncOutcome::Failed(message) => {
            // Keep the session only if the server accepted it
            if !app.coordinator.is_authenticated().await? {
                app.coordinator.logout().await?;
            }
            Err(CliError::SyncFailed(message))
        }
        SyncOutcome::Skipped(reason) => Err(CliError::SyncSkipped(reason.label().into())),
    }
}

fn read_token_from_stdin() -> Result<String, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(CliError::MissingToken);
    }
    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    let token = buffer.trim();
    if token.is_empty() {
        Err(CliError::MissingToken)
    } else {
        Ok(token.to_string())
    }
}

pub async fn run_logout(app: &App) -> Result<(), CliError> {
    app.coordinator.logout().await?;
    println!("Signed out; local notes were kept");
    Ok(())
}

pub async fn run_status(app: &App, as_json: bool) -> Result<(), CliError> {
    let session = app.store().current_session().await?;
    let report = StatusReport {
        api_url: app.settings.api_base_url.clone(),
        signed_in: session.is_some(),
        user_id: session.as_ref().map(|session| session.user_id.clone()),
        last_sync_time: session.as_ref().and_then(|session| session.last_sync_time),
        pending: app.store().count_needing_sync().await?,
        trashed: app.store().list_trash().await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "server:     {}",
        report.api_url.as_deref().unwrap_or("not configured (local-only)")
    );
    match &report.user_id {
        Some(user_id) => println!("session:    {user_id}"),
        None => println!("session:    signed out"),
    }
    println!(
        "last sync:  {}",
        report
            .last_sync_time
            .map_or_else(|| "never".to_string(), format_timestamp)
    );
    println!("pending:    {}", report.pending);
    println!("trash:      {}", report.trashed);
    Ok(())
}

/// Sync on every tick until Ctrl-C. Expired trash is swept once at startup.
pub async fn run_watch(app: &App, interval: Option<u64>) -> Result<(), CliError> {
    app.require_remote()?;
    if app.store().current_session().await?.is_none() {
        return Err(CliError::NotSignedIn);
    }

    let sweep = app.lifecycle().sweep_expired().await?;
    if sweep.purged > 0 || sweep.failed > 0 {
        tracing::info!(
            purged = sweep.purged,
            failed = sweep.failed,
            "Swept expired trash"
        );
    }

    let interval = interval.map_or(app.settings.sync_interval, Duration::from_secs);
    let (scheduler, triggers) = SyncScheduler::channel(TRIGGER_QUEUE_CAPACITY);
    let ticker = scheduler.spawn_ticker(interval);
    scheduler.request(SyncTrigger::Manual);
    println!("Watching for changes every {}s; press Ctrl-C to stop", interval.as_secs());

    tokio::select! {
        () = app.coordinator.run(triggers) => {}
        result = tokio::signal::ctrl_c() => result?,
    }
    ticker.abort();

    let status = app.coordinator.status();
    if let Some(error) = status.last_error {
        eprintln!("Last sync error: {error}");
    }
    Ok(())
}
