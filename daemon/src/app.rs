use log::{debug, info, warn};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::management::{ArchiveFileSource, PackageSource, Supervisor, SupervisorError};
use mcsv_protocol::management::server::EventKind;
use mcsv_protocol::utils::format_bytes;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Console front end: server output goes to stdout, stdin lines go to the
/// server console, Ctrl-C stops everything.
pub async fn run_app(config: AppConfig) -> anyhow::Result<()> {
    info!("mcsv {} managing {}", VERSION, config.supervisor.server_dir.display());

    let source: Arc<dyn PackageSource> = Arc::new(ArchiveFileSource);
    let supervisor = Supervisor::with_package_source(config.supervisor, Some(source));

    tokio::spawn(print_output(supervisor.clone()));
    tokio::spawn(watch_players(supervisor.clone()));

    match (supervisor.list_backups().await, supervisor.backups_total_size().await) {
        (Ok(backups), Ok(total)) if !backups.is_empty() => info!(
            "{} backups on disk ({}), newest: {}",
            backups.len(),
            format_bytes(total),
            backups[0].name
        ),
        (Err(err), _) | (_, Err(err)) => warn!("could not read backup catalog: {}", err),
        _ => {}
    }

    supervisor.start().await?;
    let console = tokio::spawn(forward_stdin(supervisor.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    console.abort();
    supervisor.shutdown().await;
    info!("Bye.");
    Ok(())
}

async fn print_output(supervisor: Supervisor) {
    let mut output = supervisor.subscribe_output();
    let mut reported = 0;
    while let Some(line) = output.recv().await {
        println!("{}", line);
        let skipped = output.skipped();
        if skipped > reported {
            warn!("console skipped {} lines", skipped - reported);
            reported = skipped;
        }
    }
}

async fn watch_players(supervisor: Supervisor) {
    let Some(mut events) = supervisor.take_event_stream() else {
        return;
    };
    while let Some(event) = events.recv().await {
        if matches!(event.kind, EventKind::PlayerJoin | EventKind::PlayerLeave) {
            let stats = supervisor.get_stats().await;
            info!("{}/{} players online", stats.player_count, stats.max_players);
        }
    }
}

/// Stdin is read on a plain thread; a blocking read there would otherwise
/// keep the runtime from shutting down.
async fn forward_stdin(supervisor: Supervisor) {
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = line_rx.recv().await {
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        match supervisor.send_command(command).await {
            Ok(()) => {}
            Err(SupervisorError::NotRunning) => warn!("server is not running"),
            Err(err) => warn!("{}", err),
        }
    }
    debug!("stdin closed");
}
