//! voicefleet operator console
//!
//! Loads the stored sessions and reads operator commands from stdin. The
//! console acts as the configured owner unless `--user` says otherwise.

mod commands;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use voicefleet_core::logging::{LogFormat, init_logging};
use voicefleet_core::sim::SimProvider;
use voicefleet_core::{Fleet, FleetConfig, FleetEvent, TimedEvent, UserId};

use crate::commands::Command;

#[derive(Parser, Debug)]
#[command(author, version, about = "Operator console for a pool of messaging sessions", long_about = None)]
struct Args {
    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Session database (overrides DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Operator identity to act as; defaults to OWNER_ID
    #[arg(long)]
    user: Option<i64>,

    /// Exit instead of continuing when API_ID or API_HASH is missing
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = FleetConfig::from_env().context("failed to read configuration")?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(url) = &args.database_url {
        config.database_url = url.clone();
    }

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_logging(&config, format).context("failed to initialize logging")?;

    if let Err(e) = config.validate() {
        if args.strict {
            return Err(e).context("configuration rejected");
        }
        warn!(error = %e, "Configuration incomplete; continuing with the simulated provider");
    }

    // No protocol backend is linked into this binary yet.
    info!("Using the in-process simulated provider");
    let user = UserId(args.user.unwrap_or(config.owner_id));
    let fleet = Fleet::builder(config)
        .with_provider(Arc::new(SimProvider::new()))
        .build()
        .await
        .context("failed to open the session store")?;

    let report = fleet.load_sessions().await.context("failed to load sessions")?;
    println!("{}", report);

    tokio::spawn(log_events(fleet.subscribe_events()));

    run_console(&fleet, user).await?;

    match fleet.shutdown().await {
        Ok(report) => info!(sessions = report.len(), "Console closed"),
        Err(e) => error!(error = %e, "Shutdown incomplete"),
    }
    Ok(())
}

async fn run_console(fleet: &Fleet, user: UserId) -> anyhow::Result<()> {
    println!("Type /help for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(message) => {
                println!("{}", message);
                continue;
            }
        };

        match commands::execute(fleet, user, command).await {
            Ok(reply) => {
                println!("{}", reply.text);
                if reply.quit {
                    return Ok(());
                }
            }
            Err(e) if e.is_validation_error() => println!("{}", e),
            Err(e) => {
                warn!(error = %e, category = e.category(), "Command failed");
                println!("error: {}", e);
            }
        }
    }
}

async fn log_events(mut events: broadcast::Receiver<TimedEvent>) {
    loop {
        match events.recv().await {
            Ok(timed) => match &timed.event {
                FleetEvent::CallJoined { session, title, .. } => {
                    info!(session = %session, channel = %title, "Joined call");
                }
                FleetEvent::CallLeft { session, duration, .. } => {
                    info!(session = %session, seconds = duration.as_secs(), "Left call");
                }
                event => info!(?event, "Fleet event"),
            },
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
