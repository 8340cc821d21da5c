mod cli;
mod config;
mod error;
mod output;

use crate::{
    cli::{Args, Commands},
    config::AppConfig,
    error::{AppError, Result},
    output::OutputManager,
};
use clap::Parser;
#[cfg(feature = "colored-output")]
use colored::*;
use sprint_notify::protocol::OutboundEvent;
use sprint_notify::{
    ClientConfig, Connection, HttpNotificationApi, NotificationApi, NotificationStore,
    NotificationSync, SyncNotice,
};
use std::{process, sync::Arc};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub const DEFAULT_LOG_FILTER: &str = "sbnotify=info,sprint_notify=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let json = args.command.wants_json();

    if let Err(e) = run(args).await {
        if json {
            let error_json = serde_json::json!({
                "status": "error",
                "message": e.to_string(),
            });
            println!("{error_json}");
        } else {
            error!("Application error: {}", e);
            #[cfg(feature = "colored-output")]
            {
                eprintln!("{} {}", "Error:".red().bold(), e);
            }
            #[cfg(not(feature = "colored-output"))]
            {
                eprintln!("Error: {}", e);
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    init_logging(args.verbose, args.quiet, args.log_json)?;

    let config =
        AppConfig::load(args.config.as_deref())?.with_cookie_override(args.cookie.as_deref());
    debug!(?config, "Configuration loaded");
    let output = OutputManager::new(config.colored);

    match args.command {
        Commands::Watch { user, json } => watch(&config.notify, &output, &user, json).await,
        Commands::List { json, unread } => {
            let api = HttpNotificationApi::new(&config.notify)?;
            let mut store = NotificationStore::new(config.notify.max_entries);
            store.seed(api.fetch_notifications().await?);
            println!("{}", output.format_snapshot(&store.snapshot(), unread, json)?);
            Ok(())
        }
        Commands::MarkRead { user, id } => {
            if id.trim().is_empty() {
                return Err(AppError::InvalidInput("notification id is empty".to_string()));
            }
            let event = OutboundEvent::MarkRead {
                notification_id: id.clone(),
            };
            emit_once(&config.notify, &user, event).await?;
            println!("✓ Marked {id} as read");
            Ok(())
        }
        Commands::MarkAllRead { user } => {
            let event = OutboundEvent::MarkAllRead {
                user_id: user.clone(),
            };
            emit_once(&config.notify, &user, event).await?;
            println!("✓ Marked all notifications as read");
            Ok(())
        }
        Commands::Config { show } => {
            if show {
                println!("{}", config.show()?);
            } else {
                match AppConfig::default_path() {
                    Some(path) => println!("Default config file: {}", path.display()),
                    None => println!("No default config directory on this platform"),
                }
                println!("Use --show to display the effective configuration");
            }
            Ok(())
        }
    }
}

/// Stream notifications until Ctrl-C.
async fn watch(config: &ClientConfig, output: &OutputManager, user: &str, json: bool) -> Result<()> {
    let mut connection = Connection::open(config)?;
    let api = Arc::new(HttpNotificationApi::new(config)?);
    let sync = NotificationSync::new(&mut connection, api, config)?;
    let mut notices = sync.subscribe_notices();

    sync.start(Some(user)).await?;
    info!(user, unread = sync.unread_count(), "Watching notifications");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
        info!("Shutting down");
    };
    pump_notices(&mut notices, shutdown, |notice| {
        match notice {
            SyncNotice::Pushed { id } => {
                let pushed = sync.with_store(|store| {
                    store
                        .iter()
                        .find(|entry| entry.id() == id)
                        .map(|entry| entry.notification().clone())
                });
                if let Some(notification) = pushed {
                    println!("{}", output.format_notification(&notification, json)?);
                }
            }
            notice => {
                if let Some(line) = output.format_notice(&notice, json)? {
                    println!("{line}");
                }
            }
        }
        Ok(())
    })
    .await?;

    sync.shutdown().await;
    connection.close().await?;
    Ok(())
}

/// Hand notices to `handle` until `shutdown` resolves or the channel closes.
async fn pump_notices<F>(
    notices: &mut broadcast::Receiver<SyncNotice>,
    shutdown: impl Future<Output = ()>,
    mut handle: F,
) -> Result<()>
where
    F: FnMut(SyncNotice) -> Result<()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => return Ok(()),
            notice = notices.recv() => match notice {
                Ok(notice) => handle(notice)?,
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Dropped notices"),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

/// Connect, subscribe as `user`, deliver one event, and close.
async fn emit_once(config: &ClientConfig, user: &str, event: OutboundEvent) -> Result<()> {
    let connection = Connection::open(config)?;
    connection.wait_ready(config.request_timeout()).await?;

    let sender = connection.sender();
    sender.join(user)?.wait().await?;
    let name = event.name();
    sender.emit(event)?.wait().await?;
    info!(event = name, user, "Event delivered");

    connection.close().await?;
    Ok(())
}

fn init_logging(verbose: bool, quiet: bool, json: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("sbnotify=debug,sprint_notify=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(verbose)
                    .with_writer(std::io::stderr),
            )
            .try_init()
    };
    result.map_err(|e| AppError::Logging(e.to_string()))
}
